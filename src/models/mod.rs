pub mod assignment;
pub mod envelope;
pub mod event;
pub mod health;
pub mod performance;
pub mod policy;
pub mod server;

pub use assignment::*;
pub use envelope::*;
pub use event::*;
pub use health::*;
pub use performance::*;
pub use policy::*;
pub use server::*;
