//! API middleware

mod cors;
mod logging;

pub use cors::cors_layer;
pub use logging::log_request;
