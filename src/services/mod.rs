//! Background services

pub mod retention;

pub use retention::{RetentionHandle, RetentionReport, RetentionService};
