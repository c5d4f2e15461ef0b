//! API request handlers

pub mod health;
pub mod operations;
pub mod servers;
