//! HTTP API
//!
//! REST endpoints for the operation API and fleet registration, plus a
//! WebSocket stream of engine events.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{ApiServer, AppState};
