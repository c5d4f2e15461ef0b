//! WebSocket handlers

pub mod events;

/// Maximum number of events buffered per WebSocket connection
pub const WS_BUFFER_SIZE: usize = 256;
