//! Shared fleet state: the server registry and the engine event bus

mod registry;

pub use registry::ServerRegistry;

use tokio::sync::broadcast;

use crate::models::FleetEvent;

/// Capacity of the engine event channel
pub const EVENT_BUFFER_SIZE: usize = 1024;

/// Sender side of the engine event bus
pub type EventSender = broadcast::Sender<FleetEvent>;

/// Create the engine event bus
pub fn event_channel() -> EventSender {
    let (tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
    tx
}

/// Publish an event; having no listeners is not an error
pub(crate) fn publish(events: &EventSender, event: FleetEvent) {
    let _ = events.send(event);
}
