//! Change-event system for real-time WebSocket notifications
//!
//! - `ChangeEvent`: one record per committed mutation, scoped to a workspace
//! - `EventEmitter`: the seam handlers publish through
//! - `EventHub`: single-loop fan-out with bounded per-client queues

mod hub;
mod types;

pub use hub::{EventHub, HubStats, Subscription, CLIENT_QUEUE_CAPACITY};
pub use types::{ChangeEvent, EventEmitter, EventType};
