pub mod bus;
pub mod types;

// Re-export key types for convenience
pub use bus::{BusStats, Delivery, EventBus, EventHandler, PartitionedEventBus, RecordingEventBus};
pub use types::{EventCategory, EventContext, EventEnvelope, LifecycleEvent};
