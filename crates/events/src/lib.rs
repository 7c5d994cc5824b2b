//! Lifecycle events emitted by the persister and the bus that delivers them.

pub mod bus;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use event::{EventKind, LifecycleEvent, ObjectRef};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
