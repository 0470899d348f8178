//! `projectgate-events`: membership change events and the bus that carries them.

pub mod bus;
pub mod in_memory_bus;
pub mod invalidation;

pub use bus::{EventBus, EventListener, Subscription};
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use invalidation::{InvalidationEvent, InvalidationScope, MembershipChange};
