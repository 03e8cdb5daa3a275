//! netpulse-bus — in-process publish/subscribe for sweep lifecycle events.
//!
//! The sweeper publishes three topics as it works through a sweep:
//!
//! ```text
//! Sweeper → EventBus.publish(SweepEvent) → subscribers in registration order
//!             new_routine  — a sweep's routine row was created
//!             ping_done    — one probe outcome was persisted
//!             routine_end  — the sweep's device cursor was exhausted
//! ```
//!
//! Delivery is synchronous on the publisher's execution context. A
//! failing subscriber is logged and isolated; it never stops the
//! remaining subscribers or the publisher.
//!
//! The bus is an explicit instance constructed once and handed by
//! reference to the sweeper and to any consumers. There is no global
//! emitter.

pub mod bus;
pub mod event;

pub use bus::{EventBus, SubscriptionId};
pub use event::{SweepEvent, Topic};
