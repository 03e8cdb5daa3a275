//! netpulse-sweep — the recurring probe sweep control loop.
//!
//! The [`Sweeper`] drives the whole monitor: on every tick it recovers
//! routines abandoned by a prior crash, creates one routine row, walks
//! the registered devices one offset at a time, probes each, persists a
//! ping per device, and announces progress on the event bus.
//!
//! # Architecture
//!
//! ```text
//! Sweeper
//!   ├── SweepStore (persistence contract: routines, pings, device cursor)
//!   ├── Prober (one bounded reachability check per device)
//!   ├── EventBus (new_routine / ping_done / routine_end)
//!   └── idle timer slot (the only cancellation point)
//! ```
//!
//! # Liveness
//!
//! One logical control loop: the next tick is armed only after the
//! current one fully completes, so at most one sweep is ever in flight
//! and no sweep-serialization lock exists. A store failure aborts the
//! remainder of a sweep but never the loop — the idle timer is re-armed
//! unconditionally. Probe failures and routine-insert races are
//! recovered inside the tick and never surfaced.

pub mod config;
pub mod error;
pub mod store;
pub mod sweeper;

pub use config::SweepConfig;
pub use error::{SweepError, SweepResult};
pub use store::SweepStore;
pub use sweeper::Sweeper;
