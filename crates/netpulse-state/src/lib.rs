//! netpulse-state — embedded probe-result store for netpulse.
//!
//! Backed by [redb](https://docs.rs/redb), persists the three monitoring
//! tables: devices (the registered endpoints), routines (one row per
//! sweep), and pings (one probe outcome per device per sweep).
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns
//! under monotonically increasing `u64` keys, so offset-based iteration
//! over devices walks them in a stable, ascending-id order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
