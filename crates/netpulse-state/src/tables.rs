//! redb table definitions for the netpulse state store.
//!
//! Each table uses `u64` ids as keys and `&[u8]` values (JSON-serialized
//! domain types). Ids are assigned by the store, starting at 1, so key
//! order is insertion order.

use redb::TableDefinition;

/// Registered devices keyed by device id.
pub const DEVICES: TableDefinition<u64, &[u8]> = TableDefinition::new("devices");

/// Sweep routines keyed by routine id.
pub const ROUTINES: TableDefinition<u64, &[u8]> = TableDefinition::new("routines");

/// Probe outcomes keyed by ping id.
pub const PINGS: TableDefinition<u64, &[u8]> = TableDefinition::new("pings");
