//! StateStore — redb-backed persistence for netpulse.
//!
//! Provides typed operations over devices, routines, and pings. All
//! values are JSON-serialized into redb's `&[u8]` value columns under
//! store-assigned `u64` ids. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! The sweep-facing operations (`reset_unfinished_routines`,
//! `count_devices`, `device_at_offset`, `insert_routine`, `insert_ping`,
//! `finish_routine`) form the persistence contract the sweeper consumes;
//! the device CRUD operations back the management CLI.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DEVICES).map_err(map_err!(Table))?;
        txn.open_table(ROUTINES).map_err(map_err!(Table))?;
        txn.open_table(PINGS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Devices ────────────────────────────────────────────────────

    /// Register a device. Fails with `Conflict` if another device
    /// already uses the same address.
    pub fn add_device(&self, new: &NewDevice) -> StateResult<Device> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let device;
        {
            let mut table = txn.open_table(DEVICES).map_err(map_err!(Table))?;

            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let existing: Device =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if existing.address == new.address {
                    return Err(StateError::Conflict(format!(
                        "device address already registered: {}",
                        new.address
                    )));
                }
            }

            let id = next_id(&table)?;
            device = new.clone().into_device(id);
            let value = serde_json::to_vec(&device).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = device.id, address = %device.address, "device registered");
        Ok(device)
    }

    /// Get a device by id.
    pub fn get_device(&self, id: DeviceId) -> StateResult<Option<Device>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEVICES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let device: Device =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(device))
            }
            None => Ok(None),
        }
    }

    /// List all devices in ascending id order.
    pub fn list_devices(&self) -> StateResult<Vec<Device>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEVICES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let device: Device =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(device);
        }
        Ok(results)
    }

    /// Delete a device by id. Returns true if it existed.
    pub fn delete_device(&self, id: DeviceId) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(DEVICES).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id, existed, "device deleted");
        Ok(existed)
    }

    /// Count registered devices.
    pub fn count_devices(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEVICES).map_err(map_err!(Table))?;
        let mut count = 0u64;
        for entry in table.iter().map_err(map_err!(Read))? {
            entry.map_err(map_err!(Read))?;
            count += 1;
        }
        Ok(count)
    }

    /// Fetch the device at the given position in ascending id order, or
    /// `None` past the end.
    ///
    /// Each call is an independent read; the device set is not snapshot-
    /// isolated across calls, so a sweep walking offsets sees concurrent
    /// additions and removals.
    pub fn device_at_offset(&self, offset: u64) -> StateResult<Option<Device>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEVICES).map_err(map_err!(Table))?;
        match table.iter().map_err(map_err!(Read))?.nth(offset as usize) {
            Some(entry) => {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let device: Device =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(device))
            }
            None => Ok(None),
        }
    }

    // ── Routines ───────────────────────────────────────────────────

    /// Insert a new routine with the given creation timestamp and an
    /// unset `finished_timestamp`.
    ///
    /// Returns the assigned id. The `Option` is part of the persistence
    /// contract (a backend may yield no id under an insert race); this
    /// backend always returns `Some`.
    pub fn insert_routine(&self, timestamp: u64) -> StateResult<Option<RoutineId>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let id;
        {
            let mut table = txn.open_table(ROUTINES).map_err(map_err!(Table))?;
            id = next_id(&table)?;
            let routine = Routine {
                id,
                timestamp,
                finished_timestamp: None,
            };
            let value = serde_json::to_vec(&routine).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id, timestamp, "routine created");
        Ok(Some(id))
    }

    /// Get a routine by id.
    pub fn get_routine(&self, id: RoutineId) -> StateResult<Option<Routine>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROUTINES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let routine: Routine =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(routine))
            }
            None => Ok(None),
        }
    }

    /// List all routines in ascending id order.
    pub fn list_routines(&self) -> StateResult<Vec<Routine>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROUTINES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let routine: Routine =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(routine);
        }
        Ok(results)
    }

    /// Mark every routine with an unset `finished_timestamp` as
    /// finished-by-recovery ([`ABANDONED_TIMESTAMP`]). Rows that already
    /// carry a completion time are untouched. Returns the affected count.
    pub fn reset_unfinished_routines(&self) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let affected;
        {
            let mut table = txn.open_table(ROUTINES).map_err(map_err!(Table))?;

            let mut stale = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let routine: Routine =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if routine.finished_timestamp.is_none() {
                    stale.push((key.value(), routine));
                }
            }

            affected = stale.len() as u64;
            for (id, mut routine) in stale {
                routine.finished_timestamp = Some(ABANDONED_TIMESTAMP);
                let value = serde_json::to_vec(&routine).map_err(map_err!(Serialize))?;
                table
                    .insert(id, value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        if affected > 0 {
            debug!(affected, "abandoned routines marked finished");
        }
        Ok(affected)
    }

    /// Set a routine's completion timestamp. Fails with `NotFound` if no
    /// such routine exists.
    pub fn finish_routine(&self, id: RoutineId, timestamp: u64) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ROUTINES).map_err(map_err!(Table))?;
            let mut routine: Routine = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("routine {id}"))),
            };
            routine.finished_timestamp = Some(timestamp);
            let value = serde_json::to_vec(&routine).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id, timestamp, "routine finished");
        Ok(())
    }

    // ── Pings ──────────────────────────────────────────────────────

    /// Record a probe outcome. Returns the persisted row with its
    /// assigned id.
    pub fn insert_ping(&self, new: &NewPing) -> StateResult<Ping> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let ping;
        {
            let mut table = txn.open_table(PINGS).map_err(map_err!(Table))?;
            let id = next_id(&table)?;
            ping = new.clone().into_ping(id);
            let value = serde_json::to_vec(&ping).map_err(map_err!(Serialize))?;
            table
                .insert(id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(ping)
    }

    /// List all pings recorded for a routine in ascending id order.
    pub fn pings_for_routine(&self, routine_id: RoutineId) -> StateResult<Vec<Ping>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PINGS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let ping: Ping =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if ping.routine_id == routine_id {
                results.push(ping);
            }
        }
        Ok(results)
    }
}

/// Next id for a `u64`-keyed table: one past the largest existing key.
fn next_id<T: ReadableTable<u64, &'static [u8]>>(table: &T) -> StateResult<u64> {
    let last = table.last().map_err(map_err!(Read))?;
    Ok(last.map(|(key, _)| key.value() + 1).unwrap_or(1))
}
