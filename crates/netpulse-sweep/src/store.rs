//! The persistence contract the sweeper consumes.
//!
//! The sweeper only needs six operations, expressed here as a trait so
//! sweeps run identically against the embedded redb store, a test
//! double, or any future backend. Every operation may suspend on I/O
//! and may fail with a [`StateError`](netpulse_state::StateError).

use std::future::Future;
use std::sync::Arc;

use netpulse_state::{Device, NewPing, Ping, RoutineId, StateResult, StateStore};

/// Store operations required to execute one sweep.
pub trait SweepStore: Send + Sync {
    /// Mark every routine with an unset `finished_timestamp` as
    /// finished-by-recovery. Runs at the start of every tick, before
    /// the tick's own routine is created.
    fn reset_unfinished_routines(&self) -> impl Future<Output = StateResult<u64>> + Send;

    /// Count registered devices (the zero-device gate).
    fn count_devices(&self) -> impl Future<Output = StateResult<u64>> + Send;

    /// Fetch the device at a stable ascending position, or `None` past
    /// the end. Deliberately not snapshot-isolated across calls.
    fn device_at_offset(
        &self,
        offset: u64,
    ) -> impl Future<Output = StateResult<Option<Device>>> + Send;

    /// Create a routine row. `None` means the backend yielded no id
    /// (insert race); the sweeper retries the whole tick.
    fn insert_routine(
        &self,
        timestamp: u64,
    ) -> impl Future<Output = StateResult<Option<RoutineId>>> + Send;

    /// Persist one probe outcome, returning the row with its id.
    fn insert_ping(&self, ping: &NewPing) -> impl Future<Output = StateResult<Ping>> + Send;

    /// Set a routine's real completion timestamp.
    fn finish_routine(
        &self,
        id: RoutineId,
        timestamp: u64,
    ) -> impl Future<Output = StateResult<()>> + Send;
}

impl SweepStore for StateStore {
    fn reset_unfinished_routines(&self) -> impl Future<Output = StateResult<u64>> + Send {
        std::future::ready(StateStore::reset_unfinished_routines(self))
    }

    fn count_devices(&self) -> impl Future<Output = StateResult<u64>> + Send {
        std::future::ready(StateStore::count_devices(self))
    }

    fn device_at_offset(
        &self,
        offset: u64,
    ) -> impl Future<Output = StateResult<Option<Device>>> + Send {
        std::future::ready(StateStore::device_at_offset(self, offset))
    }

    fn insert_routine(
        &self,
        timestamp: u64,
    ) -> impl Future<Output = StateResult<Option<RoutineId>>> + Send {
        std::future::ready(StateStore::insert_routine(self, timestamp))
    }

    fn insert_ping(&self, ping: &NewPing) -> impl Future<Output = StateResult<Ping>> + Send {
        std::future::ready(StateStore::insert_ping(self, ping))
    }

    fn finish_routine(
        &self,
        id: RoutineId,
        timestamp: u64,
    ) -> impl Future<Output = StateResult<()>> + Send {
        std::future::ready(StateStore::finish_routine(self, id, timestamp))
    }
}

/// Shared stores sweep the same as owned ones.
impl<T: SweepStore> SweepStore for Arc<T> {
    fn reset_unfinished_routines(&self) -> impl Future<Output = StateResult<u64>> + Send {
        T::reset_unfinished_routines(self)
    }

    fn count_devices(&self) -> impl Future<Output = StateResult<u64>> + Send {
        T::count_devices(self)
    }

    fn device_at_offset(
        &self,
        offset: u64,
    ) -> impl Future<Output = StateResult<Option<Device>>> + Send {
        T::device_at_offset(self, offset)
    }

    fn insert_routine(
        &self,
        timestamp: u64,
    ) -> impl Future<Output = StateResult<Option<RoutineId>>> + Send {
        T::insert_routine(self, timestamp)
    }

    fn insert_ping(&self, ping: &NewPing) -> impl Future<Output = StateResult<Ping>> + Send {
        T::insert_ping(self, ping)
    }

    fn finish_routine(
        &self,
        id: RoutineId,
        timestamp: u64,
    ) -> impl Future<Output = StateResult<()>> + Send {
        T::finish_routine(self, id, timestamp)
    }
}
