//! Domain types for the netpulse state store.
//!
//! These types represent the persisted state of the monitor: devices
//! (registered endpoints), routines (one row per sweep), and pings
//! (one probe outcome per device per sweep). All types are serializable
//! to/from JSON for storage in redb tables.
//!
//! Timestamps are Unix epoch milliseconds throughout.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Unique identifier for a registered device.
pub type DeviceId = u64;

/// Unique identifier for a sweep routine.
pub type RoutineId = u64;

/// Unique identifier for a recorded ping.
pub type PingId = u64;

/// Sentinel `finished_timestamp` written by the recovery step to routines
/// abandoned by a process restart. Observably "finished" to any consumer
/// that only checks for `Some`, indistinguishable from a completion at
/// time zero.
pub const ABANDONED_TIMESTAMP: u64 = 0;

// ── Device ────────────────────────────────────────────────────────

/// A registered network endpoint monitored for reachability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    /// Probe target address.
    pub address: Ipv4Addr,
    /// Free-form description.
    pub descr: Option<String>,
    /// Administrative flag only. The sweeper does not filter on it;
    /// disabled devices are still probed.
    pub disabled: bool,
}

/// Insert form of [`Device`] — the store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewDevice {
    pub name: String,
    pub address: Ipv4Addr,
    pub descr: Option<String>,
    pub disabled: bool,
}

impl NewDevice {
    /// Attach a store-assigned id.
    pub fn into_device(self, id: DeviceId) -> Device {
        Device {
            id,
            name: self.name,
            address: self.address,
            descr: self.descr,
            disabled: self.disabled,
        }
    }
}

// ── Routine ───────────────────────────────────────────────────────

/// One scheduled sweep over all devices; owns one ping per device
/// observed during the sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Routine {
    pub id: RoutineId,
    /// Creation time (epoch millis).
    pub timestamp: u64,
    /// Completion time. `None` while the sweep is in flight; set exactly
    /// once on completion, or to [`ABANDONED_TIMESTAMP`] by recovery.
    pub finished_timestamp: Option<u64>,
}

impl Routine {
    /// Whether this routine is finished, either by completion or by the
    /// recovery sentinel.
    pub fn is_finished(&self) -> bool {
        self.finished_timestamp.is_some()
    }
}

// ── Ping ──────────────────────────────────────────────────────────

/// The recorded outcome of probing one device within one routine.
/// Immutable once inserted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ping {
    pub id: PingId,
    pub routine_id: RoutineId,
    pub device_id: DeviceId,
    /// Measured round-trip time in milliseconds; `None` when the probe
    /// failed.
    pub rtt: Option<u64>,
    pub failed: bool,
    /// Probe time (epoch millis).
    pub timestamp: u64,
}

/// Insert form of [`Ping`] — the store assigns the id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewPing {
    pub routine_id: RoutineId,
    pub device_id: DeviceId,
    pub rtt: Option<u64>,
    pub failed: bool,
    pub timestamp: u64,
}

impl NewPing {
    /// Attach a store-assigned id.
    pub fn into_ping(self, id: PingId) -> Ping {
        Ping {
            id,
            routine_id: self.routine_id,
            device_id: self.device_id,
            rtt: self.rtt,
            failed: self.failed,
            timestamp: self.timestamp,
        }
    }
}
