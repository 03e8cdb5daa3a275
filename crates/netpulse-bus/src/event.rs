//! Event and topic types published by the sweeper.

use netpulse_state::{Ping, RoutineId};
use serde::Serialize;
use std::fmt;

/// The three sweep lifecycle topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    NewRoutine,
    PingDone,
    RoutineEnd,
}

impl Topic {
    /// Wire name of the topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::NewRoutine => "new_routine",
            Topic::PingDone => "ping_done",
            Topic::RoutineEnd => "routine_end",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sweep lifecycle event with its payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SweepEvent {
    /// A routine row was created. `timestamp` is its creation time.
    NewRoutine { id: RoutineId, timestamp: u64 },
    /// One probe outcome was persisted, carried with its generated id.
    PingDone(Ping),
    /// The sweep's device cursor was exhausted. `timestamp` is the
    /// routine's creation time, not its completion time.
    RoutineEnd { id: RoutineId, timestamp: u64 },
}

impl SweepEvent {
    /// The topic this event is published under.
    pub fn topic(&self) -> Topic {
        match self {
            SweepEvent::NewRoutine { .. } => Topic::NewRoutine,
            SweepEvent::PingDone(_) => Topic::PingDone,
            SweepEvent::RoutineEnd { .. } => Topic::RoutineEnd,
        }
    }
}
