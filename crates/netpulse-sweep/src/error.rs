//! Sweep error types.

use thiserror::Error;

/// Errors that abort the remainder of a sweep.
///
/// Only persistence failures are fatal to a tick. Probe failures become
/// failed ping rows, and a routine-insert race is retried in place;
/// neither ever surfaces here.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("store error: {0}")]
    Store(#[from] netpulse_state::StateError),
}

pub type SweepResult<T> = Result<T, SweepError>;
