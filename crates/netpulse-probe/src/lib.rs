//! netpulse-probe — bounded reachability checks.
//!
//! A [`Prober`] performs one reachability check against an IPv4 address
//! and reports the elapsed wall-clock time as the round-trip latency.
//! The shipped implementation, [`PingProber`], shells out to the
//! platform's `ping` utility; the trait hides the mechanism so the
//! sweeper stays platform-agnostic.
//!
//! A probe either succeeds with a measured RTT or fails — a non-zero
//! exit, a timeout, or a spawn error never produces a success-looking
//! result.

pub mod prober;

pub use prober::{PingProber, ProbeConfig, ProbeError, ProbeReply, Prober};
