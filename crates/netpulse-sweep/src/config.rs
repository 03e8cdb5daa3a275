//! Sweep configuration surface.

use std::time::Duration;

use netpulse_probe::ProbeConfig;

/// The overridable knobs of the sweep loop.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Delay between the completion of one tick and the next. The
    /// effective period is `idle_interval` plus the sweep duration.
    pub idle_interval: Duration,
    /// Echo requests per device probe.
    pub probe_count: u32,
    /// Per-request probe timeout in seconds.
    pub probe_timeout_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(5 * 60),
            probe_count: 1,
            probe_timeout_secs: 1,
        }
    }
}

impl SweepConfig {
    /// The probe parameters this configuration implies.
    pub fn probe_config(&self) -> ProbeConfig {
        ProbeConfig {
            count: self.probe_count,
            timeout_secs: self.probe_timeout_secs,
        }
    }
}
