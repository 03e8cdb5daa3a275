//! Probe trait and the subprocess `ping` implementation.

use std::future::Future;
use std::net::Ipv4Addr;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Probe parameters, overridable from the daemon configuration surface.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Echo requests per check.
    pub count: u32,
    /// Per-request reply timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            count: 1,
            timeout_secs: 1,
        }
    }
}

/// Successful probe outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReply {
    /// Wall-clock time around the whole check, in milliseconds. Not
    /// parsed from tool output.
    pub rtt_ms: u64,
}

/// Ways a probe can fail. All of them map to one failed ping row; none
/// of them aborts a sweep.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to spawn probe process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("probe reported unreachable ({0})")]
    Unreachable(ExitStatus),

    #[error("probe timed out")]
    TimedOut,
}

/// A capability that performs one bounded reachability check.
///
/// Implementations must be safe to invoke concurrently for distinct
/// addresses; the sweeper nevertheless calls strictly sequentially.
pub trait Prober: Send + Sync {
    fn probe(
        &self,
        address: Ipv4Addr,
    ) -> impl Future<Output = Result<ProbeReply, ProbeError>> + Send;
}

/// Probes by spawning the system `ping` utility.
#[derive(Debug, Clone)]
pub struct PingProber {
    program: String,
    config: ProbeConfig,
}

impl PingProber {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            program: "ping".to_string(),
            config,
        }
    }

    #[cfg(test)]
    fn with_program(program: &str, config: ProbeConfig) -> Self {
        Self {
            program: program.to_string(),
            config,
        }
    }

    /// Hard upper bound on the whole check: the per-request timeouts the
    /// tool enforces itself, plus one second of process overhead.
    fn deadline(&self) -> Duration {
        Duration::from_secs(self.config.count as u64 * self.config.timeout_secs + 1)
    }

    fn command(&self, address: Ipv4Addr) -> Command {
        let count = self.config.count.to_string();
        let mut cmd = Command::new(&self.program);

        #[cfg(windows)]
        cmd.args([
            "-n",
            &count,
            "-w",
            &(self.config.timeout_secs * 1_000).to_string(),
        ]);
        // macOS ping takes the total wait in -t seconds; -W is millis there.
        #[cfg(target_os = "macos")]
        cmd.args(["-c", &count, "-t", &self.config.timeout_secs.to_string()]);
        #[cfg(not(any(windows, target_os = "macos")))]
        cmd.args(["-c", &count, "-W", &self.config.timeout_secs.to_string()]);

        cmd.arg(address.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl Prober for PingProber {
    fn probe(
        &self,
        address: Ipv4Addr,
    ) -> impl Future<Output = Result<ProbeReply, ProbeError>> + Send {
        async move {
            let started = Instant::now();
            let mut child = self.command(address).spawn()?;

            let status = tokio::time::timeout(self.deadline(), child.wait())
                .await
                .map_err(|_| {
                    debug!(%address, "probe exceeded deadline");
                    ProbeError::TimedOut
                })??;

            if !status.success() {
                debug!(%address, %status, "probe reported unreachable");
                return Err(ProbeError::Unreachable(status));
            }

            Ok(ProbeReply {
                rtt_ms: started.elapsed().as_millis() as u64,
            })
        }
    }
}
