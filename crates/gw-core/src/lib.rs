use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod error;

pub use error::{CompactionError, StartError, StopError};

/// Liveness of the managed server as last derived by the supervisor.
///
/// NOTE: Never trusted as a cache. The supervisor re-derives liveness by
/// probing; this state only describes one supervisor call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ServerState {
    Unknown,
    Starting,
    Running,
    Stopping,
    Stopped,
    /// Startup retries exhausted. Terminal; reported as an error, never
    /// collapsed into `Stopped`.
    StartFailed,
}

/// One launched (or observed) instance of the managed server.
///
/// Lives for a single supervisor call; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ManagedProcessHandle {
    pub pid: Option<u32>,
    pub launched_at_ms: u64,
    pub state: ServerState,
}

impl ManagedProcessHandle {
    pub fn launched(pid: Option<u32>) -> Self {
        Self {
            pid,
            launched_at_ms: now_unix_ms(),
            state: ServerState::Starting,
        }
    }

    pub fn unknown() -> Self {
        Self {
            pid: None,
            launched_at_ms: 0,
            state: ServerState::Unknown,
        }
    }
}

/// Outcome of one health probe attempt. `attempt` is 1-based.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthCheckResult {
    pub reachable: bool,
    pub http_status: Option<u16>,
    pub error: Option<String>,
    pub attempt: u32,
    /// Wall time since the first attempt of the enclosing poll.
    pub elapsed: Duration,
}

/// Bounded retry schedule for health polling.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    /// Multiplier applied per attempt when set; `None` keeps a fixed interval.
    pub backoff: Option<f64>,
    pub max_interval: Duration,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
            backoff: None,
            max_interval: interval,
        }
    }

    pub fn with_backoff(mut self, multiplier: f64, max_interval: Duration) -> Self {
        self.backoff = Some(multiplier.max(1.0));
        self.max_interval = max_interval;
        self
    }

    /// Delay to sleep after `attempt` (1-based) fails, before the next try.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            None => self.interval,
            Some(mult) => {
                // Exponent is capped so mul_f64 stays finite.
                let exp = attempt.saturating_sub(1).min(16) as i32;
                self.interval.mul_f64(mult.powi(exp)).min(self.max_interval)
            }
        }
    }
}

/// Phases of one compaction job, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CompactionPhase {
    Acquire,
    Resolve,
    Snapshot,
    Export,
    Validate,
    Destroy,
    Reimport,
    Release,
}

impl CompactionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompactionPhase::Acquire => "acquire",
            CompactionPhase::Resolve => "resolve",
            CompactionPhase::Snapshot => "snapshot",
            CompactionPhase::Export => "export",
            CompactionPhase::Validate => "validate",
            CompactionPhase::Destroy => "destroy",
            CompactionPhase::Reimport => "reimport",
            CompactionPhase::Release => "release",
        }
    }

    /// True for phases past the point of no return.
    pub fn is_destructive(&self) -> bool {
        matches!(self, CompactionPhase::Destroy | CompactionPhase::Reimport)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StartReport {
    /// False when the server was already reachable and no launch happened.
    pub launched: bool,
    pub handle: ManagedProcessHandle,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StopReport {
    pub matched: usize,
    pub terminated: usize,
    /// Endpoint still answered after termination. Logged as a warning by the
    /// supervisor; not an error.
    pub still_reachable: bool,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct StatusReport {
    pub process_found: bool,
    pub endpoint_reachable: bool,
}

impl StatusReport {
    pub fn is_running(&self) -> bool {
        self.process_found || self.endpoint_reachable
    }
}

/// What a successful compaction run did, written alongside the snapshot.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CompactionSummary {
    pub database_base: PathBuf,
    pub working_dir: PathBuf,
    pub script_path: PathBuf,
    pub script_lines: usize,
    pub files_snapshotted: usize,
    pub files_removed: usize,
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_keeps_interval() {
        let p = RetryPolicy::fixed(5, Duration::from_secs(2));
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(5), Duration::from_secs(2));
    }

    #[test]
    fn backoff_policy_caps_at_max_interval() {
        let p = RetryPolicy::fixed(10, Duration::from_millis(200))
            .with_backoff(2.0, Duration::from_secs(1));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(400));
        assert_eq!(p.delay_for(3), Duration::from_millis(800));
        assert_eq!(p.delay_for(4), Duration::from_secs(1));
        assert_eq!(p.delay_for(10), Duration::from_secs(1));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let p = RetryPolicy::fixed(0, Duration::from_secs(1));
        assert_eq!(p.max_attempts, 1);
    }

    #[test]
    fn status_is_running_when_either_signal_holds() {
        let by_process = StatusReport {
            process_found: true,
            endpoint_reachable: false,
        };
        let by_endpoint = StatusReport {
            process_found: false,
            endpoint_reachable: true,
        };
        let neither = StatusReport {
            process_found: false,
            endpoint_reachable: false,
        };
        assert!(by_process.is_running());
        assert!(by_endpoint.is_running());
        assert!(!neither.is_running());
    }

    #[test]
    fn launched_handle_starts_in_starting_state() {
        let h = ManagedProcessHandle::launched(Some(42));
        assert_eq!(h.state, ServerState::Starting);
        assert_eq!(h.pid, Some(42));
        assert!(h.launched_at_ms > 0);
    }
}
