//! Server lifecycle supervision.
//!
//! The supervisor never owns the server process. Starts launch a detached
//! child and then only observe the health endpoint; stops re-discover the
//! process by command-line signature, whoever launched it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use gw_core::{
    ManagedProcessHandle, ServerState, StartError, StartReport, StatusReport, StopError,
    StopReport,
};

use crate::artifact;
use crate::config::OperatorConfig;
use crate::health::HealthProbe;
use crate::platform::{self, ProcessBackend, SignalOutcome};
use crate::progress::{NoopProgress, ProgressReporter};
use crate::support::{format_error_chain, tail_lines};

const SERVER_LOG_TAIL_LINES: usize = 40;
const FORCE_KILL_WAIT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Stop any matching process first, then launch fresh.
    pub force_restart: bool,
    /// Re-download the server jar even when a cached copy exists.
    pub force_reacquire_artifact: bool,
}

#[derive(Clone)]
pub struct ProcessSupervisor {
    config: OperatorConfig,
    probe: HealthProbe,
    backend: Arc<dyn ProcessBackend>,
    progress: Arc<dyn ProgressReporter>,
}

impl ProcessSupervisor {
    pub fn new(config: OperatorConfig) -> anyhow::Result<Self> {
        let probe = HealthProbe::new(config.endpoint.clone(), config.probe_timeout)?;
        Ok(Self {
            config,
            probe,
            backend: platform::detect(),
            progress: Arc::new(NoopProgress),
        })
    }

    pub fn with_backend(mut self, backend: Arc<dyn ProcessBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Bring the server up. Already-reachable deployments are left alone
    /// unless `force_restart` asks for a stop-then-start cycle.
    pub async fn start(&self, options: StartOptions) -> Result<StartReport, StartError> {
        if options.force_restart {
            self.progress
                .note("Stopping any running instance before restart...");
            self.stop()
                .await
                .map_err(|e| StartError::Internal(e.to_string()))?;
        } else {
            let check = self.probe.poll_once().await;
            if check.reachable {
                info!(endpoint = %self.probe.endpoint(), "server already running");
                self.progress.note("Server is already up and running.");
                let mut handle = ManagedProcessHandle::unknown();
                handle.state = ServerState::Running;
                return Ok(StartReport {
                    launched: false,
                    handle,
                });
            }
        }

        let jar = artifact::ensure_managed_jar(
            &self.config,
            options.force_reacquire_artifact,
            self.progress.as_ref(),
        )
        .await
        .map_err(|e| StartError::ArtifactMissing {
            path: self.config.jar_path.clone(),
            reason: format_error_chain(&e),
        })?;

        let pid = self.spawn_server(&jar)?;
        let mut handle = ManagedProcessHandle::launched(pid);
        self.progress
            .note(&format!("Starting server at {}...", self.probe.endpoint()));

        let result = self.probe.poll(&self.config.startup_retry).await;
        if result.reachable {
            handle.state = ServerState::Running;
            info!(pid = ?pid, attempts = result.attempt, "server is up");
            self.progress.note("Server is up and running.");
            return Ok(StartReport {
                launched: true,
                handle,
            });
        }

        self.log_server_log_tail().await;
        warn!(
            attempts = result.attempt,
            waited = ?result.elapsed,
            "server never became reachable; the launched process is left to finish or fail on its own"
        );
        Err(StartError::StartupTimeout {
            attempts: result.attempt,
            waited: result.elapsed,
            last_error: result.error,
        })
    }

    fn spawn_server(&self, jar: &Path) -> Result<Option<u32>, StartError> {
        let log_path = &self.config.server_log_path;
        let spawn_err = |reason: String| StartError::Spawn { reason };
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| spawn_err(format!("create log directory {}: {e}", parent.display())))?;
        }
        let log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(|e| spawn_err(format!("open server log {}: {e}", log_path.display())))?;
        let log_err = log
            .try_clone()
            .map_err(|e| spawn_err(format!("clone server log handle: {e}")))?;

        let mut cmd = tokio::process::Command::new(&self.config.java_bin);
        cmd.arg("-jar")
            .arg(jar)
            .current_dir(&self.config.home)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::from(log))
            .stderr(std::process::Stdio::from(log_err));

        let child = cmd.spawn().map_err(|e| {
            spawn_err(format!(
                "spawn {} -jar {}: {e}",
                self.config.java_bin,
                jar.display()
            ))
        })?;
        let pid = child.id();
        info!(
            pid = ?pid,
            jar = %jar.display(),
            log = %log_path.display(),
            "server process launched"
        );
        // The handle is dropped here; the server runs detached and is found
        // again later by its command-line signature.
        drop(child);
        Ok(pid)
    }

    /// Terminate every matching process. Finding none is success.
    pub async fn stop(&self) -> Result<StopReport, StopError> {
        let signature = self.config.process_signature();
        let entries = self
            .backend
            .enumerate(&signature)
            .map_err(|e| StopError::Enumerate {
                reason: format_error_chain(&e),
            })?;

        if entries.is_empty() {
            info!(signature = %signature, "no matching server process; nothing to stop");
            self.progress.note("No running server found.");
            return Ok(StopReport {
                matched: 0,
                terminated: 0,
                still_reachable: false,
            });
        }

        let matched = entries.len();
        let mut terminated = 0_usize;
        for entry in entries {
            debug!(pid = entry.pid, command = %entry.command, "stopping server process");
            self.terminate_with_grace(entry.pid)
                .await
                .map_err(|e| StopError::Terminate {
                    pid: entry.pid,
                    reason: format_error_chain(&e),
                })?;
            terminated += 1;
        }

        let check = self.probe.poll_once().await;
        if check.reachable {
            warn!(
                endpoint = %self.probe.endpoint(),
                "endpoint still responds after stop; another instance may be serving it"
            );
            self.progress
                .note("Warning: the endpoint still responds; another instance may be running elsewhere.");
        } else {
            self.progress.note("Server stopped.");
        }
        Ok(StopReport {
            matched,
            terminated,
            still_reachable: check.reachable,
        })
    }

    async fn terminate_with_grace(&self, pid: u32) -> anyhow::Result<()> {
        if matches!(self.backend.request_stop(pid)?, SignalOutcome::AlreadyGone) {
            return Ok(());
        }

        let start = tokio::time::Instant::now();
        let kill_deadline = start + self.config.term_grace;
        loop {
            if !self.backend.is_alive(pid)? {
                debug!(pid, "process exited after graceful stop request");
                return Ok(());
            }
            if tokio::time::Instant::now() >= kill_deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        // Escalate to a hard kill.
        warn!(pid, grace = ?self.config.term_grace, "process ignored graceful stop, killing");
        if matches!(self.backend.force_kill(pid)?, SignalOutcome::AlreadyGone) {
            return Ok(());
        }
        let hard_deadline = tokio::time::Instant::now() + FORCE_KILL_WAIT;
        while tokio::time::Instant::now() < hard_deadline {
            if !self.backend.is_alive(pid)? {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("process {pid} survived a kill signal")
    }

    /// One read-only snapshot of both liveness signals. Never fails; an
    /// enumeration error degrades to `process_found: false`.
    pub async fn status(&self) -> StatusReport {
        let signature = self.config.process_signature();
        let process_found = match self.backend.enumerate(&signature) {
            Ok(entries) => !entries.is_empty(),
            Err(e) => {
                warn!(
                    error = %format_error_chain(&e),
                    "process enumeration failed during status check"
                );
                false
            }
        };
        let check = self.probe.poll_once().await;
        let report = StatusReport {
            process_found,
            endpoint_reachable: check.reachable,
        };
        info!(
            process_found = report.process_found,
            endpoint_reachable = report.endpoint_reachable,
            "status checked"
        );
        report
    }

    async fn log_server_log_tail(&self) {
        let path = &self.config.server_log_path;
        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                let tail = tail_lines(&text, SERVER_LOG_TAIL_LINES);
                if tail.is_empty() {
                    return;
                }
                warn!(log = %path.display(), "last server log lines:\n{}", tail.join("\n"));
            }
            Err(e) => {
                debug!(log = %path.display(), error = %e, "server log not readable");
            }
        }
    }
}
