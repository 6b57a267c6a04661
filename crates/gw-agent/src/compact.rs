//! Database compaction pipeline.
//!
//! Rewrites the embedded database through an export/reimport cycle to
//! reclaim space. Phases run strictly in order; everything before Destroy
//! leaves the original database untouched, and from Destroy onward the
//! working-directory snapshot is the only recovery path.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error, info};

use gw_core::{CompactionError, CompactionPhase, CompactionSummary};

use crate::config::OperatorConfig;
use crate::disk;
use crate::h2::{self, DatabaseArtifactSet};
use crate::locator::DatabaseLocator;
use crate::paths;
use crate::platform::ProcessBackend;
use crate::progress::{NoopProgress, ProgressReporter};
use crate::supervisor::{ProcessSupervisor, StartOptions};
use crate::support::format_error_chain;

const EXPORT_SCRIPT_NAME: &str = "gw_backup.sql";
const SUMMARY_FILE_NAME: &str = "compaction-run.json";

pub struct CompactionPipeline {
    config: OperatorConfig,
    supervisor: ProcessSupervisor,
    locator: DatabaseLocator,
    progress: Arc<dyn ProgressReporter>,
}

impl CompactionPipeline {
    pub fn new(config: OperatorConfig) -> anyhow::Result<Self> {
        let supervisor = ProcessSupervisor::new(config.clone())?;
        let locator = DatabaseLocator::new(
            config.properties_path.clone(),
            config.default_db_base.clone(),
            config.home.clone(),
        );
        Ok(Self {
            config,
            supervisor,
            locator,
            progress: Arc::new(NoopProgress),
        })
    }

    pub fn with_backend(mut self, backend: Arc<dyn ProcessBackend>) -> Self {
        self.supervisor = self.supervisor.with_backend(backend);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.supervisor = self.supervisor.with_progress(progress.clone());
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    /// Run the pipeline to completion. This is the outer boundary: failures
    /// are logged and reported as `false`, never propagated.
    pub async fn run(&self) -> bool {
        self.progress.begin("Compacting the database...");
        match self.try_run().await {
            Ok(summary) => {
                info!(
                    base = %summary.database_base.display(),
                    script_lines = summary.script_lines,
                    files_removed = summary.files_removed,
                    snapshot = %summary.working_dir.display(),
                    "database compaction finished"
                );
                self.progress.finish("Database compaction complete.");
                true
            }
            Err(err) => {
                error!(phase = err.phase().as_str(), error = %err, "database compaction failed");
                if let Some(snapshot) = err.snapshot_location() {
                    self.progress.note(&format!(
                        "Recovery: the pre-compaction snapshot is preserved at {}",
                        snapshot.display()
                    ));
                }
                false
            }
        }
    }

    /// The typed pipeline. Every phase maps its failures onto one
    /// `CompactionError` variant so the abort point is always attributable.
    pub async fn try_run(&self) -> Result<CompactionSummary, CompactionError> {
        self.enter(CompactionPhase::Acquire);
        self.progress.note("Stopping the server before compaction...");
        let stop = self
            .supervisor
            .stop()
            .await
            .map_err(|e| CompactionError::Acquire {
                reason: e.to_string(),
            })?;
        if stop.matched > 0 {
            debug!(terminated = stop.terminated, "server stopped for compaction");
        }

        self.enter(CompactionPhase::Resolve);
        self.progress.note("Locating the database and tooling...");
        let location = self.locator.resolve();
        let source = match DatabaseArtifactSet::capture(&location.base) {
            Ok(set) if !set.is_empty() => set,
            Ok(_) => {
                return Err(CompactionError::DatabaseMissing {
                    base: location.base,
                });
            }
            Err(e) => {
                debug!(error = %format_error_chain(&e), "database directory unreadable");
                return Err(CompactionError::DatabaseMissing {
                    base: location.base,
                });
            }
        };
        info!(base = %source.base().display(), files = source.len(), "database resolved");

        h2::probe_java(&self.config.java_bin)
            .await
            .map_err(|e| CompactionError::ToolUnavailable {
                reason: format_error_chain(&e),
            })?;
        let tool_jar = h2::ensure_tool_jar(&self.config, self.progress.as_ref())
            .await
            .map_err(|e| CompactionError::ToolUnavailable {
                reason: format_error_chain(&e),
            })?;
        let workdir = self
            .resolve_working_dir(&source.directory())
            .map_err(|e| CompactionError::WorkingDir {
                reason: format_error_chain(&e),
            })?;

        self.enter(CompactionPhase::Snapshot);
        self.progress.note(&format!(
            "Backing up database files to {}...",
            workdir.display()
        ));
        let mut snapshotted = 0_usize;
        for file in source.files() {
            let name = file.file_name().ok_or_else(|| CompactionError::Snapshot {
                reason: format!("{} has no file name", file.display()),
            })?;
            copy_and_verify(file, &workdir.join(name))?;
            snapshotted += 1;
        }
        debug!(files = snapshotted, "snapshot complete");

        self.enter(CompactionPhase::Export);
        self.progress.note("Exporting the database copy to SQL...");
        let copy_base = workdir.join(source.base_name());
        let script = workdir.join(EXPORT_SCRIPT_NAME);
        let args = h2::tool_args(
            h2::ToolMode::Export,
            &tool_jar,
            &copy_base,
            &script,
            &self.config.db_username,
            &self.config.db_password,
        );
        h2::run_tool(&self.config.java_bin, &args)
            .await
            .map_err(|e| CompactionError::Export {
                reason: format_error_chain(&e),
            })?;

        self.enter(CompactionPhase::Validate);
        let script_lines =
            h2::validate_export_script(&script).map_err(|e| CompactionError::ExportValidation {
                script: script.clone(),
                reason: format_error_chain(&e),
            })?;
        info!(script = %script.display(), lines = script_lines, "export validated");

        // Point of no return: from here until reimport completes there is
        // no usable database at the original path, only the snapshot.
        self.enter(CompactionPhase::Destroy);
        self.progress.note("Removing the original database files...");
        let mut removed = 0_usize;
        for file in source.files() {
            std::fs::remove_file(file).map_err(|e| CompactionError::Destroy {
                snapshot: workdir.clone(),
                reason: format!("remove {}: {e}", file.display()),
            })?;
            removed += 1;
        }

        self.enter(CompactionPhase::Reimport);
        self.progress
            .note("Rebuilding the database from the exported script...");
        let args = h2::tool_args(
            h2::ToolMode::Import,
            &tool_jar,
            source.base(),
            &script,
            &self.config.db_username,
            &self.config.db_password,
        );
        h2::run_tool(&self.config.java_bin, &args)
            .await
            .map_err(|e| CompactionError::Reimport {
                snapshot: workdir.clone(),
                reason: format_error_chain(&e),
            })?;

        self.enter(CompactionPhase::Release);
        let summary = CompactionSummary {
            database_base: source.base().to_path_buf(),
            working_dir: workdir.clone(),
            script_path: script,
            script_lines,
            files_snapshotted: snapshotted,
            files_removed: removed,
        };
        write_summary(&workdir, &summary);
        self.progress
            .note(&format!("Snapshot preserved at {}.", workdir.display()));

        self.supervisor
            .start(StartOptions::default())
            .await
            .map_err(|e| CompactionError::Release {
                reason: e.to_string(),
            })?;

        Ok(summary)
    }

    fn enter(&self, phase: CompactionPhase) {
        debug!(phase = phase.as_str(), "entering compaction phase");
    }

    fn resolve_working_dir(&self, database_dir: &Path) -> anyhow::Result<PathBuf> {
        let dir = if let Some(dir) = &self.config.working_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create working directory {}", dir.display()))?;
            disk::ensure_min_free_space(dir, self.config.min_free_bytes)?;
            dir.clone()
        } else {
            disk::choose_working_dir(self.config.min_free_bytes, &paths::current_username())?
        };
        // A snapshot into the database's own directory would copy every file
        // onto itself, truncating the original before it is read.
        if same_directory(&dir, database_dir) {
            anyhow::bail!(
                "working directory {} is the database directory itself",
                dir.display()
            );
        }
        Ok(dir)
    }
}

/// Canonical-path directory comparison; falls back to the literal paths
/// when either side cannot be resolved.
fn same_directory(a: &Path, b: &Path) -> bool {
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Copy one database file into the snapshot and confirm the copy is
/// byte-for-byte the same size before anything destructive may follow.
pub(crate) fn copy_and_verify(source: &Path, copy: &Path) -> Result<u64, CompactionError> {
    std::fs::copy(source, copy).map_err(|e| CompactionError::Snapshot {
        reason: format!("copy {} to {}: {e}", source.display(), copy.display()),
    })?;
    verify_copy(source, copy)
}

pub(crate) fn verify_copy(source: &Path, copy: &Path) -> Result<u64, CompactionError> {
    let source_len = file_len(source)?;
    let copy_len = file_len(copy)?;
    if source_len != copy_len {
        return Err(CompactionError::SnapshotMismatch {
            file: source.to_path_buf(),
            source_len,
            copy_len,
        });
    }
    Ok(source_len)
}

fn file_len(path: &Path) -> Result<u64, CompactionError> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| CompactionError::Snapshot {
            reason: format!("stat {}: {e}", path.display()),
        })
}

fn write_summary(workdir: &Path, summary: &CompactionSummary) {
    let path = workdir.join(SUMMARY_FILE_NAME);
    match serde_json::to_vec_pretty(summary) {
        Ok(bytes) => {
            if let Err(e) = std::fs::write(&path, bytes) {
                debug!(path = %path.display(), error = %e, "could not write compaction summary");
            }
        }
        Err(e) => debug!(error = %e, "could not serialize compaction summary"),
    }
}
