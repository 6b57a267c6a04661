//! Error types for supervisor and compaction operations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::CompactionPhase;

/// Failures of `ProcessSupervisor::start`.
#[derive(Debug, Error)]
pub enum StartError {
    /// The server never became reachable within the retry budget. The child
    /// process may still be running and is not killed by the supervisor.
    /// `last_error` holds the final probe failure, when there was one.
    #[error("server not reachable after {attempts} attempts ({waited:?} waited)")]
    StartupTimeout {
        attempts: u32,
        waited: Duration,
        last_error: Option<String>,
    },

    /// The managed jar is absent and could not be downloaded.
    #[error("managed artifact unavailable at {path}: {reason}")]
    ArtifactMissing { path: PathBuf, reason: String },

    #[error("failed to launch managed server: {reason}")]
    Spawn { reason: String },

    #[error("{0}")]
    Internal(String),
}

/// Failures of `ProcessSupervisor::stop`.
///
/// Finding nothing to stop is success, so it has no variant here.
#[derive(Debug, Error)]
pub enum StopError {
    #[error("process enumeration failed: {reason}")]
    Enumerate { reason: String },

    #[error("failed to terminate pid {pid}: {reason}")]
    Terminate { pid: u32, reason: String },
}

/// Failures of the compaction pipeline, tagged by the phase they abort.
#[derive(Debug, Error)]
pub enum CompactionError {
    #[error("could not stop the server before compaction: {reason}")]
    Acquire { reason: String },

    #[error("no database files found at {base}")]
    DatabaseMissing { base: PathBuf },

    #[error("compaction tool unavailable: {reason}")]
    ToolUnavailable { reason: String },

    #[error("no usable working directory: {reason}")]
    WorkingDir { reason: String },

    #[error("snapshot copy failed: {reason}")]
    Snapshot { reason: String },

    #[error("snapshot of {file} is {copy_len} bytes, source is {source_len} bytes")]
    SnapshotMismatch {
        file: PathBuf,
        source_len: u64,
        copy_len: u64,
    },

    #[error("database export failed: {reason}")]
    Export { reason: String },

    #[error("export validation failed for {script}: {reason}")]
    ExportValidation { script: PathBuf, reason: String },

    /// Failure while removing the originals. Manual recovery from the
    /// snapshot is required.
    #[error("failed removing original database files; snapshot kept at {snapshot}: {reason}")]
    Destroy { snapshot: PathBuf, reason: String },

    /// Failure rebuilding the database after the originals were removed.
    /// Manual recovery from the snapshot is required.
    #[error("database reimport failed; snapshot kept at {snapshot}: {reason}")]
    Reimport { snapshot: PathBuf, reason: String },

    #[error("server restart after compaction failed: {reason}")]
    Release { reason: String },
}

impl CompactionError {
    pub fn phase(&self) -> CompactionPhase {
        match self {
            CompactionError::Acquire { .. } => CompactionPhase::Acquire,
            CompactionError::DatabaseMissing { .. }
            | CompactionError::ToolUnavailable { .. }
            | CompactionError::WorkingDir { .. } => CompactionPhase::Resolve,
            CompactionError::Snapshot { .. }
            | CompactionError::SnapshotMismatch { .. } => CompactionPhase::Snapshot,
            CompactionError::Export { .. } => CompactionPhase::Export,
            CompactionError::ExportValidation { .. } => CompactionPhase::Validate,
            CompactionError::Destroy { .. } => CompactionPhase::Destroy,
            CompactionError::Reimport { .. } => CompactionPhase::Reimport,
            CompactionError::Release { .. } => CompactionPhase::Release,
        }
    }

    /// Snapshot directory to point the operator at, when the failure left
    /// the original database unusable.
    pub fn snapshot_location(&self) -> Option<&Path> {
        match self {
            CompactionError::Destroy { snapshot, .. }
            | CompactionError::Reimport { snapshot, .. } => Some(snapshot),
            _ => None,
        }
    }
}
