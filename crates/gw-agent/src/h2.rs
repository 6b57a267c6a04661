//! H2 database tooling.
//!
//! The embedded database is only ever touched through the engine's own
//! command-line tools (`org.h2.tools.Script` to export, `RunScript` to
//! import), driven out-of-process against an exact-version tool jar.

use std::path::{Path, PathBuf};

use anyhow::Context;
use sha1::Digest;
use tracing::{debug, info, warn};

use crate::artifact::{download_to_path, http_client};
use crate::config::OperatorConfig;
use crate::progress::ProgressReporter;
use crate::support::tail_lines;

/// An export with fewer lines than this is treated as a failed dump.
pub(crate) const MIN_EXPORT_SCRIPT_LINES: usize = 10;

const TOOL_OUTPUT_TAIL_LINES: usize = 20;

/// The on-disk files making up one database, named `<base>*` next to the
/// base path. The engine fragments a database into `.mv.db`, `.trace.db`
/// and lock files that all have to move together.
#[derive(Debug, Clone)]
pub struct DatabaseArtifactSet {
    base: PathBuf,
    files: Vec<PathBuf>,
}

fn directory_of(base: &Path) -> PathBuf {
    base.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl DatabaseArtifactSet {
    /// Enumerate the files currently backing the database at `base`.
    pub fn capture(base: &Path) -> anyhow::Result<Self> {
        let parent = directory_of(base);
        let prefix = base
            .file_name()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .with_context(|| format!("database base {} has no file name", base.display()))?;

        let mut files = Vec::new();
        let entries = std::fs::read_dir(&parent)
            .with_context(|| format!("read database directory {}", parent.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|s| s.to_str())
                && name.starts_with(&prefix)
            {
                files.push(path);
            }
        }
        files.sort();
        Ok(Self {
            base: base.to_path_buf(),
            files,
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory holding the database files.
    pub fn directory(&self) -> PathBuf {
        directory_of(&self.base)
    }

    pub fn base_name(&self) -> &str {
        // capture() rejected bases without a file name.
        self.base
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ToolMode {
    Export,
    Import,
}

impl ToolMode {
    fn class(self) -> &'static str {
        match self {
            ToolMode::Export => "org.h2.tools.Script",
            ToolMode::Import => "org.h2.tools.RunScript",
        }
    }
}

/// Build the argument list for one tool invocation. The tool jar carries
/// the engine classes; everything else is passed as `-flag value` pairs.
pub(crate) fn tool_args(
    mode: ToolMode,
    tool_jar: &Path,
    database_base: &Path,
    script: &Path,
    username: &str,
    password: &str,
) -> Vec<String> {
    vec![
        "-cp".to_string(),
        tool_jar.display().to_string(),
        mode.class().to_string(),
        "-url".to_string(),
        format!("jdbc:h2:{}", database_base.display()),
        "-user".to_string(),
        username.to_string(),
        "-script".to_string(),
        script.display().to_string(),
        "-password".to_string(),
        password.to_string(),
    ]
}

/// Run the Java runtime once and fail loudly when it is absent. The tools
/// cannot run without it, so this is checked before any state changes.
pub(crate) async fn probe_java(java_bin: &str) -> anyhow::Result<()> {
    let output = tokio::process::Command::new(java_bin)
        .arg("-version")
        .output()
        .await
        .with_context(|| format!("java runtime not found ({java_bin})"))?;
    if !output.status.success() {
        anyhow::bail!(
            "java runtime check failed ({java_bin} exited with {}): {}",
            output.status,
            tail_lines(&String::from_utf8_lossy(&output.stderr), 4).join(" ")
        );
    }
    Ok(())
}

/// Invoke one H2 tool to completion, surfacing the tail of its output on
/// failure.
pub(crate) async fn run_tool(java_bin: &str, args: &[String]) -> anyhow::Result<()> {
    debug!(java = java_bin, ?args, "running database tool");
    let output = tokio::process::Command::new(java_bin)
        .args(args)
        .output()
        .await
        .with_context(|| format!("spawn {java_bin}"))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&output.stdout).into_owned()
        } else {
            stderr.into_owned()
        };
        anyhow::bail!(
            "database tool exited with {}: {}",
            output.status,
            tail_lines(&detail, TOOL_OUTPUT_TAIL_LINES).join("\n")
        );
    }
    Ok(())
}

/// Locate the exact-version H2 tool jar, downloading it from Maven Central
/// when no local copy exists. Search order: working directory, then home.
pub(crate) async fn ensure_tool_jar(
    config: &OperatorConfig,
    progress: &dyn ProgressReporter,
) -> anyhow::Result<PathBuf> {
    let jar_name = config.h2_jar_name();
    if let Ok(cwd) = std::env::current_dir() {
        let local = cwd.join(&jar_name);
        if local.is_file() {
            debug!(path = %local.display(), "using database tool jar from working directory");
            return Ok(local);
        }
    }
    let home_copy = config.home.join(&jar_name);
    if home_copy.is_file() {
        debug!(path = %home_copy.display(), "using database tool jar from home directory");
        return Ok(home_copy);
    }

    let url = config.h2_download_url();
    progress.note(&format!("Downloading {jar_name} from Maven Central..."));
    download_to_path(http_client(), &url, &home_copy)
        .await
        .with_context(|| format!("fetch database tool jar {jar_name}"))?;
    verify_tool_jar(&home_copy, &url).await?;
    info!(path = %home_copy.display(), "database tool jar downloaded");
    Ok(home_copy)
}

/// Check the downloaded jar against the published `.sha1` sidecar. A
/// missing sidecar downgrades to a warning; a mismatch is fatal.
async fn verify_tool_jar(jar: &Path, url: &str) -> anyhow::Result<()> {
    let sidecar_url = format!("{url}.sha1");
    let published = match fetch_published_sha1(&sidecar_url).await {
        Ok(v) => v,
        Err(e) => {
            warn!(url = %sidecar_url, error = %e, "checksum sidecar unavailable, skipping verification");
            return Ok(());
        }
    };

    let got = hash_file(jar).await?;
    if !got.eq_ignore_ascii_case(&published) {
        let _ = tokio::fs::remove_file(jar).await;
        anyhow::bail!(
            "database tool jar sha1 mismatch: expected {published}, got {got} (url={url})"
        );
    }
    Ok(())
}

async fn fetch_published_sha1(url: &str) -> anyhow::Result<String> {
    let body = http_client()
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    // Sidecars are either the bare digest or "digest  filename".
    body.split_whitespace()
        .next()
        .map(str::to_string)
        .context("empty checksum sidecar")
}

async fn hash_file(path: &Path) -> anyhow::Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    Ok(hex::encode(sha1::Sha1::digest(&bytes)))
}

/// Sanity-check an export script before anything destructive happens.
/// Returns the line count on success.
pub(crate) fn validate_export_script(path: &Path) -> anyhow::Result<usize> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("export script {} was not created", path.display()))?;
    if meta.len() == 0 {
        anyhow::bail!("export script {} is empty", path.display());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read export script {}", path.display()))?;
    let lines = text.lines().count();
    if lines < MIN_EXPORT_SCRIPT_LINES {
        anyhow::bail!(
            "export script {} has only {lines} lines (expected at least {MIN_EXPORT_SCRIPT_LINES})",
            path.display()
        );
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_collects_only_prefixed_siblings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("gw.mv.db"), b"data").unwrap();
        std::fs::write(dir.path().join("gw.trace.db"), b"trace").unwrap();
        std::fs::write(dir.path().join("other.mv.db"), b"other").unwrap();

        let set = DatabaseArtifactSet::capture(&dir.path().join("gw")).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.base_name(), "gw");
        assert_eq!(set.directory(), dir.path());
        assert!(set.files().iter().all(|p| {
            p.file_name()
                .and_then(|s| s.to_str())
                .is_some_and(|n| n.starts_with("gw"))
        }));
    }

    #[test]
    fn capture_of_a_missing_directory_errors() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("nope").join("gw");
        assert!(DatabaseArtifactSet::capture(&base).is_err());
    }

    #[test]
    fn capture_with_no_matching_files_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let set = DatabaseArtifactSet::capture(&dir.path().join("gw")).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn tool_args_spell_out_the_full_invocation() {
        let args = tool_args(
            ToolMode::Export,
            Path::new("/opt/h2-2.2.224.jar"),
            Path::new("/data/h2/gw"),
            Path::new("/work/gw_backup.sql"),
            "geoweaver",
            "secret",
        );
        assert_eq!(
            args,
            vec![
                "-cp",
                "/opt/h2-2.2.224.jar",
                "org.h2.tools.Script",
                "-url",
                "jdbc:h2:/data/h2/gw",
                "-user",
                "geoweaver",
                "-script",
                "/work/gw_backup.sql",
                "-password",
                "secret",
            ]
        );
    }

    #[test]
    fn import_mode_uses_the_runscript_class() {
        let args = tool_args(
            ToolMode::Import,
            Path::new("h2.jar"),
            Path::new("/data/h2/gw"),
            Path::new("/work/gw_backup.sql"),
            "geoweaver",
            "secret",
        );
        assert!(args.contains(&"org.h2.tools.RunScript".to_string()));
    }

    #[test]
    fn export_validation_rejects_missing_empty_and_short_scripts() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.sql");
        assert!(validate_export_script(&missing).is_err());

        let empty = dir.path().join("empty.sql");
        std::fs::write(&empty, b"").unwrap();
        assert!(validate_export_script(&empty).is_err());

        let short = dir.path().join("short.sql");
        std::fs::write(&short, "a\nb\nc\n").unwrap();
        let err = validate_export_script(&short).unwrap_err();
        assert!(err.to_string().contains("only 3 lines"));
    }

    #[test]
    fn export_validation_accepts_a_plausible_dump() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("gw_backup.sql");
        let body = (0..12)
            .map(|i| format!("INSERT INTO t VALUES ({i});"))
            .collect::<Vec<_>>()
            .join("\n");
        std::fs::write(&script, body).unwrap();
        assert_eq!(validate_export_script(&script).unwrap(), 12);
    }

    #[tokio::test]
    async fn file_hash_matches_a_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"hello world").unwrap();
        assert_eq!(
            hash_file(&path).await.unwrap(),
            "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed"
        );
    }

    #[tokio::test]
    async fn tool_jar_is_found_in_the_home_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = OperatorConfig::from_env();
        config.home = dir.path().to_path_buf();
        let jar = dir.path().join(config.h2_jar_name());
        std::fs::write(&jar, b"placeholder").unwrap();

        let got = ensure_tool_jar(&config, &crate::progress::NoopProgress)
            .await
            .unwrap();
        assert_eq!(got, jar);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_tool_reports_its_exit_status() {
        let err = run_tool("/bin/false", &[]).await.unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn succeeding_tool_is_quiet() {
        run_tool("/bin/true", &[]).await.unwrap();
    }
}
