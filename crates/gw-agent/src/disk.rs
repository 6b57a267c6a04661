use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

/// Directory created inside whichever candidate root wins the scan.
pub const WORKING_DIR_NAME: &str = "geoweaver_h2_temp";

#[cfg(unix)]
pub fn free_bytes(p: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c = CString::new(p.as_os_str().as_bytes()).ok()?;
    let mut s: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c.as_ptr(), &mut s) };
    if rc != 0 {
        return None;
    }
    Some(s.f_bsize.saturating_mul(s.f_bavail))
}

#[cfg(not(unix))]
pub fn free_bytes(_p: &Path) -> Option<u64> {
    None
}

pub fn ensure_min_free_space(path: &Path, min: u64) -> anyhow::Result<()> {
    if min == 0 {
        return Ok(());
    }

    let Some(free) = free_bytes(path) else {
        return Ok(());
    };
    if free < min {
        anyhow::bail!(
            "insufficient disk space: free {} bytes < required {} bytes at {} (set GW_MIN_FREE_SPACE_BYTES=0 to disable)",
            free,
            min,
            path.display()
        );
    }
    Ok(())
}

fn candidate_roots(username: &str) -> Vec<PathBuf> {
    let mut roots = vec![std::env::temp_dir()];
    if cfg!(unix) {
        roots.push(PathBuf::from("/scratch").join(username));
        roots.push(PathBuf::from("/tmp").join(username));
    }
    roots
}

/// Pick a working directory with at least `min_free` bytes available,
/// scanning the candidate roots in order. When none qualifies, falls back
/// to a per-user directory under the system temp with a warning. The
/// chosen directory is created.
pub fn choose_working_dir(min_free: u64, username: &str) -> anyhow::Result<PathBuf> {
    choose_working_dir_from(
        &candidate_roots(username),
        min_free,
        &std::env::temp_dir(),
        username,
    )
}

fn choose_working_dir_from(
    roots: &[PathBuf],
    min_free: u64,
    fallback_root: &Path,
    username: &str,
) -> anyhow::Result<PathBuf> {
    for root in roots {
        if !root.is_dir() {
            continue;
        }
        let enough = match free_bytes(root) {
            Some(free) if free >= min_free => true,
            Some(free) => {
                debug!(
                    root = %root.display(),
                    free,
                    required = min_free,
                    "candidate lacks free space"
                );
                false
            }
            // No measurement available on this platform; take the candidate.
            None => true,
        };
        if enough {
            let dir = root.join(WORKING_DIR_NAME);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create working dir {}", dir.display()))?;
            debug!(dir = %dir.display(), "selected compaction working directory");
            return Ok(dir);
        }
    }

    let dir = fallback_root.join(format!("{WORKING_DIR_NAME}_{username}"));
    warn!(
        dir = %dir.display(),
        required = min_free,
        "no candidate directory had enough free space; falling back to the system temp directory"
    );
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create working dir {}", dir.display()))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn temp_dir_reports_free_space() {
        let free = free_bytes(&std::env::temp_dir());
        assert!(free.is_some());
        assert!(free.unwrap() > 0);
    }

    #[test]
    fn first_candidate_wins_when_space_is_unconstrained() {
        let root = tempfile::tempdir().unwrap();
        let fallback = tempfile::tempdir().unwrap();
        let dir = choose_working_dir_from(
            &[root.path().to_path_buf()],
            0,
            fallback.path(),
            "gwtest",
        )
        .unwrap();
        assert_eq!(dir, root.path().join(WORKING_DIR_NAME));
        assert!(dir.is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn impossible_threshold_falls_back_to_suffixed_temp_dir() {
        let root = tempfile::tempdir().unwrap();
        let fallback = tempfile::tempdir().unwrap();
        let dir = choose_working_dir_from(
            &[root.path().to_path_buf()],
            u64::MAX,
            fallback.path(),
            "gwtest",
        )
        .unwrap();
        assert_eq!(
            dir,
            fallback.path().join(format!("{WORKING_DIR_NAME}_gwtest"))
        );
        assert!(dir.is_dir());
    }

    #[test]
    fn missing_roots_are_skipped() {
        let fallback = tempfile::tempdir().unwrap();
        let missing = fallback.path().join("does-not-exist");
        let dir =
            choose_working_dir_from(&[missing], 0, fallback.path(), "gwtest").unwrap();
        assert!(dir.ends_with(format!("{WORKING_DIR_NAME}_gwtest")));
    }

    #[test]
    fn min_free_zero_disables_the_check() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ensure_min_free_space(dir.path(), 0).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn unmeetable_minimum_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = ensure_min_free_space(dir.path(), u64::MAX).unwrap_err();
        assert!(err.to_string().contains("insufficient disk space"));
    }
}
