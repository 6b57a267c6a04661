use std::process::Command;
use std::sync::Arc;

use anyhow::Context;
use tracing::debug;

/// One process matched by enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    /// Owning uid when the platform exposes one.
    pub uid: Option<u32>,
    pub command: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    /// The process exited before the signal landed. Success, not an error.
    AlreadyGone,
}

/// OS-family process primitives. The supervisor drives the
/// graceful-then-forceful escalation on top of these.
pub trait ProcessBackend: Send + Sync {
    /// Processes whose command line contains `signature`, filtered to the
    /// current user where the platform exposes ownership. Never includes
    /// the operator's own process.
    fn enumerate(&self, signature: &str) -> anyhow::Result<Vec<ProcessEntry>>;

    /// Ask the process to terminate.
    fn request_stop(&self, pid: u32) -> anyhow::Result<SignalOutcome>;

    /// Kill the process outright.
    fn force_kill(&self, pid: u32) -> anyhow::Result<SignalOutcome>;

    fn is_alive(&self, pid: u32) -> anyhow::Result<bool>;
}

/// The single platform-detection call: picks the backend for this host.
pub fn detect() -> Arc<dyn ProcessBackend> {
    if cfg!(windows) {
        debug!("using windows process backend");
        Arc::new(WindowsProcessBackend)
    } else {
        debug!("using unix process backend");
        Arc::new(UnixProcessBackend)
    }
}

/// `ps` enumeration plus SIGTERM/SIGKILL.
pub struct UnixProcessBackend;

impl ProcessBackend for UnixProcessBackend {
    fn enumerate(&self, signature: &str) -> anyhow::Result<Vec<ProcessEntry>> {
        // BSD-style flags work on both Linux and macOS; `=` suppresses
        // headers.
        let out = Command::new("ps")
            .args(["-axo", "pid=,uid=,args="])
            .output()
            .context("run ps")?;
        if !out.status.success() {
            anyhow::bail!("ps exited with {}", out.status);
        }
        let text = String::from_utf8_lossy(&out.stdout);
        Ok(parse_ps_output(
            &text,
            signature,
            current_uid(),
            std::process::id(),
        ))
    }

    fn request_stop(&self, pid: u32) -> anyhow::Result<SignalOutcome> {
        signal_term(pid)
    }

    fn force_kill(&self, pid: u32) -> anyhow::Result<SignalOutcome> {
        signal_kill(pid)
    }

    fn is_alive(&self, pid: u32) -> anyhow::Result<bool> {
        probe_alive(pid)
    }
}

/// `wmic` enumeration plus `taskkill`. `taskkill` without `/f` only reaches
/// GUI message loops, so both stop flavors force-terminate here; the
/// supervisor treats that as the platform's single termination primitive.
///
/// `wmic` exposes no cheap owner column, so matching is by signature only.
pub struct WindowsProcessBackend;

impl ProcessBackend for WindowsProcessBackend {
    fn enumerate(&self, signature: &str) -> anyhow::Result<Vec<ProcessEntry>> {
        let out = Command::new("wmic")
            .args(["process", "get", "CommandLine,ProcessId", "/format:csv"])
            .output()
            .context("run wmic")?;
        if !out.status.success() {
            anyhow::bail!("wmic exited with {}", out.status);
        }
        let text = String::from_utf8_lossy(&out.stdout);
        Ok(parse_wmic_csv(&text, signature, std::process::id()))
    }

    fn request_stop(&self, pid: u32) -> anyhow::Result<SignalOutcome> {
        self.force_kill(pid)
    }

    fn force_kill(&self, pid: u32) -> anyhow::Result<SignalOutcome> {
        let out = Command::new("taskkill")
            .args(["/pid", &pid.to_string(), "/f"])
            .output()
            .context("run taskkill")?;
        if out.status.success() {
            return Ok(SignalOutcome::Delivered);
        }
        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        );
        if text.contains("not found") {
            return Ok(SignalOutcome::AlreadyGone);
        }
        anyhow::bail!("taskkill /pid {pid} failed: {}", text.trim());
    }

    fn is_alive(&self, pid: u32) -> anyhow::Result<bool> {
        let filter = format!("PID eq {pid}");
        let out = Command::new("tasklist")
            .args(["/fi", &filter, "/nh"])
            .output()
            .context("run tasklist")?;
        let text = String::from_utf8_lossy(&out.stdout);
        // tasklist answers "INFO: No tasks are running ..." when nothing
        // matches the filter.
        Ok(!text.contains("No tasks") && text.contains(&pid.to_string()))
    }
}

fn parse_ps_output(
    text: &str,
    signature: &str,
    owner: Option<u32>,
    self_pid: u32,
) -> Vec<ProcessEntry> {
    let mut out = Vec::new();
    for line in text.lines() {
        let mut it = line.split_whitespace();
        let Some(pid) = it.next().and_then(|t| t.parse::<u32>().ok()) else {
            continue;
        };
        let Some(uid) = it.next().and_then(|t| t.parse::<u32>().ok()) else {
            continue;
        };
        let command = it.collect::<Vec<_>>().join(" ");
        if !command.contains(signature) {
            continue;
        }
        if owner.is_some_and(|o| o != uid) {
            continue;
        }
        if pid == self_pid {
            continue;
        }
        out.push(ProcessEntry {
            pid,
            uid: Some(uid),
            command,
        });
    }
    out
}

fn parse_wmic_csv(text: &str, signature: &str, self_pid: u32) -> Vec<ProcessEntry> {
    let mut out = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("Node,") {
            continue;
        }
        // Columns come out alphabetically: Node,CommandLine,ProcessId. Only
        // the last comma is safe to split on; command lines contain commas.
        let Some((rest, pid_str)) = line.rsplit_once(',') else {
            continue;
        };
        let Ok(pid) = pid_str.trim().parse::<u32>() else {
            continue;
        };
        let command = match rest.split_once(',') {
            Some((_node, cmd)) => cmd.trim().to_string(),
            None => continue,
        };
        if !command.contains(signature) {
            continue;
        }
        if pid == self_pid {
            continue;
        }
        out.push(ProcessEntry {
            pid,
            uid: None,
            command,
        });
    }
    out
}

#[cfg(unix)]
fn current_uid() -> Option<u32> {
    Some(unsafe { libc::getuid() } as u32)
}

#[cfg(not(unix))]
fn current_uid() -> Option<u32> {
    None
}

#[cfg(unix)]
fn send_signal(pid: u32, sig: libc::c_int) -> anyhow::Result<SignalOutcome> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
    if rc == 0 {
        return Ok(SignalOutcome::Delivered);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(SignalOutcome::AlreadyGone);
    }
    Err(anyhow::Error::from(err).context(format!("kill pid {pid}")))
}

#[cfg(unix)]
fn signal_term(pid: u32) -> anyhow::Result<SignalOutcome> {
    send_signal(pid, libc::SIGTERM)
}

#[cfg(unix)]
fn signal_kill(pid: u32) -> anyhow::Result<SignalOutcome> {
    send_signal(pid, libc::SIGKILL)
}

#[cfg(unix)]
fn probe_alive(pid: u32) -> anyhow::Result<bool> {
    // Signal 0 only checks existence.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(false),
        // Exists but belongs to someone else.
        Some(libc::EPERM) => Ok(true),
        _ => Err(anyhow::Error::from(err).context(format!("probe pid {pid}"))),
    }
}

#[cfg(not(unix))]
fn signal_term(_pid: u32) -> anyhow::Result<SignalOutcome> {
    anyhow::bail!("unix signals are not available on this platform")
}

#[cfg(not(unix))]
fn signal_kill(_pid: u32) -> anyhow::Result<SignalOutcome> {
    anyhow::bail!("unix signals are not available on this platform")
}

#[cfg(not(unix))]
fn probe_alive(_pid: u32) -> anyhow::Result<bool> {
    anyhow::bail!("unix signals are not available on this platform")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ps_lines_filter_by_signature_and_owner() {
        let text = concat!(
            "  501  1000 /usr/lib/systemd --user\n",
            " 1234  1000 java -jar /home/gw/geoweaver.jar\n",
            " 1300  1001 java -jar /home/other/geoweaver.jar\n",
            "garbage line without numbers\n",
        );
        let got = parse_ps_output(text, "geoweaver.jar", Some(1000), 99999);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].pid, 1234);
        assert_eq!(got[0].uid, Some(1000));
        assert!(got[0].command.contains("java -jar"));
    }

    #[test]
    fn ps_lines_skip_the_operator_itself() {
        let text = " 4242  1000 gw-agent supervising geoweaver.jar\n";
        let got = parse_ps_output(text, "geoweaver.jar", Some(1000), 4242);
        assert!(got.is_empty());
    }

    #[test]
    fn ps_owner_filter_is_skipped_when_unknown() {
        let text = " 1234  1000 java -jar geoweaver.jar\n";
        let got = parse_ps_output(text, "geoweaver.jar", None, 1);
        assert_eq!(got.len(), 1);
    }

    #[test]
    fn wmic_csv_splits_on_the_final_comma() {
        let text = concat!(
            "\r\n",
            "Node,CommandLine,ProcessId\r\n",
            "DESKTOP-1,,0\r\n",
            "DESKTOP-1,java -jar C:\\Users\\gw\\geoweaver.jar,4242\r\n",
            "DESKTOP-1,cmd /c echo a, b and geoweaver.jar,77\r\n",
        );
        let got = parse_wmic_csv(text, "geoweaver.jar", 1);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].pid, 4242);
        assert_eq!(got[0].uid, None);
        // Commas inside the command line survive the split.
        assert_eq!(got[1].pid, 77);
        assert!(got[1].command.contains("echo a, b"));
    }
}
