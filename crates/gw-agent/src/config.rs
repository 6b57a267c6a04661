use std::path::PathBuf;
use std::time::Duration;

use gw_core::RetryPolicy;

use crate::paths;

pub const DEFAULT_PORT: u16 = 8070;
pub const DEFAULT_DB_USERNAME: &str = "geoweaver";
pub const DEFAULT_DB_PASSWORD: &str = "DFKHH9V6ME";
pub const DEFAULT_H2_VERSION: &str = "2.2.224";
pub const GEOWEAVER_JAR_URL: &str =
    "https://github.com/ESIPFed/Geoweaver/releases/download/latest/geoweaver.jar";

const DEFAULT_STARTUP_ATTEMPTS: u64 = 20;
const DEFAULT_STARTUP_INTERVAL_MS: u64 = 2000;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5000;
const DEFAULT_MIN_FREE_SPACE_BYTES: u64 = 1024 * 1024 * 1024; // 1 GiB

pub(crate) fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse::<u64>().ok())
}

pub(crate) fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn port() -> u16 {
    env_u64("GEOWEAVER_PORT")
        .map(|v| v.clamp(1, 65_535))
        .unwrap_or(u64::from(DEFAULT_PORT)) as u16
}

fn startup_retry() -> RetryPolicy {
    let attempts = env_u64("GW_STARTUP_ATTEMPTS")
        .map(|v| v.clamp(1, 120))
        .unwrap_or(DEFAULT_STARTUP_ATTEMPTS) as u32;
    let interval_ms = env_u64("GW_STARTUP_INTERVAL_MS")
        .map(|v| v.clamp(100, 60_000))
        .unwrap_or(DEFAULT_STARTUP_INTERVAL_MS);
    RetryPolicy::fixed(attempts, Duration::from_millis(interval_ms))
}

fn graceful_term_grace() -> Duration {
    Duration::from_secs(
        env_u64("GW_TERM_GRACE_SEC")
            .map(|v| v.clamp(1, 60))
            .unwrap_or(5),
    )
}

fn probe_timeout() -> Duration {
    Duration::from_millis(
        env_u64("GW_PROBE_TIMEOUT_MS")
            .map(|v| v.clamp(500, 60_000))
            .unwrap_or(DEFAULT_PROBE_TIMEOUT_MS),
    )
}

fn min_free_space_bytes() -> u64 {
    env_u64("GW_MIN_FREE_SPACE_BYTES")
        .map(|v| v.clamp(0, 1024_u64 * 1024 * 1024 * 1024))
        .unwrap_or(DEFAULT_MIN_FREE_SPACE_BYTES)
}

/// Everything the supervisor and the compaction pipeline need to know about
/// one managed deployment. Built from the environment; fields are public so
/// callers (and tests) can adjust individual values before wiring things up.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub home: PathBuf,
    pub port: u16,
    /// Full health endpoint, e.g. `http://localhost:8070/Geoweaver`.
    pub endpoint: String,
    pub jar_path: PathBuf,
    pub jar_url: String,
    pub server_log_path: PathBuf,
    pub properties_path: PathBuf,
    pub default_db_base: PathBuf,
    pub java_bin: String,
    pub db_username: String,
    pub db_password: String,
    pub h2_version: String,
    pub startup_retry: RetryPolicy,
    pub term_grace: Duration,
    pub probe_timeout: Duration,
    pub min_free_bytes: u64,
    /// Explicit compaction working directory. When unset, the candidate
    /// directories are scanned for free space instead.
    pub working_dir: Option<PathBuf>,
}

impl OperatorConfig {
    pub fn from_env() -> Self {
        let home = paths::operator_home();
        let port = port();
        Self {
            port,
            endpoint: format!("http://localhost:{port}/Geoweaver"),
            jar_path: paths::managed_jar_path(&home),
            jar_url: GEOWEAVER_JAR_URL.to_string(),
            server_log_path: paths::server_log_path(&home),
            properties_path: paths::properties_path(&home),
            default_db_base: paths::default_db_base(&home),
            java_bin: "java".to_string(),
            db_username: env_string("GEOWEAVER_DB_USERNAME")
                .unwrap_or_else(|| DEFAULT_DB_USERNAME.to_string()),
            db_password: env_string("GEOWEAVER_DB_PASSWORD")
                .unwrap_or_else(|| DEFAULT_DB_PASSWORD.to_string()),
            h2_version: env_string("GEOWEAVER_H2_VERSION")
                .unwrap_or_else(|| DEFAULT_H2_VERSION.to_string()),
            startup_retry: startup_retry(),
            term_grace: graceful_term_grace(),
            probe_timeout: probe_timeout(),
            min_free_bytes: min_free_space_bytes(),
            working_dir: None,
            home,
        }
    }

    /// Command-line substring identifying the managed process.
    pub fn process_signature(&self) -> String {
        self.jar_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "geoweaver.jar".to_string())
    }

    pub fn h2_jar_name(&self) -> String {
        format!("h2-{}.jar", self.h2_version)
    }

    pub fn h2_download_url(&self) -> String {
        format!(
            "https://repo1.maven.org/maven2/com/h2database/h2/{v}/h2-{v}.jar",
            v = self.h2_version
        )
    }
}
