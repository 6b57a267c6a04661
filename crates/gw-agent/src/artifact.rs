//! Server artifact acquisition.
//!
//! The managed jar is fetched once into the home directory and reused on
//! every later start. `force` re-downloads over a stale copy.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Context;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::OperatorConfig;
use crate::progress::ProgressReporter;

pub(crate) fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .user_agent("gw-agent")
            .timeout(Duration::from_secs(30 * 60))
            .build()
            .expect("failed to build reqwest client")
    })
}

/// Stream a URL to `path` through a `.tmp` sibling so a failed transfer
/// never leaves a half-written artifact behind.
pub(crate) async fn download_to_path(
    client: &reqwest::Client,
    url: &str,
    path: &Path,
) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("download {url}"))?
        .error_for_status()
        .with_context(|| format!("download {url} (status)"))?;
    let expected = resp.content_length();

    let tmp = path.with_extension("tmp");
    let mut f = tokio::fs::File::create(&tmp).await?;
    let mut total: u64 = 0;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        total = total.saturating_add(chunk.len() as u64);
        f.write_all(&chunk).await?;
    }
    f.flush().await.ok();

    if let Some(expected) = expected
        && total != expected
    {
        let _ = tokio::fs::remove_file(&tmp).await;
        anyhow::bail!("download {url} truncated: expected {expected} bytes, got {total}");
    }

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Make sure the managed server jar exists locally, downloading it when it
/// is absent or when `force` discards the cached copy.
pub(crate) async fn ensure_managed_jar(
    config: &OperatorConfig,
    force: bool,
    progress: &dyn ProgressReporter,
) -> anyhow::Result<PathBuf> {
    let jar_path = config.jar_path.clone();
    if jar_path.is_file() && !force {
        return Ok(jar_path);
    }
    if force && jar_path.is_file() {
        info!(path = %jar_path.display(), "re-downloading server jar over cached copy");
    }

    progress.note(&format!(
        "Downloading latest release to {}...",
        jar_path.display()
    ));

    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 1..=3_u32 {
        match download_to_path(http_client(), &config.jar_url, &jar_path).await {
            Ok(()) => {
                info!(path = %jar_path.display(), url = %config.jar_url, "server jar downloaded");
                progress.note("Download complete.");
                return Ok(jar_path);
            }
            Err(e) => {
                warn!(attempt, error = %e, "server jar download failed");
                last_err = Some(e);
                if attempt < 3 {
                    tokio::time::sleep(Duration::from_millis(
                        200_u64.saturating_mul(2_u64.pow(attempt - 1)),
                    ))
                    .await;
                }
            }
        }
    }

    Err(last_err
        .unwrap_or_else(|| anyhow::anyhow!("download failed"))
        .context(format!("download {}", config.jar_url)))
}
