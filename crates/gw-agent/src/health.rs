use std::time::Duration;

use gw_core::{HealthCheckResult, RetryPolicy};
use tracing::debug;

use crate::support::error_chain_string;

/// Liveness probe against the managed server's HTTP endpoint.
///
/// Any HTTP response counts as reachable; the server answers its root with a
/// redirect, so a 302 is as good a liveness signal as a 200. Redirects are
/// not followed.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
    endpoint: String,
}

impl HealthProbe {
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// One request, no retry. Used by `status`.
    pub async fn poll_once(&self) -> HealthCheckResult {
        self.attempt(1, tokio::time::Instant::now()).await
    }

    /// Retried probe: at most `policy.max_attempts` requests, sleeping
    /// `policy.delay_for(attempt)` between failed attempts. Returns the
    /// first reachable result, or the last attempt's result with its error
    /// attached once the budget is exhausted.
    pub async fn poll(&self, policy: &RetryPolicy) -> HealthCheckResult {
        let first = tokio::time::Instant::now();
        let mut last = None;
        for attempt in 1..=policy.max_attempts {
            let result = self.attempt(attempt, first).await;
            if result.reachable {
                return result;
            }
            debug!(
                attempt,
                max_attempts = policy.max_attempts,
                error = result.error.as_deref().unwrap_or("none"),
                "endpoint not reachable yet"
            );
            last = Some(result);
            if attempt < policy.max_attempts {
                tokio::time::sleep(policy.delay_for(attempt)).await;
            }
        }
        // max_attempts is clamped to at least 1, so the loop ran.
        last.unwrap_or_else(|| HealthCheckResult {
            reachable: false,
            http_status: None,
            error: Some("no probe attempts were made".to_string()),
            attempt: 0,
            elapsed: first.elapsed(),
        })
    }

    async fn attempt(&self, attempt: u32, first: tokio::time::Instant) -> HealthCheckResult {
        match self.client.get(&self.endpoint).send().await {
            Ok(resp) => HealthCheckResult {
                reachable: true,
                http_status: Some(resp.status().as_u16()),
                error: None,
                attempt,
                elapsed: first.elapsed(),
            },
            Err(err) => HealthCheckResult {
                reachable: false,
                http_status: None,
                error: Some(error_chain_string(&err)),
                attempt,
                elapsed: first.elapsed(),
            },
        }
    }
}
