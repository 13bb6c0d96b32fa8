//! Backend Health Checks
//!
//! Polls the backend's liveness endpoint until it answers 200 or the attempt
//! budget runs out, publishing each attempt through the status channel.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;

use super::status::{BackendStatus, StatusChannel};

/// Liveness endpoint exposed by the backend.
pub const PING_PATH: &str = "/ping";

/// Result of a single liveness request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    /// The backend answered with something other than 200.
    Unhealthy(u16),
    /// Connection refused, reset, or timed out.
    Unreachable(String),
}

impl ProbeOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeOutcome::Ready)
    }
}

/// One round of the readiness wait. Only logged.
#[derive(Debug, Clone)]
pub struct ProbeAttempt {
    pub index: u32,
    pub outcome: ProbeOutcome,
}

/// Readiness poller for the backend's `/ping` endpoint.
pub struct HealthProbe {
    url: String,
    /// A client that failed to build leaves every attempt unreachable.
    client: Result<reqwest::Client, String>,
    channel: Arc<StatusChannel>,
}

impl HealthProbe {
    pub fn new(base_url: &str, request_timeout: Duration, channel: Arc<StatusChannel>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                log::warn!("[Probe] HTTP client unavailable: {}", e);
                e.to_string()
            });

        Self {
            url: format!("{}{}", base_url.trim_end_matches('/'), PING_PATH),
            client,
            channel,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Perform a single liveness request.
    pub async fn check(&self) -> ProbeOutcome {
        let client = match &self.client {
            Ok(client) => client,
            Err(reason) => return ProbeOutcome::Unreachable(format!("no HTTP client: {}", reason)),
        };

        match client.get(&self.url).send().await {
            Ok(response) if response.status() == StatusCode::OK => ProbeOutcome::Ready,
            Ok(response) => ProbeOutcome::Unhealthy(response.status().as_u16()),
            Err(e) => ProbeOutcome::Unreachable(e.to_string()),
        }
    }

    /// Poll until the backend answers 200, at most `max_attempts` times.
    ///
    /// Publishes `checking` ("Attempt i/N") before every attempt and sleeps
    /// `interval` after every failed one except the last. Every kind of
    /// failure counts the same. Returns `false` once the attempts are used up;
    /// publishing the final `error` is left to the caller.
    pub async fn wait_until_ready(&self, max_attempts: u32, interval: Duration) -> bool {
        for index in 1..=max_attempts {
            self.channel
                .publish(BackendStatus::checking(index, max_attempts));

            let attempt = ProbeAttempt {
                index,
                outcome: self.check().await,
            };

            if attempt.outcome.is_ready() {
                log::info!("[Probe] Backend ready after {} attempt(s)", attempt.index);
                return true;
            }

            log::debug!("[Probe] Attempt {}/{}: {:?}", attempt.index, max_attempts, attempt.outcome);

            if index < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        log::warn!("[Probe] {} did not respond after {} attempts", self.url, max_attempts);
        false
    }
}
