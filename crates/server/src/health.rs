//! Production [`HealthProbe`] implementation: polls the remote OCR
//! service's health endpoint over `reqwest`, grounded on the same
//! timeout-guarded HTTP check used for the remote vision provider's
//! own availability check.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use scan2doc_core::health::{HealthProbe, ProbeOutcome};

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(rename = "queueInfo")]
    queue_info: Option<QueueInfo>,
}

#[derive(Debug, Deserialize)]
struct QueueInfo {
    depth: u32,
    max_size: u32,
    #[serde(rename = "is_full", default)]
    is_full: bool,
}

pub struct HttpHealthProbe {
    http: reqwest::Client,
    url: String,
}

impl HttpHealthProbe {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build health-probe HTTP client");
        Self {
            http,
            url: format!("{}/health", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> ProbeOutcome {
        let response = match self.http.get(&self.url).send().await {
            Ok(r) => r,
            Err(err) => {
                tracing::debug!(url = %self.url, %err, "OCR health check transport error");
                return ProbeOutcome::Unreachable;
            }
        };

        if !response.status().is_success() {
            tracing::debug!(url = %self.url, status = %response.status(), "OCR health check returned non-2xx");
            return ProbeOutcome::Unreachable;
        }

        let body: HealthResponse = match response.json().await {
            Ok(b) => b,
            Err(err) => {
                tracing::debug!(%err, "OCR health check returned malformed JSON");
                return ProbeOutcome::Unreachable;
            }
        };

        let (depth, max_size, explicit_full) = body
            .queue_info
            .map(|q| (q.depth, q.max_size, q.is_full))
            .unwrap_or((0, 0, false));

        if body.status == "full" || explicit_full {
            ProbeOutcome::Full { queue_depth: depth, max_size }
        } else if body.status == "healthy" {
            ProbeOutcome::Healthy { queue_depth: depth, max_size }
        } else {
            tracing::debug!(status = %body.status, "OCR health check reported an unknown status");
            ProbeOutcome::Unreachable
        }
    }
}
