//! HTTP client for the projection sync boundary.
//!
//! Mirrors added/updated work items into an external tracking surface,
//! keyed by external identifier. Per-row failures come back as error
//! strings in the report; the caller logs them as warnings and moves on.

use async_trait::async_trait;
use serde::Serialize;

use super::{CapabilityError, ProjectionReport, ProjectionRow, ProjectionSink};

const CAPABILITY: &str = "projection";

/// Projection service client
pub struct HttpProjectionSink {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct SyncRequest<'a> {
    add: &'a [ProjectionRow],
    update: &'a [ProjectionRow],
}

impl HttpProjectionSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/rows", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ProjectionSink for HttpProjectionSink {
    async fn sync(
        &self,
        adds: &[ProjectionRow],
        updates: &[ProjectionRow],
    ) -> Result<ProjectionReport, CapabilityError> {
        if adds.is_empty() && updates.is_empty() {
            return Ok(ProjectionReport::default());
        }

        let response = self
            .client
            .post(self.endpoint())
            .json(&SyncRequest {
                add: adds,
                update: updates,
            })
            .send()
            .await
            .map_err(|source| CapabilityError::Transport {
                capability: CAPABILITY,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CapabilityError::Status {
                capability: CAPABILITY,
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| CapabilityError::Transport {
                capability: CAPABILITY,
                source,
            })?;

        serde_json::from_str(&body).map_err(|e| CapabilityError::InvalidResponse {
            capability: CAPABILITY,
            detail: e.to_string(),
        })
    }
}
