//! HTTP client for the extraction capability.
//!
//! Talks to an extraction service over JSON. The service is a black box
//! (typically an LLM behind an API); every response is validated against
//! the boundary contract before it reaches the reconciliation engine.

use chrono::{DateTime, Utc};
use serde::Serialize;

use async_trait::async_trait;

use crate::domain::{ExtractionBatch, FollowUpDraft, WorkItemKind};

use super::{CapabilityError, Extractor, RouteDecision};

const CAPABILITY: &str = "extractor";

/// Extraction service client
pub struct HttpExtractor {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct RouteRequest<'a> {
    transcript: &'a str,
}

#[derive(Serialize)]
struct ExtractRequest<'a> {
    kind: WorkItemKind,
    transcript: &'a str,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
}

#[derive(Serialize)]
struct DraftRequest<'a> {
    transcript: &'a str,
    intent: &'a str,
}

impl HttpExtractor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post_json<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<String, CapabilityError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .json(body)
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

        response
            .text()
            .await
            .map_err(|source| CapabilityError::Transport {
                capability: CAPABILITY,
                source,
            })
    }
}

/// Check an extraction batch against the boundary contract.
///
/// Upstream may claim it already filtered by confidence; that claim is not
/// trusted, so only structural validity is checked here. The engine applies
/// the confidence floor itself.
fn validate_batch(batch: &ExtractionBatch) -> Result<(), CapabilityError> {
    let invalid = |detail: String| CapabilityError::InvalidResponse {
        capability: CAPABILITY,
        detail,
    };

    if !(0.0..=1.0).contains(&batch.confidence) {
        return Err(invalid(format!(
            "aggregate confidence {} out of range",
            batch.confidence
        )));
    }

    for (idx, candidate) in batch.candidates.iter().enumerate() {
        if candidate.title.trim().is_empty() {
            return Err(invalid(format!("candidate {} has an empty title", idx)));
        }
        if !(0.0..=1.0).contains(&candidate.confidence) {
            return Err(invalid(format!(
                "candidate {} confidence {} out of range",
                idx, candidate.confidence
            )));
        }
    }

    Ok(())
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn route(&self, transcript: &str) -> Result<RouteDecision, CapabilityError> {
        let body = self.post_json("route", &RouteRequest { transcript }).await?;

        serde_json::from_str(&body).map_err(|e| CapabilityError::InvalidResponse {
            capability: CAPABILITY,
            detail: format!("route decision: {}", e),
        })
    }

    async fn extract(
        &self,
        kind: WorkItemKind,
        transcript: &str,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<ExtractionBatch, CapabilityError> {
        let request = ExtractRequest {
            kind,
            transcript,
            window_start: window.0,
            window_end: window.1,
        };
        let body = self.post_json("extract", &request).await?;

        let batch: ExtractionBatch =
            serde_json::from_str(&body).map_err(|e| CapabilityError::InvalidResponse {
                capability: CAPABILITY,
                detail: format!("extraction batch: {}", e),
            })?;

        validate_batch(&batch)?;
        Ok(batch)
    }

    async fn draft_follow_up(
        &self,
        transcript: &str,
        intent: &str,
    ) -> Result<FollowUpDraft, CapabilityError> {
        let body = self
            .post_json("draft", &DraftRequest { transcript, intent })
            .await?;

        let draft: FollowUpDraft =
            serde_json::from_str(&body).map_err(|e| CapabilityError::InvalidResponse {
                capability: CAPABILITY,
                detail: format!("follow-up draft: {}", e),
            })?;

        if draft.subject.trim().is_empty() || draft.body.trim().is_empty() {
            return Err(CapabilityError::InvalidResponse {
                capability: CAPABILITY,
                detail: "follow-up draft missing subject or body".to_string(),
            });
        }

        Ok(draft)
    }
}
