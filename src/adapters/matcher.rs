//! HTTP client for the semantic intent matcher.
//!
//! The matcher compares one candidate's intent (title + summary) against
//! the persisted set and returns at most one persisted id. The returned id
//! is validated against the set that was sent: the matcher may select an
//! identity, never invent one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Candidate, WorkItem};

use super::{CapabilityError, IntentMatcher};

const CAPABILITY: &str = "matcher";

/// Intent matcher service client
pub struct HttpIntentMatcher {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct MatchRequest<'a> {
    candidate: CandidateIntent<'a>,
    items: Vec<PersistedIntent<'a>>,
}

/// Only intent-bearing fields cross the boundary; owner and position are
/// deliberately withheld so they cannot be used as matching proxies.
#[derive(Serialize)]
struct CandidateIntent<'a> {
    title: &'a str,
    summary: &'a str,
}

#[derive(Serialize)]
struct PersistedIntent<'a> {
    id: i64,
    title: &'a str,
    summary: &'a str,
}

#[derive(Deserialize)]
struct MatchResponse {
    matched_id: Option<i64>,
}

impl HttpIntentMatcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/match", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl IntentMatcher for HttpIntentMatcher {
    async fn find_match(
        &self,
        candidate: &Candidate,
        persisted: &[WorkItem],
    ) -> Result<Option<i64>, CapabilityError> {
        if persisted.is_empty() {
            return Ok(None);
        }

        let request = MatchRequest {
            candidate: CandidateIntent {
                title: &candidate.title,
                summary: &candidate.summary,
            },
            items: persisted
                .iter()
                .map(|item| PersistedIntent {
                    id: item.id,
                    title: &item.title,
                    summary: &item.summary,
                })
                .collect(),
        };

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
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

        let parsed: MatchResponse =
            serde_json::from_str(&body).map_err(|e| CapabilityError::InvalidResponse {
                capability: CAPABILITY,
                detail: e.to_string(),
            })?;

        // An id outside the snapshot is an invented identity
        if let Some(id) = parsed.matched_id {
            if !persisted.iter().any(|item| item.id == id) {
                return Err(CapabilityError::InvalidResponse {
                    capability: CAPABILITY,
                    detail: format!("matched id {} not in the persisted set", id),
                });
            }
        }

        Ok(parsed.matched_id)
    }
}
