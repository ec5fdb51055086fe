//! HTTP client for the email send capability.
//!
//! Send is not idempotent by identifier: every call can deliver a message.
//! The approval workflow is the only caller and gates each call behind a
//! fresh PENDING status check.

use async_trait::async_trait;

use crate::domain::EmailPayload;

use super::{CapabilityError, EmailSender, SendOutcome};

const CAPABILITY: &str = "email";

/// Email transport client
pub struct HttpEmailSender {
    base_url: String,
    client: reqwest::Client,
}

impl HttpEmailSender {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/send", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmailSender for HttpEmailSender {
    async fn send(&self, payload: &EmailPayload) -> Result<SendOutcome, CapabilityError> {
        let response = self
            .client
            .post(self.endpoint())
            .json(payload)
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
