//! Capability boundaries for external collaborators.
//!
//! Each capability (extraction, intent matching, projection sync, email
//! send) is a narrow async trait with an HTTP implementation. The pipeline
//! only ever talks to the traits, so any of them can be swapped for an
//! embedding service, a rules engine, or a hosted model without touching
//! the reconciliation rules.

pub mod email;
pub mod extractor;
pub mod matcher;
pub mod projection;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    Candidate, EmailPayload, ExtractionBatch, FollowUpDraft, WorkItem, WorkItemKind,
    WorkItemStatus,
};

pub use email::HttpEmailSender;
pub use extractor::HttpExtractor;
pub use matcher::HttpIntentMatcher;
pub use projection::HttpProjectionSink;

/// Errors produced at a capability boundary
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// Network-level failure (connect, timeout, broken transfer)
    #[error("{capability} transport error: {source}")]
    Transport {
        capability: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status from the capability service
    #[error("{capability} returned HTTP {status}")]
    Status {
        capability: &'static str,
        status: u16,
    },

    /// Response body did not satisfy the capability contract
    #[error("{capability} returned invalid payload: {detail}")]
    InvalidResponse {
        capability: &'static str,
        detail: String,
    },
}

impl CapabilityError {
    /// Whether a retry can plausibly succeed.
    ///
    /// Transport failures and server-side (5xx) statuses are transient;
    /// contract violations and client errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::InvalidResponse { .. } => false,
        }
    }
}

/// Routing decision for one transcript: which work-item kinds to extract
/// and whether a client follow-up is wanted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub extract_actions: bool,
    pub extract_blockers: bool,

    /// Free-text follow-up intent when the transcript asks for one
    #[serde(default)]
    pub follow_up_intent: Option<String>,

    /// Recipient hint for the follow-up, when stated in the meeting
    #[serde(default)]
    pub recipient: Option<String>,

    /// Sender hint for the follow-up
    #[serde(default)]
    pub sender: Option<String>,
}

impl RouteDecision {
    /// Conservative fallback when routing is unavailable: extract every
    /// kind, draft nothing.
    pub fn all_kinds() -> Self {
        Self {
            extract_actions: true,
            extract_blockers: true,
            follow_up_intent: None,
            recipient: None,
            sender: None,
        }
    }

    pub fn wants_any_extraction(&self) -> bool {
        self.extract_actions || self.extract_blockers
    }
}

/// Extraction capability: routing, candidate extraction, follow-up drafting.
///
/// Non-deterministic by nature; the core treats its output as untrusted and
/// re-applies its own confidence floor.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Decide which kinds to extract and whether a follow-up is wanted
    async fn route(&self, transcript: &str) -> Result<RouteDecision, CapabilityError>;

    /// Extract candidates of one kind from a transcript window
    async fn extract(
        &self,
        kind: WorkItemKind,
        transcript: &str,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<ExtractionBatch, CapabilityError>;

    /// Draft the client-facing follow-up message
    async fn draft_follow_up(
        &self,
        transcript: &str,
        intent: &str,
    ) -> Result<FollowUpDraft, CapabilityError>;
}

/// Semantic intent matcher: one candidate against the full persisted set,
/// returning at most one persisted id. Matching is meaning-based; it must
/// not fall back to exact-string equality, owner identity, or position.
#[async_trait]
pub trait IntentMatcher: Send + Sync {
    async fn find_match(
        &self,
        candidate: &Candidate,
        persisted: &[WorkItem],
    ) -> Result<Option<i64>, CapabilityError>;
}

/// Field mask for a projection row: which fields the row carries.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FieldMask {
    pub title: bool,
    pub summary: bool,
    pub owner: bool,
    pub due_date: bool,
    pub confidence: bool,
    pub status: bool,
}

impl FieldMask {
    /// Every field set, used for adds
    pub fn full() -> Self {
        Self {
            title: true,
            summary: true,
            owner: true,
            due_date: true,
            confidence: true,
            status: true,
        }
    }
}

/// One row mirrored into the external tracking surface, keyed by the
/// stable external identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionRow {
    pub external_id: String,
    pub meeting_id: String,
    pub kind: WorkItemKind,
    pub field_mask: FieldMask,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkItemStatus>,
}

/// Outcome of one projection sync call.
///
/// A non-empty error list is reported to the caller, never escalated:
/// projection failures must not corrupt or fail the source of truth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectionReport {
    pub created: u32,
    pub updated: u32,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Projection sync capability
#[async_trait]
pub trait ProjectionSink: Send + Sync {
    async fn sync(
        &self,
        adds: &[ProjectionRow],
        updates: &[ProjectionRow],
    ) -> Result<ProjectionReport, CapabilityError>;
}

/// Wire status of a send attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Sent,
    Failed,
}

/// Result reported by the send capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub status: SendStatus,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        self.status == SendStatus::Sent
    }
}

/// Email transport capability. Send is not idempotent by identifier, so
/// callers gate it behind the approval state machine.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, payload: &EmailPayload) -> Result<SendOutcome, CapabilityError>;
}
