//! Work items (action items and blockers) and reconciliation patch types.
//!
//! Identity rules: `id` is the store's primary key and `external_id` is the
//! stable join key minted by the persistence coordinator. Neither is ever
//! invented by a matching step, and drafts carry no identifier at all.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Kind of work record extracted from a meeting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemKind {
    Action,
    Blocker,
}

impl WorkItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Action => "ACTION",
            Self::Blocker => "BLOCKER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTION" => Some(Self::Action),
            "BLOCKER" => Some(Self::Blocker),
            _ => None,
        }
    }
}

/// Lifecycle status of a persisted work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Open,
    InProgress,
    Done,
}

impl WorkItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(Self::Open),
            "IN_PROGRESS" => Some(Self::InProgress),
            "DONE" => Some(Self::Done),
            _ => None,
        }
    }
}

impl Default for WorkItemStatus {
    fn default() -> Self {
        Self::Open
    }
}

/// A persisted work item.
///
/// Invariant: at most one row per `(meeting_id, external_id)`. Both
/// identifiers are assigned once at creation and never change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Store-assigned primary key
    pub id: i64,

    /// Caller-minted stable identifier, the projection join key
    pub external_id: String,

    pub meeting_id: String,
    pub kind: WorkItemKind,
    pub title: String,
    pub summary: String,
    pub owner: Option<String>,
    pub due_date: Option<NaiveDate>,

    /// Extraction confidence in [0, 1]
    pub confidence: f64,

    /// Provenance quote from the transcript
    pub source_span: String,

    pub status: WorkItemStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A candidate proposed by the extraction capability.
///
/// Candidates carry no identifier; identity is owned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    pub summary: String,
    pub owner: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub confidence: f64,
    pub source_span: String,
}

/// Output of one extraction call: candidates plus an aggregate confidence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionBatch {
    pub candidates: Vec<Candidate>,

    /// Aggregate confidence for the whole batch
    pub confidence: f64,

    #[serde(default)]
    pub warnings: Vec<String>,
}

/// A new work item to create. Never carries a persisted or external id;
/// the persistence coordinator mints the external identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemDraft {
    pub kind: WorkItemKind,
    pub title: String,
    pub summary: String,
    pub owner: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub confidence: f64,
    pub source_span: String,
}

/// A merge instruction against one persisted work item.
///
/// Every field except `id` is optional; present fields are merged, never
/// used as wholesale replacements. `title` is intentionally absent: it is
/// immutable after creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkItemPatch {
    /// Persisted store id (mandatory)
    pub id: i64,

    /// Fragment appended to the existing summary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_fragment: Option<String>,

    /// Owner, applied only while the persisted owner is null
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Due date, applied only when newly resolved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,

    /// Confidence, applied only if higher than the persisted value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    /// Provenance note, passed through unchanged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
}

impl WorkItemPatch {
    /// True if the patch carries no merge instruction beyond its id
    pub fn is_noop(&self) -> bool {
        self.summary_fragment.is_none()
            && self.owner.is_none()
            && self.due_date.is_none()
            && self.confidence.is_none()
    }
}

/// The deterministic output of one reconciliation batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationPatch {
    pub add: Vec<WorkItemDraft>,
    pub update: Vec<WorkItemPatch>,
    pub batch_confidence: f64,
    pub warnings: Vec<String>,
}

impl ReconciliationPatch {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.update.is_empty()
    }
}
