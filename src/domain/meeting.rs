//! Meeting lifecycle record.
//!
//! The workflow status is updated by the runner at pipeline start and end;
//! components signal outcomes through return values, never by mutating the
//! meeting record themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Workflow status of a captured meeting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    /// Caption events captured, pipeline not yet run
    Captured,

    /// Pipeline currently executing
    Executing,

    /// Pipeline finished
    Completed,

    /// Pipeline aborted
    Failed,
}

impl MeetingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Captured => "CAPTURED",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CAPTURED" => Some(Self::Captured),
            "EXECUTING" => Some(Self::Executing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl Default for MeetingStatus {
    fn default() -> Self {
        Self::Captured
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    pub title: Option<String>,
    pub status: MeetingStatus,
    pub failure_reason: Option<String>,
    pub started_at: DateTime<Utc>,
}
