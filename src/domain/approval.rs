//! Approval interruptions and the human-editable email draft overlay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of an approval interruption.
///
/// `Pending` is the only non-terminal state; transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A paused side-effecting action awaiting a human decision.
///
/// Created once per drafted message. `subject`/`body`/`recipient` here are
/// the machine-drafted originals; human edits live on the [`EmailDraft`]
/// overlay, never on this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalInterruption {
    pub id: String,
    pub meeting_id: String,

    /// Name of the gated tool (e.g. "send_followup_email")
    pub tool_name: String,

    pub recipient: Option<String>,
    pub subject: String,
    pub body: String,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
}

impl ApprovalInterruption {
    /// Whether the expiry window has elapsed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Machine-drafted email content plus the independent human-edited overlay.
///
/// The effective payload is always "edited-if-present else original",
/// computed at send time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailDraft {
    pub meeting_id: String,
    pub interruption_id: String,
    pub recipient_original: Option<String>,
    pub recipient_confirmed: Option<String>,
    pub subject_original: String,
    pub subject_edited: Option<String>,
    pub body_original: String,
    pub body_edited: Option<String>,
}

impl EmailDraft {
    /// Resolve the effective payload, edited overlay winning field-by-field.
    ///
    /// Returns `None` if no recipient has been drafted or confirmed.
    pub fn effective_payload(&self) -> Option<EmailPayload> {
        let recipient = self
            .recipient_confirmed
            .clone()
            .or_else(|| self.recipient_original.clone())?;

        Some(EmailPayload {
            recipient,
            subject: self
                .subject_edited
                .clone()
                .unwrap_or_else(|| self.subject_original.clone()),
            body: self
                .body_edited
                .clone()
                .unwrap_or_else(|| self.body_original.clone()),
        })
    }
}

/// The resolved payload handed to the send capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailPayload {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// A follow-up message proposed by the drafting capability, before any
/// approval record exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpDraft {
    pub recipient: Option<String>,
    pub subject: String,
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> EmailDraft {
        EmailDraft {
            meeting_id: "m1".to_string(),
            interruption_id: "i1".to_string(),
            recipient_original: Some("client@example.com".to_string()),
            recipient_confirmed: None,
            subject_original: "Follow-up".to_string(),
            subject_edited: None,
            body_original: "A".to_string(),
            body_edited: None,
        }
    }

    #[test]
    fn test_effective_payload_prefers_edits() {
        let mut d = draft();
        d.body_edited = Some("B".to_string());

        let payload = d.effective_payload().unwrap();
        assert_eq!(payload.body, "B");
        assert_eq!(payload.subject, "Follow-up");
    }

    #[test]
    fn test_effective_payload_confirmed_recipient_wins() {
        let mut d = draft();
        d.recipient_confirmed = Some("ceo@example.com".to_string());

        let payload = d.effective_payload().unwrap();
        assert_eq!(payload.recipient, "ceo@example.com");
    }

    #[test]
    fn test_effective_payload_requires_recipient() {
        let mut d = draft();
        d.recipient_original = None;
        assert!(d.effective_payload().is_none());
    }

    #[test]
    fn test_status_terminality() {
        assert!(!ApprovalStatus::Pending.is_terminal());
        assert!(ApprovalStatus::Approved.is_terminal());
        assert!(ApprovalStatus::Rejected.is_terminal());
        assert!(ApprovalStatus::Expired.is_terminal());
    }
}
