//! Approval workflow for outbound follow-up email.
//!
//! A drafted message becomes a PENDING interruption with a fixed expiry
//! window. A human may edit the overlay, reject, or approve. Approval
//! re-checks PENDING and the window, computes the effective payload
//! (edited overlay wins field-by-field), invokes the send capability
//! once, and only then transitions to APPROVED. Expiry is lazy: any
//! check that observes an elapsed window performs the transition itself;
//! there is no background sweeper.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{EmailSender, SendOutcome};
use crate::domain::{
    ApprovalInterruption, ApprovalStatus, EmailDraft, EmailPayload, FollowUpDraft,
};
use crate::store::Store;

/// Tool name recorded on follow-up interruptions
pub const FOLLOW_UP_TOOL: &str = "send_followup_email";

/// Default approval window
pub const DEFAULT_APPROVAL_WINDOW_MINUTES: i64 = 30;

/// Errors surfaced by approval actions
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval '{0}' not found")]
    NotFound(String),

    #[error("approval already decided: {status:?}")]
    AlreadyDecided { status: ApprovalStatus },

    #[error("approval window elapsed; the email was not sent")]
    Expired,

    #[error("no recipient drafted or confirmed")]
    RecipientMissing,

    #[error("email draft missing for approval '{0}'")]
    DraftMissing(String),

    #[error("send failed: {reason}; approval stays pending")]
    SendFailed { reason: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Result of a successful approval
#[derive(Debug, Clone)]
pub struct ApprovedSend {
    pub payload: EmailPayload,
    pub outcome: SendOutcome,
}

/// Edit request against the human-editable overlay
#[derive(Debug, Clone, Default)]
pub struct DraftEdit {
    pub recipient: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
}

impl DraftEdit {
    pub fn is_empty(&self) -> bool {
        self.recipient.is_none() && self.subject.is_none() && self.body.is_none()
    }
}

/// The approval state machine over the store.
pub struct ApprovalWorkflow<'a> {
    store: &'a Store,
    window: Duration,
}

impl<'a> ApprovalWorkflow<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            window: Duration::minutes(DEFAULT_APPROVAL_WINDOW_MINUTES),
        }
    }

    pub fn with_window(store: &'a Store, window: Duration) -> Self {
        Self { store, window }
    }

    /// Create the interruption and draft overlay for a proposed follow-up.
    /// The record starts PENDING and expires `window` after creation.
    #[instrument(skip(self, draft), fields(meeting_id = meeting_id))]
    pub fn open(&self, meeting_id: &str, draft: &FollowUpDraft) -> Result<ApprovalInterruption> {
        let now = Utc::now();
        let interruption = ApprovalInterruption {
            id: Uuid::new_v4().to_string(),
            meeting_id: meeting_id.to_string(),
            tool_name: FOLLOW_UP_TOOL.to_string(),
            recipient: draft.recipient.clone(),
            subject: draft.subject.clone(),
            body: draft.body.clone(),
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now + self.window,
            decided_at: None,
            decided_by: None,
        };

        let email_draft = EmailDraft {
            meeting_id: meeting_id.to_string(),
            interruption_id: interruption.id.clone(),
            recipient_original: draft.recipient.clone(),
            recipient_confirmed: None,
            subject_original: draft.subject.clone(),
            subject_edited: None,
            body_original: draft.body.clone(),
            body_edited: None,
        };

        self.store.create_interruption(&interruption, &email_draft)?;
        info!(
            interruption_id = %interruption.id,
            expires_at = %interruption.expires_at,
            "Follow-up awaiting approval"
        );

        Ok(interruption)
    }

    /// Load an interruption, applying lazy expiry as a side effect of the
    /// read. Returns the record only while it is still actionable.
    fn load_pending(&self, id: &str) -> Result<ApprovalInterruption, ApprovalError> {
        let interruption = self
            .store
            .get_interruption(id)?
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;

        if interruption.status.is_terminal() {
            return Err(ApprovalError::AlreadyDecided {
                status: interruption.status,
            });
        }

        let now = Utc::now();
        if interruption.is_expired_at(now) {
            self.expire(&interruption, now)?;
            return Err(ApprovalError::Expired);
        }

        Ok(interruption)
    }

    fn expire(
        &self,
        interruption: &ApprovalInterruption,
        now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        warn!(interruption_id = %interruption.id, "Approval window elapsed, marking expired");
        self.store
            .transition_interruption(&interruption.id, ApprovalStatus::Expired, None, now)?;
        Ok(())
    }

    /// Approve and send.
    ///
    /// Exactly-once-per-click: the effective payload is computed and the
    /// send capability invoked only after the record was observed PENDING
    /// and unexpired, and the APPROVED transition is conditional on the row
    /// still reading PENDING. A failed send returns an error and leaves the
    /// record PENDING so a second approval attempt is possible.
    #[instrument(skip(self, sender, decided_by), fields(interruption_id = id))]
    pub async fn approve(
        &self,
        id: &str,
        decided_by: &str,
        sender: &dyn EmailSender,
    ) -> Result<ApprovedSend, ApprovalError> {
        let interruption = self.load_pending(id)?;

        let draft = self
            .store
            .get_email_draft(&interruption.id)?
            .ok_or_else(|| ApprovalError::DraftMissing(interruption.id.clone()))?;

        let payload = draft
            .effective_payload()
            .ok_or(ApprovalError::RecipientMissing)?;

        let outcome = sender
            .send(&payload)
            .await
            .map_err(|e| ApprovalError::SendFailed {
                reason: e.to_string(),
            })?;

        if !outcome.is_sent() {
            let reason = outcome
                .reason
                .unwrap_or_else(|| "send capability reported failure".to_string());
            warn!(%reason, "Send failed, approval stays pending");
            return Err(ApprovalError::SendFailed { reason });
        }

        let transitioned = self.store.transition_interruption(
            &interruption.id,
            ApprovalStatus::Approved,
            Some(decided_by),
            Utc::now(),
        )?;

        if !transitioned {
            // Raced with another decision after the send went out; report
            // the terminal status we lost to.
            let status = self
                .store
                .get_interruption(&interruption.id)?
                .map(|row| row.status)
                .unwrap_or(ApprovalStatus::Expired);
            return Err(ApprovalError::AlreadyDecided { status });
        }

        info!(recipient = %payload.recipient, "Follow-up sent and approved");
        Ok(ApprovedSend { payload, outcome })
    }

    /// Reject, independent of expiry. Only fails when the record is
    /// already terminal.
    #[instrument(skip(self, decided_by), fields(interruption_id = id))]
    pub fn reject(&self, id: &str, decided_by: &str) -> Result<(), ApprovalError> {
        let interruption = self
            .store
            .get_interruption(id)?
            .ok_or_else(|| ApprovalError::NotFound(id.to_string()))?;

        if interruption.status.is_terminal() {
            return Err(ApprovalError::AlreadyDecided {
                status: interruption.status,
            });
        }

        let transitioned = self.store.transition_interruption(
            id,
            ApprovalStatus::Rejected,
            Some(decided_by),
            Utc::now(),
        )?;

        if !transitioned {
            let status = self
                .store
                .get_interruption(id)?
                .map(|row| row.status)
                .unwrap_or(ApprovalStatus::Rejected);
            return Err(ApprovalError::AlreadyDecided { status });
        }

        info!("Follow-up rejected");
        Ok(())
    }

    /// Edit the overlay fields while the record is PENDING. Originals are
    /// never touched, preserving the drafted-versus-edited audit trail.
    #[instrument(skip(self, edit), fields(interruption_id = id))]
    pub fn edit(&self, id: &str, edit: &DraftEdit) -> Result<(), ApprovalError> {
        let interruption = self.load_pending(id)?;

        if edit.is_empty() {
            return Ok(());
        }

        let changed = self.store.update_draft_overlay(
            &interruption.id,
            edit.recipient.as_deref(),
            edit.subject.as_deref(),
            edit.body.as_deref(),
        )?;

        if !changed {
            return Err(ApprovalError::DraftMissing(interruption.id));
        }

        Ok(())
    }

    /// Current status with lazy expiry applied.
    pub fn status_of(&self, id: &str) -> Result<ApprovalInterruption, ApprovalError> {
        match self.load_pending(id) {
            Ok(interruption) => Ok(interruption),
            Err(ApprovalError::Expired) | Err(ApprovalError::AlreadyDecided { .. }) => self
                .store
                .get_interruption(id)?
                .ok_or_else(|| ApprovalError::NotFound(id.to_string())),
            Err(e) => Err(e),
        }
    }
}
