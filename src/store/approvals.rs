//! Approval interruptions and email draft rows.
//!
//! The one-way transition rule is enforced here: status changes go through
//! a conditional UPDATE that only fires while the row still reads PENDING.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::domain::{ApprovalInterruption, ApprovalStatus, EmailDraft};

use super::{parse_datetime, parse_optional_datetime, Store};

fn row_to_interruption(row: &Row) -> Result<ApprovalInterruption> {
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let expires_at: String = row.get("expires_at")?;
    let decided_at: Option<String> = row.get("decided_at")?;

    let status = match ApprovalStatus::parse(&status) {
        Some(status) => status,
        None => bail!("Malformed interruption status: {}", status),
    };

    Ok(ApprovalInterruption {
        id: row.get("id")?,
        meeting_id: row.get("meeting_id")?,
        tool_name: row.get("tool_name")?,
        recipient: row.get("recipient")?,
        subject: row.get("subject")?,
        body: row.get("body")?,
        status,
        created_at: parse_datetime(&created_at, "created_at")?,
        expires_at: parse_datetime(&expires_at, "expires_at")?,
        decided_at: parse_optional_datetime(decided_at, "decided_at")?,
        decided_by: row.get("decided_by")?,
    })
}

fn row_to_draft(row: &Row) -> Result<EmailDraft> {
    Ok(EmailDraft {
        meeting_id: row.get("meeting_id")?,
        interruption_id: row.get("interruption_id")?,
        recipient_original: row.get("recipient_original")?,
        recipient_confirmed: row.get("recipient_confirmed")?,
        subject_original: row.get("subject_original")?,
        subject_edited: row.get("subject_edited")?,
        body_original: row.get("body_original")?,
        body_edited: row.get("body_edited")?,
    })
}

impl Store {
    /// Create the interruption and its draft overlay in one transaction.
    pub fn create_interruption(
        &self,
        interruption: &ApprovalInterruption,
        draft: &EmailDraft,
    ) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO interruptions
                 (id, meeting_id, tool_name, recipient, subject, body, status,
                  created_at, expires_at, decided_at, decided_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, NULL)",
                params![
                    interruption.id,
                    interruption.meeting_id,
                    interruption.tool_name,
                    interruption.recipient,
                    interruption.subject,
                    interruption.body,
                    interruption.status.as_str(),
                    interruption.created_at.to_rfc3339(),
                    interruption.expires_at.to_rfc3339(),
                ],
            )?;

            tx.execute(
                "INSERT INTO email_drafts
                 (meeting_id, interruption_id, recipient_original, recipient_confirmed,
                  subject_original, subject_edited, body_original, body_edited)
                 VALUES (?1, ?2, ?3, NULL, ?4, NULL, ?5, NULL)",
                params![
                    draft.meeting_id,
                    draft.interruption_id,
                    draft.recipient_original,
                    draft.subject_original,
                    draft.body_original,
                ],
            )?;

            Ok(())
        })
    }

    pub fn get_interruption(&self, id: &str) -> Result<Option<ApprovalInterruption>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, meeting_id, tool_name, recipient, subject, body, status,
                        created_at, expires_at, decided_at, decided_by
                 FROM interruptions WHERE id = ?1",
            )?;

            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_interruption(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Move a PENDING interruption to a terminal status. The WHERE clause
    /// requires the row to still read PENDING, so a raced second decision
    /// comes back false instead of overwriting the first.
    pub fn transition_interruption(
        &self,
        id: &str,
        to: ApprovalStatus,
        decided_by: Option<&str>,
        decided_at: DateTime<Utc>,
    ) -> Result<bool> {
        if !to.is_terminal() {
            bail!("Interruptions cannot transition back to {}", to.as_str());
        }

        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE interruptions
                 SET status = ?2, decided_at = ?3, decided_by = ?4
                 WHERE id = ?1 AND status = 'PENDING'",
                params![id, to.as_str(), decided_at.to_rfc3339(), decided_by],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_email_draft(&self, interruption_id: &str) -> Result<Option<EmailDraft>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT meeting_id, interruption_id, recipient_original, recipient_confirmed,
                        subject_original, subject_edited, body_original, body_edited
                 FROM email_drafts WHERE interruption_id = ?1",
            )?;

            let mut rows = stmt.query(params![interruption_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_draft(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Update only the human-edited overlay; original fields are never
    /// touched. Absent arguments leave the corresponding overlay field
    /// as-is.
    pub fn update_draft_overlay(
        &self,
        interruption_id: &str,
        recipient: Option<&str>,
        subject: Option<&str>,
        body: Option<&str>,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE email_drafts SET
                     recipient_confirmed = COALESCE(?2, recipient_confirmed),
                     subject_edited      = COALESCE(?3, subject_edited),
                     body_edited         = COALESCE(?4, body_edited)
                 WHERE interruption_id = ?1",
                params![interruption_id, recipient, subject, body],
            )?;
            Ok(changed > 0)
        })
    }

    /// Interruptions still awaiting a decision, oldest first.
    pub fn list_pending_interruptions(&self) -> Result<Vec<ApprovalInterruption>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, meeting_id, tool_name, recipient, subject, body, status,
                        created_at, expires_at, decided_at, decided_by
                 FROM interruptions WHERE status = 'PENDING' ORDER BY created_at",
            )?;

            let mut rows = stmt.query([])?;
            let mut pending = Vec::new();
            while let Some(row) = rows.next()? {
                pending.push(row_to_interruption(row)?);
            }
            Ok(pending)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn fixture(store: &Store) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let interruption = ApprovalInterruption {
            id: id.clone(),
            meeting_id: "m1".to_string(),
            tool_name: "send_followup_email".to_string(),
            recipient: Some("client@example.com".to_string()),
            subject: "Follow-up".to_string(),
            body: "Draft body".to_string(),
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now + Duration::minutes(30),
            decided_at: None,
            decided_by: None,
        };
        let draft = EmailDraft {
            meeting_id: "m1".to_string(),
            interruption_id: id.clone(),
            recipient_original: Some("client@example.com".to_string()),
            recipient_confirmed: None,
            subject_original: "Follow-up".to_string(),
            subject_edited: None,
            body_original: "Draft body".to_string(),
            body_edited: None,
        };
        store.create_interruption(&interruption, &draft).unwrap();
        id
    }

    #[test]
    fn test_transition_fires_once() {
        let store = Store::open_in_memory().unwrap();
        let id = fixture(&store);

        assert!(store
            .transition_interruption(&id, ApprovalStatus::Approved, Some("amit"), Utc::now())
            .unwrap());

        // Terminal: the second transition does not fire
        assert!(!store
            .transition_interruption(&id, ApprovalStatus::Rejected, Some("amit"), Utc::now())
            .unwrap());

        let row = store.get_interruption(&id).unwrap().unwrap();
        assert_eq!(row.status, ApprovalStatus::Approved);
        assert_eq!(row.decided_by.as_deref(), Some("amit"));
    }

    #[test]
    fn test_transition_to_pending_rejected() {
        let store = Store::open_in_memory().unwrap();
        let id = fixture(&store);

        assert!(store
            .transition_interruption(&id, ApprovalStatus::Pending, None, Utc::now())
            .is_err());
    }

    #[test]
    fn test_overlay_edit_preserves_originals() {
        let store = Store::open_in_memory().unwrap();
        let id = fixture(&store);

        store
            .update_draft_overlay(&id, None, Some("Edited subject"), Some("B"))
            .unwrap();

        let draft = store.get_email_draft(&id).unwrap().unwrap();
        assert_eq!(draft.subject_original, "Follow-up");
        assert_eq!(draft.subject_edited.as_deref(), Some("Edited subject"));
        assert_eq!(draft.body_original, "Draft body");
        assert_eq!(draft.body_edited.as_deref(), Some("B"));
    }

    #[test]
    fn test_list_pending_excludes_decided() {
        let store = Store::open_in_memory().unwrap();
        let keep = fixture(&store);
        let decided = fixture(&store);

        store
            .transition_interruption(&decided, ApprovalStatus::Rejected, None, Utc::now())
            .unwrap();

        let pending = store.list_pending_interruptions().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, keep);
    }
}
