//! Meeting lifecycle rows.

use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::params;

use crate::domain::{Meeting, MeetingStatus};

use super::{parse_datetime, Store};

impl Store {
    /// Register a meeting if it does not exist yet. Safe to call on every
    /// ingest; an existing row keeps its status.
    pub fn upsert_meeting(&self, id: &str, title: Option<&str>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO meetings (id, title, status, started_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    id,
                    title,
                    MeetingStatus::Captured.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_meeting(&self, id: &str) -> Result<Option<Meeting>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, status, failure_reason, started_at
                 FROM meetings WHERE id = ?1",
            )?;

            let mut rows = stmt.query(params![id])?;
            let row = match rows.next()? {
                Some(row) => row,
                None => return Ok(None),
            };

            let status: String = row.get("status")?;
            let started_at: String = row.get("started_at")?;
            let status = match MeetingStatus::parse(&status) {
                Some(status) => status,
                None => bail!("Malformed meeting status: {}", status),
            };

            Ok(Some(Meeting {
                id: row.get("id")?,
                title: row.get("title")?,
                status,
                failure_reason: row.get("failure_reason")?,
                started_at: parse_datetime(&started_at, "started_at")?,
            }))
        })
    }

    /// Update the workflow status; the failure reason is cleared unless a
    /// new one is given.
    pub fn set_meeting_status(
        &self,
        id: &str,
        status: MeetingStatus,
        failure_reason: Option<&str>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE meetings SET status = ?2, failure_reason = ?3 WHERE id = ?1",
                params![id, status.as_str(), failure_reason],
            )?;
            if changed == 0 {
                bail!("Meeting '{}' not found", id);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_keeps_existing_status() {
        let store = Store::open_in_memory().unwrap();

        store.upsert_meeting("m1", Some("Standup")).unwrap();
        store
            .set_meeting_status("m1", MeetingStatus::Completed, None)
            .unwrap();
        store.upsert_meeting("m1", Some("Standup")).unwrap();

        let meeting = store.get_meeting("m1").unwrap().unwrap();
        assert_eq!(meeting.status, MeetingStatus::Completed);
    }

    #[test]
    fn test_failure_reason_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_meeting("m1", None).unwrap();

        store
            .set_meeting_status("m1", MeetingStatus::Failed, Some("extractor unreachable"))
            .unwrap();

        let meeting = store.get_meeting("m1").unwrap().unwrap();
        assert_eq!(meeting.status, MeetingStatus::Failed);
        assert_eq!(
            meeting.failure_reason.as_deref(),
            Some("extractor unreachable")
        );
    }

    #[test]
    fn test_status_update_for_unknown_meeting_fails() {
        let store = Store::open_in_memory().unwrap();
        assert!(store
            .set_meeting_status("ghost", MeetingStatus::Executing, None)
            .is_err());
    }
}
