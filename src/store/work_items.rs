//! Work-item rows: batch creation, merge updates, and snapshot fetches.

use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};

use crate::domain::{WorkItem, WorkItemDraft, WorkItemKind, WorkItemPatch, WorkItemStatus};

use super::{parse_datetime, parse_optional_date, Store};

fn row_to_work_item(row: &Row) -> Result<WorkItem> {
    let kind: String = row.get("kind")?;
    let status: String = row.get("status")?;
    let due_date: Option<String> = row.get("due_date")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let kind = match WorkItemKind::parse(&kind) {
        Some(kind) => kind,
        None => bail!("Malformed work item kind: {}", kind),
    };
    let status = match WorkItemStatus::parse(&status) {
        Some(status) => status,
        None => bail!("Malformed work item status: {}", status),
    };

    Ok(WorkItem {
        id: row.get("id")?,
        external_id: row.get("external_id")?,
        meeting_id: row.get("meeting_id")?,
        kind,
        title: row.get("title")?,
        summary: row.get("summary")?,
        owner: row.get("owner")?,
        due_date: parse_optional_date(due_date, "due_date")?,
        confidence: row.get("confidence")?,
        source_span: row.get("source_span")?,
        status,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

const SELECT_COLUMNS: &str = "id, external_id, meeting_id, kind, title, summary, owner, \
                              due_date, confidence, source_span, status, created_at, updated_at";

/// `INSERT OR IGNORE` on `(meeting_id, external_id)` makes a retry with the
/// same pre-minted ids produce no duplicate rows.
fn insert_draft(
    conn: &Connection,
    meeting_id: &str,
    external_id: &str,
    draft: &WorkItemDraft,
    now: &str,
) -> Result<usize> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO work_items
         (external_id, meeting_id, kind, title, summary, owner, due_date,
          confidence, source_span, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)",
        params![
            external_id,
            meeting_id,
            draft.kind.as_str(),
            draft.title,
            draft.summary,
            draft.owner,
            draft.due_date.map(|d| d.to_string()),
            draft.confidence,
            draft.source_span,
            WorkItemStatus::Open.as_str(),
            now,
        ],
    )?;
    Ok(inserted)
}

/// The merge rules live in the SQL so a patch can never overwrite what it
/// must not touch: title is not in the statement, owner and due date only
/// fill nulls, confidence only moves up. Returns false for an unknown id.
fn apply_patch(conn: &Connection, patch: &WorkItemPatch, now: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE work_items SET
             summary     = CASE WHEN ?2 IS NULL THEN summary
                                ELSE summary || char(10) || ?2 END,
             owner       = COALESCE(owner, ?3),
             due_date    = COALESCE(due_date, ?4),
             confidence  = MAX(confidence, COALESCE(?5, confidence)),
             source_span = COALESCE(?6, source_span),
             updated_at  = ?7
         WHERE id = ?1",
        params![
            patch.id,
            patch.summary_fragment,
            patch.owner,
            patch.due_date.map(|d| d.to_string()),
            patch.confidence,
            patch.provenance,
            now,
        ],
    )?;
    Ok(changed > 0)
}

impl Store {
    /// Insert a batch of drafts with pre-minted external ids in one
    /// transaction. Returns the number of rows actually created.
    pub fn insert_work_items(
        &self,
        meeting_id: &str,
        rows: &[(String, WorkItemDraft)],
    ) -> Result<usize> {
        let now = Utc::now().to_rfc3339();

        self.with_tx(|tx| {
            let mut created = 0;
            for (external_id, draft) in rows {
                created += insert_draft(tx, meeting_id, external_id, draft, &now)?;
            }
            Ok(created)
        })
    }

    /// Apply one merge patch by persisted id.
    pub fn apply_work_item_patch(&self, patch: &WorkItemPatch) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        self.with_conn(|conn| apply_patch(conn, patch, &now))
    }

    /// Apply a whole reconciliation patch in a single transaction: all adds
    /// plus all updates, or nothing. An unknown update id is skipped and
    /// reported, not fatal. Atomicity is what makes a caller-side retry
    /// safe: a rolled-back attempt leaves nothing half-applied, so
    /// re-running cannot append a summary fragment twice.
    pub fn apply_patch_batch(
        &self,
        meeting_id: &str,
        rows: &[(String, WorkItemDraft)],
        updates: &[WorkItemPatch],
    ) -> Result<(usize, usize, Vec<i64>)> {
        let now = Utc::now().to_rfc3339();

        self.with_tx(|tx| {
            let mut created = 0;
            for (external_id, draft) in rows {
                created += insert_draft(tx, meeting_id, external_id, draft, &now)?;
            }

            let mut updated = 0;
            let mut unknown_ids = Vec::new();
            for patch in updates {
                if apply_patch(tx, patch, &now)? {
                    updated += 1;
                } else {
                    unknown_ids.push(patch.id);
                }
            }

            Ok((created, updated, unknown_ids))
        })
    }

    /// Snapshot of open items for one meeting and kind. Any malformed row
    /// fails the whole fetch; the caller treats that as a degraded
    /// snapshot, never as an empty one.
    pub fn fetch_open_work_items(
        &self,
        meeting_id: &str,
        kind: WorkItemKind,
    ) -> Result<Vec<WorkItem>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM work_items
                 WHERE meeting_id = ?1 AND kind = ?2 AND status != 'DONE'
                 ORDER BY id",
                SELECT_COLUMNS
            ))?;

            let mut rows = stmt.query(params![meeting_id, kind.as_str()])?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(row_to_work_item(row)?);
            }
            Ok(items)
        })
    }

    /// All items for a meeting regardless of status.
    pub fn list_work_items(&self, meeting_id: &str) -> Result<Vec<WorkItem>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM work_items WHERE meeting_id = ?1 ORDER BY id",
                SELECT_COLUMNS
            ))?;

            let mut rows = stmt.query(params![meeting_id])?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(row_to_work_item(row)?);
            }
            Ok(items)
        })
    }

    /// Single item by persisted id.
    pub fn get_work_item(&self, id: i64) -> Result<Option<WorkItem>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM work_items WHERE id = ?1",
                SELECT_COLUMNS
            ))?;

            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_work_item(row)?)),
                None => Ok(None),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn draft(title: &str) -> WorkItemDraft {
        WorkItemDraft {
            kind: WorkItemKind::Action,
            title: title.to_string(),
            summary: "first summary".to_string(),
            owner: None,
            due_date: None,
            confidence: 0.8,
            source_span: "quote".to_string(),
        }
    }

    #[test]
    fn test_insert_is_idempotent_per_external_id() {
        let store = Store::open_in_memory().unwrap();
        let rows = vec![("ext-1".to_string(), draft("Finalize roles"))];

        assert_eq!(store.insert_work_items("m1", &rows).unwrap(), 1);
        assert_eq!(store.insert_work_items("m1", &rows).unwrap(), 0);

        let items = store.list_work_items("m1").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].external_id, "ext-1");
    }

    #[test]
    fn test_same_external_id_different_meetings() {
        let store = Store::open_in_memory().unwrap();
        let rows = vec![("ext-1".to_string(), draft("Item"))];

        store.insert_work_items("m1", &rows).unwrap();
        store.insert_work_items("m2", &rows).unwrap();

        assert_eq!(store.list_work_items("m1").unwrap().len(), 1);
        assert_eq!(store.list_work_items("m2").unwrap().len(), 1);
    }

    #[test]
    fn test_patch_merges_without_destroying() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_work_items("m1", &[("ext-1".to_string(), draft("Finalize roles"))])
            .unwrap();
        let id = store.list_work_items("m1").unwrap()[0].id;

        let applied = store
            .apply_work_item_patch(&WorkItemPatch {
                id,
                summary_fragment: Some("new detail".to_string()),
                owner: Some("Amit".to_string()),
                due_date: Some(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap()),
                confidence: Some(0.9),
                provenance: Some("updated from transcript".to_string()),
            })
            .unwrap();
        assert!(applied);

        let item = store.get_work_item(id).unwrap().unwrap();
        assert_eq!(item.title, "Finalize roles");
        assert_eq!(item.summary, "first summary\nnew detail");
        assert_eq!(item.owner.as_deref(), Some("Amit"));
        assert_eq!(item.confidence, 0.9);

        // Second patch must not reassign owner or lower confidence
        store
            .apply_work_item_patch(&WorkItemPatch {
                id,
                owner: Some("Someone".to_string()),
                confidence: Some(0.4),
                ..Default::default()
            })
            .unwrap();

        let item = store.get_work_item(id).unwrap().unwrap();
        assert_eq!(item.owner.as_deref(), Some("Amit"));
        assert_eq!(item.confidence, 0.9);
    }

    #[test]
    fn test_patch_unknown_id_is_noop() {
        let store = Store::open_in_memory().unwrap();
        let applied = store
            .apply_work_item_patch(&WorkItemPatch {
                id: 999,
                summary_fragment: Some("x".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(!applied);
    }

    #[test]
    fn test_fetch_open_filters_done_and_kind() {
        let store = Store::open_in_memory().unwrap();
        let mut blocker = draft("Infra down");
        blocker.kind = WorkItemKind::Blocker;

        store
            .insert_work_items(
                "m1",
                &[
                    ("ext-1".to_string(), draft("Open action")),
                    ("ext-2".to_string(), blocker),
                ],
            )
            .unwrap();

        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE work_items SET status = 'DONE' WHERE external_id = 'ext-1'",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        assert!(store
            .fetch_open_work_items("m1", WorkItemKind::Action)
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .fetch_open_work_items("m1", WorkItemKind::Blocker)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_malformed_row_fails_snapshot_fetch() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_work_items("m1", &[("ext-1".to_string(), draft("Item"))])
            .unwrap();

        store
            .with_conn(|conn| {
                conn.execute("UPDATE work_items SET status = 'MYSTERY'", [])?;
                Ok(())
            })
            .unwrap();

        assert!(store
            .fetch_open_work_items("m1", WorkItemKind::Action)
            .is_err());
    }
}
