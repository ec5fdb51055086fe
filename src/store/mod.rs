//! SQLite-backed store: the source of truth for meetings, caption events,
//! work items, and approval records.
//!
//! Repository methods live in per-table modules (`captions`, `work_items`,
//! `approvals`, `meetings`) as impl blocks on [`Store`].

pub mod approvals;
pub mod captions;
pub mod meetings;
pub mod work_items;

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;

/// Handle to the relational store.
///
/// rusqlite connections are not Sync, so the connection sits behind a
/// mutex; every batch does a small, bounded amount of SQL.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (and initialize) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create db directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meetings (
                id              TEXT PRIMARY KEY,
                title           TEXT,
                status          TEXT NOT NULL DEFAULT 'CAPTURED',
                failure_reason  TEXT,
                started_at      TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS caption_events (
                meeting_id      TEXT NOT NULL,
                sequence_number INTEGER NOT NULL,
                speaker_label   TEXT,
                text            TEXT NOT NULL,
                observed_at     TEXT NOT NULL,
                PRIMARY KEY (meeting_id, sequence_number)
            );

            CREATE TABLE IF NOT EXISTS transcript_segments (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                meeting_id  TEXT NOT NULL,
                speaker     TEXT NOT NULL,
                text        TEXT NOT NULL,
                start_time  TEXT NOT NULL,
                end_time    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS work_items (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id TEXT NOT NULL,
                meeting_id  TEXT NOT NULL,
                kind        TEXT NOT NULL,
                title       TEXT NOT NULL,
                summary     TEXT NOT NULL,
                owner       TEXT,
                due_date    TEXT,
                confidence  REAL NOT NULL,
                source_span TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'OPEN',
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                UNIQUE (meeting_id, external_id)
            );

            CREATE TABLE IF NOT EXISTS interruptions (
                id          TEXT PRIMARY KEY,
                meeting_id  TEXT NOT NULL,
                tool_name   TEXT NOT NULL,
                recipient   TEXT,
                subject     TEXT NOT NULL,
                body        TEXT NOT NULL,
                status      TEXT NOT NULL DEFAULT 'PENDING',
                created_at  TEXT NOT NULL,
                expires_at  TEXT NOT NULL,
                decided_at  TEXT,
                decided_by  TEXT
            );

            CREATE TABLE IF NOT EXISTS email_drafts (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                meeting_id          TEXT NOT NULL,
                interruption_id     TEXT NOT NULL UNIQUE,
                recipient_original  TEXT,
                recipient_confirmed TEXT,
                subject_original    TEXT NOT NULL,
                subject_edited      TEXT,
                body_original       TEXT NOT NULL,
                body_edited         TEXT
            );
            "#,
        )
        .context("Failed to initialize schema")?;

        Ok(())
    }

    /// Run a closure against the connection.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("store mutex poisoned"))?;
        f(&conn)
    }

    /// Run a closure inside a transaction; rolls back on error.
    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("store mutex poisoned"))?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit().context("Failed to commit transaction")?;
        Ok(value)
    }
}

/// Parse an RFC 3339 timestamp stored as TEXT.
pub(crate) fn parse_datetime(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Malformed timestamp in column '{}': {}", column, raw))
}

pub(crate) fn parse_optional_datetime(
    raw: Option<String>,
    column: &str,
) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_datetime(&s, column)).transpose()
}

/// Parse an ISO date (YYYY-MM-DD) stored as TEXT.
pub(crate) fn parse_optional_date(raw: Option<String>, column: &str) -> Result<Option<NaiveDate>> {
    raw.map(|s| {
        NaiveDate::parse_from_str(&s, "%Y-%m-%d")
            .with_context(|| format!("Malformed date in column '{}': {}", column, s))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_initializes() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let count: i64 = conn.query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type = 'table'",
                    [],
                    |row| row.get(0),
                )?;
                assert!(count >= 6);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_parse_datetime_rejects_garbage() {
        assert!(parse_datetime("not-a-date", "x").is_err());
        assert!(parse_datetime("2026-01-15T10:00:00Z", "x").is_ok());
    }

    #[test]
    fn test_parse_optional_date() {
        assert_eq!(parse_optional_date(None, "x").unwrap(), None);
        assert!(parse_optional_date(Some("2026-01-15".to_string()), "x")
            .unwrap()
            .is_some());
        assert!(parse_optional_date(Some("15/01/2026".to_string()), "x").is_err());
    }
}
