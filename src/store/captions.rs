//! Caption events and derived transcript segments.

use anyhow::Result;
use rusqlite::params;

use crate::domain::{RawSpeechEvent, TranscriptSegment};

use super::{parse_datetime, Store};

impl Store {
    /// Append caption events. Events are immutable once written, so
    /// re-ingesting the same `(meeting_id, sequence_number)` is a no-op.
    /// Returns the number of newly inserted rows.
    pub fn insert_caption_events(&self, events: &[RawSpeechEvent]) -> Result<usize> {
        self.with_tx(|tx| {
            let mut inserted = 0;
            for event in events {
                inserted += tx.execute(
                    "INSERT OR IGNORE INTO caption_events
                     (meeting_id, sequence_number, speaker_label, text, observed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        event.meeting_id,
                        event.sequence_number,
                        event.speaker_label,
                        event.text,
                        event.observed_at.to_rfc3339(),
                    ],
                )?;
            }
            Ok(inserted)
        })
    }

    /// All caption events for a meeting, ordered by sequence number.
    pub fn fetch_caption_events(&self, meeting_id: &str) -> Result<Vec<RawSpeechEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT meeting_id, sequence_number, speaker_label, text, observed_at
                 FROM caption_events
                 WHERE meeting_id = ?1
                 ORDER BY sequence_number",
            )?;

            let rows = stmt.query_map(params![meeting_id], |row| {
                Ok((
                    row.get::<_, String>("meeting_id")?,
                    row.get::<_, i64>("sequence_number")?,
                    row.get::<_, Option<String>>("speaker_label")?,
                    row.get::<_, String>("text")?,
                    row.get::<_, String>("observed_at")?,
                ))
            })?;

            let mut events = Vec::new();
            for row in rows {
                let (meeting_id, sequence_number, speaker_label, text, observed_at) = row?;
                events.push(RawSpeechEvent {
                    meeting_id,
                    sequence_number,
                    speaker_label,
                    text,
                    observed_at: parse_datetime(&observed_at, "observed_at")?,
                });
            }
            Ok(events)
        })
    }

    /// Replace the derived segments for a meeting. Segments are recomputed
    /// from caption events on every run, so the previous derivation is
    /// dropped wholesale.
    pub fn replace_segments(&self, meeting_id: &str, segments: &[TranscriptSegment]) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "DELETE FROM transcript_segments WHERE meeting_id = ?1",
                params![meeting_id],
            )?;

            for segment in segments {
                tx.execute(
                    "INSERT INTO transcript_segments
                     (meeting_id, speaker, text, start_time, end_time)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        segment.meeting_id,
                        segment.speaker,
                        segment.text,
                        segment.start_time.to_rfc3339(),
                        segment.end_time.to_rfc3339(),
                    ],
                )?;
            }
            Ok(())
        })
    }

    /// Derived segments for a meeting, in insertion order.
    pub fn fetch_segments(&self, meeting_id: &str) -> Result<Vec<TranscriptSegment>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT meeting_id, speaker, text, start_time, end_time
                 FROM transcript_segments
                 WHERE meeting_id = ?1
                 ORDER BY id",
            )?;

            let rows = stmt.query_map(params![meeting_id], |row| {
                Ok((
                    row.get::<_, String>("meeting_id")?,
                    row.get::<_, String>("speaker")?,
                    row.get::<_, String>("text")?,
                    row.get::<_, String>("start_time")?,
                    row.get::<_, String>("end_time")?,
                ))
            })?;

            let mut segments = Vec::new();
            for row in rows {
                let (meeting_id, speaker, text, start_time, end_time) = row?;
                segments.push(TranscriptSegment {
                    meeting_id,
                    speaker,
                    text,
                    start_time: parse_datetime(&start_time, "start_time")?,
                    end_time: parse_datetime(&end_time, "end_time")?,
                });
            }
            Ok(segments)
        })
    }
}
