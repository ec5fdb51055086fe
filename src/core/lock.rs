//! Per-meeting execution lock.
//!
//! The persisted-set snapshot is only valid for the lifetime of one batch,
//! so no two reconciliation runs for the same meeting may overlap. An
//! exclusive file lock per meeting id enforces this across processes;
//! different meetings lock independently.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

/// Exclusive lock held for the duration of one meeting's pipeline run.
///
/// Released on drop.
pub struct MeetingLock {
    _file: File,
    path: PathBuf,
}

impl MeetingLock {
    /// Acquire the lock for a meeting, failing fast if another run holds it.
    pub fn acquire(locks_dir: &Path, meeting_id: &str) -> Result<Self> {
        fs::create_dir_all(locks_dir)
            .with_context(|| format!("Failed to create locks dir: {}", locks_dir.display()))?;

        let path = locks_dir.join(format!("{}.lock", sanitize(meeting_id)));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        file.try_lock_exclusive().with_context(|| {
            format!("Meeting '{}' is already being processed", meeting_id)
        })?;

        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Meeting ids come from external capture systems; keep lock file names
/// filesystem-safe.
fn sanitize(meeting_id: &str) -> String {
    meeting_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
