//! Persistence coordinator.
//!
//! Applies a reconciliation patch exactly once per run. External
//! identifiers are minted here: random UUIDs, never derived from content,
//! so identical-looking items from two different runs stay distinguishable
//! and a retry that re-passes the same minted ids creates no duplicates.

use anyhow::Result;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{FieldMask, ProjectionRow};
use crate::domain::{WorkItemDraft, WorkItemPatch, WorkItemStatus};
use crate::store::Store;

/// A draft paired with its pre-minted external identifier.
#[derive(Debug, Clone)]
pub struct MintedAdd {
    pub external_id: String,
    pub draft: WorkItemDraft,
}

/// What one persistence pass actually did.
#[derive(Debug, Clone, Default)]
pub struct PersistReport {
    /// Rows newly created (idempotent re-runs report 0 here)
    pub created: usize,

    /// Patches applied to existing rows
    pub updated: usize,

    /// Update ids that matched no row; skipped, not fatal
    pub unknown_ids: Vec<i64>,
}

/// Mint one fresh external identifier per draft. Call once per logical
/// batch; on retry, re-pass the already-minted result instead of minting
/// again.
pub fn mint_external_ids(adds: Vec<WorkItemDraft>) -> Vec<MintedAdd> {
    adds.into_iter()
        .map(|draft| MintedAdd {
            external_id: Uuid::new_v4().to_string(),
            draft,
        })
        .collect()
}

/// Applies patches against the store and prepares projection rows.
pub struct PersistenceCoordinator<'a> {
    store: &'a Store,
}

impl<'a> PersistenceCoordinator<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Apply the whole patch in one transactional write: the add batch as a
    /// unit plus each update by persisted id. A partial failure rolls
    /// everything back, so the caller retries the batch as a unit with the
    /// same minted ids. An unknown update id is logged and skipped; the
    /// rest of the batch continues.
    #[instrument(skip(self, minted, updates), fields(meeting_id = meeting_id))]
    pub fn apply(
        &self,
        meeting_id: &str,
        minted: &[MintedAdd],
        updates: &[WorkItemPatch],
    ) -> Result<PersistReport> {
        let rows: Vec<(String, WorkItemDraft)> = minted
            .iter()
            .map(|add| (add.external_id.clone(), add.draft.clone()))
            .collect();

        let (created, updated, unknown_ids) =
            self.store.apply_patch_batch(meeting_id, &rows, updates)?;

        if created < minted.len() {
            info!(
                requested = minted.len(),
                created, "Some adds already existed (idempotent re-run)"
            );
        }
        for id in &unknown_ids {
            warn!(id = *id, "Update references unknown work item, skipped");
        }

        Ok(PersistReport {
            created,
            updated,
            unknown_ids,
        })
    }

    /// Build projection rows for what was just persisted: adds carry the
    /// full field set, updates carry only the changed fields, both keyed by
    /// the stable external identifier.
    pub fn projection_rows(
        &self,
        meeting_id: &str,
        minted: &[MintedAdd],
        updates: &[WorkItemPatch],
    ) -> Result<(Vec<ProjectionRow>, Vec<ProjectionRow>)> {
        let adds = minted
            .iter()
            .map(|add| ProjectionRow {
                external_id: add.external_id.clone(),
                meeting_id: meeting_id.to_string(),
                kind: add.draft.kind,
                field_mask: FieldMask::full(),
                title: Some(add.draft.title.clone()),
                summary: Some(add.draft.summary.clone()),
                owner: add.draft.owner.clone(),
                due_date: add.draft.due_date,
                confidence: Some(add.draft.confidence),
                status: Some(WorkItemStatus::Open),
            })
            .collect();

        let mut update_rows = Vec::new();
        for patch in updates {
            // Post-merge values come from the store, the source of truth
            let item = match self.store.get_work_item(patch.id)? {
                Some(item) => item,
                None => continue,
            };

            let mask = FieldMask {
                title: false,
                summary: patch.summary_fragment.is_some(),
                owner: patch.owner.is_some(),
                due_date: patch.due_date.is_some(),
                confidence: patch.confidence.is_some(),
                status: false,
            };

            let summary = mask.summary.then(|| item.summary.clone());
            let owner = mask.owner.then(|| item.owner.clone()).flatten();
            let due_date = mask.due_date.then_some(item.due_date).flatten();
            let confidence = mask.confidence.then_some(item.confidence);

            update_rows.push(ProjectionRow {
                external_id: item.external_id,
                meeting_id: meeting_id.to_string(),
                kind: item.kind,
                field_mask: mask,
                title: None,
                summary,
                owner,
                due_date,
                confidence,
                status: None,
            });
        }

        Ok((adds, update_rows))
    }
}
