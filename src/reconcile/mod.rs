//! Reconciliation engine.
//!
//! Converts a batch of extraction candidates plus a frozen snapshot of the
//! persisted work-item set into a deterministic patch of ADD and UPDATE
//! instructions. Identity is owned exclusively by the store: the engine
//! never invents identifiers, and a candidate that cannot be matched
//! safely becomes an ADD rather than a risky UPDATE.

use std::collections::BTreeMap;

use tracing::{debug, instrument, warn};

use crate::adapters::{CapabilityError, IntentMatcher};
use crate::core::retry::{retry_bounded, RetryBudget};
use crate::domain::{
    Candidate, ExtractionBatch, ReconciliationPatch, WorkItem, WorkItemDraft, WorkItemKind,
    WorkItemPatch,
};

/// Warning emitted when the whole batch is dropped
pub const WARN_NO_SAFE_ACTIONS: &str = "no_safe_actions";

/// Warning emitted when reconciling without a usable persisted set
pub const WARN_DEGRADED_MODE: &str = "degraded_mode";

/// Warning emitted when the matcher stayed unreachable for a candidate
pub const WARN_MATCHER_UNAVAILABLE: &str = "matcher_unavailable";

/// Default confidence floor applied to candidates and to the batch
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// The persisted-set snapshot fetched once per batch.
///
/// `Degraded` means the fetch failed or returned malformed rows. A
/// successful fetch of zero items is `Ready(vec![])`: normal, not
/// degraded.
#[derive(Debug, Clone)]
pub enum Snapshot {
    Ready(Vec<WorkItem>),
    Degraded { reason: String },
}

/// Typed outcome of one reconciliation batch. Replaces the handoff flags
/// of older designs: callers branch on the value, nothing is signaled
/// through shared state.
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// A patch eligible for persistence
    Patch(ReconciliationPatch),

    /// Nothing safe to persist; the batch was dropped
    NoSafeActions { warnings: Vec<String> },
}

impl ReconcileOutcome {
    pub fn into_patch(self) -> Option<ReconciliationPatch> {
        match self {
            Self::Patch(patch) => Some(patch),
            Self::NoSafeActions { .. } => None,
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            Self::Patch(patch) => &patch.warnings,
            Self::NoSafeActions { warnings } => warnings,
        }
    }
}

/// Reconciliation engine for one work-item kind.
pub struct Reconciler<'a> {
    matcher: &'a dyn IntentMatcher,
    threshold: f64,
    retry: RetryBudget,
}

impl<'a> Reconciler<'a> {
    pub fn new(matcher: &'a dyn IntentMatcher, threshold: f64, retry: RetryBudget) -> Self {
        Self {
            matcher,
            threshold,
            retry,
        }
    }

    /// Reconcile one extraction batch against the snapshot.
    ///
    /// The batch-level gate runs first: an aggregate confidence below the
    /// floor drops the whole batch, even when individual candidates are
    /// confident. One unstable extraction run must not persist anything,
    /// so the gate is on the aggregate, not per item.
    #[instrument(skip(self, batch, snapshot), fields(kind = kind.as_str()))]
    pub async fn reconcile(
        &self,
        kind: WorkItemKind,
        batch: &ExtractionBatch,
        snapshot: &Snapshot,
    ) -> ReconcileOutcome {
        let mut warnings = batch.warnings.clone();

        if batch.confidence < self.threshold {
            debug!(
                confidence = batch.confidence,
                threshold = self.threshold,
                "Batch confidence below floor, dropping batch"
            );
            warnings.push(WARN_NO_SAFE_ACTIONS.to_string());
            return ReconcileOutcome::NoSafeActions { warnings };
        }

        let persisted = match snapshot {
            Snapshot::Degraded { reason } => {
                warn!(%reason, "Persisted set unusable, entering degraded mode");
                return self.reconcile_degraded(kind, batch, warnings);
            }
            Snapshot::Ready(items) => items,
        };

        let mut add: Vec<WorkItemDraft> = Vec::new();
        let mut updates: BTreeMap<i64, WorkItemPatch> = BTreeMap::new();

        for candidate in &batch.candidates {
            if candidate.confidence < self.threshold {
                debug!(title = %candidate.title, confidence = candidate.confidence, "Skipping low-confidence candidate");
                continue;
            }

            let matched = self
                .find_match(candidate, persisted, &mut warnings)
                .await
                .and_then(|id| persisted.iter().find(|item| item.id == id));

            match matched {
                Some(existing) => {
                    let patch = merge_candidate(candidate, existing);
                    if patch.is_noop() {
                        debug!(id = existing.id, "Match found but nothing new to merge");
                        continue;
                    }
                    merge_into(&mut updates, patch);
                }
                None => add.push(draft_from(kind, candidate)),
            }
        }

        let update: Vec<WorkItemPatch> = updates.into_values().collect();

        if add.is_empty() && update.is_empty() {
            warnings.push(WARN_NO_SAFE_ACTIONS.to_string());
            return ReconcileOutcome::NoSafeActions { warnings };
        }

        ReconcileOutcome::Patch(ReconciliationPatch {
            add,
            update,
            batch_confidence: batch.confidence,
            warnings,
        })
    }

    /// Degraded mode: no identities are available, so UPDATE is forbidden
    /// entirely; confident candidates become ADDs.
    fn reconcile_degraded(
        &self,
        kind: WorkItemKind,
        batch: &ExtractionBatch,
        mut warnings: Vec<String>,
    ) -> ReconcileOutcome {
        warnings.push(WARN_DEGRADED_MODE.to_string());

        let add: Vec<WorkItemDraft> = batch
            .candidates
            .iter()
            .filter(|c| c.confidence >= self.threshold)
            .map(|c| draft_from(kind, c))
            .collect();

        if add.is_empty() {
            warnings.push(WARN_NO_SAFE_ACTIONS.to_string());
            return ReconcileOutcome::NoSafeActions { warnings };
        }

        ReconcileOutcome::Patch(ReconciliationPatch {
            add,
            update: vec![],
            batch_confidence: batch.confidence,
            warnings,
        })
    }

    /// Ask the matcher for an identity, with bounded retry on transient
    /// failures. An exhausted budget or an id outside the snapshot resolves
    /// to "no match": losing a merge is safer than corrupting one.
    async fn find_match(
        &self,
        candidate: &Candidate,
        persisted: &[WorkItem],
        warnings: &mut Vec<String>,
    ) -> Option<i64> {
        let result = retry_bounded(
            &self.retry,
            "intent-match",
            |e: &CapabilityError| e.is_transient(),
            || self.matcher.find_match(candidate, persisted),
        )
        .await;

        match result {
            Ok(Some(id)) if persisted.iter().any(|item| item.id == id) => Some(id),
            Ok(Some(id)) => {
                warn!(id, title = %candidate.title, "Matcher returned an id outside the snapshot, treating as no match");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(title = %candidate.title, error = %e, "Matcher unavailable, treating as no match");
                if !warnings.iter().any(|w| w == WARN_MATCHER_UNAVAILABLE) {
                    warnings.push(WARN_MATCHER_UNAVAILABLE.to_string());
                }
                None
            }
        }
    }
}

/// Build an ADD draft. Drafts carry no persisted id and no external
/// identifier; the persistence coordinator mints identity later.
fn draft_from(kind: WorkItemKind, candidate: &Candidate) -> WorkItemDraft {
    WorkItemDraft {
        kind,
        title: candidate.title.clone(),
        summary: candidate.summary.clone(),
        owner: candidate.owner.clone(),
        due_date: candidate.due_date,
        confidence: candidate.confidence,
        source_span: candidate.source_span.clone(),
    }
}

/// Merge policy for a matched candidate, append-only and never destructive:
/// title is immutable, summary is appended, owner is set only while null,
/// due date only when newly resolved, confidence only moves upward.
fn merge_candidate(candidate: &Candidate, existing: &WorkItem) -> WorkItemPatch {
    let fragment = candidate.summary.trim();
    let summary_fragment = if !fragment.is_empty() && !existing.summary.contains(fragment) {
        Some(fragment.to_string())
    } else {
        None
    };

    let owner = match (&existing.owner, &candidate.owner) {
        (None, Some(owner)) => Some(owner.clone()),
        _ => None,
    };

    let due_date = match (existing.due_date, candidate.due_date) {
        (None, Some(date)) => Some(date),
        _ => None,
    };

    let confidence = if candidate.confidence > existing.confidence {
        Some(candidate.confidence)
    } else {
        None
    };

    let provenance = if candidate.source_span.trim().is_empty() {
        None
    } else {
        Some(candidate.source_span.clone())
    };

    WorkItemPatch {
        id: existing.id,
        summary_fragment,
        owner,
        due_date,
        confidence,
        provenance,
    }
}

/// Fold a patch into the per-id map so each persisted id appears at most
/// once per batch: summary fragments are concatenated, confidence takes
/// the maximum, identity fields stay untouched.
fn merge_into(updates: &mut BTreeMap<i64, WorkItemPatch>, patch: WorkItemPatch) {
    match updates.get_mut(&patch.id) {
        None => {
            updates.insert(patch.id, patch);
        }
        Some(existing) => {
            existing.summary_fragment =
                match (existing.summary_fragment.take(), patch.summary_fragment) {
                    (Some(a), Some(b)) => Some(format!("{}\n{}", a, b)),
                    (a, b) => a.or(b),
                };
            existing.confidence = match (existing.confidence, patch.confidence) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            };
            existing.owner = existing.owner.take().or(patch.owner);
            existing.due_date = existing.due_date.or(patch.due_date);
            existing.provenance = existing.provenance.take().or(patch.provenance);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::adapters::CapabilityError;
    use crate::domain::WorkItemStatus;

    /// Matcher fake keyed by candidate title
    struct FakeMatcher {
        by_title: HashMap<String, i64>,
    }

    impl FakeMatcher {
        fn empty() -> Self {
            Self {
                by_title: HashMap::new(),
            }
        }

        fn with(pairs: &[(&str, i64)]) -> Self {
            Self {
                by_title: pairs
                    .iter()
                    .map(|(t, id)| (t.to_string(), *id))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl IntentMatcher for FakeMatcher {
        async fn find_match(
            &self,
            candidate: &Candidate,
            _persisted: &[WorkItem],
        ) -> Result<Option<i64>, CapabilityError> {
            Ok(self.by_title.get(&candidate.title).copied())
        }
    }

    /// Matcher that always fails with a transient error
    struct DownMatcher {
        calls: AtomicU32,
    }

    #[async_trait]
    impl IntentMatcher for DownMatcher {
        async fn find_match(
            &self,
            _candidate: &Candidate,
            _persisted: &[WorkItem],
        ) -> Result<Option<i64>, CapabilityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CapabilityError::Status {
                capability: "matcher",
                status: 503,
            })
        }
    }

    fn candidate(title: &str, confidence: f64) -> Candidate {
        Candidate {
            title: title.to_string(),
            summary: format!("{} details", title),
            owner: None,
            due_date: None,
            confidence,
            source_span: "quote".to_string(),
        }
    }

    fn persisted(id: i64, title: &str) -> WorkItem {
        WorkItem {
            id,
            external_id: format!("ext-{}", id),
            meeting_id: "m1".to_string(),
            kind: WorkItemKind::Action,
            title: title.to_string(),
            summary: "original summary".to_string(),
            owner: None,
            due_date: None,
            confidence: 0.6,
            source_span: "original quote".to_string(),
            status: WorkItemStatus::Open,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn batch(candidates: Vec<Candidate>, confidence: f64) -> ExtractionBatch {
        ExtractionBatch {
            candidates,
            confidence,
            warnings: vec![],
        }
    }

    fn fast_retry() -> RetryBudget {
        RetryBudget {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 1,
            backoff_multiplier: 1.0,
        }
    }

    #[tokio::test]
    async fn test_empty_persisted_set_is_normal_path() {
        let matcher = FakeMatcher::empty();
        let engine = Reconciler::new(&matcher, 0.5, fast_retry());

        let outcome = engine
            .reconcile(
                WorkItemKind::Action,
                &batch(vec![candidate("Finalize roles", 0.9)], 0.9),
                &Snapshot::Ready(vec![]),
            )
            .await;

        let patch = outcome.into_patch().unwrap();
        assert_eq!(patch.add.len(), 1);
        assert_eq!(patch.add[0].title, "Finalize roles");
        assert!(patch.update.is_empty());
        assert!(!patch.warnings.iter().any(|w| w == WARN_DEGRADED_MODE));
    }

    #[tokio::test]
    async fn test_confidence_floor_skips_candidates() {
        let matcher = FakeMatcher::empty();
        let engine = Reconciler::new(&matcher, 0.5, fast_retry());

        let outcome = engine
            .reconcile(
                WorkItemKind::Action,
                &batch(
                    vec![candidate("Keep this", 0.8), candidate("Drop this", 0.3)],
                    0.8,
                ),
                &Snapshot::Ready(vec![]),
            )
            .await;

        let patch = outcome.into_patch().unwrap();
        assert_eq!(patch.add.len(), 1);
        assert_eq!(patch.add[0].title, "Keep this");
    }

    #[tokio::test]
    async fn test_batch_gate_drops_confident_items() {
        let matcher = FakeMatcher::empty();
        let engine = Reconciler::new(&matcher, 0.5, fast_retry());

        // One confident candidate inside an unreliable batch
        let outcome = engine
            .reconcile(
                WorkItemKind::Action,
                &batch(vec![candidate("Looks fine", 0.95)], 0.3),
                &Snapshot::Ready(vec![]),
            )
            .await;

        match outcome {
            ReconcileOutcome::NoSafeActions { warnings } => {
                assert!(warnings.iter().any(|w| w == WARN_NO_SAFE_ACTIONS));
            }
            ReconcileOutcome::Patch(_) => panic!("batch gate must drop the whole batch"),
        }
    }

    #[tokio::test]
    async fn test_degraded_mode_forbids_updates() {
        let matcher = FakeMatcher::with(&[("Finalize roles", 1)]);
        let engine = Reconciler::new(&matcher, 0.5, fast_retry());

        let outcome = engine
            .reconcile(
                WorkItemKind::Action,
                &batch(vec![candidate("Finalize roles", 0.9)], 0.9),
                &Snapshot::Degraded {
                    reason: "fetch failed".to_string(),
                },
            )
            .await;

        let patch = outcome.into_patch().unwrap();
        assert!(patch.update.is_empty());
        assert_eq!(patch.add.len(), 1);
        assert!(patch.warnings.iter().any(|w| w == WARN_DEGRADED_MODE));
    }

    #[tokio::test]
    async fn test_match_produces_single_update() {
        let matcher = FakeMatcher::with(&[("Finalize roles", 42)]);
        let engine = Reconciler::new(&matcher, 0.5, fast_retry());

        let mut item = persisted(42, "Finalize role definitions");
        item.confidence = 0.6;

        let outcome = engine
            .reconcile(
                WorkItemKind::Action,
                &batch(vec![candidate("Finalize roles", 0.9)], 0.9),
                &Snapshot::Ready(vec![item]),
            )
            .await;

        let patch = outcome.into_patch().unwrap();
        assert!(patch.add.is_empty());
        assert_eq!(patch.update.len(), 1);
        assert_eq!(patch.update[0].id, 42);
        assert_eq!(patch.update[0].confidence, Some(0.9));
        assert!(patch.update[0].summary_fragment.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_matches_merge_into_one_update() {
        let matcher = FakeMatcher::with(&[("Finish the docs", 7), ("Complete documentation", 7)]);
        let engine = Reconciler::new(&matcher, 0.5, fast_retry());

        let outcome = engine
            .reconcile(
                WorkItemKind::Action,
                &batch(
                    vec![
                        candidate("Finish the docs", 0.7),
                        candidate("Complete documentation", 0.9),
                    ],
                    0.8,
                ),
                &Snapshot::Ready(vec![persisted(7, "Write documentation")]),
            )
            .await;

        let patch = outcome.into_patch().unwrap();
        assert_eq!(patch.update.len(), 1);

        let merged = &patch.update[0];
        assert_eq!(merged.id, 7);
        // Max confidence wins, fragments concatenate
        assert_eq!(merged.confidence, Some(0.9));
        let fragment = merged.summary_fragment.as_deref().unwrap();
        assert!(fragment.contains("Finish the docs details"));
        assert!(fragment.contains("Complete documentation details"));
    }

    #[tokio::test]
    async fn test_owner_never_reassigned() {
        let matcher = FakeMatcher::with(&[("Review PR", 3)]);
        let engine = Reconciler::new(&matcher, 0.5, fast_retry());

        let mut item = persisted(3, "Review the pull request");
        item.owner = Some("John".to_string());

        let mut c = candidate("Review PR", 0.9);
        c.owner = Some("Someone else".to_string());

        let outcome = engine
            .reconcile(
                WorkItemKind::Action,
                &batch(vec![c], 0.9),
                &Snapshot::Ready(vec![item]),
            )
            .await;

        let patch = outcome.into_patch().unwrap();
        assert_eq!(patch.update[0].owner, None);
    }

    #[tokio::test]
    async fn test_due_date_only_when_newly_resolved() {
        let matcher = FakeMatcher::with(&[("Ship it", 5)]);
        let engine = Reconciler::new(&matcher, 0.5, fast_retry());

        let mut item = persisted(5, "Ship the release");
        item.due_date = Some(NaiveDate::from_ymd_opt(2026, 1, 15).unwrap());

        let mut c = candidate("Ship it", 0.9);
        c.due_date = Some(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());

        let outcome = engine
            .reconcile(
                WorkItemKind::Action,
                &batch(vec![c], 0.9),
                &Snapshot::Ready(vec![item]),
            )
            .await;

        let patch = outcome.into_patch().unwrap();
        // Already dated: no automatic re-dating
        assert_eq!(patch.update[0].due_date, None);
    }

    #[tokio::test]
    async fn test_confidence_never_moves_down() {
        let matcher = FakeMatcher::with(&[("Ship it", 5)]);
        let engine = Reconciler::new(&matcher, 0.5, fast_retry());

        let mut item = persisted(5, "Ship the release");
        item.confidence = 0.95;
        item.summary = "Ship it details".to_string(); // fragment already present

        let outcome = engine
            .reconcile(
                WorkItemKind::Action,
                &batch(vec![candidate("Ship it", 0.7)], 0.9),
                &Snapshot::Ready(vec![item]),
            )
            .await;

        // Nothing mergeable at all: the match collapses to a no-op and the
        // batch has no safe actions left
        assert!(outcome.into_patch().is_none());
    }

    #[tokio::test]
    async fn test_matcher_outage_resolves_to_add() {
        let matcher = DownMatcher {
            calls: AtomicU32::new(0),
        };
        let engine = Reconciler::new(&matcher, 0.5, fast_retry());

        let outcome = engine
            .reconcile(
                WorkItemKind::Blocker,
                &batch(vec![candidate("Blocked on infra", 0.8)], 0.8),
                &Snapshot::Ready(vec![persisted(1, "Infra blocker")]),
            )
            .await;

        let patch = outcome.into_patch().unwrap();
        assert_eq!(patch.add.len(), 1);
        assert!(patch.update.is_empty());
        assert!(patch.warnings.iter().any(|w| w == WARN_MATCHER_UNAVAILABLE));
        // Bounded retry: exactly max_attempts calls
        assert_eq!(matcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_match_id_resolves_to_add() {
        let matcher = FakeMatcher::with(&[("Phantom", 999)]);
        let engine = Reconciler::new(&matcher, 0.5, fast_retry());

        let outcome = engine
            .reconcile(
                WorkItemKind::Action,
                &batch(vec![candidate("Phantom", 0.9)], 0.9),
                &Snapshot::Ready(vec![persisted(1, "Real item")]),
            )
            .await;

        let patch = outcome.into_patch().unwrap();
        assert_eq!(patch.add.len(), 1);
        assert!(patch.update.is_empty());
    }

    #[tokio::test]
    async fn test_all_skipped_yields_no_safe_actions() {
        let matcher = FakeMatcher::empty();
        let engine = Reconciler::new(&matcher, 0.5, fast_retry());

        let outcome = engine
            .reconcile(
                WorkItemKind::Action,
                &batch(vec![candidate("Too weak", 0.2)], 0.8),
                &Snapshot::Ready(vec![]),
            )
            .await;

        match outcome {
            ReconcileOutcome::NoSafeActions { warnings } => {
                assert!(warnings.iter().any(|w| w == WARN_NO_SAFE_ACTIONS));
            }
            ReconcileOutcome::Patch(_) => panic!("nothing above threshold, no patch expected"),
        }
    }
}
