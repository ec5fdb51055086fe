//! Per-meeting pipeline runner.
//!
//! Coordinates one meeting's flow end to end: aggregate captions, route,
//! extract per kind (concurrently), reconcile against the persisted
//! snapshot, persist jointly, project, and on an independent branch over
//! the same input, draft the follow-up and open its approval interruption.
//!
//! Ordering inside a batch is fixed: the snapshot is read before any match
//! decision, every match decision lands before the single patch write, and
//! the patch write lands before projection sync.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};

use crate::adapters::{
    CapabilityError, Extractor, IntentMatcher, ProjectionReport, ProjectionSink, RouteDecision,
};
use crate::approval::ApprovalWorkflow;
use crate::domain::{
    MeetingStatus, ReconciliationPatch, WorkItemDraft, WorkItemKind, WorkItemPatch,
};
use crate::persist::{mint_external_ids, PersistenceCoordinator};
use crate::reconcile::{ReconcileOutcome, Reconciler, Snapshot};
use crate::store::Store;
use crate::transcript::{render_transcript, CaptionAggregator};

use super::lock::MeetingLock;
use super::retry::{retry_bounded, RetryBudget};

/// Warning emitted when a meeting has no caption events to work with
pub const WARN_EMPTY_TRANSCRIPT: &str = "empty_transcript";

/// Warning emitted when routing stayed unreachable and the runner fell
/// back to extracting every kind
pub const WARN_ROUTING_UNAVAILABLE: &str = "routing_unavailable";

/// Tunables for one run
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub confidence_threshold: f64,
    pub approval_window_minutes: i64,
    pub retry: RetryBudget,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: crate::reconcile::DEFAULT_CONFIDENCE_THRESHOLD,
            approval_window_minutes: crate::approval::DEFAULT_APPROVAL_WINDOW_MINUTES,
            retry: RetryBudget::default(),
        }
    }
}

/// What one pipeline run did, with every absorbed failure as a warning.
/// Partial success plus warnings is the normal failure surface; the run
/// itself only errors on batch-level problems.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub meeting_id: String,
    pub segment_count: usize,
    pub created: usize,
    pub updated: usize,
    pub unknown_ids: Vec<i64>,
    pub projection: Option<ProjectionReport>,
    pub interruption_id: Option<String>,
    pub warnings: Vec<String>,
}

/// Runs the reconciliation pipeline for one meeting at a time.
pub struct MeetingRunner<'a> {
    store: &'a Store,
    extractor: &'a dyn Extractor,
    matcher: &'a dyn IntentMatcher,
    projection: &'a dyn ProjectionSink,
    config: RunnerConfig,
}

impl<'a> MeetingRunner<'a> {
    pub fn new(
        store: &'a Store,
        extractor: &'a dyn Extractor,
        matcher: &'a dyn IntentMatcher,
        projection: &'a dyn ProjectionSink,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            matcher,
            projection,
            config,
        }
    }

    /// Execute the pipeline for a captured meeting.
    ///
    /// Holds the per-meeting lock for the whole run; a second concurrent
    /// run for the same meeting fails fast. The meeting row tracks
    /// EXECUTING → COMPLETED/FAILED around the work.
    #[instrument(skip(self, locks_dir), fields(meeting_id = meeting_id))]
    pub async fn run(&self, meeting_id: &str, locks_dir: &Path) -> Result<RunReport> {
        let _lock = MeetingLock::acquire(locks_dir, meeting_id)?;

        if self.store.get_meeting(meeting_id)?.is_none() {
            bail!("No captured meeting '{}'", meeting_id);
        }
        self.store
            .set_meeting_status(meeting_id, MeetingStatus::Executing, None)?;

        match self.execute(meeting_id).await {
            Ok(report) => {
                self.store
                    .set_meeting_status(meeting_id, MeetingStatus::Completed, None)?;
                info!(
                    created = report.created,
                    updated = report.updated,
                    warnings = report.warnings.len(),
                    "Meeting pipeline completed"
                );
                Ok(report)
            }
            Err(e) => {
                let reason = e.to_string();
                self.store
                    .set_meeting_status(meeting_id, MeetingStatus::Failed, Some(&reason))?;
                Err(e).context(format!("Pipeline failed for meeting '{}'", meeting_id))
            }
        }
    }

    async fn execute(&self, meeting_id: &str) -> Result<RunReport> {
        let mut report = RunReport {
            meeting_id: meeting_id.to_string(),
            ..Default::default()
        };

        // Aggregate captions into segments and persist the derivation
        let events = self.store.fetch_caption_events(meeting_id)?;
        let segments = CaptionAggregator::aggregate(meeting_id, &events);
        self.store.replace_segments(meeting_id, &segments)?;
        report.segment_count = segments.len();

        if segments.is_empty() {
            warn!("No caption events captured, nothing to extract");
            report.warnings.push(WARN_EMPTY_TRANSCRIPT.to_string());
            return Ok(report);
        }

        let transcript = render_transcript(&segments);
        let transcript = transcript.as_str();
        let window = (
            segments[0].start_time,
            segments[segments.len() - 1].end_time,
        );

        // Route: which kinds to extract, and is a follow-up wanted
        let route = match retry_bounded(
            &self.config.retry,
            "route",
            CapabilityError::is_transient,
            || self.extractor.route(transcript),
        )
        .await
        {
            Ok(route) => route,
            Err(e) => {
                warn!(error = %e, "Routing unavailable, extracting all kinds");
                report.warnings.push(WARN_ROUTING_UNAVAILABLE.to_string());
                RouteDecision::all_kinds()
            }
        };

        // Extraction and reconciliation per kind, concurrently; both must
        // finish before persistence is attempted jointly
        let (actions, blockers) = tokio::join!(
            self.reconcile_kind(
                route.extract_actions,
                WorkItemKind::Action,
                meeting_id,
                transcript,
                window,
            ),
            self.reconcile_kind(
                route.extract_blockers,
                WorkItemKind::Blocker,
                meeting_id,
                transcript,
                window,
            ),
        );

        let (action_patch, action_warnings) = actions;
        let (blocker_patch, blocker_warnings) = blockers;
        report.warnings.extend(action_warnings);
        report.warnings.extend(blocker_warnings);

        let patches: Vec<ReconciliationPatch> =
            [action_patch, blocker_patch].into_iter().flatten().collect();

        // Persistence + projection, in parallel with the follow-up branch
        let persist_branch = self.persist_and_project(meeting_id, &patches);
        let followup_branch = self.open_follow_up(meeting_id, transcript, &route);
        let (persist_result, followup_result) = tokio::join!(persist_branch, followup_branch);

        let (interruption_id, followup_warnings) = followup_result;
        report.interruption_id = interruption_id;
        report.warnings.extend(followup_warnings);

        let persisted = persist_result?;
        report.created = persisted.created;
        report.updated = persisted.updated;
        report.unknown_ids = persisted.unknown_ids;
        report.projection = persisted.projection;
        report.warnings.extend(persisted.warnings);

        Ok(report)
    }

    /// One kind's extract-then-reconcile pipeline. Every absorbed failure
    /// becomes a warning; `None` means nothing safe to persist for this
    /// kind.
    async fn reconcile_kind(
        &self,
        enabled: bool,
        kind: WorkItemKind,
        meeting_id: &str,
        transcript: &str,
        window: (DateTime<Utc>, DateTime<Utc>),
    ) -> (Option<ReconciliationPatch>, Vec<String>) {
        if !enabled {
            return (None, Vec::new());
        }

        let mut warnings = Vec::new();
        let kind_label = kind.as_str().to_ascii_lowercase();

        // Malformed output from the non-deterministic extractor is worth a
        // fresh call, so the retry predicate admits it alongside transients;
        // an exhausted budget means "no candidates" for this call only
        let batch = match retry_bounded(
            &self.config.retry,
            "extract",
            |e: &CapabilityError| {
                e.is_transient() || matches!(e, CapabilityError::InvalidResponse { .. })
            },
            || self.extractor.extract(kind, transcript, window),
        )
        .await
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(kind = %kind_label, error = %e, "Extraction failed, treating as no candidates");
                warnings.push(format!("extraction_failed_{}", kind_label));
                return (None, warnings);
            }
        };

        if batch.candidates.is_empty() {
            return (None, warnings);
        }

        // Snapshot fetched once, frozen for the batch. A failed or
        // malformed fetch degrades the batch instead of aborting it; a
        // successful empty fetch is the normal "nothing exists yet" path.
        let snapshot = match self.store.fetch_open_work_items(meeting_id, kind) {
            Ok(items) => Snapshot::Ready(items),
            Err(e) => Snapshot::Degraded {
                reason: e.to_string(),
            },
        };

        let engine = Reconciler::new(self.matcher, self.config.confidence_threshold, self.config.retry);
        match engine.reconcile(kind, &batch, &snapshot).await {
            ReconcileOutcome::Patch(patch) => {
                warnings.extend(patch.warnings.clone());
                (Some(patch), warnings)
            }
            ReconcileOutcome::NoSafeActions {
                warnings: outcome_warnings,
            } => {
                warnings.extend(outcome_warnings);
                (None, warnings)
            }
        }
    }

    /// Mint identities once, write the combined patch with bounded retry,
    /// then mirror the result into the projection surface.
    async fn persist_and_project(
        &self,
        meeting_id: &str,
        patches: &[ReconciliationPatch],
    ) -> Result<PersistBranch> {
        let mut branch = PersistBranch::default();
        if patches.is_empty() {
            return Ok(branch);
        }

        let adds: Vec<WorkItemDraft> = patches.iter().flat_map(|p| p.add.clone()).collect();
        let updates: Vec<WorkItemPatch> = patches.iter().flat_map(|p| p.update.clone()).collect();

        // Minted once per logical batch; retries below re-pass the same ids
        let minted = mint_external_ids(adds);
        let coordinator = PersistenceCoordinator::new(self.store);

        let persisted = retry_bounded(&self.config.retry, "persist", |_| true, || {
            std::future::ready(coordinator.apply(meeting_id, &minted, &updates))
        })
        .await
        .context("Patch application failed")?;

        branch.created = persisted.created;
        branch.updated = persisted.updated;
        branch.unknown_ids = persisted.unknown_ids;

        // Projection runs after the write and never fails the run
        let (add_rows, update_rows) = coordinator.projection_rows(meeting_id, &minted, &updates)?;
        let add_rows_ref: &[crate::adapters::ProjectionRow] = &add_rows;
        let update_rows_ref: &[crate::adapters::ProjectionRow] = &update_rows;
        match retry_bounded(
            &self.config.retry,
            "projection",
            CapabilityError::is_transient,
            || self.projection.sync(add_rows_ref, update_rows_ref),
        )
        .await
        {
            Ok(projection) => {
                for error in &projection.errors {
                    branch.warnings.push(format!("projection: {}", error));
                }
                branch.projection = Some(projection);
            }
            Err(e) => {
                warn!(error = %e, "Projection sync unavailable");
                branch.warnings.push("projection_unavailable".to_string());
            }
        }

        Ok(branch)
    }

    /// Independent approval branch: draft the follow-up and open its
    /// interruption. Failures here never touch the persistence branch.
    async fn open_follow_up(
        &self,
        meeting_id: &str,
        transcript: &str,
        route: &RouteDecision,
    ) -> (Option<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let intent = match route.follow_up_intent.as_deref() {
            Some(intent) => intent,
            None => return (None, warnings),
        };

        let draft = match retry_bounded(
            &self.config.retry,
            "draft-follow-up",
            |e: &CapabilityError| {
                e.is_transient() || matches!(e, CapabilityError::InvalidResponse { .. })
            },
            || self.extractor.draft_follow_up(transcript, intent),
        )
        .await
        {
            Ok(mut draft) => {
                if draft.recipient.is_none() {
                    draft.recipient = route.recipient.clone();
                }
                draft
            }
            Err(e) => {
                warn!(error = %e, "Follow-up drafting failed");
                warnings.push("followup_draft_failed".to_string());
                return (None, warnings);
            }
        };

        let workflow = ApprovalWorkflow::with_window(
            self.store,
            Duration::minutes(self.config.approval_window_minutes),
        );
        match workflow.open(meeting_id, &draft) {
            Ok(interruption) => (Some(interruption.id), warnings),
            Err(e) => {
                warn!(error = %e, "Failed to open approval interruption");
                warnings.push("followup_interruption_failed".to_string());
                (None, warnings)
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
struct PersistBranch {
    created: usize,
    updated: usize,
    unknown_ids: Vec<i64>,
    projection: Option<ProjectionReport>,
    warnings: Vec<String>,
}
