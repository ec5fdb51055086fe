//! recap - meeting-transcript reconciliation pipeline
//!
//! Turns captured meeting captions into durable, deduplicated work records
//! (action items, blockers) and a human-approved follow-up email, without
//! producing duplicate records or sending unapproved messages across
//! retries.
//!
//! # Architecture
//!
//! - Caption events fold into speaker-attributed transcript segments
//! - An external extraction capability proposes candidate work items
//! - The reconciliation engine decides ADD / UPDATE / SKIP per candidate
//!   against a frozen snapshot of the persisted set
//! - The persistence coordinator mints stable external identifiers and
//!   applies the patch exactly once per run
//! - Projection sync mirrors the result into an external tracker
//! - Outbound follow-up email is gated behind a time-boxed approval
//!   state machine
//!
//! # Modules
//!
//! - `adapters`: capability boundaries (extraction, matching, projection,
//!   email) as async traits with HTTP clients
//! - `approval`: the PENDING → APPROVED/REJECTED/EXPIRED state machine
//! - `core`: runner, retry helper, per-meeting lock
//! - `domain`: data structures
//! - `persist`: identifier minting and idempotent patch application
//! - `reconcile`: the deterministic reconciliation engine
//! - `store`: SQLite source of truth
//! - `transcript`: caption aggregation
//!
//! # Usage
//!
//! ```bash
//! # Ingest captured caption events
//! recap ingest meet-42 --input captions.jsonl
//!
//! # Run the pipeline
//! recap process meet-42
//!
//! # Act on the drafted follow-up
//! recap pending
//! recap approve <interruption-id> --by amit
//! ```

pub mod adapters;
pub mod approval;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod persist;
pub mod reconcile;
pub mod store;
pub mod transcript;

// Re-export main types at crate root for convenience
pub use approval::{ApprovalError, ApprovalWorkflow, DraftEdit};
pub use self::core::{MeetingRunner, RunReport, RunnerConfig};
pub use domain::{
    ApprovalInterruption, ApprovalStatus, Candidate, EmailDraft, EmailPayload, ExtractionBatch,
    FollowUpDraft, Meeting, MeetingStatus, RawSpeechEvent, ReconciliationPatch, TranscriptSegment,
    WorkItem, WorkItemDraft, WorkItemKind, WorkItemPatch, WorkItemStatus,
};
pub use persist::{mint_external_ids, MintedAdd, PersistenceCoordinator, PersistReport};
pub use reconcile::{ReconcileOutcome, Reconciler, Snapshot};
pub use store::Store;
pub use transcript::{render_transcript, CaptionAggregator};
