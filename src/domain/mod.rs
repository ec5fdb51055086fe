//! Core data structures shared across the pipeline.
//!
//! Everything here is plain data: speech events and transcript segments,
//! work items with their reconciliation patches, approval interruptions,
//! and the per-meeting lifecycle record.

pub mod approval;
pub mod meeting;
pub mod speech;
pub mod work_item;

pub use approval::{ApprovalInterruption, ApprovalStatus, EmailDraft, EmailPayload, FollowUpDraft};
pub use meeting::{Meeting, MeetingStatus};
pub use speech::{RawSpeechEvent, TranscriptSegment};
pub use work_item::{
    Candidate, ExtractionBatch, ReconciliationPatch, WorkItem, WorkItemDraft, WorkItemKind,
    WorkItemPatch, WorkItemStatus,
};
