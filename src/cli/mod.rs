//! Command-line interface for recap.
//!
//! Provides commands for ingesting captured caption events, running the
//! reconciliation pipeline, inspecting work items, and acting on pending
//! follow-up approvals.

use std::io::{self, BufRead};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::adapters::{HttpEmailSender, HttpExtractor, HttpIntentMatcher, HttpProjectionSink};
use crate::approval::{ApprovalWorkflow, DraftEdit};
use crate::config;
use crate::core::{MeetingRunner, RunnerConfig};
use crate::domain::RawSpeechEvent;
use crate::store::Store;

/// recap - meeting-transcript reconciliation pipeline
#[derive(Parser, Debug)]
#[command(name = "recap")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest captured caption events (JSONL) for a meeting
    Ingest {
        /// Meeting identifier
        meeting_id: String,

        /// Input file with one caption event per line (stdin if omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Meeting title
        #[arg(long)]
        title: Option<String>,
    },

    /// Run the reconciliation pipeline for a captured meeting
    Process {
        /// Meeting identifier
        meeting_id: String,
    },

    /// List work items for a meeting
    Items {
        /// Meeting identifier
        meeting_id: String,
    },

    /// List follow-ups awaiting approval
    Pending,

    /// Approve a pending follow-up and send it
    Approve {
        /// Interruption identifier
        interruption_id: String,

        /// Who is approving
        #[arg(long)]
        by: String,
    },

    /// Reject a pending follow-up
    Reject {
        /// Interruption identifier
        interruption_id: String,

        /// Who is rejecting
        #[arg(long)]
        by: String,
    },

    /// Edit a pending follow-up (only the human overlay is touched)
    Edit {
        /// Interruption identifier
        interruption_id: String,

        #[arg(long)]
        recipient: Option<String>,

        #[arg(long)]
        subject: Option<String>,

        #[arg(long)]
        body: Option<String>,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// One caption event as captured upstream; the meeting id comes from the
/// command line.
#[derive(Debug, Deserialize)]
struct IngestLine {
    sequence_number: i64,
    #[serde(default)]
    speaker_label: Option<String>,
    text: String,
    observed_at: DateTime<Utc>,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Ingest {
                meeting_id,
                input,
                title,
            } => ingest(&meeting_id, input, title.as_deref()),
            Commands::Process { meeting_id } => process(&meeting_id).await,
            Commands::Items { meeting_id } => items(&meeting_id),
            Commands::Pending => pending(),
            Commands::Approve {
                interruption_id,
                by,
            } => approve(&interruption_id, &by).await,
            Commands::Reject {
                interruption_id,
                by,
            } => reject(&interruption_id, &by),
            Commands::Edit {
                interruption_id,
                recipient,
                subject,
                body,
            } => edit(&interruption_id, recipient, subject, body),
            Commands::Config => show_config(),
        }
    }
}

fn open_store() -> Result<Store> {
    let config = config::config()?;
    Store::open(&config.db_path())
}

fn read_lines(input: Option<PathBuf>) -> Result<Vec<String>> {
    match input {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read input file: {}", path.display()))?;
            Ok(content.lines().map(String::from).collect())
        }
        None => {
            let stdin = io::stdin();
            let mut lines = Vec::new();
            for line in stdin.lock().lines() {
                lines.push(line.context("Failed to read stdin")?);
            }
            Ok(lines)
        }
    }
}

fn ingest(meeting_id: &str, input: Option<PathBuf>, title: Option<&str>) -> Result<()> {
    let store = open_store()?;
    store.upsert_meeting(meeting_id, title)?;

    let mut events = Vec::new();
    for (line_no, line) in read_lines(input)?.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: IngestLine = serde_json::from_str(line)
            .with_context(|| format!("Malformed caption event on line {}", line_no + 1))?;

        events.push(RawSpeechEvent {
            meeting_id: meeting_id.to_string(),
            sequence_number: parsed.sequence_number,
            speaker_label: parsed.speaker_label,
            text: parsed.text,
            observed_at: parsed.observed_at,
        });
    }

    let inserted = store.insert_caption_events(&events)?;
    println!(
        "Ingested {} caption events for meeting '{}' ({} new)",
        events.len(),
        meeting_id,
        inserted
    );
    Ok(())
}

async fn process(meeting_id: &str) -> Result<()> {
    let config = config::config()?;
    let store = open_store()?;

    let extractor = HttpExtractor::new(config.capabilities.extractor_url.clone());
    let matcher = HttpIntentMatcher::new(config.capabilities.matcher_url.clone());
    let projection = HttpProjectionSink::new(config.capabilities.projection_url.clone());

    let runner = MeetingRunner::new(
        &store,
        &extractor,
        &matcher,
        &projection,
        RunnerConfig {
            confidence_threshold: config.thresholds.confidence,
            approval_window_minutes: config.thresholds.approval_window_minutes,
            retry: config.thresholds.retry,
        },
    );

    let report = runner.run(meeting_id, &config.locks_dir()).await?;

    println!("Meeting:   {}", report.meeting_id);
    println!("Segments:  {}", report.segment_count);
    println!("Created:   {}", report.created);
    println!("Updated:   {}", report.updated);
    if let Some(projection) = &report.projection {
        println!(
            "Projected: {} created, {} updated",
            projection.created, projection.updated
        );
    }
    if let Some(interruption_id) = &report.interruption_id {
        println!("Follow-up awaiting approval: {}", interruption_id);
    }
    if !report.warnings.is_empty() {
        println!("Warnings:");
        for warning in &report.warnings {
            println!("  - {}", warning);
        }
    }
    Ok(())
}

fn items(meeting_id: &str) -> Result<()> {
    let store = open_store()?;
    let items = store.list_work_items(meeting_id)?;

    if items.is_empty() {
        println!("No work items for meeting '{}'", meeting_id);
        return Ok(());
    }

    for item in items {
        let owner = item.owner.as_deref().unwrap_or("-");
        let due = item
            .due_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "[{}] {} {} (owner: {}, due: {}, confidence: {:.2}, {})",
            item.kind.as_str(),
            item.external_id,
            item.title,
            owner,
            due,
            item.confidence,
            item.status.as_str(),
        );
    }
    Ok(())
}

fn pending() -> Result<()> {
    let store = open_store()?;
    let pending = store.list_pending_interruptions()?;

    if pending.is_empty() {
        println!("No follow-ups awaiting approval");
        return Ok(());
    }

    for interruption in pending {
        let recipient = interruption.recipient.as_deref().unwrap_or("(unconfirmed)");
        println!(
            "{}  meeting={} to={} subject={:?} expires={}",
            interruption.id,
            interruption.meeting_id,
            recipient,
            interruption.subject,
            interruption.expires_at,
        );
    }
    Ok(())
}

fn approval_workflow(store: &Store) -> Result<ApprovalWorkflow<'_>> {
    let config = config::config()?;
    Ok(ApprovalWorkflow::with_window(
        store,
        Duration::minutes(config.thresholds.approval_window_minutes),
    ))
}

async fn approve(interruption_id: &str, by: &str) -> Result<()> {
    let config = config::config()?;
    let store = open_store()?;
    let workflow = approval_workflow(&store)?;
    let sender = HttpEmailSender::new(config.capabilities.email_url.clone());

    let approved = workflow.approve(interruption_id, by, &sender).await?;
    println!(
        "Sent follow-up to {} (subject: {:?})",
        approved.payload.recipient, approved.payload.subject
    );
    if let Some(message_id) = approved.outcome.provider_message_id {
        println!("Provider message id: {}", message_id);
    }
    Ok(())
}

fn reject(interruption_id: &str, by: &str) -> Result<()> {
    let store = open_store()?;
    let workflow = approval_workflow(&store)?;
    workflow.reject(interruption_id, by)?;
    println!("Follow-up {} rejected", interruption_id);
    Ok(())
}

fn edit(
    interruption_id: &str,
    recipient: Option<String>,
    subject: Option<String>,
    body: Option<String>,
) -> Result<()> {
    let store = open_store()?;
    let workflow = approval_workflow(&store)?;

    workflow.edit(
        interruption_id,
        &DraftEdit {
            recipient,
            subject,
            body,
        },
    )?;
    println!("Follow-up {} updated", interruption_id);
    Ok(())
}

fn show_config() -> Result<()> {
    let config = config::config()?;

    println!("home:       {}", config.home.display());
    println!("database:   {}", config.db_path().display());
    match &config.config_file {
        Some(path) => println!("config:     {}", path.display()),
        None => println!("config:     (defaults)"),
    }
    println!("confidence: {}", config.thresholds.confidence);
    println!(
        "approval:   {} minutes",
        config.thresholds.approval_window_minutes
    );
    println!("retries:    {}", config.thresholds.retry.max_attempts);
    println!("extractor:  {}", config.capabilities.extractor_url);
    println!("matcher:    {}", config.capabilities.matcher_url);
    println!("projection: {}", config.capabilities.projection_url);
    println!("email:      {}", config.capabilities.email_url);
    Ok(())
}
