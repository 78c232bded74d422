//! accolade: achievement workflow with cross-store consistency.
//!
//! A student claims an achievement, edits it as a draft, and submits it; a
//! verifier accepts or rejects it. The content and the authoritative status live
//! in two independent stores that never share a transaction.
//!
//! # Architecture
//!
//! ## Two Stores
//!
//! - **Document Store** (`documents.db`): schemaless JSON bodies, partial
//!   updates, tombstones instead of deletes
//! - **Reference Store** (`references.db`): one status row per achievement; the
//!   single source of truth when the stores disagree
//!
//! ## The Coordinator
//!
//! All mutations route through [`plugins::coordinator::Coordinator`] for:
//! - Ownership and permission guards
//! - Conditional status transitions (`draft → submitted → verified | rejected`,
//!   `draft → deleted`)
//! - Compensation when a draft is half-created
//! - Best-effort audit entries in the activity log
//!
//! Every operation runs under a [`core::deadline::Deadline`]; a store call that
//! cannot finish in time fails with `Timeout` and is not retried.
//!
//! # Examples
//!
//! ```bash
//! accolade init
//! accolade create --as usr_ana --title "Regional Robotics Cup" --type competition --level national
//! accolade submit ach_01J... --as usr_ana
//! accolade verify ach_01J... --as usr_vic
//! accolade --format json history ach_01J...
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: Shared primitives (errors, deadlines, SQLite access, config, logging)
//! - [`plugins`]: Stores, audit recorder, directory, coordinator, report

pub mod core;
pub mod plugins;

mod cli;

use crate::cli::{Cli, Command, OutputFormat};
use crate::core::config::Config;
use crate::core::deadline::Deadline;
use crate::core::error::AccoladeError;
use crate::core::store::Store;
use crate::core::{logging, time};
use crate::plugins::coordinator::Coordinator;
use crate::plugins::directory::{Actor, Directory};
use crate::plugins::documents::{AchievementContent, Attachment, DocumentPatch};
use crate::plugins::references::AchievementReference;
use crate::plugins::report;
use clap::Parser;
use colored::Colorize;
use serde_json::{Map, Value as JsonValue, json};
use std::sync::Arc;
use tracing::{error, info};

pub fn run() -> Result<(), AccoladeError> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?
        .with_overrides(cli.data_dir.clone(), cli.timeout_secs)?;
    logging::init(&config.logging);

    let store = Store::new(config.data_dir.clone());
    let directory = Directory::from_config(&config.directory);
    let ctx = Deadline::new(config.op_timeout());
    let coordinator = Coordinator::open(&store, Arc::new(directory.clone()), &ctx)?;

    let cmd = cli.command.name();
    let (extra, text) = dispatch(&coordinator, &directory, &ctx, &store, cli.command)
        .inspect_err(|err| {
            if err.is_terminal() {
                info!(cmd, error = %err, "request refused");
            } else {
                error!(cmd, error = %err, "command failed");
            }
        })?;
    match cli.format {
        OutputFormat::Json => {
            let envelope = time::command_envelope(cmd, "ok", extra);
            println!("{}", serde_json::to_string_pretty(&envelope)?);
        }
        OutputFormat::Text => println!("{}", text),
    }
    Ok(())
}

fn parse_object(raw: &str, what: &str) -> Result<Map<String, JsonValue>, AccoladeError> {
    match serde_json::from_str::<JsonValue>(raw) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err(AccoladeError::ValidationError(format!("{} must be a JSON object", what))),
        Err(e) => Err(AccoladeError::ValidationError(format!("{}: {}", what, e))),
    }
}

fn reference_line(r: &AchievementReference) -> String {
    format!(
        "{}  {:<9}  {}  {}",
        r.id.bold(),
        r.status.to_string().cyan(),
        r.student_id,
        time::to_db(&r.created_at).dimmed()
    )
}

fn done(verb: &str, id: &str) -> String {
    format!("{} {}", verb.green().bold(), id)
}

fn dispatch(
    coordinator: &Coordinator,
    directory: &Directory,
    ctx: &Deadline,
    store: &Store,
    command: Command,
) -> Result<(JsonValue, String), AccoladeError> {
    let actor = |user: &str| -> Result<Actor, AccoladeError> { directory.actor(user) };

    match command {
        Command::Init => Ok((
            json!({"data_dir": store.root().display().to_string()}),
            format!("{} {}", "initialized".green().bold(), store.root().display()),
        )),
        Command::Create(args) => {
            let details = match args.details.as_deref() {
                Some(raw) => parse_object(raw, "--details")?,
                None => Map::new(),
            };
            let content = AchievementContent {
                title: args.title,
                achievement_type: args.achievement_type,
                category: args.category,
                level: args.level,
                details,
                tags: args.tags,
                attachments: Vec::new(),
            };
            let reference = coordinator.create_draft(ctx, &actor(&args.actor.actor)?, content)?;
            let text = done("created", &reference.id);
            Ok((json!({"reference": reference}), text))
        }
        Command::Update(args) => {
            let patch = DocumentPatch::from_fields(&parse_object(&args.fields, "--fields")?)?;
            coordinator.update_draft(ctx, &args.id, &actor(&args.actor.actor)?, &patch)?;
            Ok((json!({"id": args.id, "fields": patch}), done("updated", &args.id)))
        }
        Command::Attach(args) => {
            let attachment = Attachment {
                file_name: args.file_name,
                url: args.url,
                mime_type: args.mime_type,
                size_bytes: args.size_bytes,
            };
            coordinator.add_attachment(ctx, &args.id, &actor(&args.actor.actor)?, &attachment)?;
            Ok((
                json!({"id": args.id, "attachment": attachment}),
                done("attached", &args.id),
            ))
        }
        Command::Submit(args) => {
            coordinator.submit(ctx, &args.id, &actor(&args.actor.actor)?)?;
            Ok((json!({"id": args.id}), done("submitted", &args.id)))
        }
        Command::Verify(args) => {
            coordinator.verify(ctx, &args.id, &actor(&args.actor.actor)?)?;
            Ok((json!({"id": args.id}), done("verified", &args.id)))
        }
        Command::Reject(args) => {
            coordinator.reject(ctx, &args.id, &actor(&args.actor.actor)?, &args.note)?;
            Ok((json!({"id": args.id}), done("rejected", &args.id)))
        }
        Command::Delete(args) => {
            coordinator.delete_draft(ctx, &args.id, &actor(&args.actor.actor)?)?;
            Ok((json!({"id": args.id}), done("deleted", &args.id)))
        }
        Command::Purge(args) => {
            coordinator.purge(ctx, &args.id, &actor(&args.actor.actor)?)?;
            Ok((json!({"id": args.id}), done("purged", &args.id)))
        }
        Command::Show { id } => {
            let (document, reference) = coordinator.get_detail(ctx, &id)?;
            let mut text = reference_line(&reference);
            if let Some(doc) = &document {
                text.push_str(&format!(
                    "\n  {} ({}, {})",
                    doc.content.title.bold(),
                    doc.content.achievement_type,
                    doc.content.level
                ));
                for a in &doc.content.attachments {
                    text.push_str(&format!("\n  - {} [{}] {}", a.file_name, a.mime_type, a.url));
                }
            }
            if let Some(note) = &reference.rejection_note {
                text.push_str(&format!("\n  {} {}", "note:".yellow(), note));
            }
            Ok((json!({"reference": reference, "document": document}), text))
        }
        Command::List { student } => {
            let refs = match student.as_deref() {
                Some(s) => coordinator.list_by_student(ctx, s)?,
                None => coordinator.list_all(ctx)?,
            };
            let text = refs.iter().map(reference_line).collect::<Vec<_>>().join("\n");
            Ok((json!({"count": refs.len(), "references": refs}), text))
        }
        Command::Docs { student, page } => {
            let docs = coordinator.list_documents(ctx, &student, page.limit, page.offset)?;
            let text = docs
                .iter()
                .map(|d| format!("{}  {}", d.key.to_string().bold(), d.content.title))
                .collect::<Vec<_>>()
                .join("\n");
            Ok((json!({"count": docs.len(), "documents": docs}), text))
        }
        Command::History { id, page } => {
            let entries = coordinator.history(ctx, &id, page.limit, page.offset)?;
            let text = entries
                .iter()
                .map(|e| {
                    format!(
                        "{}  {:<14}  {}",
                        time::to_db(&e.created_at).dimmed(),
                        e.event_type.to_string().cyan(),
                        e.actor_id.as_deref().unwrap_or("-")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            Ok((json!({"count": entries.len(), "entries": entries}), text))
        }
        Command::Stats { student } => {
            let refs = coordinator.list_all(ctx)?;
            match student {
                Some(s) => {
                    let summary = report::summarize_student(&s, &refs);
                    let text = format!(
                        "{}: {} total, {} draft, {} submitted, {} verified, {} rejected, verification rate {:.1}%",
                        summary.student_id.bold(),
                        summary.total,
                        summary.draft,
                        summary.submitted,
                        summary.verified,
                        summary.rejected,
                        summary.verification_rate * 100.0
                    );
                    Ok((json!({"summary": summary}), text))
                }
                None => {
                    let summary = report::summarize(&refs);
                    let mut text = format!(
                        "{} achievements, verification rate {:.1}%",
                        summary.total,
                        summary.verification_rate * 100.0
                    );
                    for (status, count) in &summary.by_status {
                        text.push_str(&format!("\n  {:<9} {}", status.to_string(), count));
                    }
                    for top in &summary.top_students {
                        text.push_str(&format!("\n  {} {}", top.student_id.bold(), top.total));
                    }
                    Ok((json!({"summary": summary}), text))
                }
            }
        }
    }
}
