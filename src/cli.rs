//! CLI struct definitions for the accolade command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "accolade",
    version = env!("CARGO_PKG_VERSION"),
    about = "Track student achievement claims from draft through verification, keeping document and reference stores consistent."
)]
pub(crate) struct Cli {
    /// Path to accolade.toml (defaults to ./accolade.toml when present).
    #[clap(long, global = true, env = "ACCOLADE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Data directory holding references.db and documents.db.
    #[clap(long, global = true, env = "ACCOLADE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
    /// Output format.
    #[clap(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Per-operation time budget in seconds.
    #[clap(long, global = true, env = "ACCOLADE_OP_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ActorArg {
    /// User id of the caller, resolved through the configured directory.
    #[clap(long = "as", env = "ACCOLADE_ACTOR")]
    pub actor: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct CreateCli {
    #[clap(flatten)]
    pub actor: ActorArg,
    #[clap(long)]
    pub title: String,
    /// Achievement type, e.g. competition, publication, organization.
    #[clap(long = "type")]
    pub achievement_type: String,
    #[clap(long, default_value = "")]
    pub category: String,
    /// local, national, international, ...
    #[clap(long, default_value = "")]
    pub level: String,
    /// Repeatable.
    #[clap(long = "tag")]
    pub tags: Vec<String>,
    /// Free-form details as a JSON object.
    #[clap(long)]
    pub details: Option<String>,
}

#[derive(clap::Args, Debug)]
pub(crate) struct UpdateCli {
    pub id: String,
    #[clap(flatten)]
    pub actor: ActorArg,
    /// JSON object of fields to change (title, type, category, level, details, tags).
    #[clap(long)]
    pub fields: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct AttachCli {
    pub id: String,
    #[clap(flatten)]
    pub actor: ActorArg,
    #[clap(long)]
    pub file_name: String,
    #[clap(long)]
    pub url: String,
    #[clap(long)]
    pub mime_type: String,
    #[clap(long)]
    pub size_bytes: u64,
}

#[derive(clap::Args, Debug)]
pub(crate) struct RefActorCli {
    pub id: String,
    #[clap(flatten)]
    pub actor: ActorArg,
}

#[derive(clap::Args, Debug)]
pub(crate) struct RejectCli {
    pub id: String,
    #[clap(flatten)]
    pub actor: ActorArg,
    #[clap(long)]
    pub note: String,
}

#[derive(clap::Args, Debug)]
pub(crate) struct PageCli {
    #[clap(long, default_value_t = 0)]
    pub limit: i64,
    #[clap(long, default_value_t = 0)]
    pub offset: i64,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create both databases and their schemas.
    Init,
    /// Create a draft achievement for the caller's student profile.
    Create(CreateCli),
    /// Change fields of a draft.
    Update(UpdateCli),
    /// Append attachment metadata to a draft.
    Attach(AttachCli),
    /// Submit a draft for verification.
    Submit(RefActorCli),
    /// Verify a submitted achievement.
    Verify(RefActorCli),
    /// Reject a submitted achievement with a note.
    Reject(RejectCli),
    /// Delete a draft (soft delete).
    Delete(RefActorCli),
    /// Physically remove a deleted reference.
    Purge(RefActorCli),
    /// Show a reference and its document.
    Show { id: String },
    /// List references, newest first.
    List {
        #[clap(long)]
        student: Option<String>,
    },
    /// List a student's live documents.
    Docs {
        #[clap(long)]
        student: String,
        #[clap(flatten)]
        page: PageCli,
    },
    /// Audit history of a reference, newest first.
    History {
        id: String,
        #[clap(flatten)]
        page: PageCli,
    },
    /// Achievement statistics.
    Stats {
        #[clap(long)]
        student: Option<String>,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Init => "init",
            Command::Create(_) => "create",
            Command::Update(_) => "update",
            Command::Attach(_) => "attach",
            Command::Submit(_) => "submit",
            Command::Verify(_) => "verify",
            Command::Reject(_) => "reject",
            Command::Delete(_) => "delete",
            Command::Purge(_) => "purge",
            Command::Show { .. } => "show",
            Command::List { .. } => "list",
            Command::Docs { .. } => "docs",
            Command::History { .. } => "history",
            Command::Stats { .. } => "stats",
        }
    }
}
