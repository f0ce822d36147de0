use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "analysis-notifier")]
#[command(about = "Listen for analysis-completion notifications; wait on one task with polling fallback.")]
pub(crate) struct Cli {
    /// Override config directory (user settings live under `<conf>/analysis-notifier/`).
    #[arg(long, global = true)]
    pub(crate) conf: Option<PathBuf>,

    /// Debug-level logs (ignored when `RUST_LOG` is set).
    #[arg(long, global = true)]
    pub(crate) verbose: bool,

    /// Push-channel URL (overrides settings).
    #[arg(long, global = true)]
    pub(crate) url: Option<String>,

    /// History API base (overrides settings and `ANALYSIS_API_BASE_URL`).
    #[arg(long, global = true)]
    pub(crate) api_base: Option<String>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Print every completion notification as a JSON line until Ctrl+C.
    Watch,
    /// Wait for one task; fall back to history polling on timeout.
    Wait {
        /// Task (project) id to wait for.
        project_id: String,

        /// Push wait deadline in milliseconds (default: settings, else 60000).
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Do not poll history after the push wait times out.
        #[arg(long)]
        no_poll: bool,
    },
    /// Poll history for a fresh record of one task.
    Poll {
        /// Task (project) id to look for.
        project_id: String,

        /// Attempts before giving up (default: settings, else 30).
        #[arg(long)]
        max_attempts: Option<u32>,
    },
}
