//! analysis-notifier CLI: watch the push channel, or wait on one task.
//!
//! Settings come from `packages/conf/notifier.yaml` merged with the user file
//! (override the directory with `--conf <dir>`).
//!
//! Logging: set `RUST_LOG=analysis_notifier=info` (or `warn`, `debug`) to see logs on stderr.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use analysis_notifier::{
    AnalysisNotifier, Completion, HistoryPoller, HttpHistoryClient, Notification,
    NotifierSettings, ScanRecord, load_notifier_settings,
};

use crate::cli::{Cli, Command};

const NOT_FOUND_EXIT_CODE: u8 = 2;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut settings = load_notifier_settings(cli.conf.as_deref());
    if let Some(url) = cli.url.clone() {
        settings.push.url = Some(url);
    }

    // RUST_LOG overrides; --verbose => debug; else info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose {
            "analysis_notifier=debug"
        } else {
            "analysis_notifier=info"
        })
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    match cli.command {
        Command::Watch => run_watch(&settings).await,
        Command::Wait {
            project_id,
            timeout_ms,
            no_poll,
        } => {
            let timeout = timeout_ms.map_or_else(|| settings.wait_timeout(), Duration::from_millis);
            let poller = if no_poll {
                None
            } else {
                Some(build_poller(&settings, cli.api_base.as_deref())?)
            };
            run_wait(&settings, &project_id, timeout, poller.as_ref()).await
        }
        Command::Poll {
            project_id,
            max_attempts,
        } => {
            let poller = build_poller(&settings, cli.api_base.as_deref())?;
            let attempts = max_attempts.unwrap_or(poller.config().max_attempts).max(1);
            match poller.poll_until_found(&project_id, attempts).await {
                Some(record) => {
                    print_record(&record)?;
                    Ok(ExitCode::SUCCESS)
                }
                None => Ok(ExitCode::from(NOT_FOUND_EXIT_CODE)),
            }
        }
    }
}

fn build_poller(settings: &NotifierSettings, api_base: Option<&str>) -> Result<HistoryPoller> {
    let mut history = settings.history_config();
    if let Some(api_base) = api_base {
        history.api_base = api_base.to_string();
    }
    let client = HttpHistoryClient::new(&history)?;
    tracing::debug!(
        event = "notifier.cli.history",
        url = client.history_url(),
        "history endpoint resolved"
    );
    Ok(HistoryPoller::new(Arc::new(client), settings.poll_config()))
}

async fn run_watch(settings: &NotifierSettings) -> Result<ExitCode> {
    let notifier = AnalysisNotifier::from_settings(settings);
    let mut rx = notifier.subscribe();
    notifier.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = rx.recv() => match received {
                Ok(notification) => print_notification(&notification)?,
                Err(RecvError::Lagged(skipped)) => tracing::warn!(
                    event = "notifier.cli.lagged",
                    skipped,
                    "watch output fell behind; notifications skipped"
                ),
                Err(RecvError::Closed) => break,
            },
        }
    }
    notifier.disconnect();
    Ok(ExitCode::SUCCESS)
}

async fn run_wait(
    settings: &NotifierSettings,
    project_id: &str,
    timeout: Duration,
    poller: Option<&HistoryPoller>,
) -> Result<ExitCode> {
    let notifier = AnalysisNotifier::from_settings(settings);
    notifier.start();

    let completion = match poller {
        Some(poller) => notifier.wait_or_poll(project_id, timeout, poller).await?,
        None => match notifier.wait_for(project_id, timeout).await {
            Ok(notification) => Completion::Pushed(notification),
            Err(analysis_notifier::WaitError::Timeout { .. }) => Completion::NotFound,
            Err(error) => return Err(error.into()),
        },
    };
    notifier.disconnect();

    match completion {
        Completion::Pushed(notification) => {
            print_notification(&notification)?;
            Ok(ExitCode::SUCCESS)
        }
        Completion::Polled(record) => {
            print_record(&record)?;
            Ok(ExitCode::SUCCESS)
        }
        Completion::NotFound => {
            tracing::warn!(
                event = "notifier.cli.not_found",
                project_id,
                "no completion for task"
            );
            Ok(ExitCode::from(NOT_FOUND_EXIT_CODE))
        }
    }
}

fn print_notification(notification: &Notification) -> Result<()> {
    println!("{}", notification.to_wire_json()?);
    Ok(())
}

fn print_record(record: &ScanRecord) -> Result<()> {
    println!("{}", serde_json::to_string(record)?);
    Ok(())
}
