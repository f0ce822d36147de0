//! Time-boxed polling of the history endpoint.
//!
//! Used when the push channel is down or a notification was already missed.
//! A query failure counts as a non-match for that attempt; exhausting the
//! attempts yields `None`, never an error.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::logging::FailureStreak;
use crate::polling::history::{HistorySource, ScanRecord};

const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
const DEFAULT_POLL_MAX_ATTEMPTS: u32 = 30;
const DEFAULT_FRESHNESS_SECS: u64 = 5 * 60;

/// Polling cadence and freshness window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause between attempts.
    pub interval: Duration,
    /// Attempts made by [`HistoryPoller::poll`].
    pub max_attempts: u32,
    /// Maximum record age accepted as an answer.
    pub freshness: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
            freshness: Duration::from_secs(DEFAULT_FRESHNESS_SECS),
        }
    }
}

/// Polls a [`HistorySource`] for a fresh record of one task.
#[derive(Clone)]
pub struct HistoryPoller {
    source: Arc<dyn HistorySource>,
    config: PollConfig,
}

impl HistoryPoller {
    /// Poller over `source`.
    pub fn new(source: Arc<dyn HistorySource>, config: PollConfig) -> Self {
        Self { source, config }
    }

    /// Configured cadence.
    pub fn config(&self) -> PollConfig {
        self.config
    }

    /// [`Self::poll_until_found`] with the configured attempt budget.
    pub async fn poll(&self, task_id: &str) -> Option<ScanRecord> {
        self.poll_until_found(task_id, self.config.max_attempts).await
    }

    /// Query up to `max_attempts` times, `interval` apart, for a record of
    /// `task_id` younger than the freshness window.
    pub async fn poll_until_found(&self, task_id: &str, max_attempts: u32) -> Option<ScanRecord> {
        tracing::info!(
            event = "notifier.poll.started",
            task_id,
            max_attempts,
            interval_ms = u64::try_from(self.config.interval.as_millis()).unwrap_or(u64::MAX),
            "falling back to history polling"
        );
        let window = TimeDelta::from_std(self.config.freshness).unwrap_or(TimeDelta::MAX);
        let mut failures = FailureStreak::default();

        for attempt in 1..=max_attempts {
            match self.source.fetch_history().await {
                Ok(records) => {
                    failures.reset();
                    if let Some(record) = find_fresh(&records, task_id, Utc::now(), window) {
                        tracing::info!(
                            event = "notifier.poll.found",
                            task_id,
                            attempt,
                            record_id = %record.id,
                            issues_found = record.issues_found,
                            "fresh history record found"
                        );
                        return Some(record.clone());
                    }
                    let stale = records.iter().any(|record| record.project_id == task_id);
                    tracing::debug!(
                        event = "notifier.poll.miss",
                        task_id,
                        attempt,
                        stale,
                        "no fresh history record yet"
                    );
                }
                Err(error) => {
                    let loud = failures.record();
                    let failure_streak = failures.len();
                    if loud {
                        tracing::warn!(
                            event = "notifier.poll.query_failed",
                            task_id,
                            attempt,
                            failure_streak,
                            error = %error,
                            "history query failed; treating as no match"
                        );
                    } else {
                        tracing::trace!(
                            event = "notifier.poll.query_failed",
                            task_id,
                            attempt,
                            failure_streak,
                            error = %error,
                            "history query failed; treating as no match"
                        );
                    }
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(self.config.interval).await;
            }
        }

        tracing::info!(
            event = "notifier.poll.exhausted",
            task_id,
            max_attempts,
            "history polling gave up without a fresh record"
        );
        None
    }
}

/// Newest record for `task_id` whose age at `now` is under `window`.
///
/// Records dated slightly in the future (clock skew) count as fresh.
pub fn find_fresh<'a>(
    records: &'a [ScanRecord],
    task_id: &str,
    now: DateTime<Utc>,
    window: TimeDelta,
) -> Option<&'a ScanRecord> {
    records
        .iter()
        .filter(|record| record.project_id == task_id)
        .filter(|record| now.signed_duration_since(record.created_at) < window)
        .max_by_key(|record| record.created_at)
}
