//! Scan-history collaborator: record shape, source trait, HTTP client.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

const DEFAULT_API_BASE: &str = "http://localhost:8080/api";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const HISTORY_PATH: &str = "analysis";

/// One historical scan as returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Record id.
    pub id: String,
    /// Task identifier the scan ran for.
    pub project_id: String,
    /// Display name of the project.
    #[serde(default, deserialize_with = "null_as_default")]
    pub project_name: String,
    /// Scan flavour.
    #[serde(default, deserialize_with = "null_as_default")]
    pub scan_type: String,
    /// Opaque scan payload.
    #[serde(default)]
    pub scan_result: Value,
    /// Issues reported by the scan; `null` reads as 0.
    #[serde(default, deserialize_with = "null_as_default")]
    pub issues_found: u64,
    /// Record creation time. RFC 3339 on the wire; offset-less timestamps
    /// are taken as UTC.
    #[serde(deserialize_with = "utc_timestamp")]
    pub created_at: DateTime<Utc>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn utc_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|naive| naive.and_utc())
        .map_err(|error| serde::de::Error::custom(format!("created_at `{raw}`: {error}")))
}

/// Decode history rows one by one; rows that do not fit [`ScanRecord`] are
/// skipped so one bad row cannot hide the rest.
fn decode_history_rows(rows: Vec<Value>) -> Vec<ScanRecord> {
    let total = rows.len();
    let records: Vec<ScanRecord> = rows
        .into_iter()
        .enumerate()
        .filter_map(|(index, row)| match serde_json::from_value::<ScanRecord>(row) {
            Ok(record) => Some(record),
            Err(error) => {
                tracing::debug!(
                    event = "notifier.history.row_skipped",
                    index,
                    error = %error,
                    "history row does not match record shape; skipping"
                );
                None
            }
        })
        .collect();
    if records.len() < total {
        tracing::debug!(
            event = "notifier.history.rows_skipped",
            total,
            skipped = total - records.len(),
            "history response contained undecodable rows"
        );
    }
    records
}

/// Response envelope used by the analysis API.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Payload on success.
    pub data: Option<T>,
    /// Server-side error message on failure.
    pub error: Option<String>,
}

/// Read-only access to prior scan records.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch the current history snapshot.
    async fn fetch_history(&self) -> Result<Vec<ScanRecord>>;
}

/// HTTP history endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHistoryConfig {
    /// API root, e.g. `http://localhost:8080/api`.
    pub api_base: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for HttpHistoryConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// `GET {api_base}/analysis` over reqwest.
#[derive(Debug, Clone)]
pub struct HttpHistoryClient {
    client: reqwest::Client,
    history_url: String,
}

impl HttpHistoryClient {
    /// Build the client.
    ///
    /// # Errors
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn new(config: &HttpHistoryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| anyhow!("reqwest client: {e}"))?;
        let history_url = format!(
            "{}/{HISTORY_PATH}",
            config.api_base.trim_end_matches('/')
        );
        Ok(Self {
            client,
            history_url,
        })
    }

    /// Fully-qualified history URL.
    pub fn history_url(&self) -> &str {
        &self.history_url
    }
}

#[async_trait]
impl HistorySource for HttpHistoryClient {
    async fn fetch_history(&self) -> Result<Vec<ScanRecord>> {
        let response = self
            .client
            .get(&self.history_url)
            .send()
            .await
            .with_context(|| format!("GET {}", self.history_url))?
            .error_for_status()
            .with_context(|| format!("GET {} returned error status", self.history_url))?;
        let envelope: ApiResponse<Vec<Value>> = response
            .json()
            .await
            .context("decode analysis history response")?;
        if !envelope.success {
            return Err(anyhow!(
                envelope
                    .error
                    .unwrap_or_else(|| "failed to fetch analysis history".to_string())
            ));
        }
        Ok(decode_history_rows(envelope.data.unwrap_or_default()))
    }
}
