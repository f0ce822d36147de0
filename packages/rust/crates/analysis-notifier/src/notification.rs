//! Analysis-completion notification record.
//!
//! Created by the transport layer from a push-channel frame, consumed by the
//! router, never mutated afterwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ParseError;

/// Wire discriminator for completion events.
pub const ANALYSIS_COMPLETE: &str = "analysis_complete";

/// Completion event for one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Task identifier; the backend keys scans by project id.
    #[serde(rename = "project_id")]
    pub task_id: String,
    /// Scan flavour (`full`, `dependency`, `pattern`, ...).
    pub scan_type: String,
    /// Number of issues reported by the scan.
    pub issues_found: u64,
    /// Server-side completion time, epoch milliseconds.
    pub timestamp: i64,
}

#[derive(Serialize)]
struct WireNotification<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    body: &'a Notification,
}

impl Notification {
    /// Build a notification by hand (tests, polling bridges).
    pub fn new(
        task_id: impl Into<String>,
        scan_type: impl Into<String>,
        issues_found: u64,
        timestamp: i64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            scan_type: scan_type.into(),
            issues_found,
            timestamp,
        }
    }

    /// Parse one push-channel text frame.
    ///
    /// # Errors
    /// Returns [`ParseError::MissingType`] when the frame has no `type`,
    /// [`ParseError::UnsupportedType`] for any type other than
    /// [`ANALYSIS_COMPLETE`], and [`ParseError::Json`] when the body does not
    /// match the record shape.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(raw)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ParseError::MissingType)?;
        if kind != ANALYSIS_COMPLETE {
            return Err(ParseError::UnsupportedType(kind.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize back to the wire shape, `type` included.
    ///
    /// # Errors
    /// Propagates `serde_json` serialization failures.
    pub fn to_wire_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&WireNotification {
            kind: ANALYSIS_COMPLETE,
            body: self,
        })
    }
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] issues={} at={}",
            self.task_id, self.scan_type, self.issues_found, self.timestamp
        )
    }
}
