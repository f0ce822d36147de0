#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;

use analysis_notifier::{
    HistorySource, NotificationRouter, PushConnector, PushStream, ScanRecord, TransportError,
};

pub type FrameSender = mpsc::UnboundedSender<Result<String, TransportError>>;

pub enum Step {
    Fail,
    Accept,
}

/// Push connector driven by a script. Once the script runs out every connect fails.
#[derive(Default)]
pub struct ScriptedConnector {
    steps: Mutex<VecDeque<Step>>,
    connects: Mutex<Vec<Instant>>,
    open_channels: Mutex<Vec<FrameSender>>,
}

impl ScriptedConnector {
    pub fn always_failing() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        })
    }

    pub fn connect_count(&self) -> usize {
        self.connects.lock().expect("connects lock").len()
    }

    /// Milliseconds between consecutive connect calls.
    pub fn connect_gaps_ms(&self) -> Vec<u128> {
        let connects = self.connects.lock().expect("connects lock");
        connects
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis())
            .collect()
    }

    /// Sender for the most recently accepted channel. Dropping it ends the stream.
    pub fn take_latest_channel(&self) -> FrameSender {
        self.open_channels
            .lock()
            .expect("channels lock")
            .pop()
            .expect("an accepted channel")
    }
}

#[async_trait]
impl PushConnector for ScriptedConnector {
    async fn connect(&self) -> Result<PushStream, TransportError> {
        self.connects.lock().expect("connects lock").push(Instant::now());
        let step = self
            .steps
            .lock()
            .expect("steps lock")
            .pop_front()
            .unwrap_or(Step::Fail);
        match step {
            Step::Fail => Err(TransportError::Connect("connection refused".to_string())),
            Step::Accept => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.open_channels.lock().expect("channels lock").push(tx);
                let frames = futures_util::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|frame| (frame, rx))
                });
                Ok(Box::pin(frames))
            }
        }
    }

    fn endpoint(&self) -> String {
        "scripted".to_string()
    }
}

/// History source whose first `failures` fetches error out.
pub struct StaticHistory {
    records: Vec<ScanRecord>,
    failures: usize,
    calls: AtomicUsize,
}

impl StaticHistory {
    pub fn new(records: Vec<ScanRecord>) -> Arc<Self> {
        Self::failing_first(0, records)
    }

    pub fn failing_first(failures: usize, records: Vec<ScanRecord>) -> Arc<Self> {
        Arc::new(Self {
            records,
            failures,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistorySource for StaticHistory {
    async fn fetch_history(&self) -> Result<Vec<ScanRecord>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(anyhow::anyhow!("history endpoint unavailable"));
        }
        Ok(self.records.clone())
    }
}

pub fn record_aged(id: &str, project_id: &str, age: TimeDelta) -> ScanRecord {
    ScanRecord {
        id: id.to_string(),
        project_id: project_id.to_string(),
        project_name: "demo".to_string(),
        scan_type: "full".to_string(),
        scan_result: serde_json::json!({"files": 12}),
        issues_found: 4,
        created_at: Utc::now() - age,
    }
}

pub fn completion_frame(project_id: &str, issues_found: u64) -> String {
    serde_json::json!({
        "type": "analysis_complete",
        "project_id": project_id,
        "scan_type": "full",
        "issues_found": issues_found,
        "timestamp": 1_700_000_000_000_i64,
    })
    .to_string()
}

/// Yield until `task_id` is registered on the router.
pub async fn until_registered(router: &NotificationRouter, task_id: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !router.is_registered(task_id) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("registration within deadline");
}
