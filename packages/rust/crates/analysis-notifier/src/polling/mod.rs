//! Polling fallback over the scan-history endpoint.

mod history;
mod poller;

pub use history::{ApiResponse, HistorySource, HttpHistoryClient, HttpHistoryConfig, ScanRecord};
pub use poller::{HistoryPoller, PollConfig, find_fresh};
