//! Analysis-completion notifier: push channel with bounded reconnect,
//! exactly-once task callbacks, and a polling fallback over scan history.
//!
//! - **Push**: [`ConnectionManager`] keeps one channel open through a
//!   [`PushConnector`] and feeds every frame to the [`NotificationRouter`].
//! - **Routing**: one-shot per-task callbacks plus passive observers and a
//!   broadcast surface.
//! - **Waiting**: [`CompletionWaiter`] turns a callback into a deadline-bound
//!   future; [`HistoryPoller`] covers notifications that never arrive.
//!
//! Logging: set `RUST_LOG=analysis_notifier=debug` to see routing decisions.

mod config;
mod connection;
mod error;
mod logging;
mod notification;
mod notifier;
mod polling;
mod router;
mod waiter;

pub use config::{
    HistorySettings, NotifierSettings, PollSettings, PushSettings, WaitSettings,
    load_notifier_settings, load_notifier_settings_from_paths, notifier_settings_paths,
};
pub use connection::{
    ConnectionManager, ConnectionSnapshot, ConnectionState, PushConnector, PushStream,
    ReconnectBackoff, ReconnectPolicy, WsConnector,
};
pub use error::{ParseError, RegisterError, TransportError, WaitError};
pub use notification::{ANALYSIS_COMPLETE, Notification};
pub use notifier::{AnalysisNotifier, Completion};
pub use polling::{
    ApiResponse, HistoryPoller, HistorySource, HttpHistoryClient, HttpHistoryConfig, PollConfig,
    ScanRecord, find_fresh,
};
pub use router::{
    CompletionHandler, DEFAULT_BROADCAST_CAPACITY, DispatchOutcome, NotificationRouter,
    ObserverHandler, ObserverId, RegistrationId,
};
pub use waiter::{CompletionWaiter, DEFAULT_WAIT_TIMEOUT};
