//! Push-channel connection lifecycle: open, detect closure, bounded reconnect.
//!
//! One supervised task per `open()`. The task owns the attempt counter; the
//! rest of the process only sees [`ConnectionSnapshot`]s on a watch channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::connection::backoff::{ReconnectBackoff, ReconnectPolicy};
use crate::connection::transport::{PushConnector, PushStream};
use crate::error::{ParseError, TransportError};
use crate::logging::FailureStreak;
use crate::notification::Notification;
use crate::router::{DispatchOutcome, NotificationRouter};

/// Push-channel health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No live channel (initial, dropped, closed, or gave up).
    Disconnected,
    /// Connect in progress.
    Connecting,
    /// Channel established; frames are being routed.
    Connected,
}

impl ConnectionState {
    /// Stable label for logs and CLI output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// Point-in-time view of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Current state.
    pub state: ConnectionState,
    /// Reconnect attempts spent since the last successful connect.
    pub reconnect_attempts: u32,
    /// Reconnect budget spent; nothing will retry until `open()` is called.
    pub exhausted: bool,
}

impl ConnectionSnapshot {
    fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            exhausted: false,
        }
    }
}

struct Session {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns the single push-channel connection of a notifier.
pub struct ConnectionManager {
    connector: Arc<dyn PushConnector>,
    router: Arc<NotificationRouter>,
    policy: ReconnectPolicy,
    status_tx: watch::Sender<ConnectionSnapshot>,
    session: Mutex<Option<Session>>,
}

impl ConnectionManager {
    /// Manager feeding `router`. Nothing connects until [`Self::open`].
    pub fn new(
        connector: Arc<dyn PushConnector>,
        router: Arc<NotificationRouter>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionSnapshot::disconnected());
        Self {
            connector,
            router,
            policy,
            status_tx,
            session: Mutex::new(None),
        }
    }

    /// Start (or restart) the channel with a fresh attempt counter.
    ///
    /// Any previous connection task and its pending retry timer are cancelled.
    /// Must be called from inside a tokio runtime.
    pub fn open(&self) {
        let cancel = CancellationToken::new();
        let context = LoopContext {
            connector: Arc::clone(&self.connector),
            router: Arc::clone(&self.router),
            policy: self.policy,
            status_tx: self.status_tx.clone(),
            cancel: cancel.clone(),
        };
        // One guard from teardown to store: concurrent opens serialize here.
        let mut session = self.session();
        if let Some(previous) = session.take() {
            previous.cancel.cancel();
            previous.task.abort();
        }
        context.publish(ConnectionState::Connecting, 0, false);
        tracing::info!(
            event = "notifier.connection.open",
            endpoint = %self.connector.endpoint(),
            max_attempts = self.policy.max_attempts,
            "opening push channel"
        );
        let task = tokio::spawn(run_connection_loop(context));
        *session = Some(Session { cancel, task });
    }

    /// Tear down the channel and any scheduled retry. Idempotent.
    pub fn close(&self) {
        let mut session = self.session();
        let Some(current_session) = session.take() else {
            return;
        };
        current_session.cancel.cancel();
        current_session.task.abort();
        self.status_tx.send_modify(|snapshot| {
            snapshot.state = ConnectionState::Disconnected;
        });
        drop(session);
        tracing::info!(
            event = "notifier.connection.closed",
            endpoint = %self.connector.endpoint(),
            "push channel closed by caller"
        );
    }

    /// Route one raw frame as if it arrived on the channel.
    ///
    /// Malformed or foreign frames are logged and dropped (`None`); they
    /// never change connection state.
    pub fn ingest(&self, raw: &str) -> Option<DispatchOutcome> {
        route_frame(&self.router, raw)
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        *self.status_tx.borrow()
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.snapshot().state
    }

    /// Reconnect attempts spent since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.snapshot().reconnect_attempts
    }

    /// Watch snapshots as they change.
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.status_tx.subscribe()
    }

    /// Wait up to `timeout` for the channel to reach `Connected`.
    pub async fn wait_until_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.watch();
        matches!(
            tokio::time::timeout(
                timeout,
                rx.wait_for(|snapshot| snapshot.state == ConnectionState::Connected)
            )
            .await,
            Ok(Ok(_))
        )
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(session) = self.session().take() {
            session.cancel.cancel();
            session.task.abort();
        }
    }
}

struct LoopContext {
    connector: Arc<dyn PushConnector>,
    router: Arc<NotificationRouter>,
    policy: ReconnectPolicy,
    status_tx: watch::Sender<ConnectionSnapshot>,
    cancel: CancellationToken,
}

impl LoopContext {
    fn publish(&self, state: ConnectionState, reconnect_attempts: u32, exhausted: bool) {
        // Checked under the watch lock so a cancelled loop never overwrites
        // the snapshot `close()` or a newer `open()` published.
        self.status_tx.send_if_modified(|snapshot| {
            if self.cancel.is_cancelled() {
                return false;
            }
            *snapshot = ConnectionSnapshot {
                state,
                reconnect_attempts,
                exhausted,
            };
            true
        });
    }
}

async fn run_connection_loop(context: LoopContext) {
    let endpoint = context.connector.endpoint();
    let mut backoff = ReconnectBackoff::new(context.policy);
    let mut failures = FailureStreak::default();

    loop {
        context.publish(ConnectionState::Connecting, backoff.attempts(), false);
        let connected = tokio::select! {
            biased;
            () = context.cancel.cancelled() => return,
            result = context.connector.connect() => result,
        };

        match connected {
            Ok(stream) => {
                backoff.reset();
                failures.reset();
                context.publish(ConnectionState::Connected, 0, false);
                tracing::info!(
                    event = "notifier.connection.connected",
                    endpoint = %endpoint,
                    "push channel connected"
                );
                let closed_by = tokio::select! {
                    biased;
                    () = context.cancel.cancelled() => return,
                    reason = pump_frames(stream, &context.router) => reason,
                };
                context.publish(ConnectionState::Disconnected, backoff.attempts(), false);
                match closed_by {
                    Some(error) => tracing::warn!(
                        event = "notifier.connection.dropped",
                        endpoint = %endpoint,
                        error = %error,
                        "push channel dropped"
                    ),
                    None => tracing::info!(
                        event = "notifier.connection.dropped",
                        endpoint = %endpoint,
                        "push channel ended"
                    ),
                }
            }
            Err(error) => {
                let loud = failures.record();
                let failure_streak = failures.len();
                context.publish(ConnectionState::Disconnected, backoff.attempts(), false);
                if loud {
                    tracing::warn!(
                        event = "notifier.connection.connect_failed",
                        endpoint = %endpoint,
                        failure_streak,
                        error = %error,
                        "push channel connect failed"
                    );
                } else {
                    tracing::trace!(
                        event = "notifier.connection.connect_failed",
                        endpoint = %endpoint,
                        failure_streak,
                        error = %error,
                        "push channel connect failed"
                    );
                }
            }
        }

        let Some(delay) = backoff.next_delay() else {
            context.publish(ConnectionState::Disconnected, backoff.attempts(), true);
            tracing::error!(
                event = "notifier.connection.reconnect_exhausted",
                endpoint = %endpoint,
                attempts = backoff.attempts(),
                "max reconnect attempts reached; call open() to retry"
            );
            return;
        };
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        context.publish(ConnectionState::Disconnected, backoff.attempts(), false);
        tracing::info!(
            event = "notifier.connection.reconnect_scheduled",
            endpoint = %endpoint,
            attempt = backoff.attempts(),
            delay_ms,
            "push channel reconnect scheduled"
        );
        tokio::select! {
            biased;
            () = context.cancel.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Drain frames until the channel ends. Returns the error that ended it, if any.
async fn pump_frames(
    mut stream: PushStream,
    router: &NotificationRouter,
) -> Option<TransportError> {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(raw) => {
                route_frame(router, &raw);
            }
            Err(error) => return Some(error),
        }
    }
    None
}

fn route_frame(router: &NotificationRouter, raw: &str) -> Option<DispatchOutcome> {
    match Notification::parse(raw) {
        Ok(notification) => {
            tracing::info!(
                event = "notifier.connection.notification",
                task_id = %notification.task_id,
                scan_type = %notification.scan_type,
                issues_found = notification.issues_found,
                "analysis completion received"
            );
            Some(router.dispatch(notification))
        }
        Err(ParseError::UnsupportedType(kind)) => {
            tracing::debug!(
                event = "notifier.connection.frame_ignored",
                kind = %kind,
                "push frame with unhandled type discarded"
            );
            None
        }
        Err(error) => {
            tracing::warn!(
                event = "notifier.connection.frame_malformed",
                error = %error,
                len = raw.len(),
                "malformed push frame discarded"
            );
            None
        }
    }
}
