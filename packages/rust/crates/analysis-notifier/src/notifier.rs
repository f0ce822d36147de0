//! Notifier context: one router, one push connection, one waiter.
//!
//! Construct once per process (or per test) and share by reference; there is
//! no global instance.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::NotifierSettings;
use crate::connection::{ConnectionManager, PushConnector, ReconnectPolicy, WsConnector};
use crate::error::{RegisterError, WaitError};
use crate::notification::Notification;
use crate::polling::{HistoryPoller, ScanRecord};
use crate::router::{NotificationRouter, ObserverId, RegistrationId};
use crate::waiter::CompletionWaiter;

/// How a task's completion became known.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Delivered over the push channel.
    Pushed(Notification),
    /// Found by polling the history endpoint after the push wait timed out.
    Polled(ScanRecord),
    /// Neither path produced a result.
    NotFound,
}

/// Analysis-completion notifier.
pub struct AnalysisNotifier {
    router: Arc<NotificationRouter>,
    connection: ConnectionManager,
    waiter: CompletionWaiter,
}

impl AnalysisNotifier {
    /// Notifier over an arbitrary push connector.
    pub fn new(connector: Arc<dyn PushConnector>, policy: ReconnectPolicy) -> Self {
        let router = Arc::new(NotificationRouter::default());
        let connection = ConnectionManager::new(connector, Arc::clone(&router), policy);
        let waiter = CompletionWaiter::new(Arc::clone(&router));
        Self {
            router,
            connection,
            waiter,
        }
    }

    /// WebSocket notifier configured from settings.
    pub fn from_settings(settings: &NotifierSettings) -> Self {
        let connector: Arc<dyn PushConnector> = Arc::new(WsConnector::new(&settings.push_url()));
        Self::new(connector, settings.reconnect_policy())
    }

    /// Open the push channel. Calling again restarts it with a fresh counter.
    pub fn start(&self) {
        self.connection.open();
    }

    /// Close the push channel and drop every pending one-shot callback.
    /// Returns how many callbacks were dropped.
    pub fn disconnect(&self) -> usize {
        self.connection.close();
        let dropped = self.router.clear();
        tracing::info!(
            event = "notifier.disconnect",
            dropped_callbacks = dropped,
            "notifier disconnected"
        );
        dropped
    }

    /// Shared router.
    pub fn router(&self) -> &Arc<NotificationRouter> {
        &self.router
    }

    /// Push-channel manager.
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Register a one-shot completion callback for `task_id`.
    ///
    /// # Errors
    /// Returns [`RegisterError::AlreadyRegistered`] if the task is already claimed.
    pub fn on_analysis_complete<F>(
        &self,
        task_id: impl Into<String>,
        handler: F,
    ) -> Result<RegistrationId, RegisterError>
    where
        F: FnOnce(Notification) + Send + 'static,
    {
        self.router.register_once(task_id, handler)
    }

    /// Add a global observer.
    pub fn add_observer<F>(&self, handler: F) -> ObserverId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.router.add_observer(handler)
    }

    /// Remove a global observer; unknown ids are ignored.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.router.remove_observer(id)
    }

    /// Subscribe to every notification.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.router.subscribe()
    }

    /// Wait for the push notification of `task_id`.
    ///
    /// # Errors
    /// See [`CompletionWaiter::wait_for`].
    pub async fn wait_for(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> Result<Notification, WaitError> {
        self.waiter.wait_for(task_id, timeout).await
    }

    /// Wait on the push channel; if that times out, poll the history endpoint.
    ///
    /// # Errors
    /// Returns non-timeout wait failures ([`WaitError::AlreadyWaiting`],
    /// [`WaitError::Cancelled`]) unchanged.
    pub async fn wait_or_poll(
        &self,
        task_id: &str,
        timeout: Duration,
        poller: &HistoryPoller,
    ) -> Result<Completion, WaitError> {
        match self.waiter.wait_for(task_id, timeout).await {
            Ok(notification) => Ok(Completion::Pushed(notification)),
            Err(WaitError::Timeout { .. }) => Ok(poller
                .poll(task_id)
                .await
                .map_or(Completion::NotFound, Completion::Polled)),
            Err(error) => Err(error),
        }
    }
}
