//! Completion waiter: one-shot registration raced against a deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::WaitError;
use crate::notification::Notification;
use crate::router::{NotificationRouter, RegistrationId};

/// Upper bound calling code uses when it has no better deadline.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Turns router callbacks into a single awaited result.
#[derive(Clone)]
pub struct CompletionWaiter {
    router: Arc<NotificationRouter>,
}

/// Removes the waiter's own registration however the wait ends, including
/// when the caller drops the future mid-wait.
struct RegistrationGuard<'a> {
    router: &'a NotificationRouter,
    task_id: &'a str,
    id: RegistrationId,
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        self.router.cancel_registration(self.task_id, self.id);
    }
}

impl CompletionWaiter {
    /// Waiter backed by `router`.
    pub fn new(router: Arc<NotificationRouter>) -> Self {
        Self { router }
    }

    /// Resolve with the next notification for `task_id`, or fail after `timeout`.
    ///
    /// Exactly one outcome is produced and the registry holds no entry for
    /// this call afterwards.
    ///
    /// # Errors
    /// - [`WaitError::AlreadyWaiting`] if another waiter holds `task_id`.
    /// - [`WaitError::Timeout`] if the deadline elapses first.
    /// - [`WaitError::Cancelled`] if the registration is dropped (router cleared).
    pub async fn wait_for(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> Result<Notification, WaitError> {
        let (tx, mut rx) = oneshot::channel();
        let id = self.router.register_once(task_id, move |notification| {
            let _ = tx.send(notification);
        })?;
        let _guard = RegistrationGuard {
            router: &self.router,
            task_id,
            id,
        };

        let received = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(received) => received,
            // Deadline hit. If the entry is already gone, a dispatch (or clear)
            // claimed it first and the handler is about to resolve `rx`.
            Err(_) if !self.router.cancel_registration(task_id, id) => rx.await,
            Err(_) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::info!(
                    event = "notifier.wait.timeout",
                    task_id,
                    timeout_ms,
                    "no completion notification before deadline"
                );
                return Err(WaitError::Timeout {
                    task_id: task_id.to_string(),
                    timeout_ms,
                });
            }
        };

        received.map_err(|_| {
            tracing::debug!(
                event = "notifier.wait.cancelled",
                task_id,
                "completion wait cancelled before delivery"
            );
            WaitError::Cancelled {
                task_id: task_id.to_string(),
            }
        })
    }
}
