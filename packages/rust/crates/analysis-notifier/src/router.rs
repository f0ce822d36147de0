//! Notification router: exactly-once per-task callbacks plus observer fan-out.
//!
//! ```text
//! Notification
//!      ↓
//! dispatch() ── remove CallbackRegistry[task_id] ── invoke one-shot handler
//!      ↓
//! every registered observer
//!      ↓
//! broadcast::Sender (global observable surface)
//! ```
//!
//! Registry and observer set are only reachable through this type. Entries are
//! removed *before* their handler runs, so a handler that re-enters `dispatch`
//! can never observe its own registration.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use crate::error::RegisterError;
use crate::notification::Notification;

/// Default capacity of the global broadcast surface.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Single-invocation handler stored per task.
pub type CompletionHandler = Box<dyn FnOnce(Notification) + Send + 'static>;

/// Passive observer invoked for every dispatched notification.
pub type ObserverHandler = Arc<dyn Fn(&Notification) + Send + Sync + 'static>;

/// Handle for one `register_once` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

/// Handle for one registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Result of routing one notification to the callback registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A one-shot callback was waiting and has been invoked.
    Delivered(Notification),
    /// Nobody was waiting on this task; observers still saw it.
    Unclaimed,
}

impl DispatchOutcome {
    /// Whether a per-task callback consumed the notification.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }
}

struct PendingCallback {
    id: RegistrationId,
    handler: CompletionHandler,
}

/// Owns the callback registry and observer set for one notifier instance.
pub struct NotificationRouter {
    callbacks: Mutex<HashMap<String, PendingCallback>>,
    observers: Mutex<HashMap<ObserverId, ObserverHandler>>,
    bus: broadcast::Sender<Notification>,
    next_id: AtomicU64,
}

impl Default for NotificationRouter {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl NotificationRouter {
    /// Create a router whose broadcast surface buffers `capacity` notifications.
    pub fn new(capacity: usize) -> Self {
        let (bus, _) = broadcast::channel(capacity.max(1));
        Self {
            callbacks: Mutex::new(HashMap::new()),
            observers: Mutex::new(HashMap::new()),
            bus,
            next_id: AtomicU64::new(1),
        }
    }

    /// Route one notification.
    ///
    /// The matching one-shot callback (if any) is removed, then invoked; every
    /// observer and broadcast subscriber receives the notification regardless.
    pub fn dispatch(&self, notification: Notification) -> DispatchOutcome {
        let claimed = self.callbacks().remove(&notification.task_id);
        let outcome = match claimed {
            Some(pending) => {
                tracing::debug!(
                    event = "notifier.router.delivered",
                    task_id = %notification.task_id,
                    scan_type = %notification.scan_type,
                    issues_found = notification.issues_found,
                    "completion callback invoked"
                );
                (pending.handler)(notification.clone());
                DispatchOutcome::Delivered(notification.clone())
            }
            None => {
                tracing::debug!(
                    event = "notifier.router.unclaimed",
                    task_id = %notification.task_id,
                    "no pending callback for task"
                );
                DispatchOutcome::Unclaimed
            }
        };

        // Snapshot so an observer may add/remove observers without deadlocking.
        let observers: Vec<ObserverHandler> = self.observers().values().cloned().collect();
        for observer in &observers {
            observer(&notification);
        }
        let receivers = self.bus.send(notification).unwrap_or(0);
        tracing::trace!(
            event = "notifier.router.broadcast",
            observers = observers.len(),
            receivers,
            "notification fanned out"
        );
        outcome
    }

    /// Register a one-shot handler for `task_id`.
    ///
    /// # Errors
    /// Returns [`RegisterError::AlreadyRegistered`] if a handler for the task
    /// is still pending; the existing registration is left untouched.
    pub fn register_once<F>(
        &self,
        task_id: impl Into<String>,
        handler: F,
    ) -> Result<RegistrationId, RegisterError>
    where
        F: FnOnce(Notification) + Send + 'static,
    {
        let task_id = task_id.into();
        let mut callbacks = self.callbacks();
        match callbacks.entry(task_id) {
            Entry::Occupied(entry) => {
                tracing::warn!(
                    event = "notifier.router.register_conflict",
                    task_id = %entry.key(),
                    "completion callback already pending for task"
                );
                Err(RegisterError::AlreadyRegistered {
                    task_id: entry.key().clone(),
                })
            }
            Entry::Vacant(entry) => {
                let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
                entry.insert(PendingCallback {
                    id,
                    handler: Box::new(handler),
                });
                Ok(id)
            }
        }
    }

    /// Drop whatever registration is pending for `task_id`.
    pub fn cancel(&self, task_id: &str) -> bool {
        self.callbacks().remove(task_id).is_some()
    }

    /// Drop the registration for `task_id` only if it is still `id`.
    pub fn cancel_registration(&self, task_id: &str, id: RegistrationId) -> bool {
        let mut callbacks = self.callbacks();
        if callbacks.get(task_id).is_some_and(|pending| pending.id == id) {
            callbacks.remove(task_id);
            return true;
        }
        false
    }

    /// Drop every pending one-shot callback. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let drained: Vec<PendingCallback> = self.callbacks().drain().map(|(_, v)| v).collect();
        drained.len()
    }

    /// Whether a one-shot callback is pending for `task_id`.
    pub fn is_registered(&self, task_id: &str) -> bool {
        self.callbacks().contains_key(task_id)
    }

    /// Number of pending one-shot callbacks.
    pub fn pending_count(&self) -> usize {
        self.callbacks().len()
    }

    /// Add a passive observer; keep the returned id to remove it later.
    pub fn add_observer<F>(&self, handler: F) -> ObserverId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers().insert(id, Arc::new(handler));
        id
    }

    /// Remove an observer. Removing an unknown id is a no-op.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers().remove(&id).is_some()
    }

    /// Number of registered observers (broadcast subscribers not included).
    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }

    /// Subscribe to the global broadcast surface.
    ///
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.bus.subscribe()
    }

    /// Current broadcast subscriber count.
    pub fn subscriber_count(&self) -> usize {
        self.bus.receiver_count()
    }

    fn callbacks(&self) -> MutexGuard<'_, HashMap<String, PendingCallback>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn observers(&self) -> MutexGuard<'_, HashMap<ObserverId, ObserverHandler>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
