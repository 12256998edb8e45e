//! # Debounced Refresh Trigger
//!
//! Turns a burst of room notifications into a single refresh.
//!
//! ## Workflow
//! 1. A notification whose `status` is not in the accepted set is ignored
//!    (debug log only).
//! 2. An accepted one cancels the pending timer, if any.
//! 3. A new timer is armed for the quiet window, measured from this event.
//! 4. When the timer fires the refresh action runs. Failures are the action's
//!    business; the trigger keeps working either way.
//!
//! At most one timer is pending per trigger. `shutdown()` cancels it and makes
//! every later event a no-op.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::rooms::notification::Notification;
use crate::utils::lock_unpoisoned;

/// Quiet window used when nothing else is configured.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

/// The refresh a trigger runs when its timer fires.
pub type RefreshAction = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Shared timing policy for live resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivePolicy {
    /// Quiet period before a refresh fires.
    pub debounce_window: Duration,
}

impl Default for LivePolicy {
    fn default() -> Self {
        Self {
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
        }
    }
}

impl LivePolicy {
    /// A policy with the given quiet window.
    pub fn with_debounce(debounce_window: Duration) -> Self {
        Self { debounce_window }
    }
}

/// Set of `status` values that should cause a refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusFilter {
    accepted: HashSet<String>,
}

impl StatusFilter {
    /// Accepts exactly `statuses`.
    pub fn new<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accepted: statuses.into_iter().map(Into::into).collect(),
        }
    }

    /// True if `notification` carries an accepted status.
    pub fn accepts(&self, notification: &Notification) -> bool {
        match notification.status() {
            Some(status) if self.accepted.contains(status) => true,
            Some(status) => {
                log::debug!("Ignoring '{}' with status '{}'", notification.event, status);
                false
            }
            None => {
                log::debug!("Ignoring '{}' without a status: {}", notification.event, notification.payload);
                false
            }
        }
    }

    /// Number of accepted statuses.
    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    /// True if nothing is accepted.
    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

struct PendingRefresh {
    generation: u64,
    token: CancellationToken,
}

/// Coalesces accepted notifications into one delayed refresh.
pub struct DebouncedTrigger {
    window: Duration,
    filter: StatusFilter,
    action: RefreshAction,
    pending: Mutex<Option<PendingRefresh>>,
    generation: AtomicU64,
    closed: AtomicBool,
    this: Weak<DebouncedTrigger>,
}

impl DebouncedTrigger {
    /// A trigger that runs `action` after `window` of quiet.
    pub fn new(window: Duration, filter: StatusFilter, action: RefreshAction) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            window,
            filter,
            action,
            pending: Mutex::new(None),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            this: this.clone(),
        })
    }

    /// The quiet window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Filters `notification` and schedules a refresh if it is accepted.
    ///
    /// Returns whether a refresh was scheduled.
    pub fn on_event(&self, notification: &Notification) -> bool {
        if !self.filter.accepts(notification) {
            return false;
        }
        self.schedule()
    }

    /// (Re)arms the timer unconditionally.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let deadline = Instant::now() + self.window;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();

        {
            let mut pending = lock_unpoisoned(&self.pending);
            // Re-checked under the lock so shutdown() cannot race us
            if self.closed.load(Ordering::SeqCst) {
                return false;
            }
            if let Some(previous) = pending.replace(PendingRefresh {
                generation,
                token: token.clone(),
            }) {
                previous.token.cancel();
                log::trace!("Refresh {} superseded by {}", previous.generation, generation);
            }
        }

        let this = self.this.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
            let Some(trigger) = this.upgrade() else {
                return;
            };
            {
                let mut pending = lock_unpoisoned(&trigger.pending);
                match pending.as_ref() {
                    Some(p) if p.generation == generation && !p.token.is_cancelled() => *pending = None,
                    _ => return,
                }
            }
            if trigger.closed.load(Ordering::SeqCst) {
                return;
            }
            log::debug!("Debounce window elapsed; refreshing");
            (trigger.action)().await;
        });
        true
    }

    /// Cancels the pending timer, if any. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        match lock_unpoisoned(&self.pending).take() {
            Some(pending) => {
                pending.token.cancel();
                true
            }
            None => false,
        }
    }

    /// True while a timer is armed.
    pub fn has_pending(&self) -> bool {
        lock_unpoisoned(&self.pending).is_some()
    }

    /// Cancels the pending timer and ignores all further events.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if self.cancel() {
            log::debug!("Pending refresh cancelled on shutdown");
        }
    }

    /// True after [`DebouncedTrigger::shutdown`].
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for DebouncedTrigger {
    fn drop(&mut self) {
        if let Some(pending) = lock_unpoisoned(&self.pending).take() {
            pending.token.cancel();
        }
    }
}
