//! # Event Hub
//!
//! The fan-out point between one room connection and the pages listening to
//! it. Subscribers register for one or more event names; a dispatched
//! notification is wrapped in an `Arc` once and every matching subscriber
//! receives a pointer to the same allocation.
//!
//! Delivery is keyed strictly by event name. A subscriber whose receiver was
//! dropped is pruned on the next dispatch that reaches it.
//!
//! Once a subscription is cancelled (explicitly, by drop, or because the hub
//! was closed) it yields nothing more, not even notifications that were already
//! queued in its channel. That is what lets `ConnectionHandle::close` and
//! `LiveResource::unmount` promise "no events after return".

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;

use crate::rooms::notification::Notification;
use crate::utils::lock_unpoisoned;

/// Internal representation of one registered listener.
struct Subscriber {
    id: u64,
    /// Sending half of the subscriber's queue.
    sender: mpsc::UnboundedSender<Arc<Notification>>,
    /// Cleared when the subscription is cancelled; checked on both ends.
    active: Arc<AtomicBool>,
}

/// Registry of subscribers keyed by event name.
pub struct EventHub {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
    open: AtomicBool,
}

impl Default for EventHub {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            open: AtomicBool::new(true),
        }
    }
}

impl EventHub {
    /// A new, open hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers one listener for all of `events`.
    ///
    /// On a closed hub the returned subscription is already cancelled.
    pub fn subscribe(self: &Arc<Self>, events: &[&str]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(false));

        let mut subs = lock_unpoisoned(&self.subscribers);
        // Checked under the lock so a concurrent close() cannot miss us
        if self.open.load(Ordering::SeqCst) {
            active.store(true, Ordering::SeqCst);
            for event in events {
                subs.entry(event.to_string()).or_default().push(Subscriber {
                    id,
                    sender: tx.clone(),
                    active: Arc::clone(&active),
                });
            }
            log::debug!("Subscriber {} registered for {:?}", id, events);
        }
        drop(subs);

        Subscription {
            id,
            events: events.iter().map(|e| e.to_string()).collect(),
            receiver: rx,
            active,
            hub: Arc::downgrade(self),
        }
    }

    /// Delivers `notification` to every active subscriber of its event name.
    ///
    /// Returns how many subscribers received it.
    pub fn dispatch(&self, notification: Notification) -> usize {
        if !self.open.load(Ordering::SeqCst) {
            return 0;
        }
        let frame = Arc::new(notification);
        let mut subs = lock_unpoisoned(&self.subscribers);
        let Some(listeners) = subs.get_mut(&frame.event) else {
            log::debug!("No subscribers for '{}'", frame.event);
            return 0;
        };

        let mut delivered = 0;
        listeners.retain(|sub| {
            if !sub.active.load(Ordering::SeqCst) {
                return false;
            }
            match sub.sender.send(Arc::clone(&frame)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    // Receiver was dropped without unsubscribing
                    log::debug!("Subscriber {} is gone. Removing from hub.", sub.id);
                    false
                }
            }
        });
        if listeners.is_empty() {
            subs.remove(&frame.event);
        }
        delivered
    }

    /// Removes subscription `id` from every event it listened to.
    pub fn unsubscribe(&self, id: u64) {
        let mut subs = lock_unpoisoned(&self.subscribers);
        subs.retain(|_, listeners| {
            listeners.retain(|sub| {
                if sub.id == id {
                    sub.active.store(false, Ordering::SeqCst);
                    false
                } else {
                    true
                }
            });
            !listeners.is_empty()
        });
    }

    /// Cancels every subscription and refuses new ones.
    pub fn close(&self) {
        let mut subs = lock_unpoisoned(&self.subscribers);
        self.open.store(false, Ordering::SeqCst);
        for sub in subs.values().flatten() {
            sub.active.store(false, Ordering::SeqCst);
        }
        subs.clear();
    }

    /// False once [`EventHub::close`] has run.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Number of active listeners for `event`.
    pub fn subscriber_count(&self, event: &str) -> usize {
        lock_unpoisoned(&self.subscribers)
            .get(event)
            .map(|listeners| listeners.iter().filter(|s| s.active.load(Ordering::SeqCst)).count())
            .unwrap_or(0)
    }
}

/// Receiving end of a hub registration. Unsubscribes on drop.
pub struct Subscription {
    id: u64,
    events: Vec<String>,
    receiver: mpsc::UnboundedReceiver<Arc<Notification>>,
    active: Arc<AtomicBool>,
    hub: Weak<EventHub>,
}

impl Subscription {
    /// Registration id inside the hub.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Event names this subscription listens to.
    pub fn events(&self) -> &[String] {
        &self.events
    }

    /// False after cancellation.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Next notification, or `None` once the subscription is cancelled.
    pub async fn recv(&mut self) -> Option<Arc<Notification>> {
        if !self.is_active() {
            return None;
        }
        let next = self.receiver.recv().await?;
        // Cancellation may have happened while we were parked
        self.is_active().then_some(next)
    }

    /// Non-blocking variant of [`Subscription::recv`].
    pub fn try_recv(&mut self) -> Option<Arc<Notification>> {
        if !self.is_active() {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    /// Cancels the registration now.
    pub fn unsubscribe(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
        self.receiver.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
