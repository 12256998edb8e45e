//! # Live Resource
//!
//! The generic page hook. One `LiveResource` ties together a fetch function, a
//! key extractor, the events it listens to in a room and the statuses it
//! accepts, and exposes the usual `{data, status, error, refetch}` view of the
//! result.
//!
//! ## Lifecycle
//! 1. `mount` subscribes to the room events, then performs the initial load.
//! 2. Accepted notifications go through a [`DebouncedTrigger`]; when it fires,
//!    the resource refetches and merges the result into its data.
//! 3. `refetch()` does the same on demand.
//! 4. `unmount()` cancels the pending timer and unsubscribes. A fetch still in
//!    flight completes but its result is thrown away.
//!
//! ## Ordering
//! At most one fetch is in flight. A manual `refetch()` during a fetch is a
//! no-op. A debounced refresh that fires during a fetch is remembered and runs
//! once the current fetch is done, so no event is lost.
//!
//! A failed fetch records the error and keeps the previous data.

use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::errors::HookError;
use crate::live::debounce::{DebouncedTrigger, LivePolicy, RefreshAction, StatusFilter};
use crate::live::reconcile::{self, Collection, MergeReport};
use crate::rooms::connection::{ConnectionHandle, ConnectionStatus};
use crate::rooms::hub::EventHub;
use crate::rooms::notification::Notification;
use crate::utils::lock_unpoisoned;

/// Boxed fetch function of a live resource.
pub type FetchFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<T>, HookError>> + Send + Sync>;

/// Key extractor of a live resource.
pub type KeyFn<T, K> = Arc<dyn Fn(&T) -> K + Send + Sync>;

/// Everything that distinguishes one page hook from another.
pub struct LiveSpec<T, K> {
    name: String,
    fetch: FetchFn<T>,
    key_of: KeyFn<T, K>,
    events: Vec<String>,
    accepted: Vec<String>,
}

impl<T, K> LiveSpec<T, K> {
    /// A spec named `name` (used in logs) that loads with `fetch` and
    /// identifies entities with `key_of`.
    pub fn new<F, Fut, KF>(name: impl Into<String>, fetch: F, key_of: KF) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<T>, HookError>> + Send + 'static,
        KF: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            fetch: Arc::new(move || Box::pin(fetch())),
            key_of: Arc::new(key_of),
            events: Vec::new(),
            accepted: Vec::new(),
        }
    }

    /// Listens to room event `event`.
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.events.push(event.into());
        self
    }

    /// Refreshes on notifications whose status is one of `statuses`.
    pub fn accept<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.accepted.extend(statuses.into_iter().map(Into::into));
        self
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Room events listened to.
    pub fn events(&self) -> &[String] {
        &self.events
    }

    /// Accepted notification statuses.
    pub fn accepted(&self) -> &[String] {
        &self.accepted
    }
}

impl<T, K> fmt::Debug for LiveSpec<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSpec")
            .field("name", &self.name)
            .field("events", &self.events)
            .field("accepted", &self.accepted)
            .finish()
    }
}

/// Where a resource is in its load cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
    /// Nothing requested yet.
    Idle,
    /// A fetch is in flight. Data still holds the previous result.
    Loading,
    /// The last fetch succeeded.
    Success,
    /// The last fetch failed; see `error`.
    Error,
}

/// What a view renders.
#[derive(Debug)]
pub struct HookSnapshot<T> {
    /// The reconciled collection.
    pub data: Collection<T>,
    /// Lifecycle status.
    pub status: HookStatus,
    /// Error of the last fetch, cleared by the next success.
    pub error: Option<HookError>,
    /// Bumped every time `data` is replaced.
    pub revision: u64,
    /// What the last successful merge found.
    pub last_merge: Option<MergeReport>,
}

impl<T> Clone for HookSnapshot<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            status: self.status,
            error: self.error.clone(),
            revision: self.revision,
            last_merge: self.last_merge,
        }
    }
}

impl<T> HookSnapshot<T> {
    fn idle() -> Self {
        Self {
            data: reconcile::empty(),
            status: HookStatus::Idle,
            error: None,
            revision: 0,
            last_merge: None,
        }
    }

    /// True while a fetch is running.
    pub fn is_loading(&self) -> bool {
        self.status == HookStatus::Loading
    }
}

/// Result of one refresh request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The fetch succeeded and was merged.
    Applied,
    /// The fetch failed; the error was recorded and data kept.
    Failed(HookError),
    /// Another fetch was already running.
    AlreadyInFlight,
    /// The resource was unmounted while fetching; the result was dropped.
    Discarded,
    /// The resource is unmounted; nothing was done.
    Unmounted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cause {
    Initial,
    Manual,
    Event,
}

struct HookState<T, K> {
    name: String,
    fetch: FetchFn<T>,
    key_of: KeyFn<T, K>,
    snapshot: watch::Sender<HookSnapshot<T>>,
    in_flight: AtomicBool,
    queued: AtomicBool,
    mounted: AtomicBool,
}

impl<T, K> HookState<T, K>
where
    T: PartialEq + Send + Sync + 'static,
    K: Eq + Hash + 'static,
{
    async fn refresh(&self, cause: Cause) -> RefreshOutcome {
        if !self.mounted.load(Ordering::SeqCst) {
            return RefreshOutcome::Unmounted;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            if cause == Cause::Event {
                // Picked up by the running fetch when it finishes
                self.queued.store(true, Ordering::SeqCst);
                log::debug!("[{}] Refresh queued behind the running fetch", self.name);
            } else {
                log::debug!("[{}] {:?} refetch ignored; a fetch is in flight", self.name, cause);
            }
            return RefreshOutcome::AlreadyInFlight;
        }

        loop {
            self.queued.store(false, Ordering::SeqCst);
            let outcome = self.fetch_once(cause).await;
            self.in_flight.store(false, Ordering::SeqCst);

            if !self.queued.swap(false, Ordering::SeqCst) || !self.mounted.load(Ordering::SeqCst) {
                return outcome;
            }
            if self
                .in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                // A newer fetch started after the queued event
                return outcome;
            }
            log::debug!("[{}] Running queued refresh", self.name);
        }
    }

    async fn fetch_once(&self, cause: Cause) -> RefreshOutcome {
        self.snapshot.send_modify(|snap| snap.status = HookStatus::Loading);
        log::debug!("[{}] Fetching ({:?})", self.name, cause);

        let result = (self.fetch)().await;

        if !self.mounted.load(Ordering::SeqCst) {
            log::debug!("[{}] Unmounted during fetch; result discarded", self.name);
            return RefreshOutcome::Discarded;
        }

        match result {
            Ok(items) => {
                let key_of = &self.key_of;
                self.snapshot.send_modify(|snap| {
                    let (data, report) = reconcile::merge_with_report(&snap.data, items, |item| key_of(item));
                    if !Arc::ptr_eq(&data, &snap.data) {
                        snap.data = data;
                        snap.revision += 1;
                    }
                    snap.status = HookStatus::Success;
                    snap.error = None;
                    snap.last_merge = Some(report);
                });
                RefreshOutcome::Applied
            }
            Err(e) => {
                log::warn!("[{}] Fetch failed: {}", self.name, e);
                self.snapshot.send_modify(|snap| {
                    snap.status = HookStatus::Error;
                    snap.error = Some(e.clone());
                });
                RefreshOutcome::Failed(e)
            }
        }
    }
}

/// A mounted page hook.
pub struct LiveResource<T, K> {
    state: Arc<HookState<T, K>>,
    trigger: Arc<DebouncedTrigger>,
    hub: Arc<EventHub>,
    subscription_id: u64,
    listener: Mutex<Option<JoinHandle<()>>>,
    connection: watch::Receiver<ConnectionStatus>,
}

impl<T, K> LiveResource<T, K>
where
    T: PartialEq + Send + Sync + 'static,
    K: Eq + Hash + 'static,
{
    /// Subscribes to `spec`'s events on `connection`, then loads once.
    ///
    /// Returns after the initial load has finished (successfully or not).
    pub async fn mount(spec: LiveSpec<T, K>, connection: &ConnectionHandle, policy: LivePolicy) -> Self {
        let LiveSpec {
            name,
            fetch,
            key_of,
            events,
            accepted,
        } = spec;

        let (snapshot, _) = watch::channel(HookSnapshot::idle());
        let state = Arc::new(HookState {
            name,
            fetch,
            key_of,
            snapshot,
            in_flight: AtomicBool::new(false),
            queued: AtomicBool::new(false),
            mounted: AtomicBool::new(true),
        });

        let weak = Arc::downgrade(&state);
        let action: RefreshAction = Arc::new(move || {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(state) = weak.upgrade() {
                    state.refresh(Cause::Event).await;
                }
            })
        });
        let trigger = DebouncedTrigger::new(policy.debounce_window, StatusFilter::new(accepted), action);

        // Subscribe before loading so nothing between the two is missed
        let names: Vec<&str> = events.iter().map(String::as_str).collect();
        let mut subscription = connection.subscribe(&names);
        let subscription_id = subscription.id();
        let listener = {
            let trigger = Arc::clone(&trigger);
            tokio::spawn(async move {
                while let Some(notification) = subscription.recv().await {
                    trigger.on_event(&notification);
                }
            })
        };
        log::info!("[{}] Mounted on {} listening to {:?}", state.name, connection.room(), events);

        let resource = Self {
            state,
            trigger,
            hub: Arc::clone(connection.hub()),
            subscription_id,
            listener: Mutex::new(Some(listener)),
            connection: connection.watch_status(),
        };
        resource.state.refresh(Cause::Initial).await;
        resource
    }

    /// Current view state.
    pub fn snapshot(&self) -> HookSnapshot<T> {
        self.state.snapshot.borrow().clone()
    }

    /// Current data.
    pub fn data(&self) -> Collection<T> {
        Arc::clone(&self.state.snapshot.borrow().data)
    }

    /// Receiver that changes on every state transition.
    pub fn watch(&self) -> watch::Receiver<HookSnapshot<T>> {
        self.state.snapshot.subscribe()
    }

    /// Status of the room this resource listens to.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.borrow().clone()
    }

    /// Reloads now unless a fetch is already running.
    pub async fn refetch(&self) -> RefreshOutcome {
        self.state.refresh(Cause::Manual).await
    }

    /// Feeds a notification received through other plumbing.
    pub fn handle_notification(&self, notification: &Notification) -> bool {
        if !self.is_mounted() {
            return false;
        }
        self.trigger.on_event(notification)
    }

    /// True until [`LiveResource::unmount`].
    pub fn is_mounted(&self) -> bool {
        self.state.mounted.load(Ordering::SeqCst)
    }

    /// True while a debounced refresh is waiting to fire.
    pub fn has_pending_refresh(&self) -> bool {
        self.trigger.has_pending()
    }
}

impl<T, K> LiveResource<T, K> {
    /// Stops all updates. Idempotent.
    pub fn unmount(&self) {
        if !self.state.mounted.swap(false, Ordering::SeqCst) {
            return;
        }
        self.trigger.shutdown();
        self.hub.unsubscribe(self.subscription_id);
        if let Some(listener) = lock_unpoisoned(&self.listener).take() {
            listener.abort();
        }
        log::info!("[{}] Unmounted", self.state.name);
    }
}

impl<T, K> Drop for LiveResource<T, K> {
    fn drop(&mut self) {
        self.unmount();
    }
}

impl<T, K> fmt::Debug for LiveResource<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveResource")
            .field("name", &self.state.name)
            .field("mounted", &self.state.mounted.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FetchError;
    use crate::rooms::Room;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: u32,
        name: String,
    }

    fn row(id: u32, name: &str) -> Row {
        Row { id, name: name.into() }
    }

    /// Fetcher that pops scripted responses and counts calls.
    #[derive(Clone)]
    struct Script {
        responses: Arc<Mutex<VecDeque<Result<Vec<Row>, HookError>>>>,
        calls: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl Script {
        fn new(delay: Duration, responses: Vec<Result<Vec<Row>, HookError>>) -> Self {
            Self {
                responses: Arc::new(Mutex::new(responses.into())),
                calls: Arc::new(AtomicUsize::new(0)),
                delay,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn spec(&self) -> LiveSpec<Row, u32> {
            let script = self.clone();
            LiveSpec::new(
                "rows",
                move || {
                    let script = script.clone();
                    async move {
                        script.calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(script.delay).await;
                        script
                            .responses
                            .lock()
                            .unwrap()
                            .pop_front()
                            .unwrap_or_else(|| Ok(Vec::new()))
                    }
                },
                |r: &Row| r.id,
            )
            .event("order:event")
            .accept(["updated", "added", "created", "deleted", "removed"])
        }
    }

    fn policy() -> LivePolicy {
        LivePolicy::with_debounce(Duration::from_millis(300))
    }

    fn server_error() -> HookError {
        FetchError::Status {
            url: "http://mes/orders".into(),
            status: 500,
            body: None,
        }
        .into()
    }

    #[tokio::test(start_paused = true)]
    async fn initial_load_then_debounced_refresh_preserves_identity() {
        let script = Script::new(
            Duration::from_millis(10),
            vec![
                Ok(vec![row(1, "A"), row(2, "B")]),
                Ok(vec![row(1, "A"), row(2, "B-changed")]),
            ],
        );
        let (handle, feed) = ConnectionHandle::loopback(Room::department("masterceh"));
        let hook = LiveResource::mount(script.spec(), &handle, policy()).await;

        let first = hook.snapshot();
        assert_eq!(first.status, HookStatus::Success);
        assert_eq!(first.data.len(), 2);
        assert_eq!(first.revision, 1);

        feed.emit("order:event", json!({"status": "updated"}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        feed.emit("order:event", json!({"status": "updated"}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        feed.emit("order:event", json!({"status": "added"}));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(script.calls(), 2);
        let second = hook.snapshot();
        assert!(!Arc::ptr_eq(&second.data, &first.data));
        assert!(Arc::ptr_eq(&second.data[0], &first.data[0]));
        assert_eq!(second.data[1].name, "B-changed");
        assert_eq!(second.revision, 2);
        assert_eq!(second.last_merge.map(|m| m.changed), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_status_causes_no_fetch_and_no_change() {
        let script = Script::new(Duration::ZERO, vec![Ok(vec![row(1, "A")])]);
        let (handle, feed) = ConnectionHandle::loopback(Room::machines());
        let hook = LiveResource::mount(script.spec(), &handle, policy()).await;
        let before = hook.snapshot();

        feed.emit("order:event", json!({"status": "unknown"}));
        feed.emit("order:event", json!("garbage"));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(script.calls(), 1);
        let after = hook.snapshot();
        assert!(Arc::ptr_eq(&after.data, &before.data));
        assert_eq!(after.revision, before.revision);
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_before_the_timer_fires_changes_nothing() {
        let script = Script::new(Duration::ZERO, vec![Ok(vec![row(1, "A")]), Ok(vec![row(9, "Z")])]);
        let (handle, feed) = ConnectionHandle::loopback(Room::machines());
        let hook = LiveResource::mount(script.spec(), &handle, policy()).await;
        let mut watcher = hook.watch();
        watcher.borrow_and_update();

        feed.emit("order:event", json!({"status": "updated"}));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(hook.has_pending_refresh());
        hook.unmount();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(script.calls(), 1);
        assert!(!watcher.has_changed().unwrap());
        assert_eq!(handle.hub().subscriber_count("order:event"), 0);
        assert_eq!(hook.refetch().await, RefreshOutcome::Unmounted);
    }

    #[tokio::test(start_paused = true)]
    async fn result_of_a_fetch_in_flight_at_unmount_is_discarded() {
        let script = Script::new(
            Duration::from_millis(200),
            vec![Ok(vec![row(1, "A")]), Ok(vec![row(2, "B")])],
        );
        let (handle, _feed) = ConnectionHandle::loopback(Room::machines());
        let hook = Arc::new(LiveResource::mount(script.spec(), &handle, policy()).await);

        let running = {
            let hook = Arc::clone(&hook);
            tokio::spawn(async move { hook.refetch().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        hook.unmount();

        assert_eq!(running.await.unwrap(), RefreshOutcome::Discarded);
        assert_eq!(hook.data()[0].id, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_manual_refetch_is_a_no_op() {
        let script = Script::new(Duration::from_millis(100), vec![Ok(vec![row(1, "A")])]);
        let (handle, _feed) = ConnectionHandle::loopback(Room::machines());
        let hook = Arc::new(LiveResource::mount(script.spec(), &handle, policy()).await);

        let first = {
            let hook = Arc::clone(&hook);
            tokio::spawn(async move { hook.refetch().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(hook.refetch().await, RefreshOutcome::AlreadyInFlight);
        assert_eq!(first.await.unwrap(), RefreshOutcome::Applied);
        assert_eq!(script.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn event_during_a_fetch_is_not_lost() {
        let script = Script::new(
            Duration::from_millis(500),
            vec![Ok(vec![row(1, "A")]), Ok(vec![row(1, "A2")]), Ok(vec![row(1, "A3")])],
        );
        let (handle, feed) = ConnectionHandle::loopback(Room::machines());
        let hook = Arc::new(LiveResource::mount(script.spec(), &handle, policy()).await);

        // The manual fetch takes 500ms; the debounced refresh fires 300ms into it
        let manual = {
            let hook = Arc::clone(&hook);
            tokio::spawn(async move { hook.refetch().await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        feed.emit("order:event", json!({"status": "updated"}));
        manual.await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(script.calls(), 3);
        assert_eq!(hook.data()[0].name, "A3");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_previous_data() {
        let script = Script::new(Duration::ZERO, vec![Ok(vec![row(1, "A")]), Err(server_error())]);
        let (handle, _feed) = ConnectionHandle::loopback(Room::machines());
        let hook = LiveResource::mount(script.spec(), &handle, policy()).await;
        let before = hook.data();

        assert_eq!(hook.refetch().await, RefreshOutcome::Failed(server_error()));
        let snap = hook.snapshot();
        assert_eq!(snap.status, HookStatus::Error);
        assert_eq!(snap.error, Some(server_error()));
        assert!(Arc::ptr_eq(&snap.data, &before));

        assert_eq!(hook.refetch().await, RefreshOutcome::Applied);
        assert_eq!(hook.snapshot().error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_debounced_refresh_does_not_stop_later_ones() {
        let timeout: HookError = FetchError::Timeout {
            url: "http://mes/orders".into(),
        }
        .into();
        let script = Script::new(
            Duration::ZERO,
            vec![
                Ok(vec![row(1, "A")]),
                Err(timeout.clone()),
                Ok(vec![row(1, "A"), row(2, "B")]),
            ],
        );
        let (handle, feed) = ConnectionHandle::loopback(Room::machines());
        let hook = LiveResource::mount(script.spec(), &handle, policy()).await;
        let before = hook.data();

        feed.emit("order:event", json!({"status": "updated"}));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(script.calls(), 2);
        let failed = hook.snapshot();
        assert_eq!(failed.status, HookStatus::Error);
        assert_eq!(failed.error, Some(timeout));
        assert!(Arc::ptr_eq(&failed.data, &before));
        assert!(!hook.has_pending_refresh());

        feed.emit("order:event", json!({"status": "created"}));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(script.calls(), 3);
        let recovered = hook.snapshot();
        assert_eq!(recovered.status, HookStatus::Success);
        assert_eq!(recovered.error, None);
        assert_eq!(recovered.data.len(), 2);
        assert!(Arc::ptr_eq(&recovered.data[0], &before[0]));
        assert_eq!(recovered.data[1].name, "B");
        assert_eq!(recovered.revision, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_status_follows_the_room() {
        let script = Script::new(Duration::ZERO, vec![]);
        let (handle, feed) = ConnectionHandle::loopback(Room::machines());
        let hook = LiveResource::mount(script.spec(), &handle, policy()).await;
        assert!(hook.connection_status().is_connected());
        feed.set_status(ConnectionStatus::Error(crate::errors::TransportError::Disconnected("gone".into())));
        assert!(hook.connection_status().error().is_some());
    }
}
