//! Shared unread-state cache
//!
//! One [`UnreadStore`] is wired at startup and handed to every surface that shows
//! unread state. It polls the conversation list only while it has subscribers:
//! the first subscription attaches to the [`InvalidationBus`], arms the poll
//! timer and forces a refresh; the last unsubscription undoes all three.

use crate::api::ChatApi;
use crate::bus::{BusSubscription, InvalidationBus};
use crate::model::Conversation;
use crate::unread::count_unread;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

const REFRESH_ERROR: &str = "Could not refresh conversations";

/// Cached conversation list and derived unread count
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadSnapshot {
    pub conversations: Vec<Conversation>,
    pub unread_count: usize,
    pub is_loading: bool,
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for UnreadSnapshot {
    fn default() -> Self {
        Self {
            conversations: Vec::new(),
            unread_count: 0,
            is_loading: true,
            error: None,
            last_updated: None,
        }
    }
}

/// A fetch shared by every caller that asked while it was pending
pub type RefreshHandle = Shared<BoxFuture<'static, ()>>;

type Listener = Arc<dyn Fn() + Send + Sync>;

struct StoreState {
    snapshot: Arc<UnreadSnapshot>,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
    active: bool,
    poll_interval: Duration,
    poll_task: Option<JoinHandle<()>>,
    bus_subscription: Option<BusSubscription>,
    in_flight: Option<RefreshHandle>,
}

struct StoreInner {
    api: Arc<dyn ChatApi>,
    bus: InvalidationBus,
    state: Mutex<StoreState>,
}

/// Cloneable handle to the unread cache
#[derive(Clone)]
pub struct UnreadStore {
    inner: Arc<StoreInner>,
}

impl UnreadStore {
    pub fn new(api: Arc<dyn ChatApi>, bus: InvalidationBus) -> Self {
        Self::with_poll_interval(api, bus, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(
        api: Arc<dyn ChatApi>,
        bus: InvalidationBus,
        poll_interval: Duration,
    ) -> Self {
        let state = StoreState {
            snapshot: Arc::new(UnreadSnapshot::default()),
            listeners: Vec::new(),
            next_listener_id: 0,
            active: false,
            poll_interval,
            poll_task: None,
            bus_subscription: None,
            in_flight: None,
        };

        Self {
            inner: Arc::new(StoreInner {
                api,
                bus,
                state: Mutex::new(state),
            }),
        }
    }

    /// Register a change listener.
    ///
    /// The first subscriber starts the store. Dropping the returned handle
    /// unsubscribes; the last one to go stops it.
    pub fn subscribe<F>(&self, listener: F) -> StoreSubscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let (id, started) = {
            let mut state = self.inner.state.lock();
            let id = state.next_listener_id;
            state.next_listener_id += 1;
            let listener: Listener = Arc::new(listener);
            state.listeners.push((id, listener));
            (id, StoreInner::activate(&self.inner, &mut state))
        };

        if started {
            info!("Unread store started");
            let _ = self.inner.refresh(true);
        }

        StoreSubscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Current snapshot; cheap, never blocks on the network
    pub fn snapshot(&self) -> Arc<UnreadSnapshot> {
        self.inner.state.lock().snapshot.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.snapshot().unread_count
    }

    /// Fetch the conversation list, joining a fetch that is already pending.
    ///
    /// `force` marks the snapshot as loading before a new fetch starts. The
    /// fetch runs in the background whether or not the handle is awaited.
    pub fn refresh(&self, force: bool) -> RefreshHandle {
        self.inner.refresh(force)
    }

    /// The fetch currently pending, if any
    pub fn in_flight(&self) -> Option<RefreshHandle> {
        self.inner.state.lock().in_flight.clone()
    }

    /// Enter the active state: attach to the bus, arm the timer, force a refresh.
    /// No-op when already active.
    pub fn start(&self) {
        let started = StoreInner::activate(&self.inner, &mut self.inner.state.lock());
        if started {
            info!("Unread store started");
            let _ = self.inner.refresh(true);
        }
    }

    /// Return to idle: cancel the timer and detach from the bus
    pub fn stop(&self) {
        let detached = StoreInner::deactivate(&mut self.inner.state.lock());
        if let Some(detached) = detached {
            detached.release();
        }
    }

    /// Change the poll period. Zero disables polling. A running timer is
    /// re-armed at once with the new period.
    pub fn set_poll_interval(&self, interval: Duration) {
        let mut state = self.inner.state.lock();
        if state.poll_interval == interval {
            return;
        }
        state.poll_interval = interval;
        if state.active {
            StoreInner::restart_polling(&self.inner, &mut state);
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.state.lock().poll_interval
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().listeners.len()
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    /// Whether a poll timer is currently armed
    pub fn is_polling(&self) -> bool {
        self.inner
            .state
            .lock()
            .poll_task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }
}

impl StoreInner {
    fn refresh(self: &Arc<Self>, force: bool) -> RefreshHandle {
        let handle = {
            let mut state = self.state.lock();
            if let Some(pending) = &state.in_flight {
                return pending.clone();
            }

            if force {
                let mut loading = (*state.snapshot).clone();
                loading.is_loading = true;
                loading.error = None;
                state.snapshot = Arc::new(loading);
            }

            let inner = Arc::clone(self);
            let handle = async move {
                if AssertUnwindSafe(inner.fetch()).catch_unwind().await.is_err() {
                    inner.recover_from_panic();
                }
            }
            .boxed()
            .shared();
            state.in_flight = Some(handle.clone());
            handle
        };

        if force {
            self.notify();
        }

        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(handle.clone());
            }
            Err(_) => warn!("No async runtime, refresh runs only when awaited"),
        }

        handle
    }

    async fn fetch(&self) {
        let result = self.api.list_conversations().await;

        {
            let mut state = self.state.lock();
            let next = match result {
                Ok(conversations) => {
                    debug!("Fetched {} conversations", conversations.len());
                    UnreadSnapshot {
                        unread_count: count_unread(&conversations),
                        conversations,
                        is_loading: false,
                        error: None,
                        last_updated: Some(Utc::now()),
                    }
                }
                Err(e) => {
                    error!("Failed to refresh unread conversations: {}", e);
                    UnreadSnapshot {
                        is_loading: false,
                        error: Some(REFRESH_ERROR.to_string()),
                        ..(*state.snapshot).clone()
                    }
                }
            };
            state.snapshot = Arc::new(next);
            state.in_flight = None;
        }

        self.notify();
    }

    /// A fetch panicked before finishing; release it so the next refresh can run
    fn recover_from_panic(&self) {
        error!("Unread refresh panicked");
        {
            let mut state = self.state.lock();
            state.snapshot = Arc::new(UnreadSnapshot {
                is_loading: false,
                error: Some(REFRESH_ERROR.to_string()),
                ..(*state.snapshot).clone()
            });
            state.in_flight = None;
        }
        self.notify();
    }

    fn notify(&self) {
        let listeners: Vec<Listener> = self
            .state
            .lock()
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                warn!("Unread store listener panicked");
            }
        }
    }

    fn restart_polling(inner: &Arc<Self>, state: &mut StoreState) {
        if let Some(task) = state.poll_task.take() {
            task.abort();
        }

        let period = state.poll_interval;
        if period.is_zero() {
            debug!("Polling disabled");
            return;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No async runtime, unread polling not started");
                return;
            }
        };

        let weak: Weak<Self> = Arc::downgrade(inner);
        state.poll_task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                debug!("Unread poll tick");
                let pending = inner.refresh(false);
                drop(inner);
                pending.await;
            }
        }));
    }

    /// Attach to the bus and arm the timer, under the caller's lock.
    /// Returns false when already active.
    fn activate(inner: &Arc<Self>, state: &mut StoreState) -> bool {
        if state.active {
            return false;
        }
        state.active = true;
        Self::restart_polling(inner, state);

        let weak = Arc::downgrade(inner);
        state.bus_subscription = Some(inner.bus.subscribe(move || {
            if let Some(inner) = weak.upgrade() {
                debug!("Invalidation received, refreshing unread state");
                let _ = inner.refresh(false);
            }
        }));
        true
    }

    /// Leave the active state under the caller's lock; the returned parts are
    /// released once the lock is dropped
    fn deactivate(state: &mut StoreState) -> Option<Detached> {
        if !state.active {
            return None;
        }
        state.active = false;
        Some(Detached {
            task: state.poll_task.take(),
            subscription: state.bus_subscription.take(),
        })
    }
}

/// Timer and bus attachment taken from a store going idle
struct Detached {
    task: Option<JoinHandle<()>>,
    subscription: Option<BusSubscription>,
}

impl Detached {
    fn release(self) {
        if let Some(task) = self.task {
            task.abort();
        }
        drop(self.subscription);
        info!("Unread store stopped");
    }
}

/// Listener registration; unsubscribes on drop
pub struct StoreSubscription {
    id: u64,
    store: Weak<StoreInner>,
}

impl StoreSubscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for StoreSubscription {
    fn drop(&mut self) {
        let Some(inner) = self.store.upgrade() else {
            return;
        };

        let detached = {
            let mut state = inner.state.lock();
            let before = state.listeners.len();
            state.listeners.retain(|(id, _)| *id != self.id);
            if before > 0 && state.listeners.is_empty() {
                StoreInner::deactivate(&mut state)
            } else {
                None
            }
        };

        if let Some(detached) = detached {
            detached.release();
        }
    }
}
