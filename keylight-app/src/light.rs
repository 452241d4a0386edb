//! Per-light state handle.
//!
//! A [`LightHandle`] owns the cached state of one light. Setters update the
//! cache at once and send the full state to the device after a short
//! debounce, so a burst of changes turns into a single request carrying the
//! last value. A refetch after every write reconciles the cache with what the
//! device actually accepted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use keylight_api::{AccessoryInfo, Endpoint, LightState, Power, clamp_brightness, clamp_temperature};

use crate::client::KeylightClient;
use crate::error::Result;
use crate::settings::Control;
use crate::store::Preferences;
use crate::sync::{Change, SyncBus, SyncEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedState {
    pub state: LightState,
    pub updated_at: Instant,
    /// Set by local changes until a refetch confirms them
    pub optimistic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Health {
    #[default]
    Unknown,
    Online,
    Unreachable { error: String },
}

impl Health {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Health::Unreachable { .. })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SetOptions {
    /// Apply locally only, without publishing to the sync bus
    pub ignore_sync: bool,
}

impl SetOptions {
    pub fn local() -> Self {
        Self { ignore_sync: true }
    }
}

#[derive(Debug)]
struct CachedInfo {
    info: AccessoryInfo,
    fetched_at: Instant,
}

pub(crate) struct Inner {
    pub(crate) endpoint: Endpoint,
    pub(crate) client: KeylightClient,
    bus: Arc<SyncBus>,
    preferences: watch::Receiver<Preferences>,
    control: Control,

    cache: watch::Sender<Option<CachedState>>,
    health: watch::Sender<Health>,
    fetched: AtomicBool,

    /// Bumped by every local change; a fetch started under an older
    /// generation is discarded
    generation: AtomicU64,
    refetch: Mutex<Option<JoinHandle<()>>>,

    write_scheduled: AtomicBool,
    /// Writes scheduled or in flight
    pending: watch::Sender<usize>,
    /// Serializes every PUT to the device
    pub(crate) send_lock: tokio::sync::Mutex<()>,

    info: tokio::sync::Mutex<Option<CachedInfo>>,
    pending_name: Mutex<Option<String>>,

    pub(crate) identifying: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner).drain(..) {
            task.abort();
        }
        if let Some(task) = self.refetch.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }
}

impl Inner {
    pub(crate) fn state(&self) -> LightState {
        self.cache.borrow().map(|cached| cached.state).unwrap_or_default()
    }

    pub(crate) fn store_state(&self, state: LightState, optimistic: bool) {
        self.cache.send_replace(Some(CachedState {
            state,
            updated_at: Instant::now(),
            optimistic,
        }));
    }

    fn is_idle(&self) -> bool {
        *self.pending.borrow() == 0
    }

    fn record<T>(&self, result: &Result<T>) {
        let health = match result {
            Ok(_) => Health::Online,
            Err(e) => Health::Unreachable {
                error: e.to_string(),
            },
        };
        self.health.send_if_modified(|current| {
            if *current == health {
                false
            } else {
                *current = health;
                true
            }
        });
    }

    async fn refresh(&self) -> Result<LightState> {
        let generation = self.generation.load(Ordering::SeqCst);

        let result = self.client.get_state(&self.endpoint).await;
        self.record(&result);
        let state = result?;

        self.fetched.store(true, Ordering::SeqCst);

        if self.generation.load(Ordering::SeqCst) == generation && self.is_idle() {
            self.store_state(state, false);
        } else {
            tracing::debug!("{}: discarding fetch overtaken by a local change", self.endpoint);
        }

        Ok(state)
    }

    pub(crate) fn cancel_refetch(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.refetch.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }

    pub(crate) fn spawn_refetch(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            if let Some(inner) = weak.upgrade() {
                let _ = inner.refresh().await;
            }
        });

        if let Some(previous) = self
            .refetch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task)
        {
            previous.abort();
        }
    }

    pub(crate) async fn put(&self, state: LightState) -> Result<LightState> {
        let result = self.client.put_state(&self.endpoint, state).await;
        self.record(&result);
        result
    }

    pub(crate) fn begin_write(&self) {
        self.pending.send_modify(|n| *n += 1);
    }

    pub(crate) fn end_write(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Schedules a PUT of whatever the cache holds once the debounce window
    /// has passed. Calls inside the window share one request.
    fn schedule_write(self: &Arc<Self>) {
        if self.write_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.begin_write();

        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.control.debounce()).await;

            let result = {
                let _send = inner.send_lock.lock().await;
                inner.write_scheduled.store(false, Ordering::SeqCst);
                inner.put(inner.state()).await
            };

            if let Err(e) = &result {
                tracing::warn!("{}: failed to send state: {}", inner.endpoint, e);
            }

            inner.end_write();
            inner.spawn_refetch();
        });
    }

    fn schedule_name_write(self: &Arc<Self>) {
        self.begin_write();

        let inner = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(inner.control.debounce()).await;

            let name = inner
                .pending_name
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();

            if let Some(name) = name {
                let result = inner.client.put_display_name(&inner.endpoint, &name).await;
                if let Err(e) = &result {
                    tracing::warn!("{}: failed to rename: {}", inner.endpoint, e);
                }
                inner.record(&result);
            }

            inner.end_write();
        });
    }

    fn push_task(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }
}

/// Shared handle to one light. Clones refer to the same cache.
#[derive(Clone)]
pub struct LightHandle {
    pub(crate) inner: Arc<Inner>,
}

impl LightHandle {
    pub fn new(
        endpoint: Endpoint,
        client: KeylightClient,
        bus: Arc<SyncBus>,
        preferences: watch::Receiver<Preferences>,
        control: Control,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint,
                client,
                bus,
                preferences,
                control,
                cache: watch::channel(None).0,
                health: watch::channel(Health::Unknown).0,
                fetched: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                refetch: Mutex::new(None),
                write_scheduled: AtomicBool::new(false),
                pending: watch::channel(0).0,
                send_lock: tokio::sync::Mutex::new(()),
                info: tokio::sync::Mutex::new(None),
                pending_name: Mutex::new(None),
                identifying: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Cached state, or the fallbacks while nothing is known.
    pub fn state(&self) -> LightState {
        self.inner.state()
    }

    pub fn cached(&self) -> Option<CachedState> {
        *self.inner.cache.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<Option<CachedState>> {
        self.inner.cache.subscribe()
    }

    pub fn health(&self) -> Health {
        self.inner.health.borrow().clone()
    }

    /// Whether a fetch has ever succeeded.
    pub fn is_fetched(&self) -> bool {
        self.inner.fetched.load(Ordering::SeqCst)
    }

    pub fn is_identifying(&self) -> bool {
        self.inner.identifying.load(Ordering::SeqCst)
    }

    /// Fetches the device state. The cache is only updated when no local
    /// change happened while the request was in flight.
    pub async fn refresh(&self) -> Result<LightState> {
        self.inner.refresh().await
    }

    pub async fn set_power(&self, on: Power, options: SetOptions) -> LightState {
        self.apply(Change::Power(on), options).await
    }

    pub async fn toggle_power(&self, options: SetOptions) -> LightState {
        let on = self.state().on.toggled();
        self.set_power(on, options).await
    }

    pub async fn set_brightness(&self, value: i64, options: SetOptions) -> LightState {
        self.apply(Change::Brightness(clamp_brightness(value)), options)
            .await
    }

    pub async fn set_temperature(&self, value: i64, options: SetOptions) -> LightState {
        self.apply(Change::Temperature(clamp_temperature(value)), options)
            .await
    }

    /// Applies `change` optimistically, schedules the debounced write and,
    /// unless told otherwise, publishes the change to the other lights.
    pub async fn apply(&self, change: Change, options: SetOptions) -> LightState {
        let inner = &self.inner;

        inner.cancel_refetch();

        let mut next = LightState::default();
        inner.cache.send_modify(|cached| {
            next = change.apply_to(cached.map(|c| c.state).unwrap_or_default());
            *cached = Some(CachedState {
                state: next,
                updated_at: Instant::now(),
                optimistic: true,
            });
        });

        inner.schedule_write();

        let publish = !options.ignore_sync && inner.preferences.borrow().global_sync;
        if publish {
            inner.bus.publish(&inner.endpoint, change).await;
        }

        next
    }

    /// Waits until every scheduled write has been sent.
    pub async fn flush(&self) {
        let mut pending = self.inner.pending.subscribe();
        // The sender lives in `inner`, so the channel cannot close here
        let _ = pending.wait_for(|n| *n == 0).await;
    }

    /// Follows changes published by other lights.
    ///
    /// Changes are ignored until this light has been fetched once and when
    /// they match the current state. Applied changes are never re-published.
    pub fn attach_sync(&self) {
        let mut subscription = self.inner.bus.subscribe();
        let weak = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                let Some(handle) = LightHandle::from_weak(&weak) else {
                    break;
                };
                handle.follow(&event).await;
            }
        });

        self.inner.push_task(task);
    }

    async fn follow(&self, event: &SyncEvent) {
        let inner = &self.inner;

        let following = inner.preferences.borrow().global_sync;
        if event.origin == inner.endpoint
            || !following
            || !self.is_fetched()
            || self.is_identifying()
        {
            return;
        }

        let current = self.state();
        if event.change.apply_to(current) == current {
            return;
        }

        tracing::debug!("{}: following {:?} from {}", inner.endpoint, event.change, event.origin);
        self.apply(event.change, SetOptions::local()).await;
    }

    /// Refreshes every `interval` until the handle is dropped.
    pub fn spawn_poller(&self, interval: Duration) {
        let weak = Arc::downgrade(&self.inner);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(handle) = LightHandle::from_weak(&weak) else {
                    break;
                };
                if let Err(e) = handle.refresh().await {
                    tracing::debug!("{}: poll failed: {}", handle.endpoint(), e);
                }
            }
        });

        self.inner.push_task(task);
    }

    /// Accessory info, served from cache while younger than the configured
    /// stale time.
    pub async fn accessory_info(&self) -> Result<AccessoryInfo> {
        let inner = &self.inner;
        let mut cached = inner.info.lock().await;

        if let Some(entry) = cached.as_ref() {
            if entry.fetched_at.elapsed() < inner.control.info_stale() {
                return Ok(entry.info.clone());
            }
        }

        let result = inner.client.get_accessory_info(&inner.endpoint).await;
        inner.record(&result);
        let mut info = result?;

        if let Some(name) = inner
            .pending_name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            info.display_name = name.clone();
        }

        *cached = Some(CachedInfo {
            info: info.clone(),
            fetched_at: Instant::now(),
        });

        Ok(info)
    }

    /// Renames the light on the device. The cached accessory info changes at
    /// once; the request itself is debounced like state writes.
    pub async fn set_display_name(&self, name: &str) {
        let inner = &self.inner;

        if let Some(entry) = inner.info.lock().await.as_mut() {
            entry.info.display_name = name.to_string();
        }

        let previous = inner
            .pending_name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(name.to_string());

        if previous.is_none() {
            inner.schedule_name_write();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;

    fn handle(global_sync: bool) -> LightHandle {
        let settings = Settings::embedded().unwrap();
        let client = KeylightClient::new(&settings.http).unwrap();
        let preferences = watch::channel(Preferences {
            global_sync,
            hide_on_blur: true,
        })
        .1;

        // Nothing listens on port 9; writes fail without side effects
        LightHandle::new(
            Endpoint::new("127.0.0.1", 9),
            client,
            Arc::new(SyncBus::new()),
            preferences,
            settings.control,
        )
    }

    #[tokio::test]
    async fn test_fallback_state() {
        let handle = handle(true);

        assert!(handle.cached().is_none());
        assert_eq!(handle.state(), LightState::new(Power::Off, 3, 143));
        assert_eq!(handle.health(), Health::Unknown);
        assert!(!handle.is_fetched());
    }

    #[tokio::test]
    async fn test_setters_are_optimistic_and_clamped() {
        let handle = handle(false);

        let state = handle.set_brightness(250, SetOptions::default()).await;
        assert_eq!(state.brightness, 100);

        handle.set_temperature(-5, SetOptions::default()).await;
        handle.set_power(Power::On, SetOptions::default()).await;

        let cached = handle.cached().unwrap();
        assert!(cached.optimistic);
        assert_eq!(cached.state, LightState::new(Power::On, 100, 143));

        let toggled = handle.toggle_power(SetOptions::default()).await;
        assert_eq!(toggled.on, Power::Off);
    }

    #[tokio::test]
    async fn test_publish_respects_preferences() {
        let synced = handle(true);
        synced.set_brightness(40, SetOptions::default()).await;
        assert!(synced.inner.bus.latest(crate::sync::ChangeKind::Brightness).await.is_some());

        synced.set_temperature(200, SetOptions::local()).await;
        assert!(synced.inner.bus.latest(crate::sync::ChangeKind::Temperature).await.is_none());

        let isolated = handle(false);
        isolated.set_brightness(40, SetOptions::default()).await;
        assert!(isolated.inner.bus.latest(crate::sync::ChangeKind::Brightness).await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_failure_marks_unreachable() {
        let handle = handle(true);

        assert!(handle.refresh().await.is_err());
        assert!(handle.health().is_unreachable());
        assert!(handle.cached().is_none());
    }
}
