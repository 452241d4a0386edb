//! Fan-out of control changes between lights.
//!
//! Every publish replaces the latest value of its kind (last write wins).
//! Nothing is transactional: two lights publishing at once may leave the
//! others with either value, and there is no ordering across devices.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{RwLock, broadcast, watch};

use keylight_api::{Endpoint, LightState, Power, clamp_brightness, clamp_temperature};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Power(Power),
    Brightness(u8),
    Temperature(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Power,
    Brightness,
    Temperature,
}

impl Change {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Change::Power(_) => ChangeKind::Power,
            Change::Brightness(_) => ChangeKind::Brightness,
            Change::Temperature(_) => ChangeKind::Temperature,
        }
    }

    /// `state` with this change applied, clamped to the device ranges.
    pub fn apply_to(&self, state: LightState) -> LightState {
        match *self {
            Change::Power(on) => LightState { on, ..state },
            Change::Brightness(value) => LightState {
                brightness: clamp_brightness(i64::from(value)),
                ..state
            },
            Change::Temperature(value) => LightState {
                temperature: clamp_temperature(i64::from(value)),
                ..state
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    /// Monotonic across the whole bus
    pub seq: u64,
    pub origin: Endpoint,
    pub change: Change,
}

#[derive(Debug)]
struct Shared {
    /// Serializes publish against subscribe/unsubscribe so the outstanding
    /// count always matches the receivers an event was delivered to.
    gate: Mutex<()>,
    /// Delivered events not yet handled by their subscriber
    outstanding: watch::Sender<usize>,
}

impl Shared {
    fn ack(&self, count: usize) {
        if count > 0 {
            self.outstanding.send_modify(|n| *n = n.saturating_sub(count));
        }
    }
}

#[derive(Debug)]
pub struct SyncBus {
    sender: broadcast::Sender<SyncEvent>,
    latest: RwLock<HashMap<ChangeKind, SyncEvent>>,
    seq: AtomicU64,
    shared: Arc<Shared>,
}

impl Default for SyncBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncBus {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
            latest: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
            shared: Arc::new(Shared {
                gate: Mutex::new(()),
                outstanding: watch::channel(0).0,
            }),
        }
    }

    /// Publishes `change` on behalf of `origin`. Returns the event's sequence
    /// number.
    pub async fn publish(&self, origin: &Endpoint, change: Change) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let event = SyncEvent {
            seq,
            origin: origin.clone(),
            change,
        };

        {
            let mut latest = self.latest.write().await;
            let newer = latest
                .get(&change.kind())
                .is_none_or(|current| current.seq < seq);
            if newer {
                latest.insert(change.kind(), event.clone());
            }
        }

        let delivered = {
            let _gate = self.shared.gate.lock().unwrap_or_else(PoisonError::into_inner);
            let receivers = self.sender.receiver_count();
            if receivers > 0 {
                self.shared.outstanding.send_modify(|n| *n += receivers);
                self.sender.send(event).unwrap_or(0)
            } else {
                0
            }
        };

        tracing::debug!("sync #{} from {}: {:?} -> {} subscribers", seq, origin, change, delivered);

        seq
    }

    pub fn subscribe(&self) -> SyncSubscription {
        let _gate = self.shared.gate.lock().unwrap_or_else(PoisonError::into_inner);

        SyncSubscription {
            receiver: Some(self.sender.subscribe()),
            shared: self.shared.clone(),
            holding: false,
        }
    }

    /// Last published change of `kind`, if any.
    pub async fn latest(&self, kind: ChangeKind) -> Option<SyncEvent> {
        self.latest.read().await.get(&kind).cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Waits until every subscriber has handled every event delivered to it.
    pub async fn settled(&self) {
        let mut outstanding = self.shared.outstanding.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = outstanding.wait_for(|n| *n == 0).await;
    }
}

/// Receiving end of a [`SyncBus`].
///
/// An event counts as handled once the subscriber asks for the next one or
/// drops the subscription.
#[derive(Debug)]
pub struct SyncSubscription {
    receiver: Option<broadcast::Receiver<SyncEvent>>,
    shared: Arc<Shared>,
    holding: bool,
}

impl SyncSubscription {
    pub async fn next(&mut self) -> Option<SyncEvent> {
        self.release();

        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    self.holding = true;
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("sync subscriber lagged, skipped {} changes", skipped);
                    self.shared.ack(skipped as usize);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    fn release(&mut self) {
        if self.holding {
            self.holding = false;
            self.shared.ack(1);
        }
    }
}

impl Drop for SyncSubscription {
    fn drop(&mut self) {
        self.release();

        let _gate = self.shared.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(mut receiver) = self.receiver.take() else {
            return;
        };

        let mut unhandled = 0;
        loop {
            match receiver.try_recv() {
                Ok(_) => unhandled += 1,
                Err(TryRecvError::Lagged(skipped)) => unhandled += skipped as usize,
                Err(_) => break,
            }
        }
        drop(receiver);

        self.shared.ack(unhandled);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn endpoint(host: &str) -> Endpoint {
        Endpoint::new(host, 9123)
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = SyncBus::new();

        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(&endpoint("a"), Change::Power(Power::On)).await;

        let event = first.next().await.unwrap();
        assert_eq!(event.change, Change::Power(Power::On));
        assert_eq!(event.origin, endpoint("a"));
        assert_eq!(second.next().await.unwrap().seq, event.seq);
    }

    #[tokio::test]
    async fn test_latest_is_last_write() {
        let bus = SyncBus::new();

        assert!(bus.latest(ChangeKind::Brightness).await.is_none());

        bus.publish(&endpoint("a"), Change::Brightness(20)).await;
        let seq = bus.publish(&endpoint("b"), Change::Brightness(80)).await;
        bus.publish(&endpoint("a"), Change::Temperature(200)).await;

        let latest = bus.latest(ChangeKind::Brightness).await.unwrap();
        assert_eq!(latest.seq, seq);
        assert_eq!(latest.origin, endpoint("b"));
        assert_eq!(latest.change, Change::Brightness(80));
    }

    #[tokio::test]
    async fn test_settled_waits_for_handling() {
        let bus = SyncBus::new();
        let mut subscription = bus.subscribe();

        bus.publish(&endpoint("a"), Change::Power(Power::On)).await;
        bus.publish(&endpoint("a"), Change::Power(Power::Off)).await;

        let pending = tokio::time::timeout(Duration::from_millis(50), bus.settled()).await;
        assert!(pending.is_err());

        subscription.next().await.unwrap();
        subscription.next().await.unwrap();
        drop(subscription);

        tokio::time::timeout(Duration::from_secs(1), bus.settled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_settled_without_subscribers() {
        let bus = SyncBus::new();
        bus.publish(&endpoint("a"), Change::Brightness(50)).await;

        assert_eq!(bus.subscriber_count(), 0);
        tokio::time::timeout(Duration::from_secs(1), bus.settled())
            .await
            .unwrap();
    }

    #[test]
    fn test_apply_clamps() {
        let state = LightState::new(Power::Off, 40, 200);

        assert_eq!(Change::Power(Power::On).apply_to(state).on, Power::On);
        assert_eq!(Change::Brightness(0).apply_to(state).brightness, 3);
        assert_eq!(Change::Temperature(999).apply_to(state).temperature, 344);
    }
}
