use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use airlink_proto::telemetry::TelemetrySnapshot;

use crate::store::StateStore;

struct Slot {
    id: u64,
    tx: mpsc::Sender<Arc<TelemetrySnapshot>>,
    /// Highest sequence number enqueued to this subscriber. Guards against
    /// re-delivering the join snapshot when its publish is still in flight.
    last_seq: u64,
}

/// Handle returned by [`BroadcastHub::subscribe`]. Dropping the receiver is
/// equivalent to unsubscribing: the next publish notices the closed queue
/// and removes the slot.
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<Arc<TelemetrySnapshot>>,
}

/// Fans each published snapshot out to every live subscriber, in production
/// order, without ever waiting on a subscriber's network write. Each
/// subscriber gets its own bounded queue; overflow drops that subscriber
/// and nobody else.
pub struct BroadcastHub {
    store: Arc<StateStore>,
    queue_depth: usize,
    next_id: AtomicU64,
    subs: Mutex<Vec<Slot>>,
}

impl BroadcastHub {
    pub fn new(store: Arc<StateStore>, queue_depth: usize) -> Self {
        Self {
            store,
            queue_depth: queue_depth.max(1),
            next_id: AtomicU64::new(1),
            subs: Mutex::new(Vec::new()),
        }
    }

    /// Register a subscriber. The current snapshot (if any) is enqueued as
    /// its first item so a freshly connected client is never blank.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subs = self.subs.lock().unwrap();
        let mut last_seq = 0;
        if let Some(snap) = self.store.get() {
            last_seq = snap.seq;
            // queue_depth >= 1, so this cannot fail on a fresh queue
            let _ = tx.try_send(snap);
        }
        subs.push(Slot { id, tx, last_seq });
        info!("hub: subscriber {} joined ({} active)", id, subs.len());

        Subscription { id, rx }
    }

    /// Enqueue a snapshot to every subscriber. Never blocks: a full queue
    /// means the subscriber cannot keep up and is dropped, which closes its
    /// delivery path and thereby its connection.
    pub fn publish(&self, snap: Arc<TelemetrySnapshot>) {
        let mut subs = self.subs.lock().unwrap();
        subs.retain_mut(|slot| {
            if slot.last_seq >= snap.seq {
                return true;
            }
            match slot.tx.try_send(snap.clone()) {
                Ok(()) => {
                    slot.last_seq = snap.seq;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!("hub: subscriber {} cannot keep up, dropping", slot.id);
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("hub: subscriber {} already gone", slot.id);
                    false
                }
            }
        });
    }

    /// Remove a subscriber and release its queue. Safe to call while a
    /// publish is in flight; whichever runs second just sees it gone.
    pub fn unsubscribe(&self, id: u64) {
        let mut subs = self.subs.lock().unwrap();
        let before = subs.len();
        subs.retain(|slot| slot.id != id);
        if subs.len() < before {
            info!("hub: subscriber {} left ({} active)", id, subs.len());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.lock().unwrap().len()
    }

    /// Drop every subscriber; their delivery tasks end at the next recv.
    pub fn close_all(&self) {
        let mut subs = self.subs.lock().unwrap();
        if !subs.is_empty() {
            info!("hub: closing {} subscriber(s)", subs.len());
        }
        subs.clear();
    }
}
