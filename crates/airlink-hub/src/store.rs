use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use airlink_proto::telemetry::TelemetrySnapshot;

struct Stored {
    snap: Arc<TelemetrySnapshot>,
    installed: Instant,
}

/// Holds the single latest telemetry snapshot. The link reader is the only
/// writer; any number of API requests read concurrently. Replacement is
/// whole-object: a reader sees either the previous snapshot or the new one,
/// never a partial view. The critical section is the pointer swap only.
#[derive(Default)]
pub struct StateStore {
    inner: RwLock<Option<Stored>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recently stored snapshot, or `None` before the first update.
    pub fn get(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.inner.read().unwrap().as_ref().map(|s| s.snap.clone())
    }

    pub fn replace(&self, snap: Arc<TelemetrySnapshot>) {
        *self.inner.write().unwrap() = Some(Stored { snap, installed: Instant::now() });
    }

    /// Monotonic age of the stored snapshot. There is no expiry: a stale
    /// snapshot stays servable and this is how consumers judge staleness.
    pub fn age(&self) -> Option<Duration> {
        self.inner.read().unwrap().as_ref().map(|s| s.installed.elapsed())
    }
}
