pub mod hub;
pub mod store;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Per-subscriber delivery queue depth. A subscriber that lets its
    /// queue fill up is dropped rather than allowed to stall the producer.
    pub queue_depth: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self { queue_depth: 32 }
    }
}
