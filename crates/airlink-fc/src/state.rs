use std::time::{Duration, Instant};

use crate::ReconnectConfig;

/// Link connection lifecycle. `Degraded` means the link is down but a
/// last-known-good snapshot exists and stays servable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Disconnected => "disconnected",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Degraded => "degraded",
        }
    }
}

/// The connection state machine, separated from the transport so the
/// transition and backoff rules are checkable on their own. Transitions are
/// driven only by I/O outcomes, never by subscriber activity.
#[derive(Debug)]
pub struct LinkConn {
    state: LinkState,
    backoff: Duration,
    cfg: ReconnectConfig,
    produced_data: bool,
}

impl LinkConn {
    pub fn new(cfg: ReconnectConfig) -> Self {
        let backoff = Duration::from_millis(cfg.initial_backoff_ms);
        Self { state: LinkState::Disconnected, backoff, cfg, produced_data: false }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// A connection attempt is starting.
    pub fn attempt(&mut self) {
        self.state = LinkState::Connecting;
    }

    /// The attempt succeeded; backoff resets.
    pub fn connected(&mut self) {
        self.state = LinkState::Connected;
        self.backoff = Duration::from_millis(self.cfg.initial_backoff_ms);
    }

    /// At least one snapshot has been produced over this link's lifetime.
    pub fn note_data(&mut self) {
        self.produced_data = true;
    }

    /// Connect or read failure. Returns how long to wait before the next
    /// attempt and doubles the delay, capped at the configured maximum.
    /// With a retained snapshot the link is degraded, not dead.
    pub fn failed(&mut self) -> Duration {
        self.state = if self.produced_data { LinkState::Degraded } else { LinkState::Disconnected };
        let delay = self.backoff;
        let max = Duration::from_millis(self.cfg.max_backoff_ms);
        self.backoff = (self.backoff * 2).min(max);
        delay
    }
}

/// Live link status shared with the status endpoint.
#[derive(Debug, Clone)]
pub struct LinkStatus {
    pub state: LinkState,
    pub endpoint: String,
    /// Decoded telemetry messages merged into the snapshot.
    pub messages: u64,
    pub last_heartbeat: Option<Instant>,
    pub last_error: Option<String>,
}

impl LinkStatus {
    pub fn new(endpoint: String) -> Self {
        Self {
            state: LinkState::Disconnected,
            endpoint,
            messages: 0,
            last_heartbeat: None,
            last_error: None,
        }
    }

    pub fn hb_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> LinkConn {
        LinkConn::new(ReconnectConfig { initial_backoff_ms: 1_000, max_backoff_ms: 8_000 })
    }

    #[test]
    fn starts_disconnected() {
        assert_eq!(conn().state(), LinkState::Disconnected);
    }

    #[test]
    fn attempt_then_connect() {
        let mut c = conn();
        c.attempt();
        assert_eq!(c.state(), LinkState::Connecting);
        c.connected();
        assert_eq!(c.state(), LinkState::Connected);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut c = conn();
        c.attempt();
        let delays: Vec<u64> = (0..5).map(|_| c.failed().as_millis() as u64).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 8_000]);
    }

    #[test]
    fn success_resets_backoff() {
        let mut c = conn();
        c.attempt();
        c.failed();
        c.failed();
        c.attempt();
        c.connected();
        assert_eq!(c.failed().as_millis(), 1_000);
    }

    #[test]
    fn failure_without_data_is_disconnected() {
        let mut c = conn();
        c.attempt();
        c.failed();
        assert_eq!(c.state(), LinkState::Disconnected);
    }

    #[test]
    fn failure_with_retained_snapshot_is_degraded() {
        let mut c = conn();
        c.attempt();
        c.connected();
        c.note_data();
        c.failed();
        assert_eq!(c.state(), LinkState::Degraded);
    }

    #[test]
    fn status_tracks_heartbeat_age() {
        let mut st = LinkStatus::new("udpin:0.0.0.0:14557".into());
        assert!(st.hb_age().is_none());
        st.last_heartbeat = Some(Instant::now());
        assert!(st.hb_age().unwrap() < Duration::from_secs(1));
    }
}
