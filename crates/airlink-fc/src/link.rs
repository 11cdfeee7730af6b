use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use mavlink::common::MavMessage;
use mavlink::error::MessageReadError;
use mavlink::MavConnection;
use tracing::{debug, info, warn};

use airlink_hub::hub::BroadcastHub;
use airlink_hub::store::StateStore;
use airlink_proto::telemetry::TelemetrySnapshot;

use crate::mav::update_from_message;
use crate::state::{LinkConn, LinkState, LinkStatus};
use crate::LinkConfig;

/// Owns the flight-controller connection. Runs as one long-lived blocking
/// loop: connect, pump messages, merge fields into the current snapshot,
/// hand the result to the store and the hub, reconnect on loss. Loss of
/// the link never takes the service down and the retained snapshot is left
/// untouched while reconnecting.
pub struct LinkReader {
    cfg: LinkConfig,
    store: Arc<StateStore>,
    hub: Arc<BroadcastHub>,
    status: Arc<Mutex<LinkStatus>>,
    shutdown: Arc<AtomicBool>,
    current: TelemetrySnapshot,
    next_seq: u64,
}

impl LinkReader {
    pub fn new(
        cfg: LinkConfig,
        store: Arc<StateStore>,
        hub: Arc<BroadcastHub>,
        status: Arc<Mutex<LinkStatus>>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            cfg,
            store,
            hub,
            status,
            shutdown,
            current: TelemetrySnapshot::default(),
            next_seq: 0,
        }
    }

    /// Blocking. Call from `tokio::task::spawn_blocking`; the transport
    /// recv blocks, so the loop observes shutdown at the next message,
    /// read error, or backoff tick.
    pub fn run(mut self) {
        let mut conn = LinkConn::new(self.cfg.reconnect.clone());

        while !self.shutdown.load(Ordering::Relaxed) {
            conn.attempt();
            self.set_state(LinkState::Connecting);
            info!("link: connecting to {}", self.cfg.url);

            match self.open() {
                Ok(link) => {
                    conn.connected();
                    self.set_state(LinkState::Connected);
                    info!("link: connected to {}", self.cfg.url);
                    self.pump(link.as_ref(), &mut conn);
                }
                Err(e) => {
                    warn!("link: connect failed: {:#}", e);
                    self.set_error(format!("{:#}", e));
                }
            }

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }

            let delay = conn.failed();
            self.set_state(conn.state());
            warn!(
                "link: {} ({}), retrying in {:?}",
                conn.state().as_str(),
                self.cfg.url,
                delay
            );
            self.sleep_interruptible(delay);
        }

        self.set_state(LinkState::Disconnected);
        info!("link: reader stopped");
    }

    fn open(&self) -> Result<Box<dyn MavConnection<MavMessage> + Send + Sync>> {
        // quick validate a serial device before handing it to mavlink
        if let Some(rest) = self.cfg.url.strip_prefix("serial:") {
            let (dev, baud) = rest
                .rsplit_once(':')
                .context("serial url must be serial:<dev>:<baud>")?;
            let baud: u32 = baud.parse().context("serial baud rate")?;
            let _ = tokio_serial::new(dev, baud)
                .open_native()
                .with_context(|| format!("open fc serial device {}", dev))?;
        }

        mavlink::connect::<MavMessage>(&self.cfg.url)
            .with_context(|| format!("mavlink connect {}", self.cfg.url))
    }

    /// Read until an I/O error or shutdown. Malformed frames are discarded
    /// and do not touch the stored snapshot or the connection.
    fn pump(&mut self, link: &(dyn MavConnection<MavMessage> + Send + Sync), conn: &mut LinkConn) {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            match link.recv() {
                Ok((_hdr, msg)) => self.on_message(&msg, conn),
                Err(MessageReadError::Parse(e)) => {
                    debug!("link: discarding malformed frame: {:?}", e);
                }
                Err(MessageReadError::Io(e))
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    // nothing to read right now
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(MessageReadError::Io(e)) => {
                    warn!("link: read failed: {}", e);
                    self.set_error(e.to_string());
                    return;
                }
            }
        }
    }

    fn on_message(&mut self, msg: &MavMessage, conn: &mut LinkConn) {
        if matches!(msg, MavMessage::HEARTBEAT(_)) {
            self.status.lock().unwrap().last_heartbeat = Some(std::time::Instant::now());
        }

        let Some(update) = update_from_message(msg) else {
            return;
        };

        self.next_seq += 1;
        self.current = self.current.merged(&update, self.next_seq, unix_ms());

        let snap = Arc::new(self.current.clone());
        self.store.replace(snap.clone());
        self.hub.publish(snap);
        conn.note_data();

        let mut st = self.status.lock().unwrap();
        st.messages += 1;
    }

    fn set_state(&self, state: LinkState) {
        self.status.lock().unwrap().state = state;
    }

    fn set_error(&self, err: String) {
        self.status.lock().unwrap().last_error = Some(err);
    }

    fn sleep_interruptible(&self, total: Duration) {
        let step = Duration::from_millis(100);
        let mut remaining = total;
        while remaining > Duration::ZERO {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            let chunk = remaining.min(step);
            std::thread::sleep(chunk);
            remaining -= chunk;
        }
    }
}

fn unix_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
