//! Optional forwarder that ships the latest telemetry frame to a remote
//! collector over TLS. Frames that cannot be delivered are spooled to disk
//! and retried on later ticks; a struggling collector stretches the send
//! interval instead of backing up the bridge.

pub mod doctor;

use anyhow::{Context, Result};
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::ServerName;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::{fs, io::AsyncWriteExt, net::TcpStream};
use tokio_rustls::TlsConnector;
use tracing::{info, warn};

use airlink_proto::telemetry::TelemetryFrame;

#[derive(Debug, Clone, Deserialize)]
pub struct UplinkConfig {
    pub enable: bool,
    /// Collector endpoint, "tls://host:port".
    pub endpoint: String,
    pub spool_dir: String,
    pub spool_max_mb: u64,
    /// Base send interval; stretched when the collector misbehaves.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 {
    30
}

#[derive(Debug, Clone)]
pub struct UplinkHealth {
    pub rtt_ms: Option<u32>,
    pub quality: u8, // 0-100
    pub consecutive_failures: u32,
}

impl Default for UplinkHealth {
    fn default() -> Self {
        Self { rtt_ms: None, quality: 100, consecutive_failures: 0 }
    }
}

impl UplinkHealth {
    fn on_success(&mut self, rtt_ms: u32) {
        self.rtt_ms = Some(rtt_ms);
        self.consecutive_failures = 0;
        self.quality = (self.quality + 10).min(100);
    }

    fn on_failure(&mut self) {
        self.consecutive_failures += 1;
        self.quality = self.quality.saturating_sub(20);
    }
}

pub struct Uplink {
    endpoint: String,
    spool_dir: String,
    spool_max_bytes: u64,
    tls: TlsConnector,
    health: UplinkHealth,
}

impl Uplink {
    pub fn new(cfg: &UplinkConfig) -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_cfg = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            endpoint: cfg.endpoint.clone(),
            spool_dir: cfg.spool_dir.clone(),
            spool_max_bytes: cfg.spool_max_mb * 1024 * 1024,
            tls: TlsConnector::from(Arc::new(tls_cfg)),
            health: UplinkHealth::default(),
        })
    }

    pub fn health(&self) -> &UplinkHealth {
        &self.health
    }

    /// Seconds until the next send attempt. Consecutive failures shift the
    /// base interval up to a 600s ceiling; a degraded-but-working collector
    /// gets a gentler stretch by quality tier.
    pub fn effective_interval_secs(&self, base: u64) -> u64 {
        if self.health.consecutive_failures > 0 {
            let backoff = base << self.health.consecutive_failures.min(4);
            return backoff.min(600);
        }
        match self.health.quality {
            80..=100 => base,
            50..=79 => base * 2,
            20..=49 => base * 4,
            _ => base * 10,
        }
    }

    /// Queue one frame for delivery. The frame lands in the spool first;
    /// `flush_spool` performs the actual network sends.
    pub async fn send_frame(&mut self, frame: &TelemetryFrame) -> Result<()> {
        let payload = serde_json::to_vec(frame)?;
        self.spool_write(&payload).await
    }

    async fn spool_write(&self, payload: &[u8]) -> Result<()> {
        fs::create_dir_all(&self.spool_dir).await?;
        if self.spool_usage().await? >= self.spool_max_bytes {
            warn!("uplink: spool over {} bytes, dropping frame", self.spool_max_bytes);
            return Ok(());
        }
        let name = format!(
            "{}/{}.json",
            self.spool_dir,
            time::OffsetDateTime::now_utc().unix_timestamp_nanos()
        );
        let mut f = fs::File::create(&name).await?;
        f.write_all(payload).await?;
        Ok(())
    }

    async fn spool_usage(&self) -> Result<u64> {
        let mut total = 0;
        let mut entries = fs::read_dir(&self.spool_dir).await?;
        while let Some(ent) = entries.next_entry().await? {
            total += ent.metadata().await?.len();
        }
        Ok(total)
    }

    /// Send every spooled frame, oldest first by name. Stops at the first
    /// failure; whatever is left stays for the next tick.
    pub async fn flush_spool(&mut self) -> Result<()> {
        let dir = Path::new(&self.spool_dir);
        if !dir.exists() {
            return Ok(());
        }
        let mut paths = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(ent) = entries.next_entry().await? {
            if ent.path().is_file() {
                paths.push(ent.path());
            }
        }
        paths.sort();

        for path in paths {
            let payload = fs::read(&path).await?;
            self.send_blob(&payload).await?;
            fs::remove_file(&path).await.ok();
        }
        Ok(())
    }

    async fn send_blob(&mut self, payload: &[u8]) -> Result<()> {
        let start = std::time::Instant::now();

        let ep = self
            .endpoint
            .strip_prefix("tls://")
            .context("endpoint must start with tls://")?;
        let (host, port) = ep.split_once(':').context("endpoint missing port")?;
        let addr = format!("{}:{}", host, port);

        let result = async {
            let tcp = TcpStream::connect(addr).await?;
            let name = ServerName::try_from(host.to_string())?;
            let mut tls = self.tls.connect(name, tcp).await?;

            // simple framing: u32 length + payload
            let len = (payload.len() as u32).to_be_bytes();
            tls.write_all(&len).await?;
            tls.write_all(payload).await?;
            tls.flush().await?;

            Ok::<(), anyhow::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                let rtt = start.elapsed().as_millis() as u32;
                self.health.on_success(rtt);
                info!(
                    "uplink: sent {} bytes (RTT: {}ms, quality: {}%)",
                    payload.len(),
                    rtt,
                    self.health.quality
                );
                Ok(())
            }
            Err(e) => {
                self.health.on_failure();
                warn!(
                    "uplink: send failed (failures: {}, quality: {}%): {:#}",
                    self.health.consecutive_failures, self.health.quality, e
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(spool_dir: &str, max_mb: u64) -> UplinkConfig {
        UplinkConfig {
            enable: true,
            endpoint: "tls://collector.example.net:9443".into(),
            spool_dir: spool_dir.into(),
            spool_max_mb: max_mb,
            interval_secs: 30,
        }
    }

    fn frame() -> TelemetryFrame {
        TelemetryFrame {
            seq: 1,
            ts_ms: 1_000,
            age_ms: 0,
            lat: Some(47.0),
            lon: Some(8.0),
            alt: None,
            roll: None,
            pitch: None,
            yaw: None,
            battery: Some(90),
        }
    }

    #[tokio::test]
    async fn frames_are_spooled_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut up = Uplink::new(&cfg(dir.path().to_str().unwrap(), 64)).unwrap();

        up.send_frame(&frame()).await.unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let body = std::fs::read(files[0].as_ref().unwrap().path()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["battery"], serde_json::json!(90));
        assert_eq!(json["alt"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn full_spool_drops_instead_of_growing() {
        let dir = tempfile::tempdir().unwrap();
        // zero budget: the spool is considered full from the start
        let mut up = Uplink::new(&cfg(dir.path().to_str().unwrap(), 0)).unwrap();

        up.send_frame(&frame()).await.unwrap();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn interval_stretches_with_failures_then_caps() {
        let dir = tempfile::tempdir().unwrap();
        let mut up = Uplink::new(&cfg(dir.path().to_str().unwrap(), 64)).unwrap();
        assert_eq!(up.effective_interval_secs(30), 30);

        for _ in 0..3 {
            up.health.on_failure();
        }
        assert_eq!(up.effective_interval_secs(30), 240);

        for _ in 0..10 {
            up.health.on_failure();
        }
        assert_eq!(up.effective_interval_secs(30), 480);
    }

    #[test]
    fn quality_recovers_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut up = Uplink::new(&cfg(dir.path().to_str().unwrap(), 64)).unwrap();

        for _ in 0..4 {
            up.health.on_failure();
        }
        assert_eq!(up.health.quality, 20);

        up.health.on_success(12);
        assert_eq!(up.health.consecutive_failures, 0);
        assert_eq!(up.health.quality, 30);
        assert_eq!(up.health.rtt_ms, Some(12));
        // quality tier still stretches the interval until it climbs back
        assert_eq!(up.effective_interval_secs(30), 120);
    }
}
