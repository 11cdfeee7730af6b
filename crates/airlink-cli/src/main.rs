use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use airlink_fc::link::LinkReader;
use airlink_fc::state::LinkStatus;
use airlink_fc::LinkConfig;
use airlink_hub::hub::BroadcastHub;
use airlink_hub::store::StateStore;
use airlink_hub::HubConfig;
use airlink_proto::telemetry::TelemetryFrame;
use airlink_server::{AppState, ServerConfig};
use airlink_uplink::{doctor as uplink_doctor, Uplink, UplinkConfig};

#[derive(Debug, Parser)]
#[command(name = "airlink", version, about = "AIRLINK - real-time flight telemetry bridge")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config without touching the link or the network.
    Doctor,
    /// Bridge the telemetry link to dashboard clients.
    Run,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    link: LinkConfig,
    #[serde(default)]
    hub: HubConfig,
    server: ServerConfig,
    uplink: Option<UplinkConfig>,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    parse_config(&s)
}

fn parse_config(s: &str) -> Result<Config> {
    Ok(toml::from_str(s).context("parse config toml")?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(cfg).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    check_link_url(&cfg.link.url)?;
    anyhow::ensure!(
        cfg.link.reconnect.initial_backoff_ms >= 100,
        "link.reconnect.initial_backoff_ms too small; set >= 100"
    );
    anyhow::ensure!(
        cfg.link.reconnect.max_backoff_ms >= cfg.link.reconnect.initial_backoff_ms,
        "link.reconnect.max_backoff_ms below initial"
    );

    anyhow::ensure!(cfg.hub.queue_depth >= 1, "hub.queue_depth must be >= 1");

    cfg.server
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("server.bind invalid: {}", cfg.server.bind))?;

    if let Some(u) = &cfg.uplink {
        if u.enable {
            uplink_doctor::check_endpoint(&u.endpoint)?;
            uplink_doctor::check_spool(&u.spool_dir, u.spool_max_mb)?;
            anyhow::ensure!(u.interval_secs >= 1, "uplink.interval_secs must be >= 1");
        }
    }

    info!("doctor: OK");
    Ok(())
}

fn check_link_url(url: &str) -> Result<()> {
    let (scheme, rest) = url.split_once(':').unwrap_or((url, ""));
    match scheme {
        "udpin" | "udpout" | "udpbcast" | "tcpin" | "tcpout" => {
            let port = rest.rsplit_once(':').map(|(_, p)| p);
            anyhow::ensure!(
                port.is_some_and(|p| p.parse::<u16>().is_ok()),
                "link.url needs host:port after {}:",
                scheme
            );
        }
        "serial" => {
            let baud = rest.rsplit_once(':').map(|(_, b)| b);
            anyhow::ensure!(
                baud.is_some_and(|b| b.parse::<u32>().is_ok()),
                "link.url serial form is serial:<dev>:<baud>"
            );
        }
        "file" => {
            anyhow::ensure!(!rest.is_empty(), "link.url file form is file:<path>");
        }
        other => anyhow::bail!("unknown link.url scheme: {}", other),
    }
    Ok(())
}

async fn run(cfg: Config) -> Result<()> {
    info!("run: starting");

    let store = Arc::new(StateStore::new());
    let hub = Arc::new(BroadcastHub::new(store.clone(), cfg.hub.queue_depth));
    let link_status = Arc::new(Mutex::new(LinkStatus::new(cfg.link.url.clone())));
    let shutdown = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Reader loop in a blocking task (mavlink recv blocks).
    let reader = LinkReader::new(
        cfg.link.clone(),
        store.clone(),
        hub.clone(),
        link_status.clone(),
        shutdown.clone(),
    );
    let _reader_handle = tokio::task::spawn_blocking(move || reader.run());

    let mut uplink_handle = None;
    if let Some(ucfg) = cfg.uplink.as_ref().filter(|u| u.enable) {
        let uplink = Uplink::new(ucfg)?;
        info!("uplink: forwarding to {} every {}s", ucfg.endpoint, ucfg.interval_secs);
        uplink_handle = Some(tokio::spawn(run_uplink(
            uplink,
            store.clone(),
            ucfg.interval_secs,
            shutdown_rx.clone(),
        )));
    }

    let state = Arc::new(AppState {
        store: store.clone(),
        hub: hub.clone(),
        link: link_status,
    });
    airlink_server::serve(&cfg.server, state, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("run: shutdown requested");
    })
    .await?;

    // Listener is down. Stop producers and release every subscriber; the
    // reader observes the flag at its next message or backoff tick.
    shutdown.store(true, Ordering::Relaxed);
    let _ = shutdown_tx.send(true);
    hub.close_all();
    if let Some(h) = uplink_handle {
        let _ = h.await;
    }

    info!("run: stopped");
    Ok(())
}

async fn run_uplink(
    mut uplink: Uplink,
    store: Arc<StateStore>,
    base_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let wait = uplink.effective_interval_secs(base_secs);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(wait)) => {}
            _ = shutdown.changed() => return,
        }

        let Some(snap) = store.get() else { continue };
        let age_ms = store.age().map(|d| d.as_millis() as u64).unwrap_or_default();
        let frame = TelemetryFrame::new(&snap, age_ms);

        if let Err(e) = uplink.send_frame(&frame).await {
            warn!("uplink send failed: {:#}", e);
        }
        if let Err(e) = uplink.flush_spool().await {
            warn!("uplink flush failed: {:#}", e);
        }
    }
}
