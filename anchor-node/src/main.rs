//! anchor-node: LoRa TDOA node entry point
//!
//! One binary, three roles:
//!   - beacon: transmits `BEACON` frames on an interval plus any line typed on
//!     stdin, and prints whatever it hears
//!   - anchor: timestamps every frame it hears and relays the arrival to a hub
//!   - hub:    collects arrivals from all anchors and solves positions
//!
//! Everything runs on a single-threaded tokio runtime. Nothing after startup
//! is fatal: bad frames, failed sends and malformed relay datagrams are
//! logged and the loop keeps going.

mod config;
mod relay;

use std::pin::pin;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tdoa_engine::beacon::bound_console_input;
use tdoa_engine::{
    wait_until_ready, BeaconTransmitter, PositioningEngine, StatusSink, TracingConsole, UdpRadio, MIN_ANCHORS,
};
use tdoa_types::SystemClock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use config::NodeConfig;
use relay::HubRelay;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "anchor-node", about = "LoRa TDOA beacon / anchor / hub node")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// What this node does
    #[arg(short, long, value_enum, default_value_t = Role::Anchor)]
    role: Role,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Role {
    Beacon,
    Anchor,
    Hub,
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anchor_node=info,tdoa_engine=info".into()),
        )
        .init();

    let args = Args::parse();
    let cfg = NodeConfig::load(&args.config).with_context(|| format!("loading {}", args.config))?;

    info!("🚀 anchor-node starting: role={:?}, anchor #{}", args.role, cfg.node.anchor_id);

    let mut engine = PositioningEngine::new(&cfg.engine);
    for a in &cfg.anchors {
        // Rejections are logged by the registry; the rest of the table still loads.
        let _ = engine.register_anchor(a.id, a.x, a.y);
    }

    match args.role {
        Role::Hub => run_hub(&cfg, engine).await,
        Role::Beacon => run_node(&cfg, engine, true).await,
        Role::Anchor => run_node(&cfg, engine, false).await,
    }
}

// ── Beacon / anchor loop ──────────────────────────────────────────────────────

async fn run_node(cfg: &NodeConfig, mut engine: PositioningEngine, transmit: bool) -> anyhow::Result<()> {
    let anchor_id = cfg.node.anchor_id;
    if !transmit && engine.registry().lookup(anchor_id).is_none() {
        warn!("Anchor #{anchor_id} is not in the anchor table; the hub will ignore its reports");
    }

    let mut radio = UdpRadio::bind(&cfg.radio.listen_addr, cfg.peer_addrs()?)?;
    info!(
        "Serial {} baud, radio {} baud (informational)",
        cfg.radio.serial_baud, cfg.radio.radio_baud
    );
    wait_until_ready(&radio, cfg.ready_timeout(), cfg.ready_poll())
        .await
        .context("radio module not ready")?;

    // Wall clock: the hub compares stamps from every anchor process.
    let clock = SystemClock::new();
    let mut console = TracingConsole;
    let mut beacon = if transmit {
        Some(BeaconTransmitter::new(&cfg.beacon.payload, cfg.beacon.max_console_input)?)
    } else {
        None
    };
    let mut relay = match cfg.hub_addr()? {
        Some(addr) if !transmit => {
            info!("📤 Relaying arrivals to hub {addr}");
            Some(HubRelay::new(addr)?)
        }
        _ => None,
    };

    let mut poll = interval(cfg.poll_interval());
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut send = interval(cfg.send_interval());
    send.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut heartbeat = interval(cfg.heartbeat_interval());
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = transmit;
    let mut shutdown = pin!(tokio::signal::ctrl_c());

    if transmit {
        info!("✉️ Beacon every {} ms; type a line to send it", cfg.beacon.send_interval_ms);
    }

    loop {
        tokio::select! {
            _ = poll.tick() => {
                let reports = engine.poll_radio(anchor_id, &mut radio, &clock, &mut console);
                if let Some(relay) = relay.as_mut() {
                    relay.forward(&reports);
                }
            }
            _ = send.tick(), if beacon.is_some() => {
                if let Some(tx) = beacon.as_mut() {
                    tx.send_beacon(&mut radio, &clock, &mut console);
                }
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if let Some(tx) = beacon.as_mut() {
                        send_console_line(tx, &line, &mut radio, &clock, &mut console);
                    }
                }
                Ok(None) => {
                    info!("Console closed, beacons continue");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Console read failed: {e}");
                    stdin_open = false;
                }
            },
            _ = heartbeat.tick() => {
                log_heartbeat(&engine, relay.as_ref().map(HubRelay::sent));
            }
            _ = &mut shutdown => {
                info!("Ctrl-C, shutting down");
                break;
            }
        }
    }
    Ok(())
}

fn send_console_line(
    tx: &mut BeaconTransmitter,
    line: &str,
    radio: &mut UdpRadio,
    clock: &SystemClock,
    console: &mut dyn StatusSink,
) {
    let text = line.trim();
    if text.is_empty() {
        return;
    }
    let bounded = bound_console_input(text, tx.max_payload_len());
    if bounded.len() < text.len() {
        warn!("Console input cut to {} bytes", bounded.len());
    }
    if let Err(e) = tx.send(bounded, radio, clock, console) {
        console.error(&format!("not sent: {e}"));
    }
}

// ── Hub loop ──────────────────────────────────────────────────────────────────

async fn run_hub(cfg: &NodeConfig, mut engine: PositioningEngine) -> anyhow::Result<()> {
    if engine.registry().count() < MIN_ANCHORS {
        warn!(
            "Only {} anchor(s) configured, at least {MIN_ANCHORS} are needed for a fix",
            engine.registry().count()
        );
    }

    let socket = UdpSocket::bind(&cfg.hub.listen_addr)
        .await
        .with_context(|| format!("binding hub socket {}", cfg.hub.listen_addr))?;
    info!("📡 Hub listening on UDP {}", socket.local_addr()?);

    let mut console = TracingConsole;
    let mut buf = vec![0u8; 4096];
    let mut heartbeat = interval(cfg.heartbeat_interval());
    let mut shutdown = pin!(tokio::signal::ctrl_c());

    loop {
        tokio::select! {
            res = socket.recv_from(&mut buf) => match res {
                Ok((len, src)) => {
                    if let Some(report) = relay::parse_report(&buf[..len], src) {
                        if engine.registry().lookup(report.anchor_id).is_none() {
                            debug!("Hub: report from unregistered anchor #{} ({src})", report.anchor_id);
                        }
                        engine.apply_report(&report, &mut console);
                    }
                }
                Err(e) => warn!("Hub: UDP recv error: {e}"),
            },
            _ = heartbeat.tick() => log_heartbeat(&engine, None),
            _ = &mut shutdown => {
                info!("Ctrl-C, shutting down");
                break;
            }
        }
    }
    Ok(())
}

// ── Heartbeat ─────────────────────────────────────────────────────────────────

fn log_heartbeat(engine: &PositioningEngine, relayed: Option<u64>) {
    let c = engine.counters();
    let store = engine.store();
    info!(
        "💓 alive | rx_buf={}B | records={}/{} | frames={} packets={} raw={} overflows={} | dup={} ignored={} evicted={} lost={} | fixes={} failed={}{}",
        engine.pending_bytes(),
        store.len(),
        store.capacity(),
        c.frames,
        c.packets,
        c.raw_frames,
        c.overflows,
        c.duplicates,
        c.arrivals_ignored,
        c.evictions,
        c.lost_records,
        c.fixes,
        c.failed_solves,
        relayed.map(|n| format!(" | relayed={n}")).unwrap_or_default()
    );
}
