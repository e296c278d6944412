//! tdoa-sim: synthetic arrival generator for the TDOA positioning engine.
//!
//! Each epoch the emitter moves along its configured path and sends one
//! beacon. Every anchor's arrival time is time of flight plus Gaussian
//! jitter, with random dropouts and duplicate deliveries. The arrivals are
//! fed to an in-process `PositioningEngine` and the fix is scored against
//! ground truth. With `--hub-addr` the same arrivals are also sent to a
//! running hub as relay datagrams.

mod physics;
mod scenario;
mod sim;
mod udp_tx;

use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tdoa_engine::TracingConsole;
use tokio::time::interval;
use tracing::info;

use scenario::ScenarioConfig;
use sim::{Accuracy, Simulation};
use udp_tx::HubForwarder;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tdoa-sim", about = "LoRa TDOA arrival simulator")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Built-in scenario instead of the config file (ideal, noisy, lossy, collinear)
    #[arg(long)]
    preset: Option<String>,
    /// Override the number of epochs
    #[arg(long)]
    epochs: Option<u32>,
    /// Override the RNG seed
    #[arg(long)]
    seed: Option<u64>,
    /// Also send arrivals to this hub (host:port)
    #[arg(long)]
    hub_addr: Option<String>,
    /// Pace epochs at the beacon interval instead of running flat out
    #[arg(long)]
    realtime: bool,
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tdoa_simulator=info,tdoa_engine=warn".into()),
        )
        .init();

    let args = Args::parse();

    let mut cfg = match &args.preset {
        Some(name) => scenario::preset(name).ok_or_else(|| anyhow!("unknown preset {name:?}"))?,
        None => {
            let raw = std::fs::read_to_string(&args.config)
                .unwrap_or_else(|_| include_str!("../config.toml").to_string());
            ScenarioConfig::from_toml(&raw).context("invalid config.toml")?
        }
    };
    if let Some(epochs) = args.epochs {
        cfg.simulation.epochs = epochs;
    }
    if let Some(seed) = args.seed {
        cfg.simulation.seed = Some(seed);
    }

    let rng = match cfg.simulation.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let epochs = cfg.simulation.epochs;
    let beacon_interval = Duration::from_millis(cfg.simulation.beacon_interval_ms.max(1));

    info!(
        "🛰 TDOA simulator: {} anchors, {} epochs, σ={} ns, dropout={}, duplicate={}",
        cfg.anchors.len(),
        epochs,
        cfg.timing.sigma_ns,
        cfg.timing.dropout_rate,
        cfg.timing.duplicate_rate
    );

    let mut sim = Simulation::new(cfg, rng)?;
    let forwarder = match &args.hub_addr {
        Some(addr) => {
            info!("📤 Forwarding arrivals to hub {addr}");
            Some(HubForwarder::new(addr).context("binding UDP socket")?)
        }
        None => None,
    };

    let mut console = TracingConsole;
    let mut accuracy = Accuracy::default();
    let mut ticker = interval(beacon_interval);

    for epoch in 1..=epochs {
        if args.realtime {
            ticker.tick().await;
        }
        let result = sim.step(&mut console);
        if let Some(fwd) = &forwarder {
            fwd.send_epoch(&result);
        }
        accuracy.record(&result);

        if epoch % 50 == 0 {
            let s = accuracy.summary();
            info!("⏱ epoch {epoch}/{epochs} | fixes={} | mean err={:.2} m", s.fixes, s.mean_m);
        }
    }

    let s = accuracy.summary();
    let c = sim.engine().counters();
    info!(
        "🏁 {} epochs | fix rate {:.1}% | mean {:.3} m | p95 {:.3} m | max {:.3} m",
        s.epochs,
        s.fix_rate * 100.0,
        s.mean_m,
        s.p95_m,
        s.max_m
    );
    info!(
        "Engine: arrivals={} duplicates={} ignored={} evictions={} lost={} fixes={} failed={} ({} anchors registered)",
        c.arrivals_accepted,
        c.duplicates,
        c.arrivals_ignored,
        c.evictions,
        c.lost_records,
        c.fixes,
        c.failed_solves,
        sim.engine().registry().count()
    );
    Ok(())
}
