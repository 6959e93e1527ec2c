//! OSTRVO Node
//!
//! Deployable street microgrid coordination node: loads its TOML
//! configuration, bridges the radio over UDP broadcast, and drives the
//! coordination loop at the configured tick period.

mod config;

use clap::Parser;
use config::NodeConfig;
use ostrvo_core::{Coordinator, FixedTelemetry, RelayBank, UdpTransport};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// OSTRVO street microgrid node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the node configuration file
    #[arg(short, long, default_value = "ostrvo.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Invalid safety configuration must never reach the loop
    let cfg = NodeConfig::load(&args.config)?;
    info!(
        node = %cfg.node_id,
        roster = cfg.coordinator.roster.len(),
        relays = cfg.relays.len(),
        "configuration loaded"
    );

    let transport = UdpTransport::bind(cfg.listen_addr, cfg.broadcast_addr).await?;
    info!(listen = %transport.local_addr()?, peer = %cfg.broadcast_addr, "radio bridge up");

    // Sensor drivers are external collaborators; until one is wired in the
    // node reports its configured baseline
    let sensor = FixedTelemetry(cfg.initial_sample());
    let relays = RelayBank::new(cfg.relays.clone());
    let mut coordinator =
        Coordinator::new(cfg.node_id.clone(), cfg.coordinator.clone(), transport, sensor, relays)?;

    let period = Duration::from_secs(u64::from(cfg.coordinator.tick_interval_secs));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(period_secs = cfg.coordinator.tick_interval_secs, "entering coordination loop");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let summary = coordinator.run_tick();
                info!(
                    tick = summary.tick,
                    phase = %summary.phase,
                    generation = %summary.snapshot.total_generation_kw,
                    load = %summary.snapshot.total_load_kw,
                    reserve = %summary.snapshot.total_reserve_kwh,
                    healthy = summary.snapshot.healthy_node_count,
                    anchors = summary.snapshot.reference_anchor_count,
                    commands = summary.commands_issued,
                    "tick complete"
                );
            }
            // Shutdown is tick-granular: a tick in flight finished before
            // this branch could run, and nothing further is sent
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    let counters = coordinator.counters();
    info!(
        frames = counters.frames_received,
        decode_failures = counters.decode_failures,
        rejected = counters.rejected_reports,
        commands = counters.commands_sent,
        "node stopped"
    );
    Ok(())
}
