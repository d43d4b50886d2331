//! midi-keyhub - MIDI keyboard discovery and monitoring
//!
//! Lists MIDI devices with their piano ranking, picks the best controller and
//! monitors its key events.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use midi_keyhub::catalog::{is_piano_keyboard, score_for_piano};
use midi_keyhub::{BackendKind, DeviceDescriptor, DeviceHub, Direction, HubConfig, KeyEvent};

/// How often monitor mode prints statistics
const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// MIDI keyboard hub - discover, rank and monitor MIDI controllers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "KEYHUB_CONFIG")]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// MIDI backend, overrides the configuration file
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// List available MIDI devices
    #[arg(long)]
    list_ports: bool,

    /// Print the device list as JSON
    #[arg(long, requires = "list_ports")]
    json: bool,

    /// Print the best piano controller
    #[arg(long)]
    best: bool,

    /// Connect and print key events until Ctrl+C
    #[arg(long)]
    monitor: bool,

    /// Device name pattern to monitor (defaults to the best controller)
    #[arg(short, long, requires = "monitor")]
    device: Option<String>,
}

#[derive(Serialize)]
struct PortRow<'a> {
    #[serde(flatten)]
    device: &'a DeviceDescriptor,
    piano_score: i32,
    piano_keyboard: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(&args.log_level, args.log_json)?;

    let mut config = match &args.config {
        Some(path) => {
            info!("Configuration file: {}", path);
            HubConfig::load(path).await?
        }
        None => HubConfig::default(),
    };
    if let Some(backend) = args.backend {
        config.backend = backend;
    }

    let hub = DeviceHub::new(config);
    hub.initialize().context("Failed to initialize MIDI hub")?;

    if args.best {
        print_best(&hub);
    } else if args.monitor {
        run_monitor(&hub, args.device.as_deref()).await?;
    } else if args.list_ports && args.json {
        list_ports_json(&hub)?;
    } else {
        list_ports_formatted(&hub);
    }

    hub.shutdown();
    Ok(())
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .try_init()
    };
    installed.context("Failed to install log subscriber")?;

    Ok(())
}

fn list_ports_formatted(hub: &DeviceHub) {
    println!("\n{}", "=== Available MIDI Devices ===".bold().cyan());
    println!("  backend: {}", hub.backend_name().dimmed());

    let devices = hub.devices();
    if devices.is_empty() {
        println!("  {}", "No MIDI devices found".dimmed());
        return;
    }

    for device in &devices {
        let marker = if is_piano_keyboard(device) {
            "[PIANO]".green()
        } else if device.supports_output {
            "[SYNTH]".yellow()
        } else {
            "[OTHER]".dimmed()
        };
        let io = match (device.supports_input, device.supports_output) {
            (true, true) => "in/out",
            (true, false) => "in",
            (false, true) => "out",
            (false, false) => "-",
        };
        println!(
            "  {:>3} {} {} ({}, {}, score {})",
            device.id,
            marker,
            device.name.bright_white(),
            device.manufacturer,
            io,
            score_for_piano(device)
        );
    }

    print_best(hub);
}

fn list_ports_json(hub: &DeviceHub) -> Result<()> {
    let devices = hub.devices();
    let rows: Vec<PortRow> = devices
        .iter()
        .map(|device| PortRow {
            device,
            piano_score: score_for_piano(device),
            piano_keyboard: is_piano_keyboard(device),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows).context("Failed to serialize device list")?);
    Ok(())
}

fn print_best(hub: &DeviceHub) {
    let best = hub.best_piano_controller();
    if best.is_found() {
        println!("\n{}", "Best piano controller:".bold().bright_green());
        println!("  {} (id {}, score {})", best.name.bright_white(), best.id, score_for_piano(&best));
    } else {
        println!("\n{}", "No piano controller found".yellow());
    }
}

/// Directions a device can be opened with
fn direction_for(device: &DeviceDescriptor) -> Option<Direction> {
    match (device.supports_input, device.supports_output) {
        (true, true) => Some(Direction::Both),
        (true, false) => Some(Direction::InputOnly),
        (false, true) => Some(Direction::OutputOnly),
        (false, false) => None,
    }
}

fn print_key_event(event: KeyEvent) {
    let state = if event.is_down() {
        "DOWN".green()
    } else {
        "UP  ".red()
    };
    println!(
        "{:>10.3}s {} {:?} ch{:<2} note {:>3} vel {:>3}",
        event.timestamp, state, event.device_class, event.channel, event.note, event.velocity
    );
}

async fn run_monitor(hub: &DeviceHub, pattern: Option<&str>) -> Result<()> {
    let device = match pattern {
        Some(pattern) => hub.find_device(pattern),
        None => hub.best_piano_controller(),
    };
    if !device.is_found() {
        anyhow::bail!(
            "No MIDI device to monitor{}",
            pattern.map(|p| format!(" matching '{}'", p)).unwrap_or_default()
        );
    }
    let direction = direction_for(&device)
        .with_context(|| format!("Device '{}' has no ports", device.name))?;

    hub.set_key_event_callback(print_key_event);
    hub.set_connection_callback(|device: DeviceDescriptor, connected: bool| {
        let status = if connected { "plugged".green() } else { "removed".red() };
        println!("{} {}", device.name.bright_white(), status);
    });

    hub.connect(device.id, direction)
        .with_context(|| format!("Failed to connect to '{}'", device.name))?;
    println!(
        "{} {} {}",
        "Monitoring".bold().cyan(),
        device.name.bright_white(),
        "(Ctrl+C to stop)".dimmed()
    );

    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let stats = hub.statistics();
                println!(
                    "{} received {} sent {} dropped {} latency {:.2}ms (max {:.2}ms)",
                    "[stats]".dimmed(),
                    stats.received,
                    stats.sent,
                    stats.dropped,
                    stats.average_latency_ms,
                    stats.max_latency_ms
                );
            }
        }
    }

    hub.clear_callbacks();
    Ok(())
}
