//! StageLink GW - standalone MIDI translation gateway
//!
//! Listens on a MIDI input port, translates events through the mapping
//! table, and relays the results to the sender process that owns the
//! output port.

use anyhow::{anyhow, Result};
use clap::Parser;
use midir::{MidiInput, MidiInputConnection};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stagelink_gw::config::{Settings, SettingsWatcher};
use stagelink_gw::gateway::{Gateway, LogRegistrar};
use stagelink_gw::helper::HelperConfig;
use stagelink_gw::paths::AppPaths;

/// StageLink Gateway - translate performance MIDI and relay it to the sender process
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the settings file
    #[arg(short, long, default_value = "settings.yaml")]
    settings: String,

    /// MIDI input port to listen on (case-insensitive substring)
    #[arg(short, long, env = "STAGELINK_INPUT_PORT", default_value = "StageLink")]
    input_port: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Unix socket path shared with the sender process
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Path to the sender binary (defaults to stagelink-sender next to the executable)
    #[arg(long)]
    sender: Option<PathBuf>,

    /// Also write logs to a daily file in the logs directory
    #[arg(long)]
    log_file: bool,

    /// List available MIDI input ports
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let mut paths = AppPaths::detect();
    if let Some(socket) = &args.socket {
        paths.socket = socket.clone();
    }
    if let Some(sender) = &args.sender {
        paths.sender = sender.clone();
    }

    let _log_guard = init_logging(&args, &paths)?;

    if args.list_ports {
        list_ports()?;
        return Ok(());
    }

    info!("Starting StageLink GW...");
    info!("Settings file: {}", args.settings);
    info!("Sender binary: {}", paths.sender.display());

    let settings = Settings::load(&args.settings).await?;
    info!("Settings loaded successfully ({} rules)", settings.rules.len());

    // Change signals only; reloading and recompiling happen in the loop below
    let mut settings_watcher = SettingsWatcher::watch(Path::new(&args.settings))?;

    let helper = HelperConfig::new(&paths.sender, &paths.socket);
    let mut gateway = Gateway::new(helper);
    let mut registrar = LogRegistrar;

    gateway.attach(&settings, &mut registrar).await?;

    // Feed raw input-port bytes into the async loop; the midir callback
    // runs on its own thread, so the unbounded sender's sync send fits.
    let (midi_tx, mut midi_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let _midi_conn = connect_input(&args.input_port, midi_tx)?;

    info!("Ready to process MIDI events!");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(raw) = midi_rx.recv() => {
                gateway.on_midi(&raw);
            }

            Some(()) = settings_watcher.changed() => {
                info!("📝 Settings file changed, recompiling table...");
                match Settings::load(&args.settings).await {
                    Ok(new_settings) => {
                        let summary = gateway.reload_rules(&new_settings, &mut registrar);
                        info!("✅ Table recompiled: {}", summary);
                    }
                    Err(e) => {
                        warn!("Failed to reload settings (keeping old table): {}", e);
                    }
                }
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    gateway.detach().await;
    info!("StageLink GW shutdown complete");
    Ok(())
}

fn init_logging(
    args: &Args,
    paths: &AppPaths,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    if args.log_file {
        paths.ensure_directories()?;
        let appender = tracing_appender::rolling::daily(&paths.logs_dir, "stagelink-gw.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_ansi(false)
                    .with_writer(writer),
            )
            .init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::registry().with(filter).with(console).init();
        Ok(None)
    }
}

/// Connect to the first input port whose name contains the pattern
fn connect_input(
    pattern: &str,
    tx: mpsc::UnboundedSender<Vec<u8>>,
) -> Result<MidiInputConnection<()>> {
    let midi_in = MidiInput::new("StageLink-GW-In")?;

    let (port, name) = find_input_port(&midi_in, pattern)
        .ok_or_else(|| anyhow!("Input port matching '{}' not found", pattern))?;

    let conn = midi_in
        .connect(
            &port,
            "stagelink-gw-in",
            move |_timestamp, data, _| {
                tx.send(data.to_vec()).ok();
            },
            (),
        )
        .map_err(|e| anyhow!("Failed to connect input port '{}': {}", name, e))?;

    info!("🎹 Listening on '{}'", name);
    Ok(conn)
}

/// Find an input port by case-insensitive substring match
fn find_input_port(midi_in: &MidiInput, pattern: &str) -> Option<(midir::MidiInputPort, String)> {
    for port in midi_in.ports() {
        if let Ok(name) = midi_in.port_name(&port) {
            if name.to_lowercase().contains(&pattern.to_lowercase()) {
                return Some((port, name));
            }
        }
    }
    None
}

fn list_ports() -> Result<()> {
    use colored::*;

    let midi_in = MidiInput::new("StageLink-GW-Scanner")?;
    let ports = midi_in.ports();

    println!("{}", "Available MIDI input ports:".bold().cyan());
    if ports.is_empty() {
        println!("  {}", "(none)".yellow());
    }
    for (i, port) in ports.iter().enumerate() {
        let name = midi_in
            .port_name(port)
            .unwrap_or_else(|_| "<unknown>".to_string());
        println!("  [{}] {}", i, name.green());
    }

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
