mod bluetooth;
mod config;
mod device;
mod protocol;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bluer::{Adapter, Address};
use clap::{Parser, Subcommand};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use bluetooth::gatt::BluerTransport;
use bluetooth::scanner;
use config::AppConfig;
use device::equalizer::{EqState, BAND_COUNT, FREQUENCIES};
use device::presets::{find_custom_preset, BuiltinPreset, APP_PRESETS, CUSTOM_PRESETS};
use device::{autoeq, DeviceSession, SessionEvent, SessionState};

/// How long to keep listening for confirmations after the last command.
const SETTLE_TIME: Duration = Duration::from_millis(600);

/// How long `info` waits for the battery reply.
const INFO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "fairbuds", about = "Equalizer control for Fairphone Fairbuds")]
struct Cli {
    /// Bluetooth address to use instead of scanning
    #[arg(long, global = true)]
    device: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Seconds to scan for devices
    #[arg(long, default_value_t = 5, global = true)]
    scan_secs: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List Fairbuds entries in range
    Scan,
    /// Show battery levels and device name
    Info,
    /// Select a built-in preset: main, bass, flat, studio or 1-4
    Preset { preset: BuiltinPreset },
    /// Apply a bundled preset (prefix with "app:" for the fixed-Q set)
    Custom { name: String },
    /// Apply an AutoEQ parametric EQ file
    Autoeq { file: String },
    /// Set all 8 band gains in dB, low to high; Q is kept unless given
    Gains {
        #[arg(num_args = BAND_COUNT, allow_negative_numbers = true)]
        gains: Vec<f64>,
        /// Q for every band
        #[arg(long)]
        q: Option<f64>,
    },
    /// Change one band of the last sent EQ; its Q is kept unless given
    Band {
        index: usize,
        #[arg(allow_negative_numbers = true)]
        gain: f64,
        #[arg(long)]
        q: Option<f64>,
    },
    /// Change the Q of one band ("all" for every band) of the last sent EQ
    Q { band: QTarget, q: f64 },
    /// Send a flat custom EQ (0 dB on every band)
    Flat,
    /// List built-in and bundled presets
    List,
    /// Rewrite an AutoEQ file measured on Main for use with Studio
    Compensate {
        file: PathBuf,
        /// Replace one offset, as 'filter:gain' (filter is 1-based)
        #[arg(long = "override", value_parser = autoeq::parse_override)]
        overrides: Vec<(usize, f64)>,
    },
    /// Stay connected and print notifications until Ctrl-C
    Watch,
}

#[derive(Clone, Copy)]
enum QTarget {
    All,
    Band(usize),
}

impl std::str::FromStr for QTarget {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(QTarget::All);
        }
        let index = s
            .parse()
            .with_context(|| format!("Expected a band index or 'all', got '{}'", s))?;
        Ok(QTarget::Band(index))
    }
}

/// What to do once connected.
enum Action {
    Info,
    Preset(BuiltinPreset),
    Eq(EqState),
    Watch,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("fairbuds=debug".parse()?)
        .add_directive("bluer=info".parse()?);

    if let Some(path) = &cli.log_file {
        let log_file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(log_file)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = AppConfig::load();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli, config))
}

async fn run(cli: Cli, mut config: AppConfig) -> Result<()> {
    let scan_time = Duration::from_secs(cli.scan_secs);

    let action = match &cli.command {
        Command::List => {
            print_presets();
            return Ok(());
        }
        Command::Compensate { file, overrides } => {
            autoeq::compensate_file(file, overrides)?;
            println!("Compensated {}", file.display());
            return Ok(());
        }
        Command::Scan => {
            let adapter = scanner::default_adapter().await?;
            let devices = scanner::scan(&adapter, scan_time).await?;
            if devices.is_empty() {
                println!("No Fairbuds found");
            }
            for dev in devices {
                println!(
                    "{}  {}{}{}",
                    dev.address,
                    dev.name,
                    if dev.paired { "  [paired]" } else { "" },
                    if dev.connected { "  [connected]" } else { "" }
                );
            }
            return Ok(());
        }
        command => build_action(command, &config)?,
    };

    let adapter = scanner::default_adapter().await?;
    let session = DeviceSession::new();
    let printer = tokio::spawn(print_events(session.subscribe()));

    let result = async {
        connect_any(&session, &adapter, cli.device.as_deref(), scan_time, &mut config).await?;
        run_action(&session, action, &mut config).await
    }
    .await;

    session.disconnect().await;
    printer.abort();
    result
}

/// Turn a device command into an action, validating input before any radio work.
/// Band edits start from the EQ saved after the previous send.
fn build_action(command: &Command, config: &AppConfig) -> Result<Action> {
    let mut eq = config.saved_eq();
    let action = match command {
        Command::Info => Action::Info,
        Command::Watch => Action::Watch,
        Command::Preset { preset } => Action::Preset(*preset),
        Command::Flat => {
            eq.reset();
            Action::Eq(eq)
        }
        Command::Custom { name } => {
            let preset = find_custom_preset(name)
                .with_context(|| format!("Unknown preset '{}' (see 'fairbuds list')", name))?;
            eq.apply_preset(&preset.bands)?;
            Action::Eq(eq)
        }
        Command::Autoeq { file } => {
            let filters = autoeq::load_parametric(&config.resolve_preset_file(file))?;
            for (i, filter) in filters.iter().enumerate() {
                info!(
                    "Band {} ({:5}Hz): {:+5.1} dB, Q={:.2} (file Fc {} Hz)",
                    i, FREQUENCIES[i], filter.gain_db, filter.q, filter.frequency
                );
            }
            eq.apply_preset(&autoeq::to_bands(&filters))?;
            Action::Eq(eq)
        }
        Command::Gains { gains, q } => {
            eq.set_all_gains(gains, *q)?;
            Action::Eq(eq)
        }
        Command::Band { index, gain, q } => {
            match q {
                Some(q) => eq.set_band(*index, *gain, *q)?,
                None => eq.set_band_gain(*index, *gain)?,
            }
            let band = eq.band(*index)?;
            info!(
                "Band {} ({}Hz): {:+.1} dB, Q={:.1}",
                index,
                FREQUENCIES[*index],
                band.gain_db(),
                band.q_real()
            );
            Action::Eq(eq)
        }
        Command::Q { band, q } => {
            match band {
                QTarget::All => eq.set_all_q(*q),
                QTarget::Band(index) => eq.set_band_q(*index, *q)?,
            }
            Action::Eq(eq)
        }
        Command::Scan | Command::List | Command::Compensate { .. } => {
            bail!("Command does not need a device")
        }
    };
    Ok(action)
}

/// Try the configured/requested device, then every scanned entry, until one
/// of them hosts the EQ service.
async fn connect_any(
    session: &DeviceSession<BluerTransport>,
    adapter: &Adapter,
    requested: Option<&str>,
    scan_time: Duration,
    config: &mut AppConfig,
) -> Result<()> {
    if let Some(addr) = requested {
        let address: Address = addr.parse().context("Invalid Bluetooth address")?;
        session.connect(scanner::open(adapter, address).await?).await?;
        return Ok(());
    }

    if let Some(addr) = config.device_address.as_deref() {
        match addr.parse::<Address>() {
            Ok(address) => match session.connect(scanner::open(adapter, address).await?).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!("Configured device {} failed: {}", address, e),
            },
            Err(e) => warn!("Ignoring configured address '{}': {}", addr, e),
        }
    }

    let devices = scanner::scan(adapter, scan_time).await?;
    if devices.is_empty() {
        bail!("No Fairbuds found. Are they paired and out of the case?");
    }

    for dev in &devices {
        match session.connect(dev.transport()).await {
            Ok(()) => {
                remember_device(config, &dev.address.to_string(), &dev.name);
                return Ok(());
            }
            Err(e) => warn!("{} ({}): {}", dev.name, dev.address, e),
        }
    }
    bail!(
        "None of the {} Fairbuds entries offered the EQ service",
        devices.len()
    )
}

fn remember_device(config: &mut AppConfig, address: &str, name: &str) {
    if config.device_address.as_deref() == Some(address) {
        return;
    }
    config.device_address = Some(address.to_string());
    config.device_name = Some(name.to_string());
    if let Err(e) = config.save() {
        warn!("Failed to save config: {}", e);
    }
}

async fn run_action(
    session: &DeviceSession<BluerTransport>,
    action: Action,
    config: &mut AppConfig,
) -> Result<()> {
    let mut events = session.subscribe();

    if config.request_info_on_connect || matches!(action, Action::Info) {
        session.request_device_info().await?;
    }

    match action {
        Action::Info => {
            let got_info = tokio::time::timeout(INFO_TIMEOUT, async {
                loop {
                    match events.recv().await {
                        Ok(SessionEvent::DeviceInfo(_)) => return true,
                        Err(broadcast::error::RecvError::Closed) => return false,
                        _ => {}
                    }
                }
            })
            .await;
            if !matches!(got_info, Ok(true)) {
                bail!("No device info reply");
            }
        }
        Action::Preset(preset) => {
            session.select_builtin(preset).await?;
            println!("Preset: {}", preset.display_name());
            if preset == BuiltinPreset::Studio {
                save_eq(config, &EqState::new());
            }
        }
        Action::Eq(eq) => {
            if eq.is_flat() {
                println!("Flat EQ");
            } else {
                print!("{}", eq);
            }
            session.apply_custom_eq(&eq).await?;
            save_eq(config, &eq);
        }
        Action::Watch => {
            println!("Watching, press Ctrl-C to stop");
            tokio::select! {
                result = tokio::signal::ctrl_c() => result?,
                _ = wait_disconnected(session.watch_state()) => println!("Device went away"),
            }
            return Ok(());
        }
    }

    tokio::time::sleep(SETTLE_TIME).await;
    Ok(())
}

fn save_eq(config: &mut AppConfig, eq: &EqState) {
    config.remember_eq(eq);
    if let Err(e) = config.save() {
        warn!("Failed to save EQ: {}", e);
    }
}

async fn wait_disconnected(mut state: watch::Receiver<SessionState>) {
    while *state.borrow_and_update() != SessionState::Disconnected {
        if state.changed().await.is_err() {
            return;
        }
    }
}

async fn print_events(mut rx: broadcast::Receiver<SessionEvent>) {
    loop {
        match rx.recv().await {
            Ok(SessionEvent::StateChanged(state)) => println!("Status: {}", state),
            Ok(SessionEvent::DeviceInfo(info)) => println!("{}", info),
            Ok(SessionEvent::PresetConfirmed) => println!("Preset change confirmed"),
            Ok(SessionEvent::CustomEqConfirmed) => println!("Custom EQ confirmed"),
            Ok(SessionEvent::UnknownCommand { command, kind }) => {
                println!("Unknown command 0x{:02x} (type 0x{:02x})", command, kind)
            }
            // Already written by the tracing subscriber
            Ok(SessionEvent::Log { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Dropped {} events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_presets() {
    println!("Built-in:");
    for preset in BuiltinPreset::ALL {
        println!("  {:<8} {} ({})", preset.command(), preset.display_name(), preset.index());
    }
    println!("Custom (variable Q, use with Studio):");
    for preset in CUSTOM_PRESETS {
        let badge = if preset.recommended { "  [recommended]" } else { "" };
        println!("  {}{}", preset.name, badge);
    }
    println!("App-compatible (fixed Q):");
    for preset in APP_PRESETS {
        println!("  app:{}", preset.name);
    }
}
