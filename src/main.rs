use appletv_bridge::config::{Config, load_dotenv};
use appletv_bridge::platform::Platform;
use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

/// How often simulated devices report new states.
const SIMULATION_PERIOD: Duration = Duration::from_secs(15);

#[derive(Parser)]
#[command(name = "appletv-bridge")]
#[command(about = "Bridge Apple TV state to smart-home accessories")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, env = "ATV_BRIDGE_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Directory holding the accessory cache (overrides the config file)
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Use in-process simulated devices instead of pyatv
    #[arg(long)]
    simulate: bool,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    // Environment first, while this is the only thread
    load_dotenv();
    init_logger();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start tokio runtime: {}", e);
            std::process::exit(1);
        }
    };
    runtime.block_on(run(cli));
}

async fn run(cli: Cli) {

    let mut config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load {}: {}", cli.config.display(), e);
            std::process::exit(1);
        }
    };
    if let Some(storage) = cli.storage {
        config.storage_path = Some(storage);
    }

    info!("Starting {}", config.name);
    info!("  Devices: {}", config.devices.len());
    info!("  Storage: {}", config.storage_dir().display());
    if cli.simulate {
        info!("  Mode: simulated");
    }

    let mut platform = Platform::new(config);
    if cli.simulate {
        platform = platform.with_simulation(Some(SIMULATION_PERIOD));
    }
    if let Err(e) = platform.start() {
        error!("Failed to start platform: {}", e);
        std::process::exit(1);
    }

    // Log characteristic changes as the controller would see them
    let mut loggers = Vec::new();
    for device in platform.devices() {
        let name = device.accessory().display_name().to_string();
        let mut changes = device.accessory().subscribe_changes();
        loggers.push(tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => info!(
                        "[Platform] {}: {} {} = {}",
                        name, change.service, change.characteristic, change.value
                    ),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("[Platform] {}: skipped {} change(s)", name, skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    info!("{} is running, press Ctrl+C to exit", platform.name());

    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    for logger in loggers {
        logger.abort();
    }
    platform.shutdown().await;

    info!("{} stopped", platform.name());
}
