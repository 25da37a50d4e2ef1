use std::env;
use std::path::PathBuf;
use clap::Parser;
use log::{info, LevelFilter};
use tokio::time::Duration;

use crate::app::{run_bridge, BridgeOptions};
use crate::config::io::ConfigIO;
use crate::error::AppRunError;

pub mod app;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod sim;
pub mod tracking;
pub mod wire;

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Streams heart rate and PPG samples to a single peer over one persistent connection.", long_about = None)]
pub struct RunArgs {
    /// Peer to connect to (host:port); overrides the config file
    #[arg(long)]
    pub peer: Option<String>,

    /// Device name reported to the peer when connecting; overrides the config file
    #[arg(long)]
    pub device_name: Option<String>,

    /// Use this config file instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Milliseconds between simulated data points
    #[arg(long, default_value_t = 1000)]
    pub sample_period_ms: u64,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    pub run_for_secs: Option<u64>,

    /// Do not forward heart rate samples
    #[arg(long)]
    pub no_heart_rate: bool,

    /// Do not forward PPG samples
    #[arg(long)]
    pub no_ppg: bool,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,
}

fn log_level(verbose: bool) -> LevelFilter {
    if verbose {
        return LevelFilter::Debug;
    }

    env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::Info)
}

pub fn init_logging(verbose: bool) {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log_level(verbose))
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

pub fn run(args: RunArgs) -> Result<(), AppRunError> {
    let config_io = match &args.config {
        Some(path) => ConfigIO::open(path)?,
        None => ConfigIO::new_sync()?,
    };
    let mut config_locker = config_io.locker()?;
    let _lock_guard = config_locker.lock()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let mut config = match config_io.read().await {
            Ok(config) => config,
            Err(err) if err.is_file_not_found_error() => {
                info!("Config file not found, using defaults");
                Default::default()
            },
            Err(err) => return Err(AppRunError::from(err)),
        };

        if let Some(peer) = args.peer {
            config.peer_address = peer;
        }
        if let Some(device_name) = args.device_name {
            config.device_name = device_name;
        }
        config.heart_rate &= !args.no_heart_rate;
        config.ppg &= !args.no_ppg;

        run_bridge(BridgeOptions {
            config,
            sample_period: Duration::from_millis(args.sample_period_ms.max(1)),
            run_for: args.run_for_secs.map(Duration::from_secs),
        }).await;

        Ok(())
    })
}
