use clap::Parser;
use log::{error, info};
use pulse_bridge::{init_logging, run, RunArgs};
use pulse_bridge::error::{AppRunError, ConfigError};

fn main() -> Result<(), AppRunError> {
    let args = RunArgs::parse();
    init_logging(args.verbose);
    info!(concat!("pulse-bridge ", env!("CARGO_PKG_VERSION")));

    match run(args) {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            error!("pulse-bridge has already been started");
            Ok(())
        },
        Err(err) => {
            error!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
