use std::sync::Arc;
use log::{error, info, warn};
use tokio::signal::ctrl_c;
use tokio::spawn;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::config::types::Config;
use crate::coordinator::SessionCoordinator;
use crate::device::transport::TcpConnector;
use crate::device::types::ConnectionState;
use crate::sim::SimulatedHealthService;
use crate::tracking::types::{SensorKind, TrackingState};

pub struct BridgeOptions {
    pub config: Config,
    /// How often the simulated trackers produce a data point.
    pub sample_period: Duration,
    /// Stop after this long instead of waiting for Ctrl-C.
    pub run_for: Option<Duration>,
}

fn describe(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Idle => "Not connected".to_string(),
        ConnectionState::Connecting => "Connecting…".to_string(),
        ConnectionState::Connected => "Connected".to_string(),
        ConnectionState::Failed(reason) => format!("Connection failed: {}", reason),
        ConnectionState::Closed => "Closed".to_string(),
    }
}

async fn wait_for_exit(run_for: Option<Duration>) {
    match run_for {
        Some(duration) => sleep(duration).await,
        None => {
            if let Err(err) = ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", err);
            }
            info!("Close requested");
        },
    }
}

pub async fn run_bridge(options: BridgeOptions) {
    let service = Arc::new(SimulatedHealthService::with_periodic_trackers(options.sample_period));
    let coordinator = SessionCoordinator::new(
        service,
        Arc::new(TcpConnector),
        options.config.coordinator_options(),
    );

    let cancel = CancellationToken::new();
    let mut states = coordinator.watch_connection_state();
    let state_logger = {
        let cancel = cancel.clone();
        spawn(async move {
            'mainloop: loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'mainloop,
                    changed = states.changed() => {
                        if changed.is_err() {
                            break 'mainloop;
                        }
                        let state = states.borrow_and_update().clone();
                        info!("{}", describe(&state));
                    },
                }
            }
        })
    };

    coordinator.open_service();

    if coordinator.request_connect().await {
        let mut states = coordinator.watch_connection_state();
        let settled = states
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .map(|state| state.clone());

        match settled {
            Ok(ConnectionState::Connected) => {
                if !coordinator.request_start_tracking() {
                    warn!("Tracking was not started");
                }
            },
            Ok(_) => {
                let reason = coordinator.last_connection_failure().unwrap_or_else(|| "unknown".to_string());
                warn!("Not tracking, connection to {} failed: {}", options.config.peer_address, reason);
            },
            Err(err) => error!("Connection state channel closed: {}", err),
        }
    }

    wait_for_exit(options.run_for).await;

    for kind in SensorKind::ALL {
        if coordinator.tracking_state(kind) != TrackingState::Uninitialized {
            info!("Last {} sample: {:?}", kind, coordinator.last_sample(kind));
        }
    }
    if let Some((source, class)) = coordinator.last_error() {
        warn!("Last tracking error: {} error from {:?}", class, source);
    }

    coordinator.shutdown().await;
    cancel.cancel();
    if let Err(err) = state_logger.await {
        error!("State logger task failed: {}", err);
    }
}
