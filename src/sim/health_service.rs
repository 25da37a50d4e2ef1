use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use log::{debug, info};
use tokio::runtime::Handle;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

use crate::tracking::vendor::{
    ConnectionListener, DataPoint, HealthTracker, HealthTrackerType, HealthTrackingService, TrackerErrorCode,
    TrackerEventListener, TrackingCapability, Value, ValueKey,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as i64)
        .unwrap_or(0)
}

/**
 * Builds a plausible data point for `tracker_type`; `sequence` varies the values.
 */
pub fn synthesize_data_point(tracker_type: HealthTrackerType, sequence: u64) -> DataPoint {
    let point = DataPoint::new(now_ns());

    match tracker_type {
        HealthTrackerType::HeartRateContinuous => {
            let heart_rate = 60 + (sequence % 25) as i32;
            let ibi = 60_000 / heart_rate;
            point
                .with(ValueKey::HeartRateStatus, Value::Int(1))
                .with(ValueKey::HeartRate, Value::Int(heart_rate))
                .with(ValueKey::IbiList, Value::IntList(vec![ibi + 4, ibi]))
                .with(ValueKey::IbiStatusList, Value::IntList(vec![1, 0]))
        },
        HealthTrackerType::PpgGreen => point
            .with(ValueKey::PpgGreen, Value::Int(15_000 + ((sequence * 37) % 500) as i32))
            .with(ValueKey::PpgGreenStatus, Value::Int(0)),
        // reserved channels, never requested by a feed
        HealthTrackerType::PpgIr | HealthTrackerType::PpgRed => point,
    }
}

/**
 * A tracker driven either by hand (`push`, `fail`) or by a periodic generator.
 * Listener callbacks are never invoked while an internal lock is held.
 */
pub struct SimulatedTracker {
    tracker_type: HealthTrackerType,
    period: Option<Duration>,
    listener: Mutex<Option<Arc<dyn TrackerEventListener>>>,
    generator: Mutex<Option<CancellationToken>>,
    registrations: Mutex<usize>,
}

impl SimulatedTracker {
    pub fn new(tracker_type: HealthTrackerType) -> Arc<Self> {
        Arc::new(SimulatedTracker {
            tracker_type,
            period: None,
            listener: Mutex::new(None),
            generator: Mutex::new(None),
            registrations: Mutex::new(0),
        })
    }

    pub fn periodic(tracker_type: HealthTrackerType, period: Duration) -> Arc<Self> {
        Arc::new(SimulatedTracker {
            tracker_type,
            period: Some(period),
            listener: Mutex::new(None),
            generator: Mutex::new(None),
            registrations: Mutex::new(0),
        })
    }

    pub fn has_listener(&self) -> bool {
        lock(&self.listener).is_some()
    }

    /// How many times a listener has been set.
    pub fn registrations(&self) -> usize {
        *lock(&self.registrations)
    }

    fn current_listener(&self) -> Option<Arc<dyn TrackerEventListener>> {
        lock(&self.listener).clone()
    }

    /// Delivers one batch to the current listener. Returns `false` if there is none.
    pub fn push(&self, data_points: &[DataPoint]) -> bool {
        match self.current_listener() {
            Some(listener) => {
                listener.on_data_received(data_points);
                true
            },
            None => false,
        }
    }

    pub fn flush(&self) -> bool {
        match self.current_listener() {
            Some(listener) => {
                listener.on_flush_completed();
                true
            },
            None => false,
        }
    }

    pub fn fail(&self, code: TrackerErrorCode) -> bool {
        match self.current_listener() {
            Some(listener) => {
                listener.on_error(code);
                true
            },
            None => false,
        }
    }

    fn start_generator(self: &Arc<Self>, period: Duration) {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("No runtime available, {:?} generator not started", self.tracker_type);
                return;
            },
        };

        let cancel = CancellationToken::new();
        if let Some(previous) = lock(&self.generator).replace(cancel.clone()) {
            previous.cancel();
        }

        let tracker = Arc::downgrade(self);
        handle.spawn(async move {
            let mut ticks = interval(period);
            let mut sequence: u64 = 0;

            'mainloop: loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        break 'mainloop;
                    },
                    _ = ticks.tick() => {
                        let tracker = match tracker.upgrade() {
                            Some(tracker) => tracker,
                            None => break 'mainloop,
                        };
                        let point = synthesize_data_point(tracker.tracker_type, sequence);
                        sequence += 1;
                        tracker.push(&[point]);
                    },
                }
            }
        });
    }
}

/// Shares one simulated tracker behind the vendor trait.
struct TrackerHandle(Arc<SimulatedTracker>);

impl HealthTracker for TrackerHandle {
    fn tracker_type(&self) -> HealthTrackerType {
        self.0.tracker_type
    }

    fn set_event_listener(&self, listener: Arc<dyn TrackerEventListener>) {
        *lock(&self.0.listener) = Some(listener);
        *lock(&self.0.registrations) += 1;

        if let Some(period) = self.0.period {
            self.0.start_generator(period);
        }
    }

    fn unset_event_listener(&self) {
        lock(&self.0.listener).take();

        if let Some(generator) = lock(&self.0.generator).take() {
            generator.cancel();
        }
    }
}

/**
 * Stands in for the vendor health tracking service.
 */
pub struct SimulatedHealthService {
    trackers: HashMap<HealthTrackerType, Arc<SimulatedTracker>>,
    listener: Mutex<Option<Arc<dyn ConnectionListener>>>,
    connect_failure: Mutex<Option<TrackerErrorCode>>,
}

impl SimulatedHealthService {
    pub fn new(trackers: Vec<Arc<SimulatedTracker>>) -> Self {
        SimulatedHealthService {
            trackers: trackers.into_iter().map(|tracker| (tracker.tracker_type, tracker)).collect(),
            listener: Mutex::new(None),
            connect_failure: Mutex::new(None),
        }
    }

    pub fn with_periodic_trackers(period: Duration) -> Self {
        SimulatedHealthService::new(vec![
            SimulatedTracker::periodic(HealthTrackerType::HeartRateContinuous, period),
            SimulatedTracker::periodic(HealthTrackerType::PpgGreen, period),
        ])
    }

    pub fn tracker(&self, tracker_type: HealthTrackerType) -> Option<Arc<SimulatedTracker>> {
        self.trackers.get(&tracker_type).cloned()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.listener).is_some()
    }

    /// Makes the next `connect_service` report `code` instead of success.
    pub fn fail_next_connect(&self, code: TrackerErrorCode) {
        *lock(&self.connect_failure) = Some(code);
    }

    /// Simulates the service going away on its own.
    pub fn end_connection(&self) {
        let listener = lock(&self.listener).take();
        if let Some(listener) = listener {
            listener.on_connection_ended();
        }
    }
}

impl HealthTrackingService for SimulatedHealthService {
    fn connect_service(&self, listener: Arc<dyn ConnectionListener>) {
        let failure = lock(&self.connect_failure).take();

        match failure {
            Some(code) => {
                info!("Simulated health service refusing connection: {:?}", code);
                listener.on_connection_failed(code);
            },
            None => {
                info!("Simulated health service connected");
                *lock(&self.listener) = Some(listener.clone());
                listener.on_connection_success();
            },
        }
    }

    fn disconnect_service(&self) {
        if lock(&self.listener).take().is_some() {
            info!("Simulated health service disconnected");
        }
    }

    fn tracking_capability(&self) -> TrackingCapability {
        TrackingCapability { supported: self.trackers.keys().copied().collect() }
    }

    fn health_tracker(&self, tracker_type: HealthTrackerType) -> Option<Arc<dyn HealthTracker>> {
        self.tracker(tracker_type).map(|tracker| Arc::new(TrackerHandle(tracker)) as Arc<dyn HealthTracker>)
    }
}
