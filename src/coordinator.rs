use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::spawn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bus::{EventBus, Subscriber, SubscriberHandle};
use crate::device::session::{DeviceSession, SessionOptions};
use crate::device::transport::Connector;
use crate::device::types::{ConnectionState, PeerAddress};
use crate::error::SubscriberError;
use crate::tracking::feed::{Dispatcher, HeartRateFeed, PpgFeed, SensorFeed};
use crate::tracking::types::{ErrorClass, ErrorSource, Sample, SensorKind, TrackerEvent, TrackingState};
use crate::tracking::vendor::{ConnectionListener, HealthTrackingService, TrackerErrorCode};
use crate::wire::{encode_sample, encode_status};

/**
 * How many encoded records may wait for the socket before new ones are dropped.
 */
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub peer: PeerAddress,
    pub device_name: String,
    pub session: SessionOptions,
    pub outbox_capacity: usize,
    pub heart_rate: bool,
    pub ppg: bool,
}

impl CoordinatorOptions {
    pub fn new(peer: PeerAddress, device_name: impl Into<String>) -> Self {
        CoordinatorOptions {
            peer,
            device_name: device_name.into(),
            session: SessionOptions::default(),
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            heart_rate: true,
            ppg: true,
        }
    }
}

#[derive(Debug, Default)]
struct CoordinatorState {
    service_connected: bool,
    last_heart_rate: Option<Sample>,
    last_ppg: Option<Sample>,
    last_error: Option<(ErrorSource, ErrorClass)>,
}

type SharedState = Arc<Mutex<CoordinatorState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, CoordinatorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// Records the latest sample per kind and the latest error, and queues samples for the socket.
struct Forwarder {
    state: SharedState,
    connection: watch::Receiver<ConnectionState>,
    outbox: Mutex<Sender<Vec<u8>>>,
}

impl Subscriber for Forwarder {
    fn on_event(&self, event: &TrackerEvent) -> Result<(), SubscriberError> {
        let sample = match event {
            TrackerEvent::Sample(sample) => sample,
            TrackerEvent::Error { source, class } => {
                lock(&self.state).last_error = Some((*source, *class));
                return Ok(());
            },
        };

        {
            let mut state = lock(&self.state);
            match sample.kind() {
                SensorKind::HeartRate => state.last_heart_rate = Some(*sample),
                SensorKind::Ppg => state.last_ppg = Some(*sample),
            }
        }

        if *self.connection.borrow() != ConnectionState::Connected {
            return Ok(());
        }

        let bytes = encode_sample(sample)?;
        self.outbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_send(bytes)
            .map_err(|err| {
                let reason = if err.is_full() { "full" } else { "closed" };
                format!("Dropping {} sample, outbox is {}", sample.kind(), reason)
            })?;

        Ok(())
    }
}

// Reacts to the tracking service connecting, ending, or failing.
struct ServiceObserver {
    service: Weak<dyn HealthTrackingService>,
    feeds: Vec<Arc<dyn SensorFeed>>,
    state: SharedState,
    bus: Arc<EventBus>,
    dispatcher: Dispatcher,
}

impl ServiceObserver {
    fn release_trackers(&self) {
        for feed in &self.feeds {
            feed.release_tracker();
        }
    }
}

impl ConnectionListener for ServiceObserver {
    fn on_connection_success(&self) {
        info!("Health tracking service connected");

        let service = match self.service.upgrade() {
            Some(service) => service,
            None => {
                warn!("Health tracking service connected after it was dropped");
                return;
            },
        };

        let capability = service.tracking_capability();
        for feed in &self.feeds {
            if !capability.supports(feed.tracker_type()) {
                warn!("Device does not support {} tracking", feed.kind());
                continue;
            }

            feed.set_dispatcher(self.dispatcher.clone());
            feed.assign_tracker(service.health_tracker(feed.tracker_type()));
        }

        lock(&self.state).service_connected = true;
    }

    fn on_connection_ended(&self) {
        info!("Health tracking service connection ended");
        lock(&self.state).service_connected = false;
        self.release_trackers();
    }

    fn on_connection_failed(&self, code: TrackerErrorCode) {
        let class = code.classify();
        error!("Health tracking service connection failed: {:?} ({})", code, class);

        lock(&self.state).service_connected = false;
        self.release_trackers();
        self.bus.publish(&TrackerEvent::Error { source: ErrorSource::Service, class });
    }
}

async fn run_writer(cancel: CancellationToken, session: Arc<DeviceSession>, mut outbox: Receiver<Vec<u8>>) {
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            next = outbox.next() => match next {
                Some(bytes) => {
                    session.send(&bytes).await;
                },
                None => break 'mainloop,
            },
        }
    }

    debug!("Writer task stopped");
}

/**
 * Binds sensor feeds, the event bus, and the device session together, and
 * exposes the lifecycle actions used by the outer layer.
 *
 * # Panics
 *
 * [`SessionCoordinator::new`] must be called from within a tokio runtime.
 */
pub struct SessionCoordinator {
    options: CoordinatorOptions,
    bus: Arc<EventBus>,
    session: Arc<DeviceSession>,
    service: Arc<dyn HealthTrackingService>,
    heart_rate: Arc<HeartRateFeed>,
    ppg: Arc<PpgFeed>,
    observer: Arc<ServiceObserver>,
    forwarder: SubscriberHandle,
    state: SharedState,
    cancel: CancellationToken,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCoordinator {
    pub fn new(service: Arc<dyn HealthTrackingService>, connector: Arc<dyn Connector>, options: CoordinatorOptions) -> Self {
        let bus = Arc::new(EventBus::new());
        let session = Arc::new(DeviceSession::new(connector, options.session.clone()));
        let state: SharedState = Arc::new(Mutex::new(CoordinatorState::default()));
        let cancel = CancellationToken::new();

        let heart_rate = HeartRateFeed::new(bus.clone());
        let ppg = PpgFeed::new(bus.clone());

        let mut feeds: Vec<Arc<dyn SensorFeed>> = Vec::new();
        if options.heart_rate {
            feeds.push(heart_rate.clone());
        }
        if options.ppg {
            feeds.push(ppg.clone());
        }

        let observer = Arc::new(ServiceObserver {
            service: Arc::downgrade(&service),
            feeds,
            state: state.clone(),
            bus: bus.clone(),
            dispatcher: Dispatcher::new(Handle::current()),
        });

        let (outbox_tx, outbox_rx) = channel::<Vec<u8>>(options.outbox_capacity);
        let forwarder: SubscriberHandle = Arc::new(Forwarder {
            state: state.clone(),
            connection: session.watch_state(),
            outbox: Mutex::new(outbox_tx),
        });
        bus.subscribe(forwarder.clone());

        let writer = spawn(run_writer(cancel.clone(), session.clone(), outbox_rx));

        SessionCoordinator {
            options,
            bus,
            session,
            service,
            heart_rate,
            ppg,
            observer,
            forwarder,
            state,
            cancel,
            writer: Mutex::new(Some(writer)),
        }
    }

    fn feeds(&self) -> &[Arc<dyn SensorFeed>] {
        &self.observer.feeds
    }

    fn feed(&self, kind: SensorKind) -> &dyn SensorFeed {
        match kind {
            SensorKind::HeartRate => self.heart_rate.as_ref(),
            SensorKind::Ppg => self.ppg.as_ref(),
        }
    }

    pub fn open_service(&self) {
        info!("Connecting to health tracking service...");
        self.service.connect_service(self.observer.clone());
    }

    pub fn close_service(&self) {
        info!("Disconnecting from health tracking service...");
        self.request_stop_tracking();
        self.observer.release_trackers();
        self.service.disconnect_service();
        lock(&self.state).service_connected = false;
    }

    pub fn is_service_connected(&self) -> bool {
        lock(&self.state).service_connected
    }

    pub async fn request_connect(&self) -> bool {
        let greeting = match encode_status("connected", &self.options.device_name) {
            Ok(greeting) => Some(greeting),
            Err(err) => {
                warn!("Failed to encode connected status: {}", err);
                None
            },
        };

        self.session.connect(self.options.peer.clone(), greeting).await
    }

    pub async fn request_disconnect(&self) {
        self.session.disconnect().await;
    }

    /// Starts every enabled feed. Returns whether at least one feed is tracking;
    /// rejected while the tracking service is not connected.
    pub fn request_start_tracking(&self) -> bool {
        if !self.is_service_connected() {
            warn!("Cannot start tracking: health tracking service is not connected");
            return false;
        }

        let mut tracking = 0;
        for feed in self.feeds() {
            feed.start();
            match feed.state() {
                TrackingState::Tracking => tracking += 1,
                state => warn!("{} feed did not start, state is {:?}", feed.kind(), state),
            }
        }

        if tracking == 0 {
            warn!("No sensor feed is tracking");
        }
        tracking > 0
    }

    pub fn request_stop_tracking(&self) {
        for feed in self.feeds() {
            feed.stop();
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.session.watch_state()
    }

    pub fn last_connection_failure(&self) -> Option<String> {
        self.session.last_failure()
    }

    pub fn tracking_state(&self, kind: SensorKind) -> TrackingState {
        self.feed(kind).state()
    }

    pub fn last_sample(&self, kind: SensorKind) -> Option<Sample> {
        let state = lock(&self.state);
        match kind {
            SensorKind::HeartRate => state.last_heart_rate,
            SensorKind::Ppg => state.last_ppg,
        }
    }

    pub fn last_error(&self) -> Option<(ErrorSource, ErrorClass)> {
        lock(&self.state).last_error
    }

    /// Stops tracking, closes the service and the connection, and waits for the writer task.
    pub async fn shutdown(&self) {
        self.close_service();
        self.bus.unsubscribe(&self.forwarder);
        self.cancel.cancel();

        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(writer) = writer {
            if let Err(err) = writer.await {
                error!("Writer task failed: {}", err);
            }
        }

        self.session.shutdown().await;
    }
}
