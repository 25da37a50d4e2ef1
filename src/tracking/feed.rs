use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::error::DecodeError;
use crate::tracking::decode::{decode_heart_rate, decode_ppg};
use crate::tracking::types::{ErrorClass, ErrorSource, Sample, SensorKind, TrackerEvent, TrackingState};
use crate::tracking::vendor::{DataPoint, HealthTracker, HealthTrackerType, TrackerErrorCode, TrackerEventListener};

/**
 * Capabilities every sensor feed offers to the coordinator.
 */
pub trait SensorFeed: Send + Sync {
    fn kind(&self) -> SensorKind;
    fn tracker_type(&self) -> HealthTrackerType;
    fn state(&self) -> TrackingState;
    fn set_dispatcher(&self, dispatcher: Dispatcher);
    fn assign_tracker(&self, tracker: Option<Arc<dyn HealthTracker>>);
    fn release_tracker(&self);
    fn start(&self);
    fn stop(&self);
    fn on_vendor_error(&self, code: TrackerErrorCode);
}

pub trait SampleDecoder: Send + Sync + 'static {
    const KIND: SensorKind;
    const TRACKER_TYPE: HealthTrackerType;

    /// `Ok(None)` drops the data point.
    fn decode(data_point: &DataPoint) -> Result<Option<Sample>, DecodeError>;
}

pub struct HeartRateDecoder;

impl SampleDecoder for HeartRateDecoder {
    const KIND: SensorKind = SensorKind::HeartRate;
    const TRACKER_TYPE: HealthTrackerType = HealthTrackerType::HeartRateContinuous;

    fn decode(data_point: &DataPoint) -> Result<Option<Sample>, DecodeError> {
        decode_heart_rate(data_point).map(|sample| Some(Sample::HeartRate(sample)))
    }
}

pub struct PpgDecoder;

impl SampleDecoder for PpgDecoder {
    const KIND: SensorKind = SensorKind::Ppg;
    const TRACKER_TYPE: HealthTrackerType = HealthTrackerType::PpgGreen;

    fn decode(data_point: &DataPoint) -> Result<Option<Sample>, DecodeError> {
        decode_ppg(data_point).map(|sample| sample.map(Sample::Ppg))
    }
}

pub type HeartRateFeed = Feed<HeartRateDecoder>;
pub type PpgFeed = Feed<PpgDecoder>;

/**
 * Where listener registration is scheduled.
 */
#[derive(Debug, Clone)]
pub struct Dispatcher {
    handle: Handle,
}

impl Dispatcher {
    pub fn new(handle: Handle) -> Self {
        Dispatcher { handle }
    }

    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Dispatcher::new)
    }
}

struct FeedInner {
    state: TrackingState,
    tracker: Option<Arc<dyn HealthTracker>>,
    dispatcher: Option<Dispatcher>,
    pending_registration: Option<CancellationToken>,
    listener_active: bool,
}

impl FeedInner {
    // Cancels a scheduled registration and removes an active listener.
    // Trackers must not call back into their listener from unset_event_listener.
    fn deactivate(&mut self) -> bool {
        if let Some(pending) = self.pending_registration.take() {
            pending.cancel();
        }

        if !std::mem::take(&mut self.listener_active) {
            return false;
        }

        if let Some(tracker) = &self.tracker {
            tracker.unset_event_listener();
        }
        true
    }
}

/**
 * Bridges one vendor tracker into event bus publications.
 */
pub struct Feed<D: SampleDecoder> {
    me: Weak<Feed<D>>,
    bus: Arc<EventBus>,
    inner: Mutex<FeedInner>,
    _decoder: PhantomData<D>,
}

impl<D: SampleDecoder> Feed<D> {
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new_cyclic(|me| Feed {
            me: me.clone(),
            bus,
            inner: Mutex::new(FeedInner {
                state: TrackingState::Uninitialized,
                tracker: None,
                dispatcher: None,
                pending_registration: None,
                listener_active: false,
            }),
            _decoder: PhantomData,
        })
    }

    fn lock(&self) -> MutexGuard<'_, FeedInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register_listener(&self, token: &CancellationToken) {
        let mut inner = self.lock();

        if token.is_cancelled() || inner.state != TrackingState::Tracking {
            debug!("Skipping cancelled {} listener registration", D::KIND);
            return;
        }

        let tracker = match &inner.tracker {
            Some(tracker) => tracker.clone(),
            None => {
                warn!("Cannot start {} tracker: tracker is not assigned", D::KIND);
                return;
            },
        };

        debug!("Setting {} event listener", D::KIND);
        tracker.set_event_listener(Arc::new(FeedListener { feed: self.me.clone() }));
        inner.pending_registration = None;
        inner.listener_active = true;
    }

    fn deliver(&self, data_points: &[DataPoint]) {
        if self.lock().state != TrackingState::Tracking {
            debug!("Ignoring {} {} data points, feed is not tracking", data_points.len(), D::KIND);
            return;
        }

        for data_point in data_points {
            match D::decode(data_point) {
                Ok(Some(sample)) => {
                    debug!("Processed {} data: {:?}", D::KIND, sample);
                    self.bus.publish(&TrackerEvent::Sample(sample));
                },
                Ok(None) => {
                    warn!(
                        "Received {} data point without a mandatory value, skipping. Timestamp: {}",
                        D::KIND,
                        data_point.timestamp_ns(),
                    );
                },
                Err(err) => {
                    warn!("Error reading {} values from data point: {}", D::KIND, err);
                },
            }
        }
    }
}

impl<D: SampleDecoder> SensorFeed for Feed<D> {
    fn kind(&self) -> SensorKind {
        D::KIND
    }

    fn tracker_type(&self) -> HealthTrackerType {
        D::TRACKER_TYPE
    }

    fn state(&self) -> TrackingState {
        self.lock().state.clone()
    }

    fn set_dispatcher(&self, dispatcher: Dispatcher) {
        self.lock().dispatcher = Some(dispatcher);
    }

    fn assign_tracker(&self, tracker: Option<Arc<dyn HealthTracker>>) {
        let tracker = match tracker {
            Some(tracker) => tracker,
            None => {
                warn!("Ignoring empty {} tracker assignment", D::KIND);
                return;
            },
        };

        let mut inner = self.lock();
        if inner.state == TrackingState::Tracking {
            warn!("Cannot assign {} tracker while tracking; stop first", D::KIND);
            return;
        }

        info!("Assigned {} tracker {:?}", D::KIND, tracker.tracker_type());
        inner.tracker = Some(tracker);
        inner.state = TrackingState::Ready;
    }

    fn release_tracker(&self) {
        let mut inner = self.lock();
        inner.deactivate();

        if inner.tracker.take().is_some() {
            info!("Released {} tracker", D::KIND);
        }
        inner.state = TrackingState::Uninitialized;
    }

    fn start(&self) {
        let mut inner = self.lock();

        match &inner.state {
            TrackingState::Ready | TrackingState::Stopped => {},
            TrackingState::Tracking => {
                debug!("{} tracker already running", D::KIND);
                return;
            },
            TrackingState::Uninitialized => {
                warn!("Cannot start {} tracker: tracker is not assigned", D::KIND);
                return;
            },
            TrackingState::Errored(class) => {
                warn!("Cannot start {} tracker after {} error: assign a new tracker first", D::KIND, class);
                return;
            },
        }

        let dispatcher = match &inner.dispatcher {
            Some(dispatcher) => dispatcher.clone(),
            None => match Dispatcher::try_current() {
                Some(dispatcher) => {
                    warn!("Dispatcher was not set on {} start, using the current runtime", D::KIND);
                    inner.dispatcher = Some(dispatcher.clone());
                    dispatcher
                },
                None => {
                    error!("Cannot start {} tracker: no dispatcher available", D::KIND);
                    return;
                },
            },
        };

        let token = CancellationToken::new();
        if let Some(previous) = inner.pending_registration.replace(token.clone()) {
            previous.cancel();
        }
        inner.state = TrackingState::Tracking;
        info!("Starting {} tracker", D::KIND);

        let feed = self.me.clone();
        dispatcher.handle.spawn(async move {
            if token.is_cancelled() {
                return;
            }
            if let Some(feed) = feed.upgrade() {
                feed.register_listener(&token);
            }
        });
    }

    fn stop(&self) {
        let mut inner = self.lock();

        if inner.state != TrackingState::Tracking {
            debug!("{} tracker not running or already stopped", D::KIND);
            return;
        }

        if inner.deactivate() {
            info!("{} event listener unset", D::KIND);
        }
        inner.state = TrackingState::Stopped;
    }

    fn on_vendor_error(&self, code: TrackerErrorCode) {
        let class = code.classify();

        {
            let mut inner = self.lock();
            inner.deactivate();
            inner.tracker = None;
            inner.state = TrackingState::Errored(class);
        }

        match class {
            ErrorClass::Permission => error!("{} tracker permission error", D::KIND),
            ErrorClass::Policy => error!("{} tracker policy error", D::KIND),
            ErrorClass::Unknown => warn!("{} tracker unknown error: {:?}", D::KIND, code),
        }

        self.bus.publish(&TrackerEvent::Error { source: ErrorSource::Feed(D::KIND), class });
    }
}

struct FeedListener<D: SampleDecoder> {
    feed: Weak<Feed<D>>,
}

impl<D: SampleDecoder> TrackerEventListener for FeedListener<D> {
    fn on_data_received(&self, data_points: &[DataPoint]) {
        if let Some(feed) = self.feed.upgrade() {
            feed.deliver(data_points);
        }
    }

    fn on_flush_completed(&self) {
        info!("{} flush completed", D::KIND);
    }

    fn on_error(&self, code: TrackerErrorCode) {
        if let Some(feed) = self.feed.upgrade() {
            feed.on_vendor_error(code);
        }
    }
}
