mod support;

use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::sync::mpsc::UnboundedReceiver;

use pulse_bridge::coordinator::{CoordinatorOptions, SessionCoordinator};
use pulse_bridge::device::types::ConnectionState;
use pulse_bridge::sim::{SimulatedHealthService, SimulatedTracker};
use pulse_bridge::tracking::types::{ErrorClass, ErrorSource, Sample, SensorKind, TrackingState};
use pulse_bridge::tracking::vendor::{DataPoint, HealthTrackerType, TrackerErrorCode, Value, ValueKey};
use support::{peer, read_records, wait_until, ConnectMode, MemoryConnector};

struct Rig {
    coordinator: SessionCoordinator,
    service: Arc<SimulatedHealthService>,
    heart_rate: Arc<SimulatedTracker>,
    far_ends: UnboundedReceiver<DuplexStream>,
}

fn rig_with(trackers: &[HealthTrackerType], options: CoordinatorOptions) -> Rig {
    let trackers: Vec<_> = trackers.iter().map(|tracker_type| SimulatedTracker::new(*tracker_type)).collect();
    let service = Arc::new(SimulatedHealthService::new(trackers));
    let heart_rate = service
        .tracker(HealthTrackerType::HeartRateContinuous)
        .unwrap_or_else(|| SimulatedTracker::new(HealthTrackerType::HeartRateContinuous));
    let (connector, far_ends) = MemoryConnector::new(ConnectMode::Open);

    let coordinator = SessionCoordinator::new(service.clone(), connector, options);
    Rig { coordinator, service, heart_rate, far_ends }
}

fn rig() -> Rig {
    rig_with(
        &[HealthTrackerType::HeartRateContinuous, HealthTrackerType::PpgGreen],
        CoordinatorOptions::new(peer(), "Galaxy Watch"),
    )
}

fn heart_rate_point(heart_rate: i32, ibi: i32) -> DataPoint {
    DataPoint::new(0)
        .with(ValueKey::HeartRateStatus, Value::Int(1))
        .with(ValueKey::HeartRate, Value::Int(heart_rate))
        .with(ValueKey::IbiList, Value::IntList(vec![ibi]))
        .with(ValueKey::IbiStatusList, Value::IntList(vec![0]))
}

async fn connect(rig: &mut Rig) -> DuplexStream {
    assert!(rig.coordinator.request_connect().await);
    assert!(wait_until(|| rig.coordinator.connection_state() == ConnectionState::Connected).await);
    rig.far_ends.recv().await.unwrap()
}

async fn start_tracking(rig: &Rig) {
    assert!(rig.coordinator.request_start_tracking());
    assert!(wait_until(|| rig.heart_rate.has_listener()).await);
}

#[tokio::test]
async fn streams_greeting_then_samples_in_order() {
    let mut rig = rig();
    rig.coordinator.open_service();
    let mut far = connect(&mut rig).await;
    start_tracking(&rig).await;

    for (heart_rate, ibi) in [(72, 833), (74, 810), (75, 800)] {
        assert!(rig.heart_rate.push(&[heart_rate_point(heart_rate, ibi)]));
    }

    let records = read_records(&mut far, 4).await;
    assert_eq!(records, vec![
        r#"{"status":"connected","device":"Galaxy Watch"}"#,
        r#"{"status":1,"hr":72,"ibi":833,"qIbi":0}"#,
        r#"{"status":1,"hr":74,"ibi":810,"qIbi":0}"#,
        r#"{"status":1,"hr":75,"ibi":800,"qIbi":0}"#,
    ]);
    assert!(matches!(rig.coordinator.last_sample(SensorKind::HeartRate), Some(Sample::HeartRate(sample)) if sample.heart_rate == 75));

    rig.coordinator.shutdown().await;
    assert_eq!(rig.coordinator.connection_state(), ConnectionState::Closed);
    assert_eq!(rig.coordinator.tracking_state(SensorKind::HeartRate), TrackingState::Uninitialized);
    assert!(!rig.heart_rate.has_listener());
}

#[tokio::test]
async fn samples_while_disconnected_are_not_queued() {
    let mut rig = rig();
    rig.coordinator.open_service();
    start_tracking(&rig).await;

    rig.heart_rate.push(&[heart_rate_point(60, 1000)]);
    assert!(rig.coordinator.last_sample(SensorKind::HeartRate).is_some());

    let mut far = connect(&mut rig).await;
    rig.heart_rate.push(&[heart_rate_point(61, 983)]);

    let records = read_records(&mut far, 2).await;
    assert_eq!(records[1], r#"{"status":1,"hr":61,"ibi":983,"qIbi":0}"#);
}

#[tokio::test]
async fn start_tracking_requires_service() {
    let rig = rig();

    assert!(!rig.coordinator.request_start_tracking());
    assert_eq!(rig.coordinator.tracking_state(SensorKind::HeartRate), TrackingState::Uninitialized);

    rig.coordinator.open_service();
    assert!(rig.coordinator.is_service_connected());
    assert_eq!(rig.coordinator.tracking_state(SensorKind::HeartRate), TrackingState::Ready);
    assert!(rig.coordinator.request_start_tracking());
    assert_eq!(rig.coordinator.tracking_state(SensorKind::HeartRate), TrackingState::Tracking);
}

#[tokio::test]
async fn unsupported_tracker_is_not_assigned() {
    let rig = rig_with(&[HealthTrackerType::HeartRateContinuous], CoordinatorOptions::new(peer(), "w"));
    rig.coordinator.open_service();

    assert_eq!(rig.coordinator.tracking_state(SensorKind::HeartRate), TrackingState::Ready);
    assert_eq!(rig.coordinator.tracking_state(SensorKind::Ppg), TrackingState::Uninitialized);
}

#[tokio::test]
async fn disabled_feed_is_left_alone() {
    let options = CoordinatorOptions { ppg: false, ..CoordinatorOptions::new(peer(), "w") };
    let rig = rig_with(&[HealthTrackerType::HeartRateContinuous, HealthTrackerType::PpgGreen], options);
    rig.coordinator.open_service();

    assert_eq!(rig.coordinator.tracking_state(SensorKind::Ppg), TrackingState::Uninitialized);
    let ppg = rig.service.tracker(HealthTrackerType::PpgGreen).unwrap();
    start_tracking(&rig).await;
    assert!(!ppg.has_listener());
}

#[tokio::test]
async fn service_connection_failure_is_published() {
    let rig = rig();
    rig.service.fail_next_connect(TrackerErrorCode::SdkPolicyError);
    rig.coordinator.open_service();

    assert!(!rig.coordinator.is_service_connected());
    assert_eq!(rig.coordinator.last_error(), Some((ErrorSource::Service, ErrorClass::Policy)));
    assert!(!rig.coordinator.request_start_tracking());
}

#[tokio::test]
async fn tracker_error_is_recorded() {
    let rig = rig();
    rig.coordinator.open_service();
    start_tracking(&rig).await;

    rig.heart_rate.fail(TrackerErrorCode::Other(7));
    assert_eq!(rig.coordinator.tracking_state(SensorKind::HeartRate), TrackingState::Errored(ErrorClass::Unknown));
    assert_eq!(rig.coordinator.last_error(), Some((ErrorSource::Feed(SensorKind::HeartRate), ErrorClass::Unknown)));
}

#[tokio::test]
async fn service_end_releases_trackers() {
    let rig = rig();
    rig.coordinator.open_service();
    start_tracking(&rig).await;

    rig.service.end_connection();
    assert!(!rig.coordinator.is_service_connected());
    assert_eq!(rig.coordinator.tracking_state(SensorKind::HeartRate), TrackingState::Uninitialized);
    assert!(!rig.heart_rate.has_listener());

    // reopening assigns fresh trackers
    rig.coordinator.open_service();
    start_tracking(&rig).await;
    assert_eq!(rig.heart_rate.registrations(), 2);
}

#[tokio::test]
async fn start_tracking_fails_when_no_feed_can_start() {
    let rig = rig_with(&[], CoordinatorOptions::new(peer(), "w"));
    rig.coordinator.open_service();

    assert!(rig.coordinator.is_service_connected());
    assert!(!rig.coordinator.request_start_tracking());
}

#[tokio::test]
async fn start_tracking_fails_when_only_feed_errored() {
    let options = CoordinatorOptions { ppg: false, ..CoordinatorOptions::new(peer(), "w") };
    let rig = rig_with(&[HealthTrackerType::HeartRateContinuous], options);
    rig.coordinator.open_service();
    start_tracking(&rig).await;

    rig.heart_rate.fail(TrackerErrorCode::PermissionError);
    assert!(!rig.coordinator.request_start_tracking());
    assert_eq!(rig.coordinator.tracking_state(SensorKind::HeartRate), TrackingState::Errored(ErrorClass::Permission));
}
