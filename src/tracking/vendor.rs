//! Boundary to the vendor health tracking service.
//!
//! The service itself is not part of this crate: it is consumed through these
//! traits. The session coordinator implements [`ConnectionListener`], each sensor
//! feed implements [`TrackerEventListener`], and the service side provides
//! [`HealthTrackingService`] and [`HealthTracker`]. See `crate::sim` for a
//! simulated implementation.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::DecodeError;
use crate::tracking::types::ErrorClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthTrackerType {
    HeartRateContinuous,
    PpgGreen,
    PpgIr,
    PpgRed,
}

/**
 * Typed keys a data point can be queried with.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKey {
    HeartRate,
    HeartRateStatus,
    IbiList,
    IbiStatusList,
    PpgGreen,
    PpgGreenStatus,
    // ir and red are reserved; only green is decoded
    PpgIr,
    PpgRed,
}

impl ValueKey {
    pub fn name(&self) -> &'static str {
        match self {
            ValueKey::HeartRate => "HEART_RATE",
            ValueKey::HeartRateStatus => "HEART_RATE_STATUS",
            ValueKey::IbiList => "IBI_LIST",
            ValueKey::IbiStatusList => "IBI_STATUS_LIST",
            ValueKey::PpgGreen => "PPG_GREEN",
            ValueKey::PpgGreenStatus => "PPG_GREEN_STATUS",
            ValueKey::PpgIr => "PPG_IR",
            ValueKey::PpgRed => "PPG_RED",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    IntList(Vec<i32>),
}

/**
 * One opaque measurement record delivered by a tracker.
 */
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataPoint {
    timestamp_ns: i64,
    values: HashMap<ValueKey, Value>,
}

impl DataPoint {
    pub fn new(timestamp_ns: i64) -> Self {
        DataPoint { timestamp_ns, values: HashMap::new() }
    }

    pub fn with(mut self, key: ValueKey, value: Value) -> Self {
        self.values.insert(key, value);
        self
    }

    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    pub fn int(&self, key: ValueKey) -> Result<Option<i32>, DecodeError> {
        match self.values.get(&key) {
            None => Ok(None),
            Some(Value::Int(value)) => Ok(Some(*value)),
            Some(_) => Err(DecodeError::WrongType { key: key.name(), expected: "int" }),
        }
    }

    pub fn int_list(&self, key: ValueKey) -> Result<Option<&[i32]>, DecodeError> {
        match self.values.get(&key) {
            None => Ok(None),
            Some(Value::IntList(values)) => Ok(Some(values.as_slice())),
            Some(_) => Err(DecodeError::WrongType { key: key.name(), expected: "int list" }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerErrorCode {
    PermissionError,
    SdkPolicyError,
    Other(i32),
}

impl TrackerErrorCode {
    pub fn classify(&self) -> ErrorClass {
        match self {
            TrackerErrorCode::PermissionError => ErrorClass::Permission,
            TrackerErrorCode::SdkPolicyError => ErrorClass::Policy,
            TrackerErrorCode::Other(_) => ErrorClass::Unknown,
        }
    }
}

pub trait TrackerEventListener: Send + Sync {
    fn on_data_received(&self, data_points: &[DataPoint]);
    fn on_flush_completed(&self);
    fn on_error(&self, code: TrackerErrorCode);
}

pub trait HealthTracker: Send + Sync {
    fn tracker_type(&self) -> HealthTrackerType;
    fn set_event_listener(&self, listener: Arc<dyn TrackerEventListener>);
    fn unset_event_listener(&self);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingCapability {
    pub supported: Vec<HealthTrackerType>,
}

impl TrackingCapability {
    pub fn supports(&self, tracker_type: HealthTrackerType) -> bool {
        self.supported.contains(&tracker_type)
    }
}

pub trait ConnectionListener: Send + Sync {
    fn on_connection_success(&self);
    fn on_connection_ended(&self);
    fn on_connection_failed(&self, code: TrackerErrorCode);
}

pub trait HealthTrackingService: Send + Sync {
    /// Results are reported to `listener`, possibly from another thread.
    fn connect_service(&self, listener: Arc<dyn ConnectionListener>);
    fn disconnect_service(&self);
    fn tracking_capability(&self) -> TrackingCapability;
    fn health_tracker(&self, tracker_type: HealthTrackerType) -> Option<Arc<dyn HealthTracker>>;
}
