use serde::{Deserialize, Serialize};

/**
 * Sensor status reported by the tracking service alongside each reading.
 * Values the service may add later are kept verbatim.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const NONE: StatusCode = StatusCode(0);
    pub const FIND_HR: StatusCode = StatusCode(1);
    pub const ATTACHED: StatusCode = StatusCode(-1);
    pub const DETECT_MOVE: StatusCode = StatusCode(-2);
    pub const DETACHED: StatusCode = StatusCode(-3);
    pub const LOW_RELIABILITY: StatusCode = StatusCode(-8);
    pub const VERY_LOW_RELIABILITY: StatusCode = StatusCode(-10);
    pub const NO_DATA_FLUSH: StatusCode = StatusCode(-99);

    pub fn name(&self) -> Option<&'static str> {
        let name = match *self {
            StatusCode::NONE => "NONE",
            StatusCode::FIND_HR => "FIND_HR",
            StatusCode::ATTACHED => "ATTACHED",
            StatusCode::DETECT_MOVE => "DETECT_MOVE",
            StatusCode::DETACHED => "DETACHED",
            StatusCode::LOW_RELIABILITY => "LOW_RELIABILITY",
            StatusCode::VERY_LOW_RELIABILITY => "VERY_LOW_RELIABILITY",
            StatusCode::NO_DATA_FLUSH => "NO_DATA_FLUSH",
            _ => return None,
        };
        Some(name)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "STATUS({})", self.0),
        }
    }
}

/**
 * Bit position of the interval quality flag in a packed inter-beat interval.
 */
pub const IBI_QUALITY_SHIFT: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateSample {
    pub status: StatusCode,
    #[serde(rename = "hr")]
    pub heart_rate: u32,
    #[serde(rename = "ibi")]
    pub inter_beat_interval_ms: u32,
    #[serde(rename = "qIbi")]
    pub interval_quality: u32,
}

impl HeartRateSample {
    pub fn packed_ibi(&self) -> u32 {
        (self.interval_quality << IBI_QUALITY_SHIFT) | self.inter_beat_interval_ms
    }
}

// Only the green channel is decoded; ir and red are not carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PpgSample {
    pub timestamp_ns: i64,
    pub green: i32,
    pub green_status: StatusCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    HeartRate,
    Ppg,
}

impl SensorKind {
    pub const ALL: [SensorKind; 2] = [SensorKind::HeartRate, SensorKind::Ppg];
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            SensorKind::HeartRate => "heart rate",
            SensorKind::Ppg => "ppg",
        };

        write!(f, "{}", result)
    }
}

/**
 * Classification of an error reported by the tracking service.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Permission,
    Policy,
    Unknown,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            ErrorClass::Permission => "permission",
            ErrorClass::Policy => "policy",
            ErrorClass::Unknown => "unknown",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackingState {
    Uninitialized,
    Ready,
    Tracking,
    Stopped,
    Errored(ErrorClass),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    HeartRate(HeartRateSample),
    Ppg(PpgSample),
}

impl Sample {
    pub fn kind(&self) -> SensorKind {
        match self {
            Sample::HeartRate(_) => SensorKind::HeartRate,
            Sample::Ppg(_) => SensorKind::Ppg,
        }
    }
}

/**
 * Where a reported error originated: one sensor feed, or the service connection itself.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    Feed(SensorKind),
    Service,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Sample(Sample),
    Error { source: ErrorSource, class: ErrorClass },
}
