use crate::error::DecodeError;
use crate::tracking::types::{HeartRateSample, PpgSample, StatusCode};
use crate::tracking::vendor::{DataPoint, ValueKey};

/**
 * Status used when a data point carries none.
 */
pub const DEFAULT_STATUS: StatusCode = StatusCode::NONE;

/**
 * Heart rate used when a data point carries none.
 */
pub const DEFAULT_HEART_RATE: u32 = 0;

/**
 * Inter-beat interval used when the IBI list is missing or empty.
 */
pub const DEFAULT_IBI_MS: u32 = 0;

/**
 * Interval quality used when the IBI status list is missing or empty.
 */
pub const DEFAULT_IBI_QUALITY: u32 = 1;

fn status_or_default(data_point: &DataPoint, key: ValueKey) -> Result<StatusCode, DecodeError> {
    Ok(data_point.int(key)?.map(StatusCode).unwrap_or(DEFAULT_STATUS))
}

fn unsigned(key: ValueKey, value: i32) -> Result<u32, DecodeError> {
    u32::try_from(value).map_err(|_| DecodeError::OutOfRange { key: key.name(), value: value as i64 })
}

// The last element of a list is used, not an average.
fn last_unsigned_or(data_point: &DataPoint, key: ValueKey, default: u32) -> Result<u32, DecodeError> {
    match data_point.int_list(key)?.and_then(|values| values.last().copied()) {
        Some(value) => unsigned(key, value),
        None => Ok(default),
    }
}

pub fn decode_heart_rate(data_point: &DataPoint) -> Result<HeartRateSample, DecodeError> {
    let status = status_or_default(data_point, ValueKey::HeartRateStatus)?;

    let heart_rate = match data_point.int(ValueKey::HeartRate)? {
        Some(value) => unsigned(ValueKey::HeartRate, value)?,
        None => DEFAULT_HEART_RATE,
    };

    let inter_beat_interval_ms = last_unsigned_or(data_point, ValueKey::IbiList, DEFAULT_IBI_MS)?;
    let interval_quality = last_unsigned_or(data_point, ValueKey::IbiStatusList, DEFAULT_IBI_QUALITY)?;

    Ok(HeartRateSample { status, heart_rate, inter_beat_interval_ms, interval_quality })
}

/// Returns `Ok(None)` when the green reading is missing; such a data point is dropped.
pub fn decode_ppg(data_point: &DataPoint) -> Result<Option<PpgSample>, DecodeError> {
    let green = match data_point.int(ValueKey::PpgGreen)? {
        Some(green) => green,
        None => return Ok(None),
    };

    let green_status = status_or_default(data_point, ValueKey::PpgGreenStatus)?;

    Ok(Some(PpgSample {
        timestamp_ns: data_point.timestamp_ns(),
        green,
        green_status,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::vendor::Value;

    #[test]
    fn heart_rate_takes_last_ibi_and_quality() {
        let point = DataPoint::new(1)
            .with(ValueKey::HeartRateStatus, Value::Int(1))
            .with(ValueKey::HeartRate, Value::Int(72))
            .with(ValueKey::IbiList, Value::IntList(vec![700, 750, 820]))
            .with(ValueKey::IbiStatusList, Value::IntList(vec![1, 1, 0]));

        let sample = decode_heart_rate(&point).unwrap();
        assert_eq!(sample.status, StatusCode::FIND_HR);
        assert_eq!(sample.heart_rate, 72);
        assert_eq!(sample.inter_beat_interval_ms, 820);
        assert_eq!(sample.interval_quality, 0);
    }

    #[test]
    fn heart_rate_empty_ibi_list_uses_defaults() {
        let point = DataPoint::new(1)
            .with(ValueKey::HeartRate, Value::Int(65))
            .with(ValueKey::IbiList, Value::IntList(vec![]))
            .with(ValueKey::IbiStatusList, Value::IntList(vec![]));

        let sample = decode_heart_rate(&point).unwrap();
        assert_eq!(sample.inter_beat_interval_ms, 0);
        assert_eq!(sample.interval_quality, 1);
    }

    #[test]
    fn heart_rate_missing_fields_use_defaults() {
        let sample = decode_heart_rate(&DataPoint::new(1)).unwrap();

        assert_eq!(sample.status, DEFAULT_STATUS);
        assert_eq!(sample.heart_rate, DEFAULT_HEART_RATE);
        assert_eq!(sample.inter_beat_interval_ms, DEFAULT_IBI_MS);
        assert_eq!(sample.interval_quality, DEFAULT_IBI_QUALITY);
    }

    #[test]
    fn heart_rate_rejects_wrong_type_and_negative_values() {
        let wrong_type = DataPoint::new(1).with(ValueKey::IbiList, Value::Int(800));
        assert!(matches!(decode_heart_rate(&wrong_type), Err(DecodeError::WrongType { .. })));

        let negative = DataPoint::new(1).with(ValueKey::HeartRate, Value::Int(-5));
        assert_eq!(
            decode_heart_rate(&negative),
            Err(DecodeError::OutOfRange { key: "HEART_RATE", value: -5 }),
        );
    }

    #[test]
    fn ppg_without_green_is_dropped() {
        let point = DataPoint::new(42).with(ValueKey::PpgGreenStatus, Value::Int(0));
        assert_eq!(decode_ppg(&point), Ok(None));
    }

    #[test]
    fn ppg_with_green_is_decoded() {
        let point = DataPoint::new(123456789)
            .with(ValueKey::PpgGreen, Value::Int(15000))
            .with(ValueKey::PpgGreenStatus, Value::Int(0));

        assert_eq!(
            decode_ppg(&point),
            Ok(Some(PpgSample { timestamp_ns: 123456789, green: 15000, green_status: StatusCode::NONE })),
        );
    }

    #[test]
    fn ppg_missing_status_defaults_to_none() {
        let point = DataPoint::new(5).with(ValueKey::PpgGreen, Value::Int(900));
        assert_eq!(decode_ppg(&point).unwrap().unwrap().green_status, StatusCode::NONE);
    }
}
