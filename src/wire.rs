//! Records exchanged with the peer.
//!
//! Every write carries exactly one compact UTF-8 JSON object. There is no
//! length prefix or delimiter, so a reader that receives several records in
//! one read uses [`RecordSplitter`] to separate them again.

use serde::Serialize;

use crate::tracking::types::Sample;

#[derive(Debug, Serialize)]
struct StatusRecord<'a> {
    status: &'a str,
    device: &'a str,
}

pub fn encode_sample(sample: &Sample) -> Result<Vec<u8>, serde_json::Error> {
    match sample {
        Sample::HeartRate(sample) => serde_json::to_vec(sample),
        Sample::Ppg(sample) => serde_json::to_vec(sample),
    }
}

pub fn encode_status(status: &str, device: &str) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&StatusRecord { status, device })
}

/**
 * The timestamp, sensor and value a peer extracts from one record.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSummary {
    pub timestamp: serde_json::Value,
    pub sensor: String,
    pub value: serde_json::Value,
}

fn field<'a>(record: &'a serde_json::Value, key: &str, fallback: &str) -> Option<&'a serde_json::Value> {
    record
        .get(key)
        .filter(|value| !value.is_null())
        .or_else(|| record.get(fallback))
        .filter(|value| !value.is_null())
}

/// `None` when the record carries no value or no timestamp.
pub fn summarize_record(record: &serde_json::Value) -> Option<RecordSummary> {
    let value = field(record, "value", "green")?;
    let timestamp = field(record, "timestamp", "timestampNs")?;
    let sensor = record
        .get("sensor")
        .and_then(|sensor| sensor.as_str())
        .unwrap_or("Unknown");

    Some(RecordSummary {
        timestamp: timestamp.clone(),
        sensor: sensor.to_string(),
        value: value.clone(),
    })
}

/**
 * Recovers concatenated JSON objects from a byte stream by tracking brace depth.
 * Bytes between objects are discarded; an unfinished object is kept until more bytes arrive.
 */
#[derive(Debug, Default)]
pub struct RecordSplitter {
    pending: Vec<u8>,
    depth: usize,
    in_string: bool,
    escape: bool,
}

impl RecordSplitter {
    pub fn new() -> Self {
        RecordSplitter::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut records = Vec::new();

        for &byte in bytes {
            if self.depth == 0 {
                if byte == b'{' {
                    self.pending.clear();
                    self.pending.push(byte);
                    self.depth = 1;
                }
                continue;
            }

            self.pending.push(byte);

            if self.in_string {
                if self.escape {
                    self.escape = false;
                } else if byte == b'\\' {
                    self.escape = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        records.push(String::from_utf8_lossy(&self.pending).into_owned());
                        self.pending.clear();
                    }
                },
                _ => {},
            }
        }

        records
    }

    /// Bytes of an object that has started but not finished yet.
    pub fn remainder(&self) -> &[u8] {
        &self.pending
    }
}
