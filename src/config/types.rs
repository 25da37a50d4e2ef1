use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use uuid::Uuid;

use crate::coordinator::{CoordinatorOptions, DEFAULT_OUTBOX_CAPACITY};
use crate::device::constants::{make_serial_port_service_uuid, CONNECT_DEADLINE, WRITE_DEADLINE};
use crate::device::session::SessionOptions;
use crate::device::types::PeerAddress;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub peer_address: String,
    pub service_uuid: Uuid,
    pub device_name: String,
    pub connect_deadline_ms: u64,
    pub write_deadline_ms: u64,
    pub outbox_capacity: usize,
    pub heart_rate: bool,
    pub ppg: bool,
}

impl Config {
    pub fn peer(&self) -> PeerAddress {
        PeerAddress {
            address: self.peer_address.clone(),
            service_uuid: self.service_uuid,
        }
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            peer: self.peer(),
            device_name: self.device_name.clone(),
            session: SessionOptions {
                connect_deadline: Duration::from_millis(self.connect_deadline_ms),
                write_deadline: Duration::from_millis(self.write_deadline_ms),
            },
            // a zero capacity channel would reject every record
            outbox_capacity: self.outbox_capacity.max(1),
            heart_rate: self.heart_rate,
            ppg: self.ppg,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            peer_address: "127.0.0.1:7878".to_string(),
            service_uuid: make_serial_port_service_uuid(),
            device_name: "pulse-bridge".to_string(),
            connect_deadline_ms: CONNECT_DEADLINE,
            write_deadline_ms: WRITE_DEADLINE,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            heart_rate: true,
            ppg: true,
        }
    }
}
