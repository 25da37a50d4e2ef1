use uuid::Uuid;

use crate::device::constants::make_serial_port_service_uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Failed(String),
    // terminal, after DeviceSession::shutdown
    Closed,
}

/**
 * The fixed peer a session connects to.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub address: String,
    pub service_uuid: Uuid,
}

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        PeerAddress {
            address: address.into(),
            service_uuid: make_serial_port_service_uuid(),
        }
    }
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.address, self.service_uuid)
    }
}
