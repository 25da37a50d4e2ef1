use uuid::Uuid;

/**
 * How long (milliseconds) opening the connection, including the handshake, may take.
 */
pub const CONNECT_DEADLINE: u64 = 10_000;

/**
 * How long (milliseconds) a single write plus flush may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) closing the output stream may take.
 */
pub const CLOSE_DEADLINE: u64 = 1000;

/**
 * The well-known UUID of the Bluetooth serial port profile service the peer advertises.
 */
pub const SERIAL_PORT_SERVICE: &str = "00001101-0000-1000-8000-00805f9b34fb";

pub fn make_serial_port_service_uuid() -> Uuid {
    Uuid::parse_str(SERIAL_PORT_SERVICE).unwrap()
}
