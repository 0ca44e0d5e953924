//! BLE communication module.
//!
//! [`Transport`] is the seam between the session and a Bluetooth stack.
//! [`BtleplugTransport`] implements it on top of btleplug.

pub mod characteristics;
pub mod connection;
pub mod platform;
pub mod scanner;
pub mod transport;
pub mod uuids;

#[cfg(test)]
pub(crate) mod fake;

pub use characteristics::CharacteristicHandler;
pub use connection::{ConnectionManager, ConnectionState, RetryPolicy};
pub use platform::BtleplugTransport;
pub use scanner::BleScanner;
pub use transport::{
    CharProperties, CharacteristicHandle, EventSender, LinkId, PeripheralInfo, ServiceHandle,
    SessionEvent, Transport,
};
pub use uuids::*;
