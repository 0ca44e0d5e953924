//! Error types for the orientation-sensor-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter is present, or the radio is disabled.
    #[error("Bluetooth adapter not available")]
    AdapterUnavailable,

    /// The target identifiers are unset or malformed.
    #[error("Configuration error: {reason}")]
    Configuration {
        /// Description of what is wrong with the configuration.
        reason: String,
    },

    /// The user or platform cancelled the scan.
    #[error("Scan cancelled")]
    ScanCancelled,

    /// The scan finished without finding a device advertising the target service.
    #[error("No device found advertising service {service}")]
    NoMatch {
        /// The service that was scanned for.
        service: String,
    },

    /// The selected device is not among the scan results.
    #[error("Device not found: {identifier}")]
    DeviceNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// Failed to establish a transport-level connection.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The peripheral dropped the connection.
    #[error("Connection lost")]
    ConnectionLost,

    /// Service or characteristic discovery failed.
    #[error("Discovery failed: {reason}")]
    DiscoveryFailed {
        /// Description of why discovery failed.
        reason: String,
    },

    /// Service not found on the device.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// The characteristic has no descriptor with the requested identifier.
    #[error("Descriptor {descriptor} not found on characteristic {characteristic}")]
    DescriptorNotFound {
        /// The characteristic that was searched.
        characteristic: String,
        /// The descriptor identifier that was requested.
        descriptor: String,
    },

    /// Reading a descriptor failed at the transport level.
    #[error("Descriptor read failed for {characteristic}: {reason}")]
    DescriptorRead {
        /// The characteristic owning the descriptor.
        characteristic: String,
        /// Description of the failure.
        reason: String,
    },

    /// A presentation format descriptor was shorter than 7 bytes.
    #[error("Presentation format data too short for {characteristic}: {len} bytes (need 7)")]
    DescriptorTooShort {
        /// Label of the characteristic the descriptor belongs to.
        characteristic: String,
        /// The actual length received.
        len: usize,
    },

    /// Enabling or disabling notifications failed.
    #[error("Subscription change failed for {characteristic}: {reason}")]
    Subscribe {
        /// The characteristic whose subscription failed.
        characteristic: String,
        /// Description of the failure.
        reason: String,
    },

    /// Invalid data was received from the peripheral.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// Operation requires a connection but none is live.
    #[error("Not connected")]
    NotConnected,

    /// The operation is not allowed in the current lifecycle state.
    #[error("Operation not allowed while {state}")]
    InvalidState {
        /// The lifecycle state at the time of the request.
        state: String,
    },

    /// Connection setup was abandoned because a disconnect was requested.
    #[error("Connection setup cancelled")]
    Cancelled,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Outcomes that are reported as status rather than as an error.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::ScanCancelled | Self::NoMatch { .. })
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
