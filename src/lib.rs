// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # orientation-sensor-ble
//!
//! A cross-platform Rust library for monitoring a Bluetooth Low Energy
//! orientation sensor that publishes pitch, roll and heading as
//! self-describing GATT characteristics.
//!
//! Each characteristic carries a Characteristic Presentation Format
//! descriptor (0x2904). The library reads it once per characteristic and
//! uses it to decode every notification: value format, power-of-ten
//! exponent and unit.
//!
//! ## Features
//!
//! - **Format Registry**: SIG format codes, units and namespaces
//! - **Descriptor Parsing**: 7-byte presentation format descriptors
//! - **Value Decoding**: exponent scaling with explicit sentinels for short
//!   or malformed payloads and a hex fallback without a descriptor
//! - **Session Lifecycle**: scan, connect, discover, subscribe, idempotent teardown
//! - **Live Store**: per-characteristic snapshots for display code
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use orientation_sensor_ble::{BtleplugTransport, Result, SensorConfig, SensorSession};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let transport = BtleplugTransport::new().await?;
//!     let mut session = SensorSession::new(transport, SensorConfig::default());
//!
//!     if session.scan_and_connect().await?.is_some() {
//!         for _ in 0..20 {
//!             if let Some(event) = session.next_event().await {
//!                 session.process_event(event).await;
//!             }
//!             println!("{:?}", session.orientation());
//!         }
//!     }
//!
//!     session.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod protocol;
pub mod session;
pub mod utils;

// Re-exports for convenience
pub use config::{SensorConfig, TargetCharacteristic};
pub use error::{Error, Result};
pub use session::{CallbackHandle, Readiness, SensorSession, SessionHandle, StatusEvent};

// Re-export commonly used types from submodules
pub use ble::connection::ConnectionState;
pub use ble::platform::BtleplugTransport;
pub use ble::transport::{PeripheralInfo, SessionEvent, Transport};
pub use data::{CharacteristicEntry, CharacteristicSnapshot, CharacteristicStore, Orientation};
pub use protocol::{
    decode, lookup_format, lookup_unit, DecodedValue, FormatType, FormattedValue,
    PresentationFormat, RawReading, RawValue, UnitInfo,
};
