//! BLE Service, Characteristic and Descriptor UUIDs.
//!
//! Contains the well-known descriptor identifier and the identifiers of the
//! reference orientation sensor.

use uuid::Uuid;

/// Characteristic Presentation Format descriptor (0x2904).
pub const PRESENTATION_FORMAT_DESCRIPTOR_UUID: Uuid =
    Uuid::from_u128(0x0000_2904_0000_1000_8000_00805f9b34fb);

// Orientation sensor service (custom 128-bit)
/// Orientation sensor service UUID.
pub const ORIENTATION_SERVICE_UUID: Uuid = Uuid::from_u128(0x19b1_0010_e8f2_537e_4f6c_d104768a1214);
/// Pitch characteristic UUID (Read, Notify).
pub const PITCH_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x19b1_0013_e8f2_537e_4f6c_d104768a1214);
/// Roll characteristic UUID (Read, Notify).
pub const ROLL_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x19b1_0014_e8f2_537e_4f6c_d104768a1214);
/// Tilt-compensated heading characteristic UUID (Read, Notify).
pub const HEADING_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x19b1_0016_e8f2_537e_4f6c_d104768a1214);

/// Compare two textual UUIDs the way GATT does: case-insensitive, exact otherwise.
pub fn uuid_str_eq(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}
