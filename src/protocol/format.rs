//! Format, unit and namespace lookup tables for presentation format descriptors.
//!
//! Codes follow the Bluetooth SIG assigned numbers used by the sensor firmware.
//! The signed integer codes are the ones the firmware emits, which differ from
//! the SIG table for sint8/sint16/sint32.

use std::borrow::Cow;
use std::fmt;

use crate::error::{Error, Result};

use super::value::RawValue;

/// Width of a value encoded with a given format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ByteWidth {
    /// Always this many bytes.
    Fixed(usize),
    /// Driven by the payload length (strings).
    Variable,
}

impl ByteWidth {
    /// Minimum payload length a decode attempt needs.
    ///
    /// Variable and zero widths still need at least one byte.
    pub fn min_len(&self) -> usize {
        match self {
            Self::Fixed(n) => (*n).max(1),
            Self::Variable => 1,
        }
    }
}

impl fmt::Display for ByteWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "{}", n),
            Self::Variable => write!(f, "variable"),
        }
    }
}

/// Value format of a characteristic, keyed by its format code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FormatType {
    /// 0x01: boolean.
    Boolean,
    /// 0x04: unsigned 8-bit integer.
    Uint8,
    /// 0x06: unsigned 16-bit integer.
    Uint16,
    /// 0x08: unsigned 32-bit integer.
    Uint32,
    /// 0x0A: unsigned 64-bit integer.
    Uint64,
    /// 0x10: signed 8-bit integer.
    Sint8,
    /// 0x12: signed 16-bit integer.
    Sint16,
    /// 0x14: signed 32-bit integer.
    ///
    /// The orientation firmware actually puts IEEE 754 floats behind this
    /// code; see [`crate::protocol::value::decode`].
    Sint32,
    /// 0x19: UTF-8 string.
    Utf8String,
    /// 0x1B: IEEE 754 32-bit float.
    Float32,
    /// 0x1C: IEEE 754 64-bit float.
    Float64,
    /// Any code not in the table.
    Unknown(u8),
}

impl FormatType {
    /// Every known format, in code order.
    pub const KNOWN: [FormatType; 11] = [
        Self::Boolean,
        Self::Uint8,
        Self::Uint16,
        Self::Uint32,
        Self::Uint64,
        Self::Sint8,
        Self::Sint16,
        Self::Sint32,
        Self::Utf8String,
        Self::Float32,
        Self::Float64,
    ];

    /// Look up a format by code. Never fails: unknown codes map to [`FormatType::Unknown`].
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => Self::Boolean,
            0x04 => Self::Uint8,
            0x06 => Self::Uint16,
            0x08 => Self::Uint32,
            0x0A => Self::Uint64,
            0x10 => Self::Sint8,
            0x12 => Self::Sint16,
            0x14 => Self::Sint32,
            0x19 => Self::Utf8String,
            0x1B => Self::Float32,
            0x1C => Self::Float64,
            other => Self::Unknown(other),
        }
    }

    /// The raw format code.
    pub fn code(&self) -> u8 {
        match self {
            Self::Boolean => 0x01,
            Self::Uint8 => 0x04,
            Self::Uint16 => 0x06,
            Self::Uint32 => 0x08,
            Self::Uint64 => 0x0A,
            Self::Sint8 => 0x10,
            Self::Sint16 => 0x12,
            Self::Sint32 => 0x14,
            Self::Utf8String => 0x19,
            Self::Float32 => 0x1B,
            Self::Float64 => 0x1C,
            Self::Unknown(code) => *code,
        }
    }

    /// Human-readable name. Unknown formats embed their code in hex.
    pub fn name(&self) -> Cow<'static, str> {
        match self {
            Self::Boolean => Cow::Borrowed("boolean"),
            Self::Uint8 => Cow::Borrowed("uint8"),
            Self::Uint16 => Cow::Borrowed("uint16"),
            Self::Uint32 => Cow::Borrowed("uint32"),
            Self::Uint64 => Cow::Borrowed("uint64"),
            Self::Sint8 => Cow::Borrowed("sint8"),
            Self::Sint16 => Cow::Borrowed("sint16"),
            Self::Sint32 => Cow::Borrowed("sint32"),
            Self::Utf8String => Cow::Borrowed("utf8s"),
            Self::Float32 => Cow::Borrowed("float32"),
            Self::Float64 => Cow::Borrowed("float64"),
            Self::Unknown(code) => Cow::Owned(format!("Unknown format (0x{:02x})", code)),
        }
    }

    /// Encoded width of a value.
    pub fn byte_width(&self) -> ByteWidth {
        match self {
            Self::Boolean | Self::Uint8 | Self::Sint8 => ByteWidth::Fixed(1),
            Self::Uint16 | Self::Sint16 => ByteWidth::Fixed(2),
            Self::Uint32 | Self::Sint32 | Self::Float32 => ByteWidth::Fixed(4),
            Self::Uint64 | Self::Float64 => ByteWidth::Fixed(8),
            Self::Utf8String => ByteWidth::Variable,
            Self::Unknown(_) => ByteWidth::Fixed(0),
        }
    }

    /// Read a little-endian value starting at the front of `data`.
    ///
    /// Callers check `data.len()` against [`FormatType::byte_width`] first;
    /// a short buffer is still reported as an error rather than a panic.
    /// Unknown formats yield a diagnostic text value.
    pub fn decode(&self, data: &[u8]) -> Result<RawValue> {
        let value = match self {
            Self::Boolean => RawValue::Bool(take::<1>(data)?[0] != 0),
            Self::Uint8 => RawValue::Unsigned(u64::from(take::<1>(data)?[0])),
            Self::Uint16 => RawValue::Unsigned(u64::from(u16::from_le_bytes(take(data)?))),
            Self::Uint32 => RawValue::Unsigned(u64::from(u32::from_le_bytes(take(data)?))),
            Self::Uint64 => RawValue::Unsigned(u64::from_le_bytes(take(data)?)),
            Self::Sint8 => RawValue::Signed(i64::from(i8::from_le_bytes(take(data)?))),
            Self::Sint16 => RawValue::Signed(i64::from(i16::from_le_bytes(take(data)?))),
            Self::Sint32 => RawValue::Signed(i64::from(i32::from_le_bytes(take(data)?))),
            Self::Float32 => RawValue::Float(f64::from(f32::from_le_bytes(take(data)?))),
            Self::Float64 => RawValue::Float(f64::from_le_bytes(take(data)?)),
            Self::Utf8String => {
                let text = std::str::from_utf8(data).map_err(|e| Error::InvalidData {
                    context: format!("Invalid UTF-8 in string value: {}", e),
                })?;
                RawValue::Text(text.to_string())
            }
            Self::Unknown(code) => {
                RawValue::Text(format!("N/A (Unknown Format 0x{:02x})", code))
            }
        };

        Ok(value)
    }
}

impl fmt::Display for FormatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.name(), self.code())
    }
}

/// Copy the first `N` bytes of `data` into an array.
fn take<const N: usize>(data: &[u8]) -> Result<[u8; N]> {
    data.get(..N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| Error::InvalidData {
            context: format!("Need {} bytes, got {}", N, data.len()),
        })
}

/// Unit of a characteristic value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnitInfo {
    /// Assigned unit code (0x27xx).
    pub code: u16,
    /// Display symbol, e.g. `°`.
    pub symbol: Cow<'static, str>,
    /// Full name, e.g. `plane angle (degree)`.
    pub name: Cow<'static, str>,
}

impl UnitInfo {
    const fn known(code: u16, symbol: &'static str, name: &'static str) -> Self {
        Self {
            code,
            symbol: Cow::Borrowed(symbol),
            name: Cow::Borrowed(name),
        }
    }

    /// Look up a unit by code. Never fails: unknown codes get a placeholder
    /// whose symbol carries the code in hex.
    pub fn from_code(code: u16) -> Self {
        UNITS
            .iter()
            .find(|unit| unit.code == code)
            .cloned()
            .unwrap_or_else(|| Self {
                code,
                symbol: Cow::Owned(format!("UUID 0x{:04x}", code)),
                name: Cow::Borrowed("Unknown Unit"),
            })
    }

    /// Whether the code is in the table.
    pub fn is_known(&self) -> bool {
        UNITS.iter().any(|unit| unit.code == self.code)
    }
}

static UNITS: [UnitInfo; 13] = [
    UnitInfo::known(0x2700, "", "unitless"),
    UnitInfo::known(0x2701, "m", "length (metre)"),
    UnitInfo::known(0x2702, "kg", "mass (kilogram)"),
    UnitInfo::known(0x2703, "s", "time (second)"),
    UnitInfo::known(0x2704, "A", "electric current (ampere)"),
    UnitInfo::known(0x2705, "K", "thermodynamic temperature (kelvin)"),
    UnitInfo::known(0x2713, "m/s²", "acceleration (metres per second squared)"),
    UnitInfo::known(0x2724, "Pa", "pressure (pascal)"),
    UnitInfo::known(0x2728, "V", "electric potential difference (volt)"),
    UnitInfo::known(0x272F, "°C", "temperature (Celsius)"),
    UnitInfo::known(0x2743, "rad/s", "angular velocity (radian per second)"),
    UnitInfo::known(0x2763, "°", "plane angle (degree)"),
    UnitInfo::known(0x27AD, "%", "percentage"),
];

/// Name of a descriptor namespace code.
pub fn namespace_name(namespace: u8) -> &'static str {
    match namespace {
        0x00 => "Unknown",
        0x01 => "Bluetooth SIG Assigned Numbers",
        _ => "Unknown Namespace",
    }
}

/// Look up a format by code.
pub fn lookup_format(code: u8) -> FormatType {
    FormatType::from_code(code)
}

/// Look up a unit by code.
pub fn lookup_unit(code: u16) -> UnitInfo {
    UnitInfo::from_code(code)
}
