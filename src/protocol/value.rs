//! Characteristic value decoding.
//!
//! Turns a notification payload into a raw reading plus a formatted value,
//! driven by the characteristic's presentation format descriptor.

use std::fmt;

use tracing::warn;

use crate::utils::{format_number, to_hex};

use super::format::FormatType;
use super::presentation::PresentationFormat;

/// A value read straight off the wire.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RawValue {
    /// Boolean format.
    Bool(bool),
    /// Any unsigned integer format.
    Unsigned(u64),
    /// Any signed integer format.
    Signed(i64),
    /// Any floating point format.
    Float(f64),
    /// String format, or the diagnostic text of an unknown format.
    Text(String),
    /// Undecoded bytes.
    Bytes(Vec<u8>),
}

impl RawValue {
    /// Numeric view of the value, if it has one.
    ///
    /// 64-bit integers lose precision beyond 2^53.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Unsigned(v) => Some(*v as f64),
            Self::Signed(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) | Self::Bytes(_) => None,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Unsigned(v) => write!(f, "{}", v),
            Self::Signed(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", format_number(*v)),
            Self::Text(s) => write!(f, "{}", s),
            Self::Bytes(b) => write!(f, "{}", to_hex(b)),
        }
    }
}

/// The raw column of a characteristic reading.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RawReading {
    /// Nothing received yet.
    NotAvailable,
    /// Decoded according to the descriptor.
    Value(RawValue),
    /// No descriptor; the payload as lowercase hex.
    Hex(String),
    /// Empty payload and no descriptor.
    NoData,
    /// Payload shorter than the format needs.
    TooShort {
        /// Bytes received.
        got: usize,
        /// Bytes required.
        need: usize,
    },
    /// The decoder rejected the payload.
    ParseError,
}

impl fmt::Display for RawReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAvailable => write!(f, "N/A"),
            Self::Value(v) => write!(f, "{}", v),
            Self::Hex(h) => write!(f, "{}", h),
            Self::NoData => write!(f, "No data"),
            Self::TooShort { got, need } => {
                write!(f, "Data too short (got {}, need {})", got, need)
            }
            Self::ParseError => write!(f, "Parse Error"),
        }
    }
}

/// The formatted column of a characteristic reading.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FormattedValue {
    /// Scaled numeric value.
    Number(f64),
    /// Text passed through unchanged.
    Text(String),
    /// No formatted value.
    NotApplicable,
    /// No descriptor was available to format the payload.
    NoDescriptor,
    /// The decoder rejected the payload.
    ParseError,
}

impl FormattedValue {
    /// The numeric value, if there is one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for FormattedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{}", format_number(*v)),
            Self::Text(s) => write!(f, "{}", s),
            Self::NotApplicable => write!(f, "N/A"),
            Self::NoDescriptor => write!(f, "N/A (No descriptor/format)"),
            Self::ParseError => write!(f, "Parse Error"),
        }
    }
}

/// Result of decoding one notification.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecodedValue {
    /// The raw reading.
    pub raw: RawReading,
    /// The formatted value.
    pub formatted: FormattedValue,
}

impl DecodedValue {
    fn new(raw: RawReading, formatted: FormattedValue) -> Self {
        Self { raw, formatted }
    }
}

/// Decode a notification payload.
///
/// Never fails: every problem is turned into a sentinel in the returned
/// value so that notification handling keeps going.
///
/// - Without a descriptor the payload is shown as hex.
/// - Payloads shorter than the format width yield [`RawReading::TooShort`].
/// - Numeric values are multiplied by `10^exponent`; text is passed through.
/// - Values tagged sint32 are formatted from the same four bytes read as
///   an IEEE 754 float (see [`sint32_as_float`]); the raw reading keeps the
///   integer interpretation.
pub fn decode(format: Option<&PresentationFormat>, data: &[u8]) -> DecodedValue {
    let Some(desc) = format else {
        if data.is_empty() {
            return DecodedValue::new(RawReading::NoData, FormattedValue::NotApplicable);
        }
        return DecodedValue::new(
            RawReading::Hex(to_hex(data)),
            FormattedValue::NoDescriptor,
        );
    };

    let need = desc.byte_width().min_len();
    if data.len() < need {
        return DecodedValue::new(
            RawReading::TooShort {
                got: data.len(),
                need,
            },
            FormattedValue::NotApplicable,
        );
    }

    let raw = match desc.format.decode(data) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(
                "Error parsing value (format: {}, declared bytes: {}): {}",
                desc.format,
                desc.byte_width(),
                e
            );
            return DecodedValue::new(RawReading::ParseError, FormattedValue::ParseError);
        }
    };

    let formatted = if uses_float_override(desc) {
        match sint32_as_float(data) {
            Some(value) => FormattedValue::Number(value * desc.scale()),
            None => return DecodedValue::new(RawReading::ParseError, FormattedValue::ParseError),
        }
    } else {
        match &raw {
            RawValue::Text(text) => FormattedValue::Text(text.clone()),
            other => match other.as_f64() {
                Some(value) => FormattedValue::Number(value * desc.scale()),
                None => FormattedValue::NotApplicable,
            },
        }
    };

    DecodedValue::new(RawReading::Value(raw), formatted)
}

/// Read the first four bytes as a little-endian IEEE 754 float.
///
/// The orientation firmware tags its float32 angles with the sint32 format
/// code. This reinterpretation applies to that code only and is not a
/// general format rule.
pub fn sint32_as_float(data: &[u8]) -> Option<f64> {
    let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some(f64::from(f32::from_le_bytes(bytes)))
}

/// Whether the descriptor's format is the device-specific float-in-sint32 case.
pub fn uses_float_override(format: &PresentationFormat) -> bool {
    format.format == FormatType::Sint32
}
