//! Characteristic Presentation Format (0x2904) descriptor parsing.

use std::fmt;

use tracing::warn;

use crate::error::{Error, Result};

use super::format::{namespace_name, ByteWidth, FormatType, UnitInfo};

/// Decoded presentation format descriptor.
///
/// Created once per characteristic after the descriptor is read and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PresentationFormat {
    /// Value format.
    pub format: FormatType,
    /// Power-of-ten multiplier applied to numeric values.
    pub exponent: i8,
    /// Unit of the value.
    pub unit: UnitInfo,
    /// Namespace of the description field.
    pub namespace: u8,
    /// Namespace-specific description.
    pub description: u16,
}

impl PresentationFormat {
    /// Encoded length of the descriptor.
    pub const SIZE: usize = 7;

    /// Parse a descriptor value.
    ///
    /// Layout (multi-byte fields little-endian):
    /// - Byte 0: format code
    /// - Byte 1: exponent (signed)
    /// - Bytes 2-3: unit code
    /// - Byte 4: namespace
    /// - Bytes 5-6: description
    ///
    /// `label` names the characteristic in diagnostics. Trailing bytes past
    /// the seventh are ignored.
    pub fn parse(data: &[u8], label: &str) -> Result<Self> {
        if data.len() < Self::SIZE {
            warn!(
                "0x2904 data too short for {}. Length: {}",
                label,
                data.len()
            );
            return Err(Error::DescriptorTooShort {
                characteristic: label.to_string(),
                len: data.len(),
            });
        }

        Ok(Self {
            format: FormatType::from_code(data[0]),
            exponent: data[1] as i8,
            unit: UnitInfo::from_code(u16::from_le_bytes([data[2], data[3]])),
            namespace: data[4],
            description: u16::from_le_bytes([data[5], data[6]]),
        })
    }

    /// The raw format code.
    pub fn format_code(&self) -> u8 {
        self.format.code()
    }

    /// Human-readable format name.
    pub fn format_name(&self) -> String {
        self.format.name().into_owned()
    }

    /// Encoded width of values in this format.
    pub fn byte_width(&self) -> ByteWidth {
        self.format.byte_width()
    }

    /// The raw unit code.
    pub fn unit_code(&self) -> u16 {
        self.unit.code
    }

    /// Unit display symbol.
    pub fn unit_symbol(&self) -> &str {
        &self.unit.symbol
    }

    /// Full unit name.
    pub fn unit_name(&self) -> &str {
        &self.unit.name
    }

    /// Name of the namespace.
    pub fn namespace_name(&self) -> &'static str {
        namespace_name(self.namespace)
    }

    /// The multiplier `10^exponent`.
    pub fn scale(&self) -> f64 {
        10f64.powi(i32::from(self.exponent))
    }
}

impl fmt::Display for PresentationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Format: {}", self.format)?;
        writeln!(f, "Exponent: {}", self.exponent)?;
        writeln!(
            f,
            "Unit: {} ({}, UUID: 0x{:x})",
            self.unit.name, self.unit.symbol, self.unit.code
        )?;
        writeln!(
            f,
            "Namespace: {} (0x{:x})",
            self.namespace_name(),
            self.namespace
        )?;
        write!(f, "Description Field: 0x{:x}", self.description)
    }
}
