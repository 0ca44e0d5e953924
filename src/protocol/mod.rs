//! Protocol module for decoding self-describing characteristic values.
//!
//! This module contains the implementations for:
//! - Format, unit and namespace lookup tables
//! - Presentation format descriptor parsing
//! - Value decoding with exponent scaling

pub mod format;
pub mod presentation;
pub mod value;

pub use format::{lookup_format, lookup_unit, namespace_name, ByteWidth, FormatType, UnitInfo};
pub use presentation::PresentationFormat;
pub use value::{decode, DecodedValue, FormattedValue, RawReading, RawValue};
