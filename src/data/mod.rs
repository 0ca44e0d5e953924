//! Data structures for characteristic state.
//!
//! This module contains the live characteristic table and the orientation
//! view derived from it.

pub mod orientation;
pub mod store;

pub use orientation::Orientation;
pub use store::{CharacteristicEntry, CharacteristicSnapshot, CharacteristicStore};
