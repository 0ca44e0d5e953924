//! Live table of monitored characteristics.
//!
//! The store is the single source of truth that display code reads. Every
//! mutator is a no-op for unknown UUIDs so late or duplicate events from a
//! torn-down connection are harmless.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::ble::transport::CharacteristicHandle;
use crate::protocol::{DecodedValue, FormattedValue, PresentationFormat, RawReading};

/// State of one monitored characteristic.
#[derive(Debug, Clone, PartialEq)]
pub struct CharacteristicEntry {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    /// Parsed presentation format, once read.
    pub descriptor: Option<PresentationFormat>,
    /// Last raw reading.
    pub raw_value: RawReading,
    /// Last formatted value.
    pub formatted_value: FormattedValue,
    /// Unit symbol of the last value.
    pub unit: String,
    /// When the last value arrived.
    pub timestamp: Option<DateTime<Utc>>,
    /// Whether notifications are enabled.
    pub is_subscribed: bool,
    /// Transport handle; `None` if the peripheral lacks the characteristic.
    pub handle: Option<CharacteristicHandle>,
}

impl CharacteristicEntry {
    /// Create an entry with no descriptor, no value and notifications off.
    pub fn new(uuid: Uuid, name: impl Into<String>, handle: Option<CharacteristicHandle>) -> Self {
        Self {
            uuid,
            name: name.into(),
            descriptor: None,
            raw_value: RawReading::NotAvailable,
            formatted_value: FormattedValue::NotApplicable,
            unit: String::new(),
            timestamp: None,
            is_subscribed: false,
            handle,
        }
    }

    /// Read-only view for display code.
    pub fn snapshot(&self) -> CharacteristicSnapshot {
        CharacteristicSnapshot {
            uuid: self.uuid,
            name: self.name.clone(),
            raw_value: self.raw_value.clone(),
            formatted_value: self.formatted_value.clone(),
            unit: self.unit.clone(),
            timestamp: self.timestamp,
            is_subscribed: self.is_subscribed,
        }
    }
}

/// What display collaborators see of a characteristic.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicSnapshot {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    /// Last raw reading.
    pub raw_value: RawReading,
    /// Last formatted value.
    pub formatted_value: FormattedValue,
    /// Unit symbol.
    pub unit: String,
    /// When the last value arrived.
    pub timestamp: Option<DateTime<Utc>>,
    /// Whether notifications are enabled.
    pub is_subscribed: bool,
}

impl std::fmt::Display for CharacteristicSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let time = self
            .timestamp
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "N/A".to_string());
        write!(
            f,
            "{}: raw={} formatted={}{} at {}",
            self.name, self.raw_value, self.formatted_value, self.unit, time
        )
    }
}

/// Characteristic entries keyed by UUID.
#[derive(Debug, Clone, Default)]
pub struct CharacteristicStore {
    entries: HashMap<Uuid, CharacteristicEntry>,
}

impl CharacteristicStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh entry, replacing any previous one for the UUID.
    pub fn initialize(
        &mut self,
        uuid: Uuid,
        name: impl Into<String>,
        handle: Option<CharacteristicHandle>,
    ) {
        self.entries
            .insert(uuid, CharacteristicEntry::new(uuid, name, handle));
    }

    /// Get an entry.
    pub fn get(&self, uuid: &Uuid) -> Option<&CharacteristicEntry> {
        self.entries.get(uuid)
    }

    /// Insert or replace an entry.
    pub fn set(&mut self, entry: CharacteristicEntry) {
        self.entries.insert(entry.uuid, entry);
    }

    /// Attach a parsed descriptor. Returns whether the entry exists.
    pub fn record_descriptor(&mut self, uuid: &Uuid, format: PresentationFormat) -> bool {
        match self.entries.get_mut(uuid) {
            Some(entry) => {
                entry.descriptor = Some(format);
                true
            }
            None => false,
        }
    }

    /// Store a decoded value. Returns whether the entry exists.
    pub fn record_value(
        &mut self,
        uuid: &Uuid,
        value: DecodedValue,
        unit: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> bool {
        match self.entries.get_mut(uuid) {
            Some(entry) => {
                entry.raw_value = value.raw;
                entry.formatted_value = value.formatted;
                entry.unit = unit.into();
                entry.timestamp = Some(timestamp);
                true
            }
            None => false,
        }
    }

    /// Set the subscription flag. Returns whether the entry exists.
    pub fn set_subscribed(&mut self, uuid: &Uuid, subscribed: bool) -> bool {
        match self.entries.get_mut(uuid) {
            Some(entry) => {
                entry.is_subscribed = subscribed;
                true
            }
            None => false,
        }
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = &CharacteristicEntry> {
        self.entries.values()
    }

    /// UUIDs and handles of characteristics with notifications enabled.
    pub fn subscribed_handles(&self) -> Vec<(Uuid, CharacteristicHandle)> {
        self.entries
            .values()
            .filter(|e| e.is_subscribed)
            .filter_map(|e| e.handle.clone().map(|h| (e.uuid, h)))
            .collect()
    }

    /// Names of characteristics with notifications enabled, sorted.
    pub fn active_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.is_subscribed)
            .map(|e| e.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Snapshot of one entry.
    pub fn snapshot(&self, uuid: &Uuid) -> Option<CharacteristicSnapshot> {
        self.entries.get(uuid).map(CharacteristicEntry::snapshot)
    }

    /// Snapshots of all entries, sorted by name.
    pub fn snapshots(&self) -> Vec<CharacteristicSnapshot> {
        let mut snapshots: Vec<_> = self.entries.values().map(|e| e.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
