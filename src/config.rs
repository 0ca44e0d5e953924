//! Target device configuration.
//!
//! One service and exactly three characteristics are monitored. The all-zero
//! service identifier means "not configured" and blocks scanning.

use std::time::Duration;

use uuid::Uuid;

use crate::ble::uuids::*;
use crate::error::{Error, Result};

/// Number of characteristics a session monitors.
pub const TARGET_COUNT: usize = 3;

/// A characteristic to monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetCharacteristic {
    /// Display name, e.g. "Pitch".
    pub name: String,
    /// Characteristic UUID.
    pub uuid: Uuid,
}

impl TargetCharacteristic {
    /// Create a new target.
    pub fn new(name: impl Into<String>, uuid: Uuid) -> Self {
        Self {
            name: name.into(),
            uuid,
        }
    }
}

/// Configuration for a [`crate::SensorSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorConfig {
    /// Service advertised by the peripheral and holding the targets.
    pub service: Uuid,
    /// The monitored characteristics, in display order.
    pub targets: [TargetCharacteristic; TARGET_COUNT],
    /// How long a scan waits for a matching device.
    pub scan_timeout: Duration,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            service: ORIENTATION_SERVICE_UUID,
            targets: [
                TargetCharacteristic::new("Pitch", PITCH_CHARACTERISTIC_UUID),
                TargetCharacteristic::new("Roll", ROLL_CHARACTERISTIC_UUID),
                TargetCharacteristic::new("Heading", HEADING_CHARACTERISTIC_UUID),
            ],
            scan_timeout: Self::DEFAULT_SCAN_TIMEOUT,
        }
    }
}

impl SensorConfig {
    /// Default scan timeout (10 seconds).
    pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

    /// Build a configuration from textual UUIDs.
    ///
    /// UUIDs are accepted in any letter case.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if any identifier fails to parse.
    pub fn from_strs(service: &str, targets: [(&str, &str); TARGET_COUNT]) -> Result<Self> {
        let service = parse_uuid("service", service)?;

        let [a, b, c] = targets;
        let targets = [
            TargetCharacteristic::new(a.0, parse_uuid(a.0, a.1)?),
            TargetCharacteristic::new(b.0, parse_uuid(b.0, b.1)?),
            TargetCharacteristic::new(c.0, parse_uuid(c.0, c.1)?),
        ];

        Ok(Self {
            service,
            targets,
            scan_timeout: Self::DEFAULT_SCAN_TIMEOUT,
        })
    }

    /// Set the scan timeout.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Whether a real service identifier has been set.
    pub fn is_configured(&self) -> bool {
        !self.service.is_nil()
    }

    /// Check that the configuration can be used for scanning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the service is unset, or a target
    /// is unset or duplicated.
    pub fn validate(&self) -> Result<()> {
        if !self.is_configured() {
            return Err(Error::Configuration {
                reason: "target service UUID is not set".to_string(),
            });
        }

        for (i, target) in self.targets.iter().enumerate() {
            if target.uuid.is_nil() {
                return Err(Error::Configuration {
                    reason: format!("characteristic UUID for {} is not set", target.name),
                });
            }
            if self.targets[..i].iter().any(|t| t.uuid == target.uuid) {
                return Err(Error::Configuration {
                    reason: format!("characteristic UUID {} is listed twice", target.uuid),
                });
            }
        }

        Ok(())
    }

    /// Find the target with this UUID.
    pub fn target(&self, uuid: &Uuid) -> Option<&TargetCharacteristic> {
        self.targets.iter().find(|t| t.uuid == *uuid)
    }

    /// Find a target by display name (case-insensitive).
    pub fn target_by_name(&self, name: &str) -> Option<&TargetCharacteristic> {
        self.targets
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

fn parse_uuid(label: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim()).map_err(|e| Error::Configuration {
        reason: format!("invalid UUID for {}: {:?} ({})", label, value, e),
    })
}
