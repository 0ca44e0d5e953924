//! Orientation angles assembled from the monitored characteristics.

use crate::config::SensorConfig;
use crate::utils::heading_to_yaw;

use super::store::CharacteristicStore;

/// Latest pitch, roll and yaw in degrees.
///
/// Each angle is `None` until a numeric value has arrived for it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Orientation {
    /// Pitch in degrees.
    pub pitch: Option<f64>,
    /// Roll in degrees.
    pub roll: Option<f64>,
    /// Yaw in degrees, in (-180, 180].
    pub yaw: Option<f64>,
}

impl Orientation {
    /// Read the angles out of the store.
    ///
    /// The configured targets are taken in order as pitch, roll and heading;
    /// the heading is wrapped into the yaw range.
    pub fn from_store(store: &CharacteristicStore, config: &SensorConfig) -> Self {
        let value = |index: usize| {
            store
                .get(&config.targets[index].uuid)
                .and_then(|entry| entry.formatted_value.as_number())
        };

        Self {
            pitch: value(0),
            roll: value(1),
            yaw: value(2).map(heading_to_yaw),
        }
    }

    /// Whether all three angles are known.
    pub fn is_complete(&self) -> bool {
        self.pitch.is_some() && self.roll.is_some() && self.yaw.is_some()
    }
}
