//! GATT characteristic handling.
//!
//! Provides service lookup, descriptor reads, subscriptions and notification
//! forwarding for a connected peripheral.

use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _, Service};
use btleplug::platform::Peripheral;
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::ble::transport::{CharProperties, EventSender};
use crate::error::{Error, Result};

/// Handler for GATT characteristics on a peripheral.
pub struct CharacteristicHandler {
    /// The peripheral to communicate with.
    peripheral: Peripheral,
    /// Cached characteristics by UUID.
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
    /// Handle to the notification forwarding task.
    listener_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CharacteristicHandler {
    /// Create a new characteristic handler for a peripheral.
    pub fn new(peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            characteristics: RwLock::new(HashMap::new()),
            listener_handle: Mutex::new(None),
        }
    }

    /// Discover services and cache every characteristic.
    pub async fn discover(&self) -> Result<()> {
        self.peripheral.discover_services().await?;

        let mut chars = self.characteristics.write();
        chars.clear();

        for service in self.peripheral.services() {
            for characteristic in service.characteristics {
                debug!(
                    "Found characteristic: {} in service {}",
                    characteristic.uuid, service.uuid
                );
                chars.insert(characteristic.uuid, characteristic);
            }
        }

        debug!("Discovered {} characteristics", chars.len());

        Ok(())
    }

    /// Find a discovered service.
    pub fn find_service(&self, uuid: &Uuid) -> Option<Service> {
        self.peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == *uuid)
    }

    /// Characteristics belonging to a service.
    pub fn characteristics_of(&self, service: &Uuid) -> Vec<Characteristic> {
        self.characteristics
            .read()
            .values()
            .filter(|c| c.service_uuid == *service)
            .cloned()
            .collect()
    }

    fn get(&self, uuid: &Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }

    /// Read a descriptor of a characteristic.
    pub async fn read_descriptor(&self, characteristic: &Uuid, descriptor: &Uuid) -> Result<Vec<u8>> {
        let target = self
            .get(characteristic)?
            .descriptors
            .into_iter()
            .find(|d| d.uuid == *descriptor)
            .ok_or_else(|| Error::DescriptorNotFound {
                characteristic: characteristic.to_string(),
                descriptor: descriptor.to_string(),
            })?;

        let data = self
            .peripheral
            .read_descriptor(&target)
            .await
            .map_err(|e| Error::DescriptorRead {
                characteristic: characteristic.to_string(),
                reason: e.to_string(),
            })?;

        trace!(
            "Read {} bytes from descriptor {} of {}",
            data.len(),
            descriptor,
            characteristic
        );

        Ok(data)
    }

    /// Subscribe to notifications from a characteristic.
    pub async fn subscribe(&self, uuid: &Uuid) -> Result<()> {
        let characteristic = self.get(uuid)?;

        debug!(
            "Subscribing to {}, properties: {:?}",
            uuid, characteristic.properties
        );

        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| Error::Subscribe {
                characteristic: uuid.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Successfully subscribed to notifications from {}", uuid);

        Ok(())
    }

    /// Unsubscribe from notifications from a characteristic.
    pub async fn unsubscribe(&self, uuid: &Uuid) -> Result<()> {
        let characteristic = self.get(uuid)?;

        self.peripheral
            .unsubscribe(&characteristic)
            .await
            .map_err(|e| Error::Subscribe {
                characteristic: uuid.to_string(),
                reason: e.to_string(),
            })?;

        debug!("Unsubscribed from notifications from {}", uuid);

        Ok(())
    }

    /// Forward every notification from the peripheral into `events`.
    pub async fn start_notifications(&self, events: EventSender) -> Result<()> {
        let mut notifications = self.peripheral.notifications().await?;

        let handle = tokio::spawn(async move {
            debug!("Notification forwarder started for {}", events.link());

            while let Some(notification) = notifications.next().await {
                trace!(
                    "Notification received from {}: {} bytes",
                    notification.uuid,
                    notification.value.len()
                );

                if !events.notify(notification.uuid, notification.value) {
                    error!("Session dropped; stopping notification forwarder");
                    break;
                }
            }

            debug!("Notification forwarder stopped");
        });

        if let Some(previous) = self.listener_handle.lock().replace(handle) {
            previous.abort();
        }

        Ok(())
    }

    /// Stop forwarding notifications.
    pub fn stop_notifications(&self) {
        if let Some(handle) = self.listener_handle.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for CharacteristicHandler {
    fn drop(&mut self) {
        self.stop_notifications();
    }
}

/// Convert btleplug property flags.
pub fn properties_from_flags(flags: CharPropFlags) -> CharProperties {
    CharProperties {
        read: flags.contains(CharPropFlags::READ),
        write: flags.contains(CharPropFlags::WRITE),
        write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
        notify: flags.contains(CharPropFlags::NOTIFY),
        indicate: flags.contains(CharPropFlags::INDICATE),
    }
}
