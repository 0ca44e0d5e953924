//! [`Transport`] backed by the host Bluetooth stack through btleplug.

use async_trait::async_trait;
use btleplug::api::Peripheral as _;
use btleplug::platform::Peripheral;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::characteristics::{properties_from_flags, CharacteristicHandler};
use crate::ble::connection::{ConnectionManager, RetryPolicy};
use crate::ble::scanner::BleScanner;
use crate::ble::transport::{
    CharacteristicHandle, EventSender, PeripheralInfo, ServiceHandle, Transport,
};
use crate::config::SensorConfig;
use crate::error::{Error, Result};

/// Everything held for one connected peripheral.
struct DeviceLink {
    connection: ConnectionManager,
    characteristics: CharacteristicHandler,
}

/// Transport over the first local Bluetooth adapter.
pub struct BtleplugTransport {
    scanner: BleScanner,
    scan_timeout: Duration,
    retry: RetryPolicy,
    /// Peripherals returned by scans, by identifier.
    peripherals: RwLock<HashMap<String, Peripheral>>,
    /// Live connections, by identifier.
    links: RwLock<HashMap<String, Arc<DeviceLink>>>,
}

impl BtleplugTransport {
    /// Open the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterUnavailable`] if there is no usable adapter.
    pub async fn new() -> Result<Self> {
        Ok(Self::with_scanner(BleScanner::new().await?))
    }

    /// Use an existing scanner.
    pub fn with_scanner(scanner: BleScanner) -> Self {
        Self {
            scanner,
            scan_timeout: SensorConfig::DEFAULT_SCAN_TIMEOUT,
            retry: RetryPolicy::default(),
            peripherals: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
        }
    }

    /// Set how long a scan waits for a match.
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set how many times a connect is attempted and the pause between tries.
    pub fn with_connect_retries(mut self, max_attempts: u32, delay: Duration) -> Self {
        self.retry = RetryPolicy::new(max_attempts, delay);
        self
    }

    fn peripheral(&self, id: &str) -> Result<Peripheral> {
        self.peripherals
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound {
                identifier: id.to_string(),
            })
    }

    fn link(&self, id: &str) -> Result<Arc<DeviceLink>> {
        self.links.read().get(id).cloned().ok_or(Error::NotConnected)
    }
}

#[async_trait]
impl Transport for BtleplugTransport {
    async fn scan(&self, service: Uuid) -> Result<PeripheralInfo> {
        let peripheral = self
            .scanner
            .find_peripheral(service, self.scan_timeout)
            .await?;

        let info = PeripheralInfo::new(
            format!("{:?}", peripheral.id()),
            BleScanner::local_name(&peripheral).await,
        );

        self.peripherals
            .write()
            .insert(info.id.clone(), peripheral);

        Ok(info)
    }

    async fn connect(&self, device: &PeripheralInfo, events: EventSender) -> Result<()> {
        let peripheral = self.peripheral(&device.id)?;

        let link = Arc::new(DeviceLink {
            connection: ConnectionManager::new(self.scanner.adapter().clone(), peripheral.clone())
                .with_retry(self.retry),
            characteristics: CharacteristicHandler::new(peripheral),
        });

        link.connection.connect(&events).await?;

        if let Err(e) = link.characteristics.start_notifications(events).await {
            warn!("Failed to open notification stream: {}", e);
            if let Err(cleanup) = link.connection.disconnect().await {
                warn!(
                    "Failed to release connection after notification setup error: {}",
                    cleanup
                );
            }
            return Err(e);
        }

        let previous = self.links.write().insert(device.id.clone(), link);
        if let Some(previous) = previous {
            previous.characteristics.stop_notifications();
        }

        info!("Connected to {}", device.display_name());
        Ok(())
    }

    async fn get_service(&self, device: &PeripheralInfo, service: Uuid) -> Result<ServiceHandle> {
        let link = self.link(&device.id)?;

        link.characteristics
            .discover()
            .await
            .map_err(|e| Error::DiscoveryFailed {
                reason: e.to_string(),
            })?;

        link.characteristics
            .find_service(&service)
            .map(|s| ServiceHandle {
                device_id: device.id.clone(),
                uuid: s.uuid,
            })
            .ok_or_else(|| Error::ServiceNotFound {
                uuid: service.to_string(),
            })
    }

    async fn list_characteristics(
        &self,
        service: &ServiceHandle,
    ) -> Result<Vec<CharacteristicHandle>> {
        let link = self.link(&service.device_id)?;

        let handles: Vec<_> = link
            .characteristics
            .characteristics_of(&service.uuid)
            .into_iter()
            .map(|c| CharacteristicHandle {
                device_id: service.device_id.clone(),
                service: c.service_uuid,
                uuid: c.uuid,
                properties: properties_from_flags(c.properties),
            })
            .collect();

        debug!(
            "Service {} exposes {} characteristics",
            service.uuid,
            handles.len()
        );

        Ok(handles)
    }

    async fn read_descriptor(
        &self,
        characteristic: &CharacteristicHandle,
        descriptor: Uuid,
    ) -> Result<Vec<u8>> {
        let link = self.link(&characteristic.device_id)?;
        link.characteristics
            .read_descriptor(&characteristic.uuid, &descriptor)
            .await
    }

    async fn subscribe(&self, characteristic: &CharacteristicHandle) -> Result<()> {
        let link = self.link(&characteristic.device_id)?;
        link.characteristics.subscribe(&characteristic.uuid).await
    }

    async fn unsubscribe(&self, characteristic: &CharacteristicHandle) -> Result<()> {
        let link = self.link(&characteristic.device_id)?;
        link.characteristics.unsubscribe(&characteristic.uuid).await
    }

    async fn disconnect(&self, device: &PeripheralInfo) -> Result<()> {
        let removed = self.links.write().remove(&device.id);
        let Some(link) = removed else {
            debug!("No live connection to {}", device.display_name());
            return Ok(());
        };

        link.characteristics.stop_notifications();
        link.connection.disconnect().await
    }
}
