//! BLE scanning functionality.
//!
//! Provides the scanner that finds a peripheral advertising the target service.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

/// BLE scanner for finding the sensor peripheral.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
}

impl BleScanner {
    /// Create a new BLE scanner on the first adapter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AdapterUnavailable`] if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::AdapterUnavailable)?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|_e| Error::AdapterUnavailable)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::AdapterUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self { adapter })
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Scan until a peripheral advertising `service` shows up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoMatch`] when nothing matched within `timeout`, and
    /// [`Error::ScanCancelled`] if the adapter stops delivering events.
    pub async fn find_peripheral(&self, service: Uuid, timeout: Duration) -> Result<Peripheral> {
        let mut events = self.adapter.events().await?;

        info!("Starting BLE scan for service {}", service);

        self.adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await?;

        let search = async {
            // Peripherals cached from an earlier scan do not emit a new discovery event.
            for peripheral in self.adapter.peripherals().await.unwrap_or_default() {
                if Self::advertises(&peripheral, &service).await {
                    return Some(peripheral);
                }
            }

            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id)
                    | CentralEvent::DeviceUpdated(id)
                    | CentralEvent::ServicesAdvertisement { id, .. } => id,
                    _ => continue,
                };

                if let Some(peripheral) = self.matching_peripheral(id, &service).await {
                    return Some(peripheral);
                }
            }

            None
        };

        let outcome = tokio::time::timeout(timeout, search).await;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }

        match outcome {
            Ok(Some(peripheral)) => {
                info!("Found peripheral {:?}", peripheral.id());
                Ok(peripheral)
            }
            Ok(None) => {
                debug!("Adapter event stream ended during scan");
                Err(Error::ScanCancelled)
            }
            Err(_) => Err(Error::NoMatch {
                service: service.to_string(),
            }),
        }
    }

    async fn matching_peripheral(&self, id: PeripheralId, service: &Uuid) -> Option<Peripheral> {
        let peripheral = match self.adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return None;
            }
        };

        if Self::advertises(&peripheral, service).await {
            Some(peripheral)
        } else {
            None
        }
    }

    async fn advertises(peripheral: &Peripheral, service: &Uuid) -> bool {
        match peripheral.properties().await {
            Ok(Some(properties)) => properties.services.contains(service),
            _ => false,
        }
    }

    /// Advertised local name of a peripheral.
    pub async fn local_name(peripheral: &Peripheral) -> Option<String> {
        peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|p| p.local_name)
    }
}
