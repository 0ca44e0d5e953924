//! Scripted in-memory transport for session tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

use crate::ble::transport::{
    CharProperties, CharacteristicHandle, EventSender, LinkId, PeripheralInfo, ServiceHandle,
    Transport,
};
use crate::error::{Error, Result};
use crate::session::SessionHandle;

/// Something that happens while a descriptor read or subscribe is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interrupt {
    LinkLost,
    DisconnectRequested,
}

/// What the fake peripheral does.
#[derive(Default)]
pub(crate) struct Script {
    /// Devices returned by successive scans; empty means no match.
    pub devices: VecDeque<PeripheralInfo>,
    pub adapter_missing: bool,
    pub connect_fails: bool,
    pub service_missing: bool,
    /// Characteristics present in the service.
    pub characteristics: Vec<Uuid>,
    /// Descriptor values; a missing entry means the descriptor does not exist.
    pub descriptors: HashMap<Uuid, Vec<u8>>,
    pub descriptor_failures: HashSet<Uuid>,
    pub subscribe_failures: HashSet<Uuid>,
    pub unsubscribe_failures: HashSet<Uuid>,
    pub disconnect_fails: bool,
    /// Fire an interrupt when this characteristic's descriptor is read.
    pub descriptor_interrupt: Option<(Uuid, Interrupt)>,
    /// Fire an interrupt while subscribing to this characteristic.
    pub subscribe_interrupt: Option<(Uuid, Interrupt)>,
    /// Used to deliver [`Interrupt::DisconnectRequested`].
    pub handle: Option<SessionHandle>,
}

/// Transport that follows a [`Script`] and records every call.
#[derive(Default)]
pub(crate) struct FakeTransport {
    pub script: Mutex<Script>,
    calls: Mutex<Vec<String>>,
    sender: Mutex<Option<EventSender>>,
}

impl FakeTransport {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(script),
            ..Default::default()
        }
    }

    /// Calls so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Link of the most recent connect.
    pub fn link(&self) -> Option<LinkId> {
        self.sender.lock().as_ref().map(EventSender::link)
    }

    /// Push a notification on the most recent connection.
    pub fn notify(&self, characteristic: Uuid, data: &[u8]) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.notify(characteristic, data.to_vec()),
            None => false,
        }
    }

    /// Report an unexpected disconnect of the most recent connection.
    pub fn drop_link(&self) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.link_lost(),
            None => false,
        }
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }

    fn fire(&self, interrupt: Option<(Uuid, Interrupt)>, uuid: Uuid) {
        let handle = self.script.lock().handle.clone();

        match interrupt.filter(|(target, _)| *target == uuid) {
            Some((_, Interrupt::LinkLost)) => {
                self.drop_link();
            }
            Some((_, Interrupt::DisconnectRequested)) => {
                if let Some(handle) = handle {
                    handle.request_disconnect();
                }
            }
            None => {}
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn scan(&self, service: Uuid) -> Result<PeripheralInfo> {
        self.record("scan".to_string());

        let mut script = self.script.lock();
        if script.adapter_missing {
            return Err(Error::AdapterUnavailable);
        }
        script.devices.pop_front().ok_or(Error::NoMatch {
            service: service.to_string(),
        })
    }

    async fn connect(&self, device: &PeripheralInfo, events: EventSender) -> Result<()> {
        self.record(format!("connect {}", device.id));

        if self.script.lock().connect_fails {
            return Err(Error::ConnectionFailed {
                reason: "peripheral refused".to_string(),
            });
        }

        *self.sender.lock() = Some(events);
        Ok(())
    }

    async fn get_service(&self, device: &PeripheralInfo, service: Uuid) -> Result<ServiceHandle> {
        self.record("get_service".to_string());

        if self.script.lock().service_missing {
            return Err(Error::ServiceNotFound {
                uuid: service.to_string(),
            });
        }

        Ok(ServiceHandle {
            device_id: device.id.clone(),
            uuid: service,
        })
    }

    async fn list_characteristics(
        &self,
        service: &ServiceHandle,
    ) -> Result<Vec<CharacteristicHandle>> {
        self.record("list_characteristics".to_string());

        let properties = CharProperties {
            read: true,
            notify: true,
            ..Default::default()
        };

        Ok(self
            .script
            .lock()
            .characteristics
            .iter()
            .map(|uuid| CharacteristicHandle {
                device_id: service.device_id.clone(),
                service: service.uuid,
                uuid: *uuid,
                properties,
            })
            .collect())
    }

    async fn read_descriptor(
        &self,
        characteristic: &CharacteristicHandle,
        descriptor: Uuid,
    ) -> Result<Vec<u8>> {
        let uuid = characteristic.uuid;
        self.record(format!("read_descriptor {}", uuid));

        let interrupt = self.script.lock().descriptor_interrupt;
        self.fire(interrupt, uuid);

        let script = self.script.lock();
        if script.descriptor_failures.contains(&uuid) {
            return Err(Error::DescriptorRead {
                characteristic: uuid.to_string(),
                reason: "GATT read error".to_string(),
            });
        }

        script
            .descriptors
            .get(&uuid)
            .cloned()
            .ok_or_else(|| Error::DescriptorNotFound {
                characteristic: uuid.to_string(),
                descriptor: descriptor.to_string(),
            })
    }

    async fn subscribe(&self, characteristic: &CharacteristicHandle) -> Result<()> {
        self.record(format!("subscribe {}", characteristic.uuid));

        let interrupt = self.script.lock().subscribe_interrupt;
        self.fire(interrupt, characteristic.uuid);

        if self
            .script
            .lock()
            .subscribe_failures
            .contains(&characteristic.uuid)
        {
            return Err(Error::Subscribe {
                characteristic: characteristic.uuid.to_string(),
                reason: "CCCD write rejected".to_string(),
            });
        }
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: &CharacteristicHandle) -> Result<()> {
        self.record(format!("unsubscribe {}", characteristic.uuid));

        if self
            .script
            .lock()
            .unsubscribe_failures
            .contains(&characteristic.uuid)
        {
            return Err(Error::Subscribe {
                characteristic: characteristic.uuid.to_string(),
                reason: "CCCD write rejected".to_string(),
            });
        }
        Ok(())
    }

    async fn disconnect(&self, device: &PeripheralInfo) -> Result<()> {
        self.record(format!("disconnect {}", device.id));

        if self.script.lock().disconnect_fails {
            return Err(Error::Internal("link already gone".to_string()));
        }
        Ok(())
    }
}
