//! Transport abstraction between the session and a BLE stack.
//!
//! The session only talks to the radio through [`Transport`]. Notifications
//! and link-loss reports travel back over a single channel of
//! [`SessionEvent`]s, stamped with the [`LinkId`] of the connection that
//! produced them.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;

/// A peripheral found by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralInfo {
    /// Platform identifier of the peripheral.
    pub id: String,
    /// Advertised local name.
    pub name: Option<String>,
}

impl PeripheralInfo {
    /// Create a new peripheral description.
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }

    /// Name to show the user; falls back to the identifier.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("ID: {}", self.id),
        }
    }
}

/// A resolved service on a connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceHandle {
    /// Peripheral the service belongs to.
    pub device_id: String,
    /// Service UUID.
    pub uuid: Uuid,
}

/// GATT characteristic property flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CharProperties {
    /// Readable.
    pub read: bool,
    /// Writable with response.
    pub write: bool,
    /// Writable without response.
    pub write_without_response: bool,
    /// Supports notifications.
    pub notify: bool,
    /// Supports indications.
    pub indicate: bool,
}

impl fmt::Display for CharProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.read, "READ"),
            (self.write, "WRITE"),
            (self.write_without_response, "WRITE_NO_RESPONSE"),
            (self.notify, "NOTIFY"),
            (self.indicate, "INDICATE"),
        ];
        let names: Vec<_> = flags
            .iter()
            .filter(|(set, _)| *set)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "{}", names.join(", "))
    }
}

/// A characteristic on a connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    /// Peripheral the characteristic belongs to.
    pub device_id: String,
    /// Service the characteristic belongs to.
    pub service: Uuid,
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Property flags.
    pub properties: CharProperties,
}

/// Identity of one connection. A reconnect to the same peripheral gets a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Messages processed by the session, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A characteristic value changed.
    Notification {
        /// Connection the value arrived on.
        link: LinkId,
        /// Characteristic UUID.
        characteristic: Uuid,
        /// The new value.
        data: Bytes,
    },
    /// The peripheral disconnected without being asked to.
    LinkLost {
        /// Connection that dropped.
        link: LinkId,
    },
    /// Someone asked for a disconnect.
    DisconnectRequested,
    /// Someone asked to flip a characteristic's subscription.
    ToggleRequested {
        /// Characteristic UUID.
        characteristic: Uuid,
    },
}

/// Sending half handed to the transport on connect.
///
/// Every event it sends is stamped with the link it was created for.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<SessionEvent>,
    link: LinkId,
}

impl EventSender {
    /// Create a sender bound to a link.
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>, link: LinkId) -> Self {
        Self { tx, link }
    }

    /// The link this sender stamps events with.
    pub fn link(&self) -> LinkId {
        self.link
    }

    /// Deliver a notification. Returns `false` once the session is gone.
    pub fn notify(&self, characteristic: Uuid, data: impl Into<Bytes>) -> bool {
        self.tx
            .send(SessionEvent::Notification {
                link: self.link,
                characteristic,
                data: data.into(),
            })
            .is_ok()
    }

    /// Report an unexpected disconnect. Returns `false` once the session is gone.
    pub fn link_lost(&self) -> bool {
        self.tx
            .send(SessionEvent::LinkLost { link: self.link })
            .is_ok()
    }
}

/// Operations the session needs from a BLE stack.
///
/// All methods may suspend; none should block the runtime.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Wait for a peripheral advertising `service`.
    ///
    /// Fails with [`crate::Error::NoMatch`] or [`crate::Error::ScanCancelled`]
    /// when nothing is selected, [`crate::Error::AdapterUnavailable`] when
    /// there is no radio.
    async fn scan(&self, service: Uuid) -> Result<PeripheralInfo>;

    /// Connect to a peripheral. Notifications and link loss for this
    /// connection must be reported through `events`.
    async fn connect(&self, device: &PeripheralInfo, events: EventSender) -> Result<()>;

    /// Resolve a primary service.
    async fn get_service(&self, device: &PeripheralInfo, service: Uuid) -> Result<ServiceHandle>;

    /// List the characteristics of a service.
    async fn list_characteristics(
        &self,
        service: &ServiceHandle,
    ) -> Result<Vec<CharacteristicHandle>>;

    /// Read a descriptor value.
    async fn read_descriptor(
        &self,
        characteristic: &CharacteristicHandle,
        descriptor: Uuid,
    ) -> Result<Vec<u8>>;

    /// Enable value-change notifications.
    async fn subscribe(&self, characteristic: &CharacteristicHandle) -> Result<()>;

    /// Disable value-change notifications.
    async fn unsubscribe(&self, characteristic: &CharacteristicHandle) -> Result<()>;

    /// Release the connection.
    async fn disconnect(&self, device: &PeripheralInfo) -> Result<()>;
}
