//! Sensor session lifecycle.
//!
//! [`SensorSession`] owns the connection to one peripheral, the
//! [`CharacteristicStore`] and the event channel the transport reports into.
//! It drives scan, connect, discovery, per-characteristic setup and teardown,
//! and fans status and value changes out to display collaborators.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::connection::ConnectionState;
use crate::ble::transport::{
    CharacteristicHandle, EventSender, LinkId, PeripheralInfo, SessionEvent, Transport,
};
use crate::ble::uuids::PRESENTATION_FORMAT_DESCRIPTOR_UUID;
use crate::config::SensorConfig;
use crate::data::{CharacteristicSnapshot, CharacteristicStore, Orientation};
use crate::error::{Error, Result};
use crate::protocol::{decode, PresentationFormat};

/// Callback handle for unregistering callbacks.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// Lifecycle status shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// A scan started.
    Scanning,
    /// A scan found a device.
    DeviceFound(String),
    /// A scan ended without a device.
    NoDevice,
    /// A connect attempt started.
    Connecting(String),
    /// The transport connection is up.
    Connected(String),
    /// The connection was torn down.
    Disconnected,
    /// Teardown was requested without a connection.
    NotConnected,
    /// Names of the characteristics currently notifying.
    ActiveNotifications(Vec<String>),
    /// Something failed.
    Error(String),
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scanning => write!(f, "Scanning"),
            Self::DeviceFound(name) => write!(f, "Found {}", name),
            Self::NoDevice => write!(f, "Scan cancelled or no devices found"),
            Self::Connecting(name) => write!(f, "Connecting to {}", name),
            Self::Connected(name) => write!(f, "Connected to {}", name),
            Self::Disconnected => write!(f, "Disconnected"),
            Self::NotConnected => write!(f, "Not connected"),
            Self::ActiveNotifications(names) if names.is_empty() => {
                write!(f, "No active notifications")
            }
            Self::ActiveNotifications(names) => {
                write!(f, "Active Notifications: {}", names.join(", "))
            }
            Self::Error(message) => write!(f, "Error: {}", message),
        }
    }
}

/// How much of the target set the connected peripheral exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// All targets were found and set up.
    Full,
    /// Some targets are missing; nothing was set up automatically.
    Partial {
        /// Names of the missing targets.
        missing: Vec<String>,
    },
}

/// Cloneable handle for requesting work from outside the session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    /// Ask the session to disconnect. Also aborts an in-flight setup.
    pub fn request_disconnect(&self) -> bool {
        self.tx.send(SessionEvent::DisconnectRequested).is_ok()
    }

    /// Ask the session to flip a characteristic's subscription.
    pub fn request_toggle(&self, characteristic: Uuid) -> bool {
        self.tx
            .send(SessionEvent::ToggleRequested { characteristic })
            .is_ok()
    }
}

/// The live connection.
#[derive(Debug, Clone)]
struct ActiveLink {
    device: PeripheralInfo,
    id: LinkId,
}

/// Owner of one sensor connection and its characteristic table.
pub struct SensorSession<T: Transport> {
    transport: T,
    config: SensorConfig,
    state: ConnectionState,
    store: Arc<RwLock<CharacteristicStore>>,
    /// Scan results by identifier.
    discovered: HashMap<String, PeripheralInfo>,
    link: Option<ActiveLink>,
    next_link: u64,
    readiness: Option<Readiness>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    event_rx: mpsc::UnboundedReceiver<SessionEvent>,
    /// Events drained during setup, replayed afterwards.
    backlog: VecDeque<SessionEvent>,
    status_tx: broadcast::Sender<StatusEvent>,
    snapshot_tx: broadcast::Sender<CharacteristicSnapshot>,
    callback_counter: Arc<AtomicU64>,
}

impl<T: Transport> SensorSession<T> {
    /// Create an idle session.
    pub fn new(transport: T, config: SensorConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = broadcast::channel(32);
        let (snapshot_tx, _) = broadcast::channel(64);

        Self {
            transport,
            config,
            state: ConnectionState::Idle,
            store: Arc::new(RwLock::new(CharacteristicStore::new())),
            discovered: HashMap::new(),
            link: None,
            next_link: 1,
            readiness: None,
            event_tx,
            event_rx,
            backlog: VecDeque::new(),
            status_tx,
            snapshot_tx,
            callback_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    // === Accessors ===

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The configuration.
    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    /// The transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Readiness of the current connection.
    pub fn readiness(&self) -> Option<&Readiness> {
        self.readiness.as_ref()
    }

    /// Whether the detail view may be shown.
    pub fn detail_available(&self) -> bool {
        self.state == ConnectionState::Ready && self.readiness == Some(Readiness::Full)
    }

    /// The peripheral currently connected.
    pub fn connected_device(&self) -> Option<&PeripheralInfo> {
        self.link.as_ref().map(|l| &l.device)
    }

    /// Shared read access to the characteristic store.
    pub fn store(&self) -> Arc<RwLock<CharacteristicStore>> {
        Arc::clone(&self.store)
    }

    /// Snapshots of every monitored characteristic.
    pub fn snapshots(&self) -> Vec<CharacteristicSnapshot> {
        self.store.read().snapshots()
    }

    /// Latest pitch, roll and yaw.
    pub fn orientation(&self) -> Orientation {
        Orientation::from_store(&self.store.read(), &self.config)
    }

    /// Devices remembered from earlier scans.
    pub fn discovered_devices(&self) -> Vec<PeripheralInfo> {
        let mut devices: Vec<_> = self.discovered.values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Handle for requesting disconnects and toggles from other tasks.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.event_tx.clone(),
        }
    }

    // === Display fan-out ===

    /// Subscribe to status updates.
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to characteristic snapshots.
    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<CharacteristicSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Register a callback for status updates.
    pub fn on_status<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&StatusEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.status_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(status) => callback(&status),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Status callback skipped {} updates", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Register a callback for characteristic snapshots.
    pub fn on_snapshot<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&CharacteristicSnapshot) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.snapshot_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(snapshot) => callback(&snapshot),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Snapshot callback skipped {} updates", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    fn emit(&self, status: StatusEvent) {
        debug!("Status: {}", status);
        let _ = self.status_tx.send(status);
    }

    fn publish(&self, uuid: &Uuid) {
        let snapshot = self.store.read().snapshot(uuid);
        if let Some(snapshot) = snapshot {
            let _ = self.snapshot_tx.send(snapshot);
        }
    }

    fn publish_all(&self) {
        for snapshot in self.store.read().snapshots() {
            let _ = self.snapshot_tx.send(snapshot);
        }
    }

    fn emit_active(&self) {
        let names = self.store.read().active_names();
        self.emit(StatusEvent::ActiveNotifications(names));
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        if self.state != new_state {
            debug!("Connection state changed: {} -> {}", self.state, new_state);
            self.state = new_state;
        }
    }

    // === Scanning ===

    /// Scan for a peripheral advertising the configured service.
    ///
    /// A found device is remembered for [`Self::select_device`]. A scan that
    /// is cancelled or finds nothing returns `Ok(None)` and only emits a
    /// status. An existing connection stays up while scanning.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the configuration is unusable,
    /// [`Error::AdapterUnavailable`] if there is no radio, and
    /// [`Error::InvalidState`] while another operation is in progress.
    pub async fn scan(&mut self) -> Result<Option<PeripheralInfo>> {
        if self.state.is_transitioning() {
            return Err(Error::InvalidState {
                state: self.state.to_string(),
            });
        }

        if let Err(e) = self.config.validate() {
            error!("Cannot scan: {}", e);
            self.emit(StatusEvent::Error(e.to_string()));
            return Err(e);
        }

        let resting = self.state;
        self.set_state(ConnectionState::Scanning);
        self.emit(StatusEvent::Scanning);

        let result = self.transport.scan(self.config.service).await;
        self.set_state(resting);

        match result {
            Ok(device) => {
                info!("Found device {}", device.display_name());
                self.discovered.insert(device.id.clone(), device.clone());
                self.emit(StatusEvent::DeviceFound(device.display_name()));
                Ok(Some(device))
            }
            Err(e) if e.is_benign() => {
                info!("Scan ended without a device: {}", e);
                self.emit(StatusEvent::NoDevice);
                Ok(None)
            }
            Err(e) => {
                error!("Scan failed: {}", e);
                self.emit(StatusEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Scan and connect to the first match.
    ///
    /// Returns `Ok(None)` if the scan found nothing.
    pub async fn scan_and_connect(&mut self) -> Result<Option<PeripheralInfo>> {
        match self.scan().await? {
            Some(device) => {
                self.select_device(&device.id).await?;
                Ok(Some(device))
            }
            None => Ok(None),
        }
    }

    // === Connecting ===

    /// Connect to a device found by a scan and set it up.
    ///
    /// Any existing connection is torn down completely first. Connection
    /// level failures tear down and return to `Idle`; per-characteristic
    /// failures only degrade that characteristic.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceNotFound`] for an unknown identifier,
    /// [`Error::ConnectionFailed`] and discovery errors from the transport,
    /// [`Error::ConnectionLost`] if the link dropped during setup and
    /// [`Error::Cancelled`] if a disconnect was requested during setup.
    pub async fn select_device(&mut self, id: &str) -> Result<()> {
        if self.state.is_transitioning() {
            return Err(Error::InvalidState {
                state: self.state.to_string(),
            });
        }

        let device = self
            .discovered
            .get(id)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound {
                identifier: id.to_string(),
            })?;

        if self.link.is_some() {
            info!("Tearing down current connection before connecting to {}", device.display_name());
            self.teardown().await;
        }

        self.connect_device(device).await
    }

    async fn connect_device(&mut self, device: PeripheralInfo) -> Result<()> {
        let link = LinkId(self.next_link);
        self.next_link += 1;

        self.set_state(ConnectionState::Connecting);
        self.emit(StatusEvent::Connecting(device.display_name()));

        let events = EventSender::new(self.event_tx.clone(), link);
        if let Err(e) = self.transport.connect(&device, events).await {
            error!("Failed to connect to {}: {}", device.display_name(), e);
            self.set_state(ConnectionState::Idle);
            self.emit(StatusEvent::Error(e.to_string()));
            return Err(e);
        }

        info!("Connected to {} on {}", device.display_name(), link);
        self.link = Some(ActiveLink {
            device: device.clone(),
            id: link,
        });
        self.set_state(ConnectionState::Discovering);
        self.emit(StatusEvent::Connected(device.display_name()));

        match self.setup(&device, link).await {
            Ok(readiness) => {
                if let Readiness::Partial { missing } = &readiness {
                    warn!(
                        "Characteristics not found: {}; detail view disabled",
                        missing.join(", ")
                    );
                }
                self.readiness = Some(readiness);
                self.set_state(ConnectionState::Ready);
                self.emit_active();
                self.process_backlog().await;
                Ok(())
            }
            Err(Error::Cancelled) => {
                info!("Setup of {} cancelled", device.display_name());
                self.teardown().await;
                Err(Error::Cancelled)
            }
            Err(e) => {
                error!("Setup of {} failed: {}", device.display_name(), e);
                self.teardown().await;
                self.emit(StatusEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn setup(&mut self, device: &PeripheralInfo, link: LinkId) -> Result<Readiness> {
        let service = self
            .transport
            .get_service(device, self.config.service)
            .await?;
        self.ensure_link(link)?;

        let characteristics = self.transport.list_characteristics(&service).await?;
        self.ensure_link(link)?;

        for c in &characteristics {
            debug!("Characteristic {} [{}]", c.uuid, c.properties);
        }

        let targets = self.config.targets.clone();
        let mut missing = Vec::new();
        {
            let mut store = self.store.write();
            store.clear();
            for target in &targets {
                let handle = characteristics
                    .iter()
                    .find(|c| c.uuid == target.uuid)
                    .cloned();
                if handle.is_none() {
                    missing.push(target.name.clone());
                }
                store.initialize(target.uuid, target.name.clone(), handle);
            }
        }
        self.publish_all();

        if !missing.is_empty() {
            return Ok(Readiness::Partial { missing });
        }

        for target in &targets {
            self.setup_characteristic(&target.uuid, link).await?;
        }

        Ok(Readiness::Full)
    }

    /// Read the descriptor and subscribe. Only link-level problems are errors.
    async fn setup_characteristic(&mut self, uuid: &Uuid, link: LinkId) -> Result<()> {
        let Some((name, handle)) = self.entry_handle(uuid) else {
            return Ok(());
        };

        self.load_descriptor(uuid, &name, &handle).await;
        self.ensure_link(link)?;

        // Record a successful subscribe before checking the link so teardown
        // stops it if setup is abandoned.
        match self.transport.subscribe(&handle).await {
            Ok(()) => {
                debug!("Notifications started for {}", name);
                self.store.write().set_subscribed(uuid, true);
                self.publish(uuid);
            }
            Err(e) => {
                warn!("Failed to start notifications for {}: {}", name, e);
                self.emit(StatusEvent::Error(e.to_string()));
            }
        }

        self.ensure_link(link)
    }

    fn entry_handle(&self, uuid: &Uuid) -> Option<(String, CharacteristicHandle)> {
        let store = self.store.read();
        let entry = store.get(uuid)?;
        entry.handle.clone().map(|h| (entry.name.clone(), h))
    }

    /// Read and record the presentation format. Failures leave the entry
    /// without a descriptor, so its values display as hex.
    async fn load_descriptor(&self, uuid: &Uuid, name: &str, handle: &CharacteristicHandle) {
        let data = match self
            .transport
            .read_descriptor(handle, PRESENTATION_FORMAT_DESCRIPTOR_UUID)
            .await
        {
            Ok(data) => data,
            Err(e) => {
                warn!("Could not read presentation format for {}: {}", name, e);
                return;
            }
        };

        match PresentationFormat::parse(&data, name) {
            Ok(format) => {
                info!("Presentation format for {}:\n{}", name, format);
                self.store.write().record_descriptor(uuid, format);
            }
            Err(e) => warn!("Ignoring presentation format for {}: {}", name, e),
        }
    }

    /// Drain pending events and fail if the link is gone or a disconnect was asked for.
    fn ensure_link(&mut self, link: LinkId) -> Result<()> {
        while let Ok(event) = self.event_rx.try_recv() {
            match event {
                SessionEvent::LinkLost { link: lost } if lost == link => {
                    warn!("Device disconnected during setup");
                    return Err(Error::ConnectionLost);
                }
                SessionEvent::LinkLost { link: lost } => {
                    trace!("Ignoring link loss for stale {}", lost);
                }
                SessionEvent::DisconnectRequested => return Err(Error::Cancelled),
                other => self.backlog.push_back(other),
            }
        }

        match &self.link {
            Some(active) if active.id == link => Ok(()),
            _ => Err(Error::Cancelled),
        }
    }

    // === Subscriptions ===

    /// Enable or disable notifications for one characteristic.
    ///
    /// Enabling a characteristic without a descriptor retries the descriptor
    /// read first. Does not change the lifecycle state.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] when not `Ready`,
    /// [`Error::CharacteristicNotFound`] if the peripheral lacks it, and
    /// [`Error::Subscribe`] if the transport refuses.
    pub async fn set_subscription(&mut self, uuid: &Uuid, enable: bool) -> Result<()> {
        if self.state != ConnectionState::Ready {
            return Err(Error::NotConnected);
        }

        let (name, handle) = self
            .entry_handle(uuid)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })?;

        let (subscribed, has_descriptor) = {
            let store = self.store.read();
            store
                .get(uuid)
                .map(|e| (e.is_subscribed, e.descriptor.is_some()))
                .unwrap_or_default()
        };

        if subscribed == enable {
            return Ok(());
        }

        let result = if enable {
            if !has_descriptor {
                debug!("Re-reading presentation format for {}", name);
                self.load_descriptor(uuid, &name, &handle).await;
            }
            self.transport.subscribe(&handle).await
        } else {
            self.transport.unsubscribe(&handle).await
        };

        if let Err(e) = result {
            warn!("Failed to change notifications for {}: {}", name, e);
            self.emit(StatusEvent::Error(e.to_string()));
            return Err(e);
        }

        info!(
            "Notifications {} for {}",
            if enable { "started" } else { "stopped" },
            name
        );
        self.store.write().set_subscribed(uuid, enable);
        self.publish(uuid);
        self.emit_active();

        Ok(())
    }

    /// Flip the subscription of one characteristic.
    pub async fn toggle_subscription(&mut self, uuid: &Uuid) -> Result<()> {
        let subscribed = self
            .store
            .read()
            .get(uuid)
            .map(|e| e.is_subscribed)
            .unwrap_or(false);
        self.set_subscription(uuid, !subscribed).await
    }

    // === Teardown ===

    /// Disconnect and clear the store.
    ///
    /// Safe to call at any time; without a connection it only reports
    /// "not connected".
    pub async fn disconnect(&mut self) {
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        let Some(active) = self.link.take() else {
            self.store.write().clear();
            self.readiness = None;
            self.set_state(ConnectionState::Idle);
            self.emit(StatusEvent::NotConnected);
            return;
        };

        self.set_state(ConnectionState::Disconnecting);

        let subscribed = self.store.read().subscribed_handles();
        for (uuid, handle) in subscribed {
            match self.transport.unsubscribe(&handle).await {
                Ok(()) => debug!("Notifications stopped for {}", uuid),
                Err(e) => warn!("Failed to stop notifications for {}: {}", uuid, e),
            }
            self.store.write().set_subscribed(&uuid, false);
        }

        if let Err(e) = self.transport.disconnect(&active.device).await {
            warn!("Error disconnecting from {}: {}", active.device.display_name(), e);
        }

        self.store.write().clear();
        self.readiness = None;
        self.backlog.clear();
        self.set_state(ConnectionState::Idle);

        info!("Disconnected from {}", active.device.display_name());
        self.emit(StatusEvent::Disconnected);
    }

    // === Events ===

    /// Wait for the next event from the transport or a [`SessionHandle`].
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }
        self.event_rx.recv().await
    }

    /// Apply one event.
    ///
    /// Events stamped with a link other than the live one are discarded.
    pub async fn process_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Notification {
                link,
                characteristic,
                data,
            } => {
                if !self.is_live(link) {
                    trace!("Discarding notification from stale {}", link);
                    return;
                }
                self.handle_notification(&characteristic, &data);
            }
            SessionEvent::LinkLost { link } => {
                if !self.is_live(link) {
                    trace!("Ignoring link loss for stale {}", link);
                    return;
                }
                warn!("Device disconnected unexpectedly");
                self.teardown().await;
            }
            SessionEvent::DisconnectRequested => self.teardown().await,
            SessionEvent::ToggleRequested { characteristic } => {
                if let Err(e) = self.toggle_subscription(&characteristic).await {
                    debug!("Toggle of {} not applied: {}", characteristic, e);
                }
            }
        }
    }

    /// Apply every event that is already queued. Returns how many were handled.
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = self.process_backlog().await;
        while let Ok(event) = self.event_rx.try_recv() {
            self.process_event(event).await;
            handled += 1;
        }
        handled
    }

    async fn process_backlog(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.backlog.pop_front() {
            self.process_event(event).await;
            handled += 1;
        }
        handled
    }

    fn is_live(&self, link: LinkId) -> bool {
        self.link.as_ref().map(|l| l.id) == Some(link)
    }

    fn handle_notification(&self, uuid: &Uuid, data: &[u8]) {
        let descriptor = match self.store.read().get(uuid) {
            Some(entry) => entry.descriptor.clone(),
            None => {
                trace!("Notification for unmonitored characteristic {}", uuid);
                return;
            }
        };

        let value = decode(descriptor.as_ref(), data);
        let unit = descriptor
            .as_ref()
            .map(|d| d.unit_symbol().to_string())
            .unwrap_or_default();

        trace!("{} -> {}", uuid, value.formatted);

        let updated = self
            .store
            .write()
            .record_value(uuid, value, unit, chrono::Utc::now());
        if updated {
            self.publish(uuid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::fake::{FakeTransport, Interrupt, Script};
    use crate::ble::transport::{CharProperties, MockTransport, ServiceHandle};
    use crate::ble::uuids::*;
    use crate::protocol::{FormattedValue, RawReading};
    use pretty_assertions::assert_eq;

    const PITCH: Uuid = PITCH_CHARACTERISTIC_UUID;
    const ROLL: Uuid = ROLL_CHARACTERISTIC_UUID;
    const HEADING: Uuid = HEADING_CHARACTERISTIC_UUID;

    /// float32, exponent 0, degrees.
    const DEGREES_F32: [u8; 7] = [0x1B, 0x00, 0x63, 0x27, 0x01, 0x00, 0x00];

    fn device(id: &str) -> PeripheralInfo {
        PeripheralInfo::new(id, Some(format!("Nano {}", id)))
    }

    fn full_script(devices: &[&str]) -> Script {
        Script {
            devices: devices.iter().map(|id| device(id)).collect(),
            characteristics: vec![PITCH, ROLL, HEADING],
            descriptors: [PITCH, ROLL, HEADING]
                .into_iter()
                .map(|u| (u, DEGREES_F32.to_vec()))
                .collect(),
            ..Default::default()
        }
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("orientation_sensor_ble=debug"))
            .with_test_writer()
            .try_init();
    }

    fn session(script: Script) -> SensorSession<FakeTransport> {
        init_tracing();
        SensorSession::new(FakeTransport::new(script), SensorConfig::default())
    }

    async fn connected(script: Script) -> SensorSession<FakeTransport> {
        let mut session = session(script);
        let found = session.scan().await.unwrap().unwrap();
        session.select_device(&found.id).await.unwrap();
        session
    }

    fn drain(rx: &mut broadcast::Receiver<StatusEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(status) = rx.try_recv() {
            out.push(status.to_string());
        }
        out
    }

    #[test]
    fn test_status_display() {
        assert_eq!(StatusEvent::Scanning.to_string(), "Scanning");
        assert_eq!(
            StatusEvent::Connected("Nano".to_string()).to_string(),
            "Connected to Nano"
        );
        assert_eq!(StatusEvent::Disconnected.to_string(), "Disconnected");
        assert_eq!(
            StatusEvent::Error("boom".to_string()).to_string(),
            "Error: boom"
        );
        assert_eq!(
            StatusEvent::ActiveNotifications(vec![]).to_string(),
            "No active notifications"
        );
        assert_eq!(
            StatusEvent::ActiveNotifications(vec!["Pitch".to_string(), "Roll".to_string()])
                .to_string(),
            "Active Notifications: Pitch, Roll"
        );
    }

    #[tokio::test]
    async fn test_full_connect_reaches_ready() {
        let mut session = session(full_script(&["A"]));
        let mut status = session.subscribe_status();

        let found = session.scan().await.unwrap().unwrap();
        assert_eq!(found.id, "A");
        assert_eq!(session.state(), ConnectionState::Idle);
        assert_eq!(session.discovered_devices(), vec![device("A")]);

        session.select_device("A").await.unwrap();

        assert_eq!(session.state(), ConnectionState::Ready);
        assert_eq!(session.readiness(), Some(&Readiness::Full));
        assert!(session.detail_available());
        assert_eq!(session.connected_device().map(|d| d.id.as_str()), Some("A"));

        let store = session.store();
        for uuid in [PITCH, ROLL, HEADING] {
            let entry = store.read().get(&uuid).cloned().unwrap();
            assert!(entry.is_subscribed);
            assert!(entry.descriptor.is_some());
        }

        let messages = drain(&mut status);
        assert_eq!(messages[0], "Scanning");
        assert!(messages.contains(&"Connected to Nano A".to_string()));
        assert_eq!(
            messages.last().unwrap(),
            "Active Notifications: Heading, Pitch, Roll"
        );
    }

    #[tokio::test]
    async fn test_setup_order() {
        let session = connected(full_script(&["A"])).await;
        let calls = session.transport().calls();

        assert_eq!(&calls[..4], &["scan", "connect A", "get_service", "list_characteristics"]);
        assert_eq!(
            &calls[4..],
            &[
                format!("read_descriptor {}", PITCH),
                format!("subscribe {}", PITCH),
                format!("read_descriptor {}", ROLL),
                format!("subscribe {}", ROLL),
                format!("read_descriptor {}", HEADING),
                format!("subscribe {}", HEADING),
            ]
        );
    }

    #[tokio::test]
    async fn test_notification_updates_store() {
        let mut session = connected(full_script(&["A"])).await;
        let mut snapshots = session.subscribe_snapshots();

        assert!(session.transport().notify(PITCH, &12.5f32.to_le_bytes()));
        assert!(session.transport().notify(HEADING, &270.0f32.to_le_bytes()));
        assert_eq!(session.process_pending().await, 2);

        let pitch = snapshots.try_recv().unwrap();
        assert_eq!(pitch.name, "Pitch");
        assert_eq!(pitch.formatted_value, FormattedValue::Number(12.5));
        assert_eq!(pitch.unit, "°");
        assert!(pitch.timestamp.is_some());
        assert!(pitch.is_subscribed);

        let orientation = session.orientation();
        assert_eq!(orientation.pitch, Some(12.5));
        assert_eq!(orientation.roll, None);
        assert_eq!(orientation.yaw, Some(-90.0));
    }

    #[tokio::test]
    async fn test_next_event_delivers_queued_notification() {
        let mut session = connected(full_script(&["A"])).await;
        session.transport().notify(ROLL, &(-3.25f32).to_le_bytes());

        let event = session.next_event().await.unwrap();
        session.process_event(event).await;

        let roll = session.store().read().snapshot(&ROLL).unwrap();
        assert_eq!(roll.formatted_value, FormattedValue::Number(-3.25));
    }

    #[tokio::test]
    async fn test_disconnect_twice_is_idempotent() {
        let mut session = connected(full_script(&["A"])).await;
        let mut status = session.subscribe_status();

        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(session.store().read().is_empty());
        assert!(session.readiness().is_none());

        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(session.store().read().is_empty());

        assert_eq!(drain(&mut status), vec!["Disconnected", "Not connected"]);
    }

    #[tokio::test]
    async fn test_disconnect_unsubscribes_before_release() {
        let mut session = connected(full_script(&["A"])).await;
        session.transport().clear_calls();

        session.disconnect().await;

        let calls = session.transport().calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls.last().unwrap(), "disconnect A");
        for uuid in [PITCH, ROLL, HEADING] {
            assert!(calls[..3].contains(&format!("unsubscribe {}", uuid)));
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_failure_does_not_block_teardown() {
        let mut script = full_script(&["A"]);
        script.unsubscribe_failures.insert(PITCH);
        script.disconnect_fails = true;
        let mut session = connected(script).await;
        session.transport().clear_calls();

        session.disconnect().await;

        let calls = session.transport().calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls.last().unwrap(), "disconnect A");
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(session.store().read().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_tears_down_previous_first() {
        let mut session = connected(full_script(&["A", "B"])).await;
        let found = session.scan().await.unwrap().unwrap();
        assert_eq!(found.id, "B");
        // Scanning leaves the existing connection up.
        assert_eq!(session.state(), ConnectionState::Ready);

        session.transport().clear_calls();
        session.select_device("B").await.unwrap();

        let calls = session.transport().calls();
        let connect_b = calls.iter().position(|c| c == "connect B").unwrap();
        let disconnect_a = calls.iter().position(|c| c == "disconnect A").unwrap();
        assert!(disconnect_a < connect_b);

        let unsubscribes = calls[..disconnect_a]
            .iter()
            .filter(|c| c.starts_with("unsubscribe"))
            .count();
        assert_eq!(unsubscribes, 3);

        assert_eq!(session.state(), ConnectionState::Ready);
        assert_eq!(session.connected_device().map(|d| d.id.as_str()), Some("B"));
    }

    #[tokio::test]
    async fn test_stale_link_events_are_discarded() {
        let mut session = connected(full_script(&["A", "B"])).await;
        let old_link = session.transport().link().unwrap();

        session.scan().await.unwrap();
        session.select_device("B").await.unwrap();
        let new_link = session.transport().link().unwrap();
        assert_ne!(old_link, new_link);

        session
            .process_event(SessionEvent::Notification {
                link: old_link,
                characteristic: PITCH,
                data: bytes::Bytes::copy_from_slice(&1.0f32.to_le_bytes()),
            })
            .await;
        session
            .process_event(SessionEvent::LinkLost { link: old_link })
            .await;

        assert_eq!(session.state(), ConnectionState::Ready);
        let pitch = session.store().read().snapshot(&PITCH).unwrap();
        assert_eq!(pitch.raw_value, RawReading::NotAvailable);
    }

    #[tokio::test]
    async fn test_descriptor_failure_is_isolated() {
        let mut script = full_script(&["A"]);
        script.descriptor_failures.insert(ROLL);
        let mut session = connected(script).await;

        assert_eq!(session.state(), ConnectionState::Ready);
        {
            let store = session.store();
            let store = store.read();
            assert!(store.get(&PITCH).unwrap().is_subscribed);
            assert!(store.get(&HEADING).unwrap().is_subscribed);
            assert!(store.get(&ROLL).unwrap().is_subscribed);
            assert!(store.get(&ROLL).unwrap().descriptor.is_none());
        }

        session.transport().notify(ROLL, &[0xDE, 0xAD]);
        session.process_pending().await;

        let roll = session.store().read().snapshot(&ROLL).unwrap();
        assert_eq!(roll.raw_value, RawReading::Hex("dead".to_string()));
        assert_eq!(roll.formatted_value, FormattedValue::NoDescriptor);
    }

    #[tokio::test]
    async fn test_short_descriptor_degrades_to_hex() {
        let mut script = full_script(&["A"]);
        script.descriptors.insert(HEADING, vec![0x1B, 0x00, 0x63, 0x27, 0x01]);
        let session = connected(script).await;

        let store = session.store();
        assert!(store.read().get(&HEADING).unwrap().descriptor.is_none());
        assert!(store.read().get(&HEADING).unwrap().is_subscribed);
    }

    #[tokio::test]
    async fn test_subscribe_failure_leaves_flag_clear() {
        let mut mock = MockTransport::new();
        mock.expect_scan().returning(|_| Ok(device("A")));
        mock.expect_connect().returning(|_, _| Ok(()));
        mock.expect_get_service().returning(|d, uuid| {
            Ok(ServiceHandle {
                device_id: d.id.clone(),
                uuid,
            })
        });
        mock.expect_list_characteristics().returning(|service| {
            Ok([PITCH, ROLL, HEADING]
                .into_iter()
                .map(|uuid| CharacteristicHandle {
                    device_id: service.device_id.clone(),
                    service: service.uuid,
                    uuid,
                    properties: CharProperties::default(),
                })
                .collect())
        });
        mock.expect_read_descriptor()
            .returning(|_, _| Ok(DEGREES_F32.to_vec()));
        mock.expect_subscribe().times(3).returning(|c| {
            if c.uuid == ROLL {
                Err(Error::Subscribe {
                    characteristic: c.uuid.to_string(),
                    reason: "rejected".to_string(),
                })
            } else {
                Ok(())
            }
        });

        let mut session = SensorSession::new(mock, SensorConfig::default());
        let mut status = session.subscribe_status();
        session.scan().await.unwrap();
        session.select_device("A").await.unwrap();

        assert_eq!(session.state(), ConnectionState::Ready);
        let store = session.store();
        assert!(store.read().get(&PITCH).unwrap().is_subscribed);
        assert!(!store.read().get(&ROLL).unwrap().is_subscribed);
        assert!(store.read().get(&HEADING).unwrap().is_subscribed);

        let messages = drain(&mut status);
        assert!(messages.iter().any(|m| m.starts_with("Error: Subscription change failed")));
        assert_eq!(messages.last().unwrap(), "Active Notifications: Heading, Pitch");
    }

    #[tokio::test]
    async fn test_unconfigured_service_blocks_scan() {
        let mut config = SensorConfig::default();
        config.service = Uuid::nil();
        let mut session = SensorSession::new(FakeTransport::new(full_script(&["A"])), config);

        let err = session.scan().await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(session.transport().calls().is_empty());
    }

    #[tokio::test]
    async fn test_scan_without_match_is_benign() {
        let mut session = session(full_script(&[]));
        let mut status = session.subscribe_status();

        assert_eq!(session.scan().await.unwrap(), None);
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(session.discovered_devices().is_empty());
        assert_eq!(
            drain(&mut status),
            vec!["Scanning", "Scan cancelled or no devices found"]
        );
    }

    #[tokio::test]
    async fn test_discovered_devices_accumulate_across_scans() {
        let mut session = session(full_script(&["B", "A"]));

        session.scan().await.unwrap();
        session.scan().await.unwrap();
        // Nothing left to find; earlier results stay selectable.
        assert_eq!(session.scan().await.unwrap(), None);

        assert_eq!(session.discovered_devices(), vec![device("A"), device("B")]);
        session.select_device("B").await.unwrap();
        assert_eq!(session.connected_device().map(|d| d.id.as_str()), Some("B"));
    }

    #[tokio::test]
    async fn test_missing_adapter_fails_scan() {
        let mut script = full_script(&["A"]);
        script.adapter_missing = true;
        let mut session = session(script);

        assert!(matches!(
            session.scan().await,
            Err(Error::AdapterUnavailable)
        ));
        assert_eq!(session.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_unknown_device_rejected() {
        let mut session = session(full_script(&["A"]));
        assert!(matches!(
            session.select_device("nope").await,
            Err(Error::DeviceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_idle() {
        let mut script = full_script(&["A"]);
        script.connect_fails = true;
        let mut session = session(script);
        session.scan().await.unwrap();

        let err = session.select_device("A").await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed { .. }));
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(session.connected_device().is_none());
    }

    #[tokio::test]
    async fn test_discovery_failure_tears_down() {
        let mut script = full_script(&["A"]);
        script.service_missing = true;
        let mut session = session(script);
        session.scan().await.unwrap();

        let err = session.select_device("A").await.unwrap_err();
        assert!(matches!(err, Error::ServiceNotFound { .. }));
        assert_eq!(session.state(), ConnectionState::Idle);
        assert_eq!(session.transport().calls().last().unwrap(), "disconnect A");
        assert!(session.store().read().is_empty());
    }

    #[tokio::test]
    async fn test_partial_readiness() {
        let mut script = full_script(&["A"]);
        script.characteristics = vec![PITCH, ROLL];
        let mut session = connected(script).await;

        assert_eq!(session.state(), ConnectionState::Ready);
        assert_eq!(
            session.readiness(),
            Some(&Readiness::Partial {
                missing: vec!["Heading".to_string()]
            })
        );
        assert!(!session.detail_available());
        assert!(!session
            .transport()
            .calls()
            .iter()
            .any(|c| c.starts_with("subscribe")));

        // Present characteristics can still be enabled by hand.
        session.set_subscription(&PITCH, true).await.unwrap();
        assert!(session.store().read().get(&PITCH).unwrap().is_subscribed);

        assert!(matches!(
            session.set_subscription(&HEADING, true).await,
            Err(Error::CharacteristicNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_toggle_rereads_missing_descriptor() {
        let mut script = full_script(&["A"]);
        script.descriptor_failures.insert(PITCH);
        let mut session = connected(script).await;
        let mut status = session.subscribe_status();

        session.toggle_subscription(&PITCH).await.unwrap();
        assert!(!session.store().read().get(&PITCH).unwrap().is_subscribed);

        session.transport().script.lock().descriptor_failures.clear();
        session.transport().clear_calls();

        session.toggle_subscription(&PITCH).await.unwrap();
        assert_eq!(
            session.transport().calls(),
            vec![
                format!("read_descriptor {}", PITCH),
                format!("subscribe {}", PITCH)
            ]
        );
        let store = session.store();
        assert!(store.read().get(&PITCH).unwrap().is_subscribed);
        assert!(store.read().get(&PITCH).unwrap().descriptor.is_some());
        assert_eq!(session.state(), ConnectionState::Ready);

        assert_eq!(
            drain(&mut status),
            vec![
                "Active Notifications: Heading, Roll",
                "Active Notifications: Heading, Pitch, Roll"
            ]
        );
    }

    #[tokio::test]
    async fn test_toggle_requires_connection() {
        let mut session = session(full_script(&["A"]));
        assert!(matches!(
            session.toggle_subscription(&PITCH).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_toggle_request_through_handle() {
        let mut session = connected(full_script(&["A"])).await;
        assert!(session.handle().request_toggle(ROLL));
        session.process_pending().await;
        assert!(!session.store().read().get(&ROLL).unwrap().is_subscribed);
    }

    #[tokio::test]
    async fn test_link_loss_triggers_teardown() {
        let mut session = connected(full_script(&["A"])).await;
        assert!(session.transport().drop_link());

        session.process_pending().await;

        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(session.store().read().is_empty());
        assert_eq!(session.transport().calls().last().unwrap(), "disconnect A");
    }

    #[tokio::test]
    async fn test_link_loss_during_setup() {
        let mut script = full_script(&["A"]);
        script.descriptor_interrupt = Some((ROLL, Interrupt::LinkLost));
        let (mut session, err) = connected_err(script).await;

        assert!(matches!(err, Error::ConnectionLost));
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(session.store().read().is_empty());
        // Heading setup never ran.
        assert!(!session
            .transport()
            .calls()
            .contains(&format!("read_descriptor {}", HEADING)));

        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_disconnect_request_during_setup() {
        let mut session = session(full_script(&["A"]));
        let handle = session.handle();
        session.transport().script.lock().handle = Some(handle);
        session.transport().script.lock().descriptor_interrupt =
            Some((PITCH, Interrupt::DisconnectRequested));

        session.scan().await.unwrap();
        let err = session.select_device("A").await.unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(session.store().read().is_empty());

        let calls = session.transport().calls();
        assert_eq!(calls.last().unwrap(), "disconnect A");
        assert!(!calls.contains(&format!("subscribe {}", PITCH)));
    }

    #[tokio::test]
    async fn test_disconnect_request_during_subscribe_still_unsubscribes() {
        let mut session = session(full_script(&["A"]));
        let handle = session.handle();
        session.transport().script.lock().handle = Some(handle);
        session.transport().script.lock().subscribe_interrupt =
            Some((PITCH, Interrupt::DisconnectRequested));

        session.scan().await.unwrap();
        let err = session.select_device("A").await.unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(session.state(), ConnectionState::Idle);
        assert!(session.store().read().is_empty());

        // The peripheral accepted the subscribe, so teardown must stop it.
        let calls = session.transport().calls();
        let unsubscribe = calls
            .iter()
            .position(|c| *c == format!("unsubscribe {}", PITCH))
            .expect("subscription left running");
        let disconnect = calls.iter().position(|c| c == "disconnect A").unwrap();
        assert!(unsubscribe < disconnect);
        assert_eq!(calls.last().unwrap(), "disconnect A");
        assert!(!calls.contains(&format!("read_descriptor {}", ROLL)));
    }

    #[tokio::test]
    async fn test_link_lost_during_subscribe_ends_setup() {
        let mut script = full_script(&["A"]);
        script.subscribe_interrupt = Some((ROLL, Interrupt::LinkLost));
        let (session, err) = connected_err(script).await;

        assert!(matches!(err, Error::ConnectionLost));
        assert_eq!(session.state(), ConnectionState::Idle);

        let calls = session.transport().calls();
        assert!(calls.contains(&format!("unsubscribe {}", PITCH)));
        assert!(calls.contains(&format!("unsubscribe {}", ROLL)));
        assert!(!calls.contains(&format!("read_descriptor {}", HEADING)));
        assert_eq!(calls.last().unwrap(), "disconnect A");
    }

    #[tokio::test]
    async fn test_notifications_during_setup_are_replayed() {
        let mut session = session(full_script(&["A"]));
        session.scan().await.unwrap();

        // Queue a notification as if it raced the descriptor reads.
        let link = LinkId(session.next_link);
        session
            .event_tx
            .send(SessionEvent::Notification {
                link,
                characteristic: HEADING,
                data: bytes::Bytes::copy_from_slice(&90.0f32.to_le_bytes()),
            })
            .unwrap();

        session.select_device("A").await.unwrap();

        let heading = session.store().read().snapshot(&HEADING).unwrap();
        assert_eq!(heading.formatted_value, FormattedValue::Number(90.0));
    }

    #[tokio::test]
    async fn test_callbacks_receive_status() {
        let session = session(full_script(&["A"]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = session.on_status(move |status| {
            let _ = tx.send(status.to_string());
        });

        session.emit(StatusEvent::Disconnected);
        assert_eq!(rx.recv().await.unwrap(), "Disconnected");
    }

    async fn connected_err(script: Script) -> (SensorSession<FakeTransport>, Error) {
        let mut session = session(script);
        session.scan().await.unwrap();
        let err = session.select_device("A").await.unwrap_err();
        (session, err)
    }
}
