//! BLE connection management.
//!
//! Defines the session lifecycle states and handles connecting to and
//! watching the link of a single peripheral.

use btleplug::api::{Central, CentralEvent, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral};
use futures::stream::StreamExt;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ble::transport::EventSender;
use crate::error::{Error, Result};

/// Lifecycle state of a sensor session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection and no scan in progress.
    #[default]
    Idle,
    /// Waiting for a matching peripheral.
    Scanning,
    /// Establishing the transport connection.
    Connecting,
    /// Resolving the service and characteristics.
    Discovering,
    /// Connected; notifications flow.
    Ready,
    /// Tearing the connection down.
    Disconnecting,
}

impl ConnectionState {
    /// Check if a transport connection is live.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Discovering | Self::Ready)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Scanning | Self::Connecting | Self::Discovering | Self::Disconnecting
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Scanning => write!(f, "Scanning"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Discovering => write!(f, "Discovering"),
            Self::Ready => write!(f, "Ready"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// How often and how patiently a connect is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Maximum connection attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay between attempts.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(500))
    }
}

/// Manages the connection to one peripheral.
pub struct ConnectionManager {
    /// The peripheral to manage.
    peripheral: Peripheral,
    /// Adapter used to watch for disconnect events.
    adapter: Adapter,
    /// Task reporting unexpected disconnects.
    watcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
    retry: RetryPolicy,
}

impl ConnectionManager {
    /// Create a new connection manager for a peripheral.
    pub fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        Self {
            peripheral,
            adapter,
            watcher: Mutex::new(None),
            retry: RetryPolicy::default(),
        }
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Connect and start watching for unexpected disconnects.
    ///
    /// Link loss is reported through `events`.
    pub async fn connect(&self, events: &EventSender) -> Result<()> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            info!("Peripheral already connected at BLE level");
        } else {
            self.connect_with_retries().await?;
        }

        self.start_watcher(events.clone()).await?;
        Ok(())
    }

    async fn connect_with_retries(&self) -> Result<()> {
        let mut attempts = 0;
        let mut last_error = String::new();

        let max_attempts = self.retry.max_attempts();

        while attempts < max_attempts {
            attempts += 1;

            debug!("Connection attempt {} of {}", attempts, max_attempts);

            match self.peripheral.connect().await {
                Ok(_) => {
                    info!("Successfully connected to {:?}", self.peripheral.id());
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connection attempt {} failed: {}", attempts, e);
                    last_error = e.to_string();

                    if attempts < max_attempts {
                        tokio::time::sleep(self.retry.delay()).await;
                    }
                }
            }
        }

        Err(Error::ConnectionFailed {
            reason: format!(
                "Failed after {} attempts: {}",
                max_attempts, last_error
            ),
        })
    }

    async fn start_watcher(&self, events: EventSender) -> Result<()> {
        let mut central_events = self.adapter.events().await?;
        let id = self.peripheral.id();

        let handle = tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                if let CentralEvent::DeviceDisconnected(disconnected) = event {
                    if disconnected == id {
                        info!("Peripheral {:?} disconnected", id);
                        events.link_lost();
                        break;
                    }
                }
            }

            debug!("Disconnect watcher for {:?} ended", id);
        });

        if let Some(previous) = self.watcher.lock().replace(handle) {
            previous.abort();
        }

        Ok(())
    }

    /// Disconnect from the peripheral.
    ///
    /// The watcher is stopped first so a requested disconnect is not
    /// reported as link loss.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }

        if !self.peripheral.is_connected().await.unwrap_or(true) {
            debug!("Peripheral already disconnected");
            return Ok(());
        }

        self.peripheral.disconnect().await?;
        info!("Successfully disconnected from {:?}", self.peripheral.id());
        Ok(())
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
    }
}
