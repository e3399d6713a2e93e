//! Room client builder
//!
//! Fluent construction of a [`RoomClient`]: room settings plus the three
//! collaborators the session drives (signaling connector, media engine and
//! media devices).
//!
//! # Examples
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use mediaroom_client_core::{MediaDevices, MediaEngine, RoomClientBuilder, SignalingConnector};
//! # async fn example(
//! #     connector: Arc<dyn SignalingConnector>,
//! #     engine: Arc<dyn MediaEngine>,
//! #     devices: Arc<dyn MediaDevices>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let client = RoomClientBuilder::new()
//!     .server_address("media.example.com:4443")
//!     .room_id("4")
//!     .display_name("Alice")
//!     .signaling_connector(connector)
//!     .media_engine(engine)
//!     .media_devices(devices)
//!     .build()
//!     .await?;
//!
//! client.join().await?;
//! client.start_producing(true, true).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use super::config::{MediaConstraints, RoomConfig};
use super::manager::RoomClient;
use super::recovery::RetryConfig;
use crate::engine::{MediaDevices, MediaEngine};
use crate::error::{ClientError, ClientResult};
use crate::signaling::{DeviceInfo, SignalingConnector};

/// Fluent builder for [`RoomClient`]
///
/// Defaults come from [`RoomConfig::new`]; server address, room id, display
/// name and all three collaborators must be provided before
/// [`build`](Self::build).
#[derive(Default)]
pub struct RoomClientBuilder {
    config: RoomConfig,
    connector: Option<Arc<dyn SignalingConnector>>,
    engine: Option<Arc<dyn MediaEngine>>,
    devices: Option<Arc<dyn MediaDevices>>,
}

impl RoomClientBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn config(mut self, config: RoomConfig) -> Self {
        self.config = config;
        self
    }

    /// Signaling server address; a bare `host:port` is reached over `wss://`
    pub fn server_address(mut self, address: impl Into<String>) -> Self {
        self.config.server_address = address.into();
        self
    }

    pub fn room_id(mut self, room_id: impl Into<String>) -> Self {
        self.config.room_id = room_id.into();
        self
    }

    /// Name shown to other participants; also the base of the generated peer id
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.config.display_name = name.into();
        self
    }

    pub fn device(mut self, device: DeviceInfo) -> Self {
        self.config.device = device;
        self
    }

    pub fn force_tcp(mut self, force_tcp: bool) -> Self {
        self.config.force_tcp = force_tcp;
        self
    }

    /// How long to wait for the signaling peer to open (default 10 s)
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.config.open_timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn media_constraints(mut self, media: MediaConstraints) -> Self {
        self.config.media = media;
        self
    }

    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.event_channel_capacity = capacity;
        self
    }

    pub fn signaling_connector(mut self, connector: Arc<dyn SignalingConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn media_engine(mut self, engine: Arc<dyn MediaEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn media_devices(mut self, devices: Arc<dyn MediaDevices>) -> Self {
        self.devices = Some(devices);
        self
    }

    /// Validate the configuration and create the client
    pub async fn build(self) -> ClientResult<Arc<RoomClient>> {
        let connector = self.connector.ok_or_else(|| missing("signaling_connector"))?;
        let engine = self.engine.ok_or_else(|| missing("media_engine"))?;
        let devices = self.devices.ok_or_else(|| missing("media_devices"))?;
        RoomClient::new(self.config, connector, engine, devices).await
    }
}

fn missing(field: &str) -> ClientError {
    ClientError::MissingConfiguration {
        field: field.to_string(),
    }
}
