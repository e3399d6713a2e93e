use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::recovery::RetryConfig;
use crate::error::{ClientError, ClientResult};
use crate::signaling::DeviceInfo;

/// Camera capture targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_rate: 30,
        }
    }
}

/// Microphone processing options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub channel_count: u8,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            channel_count: 1,
        }
    }
}

/// Constraints passed to the media devices; `None` means the kind is not requested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub video: Option<VideoConstraints>,
    pub audio: Option<AudioConstraints>,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: Some(VideoConstraints::default()),
            audio: Some(AudioConstraints::default()),
        }
    }
}

impl MediaConstraints {
    /// Keep only the requested kinds
    pub fn select(&self, video: bool, audio: bool) -> Self {
        Self {
            video: if video { self.video.clone().or_else(|| Some(VideoConstraints::default())) } else { None },
            audio: if audio { self.audio.clone().or_else(|| Some(AudioConstraints::default())) } else { None },
        }
    }
}

/// Configuration for a room client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Signaling server, e.g. `wss://media.example.com:4443`
    pub server_address: String,
    pub room_id: String,
    pub display_name: String,
    /// Device descriptor announced in `join`
    pub device: DeviceInfo,
    /// Ask the server for TCP-only ICE candidates
    pub force_tcp: bool,
    /// How long to wait for the signaling peer to open
    pub open_timeout: Duration,
    /// Connection retry policy
    pub retry: RetryConfig,
    /// Local capture constraints
    pub media: MediaConstraints,
    /// Capacity of the event broadcast channel
    pub event_channel_capacity: usize,
}

impl RoomConfig {
    /// Create a new room configuration with defaults
    pub fn new() -> Self {
        Self {
            server_address: String::new(),
            room_id: String::new(),
            display_name: String::new(),
            device: DeviceInfo::default(),
            force_tcp: false,
            open_timeout: Duration::from_secs(10),
            retry: RetryConfig::connect(),
            media: MediaConstraints::default(),
            event_channel_capacity: 256,
        }
    }

    pub fn with_server_address(mut self, server_address: impl Into<String>) -> Self {
        self.server_address = server_address.into();
        self
    }

    pub fn with_room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = room_id.into();
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_device(mut self, device: DeviceInfo) -> Self {
        self.device = device;
        self
    }

    pub fn with_force_tcp(mut self, force_tcp: bool) -> Self {
        self.force_tcp = force_tcp;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_media(mut self, media: MediaConstraints) -> Self {
        self.media = media;
        self
    }

    /// Check that everything needed to join is present
    pub fn validate(&self) -> ClientResult<()> {
        for (field, value) in [
            ("server_address", &self.server_address),
            ("room_id", &self.room_id),
            ("display_name", &self.display_name),
        ] {
            if value.trim().is_empty() {
                return Err(ClientError::MissingConfiguration {
                    field: field.to_string(),
                });
            }
        }

        if self.open_timeout.is_zero() {
            return Err(ClientError::InvalidConfiguration {
                field: "open_timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(ClientError::InvalidConfiguration {
                field: "retry.max_attempts".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }

        if let Some(video) = &self.media.video {
            if video.width == 0 || video.height == 0 || video.frame_rate == 0 {
                return Err(ClientError::InvalidConfiguration {
                    field: "media.video".to_string(),
                    reason: format!("{}x{}@{} is not a valid capture size", video.width, video.height, video.frame_rate),
                });
            }
        }

        Ok(())
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self::new()
    }
}
