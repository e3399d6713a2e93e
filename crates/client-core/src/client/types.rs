//! Type definitions for the client-core library
//!
//! Snapshot types published to observers. Every value here is immutable once
//! handed out; owners build a fresh snapshot on each mutation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{MediaKind, TransportDirection};
use crate::signaling::DeviceInfo;

/// Identifier of the local participant in participant snapshots
pub const LOCAL_PARTICIPANT_ID: &str = "local";

// ===== SESSION TYPES =====

/// Status of the signaling connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }

    /// A join is in progress or established
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionStatus::Connecting | ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ===== PARTICIPANT TYPES =====

/// A participant of the room, local or remote
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub device: Option<DeviceInfo>,
    pub is_local: bool,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn remote(id: impl Into<String>, display_name: impl Into<String>, device: Option<DeviceInfo>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            device,
            is_local: false,
            audio_enabled: false,
            video_enabled: false,
            joined_at: Utc::now(),
        }
    }

    pub fn media_enabled(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio_enabled,
            MediaKind::Video => self.video_enabled,
        }
    }

    pub(crate) fn set_media_enabled(&mut self, kind: MediaKind, enabled: bool) {
        match kind {
            MediaKind::Audio => self.audio_enabled = enabled,
            MediaKind::Video => self.video_enabled = enabled,
        }
    }
}

/// Loudest participant as last reported by the server
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveSpeaker {
    pub peer_id: String,
    pub volume: f64,
}

// ===== MEDIA TYPES =====

/// Rendering-facing view of a consumer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumerInfo {
    pub id: String,
    pub peer_id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    /// Paused locally (server `consumerPaused`)
    pub paused: bool,
    /// The remote producer was paused when the consumer was announced
    pub producer_paused: bool,
    /// Consumer type reported by the server (simple, simulcast, svc, pipe)
    pub consumer_type: String,
    pub created_at: DateTime<Utc>,
}

/// State of one local producer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ProducerState {
    #[default]
    Absent,
    Active,
    Paused,
}

/// Derived local media flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LocalMediaState {
    pub audio: ProducerState,
    pub video: ProducerState,
}

impl LocalMediaState {
    pub fn is_audio_enabled(&self) -> bool {
        self.audio == ProducerState::Active
    }

    pub fn is_video_enabled(&self) -> bool {
        self.video == ProducerState::Active
    }

    pub fn is_producing(&self) -> bool {
        self.audio != ProducerState::Absent || self.video != ProducerState::Absent
    }

    pub fn state(&self, kind: MediaKind) -> ProducerState {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
        }
    }
}

// ===== TRANSPORT AND STATISTICS TYPES =====

/// Snapshot of one media transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportInfo {
    pub id: String,
    pub direction: TransportDirection,
    /// `connectWebRtcTransport` succeeded
    pub connected: bool,
    /// Connect/produce callbacks waiting for the server
    pub pending_callbacks: usize,
    pub closed: bool,
}

/// Statistics about the room session
#[derive(Debug, Clone, Serialize)]
pub struct RoomStats {
    pub status: ConnectionStatus,
    pub local_peer_id: Option<String>,
    pub remote_participants: usize,
    pub consumers: usize,
    pub producers: usize,
    pub send_transport: Option<TransportInfo>,
    pub recv_transport: Option<TransportInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_media_state_derivations() {
        let state = LocalMediaState {
            audio: ProducerState::Paused,
            video: ProducerState::Active,
        };
        assert!(!state.is_audio_enabled());
        assert!(state.is_video_enabled());
        assert!(state.is_producing());
        assert!(!LocalMediaState::default().is_producing());
    }

    #[test]
    fn test_connection_status_display() {
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Disconnected);
        assert_eq!(ConnectionStatus::Failed.to_string(), "failed");
        assert!(ConnectionStatus::Connecting.is_active());
        assert!(!ConnectionStatus::Failed.is_active());
    }

    #[test]
    fn test_participant_media_flags() {
        let mut p = Participant::remote("bob", "Bob", None);
        assert!(!p.media_enabled(MediaKind::Video));
        p.set_media_enabled(MediaKind::Video, true);
        assert!(p.video_enabled);
        assert!(!p.audio_enabled);
    }
}
