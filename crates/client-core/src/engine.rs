//! Media-transport engine and media device contracts
//!
//! The engine (device capability loading, transports, producers, consumers) and
//! local hardware access are external collaborators. This module only fixes
//! the interface the session state machine relies on.
//!
//! Transport callbacks follow accept/reject semantics: the engine invokes the
//! registered handler and treats `Ok` as accept and `Err` as reject.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::config::MediaConstraints;

/// Kind of a media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a media transport from this endpoint's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Recv,
}

impl fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportDirection::Send => f.write_str("send"),
            TransportDirection::Recv => f.write_str("recv"),
        }
    }
}

/// Server-issued parameters of a freshly created transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    pub id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
    #[serde(default)]
    pub sctp_parameters: Option<Value>,
}

/// What the engine hands to the produce callback
#[derive(Debug, Clone)]
pub struct ProduceParameters {
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    pub app_data: Value,
}

/// Options for producing a local track over the send transport
#[derive(Debug, Clone)]
pub struct ProduceOptions {
    pub track: Arc<dyn MediaTrack>,
    pub codec_options: Value,
    pub app_data: Value,
}

/// Options for materializing a server-announced consumer
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeOptions {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    pub app_data: Value,
}

/// Why a producer or consumer went away without being closed by us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    TrackEnded,
    TransportClosed,
}

/// Handler for the transport "connect" event, receives the DTLS parameters
pub type ConnectHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Handler for the send transport "produce" event, resolves with the producer id
pub type ProduceHandler =
    Arc<dyn Fn(ProduceParameters) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync>;

/// Handler for track-ended / transport-closed events
pub type CloseHandler = Box<dyn Fn(CloseReason) + Send + Sync>;

/// A single local or remote media track
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> String;
    fn kind(&self) -> MediaKind;
    /// Release the underlying source
    fn stop(&self);
    fn is_live(&self) -> bool;
}

/// A set of tracks, at most one per kind
#[derive(Debug, Clone, Default)]
pub struct MediaStream {
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        let mut stream = Self::default();
        for track in tracks {
            stream.insert(track);
        }
        stream
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn track(&self, kind: MediaKind) -> Option<Arc<dyn MediaTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Insert a track, replacing any previous track of the same kind
    pub fn insert(&mut self, track: Arc<dyn MediaTrack>) {
        self.tracks.retain(|t| t.kind() != track.kind());
        self.tracks.push(track);
    }

    pub fn remove(&mut self, kind: MediaKind) -> Option<Arc<dyn MediaTrack>> {
        let index = self.tracks.iter().position(|t| t.kind() == kind)?;
        Some(self.tracks.remove(index))
    }

    /// Copy of `self` with every track of `other` merged in
    pub fn merged(&self, other: &MediaStream) -> MediaStream {
        let mut merged = self.clone();
        for track in other.tracks() {
            merged.insert(track.clone());
        }
        merged
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Local outbound media source announced to the server
pub trait Producer: Send + Sync + fmt::Debug {
    fn id(&self) -> String;
    fn kind(&self) -> MediaKind;
    fn paused(&self) -> bool;
    fn pause(&self);
    fn resume(&self);
    fn close(&self);
    fn closed(&self) -> bool;
    fn on_close(&self, handler: CloseHandler);
}

/// Locally materialized handle to a remote participant's track
pub trait Consumer: Send + Sync + fmt::Debug {
    fn id(&self) -> String;
    fn producer_id(&self) -> String;
    fn kind(&self) -> MediaKind;
    fn track(&self) -> Arc<dyn MediaTrack>;
    fn paused(&self) -> bool;
    fn pause(&self);
    fn resume(&self);
    fn close(&self);
    fn closed(&self) -> bool;
    fn on_close(&self, handler: CloseHandler);
}

/// One negotiated media channel towards the server-side router
#[async_trait]
pub trait MediaTransport: Send + Sync + fmt::Debug {
    fn id(&self) -> String;
    fn direction(&self) -> TransportDirection;
    fn on_connect(&self, handler: ConnectHandler);
    fn on_produce(&self, handler: ProduceHandler);
    async fn produce(&self, options: ProduceOptions) -> anyhow::Result<Arc<dyn Producer>>;
    async fn consume(&self, options: ConsumeOptions) -> anyhow::Result<Arc<dyn Consumer>>;
    fn close(&self);
    fn closed(&self) -> bool;
}

/// The media engine's device: capability loading and transport factory
#[async_trait]
pub trait MediaEngine: Send + Sync {
    fn loaded(&self) -> bool;
    async fn load(&self, router_rtp_capabilities: Value) -> anyhow::Result<()>;
    fn rtp_capabilities(&self) -> anyhow::Result<Value>;
    fn sctp_capabilities(&self) -> anyhow::Result<Value>;
    fn create_send_transport(&self, options: TransportOptions) -> anyhow::Result<Arc<dyn MediaTransport>>;
    fn create_recv_transport(&self, options: TransportOptions) -> anyhow::Result<Arc<dyn MediaTransport>>;
}

/// Local camera / microphone access
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, constraints: &MediaConstraints) -> anyhow::Result<MediaStream>;
}
