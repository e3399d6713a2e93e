//! Client-core: room session coordination layer
//!
//! This crate is the client half of a group media session. It joins a room over
//! a signaling peer, negotiates capabilities with the media engine, creates the
//! send and receive transports, publishes local audio/video and materializes the
//! media of remote participants as the server announces them.
//!
//! ## Layering
//! ```text
//! RoomClient -> SignalingSession  -> SignalingPeer (collaborator)
//!            -> CapabilityNegotiator
//!            -> TransportManager  -> MediaEngine / MediaTransport (collaborator)
//!            -> MediaProductionManager -> MediaDevices (collaborator)
//!            -> RemoteSessionState
//! ```
//!
//! Client-core focuses on:
//! - The join / reconnect / leave lifecycle
//! - Notification dispatch into a consistent view of the room
//! - Producer and consumer bookkeeping
//! - Publishing immutable snapshots for rendering
//!
//! Wire framing, ICE/DTLS/RTP and on-screen rendering belong to the
//! collaborators described in [`engine`] and [`signaling`].

pub mod capabilities;
pub mod client;
pub mod engine;
pub mod error;
pub mod events;
pub mod production;
pub mod remote;
pub mod signaling;
pub mod transport;

// Public API exports
pub use capabilities::{CapabilityNegotiator, NegotiatedCapabilities};
pub use client::{
    ActiveSpeaker, ConnectionStatus, ConsumerInfo, LocalMediaState, Participant, ProducerState,
    RetryConfig, RoomClient, RoomClientBuilder, RoomConfig, RoomStats, TransportInfo,
};
pub use engine::{
    MediaDevices, MediaEngine, MediaKind, MediaStream, MediaTrack, MediaTransport,
    TransportDirection,
};
pub use error::{ClientError, ClientResult};
pub use events::{ClientEvent, EventPriority};
pub use production::MediaProductionManager;
pub use remote::RemoteSessionState;
pub use signaling::{
    PeerEvent, RequestMethod, SignalingConnector, SignalingPeer, SignalingSession,
};
pub use transport::TransportManager;

/// Client-core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
