//! High-level room client
//!
//! This module provides the session object applications drive.
//!
//! # Architecture Overview
//!
//! - **`manager`** - [`RoomClient`]: join/leave lifecycle, notification routing
//!   and snapshot accessors
//! - **`controls`** - local media controls (start, pause, resume, close, toggles)
//! - **`builder`** - [`RoomClientBuilder`], fluent construction
//! - **`config`** - [`RoomConfig`] and capture constraints
//! - **`recovery`** - retry with exponential backoff
//! - **`types`** - snapshot types published to observers
//!
//! # Usage Guide
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use mediaroom_client_core::{ClientEvent, MediaKind, RoomClient};
//! # async fn example(client: Arc<RoomClient>) -> Result<(), Box<dyn std::error::Error>> {
//! // 1. Subscribe before joining so nothing is missed
//! let mut events = client.subscribe_events();
//! let mut participants = client.subscribe_participants();
//!
//! // 2. Join the room and publish camera and microphone
//! client.join().await?;
//! client.start_producing(true, true).await?;
//!
//! // 3. Render remote media as it arrives
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             ClientEvent::ConsumerReady { consumer, track, .. } => {
//!                 println!("{} track {} from {}", consumer.kind, track.id(), consumer.peer_id);
//!             }
//!             ClientEvent::Error { error, context, .. } => {
//!                 eprintln!("{:?}: {}", context, error);
//!             }
//!             _ => {}
//!         }
//!     }
//! });
//!
//! // 4. Follow the participant list
//! participants.changed().await?;
//! println!("{} participants", participants.borrow().len());
//!
//! // 5. Mute, then leave
//! client.pause_producer(MediaKind::Audio).await?;
//! client.leave().await;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod controls;
pub mod manager;
pub mod recovery;
pub mod types;

pub use builder::RoomClientBuilder;
pub use config::{AudioConstraints, MediaConstraints, RoomConfig, VideoConstraints};
pub use manager::RoomClient;

// Re-export all types from types.rs
pub use types::{
    ActiveSpeaker, ConnectionStatus, ConsumerInfo, LocalMediaState, Participant, ProducerState, RoomStats,
    TransportInfo, LOCAL_PARTICIPANT_ID,
};

// Re-export recovery utilities
pub use recovery::{retry_with_backoff, RetryConfig};
