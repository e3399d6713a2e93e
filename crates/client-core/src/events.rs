//! Event handling for client-core operations
//!
//! Every state change is broadcast as a [`ClientEvent`]. State values that
//! rendering reads continuously (connection status, participants, consumers,
//! local stream, active speaker, last error) are additionally published as
//! `watch` snapshots by their owning component.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};

use crate::client::types::{ActiveSpeaker, ConnectionStatus, ConsumerInfo, Participant, ProducerState};
use crate::engine::{MediaKind, MediaTrack};
use crate::error::ClientError;

/// Event priority levels for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    /// Routine updates (active speaker)
    Low,
    /// Participant, producer and consumer changes
    Normal,
    /// Connection state changes and errors
    High,
    /// Failures of the signaling connection
    Critical,
}

/// Comprehensive client event types
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Signaling connection status changed
    ConnectionStateChanged {
        previous: ConnectionStatus,
        current: ConnectionStatus,
        timestamp: DateTime<Utc>,
    },
    /// A remote participant appeared
    ParticipantJoined {
        participant: Participant,
        timestamp: DateTime<Utc>,
    },
    /// A remote participant left
    ParticipantLeft {
        peer_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A consumer is materialized and its track can be rendered
    ConsumerReady {
        consumer: ConsumerInfo,
        track: Arc<dyn MediaTrack>,
        timestamp: DateTime<Utc>,
    },
    /// A consumer was removed
    ConsumerClosed {
        consumer_id: String,
        peer_id: String,
        timestamp: DateTime<Utc>,
    },
    /// The server paused or resumed a consumer
    ConsumerPauseChanged {
        consumer_id: String,
        paused: bool,
        timestamp: DateTime<Utc>,
    },
    /// A local producer was created, paused, resumed or dropped
    ProducerStateChanged {
        kind: MediaKind,
        state: ProducerState,
        timestamp: DateTime<Utc>,
    },
    /// The loudest participant changed
    ActiveSpeakerChanged {
        speaker: Option<ActiveSpeaker>,
        timestamp: DateTime<Utc>,
    },
    /// Client error occurred
    Error {
        error: ClientError,
        context: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl ClientEvent {
    /// Get the priority of this event
    pub fn priority(&self) -> EventPriority {
        match self {
            ClientEvent::Error { error, .. } if error.is_connection_error() => EventPriority::Critical,
            ClientEvent::Error { .. } | ClientEvent::ConnectionStateChanged { .. } => EventPriority::High,
            ClientEvent::ActiveSpeakerChanged { .. } => EventPriority::Low,
            _ => EventPriority::Normal,
        }
    }

    /// Get the peer the event relates to (if any)
    pub fn peer_id(&self) -> Option<&str> {
        match self {
            ClientEvent::ParticipantJoined { participant, .. } => Some(participant.id.as_str()),
            ClientEvent::ParticipantLeft { peer_id, .. } | ClientEvent::ConsumerClosed { peer_id, .. } => {
                Some(peer_id.as_str())
            }
            ClientEvent::ConsumerReady { consumer, .. } => Some(consumer.peer_id.as_str()),
            ClientEvent::ActiveSpeakerChanged { speaker, .. } => speaker.as_ref().map(|s| s.peer_id.as_str()),
            _ => None,
        }
    }
}

/// Broadcasts events and owns the observable last-error field
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<ClientEvent>,
    last_error: Arc<watch::Sender<Option<ClientError>>>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let (last_error, _) = watch::channel(None);
        Self {
            tx,
            last_error: Arc::new(last_error),
        }
    }

    /// Send an event; having no subscribers is fine
    pub fn emit(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }

    /// Record `error` as the session's last error and broadcast it
    pub fn report_error(&self, error: ClientError, context: Option<&str>) {
        self.last_error.send_replace(Some(error.clone()));
        self.emit(ClientEvent::Error {
            error,
            context: context.map(str::to_string),
            timestamp: Utc::now(),
        });
    }

    pub fn clear_error(&self) {
        self.last_error.send_replace(None);
    }

    pub fn last_error(&self) -> Option<ClientError> {
        self.last_error.borrow().clone()
    }

    pub fn subscribe_last_error(&self) -> watch::Receiver<Option<ClientError>> {
        self.last_error.subscribe()
    }
}
