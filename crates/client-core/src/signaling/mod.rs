//! Signaling peer contract and session supervision
//!
//! The signaling peer is the logical request/response + notification channel to
//! the room server. Its byte framing is a collaborator concern; this module
//! defines the events and primitives the session relies on, the wire protocol
//! ([`protocol`]) and the supervising [`SignalingSession`].

pub mod protocol;
pub mod session;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::error::{ClientError, ClientResult};

pub use protocol::{
    DeviceInfo, JoinResponse, NewConsumer, Notification, PeerInfo, RequestMethod,
};
pub use session::{SignalingHandler, SignalingSession};

/// Lifecycle and traffic events emitted by a signaling peer
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// The underlying transport is open (also emitted after an automatic reconnect)
    Open,
    /// A connection attempt failed
    Failed { reason: String },
    /// The transport dropped; the peer may reconnect on its own
    Disconnected,
    /// The peer is closed for good
    Closed,
    /// Server-pushed notification
    Notification { method: String, data: Value },
}

/// Request primitive of an open signaling peer
#[async_trait]
pub trait SignalingPeer: Send + Sync {
    async fn request(&self, method: &str, data: Value) -> anyhow::Result<Value>;
    fn close(&self);
    fn closed(&self) -> bool;
}

/// A freshly created peer and its event stream
pub struct PeerConnection {
    pub peer: Arc<dyn SignalingPeer>,
    pub events: mpsc::UnboundedReceiver<PeerEvent>,
}

/// Opens signaling peers towards a URL
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> anyhow::Result<PeerConnection>;
}

const MAX_NAME_LEN: usize = 20;
const SUFFIX_LEN: usize = 6;

/// Build a peer id from the display name, the current time and a random suffix.
///
/// Two joiners with the same display name in the same millisecond still get
/// different ids thanks to the suffix.
pub fn generate_peer_id(display_name: &str) -> String {
    let mut name: String = display_name
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .take(MAX_NAME_LEN)
        .collect();
    name = name.trim_matches('_').to_string();
    if name.is_empty() {
        name = "peer".to_string();
    }

    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();

    format!("{}_{}_{}", name, Utc::now().timestamp_millis(), suffix)
}

/// Build the signaling URL for a room, defaulting to `wss://` for bare hosts
pub fn signaling_url(server_address: &str, room_id: &str, peer_id: &str) -> ClientResult<Url> {
    let address = server_address.trim();
    let address = if address.contains("://") {
        address.to_string()
    } else {
        format!("wss://{}", address)
    };

    let mut url = Url::parse(&address).map_err(|e| ClientError::InvalidConfiguration {
        field: "server_address".to_string(),
        reason: format!("{}: {}", server_address, e),
    })?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(ClientError::InvalidConfiguration {
                field: "server_address".to_string(),
                reason: format!("unsupported scheme '{}'", other),
            })
        }
    }

    url.query_pairs_mut()
        .clear()
        .append_pair("roomId", room_id)
        .append_pair("peerId", peer_id);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_is_sanitized() {
        let id = generate_peer_id("  Alice Smith! ");
        assert!(id.starts_with("alice_smith_"), "unexpected id {}", id);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn test_peer_id_falls_back_for_empty_names() {
        assert!(generate_peer_id("").starts_with("peer_"));
        assert!(generate_peer_id("!!!").starts_with("peer_"));
    }

    #[test]
    fn test_same_name_yields_distinct_ids() {
        let a = generate_peer_id("Bob");
        let b = generate_peer_id("Bob");
        assert_ne!(a, b);
    }

    #[test]
    fn test_long_names_are_truncated() {
        let id = generate_peer_id(&"x".repeat(64));
        let name = id.split('_').next().unwrap();
        assert_eq!(name.len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_signaling_url_for_bare_host() {
        let url = signaling_url("media.example.com:4443", "4", "alice_1_abc").unwrap();
        assert_eq!(url.as_str(), "wss://media.example.com:4443/?roomId=4&peerId=alice_1_abc");
    }

    #[test]
    fn test_signaling_url_replaces_existing_query() {
        let url = signaling_url("ws://localhost:3000/?roomId=old", "room 1", "p").unwrap();
        assert_eq!(url.scheme(), "ws");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("roomId".to_string(), "room 1".to_string()),
                ("peerId".to_string(), "p".to_string()),
            ]
        );
    }

    #[test]
    fn test_signaling_url_rejects_http() {
        let err = signaling_url("https://example.com", "4", "p").unwrap_err();
        assert!(matches!(err, ClientError::InvalidConfiguration { .. }));
    }
}
