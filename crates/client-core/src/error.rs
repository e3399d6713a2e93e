//! Error types and handling for the client-core library
//!
//! This module defines all error types that can occur while joining and
//! running a room session, and provides guidance on how to handle them.
//!
//! # Error Categories
//!
//! - **Connection Errors** - Signaling open failures and timeouts, retried by
//!   the join loop before they become fatal
//! - **Capability Errors** - The media engine rejected the router capabilities,
//!   fatal for the join attempt
//! - **Transport Errors** - Send/receive transport creation failed, fatal for
//!   the join attempt
//! - **Hardware Errors** - Camera/microphone unavailable or denied, surfaced to
//!   the caller who may retry manually
//! - **Signaling Errors** - Any other request rejected by the server; the
//!   operation is treated as not applied
//!
//! # Basic Pattern
//!
//! ```rust,no_run
//! # use mediaroom_client_core::{RoomClient, ClientError};
//! # use std::sync::Arc;
//! # async fn example(client: Arc<RoomClient>) {
//! match client.join().await {
//!     Ok(()) => println!("Joined as {:?}", client.local_peer_id().await),
//!     Err(ClientError::ConnectionRetriesExhausted { attempts, last_error }) => {
//!         eprintln!("Server unreachable after {} attempts: {}", attempts, last_error);
//!     }
//!     Err(e) => eprintln!("Join failed ({}): {}", e.category(), e),
//! }
//! # }
//! ```

use thiserror::Error;

use crate::engine::{MediaKind, TransportDirection};

/// Result type alias for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Comprehensive error types for room client operations
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Signaling connection errors
    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Connection timeout: signaling peer did not open within {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },

    #[error("Connection failed after {attempts} attempts: {last_error}")]
    ConnectionRetriesExhausted {
        attempts: u32,
        last_error: Box<ClientError>,
    },

    #[error("Not connected to signaling server")]
    NotConnected,

    /// Capability negotiation errors
    #[error("Capability negotiation failed: {reason}")]
    CapabilityError { reason: String },

    #[error("Media capabilities not loaded")]
    CapabilitiesNotLoaded,

    /// Transport errors
    #[error("Failed to create {direction} transport: {reason}")]
    TransportCreationFailed {
        direction: TransportDirection,
        reason: String,
    },

    #[error("{direction} transport not available")]
    TransportNotReady { direction: TransportDirection },

    /// Local media errors
    #[error("Media device access failed: {reason}")]
    HardwareAccessError { reason: String },

    #[error("Failed to produce {kind}: {reason}")]
    ProduceFailed { kind: MediaKind, reason: String },

    /// Signaling request errors
    #[error("Signaling request '{method}' failed: {reason}")]
    SignalingRequestFailed { method: String, reason: String },

    /// Notification handling errors
    #[error("Invalid '{method}' notification: {reason}")]
    InvalidNotification { method: String, reason: String },

    #[error("Failed to create consumer {consumer_id}: {reason}")]
    ConsumerCreationFailed { consumer_id: String, reason: String },

    /// Configuration errors
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Missing required configuration: {field}")]
    MissingConfiguration { field: String },

    /// State errors
    #[error("Invalid session state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// `leave` was called before a pending join finished
    #[error("Join cancelled by leave")]
    JoinCancelled,

    /// Generic errors
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl ClientError {
    /// Create a connection failed error
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed { reason: reason.into() }
    }

    /// Create a capability error
    pub fn capability_error(reason: impl Into<String>) -> Self {
        Self::CapabilityError { reason: reason.into() }
    }

    /// Create a hardware access error
    pub fn hardware_access(reason: impl Into<String>) -> Self {
        Self::HardwareAccessError { reason: reason.into() }
    }

    /// Create a signaling request error
    pub fn signaling_request(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SignalingRequestFailed {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid notification error
    pub fn invalid_notification(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNotification {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal_error(reason: impl Into<String>) -> Self {
        Self::InternalError { message: reason.into() }
    }

    /// Check if this error is worth another connection attempt
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClientError::ConnectionFailed { .. } | ClientError::ConnectionTimeout { .. } => true,

            // Capability and configuration problems will not fix themselves
            ClientError::CapabilityError { .. }
            | ClientError::CapabilitiesNotLoaded
            | ClientError::InvalidConfiguration { .. }
            | ClientError::MissingConfiguration { .. }
            | ClientError::ConnectionRetriesExhausted { .. } => false,

            _ => false,
        }
    }

    /// Check if the error originated from the signaling connection itself
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectionFailed { .. }
                | ClientError::ConnectionTimeout { .. }
                | ClientError::ConnectionRetriesExhausted { .. }
                | ClientError::NotConnected
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::ConnectionFailed { .. }
            | ClientError::ConnectionTimeout { .. }
            | ClientError::ConnectionRetriesExhausted { .. }
            | ClientError::NotConnected => "connection",

            ClientError::CapabilityError { .. } | ClientError::CapabilitiesNotLoaded => "capability",

            ClientError::TransportCreationFailed { .. } | ClientError::TransportNotReady { .. } => {
                "transport"
            }

            ClientError::HardwareAccessError { .. } | ClientError::ProduceFailed { .. } => {
                "hardware"
            }

            ClientError::SignalingRequestFailed { .. } => "signaling",

            ClientError::InvalidNotification { .. } | ClientError::ConsumerCreationFailed { .. } => {
                "notification"
            }

            ClientError::InvalidConfiguration { .. } | ClientError::MissingConfiguration { .. } => {
                "configuration"
            }

            ClientError::InvalidState { .. } | ClientError::JoinCancelled => "state",

            ClientError::InternalError { .. } => "system",
        }
    }
}
