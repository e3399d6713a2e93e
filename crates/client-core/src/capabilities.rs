//! Capability negotiation between the router and the local media engine

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::engine::MediaEngine;
use crate::error::{ClientError, ClientResult};
use crate::signaling::{RequestMethod, SignalingSession};

/// Capabilities the engine derived from the router's, sent with `join` and
/// `createWebRtcTransport`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NegotiatedCapabilities {
    pub rtp_capabilities: Value,
    pub sctp_capabilities: Value,
}

pub struct CapabilityNegotiator {
    engine: Arc<dyn MediaEngine>,
    negotiated: RwLock<Option<NegotiatedCapabilities>>,
}

impl CapabilityNegotiator {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            engine,
            negotiated: RwLock::new(None),
        }
    }

    /// Fetch the router capabilities, load the engine and return its own set.
    ///
    /// An engine can only be loaded once, so a reconnect reuses the loaded
    /// capabilities instead of asking the router again.
    pub async fn negotiate(&self, signaling: &SignalingSession) -> ClientResult<NegotiatedCapabilities> {
        if self.engine.loaded() {
            debug!("Media engine already loaded, reusing its capabilities");
        } else {
            let router_capabilities = signaling
                .request(RequestMethod::GetRouterRtpCapabilities, json!({}))
                .await?;

            self.engine.load(router_capabilities).await.map_err(|e| {
                warn!(error = %e, "Media engine rejected router capabilities");
                ClientError::capability_error(e.to_string())
            })?;
        }

        let negotiated = NegotiatedCapabilities {
            rtp_capabilities: self
                .engine
                .rtp_capabilities()
                .map_err(|e| ClientError::capability_error(e.to_string()))?,
            sctp_capabilities: self
                .engine
                .sctp_capabilities()
                .map_err(|e| ClientError::capability_error(e.to_string()))?,
        };

        info!("Media capabilities negotiated");
        *self.negotiated.write().await = Some(negotiated.clone());
        Ok(negotiated)
    }

    /// Capabilities from the last successful negotiation
    pub async fn capabilities(&self) -> Option<NegotiatedCapabilities> {
        self.negotiated.read().await.clone()
    }

    pub async fn reset(&self) {
        *self.negotiated.write().await = None;
    }
}
