//! Send and receive transport management
//!
//! The engine raises a "connect" event on each transport and a "produce" event
//! on the send transport. Both are bridged here to signaling requests and
//! settled with accept (`Ok`) or reject (`Err`).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::capabilities::NegotiatedCapabilities;
use crate::client::types::TransportInfo;
use crate::engine::{
    ConnectHandler, MediaEngine, MediaTransport, ProduceHandler, ProduceParameters, TransportDirection,
    TransportOptions,
};
use crate::error::{ClientError, ClientResult};
use crate::signaling::protocol::{ConnectTransportRequest, CreateTransportRequest, ProduceRequest, ProduceResponse};
use crate::signaling::{RequestMethod, SignalingSession};

/// Bookkeeping shared between a transport and its callbacks
#[derive(Debug, Default)]
struct BridgeState {
    connected: AtomicBool,
    pending: AtomicUsize,
}

/// Counts a callback as pending until dropped
struct PendingCallback(Arc<BridgeState>);

impl PendingCallback {
    fn start(state: &Arc<BridgeState>) -> Self {
        state.pending.fetch_add(1, Ordering::SeqCst);
        Self(state.clone())
    }
}

impl Drop for PendingCallback {
    fn drop(&mut self) {
        self.0.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
struct ManagedTransport {
    transport: Arc<dyn MediaTransport>,
    state: Arc<BridgeState>,
}

impl ManagedTransport {
    fn info(&self) -> TransportInfo {
        TransportInfo {
            id: self.transport.id(),
            direction: self.transport.direction(),
            connected: self.state.connected.load(Ordering::SeqCst),
            pending_callbacks: self.state.pending.load(Ordering::SeqCst),
            closed: self.transport.closed(),
        }
    }
}

pub struct TransportManager {
    engine: Arc<dyn MediaEngine>,
    signaling: Weak<SignalingSession>,
    send: RwLock<Option<ManagedTransport>>,
    recv: RwLock<Option<ManagedTransport>>,
}

impl TransportManager {
    pub fn new(engine: Arc<dyn MediaEngine>, signaling: &Arc<SignalingSession>) -> Self {
        Self {
            engine,
            signaling: Arc::downgrade(signaling),
            send: RwLock::new(None),
            recv: RwLock::new(None),
        }
    }

    /// Create and wire both transports.
    ///
    /// Either both transports are stored or neither is.
    pub async fn create_transports(
        &self,
        capabilities: Option<&NegotiatedCapabilities>,
        force_tcp: bool,
    ) -> ClientResult<()> {
        let capabilities = capabilities.ok_or(ClientError::CapabilitiesNotLoaded)?;
        self.close_all().await;

        let send = self.create_transport(TransportDirection::Send, capabilities, force_tcp).await?;
        let recv = match self.create_transport(TransportDirection::Recv, capabilities, force_tcp).await {
            Ok(recv) => recv,
            Err(e) => {
                send.transport.close();
                return Err(e);
            }
        };

        info!(
            send_transport_id = %send.transport.id(),
            recv_transport_id = %recv.transport.id(),
            "Media transports created"
        );
        *self.send.write().await = Some(send);
        *self.recv.write().await = Some(recv);
        Ok(())
    }

    async fn create_transport(
        &self,
        direction: TransportDirection,
        capabilities: &NegotiatedCapabilities,
        force_tcp: bool,
    ) -> ClientResult<ManagedTransport> {
        let creation_failed = |reason: String| ClientError::TransportCreationFailed { direction, reason };

        let signaling = self.signaling()?;
        let request = CreateTransportRequest {
            force_tcp,
            producing: direction == TransportDirection::Send,
            consuming: direction == TransportDirection::Recv,
            sctp_capabilities: capabilities.sctp_capabilities.clone(),
        };
        let payload = serde_json::to_value(&request).map_err(|e| creation_failed(e.to_string()))?;

        let response = signaling
            .request(RequestMethod::CreateWebRtcTransport, payload)
            .await
            .map_err(|e| creation_failed(e.to_string()))?;
        let options: TransportOptions =
            serde_json::from_value(response).map_err(|e| creation_failed(format!("bad transport options: {}", e)))?;
        let transport_id = options.id.clone();

        let transport = match direction {
            TransportDirection::Send => self.engine.create_send_transport(options),
            TransportDirection::Recv => self.engine.create_recv_transport(options),
        }
        .map_err(|e| creation_failed(format!("{:#}", e)))?;

        let state = Arc::new(BridgeState::default());
        transport.on_connect(self.connect_bridge(transport_id.clone(), direction, state.clone()));
        if direction == TransportDirection::Send {
            transport.on_produce(self.produce_bridge(transport_id.clone(), state.clone()));
        }

        debug!(transport_id = %transport_id, direction = %direction, "Transport created");
        Ok(ManagedTransport { transport, state })
    }

    fn connect_bridge(&self, transport_id: String, direction: TransportDirection, state: Arc<BridgeState>) -> ConnectHandler {
        let signaling = self.signaling.clone();
        Arc::new(move |dtls_parameters: Value| {
            let signaling = signaling.clone();
            let transport_id = transport_id.clone();
            let state = state.clone();
            async move {
                let _pending = PendingCallback::start(&state);
                let signaling = signaling
                    .upgrade()
                    .ok_or_else(|| anyhow::anyhow!("signaling session is gone"))?;
                let payload = serde_json::to_value(ConnectTransportRequest {
                    transport_id: transport_id.clone(),
                    dtls_parameters,
                })?;

                match signaling.request(RequestMethod::ConnectWebRtcTransport, payload).await {
                    Ok(_) => {
                        state.connected.store(true, Ordering::SeqCst);
                        debug!(transport_id = %transport_id, direction = %direction, "Transport connected");
                        Ok::<(), anyhow::Error>(())
                    }
                    Err(e) => {
                        warn!(transport_id = %transport_id, error = %e, "Rejecting transport connect");
                        Err(anyhow::Error::new(e))
                    }
                }
            }
            .boxed()
        })
    }

    fn produce_bridge(&self, transport_id: String, state: Arc<BridgeState>) -> ProduceHandler {
        let signaling = self.signaling.clone();
        Arc::new(move |parameters: ProduceParameters| {
            let signaling = signaling.clone();
            let transport_id = transport_id.clone();
            let state = state.clone();
            async move {
                let _pending = PendingCallback::start(&state);
                let signaling = signaling
                    .upgrade()
                    .ok_or_else(|| anyhow::anyhow!("signaling session is gone"))?;
                let kind = parameters.kind;
                let payload = serde_json::to_value(ProduceRequest {
                    transport_id: transport_id.clone(),
                    kind,
                    rtp_parameters: parameters.rtp_parameters,
                    app_data: parameters.app_data,
                })?;

                let response = signaling
                    .request(RequestMethod::Produce, payload)
                    .await
                    .inspect_err(|e| warn!(kind = %kind, error = %e, "Rejecting produce"))?;
                let ProduceResponse { id } = serde_json::from_value(response)?;
                debug!(kind = %kind, producer_id = %id, "Server accepted producer");
                Ok::<String, anyhow::Error>(id)
            }
            .boxed()
        })
    }

    fn signaling(&self) -> ClientResult<Arc<SignalingSession>> {
        self.signaling.upgrade().ok_or(ClientError::NotConnected)
    }

    // ===== ACCESSORS =====

    pub async fn send_transport(&self) -> ClientResult<Arc<dyn MediaTransport>> {
        self.transport(TransportDirection::Send).await
    }

    pub async fn recv_transport(&self) -> ClientResult<Arc<dyn MediaTransport>> {
        self.transport(TransportDirection::Recv).await
    }

    async fn transport(&self, direction: TransportDirection) -> ClientResult<Arc<dyn MediaTransport>> {
        let slot = match direction {
            TransportDirection::Send => self.send.read().await,
            TransportDirection::Recv => self.recv.read().await,
        };
        slot.as_ref()
            .filter(|managed| !managed.transport.closed())
            .map(|managed| managed.transport.clone())
            .ok_or(ClientError::TransportNotReady { direction })
    }

    pub async fn info(&self, direction: TransportDirection) -> Option<TransportInfo> {
        let slot = match direction {
            TransportDirection::Send => self.send.read().await,
            TransportDirection::Recv => self.recv.read().await,
        };
        slot.as_ref().map(ManagedTransport::info)
    }

    /// Close both transports; safe to call when none exist
    pub async fn close_all(&self) {
        let send = self.send.write().await.take();
        let recv = self.recv.write().await.take();
        for managed in [send, recv].into_iter().flatten() {
            if !managed.transport.closed() {
                debug!(transport_id = %managed.transport.id(), "Closing transport");
                managed.transport.close();
            }
        }
    }
}
