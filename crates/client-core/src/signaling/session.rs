//! Signaling session supervision
//!
//! [`SignalingSession`] owns the signaling peer for one join: it opens the
//! peer, waits for it to become usable, runs capability negotiation and the
//! `join` request, and then pumps server notifications into a
//! [`SignalingHandler`]. Notifications are handled one at a time in arrival
//! order.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::protocol::{JoinRequest, JoinResponse, NewConsumer, Notification, PeerInfo, RequestMethod};
use super::{generate_peer_id, signaling_url, DeviceInfo, PeerEvent, SignalingConnector, SignalingPeer};
use crate::capabilities::CapabilityNegotiator;
use crate::client::recovery::{retry_with_backoff, RetryConfig};
use crate::client::types::{ActiveSpeaker, ConnectionStatus};
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, EventEmitter};

/// Receiver of decoded server notifications
#[async_trait]
pub trait SignalingHandler: Send + Sync {
    async fn on_new_peer(&self, peer: PeerInfo);

    async fn on_peer_closed(&self, peer_id: &str);

    /// Errors are logged and reported by the session, never propagated further
    async fn on_new_consumer(&self, consumer: NewConsumer) -> ClientResult<()>;

    async fn on_consumer_closed(&self, consumer_id: &str);

    async fn on_consumer_paused(&self, consumer_id: &str);

    async fn on_consumer_resumed(&self, consumer_id: &str);

    async fn on_active_speaker(&self, speaker: Option<ActiveSpeaker>);

    /// The signaling peer closed for good; the session must be torn down
    async fn on_connection_closed(&self);
}

pub struct SignalingSession {
    connector: Arc<dyn SignalingConnector>,
    open_timeout: Duration,
    retry: RetryConfig,
    device: DeviceInfo,
    peer: RwLock<Option<Arc<dyn SignalingPeer>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    /// Id generated for the current attempt
    local_peer_id: RwLock<Option<String>>,
    /// Id the server confirmed in its `join` response
    confirmed_peer_id: RwLock<Option<String>>,
    status: watch::Sender<ConnectionStatus>,
    handler: RwLock<Option<Weak<dyn SignalingHandler>>>,
    emitter: EventEmitter,
}

impl SignalingSession {
    pub fn new(
        connector: Arc<dyn SignalingConnector>,
        open_timeout: Duration,
        retry: RetryConfig,
        device: DeviceInfo,
        emitter: EventEmitter,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            connector,
            open_timeout,
            retry,
            device,
            peer: RwLock::new(None),
            pump: Mutex::new(None),
            local_peer_id: RwLock::new(None),
            confirmed_peer_id: RwLock::new(None),
            status,
            handler: RwLock::new(None),
            emitter,
        }
    }

    /// Register the notification receiver.
    ///
    /// Only a weak reference is kept; the handler usually owns the session.
    pub async fn set_handler(&self, handler: Weak<dyn SignalingHandler>) {
        *self.handler.write().await = Some(handler);
    }

    async fn handler(&self) -> Option<Arc<dyn SignalingHandler>> {
        self.handler.read().await.as_ref().and_then(Weak::upgrade)
    }

    // ===== STATUS =====

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            info!(previous = %previous, current = %status, "Signaling status changed");
            self.emitter.emit(ClientEvent::ConnectionStateChanged {
                previous,
                current: status,
                timestamp: Utc::now(),
            });
        }
    }

    /// Peer id as confirmed by the server, falling back to the generated one
    pub async fn local_peer_id(&self) -> Option<String> {
        if let Some(id) = self.confirmed_peer_id.read().await.clone() {
            return Some(id);
        }
        self.local_peer_id.read().await.clone()
    }

    pub async fn confirmed_peer_id(&self) -> Option<String> {
        self.confirmed_peer_id.read().await.clone()
    }

    // ===== CONNECTION =====

    /// Open the signaling peer, negotiate capabilities and join the room once.
    ///
    /// Status moves to `Connected` on success and `Failed` on any error.
    pub async fn connect(
        self: &Arc<Self>,
        server_address: &str,
        display_name: &str,
        room_id: &str,
        negotiator: &CapabilityNegotiator,
    ) -> ClientResult<JoinResponse> {
        let result = self.connect_once(server_address, display_name, room_id, negotiator).await;
        if let Err(e) = &result {
            error!(error = %e, category = e.category(), "Failed to join room");
            self.set_status(ConnectionStatus::Failed);
        }
        result
    }

    /// [`connect`](Self::connect) with exponential backoff between attempts.
    ///
    /// Only connection errors are retried. When every attempt fails the
    /// error names the attempt count and wraps the last failure.
    pub async fn connect_with_retry(
        self: &Arc<Self>,
        server_address: &str,
        display_name: &str,
        room_id: &str,
        negotiator: &CapabilityNegotiator,
    ) -> ClientResult<JoinResponse> {
        let result = retry_with_backoff("signaling_connect", &self.retry, || {
            self.connect_once(server_address, display_name, room_id, negotiator)
        })
        .await;

        match result {
            Ok(response) => Ok(response),
            Err(e) => {
                let e = if e.is_recoverable() {
                    ClientError::ConnectionRetriesExhausted {
                        attempts: self.retry.max_attempts.max(1),
                        last_error: Box::new(e),
                    }
                } else {
                    e
                };
                error!(error = %e, category = e.category(), "Failed to join room");
                self.set_status(ConnectionStatus::Failed);
                Err(e)
            }
        }
    }

    async fn connect_once(
        self: &Arc<Self>,
        server_address: &str,
        display_name: &str,
        room_id: &str,
        negotiator: &CapabilityNegotiator,
    ) -> ClientResult<JoinResponse> {
        // A previous attempt may have left a half-open peer behind
        self.discard_peer().await;
        self.set_status(ConnectionStatus::Connecting);

        let peer_id = generate_peer_id(display_name);
        *self.local_peer_id.write().await = Some(peer_id.clone());
        *self.confirmed_peer_id.write().await = None;

        let url = signaling_url(server_address, room_id, &peer_id)?;
        info!(url = %url, peer_id = %peer_id, "Opening signaling peer");

        let connection = self
            .connector
            .connect(&url)
            .await
            .map_err(|e| ClientError::connection_failed(format!("{:#}", e)))?;
        let peer = connection.peer;
        let mut events = connection.events;

        if let Err(e) = self.wait_open(&mut events).await {
            warn!(error = %e, "Signaling peer did not open");
            peer.close();
            return Err(e);
        }
        debug!(peer_id = %peer_id, "Signaling peer open");

        *self.peer.write().await = Some(peer);
        let pump = self.spawn_pump(events);
        *self.pump.lock().await = Some(pump);

        match self.join_room(display_name, &peer_id, negotiator).await {
            Ok(response) => {
                self.set_status(ConnectionStatus::Connected);
                Ok(response)
            }
            Err(e) => {
                self.discard_peer().await;
                Err(e)
            }
        }
    }

    async fn wait_open(&self, events: &mut mpsc::UnboundedReceiver<PeerEvent>) -> ClientResult<()> {
        let wait = async {
            loop {
                match events.recv().await {
                    Some(PeerEvent::Open) => return Ok(()),
                    Some(PeerEvent::Failed { reason }) => return Err(ClientError::connection_failed(reason)),
                    Some(PeerEvent::Closed) | None => {
                        return Err(ClientError::connection_failed("signaling peer closed before opening"));
                    }
                    Some(PeerEvent::Disconnected) => continue,
                    Some(PeerEvent::Notification { method, .. }) => {
                        debug!(method = %method, "Dropping notification received before open");
                    }
                }
            }
        };

        match tokio::time::timeout(self.open_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::ConnectionTimeout {
                timeout_ms: self.open_timeout.as_millis() as u64,
            }),
        }
    }

    async fn join_room(
        &self,
        display_name: &str,
        requested_peer_id: &str,
        negotiator: &CapabilityNegotiator,
    ) -> ClientResult<JoinResponse> {
        let capabilities = negotiator.negotiate(self).await?;

        let request = JoinRequest {
            display_name: display_name.to_string(),
            device: self.device.clone(),
            rtp_capabilities: capabilities.rtp_capabilities,
            sctp_capabilities: capabilities.sctp_capabilities,
        };
        let payload = serde_json::to_value(&request)
            .map_err(|e| ClientError::internal_error(format!("failed to encode join: {}", e)))?;
        let raw = self.request(RequestMethod::Join, payload).await?;

        let response: JoinResponse = if raw.is_null() {
            JoinResponse::default()
        } else {
            serde_json::from_value(raw)
                .map_err(|e| ClientError::signaling_request(RequestMethod::Join.as_str(), e.to_string()))?
        };

        let confirmed = match &response.peer_id {
            Some(assigned) if assigned != requested_peer_id => {
                info!(requested = %requested_peer_id, assigned = %assigned, "Adopting server-assigned peer id");
                assigned.clone()
            }
            _ => requested_peer_id.to_string(),
        };
        *self.local_peer_id.write().await = Some(confirmed.clone());
        *self.confirmed_peer_id.write().await = Some(confirmed.clone());

        info!(peer_id = %confirmed, peers = response.peers.len(), "Joined room");
        Ok(response)
    }

    // ===== REQUESTS AND NOTIFICATIONS =====

    /// Send a request over the open peer; no retry
    pub async fn request(&self, method: RequestMethod, data: Value) -> ClientResult<Value> {
        let peer = self.peer.read().await.clone().ok_or(ClientError::NotConnected)?;
        if peer.closed() {
            return Err(ClientError::NotConnected);
        }

        debug!(method = %method, "Sending signaling request");
        peer.request(method.as_str(), data).await.map_err(|e| {
            warn!(method = %method, error = %e, "Signaling request failed");
            ClientError::signaling_request(method.as_str(), format!("{:#}", e))
        })
    }

    /// Decode one notification and hand it to the handler.
    ///
    /// Nothing escapes this boundary: malformed payloads and handler errors
    /// are logged and reported to the last-error field.
    pub async fn dispatch(&self, method: &str, data: Value) {
        let notification = match Notification::parse(method, data) {
            Ok(notification) => notification,
            Err(e) => {
                warn!(method = %method, error = %e, "Discarding malformed notification");
                self.emitter.report_error(e, Some("notification"));
                return;
            }
        };

        let Some(handler) = self.handler().await else {
            debug!(method = %method, "No notification handler registered");
            return;
        };

        debug!(method = %method, "Dispatching notification");
        match notification {
            Notification::NewPeer(peer) => handler.on_new_peer(peer).await,
            Notification::PeerClosed { peer_id } => handler.on_peer_closed(&peer_id).await,
            Notification::NewConsumer(consumer) => {
                let consumer_id = consumer.id.clone();
                if let Err(e) = handler.on_new_consumer(consumer).await {
                    warn!(consumer_id = %consumer_id, error = %e, "Failed to handle newConsumer");
                    self.emitter.report_error(e, Some("newConsumer"));
                }
            }
            Notification::ConsumerClosed { consumer_id } => handler.on_consumer_closed(&consumer_id).await,
            Notification::ConsumerPaused { consumer_id } => handler.on_consumer_paused(&consumer_id).await,
            Notification::ConsumerResumed { consumer_id } => handler.on_consumer_resumed(&consumer_id).await,
            Notification::ActiveSpeaker { peer_id, volume } => {
                let speaker = peer_id.map(|peer_id| ActiveSpeaker { peer_id, volume });
                handler.on_active_speaker(speaker).await;
            }
            Notification::Unknown { method } => {
                warn!(method = %method, "Ignoring unknown notification");
            }
        }
    }

    fn spawn_pump(self: &Arc<Self>, mut events: mpsc::UnboundedReceiver<PeerEvent>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let event = events.recv().await;
                let Some(session) = weak.upgrade() else {
                    break;
                };

                match event {
                    Some(PeerEvent::Notification { method, data }) => session.dispatch(&method, data).await,
                    Some(PeerEvent::Disconnected) => {
                        warn!("Signaling peer disconnected, keeping session state");
                        session.set_status(ConnectionStatus::Disconnected);
                    }
                    Some(PeerEvent::Open) => {
                        if session.status() == ConnectionStatus::Disconnected {
                            info!("Signaling peer reconnected");
                            session.set_status(ConnectionStatus::Connected);
                        }
                    }
                    Some(PeerEvent::Failed { reason }) => {
                        warn!(reason = %reason, "Signaling peer reconnection attempt failed");
                    }
                    Some(PeerEvent::Closed) | None => {
                        session.handle_closed().await;
                        break;
                    }
                }
            }
        })
    }

    async fn handle_closed(&self) {
        warn!("Signaling peer closed");
        self.peer.write().await.take();
        self.pump.lock().await.take();
        self.set_status(ConnectionStatus::Disconnected);
        self.emitter
            .report_error(ClientError::connection_failed("signaling peer closed"), Some("signaling"));

        // Teardown closes this session, so it must not run on the pump task
        if let Some(handler) = self.handler().await {
            tokio::spawn(async move {
                handler.on_connection_closed().await;
            });
        }
    }

    // ===== TEARDOWN =====

    /// Stop the pump and close the peer without touching status or ids
    async fn discard_peer(&self) {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        if let Some(peer) = self.peer.write().await.take() {
            if !peer.closed() {
                peer.close();
            }
        }
    }

    /// Close the peer and forget the session's ids
    pub async fn close(&self) {
        self.shutdown(ConnectionStatus::Disconnected).await;
    }

    pub(crate) async fn shutdown(&self, status: ConnectionStatus) {
        self.discard_peer().await;
        *self.local_peer_id.write().await = None;
        *self.confirmed_peer_id.write().await = None;
        self.set_status(status);
        debug!(status = %status, "Signaling session shut down");
    }
}
