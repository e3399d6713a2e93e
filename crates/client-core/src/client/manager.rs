//! Room client session object
//!
//! [`RoomClient`] wires the signaling session, capability negotiator,
//! transport manager, production manager and remote state together and owns
//! the join/leave lifecycle. Media controls live in `controls.rs`.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::RoomConfig;
use super::types::{ActiveSpeaker, ConnectionStatus, ConsumerInfo, Participant, RoomStats};
use crate::capabilities::CapabilityNegotiator;
use crate::engine::{MediaDevices, MediaEngine, MediaStream, TransportDirection};
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, EventEmitter};
use crate::production::MediaProductionManager;
use crate::remote::RemoteSessionState;
use crate::signaling::{NewConsumer, PeerInfo, SignalingConnector, SignalingHandler, SignalingSession};
use crate::transport::TransportManager;

/// Consumer notification received while the transports were being created
enum ConsumerEvent {
    New(NewConsumer),
    Closed(String),
    Paused(String),
    Resumed(String),
}

/// One participant's session in one room
pub struct RoomClient {
    pub(crate) config: RoomConfig,
    session_id: Uuid,
    pub(crate) emitter: EventEmitter,
    pub(crate) signaling: Arc<SignalingSession>,
    pub(crate) negotiator: Arc<CapabilityNegotiator>,
    pub(crate) transports: Arc<TransportManager>,
    pub(crate) production: Arc<MediaProductionManager>,
    pub(crate) remote: Arc<RemoteSessionState>,
    /// Mirrors local producer flags into the local participant
    local_sync: Mutex<Option<JoinHandle<()>>>,
    /// Serializes join, leave and connection-loss teardown
    lifecycle: Mutex<()>,
    /// Cancelled by `leave` while a join is in flight
    pending_join: Mutex<Option<CancellationToken>>,
    /// `Some` from the start of a join until both transports exist
    deferred: Mutex<Option<Vec<ConsumerEvent>>>,
}

impl RoomClient {
    /// Create a client for `config`; nothing is connected until [`join`](Self::join)
    pub async fn new(
        config: RoomConfig,
        connector: Arc<dyn SignalingConnector>,
        engine: Arc<dyn MediaEngine>,
        devices: Arc<dyn MediaDevices>,
    ) -> ClientResult<Arc<Self>> {
        config.validate()?;

        let emitter = EventEmitter::new(config.event_channel_capacity);
        let signaling = Arc::new(SignalingSession::new(
            connector,
            config.open_timeout,
            config.retry.clone(),
            config.device.clone(),
            emitter.clone(),
        ));
        let negotiator = Arc::new(CapabilityNegotiator::new(engine.clone()));
        let transports = Arc::new(TransportManager::new(engine, &signaling));
        let production = Arc::new(MediaProductionManager::new(
            devices,
            signaling.clone(),
            transports.clone(),
            config.media.clone(),
            emitter.clone(),
        ));
        let remote = Arc::new(RemoteSessionState::new(
            signaling.clone(),
            transports.clone(),
            config.display_name.clone(),
            emitter.clone(),
        ));

        let session_id = Uuid::new_v4();
        let client = Arc::new(Self {
            config,
            session_id,
            emitter,
            signaling,
            negotiator,
            transports,
            production,
            remote,
            local_sync: Mutex::new(None),
            lifecycle: Mutex::new(()),
            pending_join: Mutex::new(None),
            deferred: Mutex::new(None),
        });

        let handler: Arc<dyn SignalingHandler> = client.clone();
        let handler: Weak<dyn SignalingHandler> = Arc::downgrade(&handler);
        client.signaling.set_handler(handler).await;

        debug!(session_id = %session_id, room_id = %client.config.room_id, "Room client created");
        Ok(client)
    }

    // ===== LIFECYCLE =====

    /// Connect to the room and create both media transports.
    ///
    /// The signaling connection is retried with backoff; everything after it
    /// is attempted once. On failure the session is torn down, status is
    /// `Failed` and the error is also published as the last error.
    ///
    /// State kept from a session whose peer dropped is discarded first. A
    /// [`leave`](Self::leave) during the join aborts it with
    /// [`ClientError::JoinCancelled`].
    pub async fn join(&self) -> ClientResult<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let status = self.signaling.status();
        if status.is_active() {
            return Err(ClientError::InvalidState {
                expected: ConnectionStatus::Disconnected.to_string(),
                actual: status.to_string(),
            });
        }
        if self.has_session_state().await {
            info!(session_id = %self.session_id, "Discarding previous session before joining");
            self.teardown(ConnectionStatus::Disconnected).await;
        }

        self.emitter.clear_error();
        info!(
            session_id = %self.session_id,
            room_id = %self.config.room_id,
            display_name = %self.config.display_name,
            "Joining room"
        );

        let cancel = CancellationToken::new();
        *self.pending_join.lock().await = Some(cancel.clone());
        *self.deferred.lock().await = Some(Vec::new());

        let result = tokio::select! {
            result = self.join_inner() => result,
            _ = cancel.cancelled() => Err(ClientError::JoinCancelled),
        };
        self.pending_join.lock().await.take();

        match result {
            Ok(()) => {
                let peer_id = self.signaling.local_peer_id().await;
                info!(session_id = %self.session_id, peer_id = ?peer_id, "Room joined");
                Ok(())
            }
            Err(ClientError::JoinCancelled) => {
                info!(session_id = %self.session_id, "Join cancelled");
                self.teardown(ConnectionStatus::Disconnected).await;
                Err(ClientError::JoinCancelled)
            }
            Err(e) => {
                error!(session_id = %self.session_id, error = %e, category = e.category(), "Join failed");
                self.teardown(ConnectionStatus::Failed).await;
                self.emitter.report_error(e.clone(), Some("join"));
                Err(e)
            }
        }
    }

    async fn join_inner(&self) -> ClientResult<()> {
        let response = self
            .signaling
            .connect_with_retry(
                &self.config.server_address,
                &self.config.display_name,
                &self.config.room_id,
                &self.negotiator,
            )
            .await?;

        self.remote.seed_peers(response.peers).await;

        let capabilities = self.negotiator.capabilities().await;
        self.transports
            .create_transports(capabilities.as_ref(), self.config.force_tcp)
            .await?;

        self.replay_deferred().await;
        self.start_local_sync().await;
        Ok(())
    }

    /// Leave the room and reset every published snapshot.
    ///
    /// A join still in progress is cancelled.
    pub async fn leave(&self) {
        if let Some(cancel) = self.pending_join.lock().await.as_ref() {
            debug!(session_id = %self.session_id, "Cancelling pending join");
            cancel.cancel();
        }
        let _lifecycle = self.lifecycle.lock().await;
        info!(session_id = %self.session_id, "Leaving room");
        self.teardown(ConnectionStatus::Disconnected).await;
        self.emitter.clear_error();
    }

    /// Whether anything from an earlier session is still held
    async fn has_session_state(&self) -> bool {
        self.production.producer_count() > 0
            || self.remote.consumer_count() > 0
            || !self.remote.participants().is_empty()
            || self.transports.info(TransportDirection::Send).await.is_some()
            || self.transports.info(TransportDirection::Recv).await.is_some()
    }

    /// Queue `event` while transports are being created; hands it back otherwise
    async fn defer(&self, event: ConsumerEvent) -> Option<ConsumerEvent> {
        match self.deferred.lock().await.as_mut() {
            Some(queue) => {
                queue.push(event);
                None
            }
            None => Some(event),
        }
    }

    /// Apply consumer notifications queued during the join in arrival order.
    ///
    /// The queue stays locked so later notifications wait behind it.
    async fn replay_deferred(&self) {
        let mut deferred = self.deferred.lock().await;
        let queued = deferred.take().unwrap_or_default();
        if !queued.is_empty() {
            debug!(count = queued.len(), "Replaying consumer notifications received during join");
        }
        for event in queued {
            match event {
                ConsumerEvent::New(consumer) => {
                    let consumer_id = consumer.id.clone();
                    if let Err(e) = self.remote.on_new_consumer(consumer).await {
                        warn!(consumer_id = %consumer_id, error = %e, "Failed to handle newConsumer");
                        self.emitter.report_error(e, Some("newConsumer"));
                    }
                }
                ConsumerEvent::Closed(consumer_id) => self.remote.on_consumer_closed(&consumer_id).await,
                ConsumerEvent::Paused(consumer_id) => self.remote.on_consumer_paused(&consumer_id).await,
                ConsumerEvent::Resumed(consumer_id) => self.remote.on_consumer_resumed(&consumer_id).await,
            }
        }
    }

    async fn start_local_sync(&self) {
        let mut states = self.production.subscribe_local_state();
        let remote = self.remote.clone();
        remote.update_local(*states.borrow_and_update());

        let task = tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                remote.update_local(state);
            }
        });
        if let Some(previous) = self.local_sync.lock().await.replace(task) {
            previous.abort();
        }
    }

    /// Close producers, consumers, transports and the signaling peer, then
    /// reset state. Every step is best effort.
    async fn teardown(&self, status: ConnectionStatus) {
        if let Some(task) = self.local_sync.lock().await.take() {
            task.abort();
        }
        self.deferred.lock().await.take();
        self.production.close_all();
        self.remote.close_consumers();
        self.transports.close_all().await;
        self.signaling.shutdown(status).await;
        self.remote.reset();
        self.negotiator.reset().await;
        debug!(session_id = %self.session_id, status = %status, "Session torn down");
    }

    // ===== OBSERVATION =====

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.emitter.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.signaling.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.signaling.subscribe_status()
    }

    pub fn participants(&self) -> Arc<[Participant]> {
        self.remote.participants()
    }

    pub fn subscribe_participants(&self) -> watch::Receiver<Arc<[Participant]>> {
        self.remote.subscribe_participants()
    }

    pub fn consumers(&self) -> Arc<[ConsumerInfo]> {
        self.remote.consumers()
    }

    pub fn subscribe_consumers(&self) -> watch::Receiver<Arc<[ConsumerInfo]>> {
        self.remote.subscribe_consumers()
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.production.local_stream()
    }

    pub fn subscribe_local_stream(&self) -> watch::Receiver<Option<MediaStream>> {
        self.production.subscribe_local_stream()
    }

    pub fn active_speaker(&self) -> Option<ActiveSpeaker> {
        self.remote.active_speaker()
    }

    pub fn subscribe_active_speaker(&self) -> watch::Receiver<Option<ActiveSpeaker>> {
        self.remote.subscribe_active_speaker()
    }

    pub fn last_error(&self) -> Option<ClientError> {
        self.emitter.last_error()
    }

    pub fn subscribe_last_error(&self) -> watch::Receiver<Option<ClientError>> {
        self.emitter.subscribe_last_error()
    }

    /// Server-confirmed peer id, or the generated one while joining
    pub async fn local_peer_id(&self) -> Option<String> {
        self.signaling.local_peer_id().await
    }

    pub async fn is_own_consumer(&self, consumer_id: &str) -> bool {
        self.remote.is_own_consumer(consumer_id).await
    }

    pub async fn room_stats(&self) -> RoomStats {
        RoomStats {
            status: self.status(),
            local_peer_id: self.local_peer_id().await,
            remote_participants: self.remote.remote_participant_count(),
            consumers: self.remote.consumer_count(),
            producers: self.production.producer_count(),
            send_transport: self.transports.info(TransportDirection::Send).await,
            recv_transport: self.transports.info(TransportDirection::Recv).await,
        }
    }

    pub fn signaling(&self) -> &Arc<SignalingSession> {
        &self.signaling
    }

    pub fn negotiator(&self) -> &Arc<CapabilityNegotiator> {
        &self.negotiator
    }

    pub fn remote_state(&self) -> &Arc<RemoteSessionState> {
        &self.remote
    }

    /// Publish `result`'s error as the last error before returning it
    pub(crate) fn observe<T>(&self, result: ClientResult<T>, context: &str) -> ClientResult<T> {
        if let Err(e) = &result {
            self.emitter.report_error(e.clone(), Some(context));
        }
        result
    }
}

#[async_trait]
impl SignalingHandler for RoomClient {
    async fn on_new_peer(&self, peer: PeerInfo) {
        self.remote.on_new_peer(peer).await;
    }

    async fn on_peer_closed(&self, peer_id: &str) {
        self.remote.on_peer_closed(peer_id).await;
    }

    async fn on_new_consumer(&self, consumer: NewConsumer) -> ClientResult<()> {
        match self.defer(ConsumerEvent::New(consumer)).await {
            Some(ConsumerEvent::New(consumer)) => self.remote.on_new_consumer(consumer).await,
            _ => Ok(()),
        }
    }

    async fn on_consumer_closed(&self, consumer_id: &str) {
        if self.defer(ConsumerEvent::Closed(consumer_id.to_string())).await.is_some() {
            self.remote.on_consumer_closed(consumer_id).await;
        }
    }

    async fn on_consumer_paused(&self, consumer_id: &str) {
        if self.defer(ConsumerEvent::Paused(consumer_id.to_string())).await.is_some() {
            self.remote.on_consumer_paused(consumer_id).await;
        }
    }

    async fn on_consumer_resumed(&self, consumer_id: &str) {
        if self.defer(ConsumerEvent::Resumed(consumer_id.to_string())).await.is_some() {
            self.remote.on_consumer_resumed(consumer_id).await;
        }
    }

    async fn on_active_speaker(&self, speaker: Option<ActiveSpeaker>) {
        self.remote.on_active_speaker(speaker).await;
    }

    async fn on_connection_closed(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        // A newer join may have completed while we waited
        if self.signaling.status().is_active() {
            return;
        }
        info!(session_id = %self.session_id, "Signaling closed, tearing down session");
        self.teardown(ConnectionStatus::Disconnected).await;
    }
}
