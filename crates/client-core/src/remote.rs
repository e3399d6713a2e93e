//! Remote session state
//!
//! Participants, consumers and the active speaker, mutated only from server
//! notifications (plus the local participant mirrored from production).
//! Readers get immutable snapshots over `watch` channels.

use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::types::{
    ActiveSpeaker, ConsumerInfo, LocalMediaState, Participant, LOCAL_PARTICIPANT_ID,
};
use crate::engine::{CloseReason, ConsumeOptions, Consumer, MediaKind};
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, EventEmitter};
use crate::signaling::protocol::ConsumerRequest;
use crate::signaling::{NewConsumer, PeerInfo, RequestMethod, SignalingSession};
use crate::transport::TransportManager;

struct ConsumerEntry {
    info: ConsumerInfo,
    consumer: Arc<dyn Consumer>,
}

/// Collections plus their published snapshots
struct RemoteStore {
    participants: DashMap<String, Participant>,
    /// Peers that left during this session
    departed: DashSet<String>,
    consumers: DashMap<String, ConsumerEntry>,
    local: watch::Sender<Option<Participant>>,
    participants_tx: watch::Sender<Arc<[Participant]>>,
    consumers_tx: watch::Sender<Arc<[ConsumerInfo]>>,
    active_speaker: watch::Sender<Option<ActiveSpeaker>>,
    emitter: EventEmitter,
}

impl RemoteStore {
    fn new(emitter: EventEmitter) -> Self {
        Self {
            participants: DashMap::new(),
            departed: DashSet::new(),
            consumers: DashMap::new(),
            local: watch::channel(None).0,
            participants_tx: watch::channel(Arc::from(Vec::new())).0,
            consumers_tx: watch::channel(Arc::from(Vec::new())).0,
            active_speaker: watch::channel(None).0,
            emitter,
        }
    }

    /// Local participant first, then remote ones in join order
    fn publish_participants(&self) {
        let mut remote: Vec<Participant> = self.participants.iter().map(|p| p.value().clone()).collect();
        remote.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));

        let mut snapshot = Vec::with_capacity(remote.len() + 1);
        if let Some(local) = self.local.borrow().clone() {
            snapshot.push(local);
        }
        snapshot.extend(remote);
        self.participants_tx.send_replace(snapshot.into());
    }

    fn publish_consumers(&self) {
        let mut snapshot: Vec<ConsumerInfo> = self.consumers.iter().map(|c| c.info.clone()).collect();
        snapshot.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        self.consumers_tx.send_replace(snapshot.into());
    }

    /// Whether `peer_id` still has a consumer of `kind`
    fn has_consumer(&self, peer_id: &str, kind: MediaKind) -> bool {
        self.consumers
            .iter()
            .any(|c| c.info.peer_id == peer_id && c.info.kind == kind)
    }

    /// Remove a consumer entry and update its owner's flag.
    ///
    /// Returns the engine consumer so the caller can close it outside any
    /// map guard.
    fn remove_consumer(&self, consumer_id: &str) -> Option<(ConsumerInfo, Arc<dyn Consumer>)> {
        let (_, entry) = self.consumers.remove(consumer_id)?;
        let info = entry.info;

        let still_has_kind = self.has_consumer(&info.peer_id, info.kind);
        if let Some(mut owner) = self.participants.get_mut(&info.peer_id) {
            owner.set_media_enabled(info.kind, still_has_kind);
        }

        self.emitter.emit(ClientEvent::ConsumerClosed {
            consumer_id: info.id.clone(),
            peer_id: info.peer_id.clone(),
            timestamp: Utc::now(),
        });
        Some((info, entry.consumer))
    }

    fn consumer(&self, consumer_id: &str) -> Option<Arc<dyn Consumer>> {
        self.consumers.get(consumer_id).map(|c| c.consumer.clone())
    }
}

pub struct RemoteSessionState {
    signaling: Arc<SignalingSession>,
    transports: Arc<TransportManager>,
    display_name: String,
    store: Arc<RemoteStore>,
}

impl RemoteSessionState {
    pub fn new(
        signaling: Arc<SignalingSession>,
        transports: Arc<TransportManager>,
        display_name: impl Into<String>,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            signaling,
            transports,
            display_name: display_name.into(),
            store: Arc::new(RemoteStore::new(emitter)),
        }
    }

    // ===== NOTIFICATIONS =====

    pub async fn on_new_peer(&self, peer: PeerInfo) {
        if self.signaling.confirmed_peer_id().await.as_deref() == Some(peer.id.as_str()) {
            debug!(peer_id = %peer.id, "Ignoring newPeer for the local peer");
            return;
        }
        if self.store.participants.contains_key(&peer.id) {
            debug!(peer_id = %peer.id, "Duplicate newPeer ignored");
            return;
        }
        self.store.departed.remove(&peer.id);

        let display_name = peer.display_name.clone().unwrap_or_else(|| peer.id.clone());
        let participant = Participant::remote(peer.id.clone(), display_name, peer.device);
        self.insert_participant(participant);
    }

    fn insert_participant(&self, participant: Participant) {
        use dashmap::mapref::entry::Entry;

        match self.store.participants.entry(participant.id.clone()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => {
                slot.insert(participant.clone());
            }
        }

        info!(peer_id = %participant.id, display_name = %participant.display_name, "Participant joined");
        self.store.emitter.emit(ClientEvent::ParticipantJoined {
            participant,
            timestamp: Utc::now(),
        });
        self.store.publish_participants();
    }

    /// Remove the participant and every consumer it owns
    pub async fn on_peer_closed(&self, peer_id: &str) {
        if self.store.participants.remove(peer_id).is_none() {
            debug!(peer_id = %peer_id, "peerClosed for unknown peer ignored");
            return;
        }
        self.store.departed.insert(peer_id.to_string());

        let owned: Vec<String> = self
            .store
            .consumers
            .iter()
            .filter(|c| c.info.peer_id == peer_id)
            .map(|c| c.key().clone())
            .collect();
        for consumer_id in &owned {
            if let Some((_, consumer)) = self.store.remove_consumer(consumer_id) {
                consumer.close();
            }
        }

        let was_speaking = self
            .store
            .active_speaker
            .send_if_modified(|speaker| {
                if speaker.as_ref().is_some_and(|s| s.peer_id == peer_id) {
                    *speaker = None;
                    true
                } else {
                    false
                }
            });
        if was_speaking {
            self.store.emitter.emit(ClientEvent::ActiveSpeakerChanged {
                speaker: None,
                timestamp: Utc::now(),
            });
        }

        info!(peer_id = %peer_id, consumers_closed = owned.len(), "Participant left");
        self.store.emitter.emit(ClientEvent::ParticipantLeft {
            peer_id: peer_id.to_string(),
            timestamp: Utc::now(),
        });
        self.store.publish_consumers();
        self.store.publish_participants();
    }

    /// Materialize a consumer announced by the server.
    ///
    /// Consumers owned by the local peer or by a peer that already left are
    /// discarded before anything is sent to the server.
    pub async fn on_new_consumer(&self, announced: NewConsumer) -> ClientResult<()> {
        if self.signaling.confirmed_peer_id().await.as_deref() == Some(announced.peer_id.as_str()) {
            debug!(consumer_id = %announced.id, "Ignoring consumer of a local producer");
            return Ok(());
        }
        if self.store.departed.contains(&announced.peer_id) {
            warn!(consumer_id = %announced.id, peer_id = %announced.peer_id, "Discarding consumer of a departed peer");
            return Ok(());
        }
        if self.store.consumers.contains_key(&announced.id) {
            debug!(consumer_id = %announced.id, "Duplicate newConsumer ignored");
            return Ok(());
        }

        let recv_transport = self.transports.recv_transport().await?;
        let consumer = recv_transport
            .consume(ConsumeOptions {
                id: announced.id.clone(),
                producer_id: announced.producer_id.clone(),
                kind: announced.kind,
                rtp_parameters: announced.rtp_parameters.clone(),
                app_data: announced.app_data.clone(),
            })
            .await
            .map_err(|e| ClientError::ConsumerCreationFailed {
                consumer_id: announced.id.clone(),
                reason: format!("{:#}", e),
            })?;

        self.resume_consumer(&announced.id).await;

        let info = ConsumerInfo {
            id: announced.id.clone(),
            peer_id: announced.peer_id.clone(),
            producer_id: announced.producer_id.clone(),
            kind: announced.kind,
            paused: consumer.paused(),
            producer_paused: announced.producer_paused,
            consumer_type: announced.consumer_type.clone(),
            created_at: Utc::now(),
        };
        let track = consumer.track();
        self.watch_consumer(&consumer);

        if !self.store.participants.contains_key(&announced.peer_id) {
            debug!(peer_id = %announced.peer_id, "Consumer for unannounced peer, adding placeholder participant");
            self.insert_participant(Participant::remote(
                announced.peer_id.clone(),
                announced.peer_id.clone(),
                None,
            ));
        }

        self.store.consumers.insert(
            info.id.clone(),
            ConsumerEntry {
                info: info.clone(),
                consumer,
            },
        );
        if let Some(mut owner) = self.store.participants.get_mut(&info.peer_id) {
            owner.set_media_enabled(info.kind, true);
        }

        info!(consumer_id = %info.id, peer_id = %info.peer_id, kind = %info.kind, "Consumer ready");
        self.store.emitter.emit(ClientEvent::ConsumerReady {
            consumer: info,
            track,
            timestamp: Utc::now(),
        });
        self.store.publish_consumers();
        self.store.publish_participants();
        Ok(())
    }

    async fn resume_consumer(&self, consumer_id: &str) {
        let payload = match serde_json::to_value(ConsumerRequest {
            consumer_id: consumer_id.to_string(),
        }) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(consumer_id = %consumer_id, error = %e, "Failed to encode resumeConsumer");
                return;
            }
        };

        if let Err(e) = self.signaling.request(RequestMethod::ResumeConsumer, payload).await {
            warn!(consumer_id = %consumer_id, error = %e, "resumeConsumer failed, keeping consumer");
            self.store.emitter.report_error(e, Some("resumeConsumer"));
        }
    }

    /// Drop the consumer when its track ends or its transport closes
    fn watch_consumer(&self, consumer: &Arc<dyn Consumer>) {
        let store: Weak<RemoteStore> = Arc::downgrade(&self.store);
        let consumer_id = consumer.id();
        consumer.on_close(Box::new(move |reason: CloseReason| {
            let Some(store) = store.upgrade() else {
                return;
            };
            if store.remove_consumer(&consumer_id).is_some() {
                debug!(consumer_id = %consumer_id, reason = ?reason, "Consumer closed underneath us");
                store.publish_consumers();
                store.publish_participants();
            }
        }));
    }

    /// Close and remove a consumer; unknown ids are ignored
    pub async fn on_consumer_closed(&self, consumer_id: &str) {
        let Some((info, consumer)) = self.store.remove_consumer(consumer_id) else {
            debug!(consumer_id = %consumer_id, "consumerClosed for unknown consumer ignored");
            return;
        };
        consumer.close();
        debug!(consumer_id = %consumer_id, peer_id = %info.peer_id, "Consumer closed");
        self.store.publish_consumers();
        self.store.publish_participants();
    }

    pub async fn on_consumer_paused(&self, consumer_id: &str) {
        self.set_consumer_paused(consumer_id, true);
    }

    pub async fn on_consumer_resumed(&self, consumer_id: &str) {
        self.set_consumer_paused(consumer_id, false);
    }

    fn set_consumer_paused(&self, consumer_id: &str, paused: bool) {
        let Some(consumer) = self.store.consumer(consumer_id) else {
            debug!(consumer_id = %consumer_id, paused, "Pause change for unknown consumer ignored");
            return;
        };
        if paused {
            consumer.pause();
        } else {
            consumer.resume();
        }

        let changed = match self.store.consumers.get_mut(consumer_id) {
            Some(mut entry) if entry.info.paused != paused => {
                entry.info.paused = paused;
                true
            }
            _ => false,
        };
        if changed {
            self.store.emitter.emit(ClientEvent::ConsumerPauseChanged {
                consumer_id: consumer_id.to_string(),
                paused,
                timestamp: Utc::now(),
            });
            self.store.publish_consumers();
        }
    }

    pub async fn on_active_speaker(&self, speaker: Option<ActiveSpeaker>) {
        self.store.active_speaker.send_replace(speaker.clone());
        self.store.emitter.emit(ClientEvent::ActiveSpeakerChanged {
            speaker,
            timestamp: Utc::now(),
        });
    }

    /// Seed participants listed in the join response
    pub async fn seed_peers(&self, peers: Vec<PeerInfo>) {
        for peer in peers {
            self.on_new_peer(peer).await;
        }
    }

    // ===== LOCAL PARTICIPANT =====

    /// Mirror the local producers into the local participant
    pub fn update_local(&self, state: LocalMediaState) {
        let changed = self.store.local.send_if_modified(|local| {
            if !state.is_producing() {
                return local.take().is_some();
            }
            match local {
                Some(participant) => {
                    let before = (participant.audio_enabled, participant.video_enabled);
                    participant.audio_enabled = state.is_audio_enabled();
                    participant.video_enabled = state.is_video_enabled();
                    before != (participant.audio_enabled, participant.video_enabled)
                }
                None => {
                    let mut participant = Participant::remote(LOCAL_PARTICIPANT_ID, self.display_name.clone(), None);
                    participant.is_local = true;
                    participant.audio_enabled = state.is_audio_enabled();
                    participant.video_enabled = state.is_video_enabled();
                    *local = Some(participant);
                    true
                }
            }
        });
        if changed {
            self.store.publish_participants();
        }
    }

    // ===== QUERIES =====

    pub fn participants(&self) -> Arc<[Participant]> {
        self.store.participants_tx.borrow().clone()
    }

    pub fn subscribe_participants(&self) -> watch::Receiver<Arc<[Participant]>> {
        self.store.participants_tx.subscribe()
    }

    pub fn participant(&self, peer_id: &str) -> Option<Participant> {
        if peer_id == LOCAL_PARTICIPANT_ID {
            return self.store.local.borrow().clone();
        }
        self.store.participants.get(peer_id).map(|p| p.value().clone())
    }

    pub fn remote_participant_count(&self) -> usize {
        self.store.participants.len()
    }

    pub fn consumers(&self) -> Arc<[ConsumerInfo]> {
        self.store.consumers_tx.borrow().clone()
    }

    pub fn subscribe_consumers(&self) -> watch::Receiver<Arc<[ConsumerInfo]>> {
        self.store.consumers_tx.subscribe()
    }

    pub fn consumer_count(&self) -> usize {
        self.store.consumers.len()
    }

    pub fn active_speaker(&self) -> Option<ActiveSpeaker> {
        self.store.active_speaker.borrow().clone()
    }

    pub fn subscribe_active_speaker(&self) -> watch::Receiver<Option<ActiveSpeaker>> {
        self.store.active_speaker.subscribe()
    }

    /// Whether the consumer belongs to the server-confirmed local peer
    pub async fn is_own_consumer(&self, consumer_id: &str) -> bool {
        let Some(owner) = self.store.consumers.get(consumer_id).map(|c| c.info.peer_id.clone()) else {
            return false;
        };
        self.signaling.confirmed_peer_id().await.as_deref() == Some(owner.as_str())
    }

    // ===== TEARDOWN =====

    /// Close every consumer
    pub fn close_consumers(&self) {
        let ids: Vec<String> = self.store.consumers.iter().map(|c| c.key().clone()).collect();
        for consumer_id in ids {
            if let Some((_, consumer)) = self.store.consumers.remove(&consumer_id) {
                consumer.consumer.close();
            }
        }
        for mut participant in self.store.participants.iter_mut() {
            participant.audio_enabled = false;
            participant.video_enabled = false;
        }
        self.store.publish_consumers();
        self.store.publish_participants();
    }

    /// Forget everything learned during the session
    pub fn reset(&self) {
        self.close_consumers();
        self.store.participants.clear();
        self.store.departed.clear();
        self.store.local.send_replace(None);
        self.store.active_speaker.send_replace(None);
        self.store.publish_participants();
        debug!("Remote session state reset");
    }
}
