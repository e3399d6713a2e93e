//! Local media production
//!
//! Acquires camera and microphone, publishes them as producers over the send
//! transport and keeps the derived enablement flags.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::client::config::MediaConstraints;
use crate::client::types::{LocalMediaState, ProducerState};
use crate::engine::{CloseReason, MediaDevices, MediaKind, MediaStream, MediaTrack, ProduceOptions, Producer};
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, EventEmitter};
use crate::signaling::protocol::ProducerRequest;
use crate::signaling::{RequestMethod, SignalingSession};
use crate::transport::TransportManager;

const KINDS: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

struct ProducerEntry {
    id: String,
    producer: Arc<dyn Producer>,
}

/// Producers by kind plus the published flags derived from them
struct ProducerSet {
    producers: DashMap<MediaKind, ProducerEntry>,
    state: watch::Sender<LocalMediaState>,
    emitter: EventEmitter,
}

impl ProducerSet {
    fn new(emitter: EventEmitter) -> Self {
        let (state, _) = watch::channel(LocalMediaState::default());
        Self {
            producers: DashMap::new(),
            state,
            emitter,
        }
    }

    fn get(&self, kind: MediaKind) -> Option<Arc<dyn Producer>> {
        self.producers.get(&kind).map(|entry| entry.producer.clone())
    }

    fn insert(&self, producer: Arc<dyn Producer>) -> Option<Arc<dyn Producer>> {
        let kind = producer.kind();
        let entry = ProducerEntry { id: producer.id(), producer };
        let previous = self.producers.insert(kind, entry).map(|old| old.producer);
        self.publish();
        previous
    }

    fn remove(&self, kind: MediaKind) -> Option<Arc<dyn Producer>> {
        let removed = self.producers.remove(&kind).map(|(_, entry)| entry.producer);
        if removed.is_some() {
            self.publish();
        }
        removed
    }

    /// Drop the producer of `kind` only if it is still the one with `producer_id`
    fn drop_if_current(&self, kind: MediaKind, producer_id: &str) -> bool {
        let dropped = self
            .producers
            .remove_if(&kind, |_, entry| entry.id == producer_id)
            .is_some();
        if dropped {
            self.publish();
        }
        dropped
    }

    fn len(&self) -> usize {
        self.producers.len()
    }

    /// Recompute the flags and announce the kinds whose state changed
    fn publish(&self) {
        let mut next = LocalMediaState::default();
        for kind in KINDS {
            let state = match self.get(kind) {
                None => ProducerState::Absent,
                Some(producer) if producer.paused() => ProducerState::Paused,
                Some(_) => ProducerState::Active,
            };
            match kind {
                MediaKind::Audio => next.audio = state,
                MediaKind::Video => next.video = state,
            }
        }

        let previous = self.state.send_replace(next);
        for kind in KINDS {
            if previous.state(kind) != next.state(kind) {
                self.emitter.emit(ClientEvent::ProducerStateChanged {
                    kind,
                    state: next.state(kind),
                    timestamp: Utc::now(),
                });
            }
        }
    }
}

pub struct MediaProductionManager {
    devices: Arc<dyn MediaDevices>,
    signaling: Arc<SignalingSession>,
    transports: Arc<TransportManager>,
    constraints: MediaConstraints,
    emitter: EventEmitter,
    producers: Arc<ProducerSet>,
    local_stream: Arc<watch::Sender<Option<MediaStream>>>,
}

impl MediaProductionManager {
    pub fn new(
        devices: Arc<dyn MediaDevices>,
        signaling: Arc<SignalingSession>,
        transports: Arc<TransportManager>,
        constraints: MediaConstraints,
        emitter: EventEmitter,
    ) -> Self {
        let (local_stream, _) = watch::channel(None);
        Self {
            devices,
            signaling,
            transports,
            constraints,
            producers: Arc::new(ProducerSet::new(emitter.clone())),
            emitter,
            local_stream: Arc::new(local_stream),
        }
    }

    /// Acquire local media and produce one track per requested kind.
    ///
    /// A kind that is already being produced is replaced by the new track.
    /// When producing one kind fails the other kind is still produced; only
    /// when nothing could be produced is the first failure returned.
    pub async fn start_producing(&self, enable_video: bool, enable_audio: bool) -> ClientResult<MediaStream> {
        if !enable_video && !enable_audio {
            return Err(ClientError::InvalidConfiguration {
                field: "start_producing".to_string(),
                reason: "neither audio nor video requested".to_string(),
            });
        }

        let send_transport = self.transports.send_transport().await?;

        let constraints = self.constraints.select(enable_video, enable_audio);
        let mut stream = self.devices.get_user_media(&constraints).await.map_err(|e| {
            warn!(error = %e, "Media device access failed");
            ClientError::hardware_access(format!("{:#}", e))
        })?;

        let mut produced = 0;
        let mut first_error = None;
        for kind in KINDS {
            let requested = match kind {
                MediaKind::Audio => enable_audio,
                MediaKind::Video => enable_video,
            };
            if !requested {
                continue;
            }
            let Some(track) = stream.track(kind) else {
                warn!(kind = %kind, "No local track acquired for requested kind");
                continue;
            };

            if self.producers.get(kind).is_some() {
                debug!(kind = %kind, "Replacing existing producer");
                if let Err(e) = self.close_producer(kind).await {
                    warn!(kind = %kind, error = %e, "Failed to close replaced producer");
                }
            }

            let options = ProduceOptions {
                track: track.clone(),
                codec_options: codec_options(kind),
                app_data: json!({ "source": source_name(kind) }),
            };
            match send_transport.produce(options).await {
                Ok(producer) => {
                    self.register(producer);
                    produced += 1;
                }
                Err(e) => {
                    let error = ClientError::ProduceFailed {
                        kind,
                        reason: format!("{:#}", e),
                    };
                    warn!(kind = %kind, error = %error, "Failed to produce track");
                    self.emitter.report_error(error.clone(), Some("produce"));
                    track.stop();
                    stream.remove(kind);
                    first_error.get_or_insert(error);
                }
            }
        }

        if produced == 0 {
            if let Some(error) = first_error {
                return Err(error);
            }
        }

        self.local_stream.send_modify(|current| {
            *current = Some(match current.as_ref() {
                Some(existing) => existing.merged(&stream),
                None => stream.clone(),
            });
        });
        info!(
            video = self.is_video_enabled(),
            audio = self.is_audio_enabled(),
            "Local media production started"
        );
        Ok(stream)
    }

    fn register(&self, producer: Arc<dyn Producer>) {
        let kind = producer.kind();
        let producer_id = producer.id();
        let producers = Arc::downgrade(&self.producers);
        let local_stream = Arc::downgrade(&self.local_stream);
        let closed_id = producer_id.clone();
        producer.on_close(Box::new(move |reason: CloseReason| {
            let Some(producers) = producers.upgrade() else {
                return;
            };
            if !producers.drop_if_current(kind, &closed_id) {
                return;
            }
            debug!(kind = %kind, producer_id = %closed_id, reason = ?reason, "Producer closed underneath us");
            if let Some(track) = local_stream.upgrade().and_then(|stream| release_track(&stream, kind)) {
                track.stop();
            }
        }));

        debug!(kind = %kind, producer_id = %producer_id, "Producer registered");
        if let Some(previous) = self.producers.insert(producer) {
            previous.close();
        }
    }

    /// Pause the producer of `kind`; a no-op when absent or already paused
    pub async fn pause_producer(&self, kind: MediaKind) -> ClientResult<()> {
        let Some(producer) = self.producers.get(kind) else {
            debug!(kind = %kind, "No producer to pause");
            return Ok(());
        };
        if producer.paused() {
            return Ok(());
        }

        producer.pause();
        self.producers.publish();
        self.producer_request(RequestMethod::PauseProducer, &producer).await
    }

    /// Resume the producer of `kind`; a no-op when absent or not paused
    pub async fn resume_producer(&self, kind: MediaKind) -> ClientResult<()> {
        let Some(producer) = self.producers.get(kind) else {
            debug!(kind = %kind, "No producer to resume");
            return Ok(());
        };
        if !producer.paused() {
            return Ok(());
        }

        producer.resume();
        self.producers.publish();
        self.producer_request(RequestMethod::ResumeProducer, &producer).await
    }

    /// Close the producer of `kind`; the local reference is cleared even when
    /// the server request fails
    pub async fn close_producer(&self, kind: MediaKind) -> ClientResult<()> {
        let Some(producer) = self.producers.remove(kind) else {
            debug!(kind = %kind, "No producer to close");
            return Ok(());
        };

        producer.close();
        if let Some(track) = release_track(&self.local_stream, kind) {
            track.stop();
        }

        self.producer_request(RequestMethod::CloseProducer, &producer).await
    }

    async fn producer_request(&self, method: RequestMethod, producer: &Arc<dyn Producer>) -> ClientResult<()> {
        let payload = serde_json::to_value(ProducerRequest {
            producer_id: producer.id(),
        })
        .map_err(|e| ClientError::internal_error(e.to_string()))?;

        match self.signaling.request(method, payload).await {
            Ok(_) => {
                debug!(method = %method, producer_id = %producer.id(), "Producer request applied");
                Ok(())
            }
            Err(e) => {
                warn!(method = %method, producer_id = %producer.id(), error = %e, "Producer request failed, keeping local state");
                Err(e)
            }
        }
    }

    /// Mute or unmute the microphone, starting it when absent.
    ///
    /// Returns whether audio is enabled afterwards.
    pub async fn toggle_audio(&self) -> ClientResult<bool> {
        match self.producers.get(MediaKind::Audio) {
            None => {
                self.start_producing(false, true).await?;
            }
            Some(producer) if producer.paused() => self.resume_producer(MediaKind::Audio).await?,
            Some(_) => self.pause_producer(MediaKind::Audio).await?,
        }
        Ok(self.is_audio_enabled())
    }

    /// Turn the camera on or off; off closes the video producer.
    ///
    /// Returns whether video is enabled afterwards.
    pub async fn toggle_video(&self) -> ClientResult<bool> {
        match self.producers.get(MediaKind::Video) {
            None => {
                self.start_producing(true, false).await?;
            }
            Some(_) => self.close_producer(MediaKind::Video).await?,
        }
        Ok(self.is_video_enabled())
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.local_state().is_audio_enabled()
    }

    pub fn is_video_enabled(&self) -> bool {
        self.local_state().is_video_enabled()
    }

    pub fn local_state(&self) -> LocalMediaState {
        *self.producers.state.borrow()
    }

    pub fn subscribe_local_state(&self) -> watch::Receiver<LocalMediaState> {
        self.producers.state.subscribe()
    }

    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.local_stream.borrow().clone()
    }

    pub fn subscribe_local_stream(&self) -> watch::Receiver<Option<MediaStream>> {
        self.local_stream.subscribe()
    }

    /// Close every producer and release the local tracks without telling the server
    pub fn close_all(&self) {
        for kind in KINDS {
            if let Some(producer) = self.producers.remove(kind) {
                producer.close();
            }
        }
        if let Some(stream) = self.local_stream.send_replace(None) {
            stream.stop();
        }
        debug!("Local media production closed");
    }
}

/// Take the track of `kind` out of the published stream, clearing it when empty
fn release_track(local_stream: &watch::Sender<Option<MediaStream>>, kind: MediaKind) -> Option<Arc<dyn MediaTrack>> {
    let mut released = None;
    local_stream.send_if_modified(|current| {
        let Some(stream) = current.as_mut() else {
            return false;
        };
        released = stream.remove(kind);
        if stream.is_empty() {
            *current = None;
        }
        released.is_some()
    });
    released
}

fn codec_options(kind: MediaKind) -> Value {
    match kind {
        MediaKind::Audio => json!({ "opusStereo": false, "opusDtx": true }),
        MediaKind::Video => json!({ "videoGoogleStartBitrate": 1000 }),
    }
}

fn source_name(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Audio => "mic",
        MediaKind::Video => "webcam",
    }
}
