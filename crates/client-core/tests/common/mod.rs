//! In-memory collaborators for behaviour tests: a scripted signaling server,
//! a media engine whose transports invoke the registered callbacks, and media
//! devices that hand out fake tracks.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use mediaroom_client_core::client::MediaConstraints;
use mediaroom_client_core::engine::{
    CloseHandler, CloseReason, ConnectHandler, ConsumeOptions, Consumer, MediaDevices, MediaEngine, MediaKind,
    MediaStream, MediaTrack, MediaTransport, ProduceHandler, ProduceOptions, ProduceParameters, Producer,
    TransportDirection, TransportOptions,
};
use mediaroom_client_core::signaling::{PeerConnection, PeerEvent, SignalingConnector, SignalingPeer};
use mediaroom_client_core::{RetryConfig, RoomClient, RoomClientBuilder};

pub const SERVER: &str = "media.example.com:4443";
pub const ROOM: &str = "4";
pub const DISPLAY_NAME: &str = "Alice";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("mediaroom_client_core=debug")
        .with_test_writer()
        .try_init();
}

// ===== SIGNALING SERVER =====

/// How a freshly created peer behaves
#[derive(Debug, Clone)]
pub enum OpenBehavior {
    Open,
    Fail(String),
    /// Never emits anything; the open wait has to time out
    Silent,
}

#[derive(Default)]
struct ServerState {
    open_script: VecDeque<OpenBehavior>,
    default_open: Option<OpenBehavior>,
    assigned_peer_id: Option<String>,
    join_peers: Vec<Value>,
    failures: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    /// Sent to the peer right after it joins
    join_notifications: Vec<(String, Value)>,
    requests: Vec<(String, Value)>,
    attempts: Vec<Instant>,
    urls: Vec<Url>,
    events: Option<mpsc::UnboundedSender<PeerEvent>>,
    /// Senders of silent peers, kept so their channels stay open
    parked: Vec<mpsc::UnboundedSender<PeerEvent>>,
    transports: usize,
}

#[derive(Default)]
pub struct FakeServer {
    state: Mutex<ServerState>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_default_open(&self, behavior: OpenBehavior) {
        self.state.lock().unwrap().default_open = Some(behavior);
    }

    pub fn script_open(&self, behaviors: impl IntoIterator<Item = OpenBehavior>) {
        self.state.lock().unwrap().open_script.extend(behaviors);
    }

    /// Peer id the server returns from `join`
    pub fn assign_peer_id(&self, peer_id: &str) {
        self.state.lock().unwrap().assigned_peer_id = Some(peer_id.to_string());
    }

    /// Peers listed in the `join` response
    pub fn add_join_peer(&self, peer: Value) {
        self.state.lock().unwrap().join_peers.push(peer);
    }

    pub fn fail_method(&self, method: &str, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(method.to_string(), reason.to_string());
    }

    /// Reject `produce` requests for one kind only
    pub fn fail_produce(&self, kind: &str, reason: &str) {
        self.fail_method(&format!("produce:{}", kind), reason);
    }

    /// Hold responses to `method` back for `delay`
    pub fn delay_method(&self, method: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delays
            .insert(method.to_string(), delay);
    }

    /// Queue a notification the server pushes as soon as `join` is answered
    pub fn notify_on_join(&self, method: &str, data: Value) {
        self.state
            .lock()
            .unwrap()
            .join_notifications
            .push((method.to_string(), data));
    }

    fn delay_for(&self, method: &str) -> Option<Duration> {
        self.state.lock().unwrap().delays.get(method).copied()
    }

    pub fn clear_failure(&self, method: &str) {
        self.state.lock().unwrap().failures.remove(method);
    }

    pub fn requests(&self) -> Vec<(String, Value)> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn requests_for(&self, method: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|(m, _)| m == method)
            .map(|(_, data)| data)
            .collect()
    }

    pub fn request_methods(&self) -> Vec<String> {
        self.requests().into_iter().map(|(m, _)| m).collect()
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.state.lock().unwrap().attempts.clone()
    }

    pub fn urls(&self) -> Vec<Url> {
        self.state.lock().unwrap().urls.clone()
    }

    /// Push an event into the current peer's stream
    pub fn emit(&self, event: PeerEvent) {
        if let Some(tx) = self.state.lock().unwrap().events.as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn notify(&self, method: &str, data: Value) {
        self.emit(PeerEvent::Notification {
            method: method.to_string(),
            data,
        });
    }

    fn open_peer(self: &Arc<Self>, url: &Url) -> PeerConnection {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        state.attempts.push(Instant::now());
        state.urls.push(url.clone());

        let behavior = state
            .open_script
            .pop_front()
            .or_else(|| state.default_open.clone())
            .unwrap_or(OpenBehavior::Open);
        match behavior {
            OpenBehavior::Open => {
                let _ = tx.send(PeerEvent::Open);
                state.events = Some(tx);
            }
            OpenBehavior::Fail(reason) => {
                let _ = tx.send(PeerEvent::Failed { reason });
                state.parked.push(tx);
            }
            OpenBehavior::Silent => state.parked.push(tx),
        }

        PeerConnection {
            peer: Arc::new(FakePeer {
                server: self.clone(),
                closed: AtomicBool::new(false),
            }),
            events: rx,
        }
    }

    fn handle(&self, method: &str, data: Value) -> anyhow::Result<Value> {
        let mut state = self.state.lock().unwrap();
        state.requests.push((method.to_string(), data.clone()));
        if let Some(reason) = state.failures.get(method) {
            return Err(anyhow::anyhow!("{}", reason));
        }
        if method == "produce" {
            let key = format!("produce:{}", data["kind"].as_str().unwrap_or_default());
            if let Some(reason) = state.failures.get(&key) {
                return Err(anyhow::anyhow!("{}", reason));
            }
        }

        let response = match method {
            "getRouterRtpCapabilities" => json!({
                "codecs": [
                    {"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2},
                    {"kind": "video", "mimeType": "video/VP8", "clockRate": 90000}
                ]
            }),
            "join" => {
                let mut response = json!({ "peers": state.join_peers.clone() });
                if let Some(peer_id) = &state.assigned_peer_id {
                    response["peerId"] = json!(peer_id);
                }
                let notifications: Vec<(String, Value)> = state.join_notifications.drain(..).collect();
                if let Some(tx) = &state.events {
                    for (method, data) in notifications {
                        let _ = tx.send(PeerEvent::Notification { method, data });
                    }
                }
                response
            }
            "createWebRtcTransport" => {
                state.transports += 1;
                json!({
                    "id": format!("transport-{}", state.transports),
                    "iceParameters": {"usernameFragment": "frag", "password": "pwd"},
                    "iceCandidates": [],
                    "dtlsParameters": {"role": "auto", "fingerprints": []}
                })
            }
            "produce" => json!({ "id": format!("producer-{}", data["kind"].as_str().unwrap_or("unknown")) }),
            _ => json!({}),
        };
        Ok(response)
    }
}

pub struct FakeConnector {
    server: Arc<FakeServer>,
}

impl FakeConnector {
    pub fn new(server: &Arc<FakeServer>) -> Arc<Self> {
        Arc::new(Self { server: server.clone() })
    }
}

#[async_trait]
impl SignalingConnector for FakeConnector {
    async fn connect(&self, url: &Url) -> anyhow::Result<PeerConnection> {
        Ok(self.server.open_peer(url))
    }
}

pub struct FakePeer {
    server: Arc<FakeServer>,
    closed: AtomicBool,
}

#[async_trait]
impl SignalingPeer for FakePeer {
    async fn request(&self, method: &str, data: Value) -> anyhow::Result<Value> {
        match self.server.delay_for(method) {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        self.server.handle(method, data)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ===== MEDIA =====

#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    kind: MediaKind,
    live: AtomicBool,
}

impl FakeTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            live: AtomicBool::new(true),
        })
    }
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct FakeDevices {
    pub deny: AtomicBool,
    pub calls: AtomicUsize,
    pub tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn get_user_media(&self, constraints: &MediaConstraints) -> anyhow::Result<MediaStream> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.deny.load(Ordering::SeqCst) {
            anyhow::bail!("Permission denied by user");
        }

        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
        if constraints.audio.is_some() {
            let track = FakeTrack::new(format!("mic-{}", call), MediaKind::Audio);
            self.tracks.lock().unwrap().push(track.clone());
            tracks.push(track);
        }
        if let Some(video) = &constraints.video {
            let track = FakeTrack::new(format!("cam-{}x{}-{}", video.width, video.height, call), MediaKind::Video);
            self.tracks.lock().unwrap().push(track.clone());
            tracks.push(track);
        }
        Ok(MediaStream::new(tracks))
    }
}

#[derive(Default)]
struct CloseSlot(Mutex<Option<CloseHandler>>);

impl CloseSlot {
    fn set(&self, handler: CloseHandler) {
        *self.0.lock().unwrap() = Some(handler);
    }

    fn fire(&self, reason: CloseReason) {
        let handler = self.0.lock().unwrap().take();
        if let Some(handler) = handler {
            handler(reason);
        }
    }
}

pub struct FakeProducer {
    id: String,
    kind: MediaKind,
    paused: AtomicBool,
    closed: AtomicBool,
    on_close: CloseSlot,
}

impl std::fmt::Debug for FakeProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeProducer").field("id", &self.id).finish()
    }
}

impl FakeProducer {
    /// Simulate the track ending or the transport closing
    pub fn fire(&self, reason: CloseReason) {
        self.closed.store(true, Ordering::SeqCst);
        self.on_close.fire(reason);
    }
}

impl Producer for FakeProducer {
    fn id(&self) -> String {
        self.id.clone()
    }
    fn kind(&self) -> MediaKind {
        self.kind
    }
    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }
    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
    fn on_close(&self, handler: CloseHandler) {
        self.on_close.set(handler);
    }
}

pub struct FakeConsumer {
    id: String,
    producer_id: String,
    kind: MediaKind,
    track: Arc<FakeTrack>,
    paused: AtomicBool,
    closed: AtomicBool,
    on_close: CloseSlot,
}

impl std::fmt::Debug for FakeConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeConsumer").field("id", &self.id).finish()
    }
}

impl FakeConsumer {
    pub fn fire(&self, reason: CloseReason) {
        self.closed.store(true, Ordering::SeqCst);
        self.on_close.fire(reason);
    }
}

impl Consumer for FakeConsumer {
    fn id(&self) -> String {
        self.id.clone()
    }
    fn producer_id(&self) -> String {
        self.producer_id.clone()
    }
    fn kind(&self) -> MediaKind {
        self.kind
    }
    fn track(&self) -> Arc<dyn MediaTrack> {
        self.track.clone()
    }
    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }
    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
    fn on_close(&self, handler: CloseHandler) {
        self.on_close.set(handler);
    }
}

pub struct FakeTransport {
    id: String,
    direction: TransportDirection,
    connect_handler: Mutex<Option<ConnectHandler>>,
    produce_handler: Mutex<Option<ProduceHandler>>,
    connected: AtomicBool,
    closed: AtomicBool,
    fail_consume: Arc<AtomicBool>,
    pub producers: Mutex<Vec<Arc<FakeProducer>>>,
    pub consumers: Mutex<Vec<Arc<FakeConsumer>>>,
}

impl std::fmt::Debug for FakeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeTransport")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .finish()
    }
}

impl FakeTransport {
    /// Run the connect callback the first time media flows, like a real engine
    async fn ensure_connected(&self) -> anyhow::Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let handler = self.connect_handler.lock().unwrap().clone();
        let handler = handler.ok_or_else(|| anyhow::anyhow!("no connect handler"))?;
        handler(json!({"role": "client", "fingerprints": []})).await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn producer(&self, kind: MediaKind) -> Option<Arc<FakeProducer>> {
        self.producers
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|p| p.kind == kind)
            .cloned()
    }

    pub fn consumer(&self, id: &str) -> Option<Arc<FakeConsumer>> {
        self.consumers.lock().unwrap().iter().find(|c| c.id == id).cloned()
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn direction(&self) -> TransportDirection {
        self.direction
    }

    fn on_connect(&self, handler: ConnectHandler) {
        *self.connect_handler.lock().unwrap() = Some(handler);
    }

    fn on_produce(&self, handler: ProduceHandler) {
        *self.produce_handler.lock().unwrap() = Some(handler);
    }

    async fn produce(&self, options: ProduceOptions) -> anyhow::Result<Arc<dyn Producer>> {
        self.ensure_connected().await?;
        let handler = self.produce_handler.lock().unwrap().clone();
        let handler = handler.ok_or_else(|| anyhow::anyhow!("no produce handler"))?;

        let kind = options.track.kind();
        let id = handler(ProduceParameters {
            kind,
            rtp_parameters: json!({"codecs": [], "encodings": []}),
            app_data: options.app_data,
        })
        .await?;

        let producer = Arc::new(FakeProducer {
            id,
            kind,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            on_close: CloseSlot::default(),
        });
        self.producers.lock().unwrap().push(producer.clone());
        Ok(producer)
    }

    async fn consume(&self, options: ConsumeOptions) -> anyhow::Result<Arc<dyn Consumer>> {
        if self.fail_consume.load(Ordering::SeqCst) {
            anyhow::bail!("unsupported rtp parameters");
        }
        self.ensure_connected().await?;

        let consumer = Arc::new(FakeConsumer {
            track: FakeTrack::new(format!("remote-{}", options.id), options.kind),
            id: options.id,
            producer_id: options.producer_id,
            kind: options.kind,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            on_close: CloseSlot::default(),
        });
        self.consumers.lock().unwrap().push(consumer.clone());
        Ok(consumer)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeEngine {
    loaded: AtomicBool,
    pub load_calls: AtomicUsize,
    pub reject_load: Mutex<Option<String>>,
    pub fail_send_transport: AtomicBool,
    pub fail_recv_transport: AtomicBool,
    pub fail_consume: Arc<AtomicBool>,
    pub transports: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeEngine {
    pub fn transport(&self, direction: TransportDirection) -> Option<Arc<FakeTransport>> {
        self.transports
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|t| t.direction == direction)
            .cloned()
    }

    pub fn send(&self) -> Arc<FakeTransport> {
        self.transport(TransportDirection::Send).expect("send transport created")
    }

    pub fn recv(&self) -> Arc<FakeTransport> {
        self.transport(TransportDirection::Recv).expect("recv transport created")
    }

    fn create(&self, direction: TransportDirection, options: TransportOptions) -> Arc<dyn MediaTransport> {
        let transport = Arc::new(FakeTransport {
            id: options.id,
            direction,
            connect_handler: Mutex::new(None),
            produce_handler: Mutex::new(None),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fail_consume: self.fail_consume.clone(),
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
        });
        self.transports.lock().unwrap().push(transport.clone());
        transport
    }
}

#[async_trait]
impl MediaEngine for FakeEngine {
    fn loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn load(&self, router_rtp_capabilities: Value) -> anyhow::Result<()> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.reject_load.lock().unwrap().clone() {
            anyhow::bail!("{}", reason);
        }
        if router_rtp_capabilities.get("codecs").is_none() {
            anyhow::bail!("router capabilities without codecs");
        }
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn rtp_capabilities(&self) -> anyhow::Result<Value> {
        anyhow::ensure!(self.loaded(), "device not loaded");
        Ok(json!({"codecs": [{"mimeType": "audio/opus"}, {"mimeType": "video/VP8"}]}))
    }

    fn sctp_capabilities(&self) -> anyhow::Result<Value> {
        anyhow::ensure!(self.loaded(), "device not loaded");
        Ok(json!({"numStreams": {"OS": 1024, "MIS": 1024}}))
    }

    fn create_send_transport(&self, options: TransportOptions) -> anyhow::Result<Arc<dyn MediaTransport>> {
        if self.fail_send_transport.load(Ordering::SeqCst) {
            anyhow::bail!("ICE parameters rejected");
        }
        Ok(self.create(TransportDirection::Send, options))
    }

    fn create_recv_transport(&self, options: TransportOptions) -> anyhow::Result<Arc<dyn MediaTransport>> {
        if self.fail_recv_transport.load(Ordering::SeqCst) {
            anyhow::bail!("DTLS parameters rejected");
        }
        Ok(self.create(TransportDirection::Recv, options))
    }
}

// ===== HARNESS =====

pub struct Harness {
    pub server: Arc<FakeServer>,
    pub engine: Arc<FakeEngine>,
    pub devices: Arc<FakeDevices>,
    pub client: Arc<RoomClient>,
}

pub async fn harness_with(server: Arc<FakeServer>, retry: RetryConfig) -> Harness {
    init_tracing();
    let engine = Arc::new(FakeEngine::default());
    let devices = Arc::new(FakeDevices::default());
    let client = RoomClientBuilder::new()
        .server_address(SERVER)
        .room_id(ROOM)
        .display_name(DISPLAY_NAME)
        .retry(retry)
        .signaling_connector(FakeConnector::new(&server))
        .media_engine(engine.clone())
        .media_devices(devices.clone())
        .build()
        .await
        .expect("client builds");

    Harness {
        server,
        engine,
        devices,
        client,
    }
}

pub async fn harness(server: Arc<FakeServer>) -> Harness {
    harness_with(server, RetryConfig::connect()).await
}

/// A client that already joined the room
pub async fn joined(server: Arc<FakeServer>) -> Harness {
    let h = harness(server).await;
    h.client.join().await.expect("join succeeds");
    h
}

/// Poll `condition` until it holds, failing the test after two (virtual or
/// real) seconds
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn peer(id: &str, display_name: &str) -> Value {
    json!({
        "id": id,
        "displayName": display_name,
        "device": {"name": "Firefox", "version": "128.0"}
    })
}

pub fn new_consumer(peer_id: &str, consumer_id: &str, kind: &str) -> Value {
    json!({
        "peerId": peer_id,
        "producerId": format!("{}-{}-producer", peer_id, kind),
        "id": consumer_id,
        "kind": kind,
        "rtpParameters": {"codecs": [], "encodings": [{"ssrc": 1111}]},
        "type": "simple",
        "appData": {},
        "producerPaused": false
    })
}
