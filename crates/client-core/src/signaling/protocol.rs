//! Signaling wire protocol: request methods, payloads and notifications

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::MediaKind;
use crate::error::{ClientError, ClientResult};

/// Requests issued by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    GetRouterRtpCapabilities,
    Join,
    CreateWebRtcTransport,
    ConnectWebRtcTransport,
    Produce,
    PauseProducer,
    ResumeProducer,
    CloseProducer,
    ResumeConsumer,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::GetRouterRtpCapabilities => "getRouterRtpCapabilities",
            RequestMethod::Join => "join",
            RequestMethod::CreateWebRtcTransport => "createWebRtcTransport",
            RequestMethod::ConnectWebRtcTransport => "connectWebRtcTransport",
            RequestMethod::Produce => "produce",
            RequestMethod::PauseProducer => "pauseProducer",
            RequestMethod::ResumeProducer => "resumeProducer",
            RequestMethod::CloseProducer => "closeProducer",
            RequestMethod::ResumeConsumer => "resumeConsumer",
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device descriptor exchanged with the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            name: "mediaroom-rust".to_string(),
            version: Some(crate::VERSION.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub display_name: String,
    pub device: DeviceInfo,
    pub rtp_capabilities: Value,
    pub sctp_capabilities: Value,
}

/// Response to `join`; both fields are optional on the wire
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    #[serde(default)]
    pub peer_id: Option<String>,
    #[serde(default)]
    pub peers: Vec<PeerInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransportRequest {
    pub force_tcp: bool,
    pub producing: bool,
    pub consuming: bool,
    pub sctp_capabilities: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportRequest {
    pub transport_id: String,
    pub dtls_parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceRequest {
    pub transport_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    pub app_data: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProduceResponse {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerRequest {
    pub producer_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerRequest {
    pub consumer_id: String,
}

/// A remote participant as announced by `newPeer` or the join response
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub device: Option<DeviceInfo>,
}

/// Payload of `newConsumer`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConsumer {
    pub peer_id: String,
    pub producer_id: String,
    pub id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    #[serde(rename = "type", default)]
    pub consumer_type: String,
    #[serde(default)]
    pub app_data: Value,
    #[serde(default)]
    pub producer_paused: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerIdPayload {
    peer_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsumerIdPayload {
    consumer_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveSpeakerPayload {
    #[serde(default)]
    peer_id: Option<String>,
    #[serde(default)]
    volume: Option<f64>,
}

/// Server-pushed notifications understood by the client
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    NewPeer(PeerInfo),
    PeerClosed { peer_id: String },
    NewConsumer(NewConsumer),
    ConsumerClosed { consumer_id: String },
    ConsumerPaused { consumer_id: String },
    ConsumerResumed { consumer_id: String },
    /// `peer_id` is `None` when nobody is speaking
    ActiveSpeaker { peer_id: Option<String>, volume: f64 },
    Unknown { method: String },
}

impl Notification {
    /// Parse a notification by name. Unknown names are not an error.
    pub fn parse(method: &str, data: Value) -> ClientResult<Self> {
        fn payload<T: serde::de::DeserializeOwned>(method: &str, data: Value) -> ClientResult<T> {
            serde_json::from_value(data).map_err(|e| ClientError::invalid_notification(method, e.to_string()))
        }

        let notification = match method {
            "newPeer" => Notification::NewPeer(payload(method, data)?),
            "peerClosed" => {
                let p: PeerIdPayload = payload(method, data)?;
                Notification::PeerClosed { peer_id: p.peer_id }
            }
            "newConsumer" => Notification::NewConsumer(payload(method, data)?),
            "consumerClosed" => {
                let p: ConsumerIdPayload = payload(method, data)?;
                Notification::ConsumerClosed { consumer_id: p.consumer_id }
            }
            "consumerPaused" => {
                let p: ConsumerIdPayload = payload(method, data)?;
                Notification::ConsumerPaused { consumer_id: p.consumer_id }
            }
            "consumerResumed" => {
                let p: ConsumerIdPayload = payload(method, data)?;
                Notification::ConsumerResumed { consumer_id: p.consumer_id }
            }
            "activeSpeaker" => {
                let p: ActiveSpeakerPayload = payload(method, data)?;
                Notification::ActiveSpeaker {
                    peer_id: p.peer_id,
                    volume: p.volume.unwrap_or_default(),
                }
            }
            other => Notification::Unknown { method: other.to_string() },
        };
        Ok(notification)
    }
}
