// Local media controls for the room client
//
// Start, pause, resume and close local producers. Every failure is also
// published as the session's last error.

use tracing::info;

use crate::client::types::ConnectionStatus;
use crate::engine::{MediaKind, MediaStream};
use crate::error::{ClientError, ClientResult};

/// Local media operations implementation for RoomClient
impl super::manager::RoomClient {
    fn ensure_connected(&self) -> ClientResult<()> {
        match self.signaling.status() {
            ConnectionStatus::Connected => Ok(()),
            _ => Err(ClientError::NotConnected),
        }
    }

    /// Acquire camera and/or microphone and publish them
    pub async fn start_producing(&self, enable_video: bool, enable_audio: bool) -> ClientResult<MediaStream> {
        self.ensure_connected()?;
        info!(video = enable_video, audio = enable_audio, "Starting local media");

        let result = self.production.start_producing(enable_video, enable_audio).await;
        self.sync_local();
        self.observe(result, "start_producing")
    }

    pub async fn pause_producer(&self, kind: MediaKind) -> ClientResult<()> {
        let result = self.production.pause_producer(kind).await;
        self.sync_local();
        self.observe(result, "pause_producer")
    }

    pub async fn resume_producer(&self, kind: MediaKind) -> ClientResult<()> {
        let result = self.production.resume_producer(kind).await;
        self.sync_local();
        self.observe(result, "resume_producer")
    }

    pub async fn close_producer(&self, kind: MediaKind) -> ClientResult<()> {
        let result = self.production.close_producer(kind).await;
        self.sync_local();
        self.observe(result, "close_producer")
    }

    /// Mute/unmute, starting the microphone if needed; returns the new audio state
    pub async fn toggle_audio(&self) -> ClientResult<bool> {
        self.ensure_connected()?;
        let result = self.production.toggle_audio().await;
        self.sync_local();
        self.observe(result, "toggle_audio")
    }

    /// Camera on/off; returns the new video state
    pub async fn toggle_video(&self) -> ClientResult<bool> {
        self.ensure_connected()?;
        let result = self.production.toggle_video().await;
        self.sync_local();
        self.observe(result, "toggle_video")
    }

    pub fn is_audio_enabled(&self) -> bool {
        self.production.is_audio_enabled()
    }

    pub fn is_video_enabled(&self) -> bool {
        self.production.is_video_enabled()
    }

    fn sync_local(&self) {
        self.remote.update_local(self.production.local_state());
    }
}
