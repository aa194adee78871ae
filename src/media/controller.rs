use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;

use super::capture::MediaCaptureProvider;
use super::track::{LocalStream, LocalTrack, ScreenStream};
use crate::error::{CallError, CaptureError, Result};

/// The negotiated outbound video slot. Swapping its track needs no renegotiation.
#[async_trait]
pub trait OutboundVideo: Send + Sync {
    async fn swap_outbound(&self, track: &LocalTrack) -> Result<()>;
}

#[async_trait]
impl OutboundVideo for RTCRtpSender {
    async fn swap_outbound(&self, track: &LocalTrack) -> Result<()> {
        self.replace_track(Some(track.rtc())).await?;
        Ok(())
    }
}

/// Owns the outbound media selection: mic/camera enable flags and the
/// camera/screen substitution on the video sender.
pub struct MediaTrackController {
    provider: Arc<dyn MediaCaptureProvider>,
    stream: Option<LocalStream>,
    screen: Option<ScreenStream>,
    video_sender: Option<Arc<dyn OutboundVideo>>,
    /// Receives the id of a screen track that ended on its own.
    screen_ended_tx: mpsc::UnboundedSender<String>,
}

impl MediaTrackController {
    pub fn new(
        provider: Arc<dyn MediaCaptureProvider>,
        screen_ended_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            provider,
            stream: None,
            screen: None,
            video_sender: None,
            screen_ended_tx,
        }
    }

    /// Request camera + microphone. Any previous capture is released first so
    /// two device handles never coexist.
    pub async fn acquire(&mut self) -> std::result::Result<LocalStream, CaptureError> {
        self.release();
        let stream = self.provider.local_stream().await?;
        info!(
            "Acquired local stream (audio={}, video={})",
            stream.audio.id(),
            stream.video.id()
        );
        self.stream = Some(stream.clone());
        Ok(stream)
    }

    pub fn attach_sender(&mut self, sender: Arc<dyn OutboundVideo>) {
        self.video_sender = Some(sender);
    }

    pub fn local_stream(&self) -> Option<&LocalStream> {
        self.stream.as_ref()
    }

    /// Track currently feeding the video sender.
    pub fn outbound_video(&self) -> Option<&LocalTrack> {
        match &self.screen {
            Some(screen) => Some(&screen.video),
            None => self.stream.as_ref().map(|s| &s.video),
        }
    }

    pub fn is_muted(&self) -> bool {
        self.stream
            .as_ref()
            .map(|s| !s.audio.is_enabled())
            .unwrap_or(false)
    }

    pub fn is_video_enabled(&self) -> bool {
        self.stream
            .as_ref()
            .map(|s| s.video.is_enabled())
            .unwrap_or(false)
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.screen.is_some()
    }

    /// Flip the microphone enable flag. Returns the new muted state.
    pub fn toggle_mute(&mut self) -> bool {
        if let Some(stream) = &self.stream {
            stream.audio.set_enabled(!stream.audio.is_enabled());
            info!("Microphone {}", if stream.audio.is_enabled() { "unmuted" } else { "muted" });
        }
        self.is_muted()
    }

    /// Flip the camera enable flag. Returns whether video is now enabled.
    pub fn toggle_video(&mut self) -> bool {
        if let Some(stream) = &self.stream {
            stream.video.set_enabled(!stream.video.is_enabled());
            info!("Camera {}", if stream.video.is_enabled() { "enabled" } else { "disabled" });
        }
        self.is_video_enabled()
    }

    /// Start or stop screen sharing. Returns whether sharing is now active.
    pub async fn toggle_screen_share(&mut self) -> Result<bool> {
        if self.screen.is_some() {
            self.stop_screen_share().await?;
            return Ok(false);
        }

        let screen = self.provider.screen_stream().await.map_err(|e| {
            warn!("Screen capture refused: {}", e);
            CallError::ScreenShareDenied
        })?;
        if let Err(e) = self.swap_outbound(&screen.video).await {
            screen.stop();
            return Err(e);
        }

        let track = screen.video.clone();
        let tx = self.screen_ended_tx.clone();
        tokio::spawn(async move {
            track.ended().await;
            let _ = tx.send(track.id().to_string());
        });

        info!("Screen sharing started ({})", screen.video.id());
        self.screen = Some(screen);
        Ok(true)
    }

    /// The screen track ended outside our control. Reverts through the same
    /// path as a manual stop; ids of tracks we already dropped are ignored.
    pub async fn screen_track_ended(&mut self, track_id: &str) -> Result<bool> {
        let current = self.screen.as_ref().map(|s| s.video.id());
        if current != Some(track_id) {
            debug!("Ignoring end of stale screen track {}", track_id);
            return Ok(false);
        }
        info!("Screen share ended externally, reverting to camera");
        self.stop_screen_share().await?;
        Ok(true)
    }

    async fn stop_screen_share(&mut self) -> Result<()> {
        let Some(screen) = self.screen.take() else {
            return Ok(());
        };
        let camera = self.stream.as_ref().map(|s| s.video.clone());
        let result = match camera {
            Some(camera) => self.swap_outbound(&camera).await,
            None => Ok(()),
        };
        screen.stop();
        info!("Screen sharing stopped");
        result
    }

    async fn swap_outbound(&self, track: &LocalTrack) -> Result<()> {
        match &self.video_sender {
            Some(sender) => {
                sender.swap_outbound(track).await?;
                debug!("Outbound video now {} ({})", track.label(), track.id());
            }
            None => debug!("No video transceiver, outbound swap skipped"),
        }
        Ok(())
    }

    /// Number of captured tracks still running.
    pub fn owned_tracks(&self) -> usize {
        let stream = self
            .stream
            .iter()
            .flat_map(|s| s.tracks())
            .filter(|t| !t.is_stopped())
            .count();
        let screen = self
            .screen
            .iter()
            .flat_map(|s| std::iter::once(&s.video).chain(s.audio.as_ref()))
            .filter(|t| !t.is_stopped())
            .count();
        stream + screen
    }

    /// Stop every captured track and forget the sender. Returns how many were stopped.
    pub fn release(&mut self) -> usize {
        let count = self.owned_tracks();
        if let Some(screen) = self.screen.take() {
            screen.stop();
        }
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
        self.video_sender = None;
        if count > 0 {
            info!("Released {} captured tracks", count);
        }
        count
    }
}
