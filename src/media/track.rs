use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};
use uuid::Uuid;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

pub const MIME_TYPE_OPUS: &str = "audio/opus";
pub const MIME_TYPE_VP8: &str = "video/VP8";

/// Buffered samples between a capture source and its pump.
const SOURCE_QUEUE: usize = 32;
/// Frames kept for slow tap subscribers (recorder) before they lag.
const TAP_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn codec(&self) -> RTCRtpCodecCapability {
        match self {
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 1,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                ..Default::default()
            },
        }
    }
}

/// One encoded media unit as seen by local consumers (renderer, recorder).
#[derive(Debug, Clone)]
pub struct MediaFrame {
    pub kind: TrackKind,
    pub data: Bytes,
    pub duration: Duration,
}

/// A captured outbound track.
///
/// Cloning yields another handle to the same track; identity is the `id`.
/// Disabling keeps the capture alive but stops forwarding samples, so
/// re-enabling needs no new permission. Stopping releases the source.
#[derive(Clone)]
pub struct LocalTrack {
    inner: Arc<TrackInner>,
}

struct TrackInner {
    id: String,
    kind: TrackKind,
    label: String,
    rtc: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    frames: broadcast::Sender<MediaFrame>,
    stop_tx: watch::Sender<bool>,
    ended_rx: watch::Receiver<bool>,
}

impl LocalTrack {
    /// Create a track fed by the returned sender. The track ends when the
    /// sender is dropped or `stop()` is called.
    pub fn channel(kind: TrackKind, label: &str, stream_id: &str) -> (Self, mpsc::Sender<Sample>) {
        let (tx, rx) = mpsc::channel(SOURCE_QUEUE);
        (Self::spawn(kind, label, stream_id, rx), tx)
    }

    /// Wrap a sample source and start pumping it into the RTP track.
    pub fn spawn(
        kind: TrackKind,
        label: &str,
        stream_id: &str,
        mut source: mpsc::Receiver<Sample>,
    ) -> Self {
        let id = Uuid::new_v4().to_string();
        let rtc = Arc::new(TrackLocalStaticSample::new(
            kind.codec(),
            id.clone(),
            stream_id.to_string(),
        ));
        let (frames, _) = broadcast::channel(TAP_CAPACITY);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let (ended_tx, ended_rx) = watch::channel(false);

        let inner = Arc::new(TrackInner {
            id,
            kind,
            label: label.to_string(),
            rtc,
            enabled: AtomicBool::new(true),
            frames,
            stop_tx,
            ended_rx,
        });

        let weak: Weak<TrackInner> = Arc::downgrade(&inner);
        let track_id = inner.id.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    sample = source.recv() => {
                        let Some(sample) = sample else {
                            debug!("Source for track {} finished", track_id);
                            break;
                        };
                        let Some(track) = weak.upgrade() else { break };
                        if !track.enabled.load(Ordering::Relaxed) {
                            continue;
                        }
                        let frame = MediaFrame {
                            kind,
                            data: sample.data.clone(),
                            duration: sample.duration,
                        };
                        if let Err(e) = track.rtc.write_sample(&sample).await {
                            debug!("Failed to write sample on {}: {}", track_id, e);
                        }
                        let _ = track.frames.send(frame);
                    }
                }
            }
            let _ = ended_tx.send(true);
        });

        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
    }

    /// The RTP-facing track handed to a sender.
    pub fn rtc(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        self.inner.rtc.clone()
    }

    /// Local tap of forwarded frames.
    pub fn subscribe(&self) -> broadcast::Receiver<MediaFrame> {
        self.inner.frames.subscribe()
    }

    pub fn stop(&self) {
        if !*self.inner.stop_tx.borrow() {
            info!("Stopping {} track {}", self.inner.label, self.inner.id);
        }
        self.inner.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.stop_tx.borrow()
    }

    pub fn is_ended(&self) -> bool {
        *self.inner.ended_rx.borrow()
    }

    /// Resolves once the track has ended, whether stopped here or by its source.
    pub async fn ended(&self) {
        let mut rx = self.inner.ended_rx.clone();
        let _ = rx.wait_for(|ended| *ended).await;
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("label", &self.inner.label)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Camera + microphone capture result.
#[derive(Debug, Clone)]
pub struct LocalStream {
    pub audio: LocalTrack,
    pub video: LocalTrack,
}

impl LocalStream {
    pub fn tracks(&self) -> [&LocalTrack; 2] {
        [&self.audio, &self.video]
    }

    pub fn stop(&self) {
        for track in self.tracks() {
            track.stop();
        }
    }
}

/// Screen capture result; system audio is optional.
#[derive(Debug, Clone)]
pub struct ScreenStream {
    pub video: LocalTrack,
    pub audio: Option<LocalTrack>,
}

impl ScreenStream {
    pub fn stop(&self) {
        self.video.stop();
        if let Some(audio) = &self.audio {
            audio.stop();
        }
    }
}
