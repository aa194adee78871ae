use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::media::io::ivf_reader::IVFReader;
use webrtc::media::Sample;

use super::codec::{self, OpusEncoder};
use super::track::{LocalStream, LocalTrack, ScreenStream, TrackKind};
use crate::config::SessionConfig;
use crate::error::CaptureError;

const STREAM_ID: &str = "peercall-local";
const SCREEN_STREAM_ID: &str = "peercall-screen";
const FALLBACK_FRAME_DURATION: Duration = Duration::from_millis(33);
const MIN_FRAME_DURATION: Duration = Duration::from_millis(5);

/// Supplies captured media. The session engine only calls this; device
/// access, permission prompts and pickers live behind it.
#[async_trait]
pub trait MediaCaptureProvider: Send + Sync {
    /// Microphone + camera.
    async fn local_stream(&self) -> Result<LocalStream, CaptureError>;

    /// Screen (and optionally system audio). Refusing the picker is `Cancelled`.
    async fn screen_stream(&self) -> Result<ScreenStream, CaptureError>;
}

/// Headless provider: a synthetic Opus tone as the microphone and IVF (VP8)
/// files as camera and screen. The screen track ends when its file runs out,
/// which behaves like the OS stopping a share.
#[derive(Debug, Clone, Default)]
pub struct FileCaptureProvider {
    camera_ivf: Option<PathBuf>,
    screen_ivf: Option<PathBuf>,
}

impl FileCaptureProvider {
    pub fn new(camera_ivf: Option<PathBuf>, screen_ivf: Option<PathBuf>) -> Self {
        Self { camera_ivf, screen_ivf }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.camera_ivf.clone(), config.screen_ivf.clone())
    }
}

#[async_trait]
impl MediaCaptureProvider for FileCaptureProvider {
    async fn local_stream(&self) -> Result<LocalStream, CaptureError> {
        let (audio, audio_tx) = LocalTrack::channel(TrackKind::Audio, "microphone", STREAM_ID);
        tokio::spawn(tone_source(audio_tx));

        let (video, video_tx) = LocalTrack::channel(TrackKind::Video, "camera", STREAM_ID);
        match &self.camera_ivf {
            Some(path) => {
                let data = match load_ivf(path).await {
                    Ok(data) => data,
                    Err(e) => {
                        audio.stop();
                        video.stop();
                        return Err(e);
                    }
                };
                tokio::spawn(ivf_source(data, video_tx, true));
            }
            None => {
                // No camera feed: hold the source open until the track stops.
                tokio::spawn(async move { video_tx.closed().await });
            }
        }

        info!("Local stream ready (camera file: {:?})", self.camera_ivf);
        Ok(LocalStream { audio, video })
    }

    async fn screen_stream(&self) -> Result<ScreenStream, CaptureError> {
        let Some(path) = &self.screen_ivf else {
            debug!("No screen source configured");
            return Err(CaptureError::Cancelled);
        };
        let data = load_ivf(path).await?;
        let (video, video_tx) = LocalTrack::channel(TrackKind::Video, "screen", SCREEN_STREAM_ID);
        tokio::spawn(ivf_source(data, video_tx, false));
        info!("Screen stream ready from {}", path.display());
        Ok(ScreenStream { video, audio: None })
    }
}

async fn load_ivf(path: &Path) -> Result<Bytes, CaptureError> {
    let data = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied,
        _ => CaptureError::DeviceUnavailable(format!("{}: {}", path.display(), e)),
    })?;
    let data = Bytes::from(data);
    IVFReader::new(Cursor::new(data.clone())).map_err(|e| {
        CaptureError::DeviceUnavailable(format!("{} is not an IVF file: {}", path.display(), e))
    })?;
    Ok(data)
}

/// 440Hz tone, Opus-encoded at the 20ms cadence of a real microphone.
async fn tone_source(tx: mpsc::Sender<Sample>) {
    let mut encoder = match OpusEncoder::new() {
        Ok(enc) => enc,
        Err(e) => {
            warn!("Microphone source unavailable: {}", e);
            return;
        }
    };
    let mut phase = 0u64;
    let mut ticker = tokio::time::interval(Duration::from_millis(20));
    loop {
        ticker.tick().await;
        let pcm = codec::tone_frame(440.0, 0.1, &mut phase);
        let packet = match encoder.encode(&pcm) {
            Ok(p) => p,
            Err(_) => continue,
        };
        let sample = Sample {
            data: packet.into(),
            duration: Duration::from_millis(20),
            ..Default::default()
        };
        if tx.send(sample).await.is_err() {
            break;
        }
    }
}

/// One frame period from an IVF timebase. Timebases finer than a plausible
/// frame rate (a 90kHz RTP clock, say) fall back to ~30fps.
fn frame_duration(numerator: u32, denominator: u32) -> Duration {
    if numerator == 0 || denominator == 0 {
        return FALLBACK_FRAME_DURATION;
    }
    let period = Duration::from_secs_f64(numerator as f64 / denominator as f64);
    if period < MIN_FRAME_DURATION {
        FALLBACK_FRAME_DURATION
    } else {
        period
    }
}

/// Play IVF frames at the file's timebase. Stops at EOF unless `looped`.
async fn ivf_source(data: Bytes, tx: mpsc::Sender<Sample>, looped: bool) {
    loop {
        let (mut reader, header) = match IVFReader::new(Cursor::new(data.clone())) {
            Ok(r) => r,
            Err(e) => {
                warn!("IVF source failed: {}", e);
                return;
            }
        };
        let period = frame_duration(header.timebase_numerator, header.timebase_denominator);
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let frame = match reader.parse_next_frame() {
                Ok((frame, _)) => frame,
                Err(_) => break,
            };
            let sample = Sample {
                data: frame.freeze(),
                duration: period,
                ..Default::default()
            };
            if tx.send(sample).await.is_err() {
                return;
            }
        }
        if !looped {
            debug!("IVF source reached end of file");
            return;
        }
    }
}
