use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::codec::{OpusDecoder, OpusEncoder, FRAME_SAMPLES};
use super::mixer::AudioMixer;
use super::track::MediaFrame;
use crate::error::{CallError, Result};

pub const RECORDING_EXTENSION: &str = "pcrec";
const MAGIC: &[u8; 4] = b"PCRC";
const CONTAINER_VERSION: u8 = 1;
const AUDIO_CODEC: &str = "opus/48000/1";
const VIDEO_CODEC: &str = "VP8";
/// kind(1) + offset_ms(4) + len(4)
const RECORD_HEADER: usize = 9;

const LOCAL_AUDIO: usize = 0;
const REMOTE_AUDIO: usize = 1;
const MIX_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    Idle,
    Recording,
    Finalizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkKind {
    Audio = 1,
    Video = 2,
}

impl ChunkKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Audio),
            2 => Some(Self::Video),
            _ => None,
        }
    }
}

/// Taps feeding one recording. Video is a single track; audio from both
/// ends is mixed into one stream.
#[derive(Default)]
pub struct RecordingSources {
    pub video: Option<broadcast::Receiver<MediaFrame>>,
    pub local_audio: Option<broadcast::Receiver<MediaFrame>>,
    pub remote_audio: Option<broadcast::Receiver<MediaFrame>>,
}

impl RecordingSources {
    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.local_audio.is_none() && self.remote_audio.is_none()
    }
}

/// Finished recording, ready to be offered for local download.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub filename: String,
    pub data: Bytes,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub chunks: usize,
}

impl Artifact {
    pub async fn save(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(&self.filename);
        tokio::fs::write(&path, &self.data).await?;
        Ok(path)
    }

    /// Walk the records after the header. `None` if the container is corrupt.
    pub fn records(&self) -> Option<Vec<(ChunkKind, u32, &[u8])>> {
        let data = &self.data[..];
        if data.len() < 5 || &data[..4] != MAGIC || data[4] != CONTAINER_VERSION {
            return None;
        }
        let mut pos = 5;
        for _ in 0..2 {
            let len = *data.get(pos)? as usize;
            pos += 1 + len;
        }
        let mut records = Vec::new();
        while pos < data.len() {
            let header = data.get(pos..pos + RECORD_HEADER)?;
            let kind = ChunkKind::from_byte(header[0])?;
            let offset = u32::from_le_bytes([header[1], header[2], header[3], header[4]]);
            let len = u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize;
            pos += RECORD_HEADER;
            records.push((kind, offset, data.get(pos..pos + len)?));
            pos += len;
        }
        Some(records)
    }
}

pub fn recording_filename(at: DateTime<Utc>) -> String {
    format!(
        "session-recording-{}.{}",
        at.format("%Y-%m-%dT%H-%M-%SZ"),
        RECORDING_EXTENSION
    )
}

struct ActiveRecording {
    started_at: DateTime<Utc>,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<Vec<Bytes>>,
}

/// Local-only recorder. At most one recording is active at a time.
pub struct RecordingPipeline {
    state: RecordingState,
    active: Option<ActiveRecording>,
}

impl Default for RecordingPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingPipeline {
    pub fn new() -> Self {
        Self {
            state: RecordingState::Idle,
            active: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn start(&mut self, sources: RecordingSources) -> Result<()> {
        if self.active.is_some() {
            return Err(CallError::AlreadyRecording);
        }
        if sources.is_empty() {
            return Err(CallError::RecordingUnavailable);
        }

        info!(
            "Recording started (video={}, local_audio={}, remote_audio={})",
            sources.video.is_some(),
            sources.local_audio.is_some(),
            sources.remote_audio.is_some()
        );
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(record(sources, stop_rx));
        self.active = Some(ActiveRecording {
            started_at: Utc::now(),
            stop_tx,
            task,
        });
        self.state = RecordingState::Recording;
        Ok(())
    }

    /// Finalize buffered chunks into one artifact. `None` when not recording.
    pub async fn stop(&mut self) -> Option<Artifact> {
        let active = self.active.take()?;
        self.state = RecordingState::Finalizing;
        let _ = active.stop_tx.send(());
        let chunks = match active.task.await {
            Ok(chunks) => chunks,
            Err(e) => {
                error!("Recording task failed: {}", e);
                Vec::new()
            }
        };
        self.state = RecordingState::Idle;

        let duration = (Utc::now() - active.started_at).to_std().unwrap_or_default();
        let artifact = finalize(chunks, active.started_at, duration);
        info!(
            "Recording finalized: {} ({} chunks, {} bytes)",
            artifact.filename,
            artifact.chunks,
            artifact.data.len()
        );
        Some(artifact)
    }
}

fn finalize(chunks: Vec<Bytes>, started_at: DateTime<Utc>, duration: Duration) -> Artifact {
    let body: usize = chunks.iter().map(|c| c.len()).sum();
    let mut out = BytesMut::with_capacity(16 + AUDIO_CODEC.len() + VIDEO_CODEC.len() + body);
    out.put_slice(MAGIC);
    out.put_u8(CONTAINER_VERSION);
    for codec in [AUDIO_CODEC, VIDEO_CODEC] {
        out.put_u8(codec.len() as u8);
        out.put_slice(codec.as_bytes());
    }
    for chunk in &chunks {
        out.put_slice(chunk);
    }
    Artifact {
        filename: recording_filename(started_at),
        data: out.freeze(),
        started_at,
        duration,
        chunks: chunks.len(),
    }
}

fn encode_chunk(kind: ChunkKind, offset_ms: u32, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(RECORD_HEADER + payload.len());
    buf.put_u8(kind as u8);
    buf.put_u32_le(offset_ms);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    buf.freeze()
}

async fn recv_from(rx: &mut Option<broadcast::Receiver<MediaFrame>>) -> std::result::Result<MediaFrame, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Collects chunks in arrival order until told to stop, then drains what is
/// still buffered. Audio is one mixed frame per tick, stamped with the tick
/// time, so silence keeps its place on the timeline.
async fn record(mut sources: RecordingSources, mut stop_rx: oneshot::Receiver<()>) -> Vec<Bytes> {
    let started = Instant::now();
    let mut chunks = Vec::new();
    let has_audio = sources.local_audio.is_some() || sources.remote_audio.is_some();
    let mut audio = AudioTrackMixer::new();
    let mut mix_tick = tokio::time::interval(MIX_INTERVAL);
    mix_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            r = recv_from(&mut sources.video) => match r {
                Ok(frame) => {
                    let offset = started.elapsed().as_millis() as u32;
                    chunks.push(encode_chunk(ChunkKind::Video, offset, &frame.data));
                }
                Err(RecvError::Lagged(n)) => warn!("Recorder skipped {} video frames", n),
                Err(RecvError::Closed) => {
                    debug!("Recorded video source ended");
                    sources.video = None;
                }
            },
            r = recv_from(&mut sources.local_audio) => match r {
                Ok(frame) => audio.push(LOCAL_AUDIO, &frame),
                Err(RecvError::Lagged(n)) => warn!("Recorder skipped {} local audio frames", n),
                Err(RecvError::Closed) => sources.local_audio = None,
            },
            r = recv_from(&mut sources.remote_audio) => match r {
                Ok(frame) => audio.push(REMOTE_AUDIO, &frame),
                Err(RecvError::Lagged(n)) => warn!("Recorder skipped {} remote audio frames", n),
                Err(RecvError::Closed) => sources.remote_audio = None,
            },
            at = mix_tick.tick() => {
                if has_audio {
                    let offset = at.saturating_duration_since(started).as_millis() as u32;
                    audio.flush_one(offset, &mut chunks);
                }
            }
        }
    }

    // Drain frames that arrived before the stop request.
    if let Some(rx) = sources.video.as_mut() {
        while let Ok(frame) = rx.try_recv() {
            let offset = started.elapsed().as_millis() as u32;
            chunks.push(encode_chunk(ChunkKind::Video, offset, &frame.data));
        }
    }
    for (source, rx) in [
        (LOCAL_AUDIO, sources.local_audio.as_mut()),
        (REMOTE_AUDIO, sources.remote_audio.as_mut()),
    ] {
        if let Some(rx) = rx {
            while let Ok(frame) = rx.try_recv() {
                audio.push(source, &frame);
            }
        }
    }
    let mut offset = started.elapsed().as_millis() as u32;
    while !audio.mixer.is_empty() {
        offset = offset.max(audio.next_offset);
        audio.flush_one(offset, &mut chunks);
        offset += MIX_INTERVAL.as_millis() as u32;
    }
    chunks
}

/// Per-source Opus decode, PCM mix, Opus re-encode.
struct AudioTrackMixer {
    decoders: [Option<OpusDecoder>; 2],
    encoder: Option<OpusEncoder>,
    mixer: AudioMixer,
    /// Earliest offset the next frame may take.
    next_offset: u32,
}

impl AudioTrackMixer {
    fn new() -> Self {
        let encoder = match OpusEncoder::new() {
            Ok(enc) => Some(enc),
            Err(e) => {
                warn!("Recording without audio: {}", e);
                None
            }
        };
        Self {
            decoders: [OpusDecoder::new().ok(), OpusDecoder::new().ok()],
            encoder,
            mixer: AudioMixer::new(2, FRAME_SAMPLES),
            next_offset: 0,
        }
    }

    fn push(&mut self, source: usize, frame: &MediaFrame) {
        let Some(decoder) = self.decoders.get_mut(source).and_then(|d| d.as_mut()) else {
            return;
        };
        match decoder.decode(&frame.data) {
            Ok(pcm) => self.mixer.push(source, &pcm),
            Err(e) => debug!("Dropping undecodable audio frame: {}", e),
        }
    }

    /// Mix, encode and write one frame at `offset_ms`.
    fn flush_one(&mut self, offset_ms: u32, chunks: &mut Vec<Bytes>) {
        let pcm = self.mixer.mix_frame();
        let Some(encoder) = self.encoder.as_mut() else {
            return;
        };
        match encoder.encode(&pcm) {
            Ok(packet) => {
                chunks.push(encode_chunk(ChunkKind::Audio, offset_ms, &packet));
                self.next_offset = offset_ms + MIX_INTERVAL.as_millis() as u32;
            }
            Err(e) => debug!("Mixed frame encode failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::codec::tone_frame;
    use crate::media::track::TrackKind;

    fn video_frame(byte: u8) -> MediaFrame {
        MediaFrame {
            kind: TrackKind::Video,
            data: Bytes::from(vec![byte; 8]),
            duration: Duration::from_millis(33),
        }
    }

    #[tokio::test]
    async fn stop_without_start_returns_nothing() {
        let mut pipeline = RecordingPipeline::new();
        assert!(pipeline.stop().await.is_none());
        assert_eq!(pipeline.state(), RecordingState::Idle);
    }

    #[tokio::test]
    async fn start_without_sources_is_unavailable() {
        let mut pipeline = RecordingPipeline::new();
        let err = pipeline.start(RecordingSources::default()).unwrap_err();
        assert!(matches!(err, CallError::RecordingUnavailable));
        assert!(!pipeline.is_recording());
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let (tx, _) = broadcast::channel::<MediaFrame>(8);
        let mut pipeline = RecordingPipeline::new();
        pipeline
            .start(RecordingSources {
                video: Some(tx.subscribe()),
                ..Default::default()
            })
            .unwrap();
        let err = pipeline
            .start(RecordingSources {
                video: Some(tx.subscribe()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, CallError::AlreadyRecording));
        assert!(pipeline.stop().await.is_some());
    }

    #[tokio::test]
    async fn video_chunks_keep_arrival_order() {
        let (tx, _) = broadcast::channel::<MediaFrame>(8);
        let mut pipeline = RecordingPipeline::new();
        pipeline
            .start(RecordingSources {
                video: Some(tx.subscribe()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(pipeline.state(), RecordingState::Recording);

        for b in 1..=3 {
            tx.send(video_frame(b)).unwrap();
        }
        let artifact = pipeline.stop().await.unwrap();
        assert_eq!(pipeline.state(), RecordingState::Idle);
        assert!(artifact.filename.starts_with("session-recording-"));
        assert!(artifact.filename.ends_with(".pcrec"));

        let records = artifact.records().unwrap();
        let firsts: Vec<u8> = records
            .iter()
            .filter(|(kind, _, _)| *kind == ChunkKind::Video)
            .map(|(_, _, payload)| payload[0])
            .collect();
        assert_eq!(firsts, vec![1, 2, 3]);
        assert!(pipeline.stop().await.is_none());
    }

    #[tokio::test]
    async fn audio_from_both_ends_is_mixed() {
        let (local_tx, _) = broadcast::channel::<MediaFrame>(16);
        let (remote_tx, _) = broadcast::channel::<MediaFrame>(16);
        let mut pipeline = RecordingPipeline::new();
        pipeline
            .start(RecordingSources {
                video: None,
                local_audio: Some(local_tx.subscribe()),
                remote_audio: Some(remote_tx.subscribe()),
            })
            .unwrap();

        let mut enc = OpusEncoder::new().unwrap();
        let mut phase = 0;
        for _ in 0..2 {
            for tx in [&local_tx, &remote_tx] {
                let packet = enc.encode(&tone_frame(220.0, 0.2, &mut phase)).unwrap();
                tx.send(MediaFrame {
                    kind: TrackKind::Audio,
                    data: packet.into(),
                    duration: Duration::from_millis(20),
                })
                .unwrap();
            }
        }

        let artifact = pipeline.stop().await.unwrap();
        let records = artifact.records().unwrap();
        let audio = records.iter().filter(|(k, _, _)| *k == ChunkKind::Audio).count();
        assert!(audio >= 2, "expected mixed audio chunks, got {}", audio);
        assert!(records.iter().all(|(k, _, _)| *k == ChunkKind::Audio));
    }

    fn tone_packet(enc: &mut OpusEncoder, phase: &mut u64) -> MediaFrame {
        MediaFrame {
            kind: TrackKind::Audio,
            data: enc.encode(&tone_frame(330.0, 0.3, phase)).unwrap().into(),
            duration: MIX_INTERVAL,
        }
    }

    #[tokio::test]
    async fn audio_timeline_follows_wall_clock() {
        let (local_tx, _) = broadcast::channel::<MediaFrame>(16);
        let (remote_tx, _) = broadcast::channel::<MediaFrame>(16);
        let (video_tx, _) = broadcast::channel::<MediaFrame>(16);
        let mut pipeline = RecordingPipeline::new();
        pipeline
            .start(RecordingSources {
                video: Some(video_tx.subscribe()),
                local_audio: Some(local_tx.subscribe()),
                remote_audio: Some(remote_tx.subscribe()),
            })
            .unwrap();

        let (mut local_enc, mut remote_enc) = (OpusEncoder::new().unwrap(), OpusEncoder::new().unwrap());
        let (mut local_phase, mut remote_phase) = (0, 0);
        local_tx.send(tone_packet(&mut local_enc, &mut local_phase)).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        remote_tx.send(tone_packet(&mut remote_enc, &mut remote_phase)).unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        local_tx.send(tone_packet(&mut local_enc, &mut local_phase)).unwrap();
        video_tx.send(video_frame(9)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let artifact = pipeline.stop().await.unwrap();
        let records = artifact.records().unwrap();
        let video_at = records
            .iter()
            .find(|(k, _, _)| *k == ChunkKind::Video)
            .map(|(_, offset, _)| *offset)
            .unwrap();
        assert!(video_at >= 1000, "video at {}", video_at);

        let mut decoder = OpusDecoder::new().unwrap();
        let audio: Vec<(u32, bool)> = records
            .iter()
            .filter(|(k, _, _)| *k == ChunkKind::Audio)
            .map(|(_, offset, payload)| {
                let pcm = decoder.decode(payload).unwrap();
                let peak = pcm.iter().fold(0.0f32, |m, s| m.max(s.abs()));
                (*offset, peak > 0.02)
            })
            .collect();

        // One frame per tick across the quiet second, in time order.
        assert!(audio.len() >= 40, "only {} audio frames", audio.len());
        assert!(audio.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(audio.last().unwrap().0 >= 1000);

        let audible: Vec<u32> = audio.iter().filter(|(_, loud)| *loud).map(|(o, _)| *o).collect();
        assert!(audible.iter().any(|o| *o < 200));
        assert!(!audible.iter().any(|o| (300..900).contains(o)), "gap not silent: {:?}", audible);
        let late = audible.iter().find(|o| **o >= 900).copied().unwrap();
        assert!(late.abs_diff(video_at) <= 100, "audio {} vs video {}", late, video_at);
    }

    #[tokio::test]
    async fn artifact_saves_to_directory() {
        let (tx, _) = broadcast::channel::<MediaFrame>(8);
        let mut pipeline = RecordingPipeline::new();
        pipeline
            .start(RecordingSources {
                video: Some(tx.subscribe()),
                ..Default::default()
            })
            .unwrap();
        tx.send(video_frame(7)).unwrap();
        let artifact = pipeline.stop().await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = artifact.save(&dir.path().join("recordings")).await.unwrap();
        let written = std::fs::read(&path).unwrap();
        assert_eq!(written, artifact.data.to_vec());
    }

    #[test]
    fn corrupt_container_is_detected() {
        let artifact = Artifact {
            filename: "x".into(),
            data: Bytes::from_static(b"NOPE"),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            chunks: 0,
        };
        assert!(artifact.records().is_none());
    }
}
