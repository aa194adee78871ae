use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use webrtc::media::io::sample_builder::SampleBuilder;
use webrtc::rtp::codecs::vp8::Vp8Packet;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

use super::track::{MediaFrame, TrackKind};

const FEED_CAPACITY: usize = 128;
const MAX_LATE_PACKETS: u16 = 128;
const OPUS_FRAME: Duration = Duration::from_millis(20);
const VP8_CLOCK_RATE: u32 = 90000;

/// Inbound media from the remote peer, re-published as local feeds for the
/// renderer and the recorder.
pub struct RemoteMedia {
    audio: broadcast::Sender<MediaFrame>,
    video: broadcast::Sender<MediaFrame>,
    attached: HashSet<TrackKind>,
    readers: Vec<JoinHandle<()>>,
}

impl Default for RemoteMedia {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteMedia {
    pub fn new() -> Self {
        let (audio, _) = broadcast::channel(FEED_CAPACITY);
        let (video, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            audio,
            video,
            attached: HashSet::new(),
            readers: Vec::new(),
        }
    }

    pub fn has(&self, kind: TrackKind) -> bool {
        self.attached.contains(&kind)
    }

    /// Feed for `kind`, if the peer has sent such a track.
    pub fn subscribe(&self, kind: TrackKind) -> Option<broadcast::Receiver<MediaFrame>> {
        if !self.has(kind) {
            return None;
        }
        Some(self.feed(kind).subscribe())
    }

    fn feed(&self, kind: TrackKind) -> &broadcast::Sender<MediaFrame> {
        match kind {
            TrackKind::Audio => &self.audio,
            TrackKind::Video => &self.video,
        }
    }

    /// Start reading an inbound track. Returns its kind, or `None` for
    /// tracks we cannot render.
    pub fn attach(&mut self, track: Arc<TrackRemote>) -> Option<TrackKind> {
        let kind = match track.kind() {
            RTPCodecType::Audio => TrackKind::Audio,
            RTPCodecType::Video => TrackKind::Video,
            _ => return None,
        };
        let feed = self.feed(kind).clone();
        let reader = match kind {
            TrackKind::Audio => tokio::spawn(read_audio(track, feed)),
            TrackKind::Video => tokio::spawn(read_video(track, feed)),
        };
        self.attached.insert(kind);
        self.readers.push(reader);
        Some(kind)
    }

    /// Stop all readers. Feeds close once the last sender handle is gone.
    pub fn close(&mut self) {
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        self.attached.clear();
    }

    #[cfg(test)]
    pub(crate) fn inject(&mut self, kind: TrackKind) -> broadcast::Sender<MediaFrame> {
        self.attached.insert(kind);
        self.feed(kind).clone()
    }
}

impl Drop for RemoteMedia {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opus payloads are forwarded as they arrive.
async fn read_audio(track: Arc<TrackRemote>, feed: broadcast::Sender<MediaFrame>) {
    let mut buf = vec![0u8; 4096];
    loop {
        match track.read(&mut buf).await {
            Ok((rtp_packet, _attributes)) => {
                if rtp_packet.payload.is_empty() {
                    continue;
                }
                let _ = feed.send(MediaFrame {
                    kind: TrackKind::Audio,
                    data: rtp_packet.payload,
                    duration: OPUS_FRAME,
                });
            }
            Err(e) => {
                debug!("Remote audio read ended: {}", e);
                break;
            }
        }
    }
    info!("Remote audio reader exited");
}

/// VP8 packets are reassembled into whole frames before publishing.
async fn read_video(track: Arc<TrackRemote>, feed: broadcast::Sender<MediaFrame>) {
    let mut builder = SampleBuilder::new(MAX_LATE_PACKETS, Vp8Packet::default(), VP8_CLOCK_RATE);
    let mut buf = vec![0u8; 4096];
    loop {
        match track.read(&mut buf).await {
            Ok((rtp_packet, _attributes)) => {
                builder.push(rtp_packet);
                while let Some(sample) = builder.pop() {
                    let _ = feed.send(MediaFrame {
                        kind: TrackKind::Video,
                        data: sample.data,
                        duration: sample.duration,
                    });
                }
            }
            Err(e) => {
                debug!("Remote video read ended: {}", e);
                break;
            }
        }
    }
    info!("Remote video reader exited");
}
