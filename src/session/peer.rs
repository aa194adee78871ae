use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine as WrtcMediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_remote::TrackRemote;

use super::machine::TransportState;
use super::protocol::ControlMessage;
use super::signaling::{answer_disposition, await_gathering, AnswerOutcome, SignalingBlob};
use crate::config::SessionConfig;
use crate::error::{CallError, ProtocolError, Result};
use crate::media::track::LocalStream;
use crate::models::Role;

/// Label of the single reliable, ordered control channel.
pub const CONTROL_CHANNEL_LABEL: &str = "session-control";

/// Events emitted by the peer connection callbacks back to the engine.
/// Each carries the id of the session that produced it.
#[derive(Debug)]
pub enum PeerEvent {
    ConnectionStateChanged {
        session_id: Uuid,
        state: TransportState,
    },
    RemoteTrack {
        session_id: Uuid,
        track: Arc<TrackRemote>,
    },
    DataChannelOpened {
        session_id: Uuid,
    },
    DataChannelClosed {
        session_id: Uuid,
    },
    ControlReceived {
        session_id: Uuid,
        message: ControlMessage,
    },
}

impl PeerEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            Self::ConnectionStateChanged { session_id, .. }
            | Self::RemoteTrack { session_id, .. }
            | Self::DataChannelOpened { session_id }
            | Self::DataChannelClosed { session_id }
            | Self::ControlReceived { session_id, .. } => *session_id,
        }
    }
}

type ChannelSlot = Arc<Mutex<Option<Arc<RTCDataChannel>>>>;

/// One call attempt's transport: the peer connection, its control channel
/// and the outbound senders. Never reused after `close()`.
pub struct PeerSession {
    id: Uuid,
    pc: Arc<RTCPeerConnection>,
    video_sender: Arc<RTCRtpSender>,
    control_tx: mpsc::UnboundedSender<ControlMessage>,
    gather_timeout: Duration,
}

impl PeerSession {
    /// Build the peer connection, attach the local tracks and, for the
    /// caller, create the control channel.
    pub async fn open(
        role: Role,
        config: &SessionConfig,
        stream: &LocalStream,
        event_tx: mpsc::Sender<PeerEvent>,
    ) -> Result<Self> {
        let id = Uuid::new_v4();
        let pc = build_peer_connection(config).await?;

        pc.add_track(stream.audio.rtc()).await.map(drain_rtcp)?;
        let video_sender = pc.add_track(stream.video.rtc()).await?;
        drain_rtcp(video_sender.clone());

        let slot: ChannelSlot = Arc::new(Mutex::new(None));
        wire_peer_connection(&pc, id, &event_tx, &slot);

        if role == Role::Caller {
            let dc = pc.create_data_channel(CONTROL_CHANNEL_LABEL, None).await?;
            wire_control_channel(dc, id, event_tx.clone(), slot.clone()).await;
        }

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(control_writer(control_rx, slot));

        info!("Created peer session {} as {:?}", id, role);
        Ok(Self {
            id,
            pc,
            video_sender,
            control_tx,
            gather_timeout: config.gather_timeout,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn video_sender(&self) -> Arc<RTCRtpSender> {
        self.video_sender.clone()
    }

    /// FIFO writer onto the control channel.
    pub fn control_sender(&self) -> mpsc::UnboundedSender<ControlMessage> {
        self.control_tx.clone()
    }

    pub async fn create_offer(&self) -> Result<SignalingBlob> {
        let offer = self.pc.create_offer(None).await?;
        let gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await?;
        await_gathering(gathered, self.gather_timeout).await;
        let blob = self.local_blob().await?;
        info!("Offer ready ({} candidates)", blob.candidate_count());
        Ok(blob)
    }

    pub async fn accept_offer(&self, offer: SignalingBlob) -> Result<SignalingBlob> {
        let desc = offer.into_description()?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| CallError::InvalidSignalingPayload(e.to_string()))?;

        let answer = self.pc.create_answer(None).await?;
        let gathered = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;
        await_gathering(gathered, self.gather_timeout).await;
        let blob = self.local_blob().await?;
        info!("Answer ready ({} candidates)", blob.candidate_count());
        Ok(blob)
    }

    /// Apply the callee's answer. A second application is a no-op.
    pub async fn apply_answer(&self, answer: SignalingBlob) -> Result<AnswerOutcome> {
        let has_remote = self.pc.remote_description().await.is_some();
        match answer_disposition(self.pc.signaling_state(), has_remote)? {
            AnswerOutcome::AlreadyApplied => {
                debug!("Remote answer already applied to session {}", self.id);
                Ok(AnswerOutcome::AlreadyApplied)
            }
            AnswerOutcome::Applied => {
                let desc = answer.into_description()?;
                self.pc
                    .set_remote_description(desc)
                    .await
                    .map_err(|e| CallError::InvalidSignalingPayload(e.to_string()))?;
                info!("Applied remote answer to session {}", self.id);
                Ok(AnswerOutcome::Applied)
            }
        }
    }

    async fn local_blob(&self) -> Result<SignalingBlob> {
        let desc = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| CallError::Transport("no local description".into()))?;
        SignalingBlob::from_description(&desc)
            .ok_or_else(|| CallError::Transport(format!("unexpected local {}", desc.sdp_type)))
    }

    pub async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("Error closing peer session {}: {}", self.id, e);
        }
        info!("Closed peer session {}", self.id);
    }
}

async fn build_peer_connection(config: &SessionConfig) -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = WrtcMediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let rtc_config = RTCConfiguration {
        ice_servers: if config.ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }]
        },
        ..Default::default()
    };

    Ok(Arc::new(api.new_peer_connection(rtc_config).await?))
}

/// Read incoming RTCP packets (needed by webrtc crate for proper operation).
fn drain_rtcp(sender: Arc<RTCRtpSender>) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 1500];
        while sender.read(&mut buf).await.is_ok() {}
    });
}

fn wire_peer_connection(
    pc: &Arc<RTCPeerConnection>,
    session_id: Uuid,
    event_tx: &mpsc::Sender<PeerEvent>,
    slot: &ChannelSlot,
) {
    let tx = event_tx.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let tx = tx.clone();
        Box::pin(async move {
            info!("Session {} transport state: {}", session_id, state);
            let _ = tx
                .send(PeerEvent::ConnectionStateChanged {
                    session_id,
                    state: state.into(),
                })
                .await;
        })
    }));

    let tx = event_tx.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let tx = tx.clone();
        Box::pin(async move {
            info!("Session {} received remote {} track", session_id, track.kind());
            let _ = tx.send(PeerEvent::RemoteTrack { session_id, track }).await;
        })
    }));

    pc.on_ice_candidate(Box::new(move |candidate| {
        Box::pin(async move {
            match candidate {
                Some(c) => debug!("Session {} gathered candidate {}", session_id, c.address),
                None => debug!("Session {} finished gathering", session_id),
            }
        })
    }));

    // Callee side: the control channel arrives from the caller.
    let tx = event_tx.clone();
    let slot = slot.clone();
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let tx = tx.clone();
        let slot = slot.clone();
        Box::pin(async move {
            if dc.label() != CONTROL_CHANNEL_LABEL {
                warn!("Ignoring unexpected data channel '{}'", dc.label());
                return;
            }
            info!("Session {} received control channel", session_id);
            wire_control_channel(dc, session_id, tx, slot).await;
        })
    }));
}

async fn wire_control_channel(
    dc: Arc<RTCDataChannel>,
    session_id: Uuid,
    event_tx: mpsc::Sender<PeerEvent>,
    slot: ChannelSlot,
) {
    let tx = event_tx.clone();
    let open_slot = slot.clone();
    let open_dc = dc.clone();
    dc.on_open(Box::new(move || {
        Box::pin(async move {
            *open_slot.lock().await = Some(open_dc);
            let _ = tx.send(PeerEvent::DataChannelOpened { session_id }).await;
        })
    }));

    let tx = event_tx.clone();
    let close_slot = slot.clone();
    dc.on_close(Box::new(move || {
        let tx = tx.clone();
        let slot = close_slot.clone();
        Box::pin(async move {
            slot.lock().await.take();
            let _ = tx.send(PeerEvent::DataChannelClosed { session_id }).await;
        })
    }));

    let tx = event_tx.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = tx.clone();
        Box::pin(async move {
            let decoded = if msg.is_string {
                String::from_utf8(msg.data.to_vec())
                    .map_err(|_| ProtocolError::Binary)
                    .and_then(|text| ControlMessage::decode(&text))
            } else {
                Err(ProtocolError::Binary)
            };
            match decoded {
                Ok(message) => {
                    let _ = tx
                        .send(PeerEvent::ControlReceived {
                            session_id,
                            message,
                        })
                        .await;
                }
                Err(e) => warn!("Dropping control message: {}", e),
            }
        })
    }));

    // The channel may already be open by the time handlers are attached.
    if dc.ready_state() == RTCDataChannelState::Open {
        *slot.lock().await = Some(dc.clone());
        let _ = event_tx
            .send(PeerEvent::DataChannelOpened { session_id })
            .await;
    }
}

async fn control_writer(mut rx: mpsc::UnboundedReceiver<ControlMessage>, slot: ChannelSlot) {
    while let Some(message) = rx.recv().await {
        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode {} message: {}", message.kind(), e);
                continue;
            }
        };
        let dc = slot.lock().await.clone();
        match dc {
            Some(dc) => {
                if let Err(e) = dc.send_text(text).await {
                    warn!("Failed to send {} message: {}", message.kind(), e);
                }
            }
            None => debug!("Control channel closed, dropping {} message", message.kind()),
        }
    }
}
