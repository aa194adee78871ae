use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::machine::ConnectionTracker;
use super::peer::{PeerEvent, PeerSession};
use super::protocol::{ChatLog, ChatPayload, ControlMessage};
use super::registry::ParticipantRegistry;
use super::signaling::{AnswerOutcome, DescriptionKind, SignalingBlob};
use crate::config::SessionConfig;
use crate::error::{CallError, CaptureError, Result};
use crate::events::{notify, AppEvent, EventSender};
use crate::media::capture::MediaCaptureProvider;
use crate::media::controller::MediaTrackController;
use crate::media::recording::{RecordingPipeline, RecordingSources};
use crate::media::remote::RemoteMedia;
use crate::media::track::{LocalStream, TrackKind};
use crate::models::{CallState, ChatMessage, ConnectionState, NotificationKind, Role};

/// The one call this process can be in. Owned by the engine task; every
/// operation runs to completion before the next one starts.
pub struct CallSession {
    config: SessionConfig,
    events: EventSender,
    peer_tx: mpsc::Sender<PeerEvent>,
    media: MediaTrackController,
    peer: Option<PeerSession>,
    session_id: Option<Uuid>,
    role: Option<Role>,
    created_at: Option<DateTime<Utc>>,
    tracker: ConnectionTracker,
    control_tx: Option<mpsc::UnboundedSender<ControlMessage>>,
    registry: ParticipantRegistry,
    chat: ChatLog,
    hand_raised: bool,
    remote: RemoteMedia,
    recorder: RecordingPipeline,
}

impl CallSession {
    pub fn new(
        config: SessionConfig,
        provider: Arc<dyn MediaCaptureProvider>,
        events: EventSender,
        peer_tx: mpsc::Sender<PeerEvent>,
        screen_ended_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            config,
            events,
            peer_tx,
            media: MediaTrackController::new(provider, screen_ended_tx),
            peer: None,
            session_id: None,
            role: None,
            created_at: None,
            tracker: ConnectionTracker::new(),
            control_tx: None,
            registry: ParticipantRegistry::new(),
            chat: ChatLog::new(),
            hand_raised: false,
            remote: RemoteMedia::new(),
            recorder: RecordingPipeline::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.tracker.state()
    }

    pub fn registry(&self) -> &ParticipantRegistry {
        &self.registry
    }

    pub fn chat_messages(&self) -> Vec<ChatMessage> {
        self.chat.messages().to_vec()
    }

    pub fn owned_tracks(&self) -> usize {
        self.media.owned_tracks()
    }

    pub fn snapshot(&self) -> CallState {
        CallState {
            connection_state: self.tracker.state(),
            role: self.role,
            data_channel_state: self.tracker.data_channel_state(),
            created_at: self.created_at,
            muted: self.media.is_muted(),
            video_enabled: self.media.is_video_enabled(),
            screen_sharing: self.media.is_screen_sharing(),
            recording: self.recorder.is_recording(),
            participants: self.registry.participants(),
        }
    }

    // ============================================================
    // Session setup
    // ============================================================

    /// Capture media, create the control channel and return the offer blob.
    pub async fn start_as_caller(&mut self) -> Result<SignalingBlob> {
        self.reset_if_active().await;
        let stream = self.acquire_media().await?;
        let peer = self.open_peer(Role::Caller, &stream).await?;

        match peer.create_offer().await {
            Ok(blob) => {
                self.peer = Some(peer);
                Ok(blob)
            }
            Err(e) => {
                warn!("Failed to create offer: {}", e);
                peer.close().await;
                self.abandon();
                notify(&self.events, NotificationKind::Error, format!("Could not create an invite: {}", e));
                Err(e)
            }
        }
    }

    /// Validate the pasted offer, capture media and return the answer blob.
    pub async fn start_as_callee(&mut self, offer: &str) -> Result<SignalingBlob> {
        let offer = self.parse_blob(offer, DescriptionKind::Offer)?;
        self.reset_if_active().await;
        let stream = self.acquire_media().await?;
        let peer = self.open_peer(Role::Callee, &stream).await?;

        match peer.accept_offer(offer).await {
            Ok(blob) => {
                self.peer = Some(peer);
                Ok(blob)
            }
            Err(e) => {
                warn!("Failed to answer offer: {}", e);
                peer.close().await;
                self.abandon();
                notify(&self.events, NotificationKind::Error, format!("Could not accept the invite: {}", e));
                Err(e)
            }
        }
    }

    /// Apply the callee's answer on the caller side. Idempotent.
    pub async fn apply_remote_answer(&mut self, answer: &str) -> Result<AnswerOutcome> {
        if self.role != Some(Role::Caller) && self.peer.is_some() {
            return Err(CallError::InvalidState("only the caller applies an answer".into()));
        }
        let Some(peer) = self.peer.as_ref() else {
            return Err(CallError::NoActiveSession);
        };
        let answer = self.parse_blob(answer, DescriptionKind::Answer)?;
        let result = peer.apply_answer(answer).await;
        if let Err(CallError::InvalidSignalingPayload(reason)) = &result {
            notify(&self.events, NotificationKind::Error, format!("Invalid answer: {}", reason));
        }
        result
    }

    /// Parse the blob and its SDP. Nothing about the current call changes
    /// until this succeeds.
    fn parse_blob(&self, text: &str, kind: DescriptionKind) -> Result<SignalingBlob> {
        SignalingBlob::parse_as(text, kind)
            .and_then(|blob| {
                blob.clone().into_description()?;
                Ok(blob)
            })
            .map_err(|e| {
                notify(&self.events, NotificationKind::Error, format!("Invalid {}: {}", kind, e));
                e
            })
    }

    async fn acquire_media(&mut self) -> Result<LocalStream> {
        match self.media.acquire().await {
            Ok(stream) => {
                self.emit_media_state();
                Ok(stream)
            }
            Err(CaptureError::PermissionDenied) => {
                notify(
                    &self.events,
                    NotificationKind::Error,
                    "Camera and microphone access was denied",
                );
                Err(CallError::PermissionDenied)
            }
            Err(e) => {
                notify(
                    &self.events,
                    NotificationKind::Error,
                    format!("Could not start camera or microphone: {}", e),
                );
                Err(CallError::Media(e.to_string()))
            }
        }
    }

    async fn open_peer(&mut self, role: Role, stream: &LocalStream) -> Result<PeerSession> {
        let peer = match PeerSession::open(role, &self.config, stream, self.peer_tx.clone()).await {
            Ok(peer) => peer,
            Err(e) => {
                self.media.release();
                notify(&self.events, NotificationKind::Error, format!("Could not start the call: {}", e));
                return Err(e);
            }
        };
        self.media.attach_sender(peer.video_sender());
        self.install(peer.id(), role, peer.control_sender());
        Ok(peer)
    }

    /// Make `id` the current session and enter `Negotiating`.
    fn install(&mut self, id: Uuid, role: Role, control_tx: mpsc::UnboundedSender<ControlMessage>) {
        self.session_id = Some(id);
        self.role = Some(role);
        self.created_at = Some(Utc::now());
        self.control_tx = Some(control_tx);
        self.tracker = ConnectionTracker::new();
        self.remote = RemoteMedia::new();

        let local = self.registry.join(&self.config.display_name);
        if self.hand_raised {
            self.registry.set_local_hand(true);
        }
        self.registry.set_local_muted(self.media.is_muted());
        self.emit(AppEvent::ParticipantUpdated(local));

        let change = self.tracker.begin();
        self.emit_state(change);
    }

    /// Setup failed part way: drop back to `Idle` without a failure cycle.
    fn abandon(&mut self) {
        self.media.release();
        self.session_id = None;
        self.role = None;
        self.created_at = None;
        self.control_tx = None;
        self.registry.clear();
        self.remote.close();
        self.tracker = ConnectionTracker::new();
        self.emit(AppEvent::ParticipantsCleared);
        self.emit(AppEvent::ConnectionStateChanged {
            state: ConnectionState::Idle,
        });
        self.emit_media_state();
    }

    async fn reset_if_active(&mut self) {
        if self.session_id.is_some() || self.media.owned_tracks() > 0 {
            info!("Tearing down previous session before starting a new one");
            self.hang_up().await;
        }
    }

    // ============================================================
    // Teardown
    // ============================================================

    /// End the call from any state. Always finishes in `Closed` with no
    /// captured tracks, an empty roster and an empty chat log. A recording
    /// in progress is stopped and saved first.
    pub async fn hang_up(&mut self) {
        if self.recorder.is_recording() {
            if let Err(e) = self.stop_recording().await {
                warn!("Failed to save recording on hang-up: {}", e);
                notify(&self.events, NotificationKind::Error, format!("Recording was lost: {}", e));
            }
        }
        if let Some(peer) = self.peer.take() {
            peer.close().await;
        }
        self.control_tx = None;
        self.session_id = None;
        self.role = None;
        self.created_at = None;
        self.remote.close();
        self.media.release();
        self.registry.clear();
        self.chat.clear();
        self.hand_raised = false;

        self.emit(AppEvent::ParticipantsCleared);
        self.emit_media_state();
        let change = self.tracker.close();
        self.emit_state(change);
        info!("Call ended");
    }

    // ============================================================
    // Control protocol
    // ============================================================

    pub async fn send_chat(&mut self, text: &str) -> Result<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CallError::InvalidState("chat message is empty".into()));
        }
        if !self.tracker.is_connected() {
            return Err(CallError::NotConnected);
        }
        let payload = ChatPayload::new(&self.config.display_name, text);
        let local = payload.clone().into_message(true);
        self.chat.push(local.clone());
        self.emit(AppEvent::ChatMessage(local.clone()));
        self.send_control(ControlMessage::Chat(payload))?;
        Ok(local)
    }

    /// Raise or lower the local hand. Sent now if connected, otherwise
    /// announced once the connection comes up.
    pub fn toggle_hand(&mut self) -> Result<bool> {
        if self.session_id.is_none() {
            return Err(CallError::NoActiveSession);
        }
        self.hand_raised = !self.hand_raised;
        if let Some(local) = self.registry.set_local_hand(self.hand_raised) {
            self.emit(AppEvent::ParticipantUpdated(local));
        }
        if self.tracker.is_connected() {
            self.send_control(ControlMessage::hand_raise(
                self.hand_raised,
                &self.config.display_name,
            ))?;
        }
        Ok(self.hand_raised)
    }

    fn send_control(&self, message: ControlMessage) -> Result<()> {
        if !self.tracker.is_connected() {
            return Err(CallError::NotConnected);
        }
        let tx = self.control_tx.as_ref().ok_or(CallError::NoActiveSession)?;
        debug!("Sending {} message", message.kind());
        tx.send(message)
            .map_err(|_| CallError::ConnectionFailure("control channel writer stopped".into()))
    }

    fn on_control(&mut self, message: ControlMessage) {
        match message {
            ControlMessage::Chat(payload) => {
                if self.chat.contains(&payload.id) {
                    debug!("Ignoring duplicate chat message {}", payload.id);
                    return;
                }
                let msg = payload.into_message(false);
                self.chat.push(msg.clone());
                self.emit(AppEvent::ChatMessage(msg));
            }
            other => {
                if let Some(participant) = self.registry.apply(&other) {
                    self.emit(AppEvent::ParticipantUpdated(participant));
                }
            }
        }
    }

    // ============================================================
    // Transport events
    // ============================================================

    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        if Some(event.session_id()) != self.session_id {
            debug!("Dropping event from stale session {}", event.session_id());
            return;
        }
        let change = match event {
            PeerEvent::ConnectionStateChanged { state, .. } => self.tracker.on_transport(state),
            PeerEvent::DataChannelOpened { .. } => self.tracker.on_channel_open(),
            PeerEvent::DataChannelClosed { .. } => self.tracker.on_channel_closed(),
            PeerEvent::RemoteTrack { track, .. } => {
                if let Some(kind) = self.remote.attach(track) {
                    self.emit(AppEvent::RemoteTrackAdded { kind });
                }
                None
            }
            PeerEvent::ControlReceived { message, .. } => {
                self.on_control(message);
                None
            }
        };
        self.on_state_change(change).await;
    }

    async fn on_state_change(&mut self, change: Option<ConnectionState>) {
        let Some(state) = change else { return };
        self.emit_state(change);
        match state {
            ConnectionState::Connected => {
                // Presence must be the first message the peer sees.
                if let Err(e) = self.send_control(ControlMessage::presence(&self.config.display_name)) {
                    warn!("Failed to announce presence: {}", e);
                }
                if self.hand_raised {
                    if let Err(e) = self.send_control(ControlMessage::hand_raise(true, &self.config.display_name)) {
                        warn!("Failed to announce raised hand: {}", e);
                    }
                }
                notify(&self.events, NotificationKind::Success, "Connected to peer");
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                let err = CallError::ConnectionFailure(format!("connection {}", state));
                warn!("{}", err);
                notify(&self.events, NotificationKind::Error, format!("Call ended: {}", err));
                self.hang_up().await;
            }
            _ => {}
        }
    }

    // ============================================================
    // Local media
    // ============================================================

    pub fn toggle_mute(&mut self) -> bool {
        let muted = self.media.toggle_mute();
        if let Some(local) = self.registry.set_local_muted(muted) {
            self.emit(AppEvent::ParticipantUpdated(local));
        }
        self.emit_media_state();
        muted
    }

    pub fn toggle_video(&mut self) -> bool {
        let enabled = self.media.toggle_video();
        self.emit_media_state();
        enabled
    }

    pub async fn toggle_screen_share(&mut self) -> Result<bool> {
        match self.media.toggle_screen_share().await {
            Ok(sharing) => {
                self.emit_media_state();
                Ok(sharing)
            }
            Err(e) => {
                notify(&self.events, NotificationKind::Error, "Screen share was cancelled or denied");
                Err(e)
            }
        }
    }

    pub async fn screen_track_ended(&mut self, track_id: &str) {
        match self.media.screen_track_ended(track_id).await {
            Ok(true) => self.emit_media_state(),
            Ok(false) => {}
            Err(e) => warn!("Failed to revert to camera: {}", e),
        }
    }

    // ============================================================
    // Recording
    // ============================================================

    /// Record the remote video if present (else what we send) together with
    /// both ends' audio.
    pub fn start_recording(&mut self) -> Result<()> {
        let video = self
            .remote
            .subscribe(TrackKind::Video)
            .or_else(|| self.media.outbound_video().map(|t| t.subscribe()));
        let sources = RecordingSources {
            video,
            local_audio: self.media.local_stream().map(|s| s.audio.subscribe()),
            remote_audio: self.remote.subscribe(TrackKind::Audio),
        };
        match self.recorder.start(sources) {
            Ok(()) => {
                notify(&self.events, NotificationKind::Success, "Recording started");
                Ok(())
            }
            Err(e) => {
                notify(&self.events, NotificationKind::Error, format!("Cannot record: {}", e));
                Err(e)
            }
        }
    }

    /// Finalize and save the recording. `None` if nothing was recording.
    pub async fn stop_recording(&mut self) -> Result<Option<PathBuf>> {
        let Some(artifact) = self.recorder.stop().await else {
            return Ok(None);
        };
        let path = artifact.save(&self.config.recordings_dir).await?;
        info!("Recording saved to {}", path.display());
        self.emit(AppEvent::RecordingSaved {
            path: path.display().to_string(),
            bytes: artifact.data.len(),
        });
        notify(
            &self.events,
            NotificationKind::Success,
            format!("Recording saved as {}", artifact.filename),
        );
        Ok(Some(path))
    }

    // ============================================================
    // Events
    // ============================================================

    fn emit(&self, event: AppEvent) {
        let _ = self.events.send(event);
    }

    fn emit_state(&self, change: Option<ConnectionState>) {
        if let Some(state) = change {
            info!("Call state: {}", state);
            self.emit(AppEvent::ConnectionStateChanged { state });
        }
    }

    fn emit_media_state(&self) {
        self.emit(AppEvent::MediaStateChanged {
            muted: self.media.is_muted(),
            video_enabled: self.media.is_video_enabled(),
            screen_sharing: self.media.is_screen_sharing(),
        });
    }

    #[cfg(test)]
    pub(crate) async fn begin_test_session(
        &mut self,
        role: Role,
    ) -> (Uuid, mpsc::UnboundedReceiver<ControlMessage>) {
        self.reset_if_active().await;
        self.acquire_media().await.unwrap();
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.install(id, role, tx);
        (id, rx)
    }

    #[cfg(test)]
    pub(crate) fn remote_media(&mut self) -> &mut RemoteMedia {
        &mut self.remote
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::events::{create_event_bus, EventReceiver};
    use crate::media::capture::testing::StubCaptureProvider;
    use crate::media::track::MediaFrame;
    use crate::session::machine::TransportState;

    struct Harness {
        call: CallSession,
        events: EventReceiver,
        _dir: tempfile::TempDir,
    }

    fn harness_with(name: &str, provider: StubCaptureProvider) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let (events_tx, events) = create_event_bus();
        let (peer_tx, _) = mpsc::channel(16);
        let (screen_tx, _) = mpsc::unbounded_channel();
        let config = SessionConfig {
            display_name: name.to_string(),
            recordings_dir: dir.path().join("recordings"),
            ..Default::default()
        };
        let call = CallSession::new(config, Arc::new(provider), events_tx, peer_tx, screen_tx);
        Harness {
            call,
            events,
            _dir: dir,
        }
    }

    fn harness(name: &str) -> Harness {
        harness_with(name, StubCaptureProvider::default())
    }

    async fn connect(call: &mut CallSession, id: Uuid) {
        call.handle_peer_event(PeerEvent::ConnectionStateChanged {
            session_id: id,
            state: TransportState::Connected,
        })
        .await;
        call.handle_peer_event(PeerEvent::DataChannelOpened { session_id: id })
            .await;
        assert_eq!(call.connection_state(), ConnectionState::Connected);
    }

    async fn deliver(call: &mut CallSession, id: Uuid, message: ControlMessage) {
        call.handle_peer_event(PeerEvent::ControlReceived {
            session_id: id,
            message,
        })
        .await;
    }

    fn drain_notifications(rx: &mut EventReceiver) -> Vec<(NotificationKind, String)> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AppEvent::Notification { kind, message } = event {
                out.push((kind, message));
            }
        }
        out
    }

    fn assert_torn_down(call: &CallSession) {
        assert_eq!(call.connection_state(), ConnectionState::Closed);
        assert_eq!(call.owned_tracks(), 0);
        assert!(call.registry().is_empty());
        assert!(call.chat_messages().is_empty());
    }

    #[tokio::test]
    async fn hang_up_from_idle_closes() {
        let mut h = harness("Ada");
        h.call.hang_up().await;
        assert_torn_down(&h.call);
        h.call.hang_up().await;
        assert_torn_down(&h.call);
    }

    #[tokio::test]
    async fn hang_up_from_negotiating_releases_tracks() {
        let mut h = harness("Ada");
        h.call.begin_test_session(Role::Caller).await;
        assert_eq!(h.call.connection_state(), ConnectionState::Negotiating);
        assert_eq!(h.call.owned_tracks(), 2);
        assert_eq!(h.call.registry().len(), 1);

        h.call.hang_up().await;
        assert_torn_down(&h.call);
    }

    #[tokio::test]
    async fn hang_up_from_connected_clears_everything() {
        let mut h = harness("Ada");
        let (id, _rx) = h.call.begin_test_session(Role::Caller).await;
        connect(&mut h.call, id).await;
        deliver(&mut h.call, id, ControlMessage::presence("Bob")).await;
        h.call.send_chat("hi").await.unwrap();
        h.call.toggle_screen_share().await.unwrap();
        h.call.start_recording().unwrap();
        assert_eq!(h.call.registry().len(), 2);

        h.call.hang_up().await;
        assert_torn_down(&h.call);
        assert!(!h.call.snapshot().recording);
        assert!(!h.call.snapshot().screen_sharing);

        h.call.hang_up().await;
        assert_torn_down(&h.call);
    }

    #[tokio::test]
    async fn presence_is_first_then_raised_hand() {
        let mut h = harness("Ada");
        let (id, mut rx) = h.call.begin_test_session(Role::Callee).await;
        assert!(h.call.toggle_hand().unwrap());
        assert!(rx.try_recv().is_err());

        connect(&mut h.call, id).await;
        assert_eq!(rx.try_recv().unwrap(), ControlMessage::presence("Ada"));
        assert_eq!(rx.try_recv().unwrap(), ControlMessage::hand_raise(true, "Ada"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn connected_requires_both_transport_and_channel() {
        let mut h = harness("Ada");
        let (id, mut rx) = h.call.begin_test_session(Role::Caller).await;
        h.call
            .handle_peer_event(PeerEvent::DataChannelOpened { session_id: id })
            .await;
        assert_eq!(h.call.connection_state(), ConnectionState::Negotiating);
        assert!(matches!(h.call.send_chat("early").await, Err(CallError::NotConnected)));
        assert!(rx.try_recv().is_err());

        h.call
            .handle_peer_event(PeerEvent::ConnectionStateChanged {
                session_id: id,
                state: TransportState::Connected,
            })
            .await;
        assert_eq!(h.call.connection_state(), ConnectionState::Connected);
        assert!(matches!(rx.try_recv().unwrap(), ControlMessage::Presence(_)));
    }

    #[tokio::test]
    async fn chat_reaches_peer_exactly_once() {
        let mut ada = harness("Ada");
        let mut bob = harness("Bob");
        let (ada_id, mut ada_out) = ada.call.begin_test_session(Role::Caller).await;
        let (bob_id, mut bob_out) = bob.call.begin_test_session(Role::Callee).await;
        connect(&mut ada.call, ada_id).await;
        connect(&mut bob.call, bob_id).await;

        let sent = ada.call.send_chat("hello").await.unwrap();
        assert_eq!(ada.call.chat_messages().len(), 1);

        while let Ok(message) = ada_out.try_recv() {
            deliver(&mut bob.call, bob_id, message).await;
        }
        while let Ok(message) = bob_out.try_recv() {
            deliver(&mut ada.call, ada_id, message).await;
        }

        let log = bob.call.chat_messages();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].text, "hello");
        assert_eq!(log[0].sender, "Ada");
        assert!(!log[0].is_local);
        assert_eq!(bob.call.registry().remote().unwrap().display_name, "Ada");

        // An echo of our own message does not duplicate it.
        let echo = ChatPayload {
            id: sent.id.clone(),
            sender: sent.sender.clone(),
            text: sent.text.clone(),
            timestamp: sent.timestamp.clone(),
        };
        deliver(&mut ada.call, ada_id, ControlMessage::Chat(echo)).await;
        assert_eq!(ada.call.chat_messages().len(), 1);
        assert!(ada.call.chat_messages()[0].is_local);
        assert_eq!(ada.call.registry().remote().unwrap().display_name, "Bob");
    }

    #[tokio::test]
    async fn stale_session_events_are_dropped() {
        let mut h = harness("Ada");
        let (old_id, _) = h.call.begin_test_session(Role::Caller).await;
        let (new_id, _) = h.call.begin_test_session(Role::Caller).await;
        assert_ne!(old_id, new_id);
        assert_eq!(h.call.connection_state(), ConnectionState::Negotiating);

        h.call
            .handle_peer_event(PeerEvent::ConnectionStateChanged {
                session_id: old_id,
                state: TransportState::Failed,
            })
            .await;
        deliver(&mut h.call, old_id, ControlMessage::presence("Ghost")).await;
        assert_eq!(h.call.connection_state(), ConnectionState::Negotiating);
        assert!(h.call.registry().remote().is_none());
    }

    #[tokio::test]
    async fn transport_failure_notifies_and_tears_down() {
        let mut h = harness("Ada");
        let (id, _rx) = h.call.begin_test_session(Role::Caller).await;
        connect(&mut h.call, id).await;
        drain_notifications(&mut h.events);

        h.call
            .handle_peer_event(PeerEvent::ConnectionStateChanged {
                session_id: id,
                state: TransportState::Failed,
            })
            .await;
        assert_torn_down(&h.call);
        let notes = drain_notifications(&mut h.events);
        assert!(notes.iter().any(|(k, m)| *k == NotificationKind::Error && m.contains("failed")));
    }

    #[tokio::test]
    async fn channel_close_while_connected_ends_call() {
        let mut h = harness("Ada");
        let (id, _rx) = h.call.begin_test_session(Role::Callee).await;
        connect(&mut h.call, id).await;
        h.call
            .handle_peer_event(PeerEvent::DataChannelClosed { session_id: id })
            .await;
        assert_torn_down(&h.call);
    }

    #[tokio::test]
    async fn remote_hand_before_presence_gets_placeholder() {
        let mut h = harness("Ada");
        let (id, _rx) = h.call.begin_test_session(Role::Caller).await;
        connect(&mut h.call, id).await;

        deliver(&mut h.call, id, ControlMessage::hand_raise(true, "Bob")).await;
        deliver(&mut h.call, id, ControlMessage::hand_raise(true, "Bob")).await;
        let remote = h.call.registry().remote().unwrap();
        assert!(remote.hand_raised);
        assert_eq!(h.call.registry().len(), 2);
    }

    #[tokio::test]
    async fn denied_capture_notifies_without_state_change() {
        let mut h = harness_with("Ada", StubCaptureProvider::denying_local());
        let err = h.call.start_as_caller().await.unwrap_err();
        assert!(matches!(err, CallError::PermissionDenied));
        assert_eq!(h.call.connection_state(), ConnectionState::Idle);
        assert_eq!(h.call.owned_tracks(), 0);
        let notes = drain_notifications(&mut h.events);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].0, NotificationKind::Error);
    }

    #[tokio::test]
    async fn malformed_offer_is_rejected_before_capture() {
        let mut h = harness("Ada");
        let err = h.call.start_as_callee("{not json").await.unwrap_err();
        assert!(matches!(err, CallError::InvalidSignalingPayload(_)));
        let err = h
            .call
            .start_as_callee(r#"{"type":"answer","sdp":"v=0"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidSignalingPayload(_)));
        assert_eq!(h.call.owned_tracks(), 0);
        assert_eq!(h.call.connection_state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn offer_with_bad_sdp_leaves_live_call_alone() {
        let mut h = harness("Ada");
        let (id, _rx) = h.call.begin_test_session(Role::Caller).await;
        connect(&mut h.call, id).await;
        deliver(&mut h.call, id, ControlMessage::presence("Bob")).await;
        drain_notifications(&mut h.events);

        let err = h
            .call
            .start_as_callee(r#"{"type":"offer","sdp":"not an sdp"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidSignalingPayload(_)));
        assert_eq!(h.call.connection_state(), ConnectionState::Connected);
        assert_eq!(h.call.registry().len(), 2);
        assert_eq!(h.call.owned_tracks(), 2);

        let notes = drain_notifications(&mut h.events);
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].0, NotificationKind::Error);
    }

    #[tokio::test]
    async fn answer_without_session_is_rejected() {
        let mut h = harness("Ada");
        let err = h
            .call
            .apply_remote_answer(r#"{"type":"answer","sdp":"v=0"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::NoActiveSession));
    }

    #[tokio::test]
    async fn screen_share_without_session_is_safe() {
        let mut h = harness("Ada");
        assert!(h.call.toggle_screen_share().await.unwrap());
        assert!(!h.call.toggle_screen_share().await.unwrap());
        assert!(matches!(h.call.start_recording(), Err(CallError::RecordingUnavailable)));
    }

    #[tokio::test]
    async fn mute_is_reflected_in_roster() {
        let mut h = harness("Ada");
        h.call.begin_test_session(Role::Caller).await;
        assert!(h.call.toggle_mute());
        assert!(h.call.registry().local().unwrap().is_muted);
        assert!(h.call.snapshot().muted);
        assert!(!h.call.toggle_mute());
        assert!(!h.call.registry().local().unwrap().is_muted);
    }

    #[tokio::test]
    async fn recording_prefers_remote_video_and_saves() {
        let mut h = harness("Ada");
        let (id, _rx) = h.call.begin_test_session(Role::Caller).await;
        connect(&mut h.call, id).await;
        let remote_video = h.call.remote_media().inject(TrackKind::Video);

        assert!(h.call.stop_recording().await.unwrap().is_none());
        h.call.start_recording().unwrap();
        assert!(matches!(h.call.start_recording(), Err(CallError::AlreadyRecording)));

        remote_video
            .send(MediaFrame {
                kind: TrackKind::Video,
                data: bytes::Bytes::from_static(b"remote-frame"),
                duration: Duration::from_millis(33),
            })
            .unwrap();

        let path = h.call.stop_recording().await.unwrap().unwrap();
        assert!(path.starts_with(&h.call.config().recordings_dir));
        let data = std::fs::read(&path).unwrap();
        assert!(data.starts_with(b"PCRC"));
        assert!(data.windows(12).any(|w| w == b"remote-frame"));
        assert!(!h.call.snapshot().recording);
    }

    #[tokio::test]
    async fn dropped_connection_saves_recording() {
        let mut h = harness("Ada");
        let (id, _rx) = h.call.begin_test_session(Role::Caller).await;
        connect(&mut h.call, id).await;
        let remote_video = h.call.remote_media().inject(TrackKind::Video);
        h.call.start_recording().unwrap();
        remote_video
            .send(MediaFrame {
                kind: TrackKind::Video,
                data: bytes::Bytes::from_static(b"last-frame"),
                duration: Duration::from_millis(33),
            })
            .unwrap();
        while h.events.try_recv().is_ok() {}

        h.call
            .handle_peer_event(PeerEvent::ConnectionStateChanged {
                session_id: id,
                state: TransportState::Failed,
            })
            .await;
        assert_torn_down(&h.call);
        assert!(!h.call.snapshot().recording);

        let mut saved = None;
        while let Ok(event) = h.events.try_recv() {
            if let AppEvent::RecordingSaved { path, .. } = event {
                saved = Some(PathBuf::from(path));
            }
        }
        let path = saved.expect("recording saved on teardown");
        let data = std::fs::read(&path).unwrap();
        assert!(data.windows(10).any(|w| w == b"last-frame"));
    }
}
