use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::info;

use super::call::CallSession;
use super::peer::PeerEvent;
use super::{SessionCommand, SessionHandle};
use crate::config::SessionConfig;
use crate::events::EventSender;
use crate::media::capture::MediaCaptureProvider;
use crate::models::CallState;

/// Create the engine channels and spawn its event loop.
pub fn spawn_session_engine(
    config: SessionConfig,
    provider: Arc<dyn MediaCaptureProvider>,
    event_tx: EventSender,
) -> SessionHandle {
    let (command_tx, command_rx) = mpsc::channel::<SessionCommand>(64);
    let (state_tx, state_rx) = watch::channel(CallState::default());
    let (peer_tx, peer_rx) = mpsc::channel::<PeerEvent>(256);
    let (screen_ended_tx, screen_ended_rx) = mpsc::unbounded_channel();

    let session = CallSession::new(config, provider, event_tx, peer_tx, screen_ended_tx);
    tokio::spawn(run_session_engine(
        command_rx,
        session,
        peer_rx,
        screen_ended_rx,
        state_tx,
    ));
    SessionHandle::new(command_tx, state_rx)
}

/// Run the session engine event loop.
/// Owns the single `CallSession`; commands, transport events and screen-end
/// notifications are handled one at a time.
pub async fn run_session_engine(
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    mut session: CallSession,
    mut peer_rx: mpsc::Receiver<PeerEvent>,
    mut screen_ended_rx: mpsc::UnboundedReceiver<String>,
    state_tx: watch::Sender<CallState>,
) {
    info!("Session engine started for {}", session.config().display_name);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                handle_command(&mut session, cmd).await;
            }
            Some(event) = peer_rx.recv() => {
                session.handle_peer_event(event).await;
            }
            Some(track_id) = screen_ended_rx.recv() => {
                session.screen_track_ended(&track_id).await;
            }
        }
        state_tx.send_replace(session.snapshot());
    }

    session.hang_up().await;
    state_tx.send_replace(session.snapshot());
    info!("Session engine stopped");
}

async fn handle_command(session: &mut CallSession, cmd: SessionCommand) {
    match cmd {
        SessionCommand::StartCall { reply } => {
            let _ = reply.send(session.start_as_caller().await);
        }
        SessionCommand::AcceptOffer { offer, reply } => {
            let _ = reply.send(session.start_as_callee(&offer).await);
        }
        SessionCommand::ApplyAnswer { answer, reply } => {
            let _ = reply.send(session.apply_remote_answer(&answer).await);
        }
        SessionCommand::HangUp { reply } => {
            session.hang_up().await;
            let _ = reply.send(());
        }
        SessionCommand::ToggleMute { reply } => {
            let _ = reply.send(session.toggle_mute());
        }
        SessionCommand::ToggleVideo { reply } => {
            let _ = reply.send(session.toggle_video());
        }
        SessionCommand::ToggleScreenShare { reply } => {
            let _ = reply.send(session.toggle_screen_share().await);
        }
        SessionCommand::SendChat { text, reply } => {
            let _ = reply.send(session.send_chat(&text).await);
        }
        SessionCommand::ToggleHand { reply } => {
            let _ = reply.send(session.toggle_hand());
        }
        SessionCommand::StartRecording { reply } => {
            let _ = reply.send(session.start_recording());
        }
        SessionCommand::StopRecording { reply } => {
            let _ = reply.send(session.stop_recording().await);
        }
        SessionCommand::ChatHistory { reply } => {
            let _ = reply.send(session.chat_messages());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::events::create_event_bus;
    use crate::media::capture::testing::StubCaptureProvider;
    use crate::models::ConnectionState;

    #[tokio::test]
    async fn handle_round_trips_commands() {
        let (event_tx, _rx) = create_event_bus();
        let dir = tempfile::tempdir().unwrap();
        let config = SessionConfig {
            display_name: "Ada".into(),
            recordings_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let handle = spawn_session_engine(config, Arc::new(StubCaptureProvider::default()), event_tx);

        assert_eq!(handle.state().connection_state, ConnectionState::Idle);
        assert!(matches!(handle.send_chat("hi".into()).await, Err(CallError::NotConnected)));
        assert!(matches!(handle.toggle_hand().await, Err(CallError::NoActiveSession)));
        assert!(handle.stop_recording().await.unwrap().is_none());
        assert!(handle.chat_history().await.unwrap().is_empty());

        let mut state = handle.subscribe_state();
        handle.hang_up().await.unwrap();
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            state.wait_for(|s| s.connection_state == ConnectionState::Closed),
        )
        .await
        .unwrap()
        .unwrap();
    }
}
