pub mod call;
pub mod engine;
pub mod machine;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod signaling;

use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{CallError, Result};
use crate::models::{CallState, ChatMessage};
use signaling::{AnswerOutcome, SignalingBlob};

/// Commands sent to the session engine from API routes.
#[derive(Debug)]
pub enum SessionCommand {
    StartCall {
        reply: oneshot::Sender<Result<SignalingBlob>>,
    },
    AcceptOffer {
        offer: String,
        reply: oneshot::Sender<Result<SignalingBlob>>,
    },
    ApplyAnswer {
        answer: String,
        reply: oneshot::Sender<Result<AnswerOutcome>>,
    },
    HangUp {
        reply: oneshot::Sender<()>,
    },
    ToggleMute {
        reply: oneshot::Sender<bool>,
    },
    ToggleVideo {
        reply: oneshot::Sender<bool>,
    },
    ToggleScreenShare {
        reply: oneshot::Sender<Result<bool>>,
    },
    SendChat {
        text: String,
        reply: oneshot::Sender<Result<ChatMessage>>,
    },
    ToggleHand {
        reply: oneshot::Sender<Result<bool>>,
    },
    StartRecording {
        reply: oneshot::Sender<Result<()>>,
    },
    StopRecording {
        reply: oneshot::Sender<Result<Option<PathBuf>>>,
    },
    ChatHistory {
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
}

/// Handle for sending commands to the session engine.
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<CallState>,
}

impl SessionHandle {
    pub fn new(command_tx: mpsc::Sender<SessionCommand>, state_rx: watch::Receiver<CallState>) -> Self {
        Self { command_tx, state_rx }
    }

    /// Latest snapshot published by the engine.
    pub fn state(&self) -> CallState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CallState> {
        self.state_rx.clone()
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(make(reply))
            .await
            .map_err(|_| CallError::EngineUnavailable)?;
        rx.await.map_err(|_| CallError::EngineUnavailable)
    }

    pub async fn start_call(&self) -> Result<SignalingBlob> {
        self.request(|reply| SessionCommand::StartCall { reply }).await?
    }

    pub async fn accept_offer(&self, offer: String) -> Result<SignalingBlob> {
        self.request(|reply| SessionCommand::AcceptOffer { offer, reply }).await?
    }

    pub async fn apply_answer(&self, answer: String) -> Result<AnswerOutcome> {
        self.request(|reply| SessionCommand::ApplyAnswer { answer, reply }).await?
    }

    pub async fn hang_up(&self) -> Result<()> {
        self.request(|reply| SessionCommand::HangUp { reply }).await
    }

    pub async fn toggle_mute(&self) -> Result<bool> {
        self.request(|reply| SessionCommand::ToggleMute { reply }).await
    }

    pub async fn toggle_video(&self) -> Result<bool> {
        self.request(|reply| SessionCommand::ToggleVideo { reply }).await
    }

    pub async fn toggle_screen_share(&self) -> Result<bool> {
        self.request(|reply| SessionCommand::ToggleScreenShare { reply }).await?
    }

    pub async fn send_chat(&self, text: String) -> Result<ChatMessage> {
        self.request(|reply| SessionCommand::SendChat { text, reply }).await?
    }

    pub async fn toggle_hand(&self) -> Result<bool> {
        self.request(|reply| SessionCommand::ToggleHand { reply }).await?
    }

    pub async fn start_recording(&self) -> Result<()> {
        self.request(|reply| SessionCommand::StartRecording { reply }).await?
    }

    pub async fn stop_recording(&self) -> Result<Option<PathBuf>> {
        self.request(|reply| SessionCommand::StopRecording { reply }).await?
    }

    pub async fn chat_history(&self) -> Result<Vec<ChatMessage>> {
        self.request(|reply| SessionCommand::ChatHistory { reply }).await
    }
}
