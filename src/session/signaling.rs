use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;

use crate::error::{CallError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

impl std::fmt::Display for DescriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
        })
    }
}

/// The human-relayed handshake payload: `{"type":"offer"|"answer","sdp":"..."}`.
/// It carries every gathered candidate, so one blob each way is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingBlob {
    #[serde(rename = "type")]
    pub kind: DescriptionKind,
    pub sdp: String,
}

impl SignalingBlob {
    /// Parse pasted text. Surrounding whitespace from copy/paste is ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CallError::InvalidSignalingPayload("empty payload".into()));
        }
        let blob: SignalingBlob = serde_json::from_str(text)
            .map_err(|e| CallError::InvalidSignalingPayload(e.to_string()))?;
        if blob.sdp.trim().is_empty() {
            return Err(CallError::InvalidSignalingPayload("missing sdp".into()));
        }
        Ok(blob)
    }

    /// Parse and require a specific kind.
    pub fn parse_as(text: &str, kind: DescriptionKind) -> Result<Self> {
        let blob = Self::parse(text)?;
        if blob.kind != kind {
            return Err(CallError::InvalidSignalingPayload(format!(
                "expected an {}, got an {}",
                kind, blob.kind
            )));
        }
        Ok(blob)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CallError::InvalidSignalingPayload(e.to_string()))
    }

    pub fn from_description(desc: &RTCSessionDescription) -> Option<Self> {
        let kind = match desc.sdp_type {
            RTCSdpType::Offer => DescriptionKind::Offer,
            RTCSdpType::Answer => DescriptionKind::Answer,
            _ => return None,
        };
        Some(Self {
            kind,
            sdp: desc.sdp.clone(),
        })
    }

    pub fn into_description(self) -> Result<RTCSessionDescription> {
        let desc = match self.kind {
            DescriptionKind::Offer => RTCSessionDescription::offer(self.sdp),
            DescriptionKind::Answer => RTCSessionDescription::answer(self.sdp),
        };
        desc.map_err(|e| CallError::InvalidSignalingPayload(e.to_string()))
    }

    pub fn candidate_count(&self) -> usize {
        self.sdp.matches("a=candidate:").count()
    }
}

/// Result of applying a remote answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    Applied,
    /// A remote description is already in place and the session is stable.
    AlreadyApplied,
}

/// What applying an answer in the given signaling state amounts to.
pub fn answer_disposition(state: RTCSignalingState, has_remote: bool) -> Result<AnswerOutcome> {
    match state {
        RTCSignalingState::HaveLocalOffer => Ok(AnswerOutcome::Applied),
        RTCSignalingState::Stable if has_remote => Ok(AnswerOutcome::AlreadyApplied),
        other => Err(CallError::InvalidState(format!(
            "cannot apply an answer in signaling state {}",
            other
        ))),
    }
}

/// Wait for ICE gathering to finish, up to `limit`. Returns false on timeout,
/// in which case the caller exposes whatever has been gathered so far.
pub async fn await_gathering(mut done: mpsc::Receiver<()>, limit: Duration) -> bool {
    match tokio::time::timeout(limit, done.recv()).await {
        Ok(_) => {
            debug!("ICE gathering complete");
            true
        }
        Err(_) => {
            warn!(
                "ICE gathering did not finish within {:?}; exposing partial candidates",
                limit
            );
            false
        }
    }
}
