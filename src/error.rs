use thiserror::Error;

/// Failures surfaced by call operations.
///
/// Capture and signaling failures are recovered where they occur and turned
/// into a notification; only connection-state changes alter the session.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("media permission denied")]
    PermissionDenied,

    #[error("invalid signaling payload: {0}")]
    InvalidSignalingPayload(String),

    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    #[error("nothing to record: no media stream is available")]
    RecordingUnavailable,

    #[error("a recording is already in progress")]
    AlreadyRecording,

    #[error("screen share was cancelled or denied")]
    ScreenShareDenied,

    #[error("no active session")]
    NoActiveSession,

    #[error("peer is not connected")]
    NotConnected,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("media error: {0}")]
    Media(String),

    #[error("session engine is not running")]
    EngineUnavailable,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<webrtc::Error> for CallError {
    fn from(e: webrtc::Error) -> Self {
        CallError::Transport(e.to_string())
    }
}

/// Errors reported by a [`MediaCaptureProvider`](crate::media::capture::MediaCaptureProvider).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("permission denied")]
    PermissionDenied,

    #[error("capture cancelled by user")]
    Cancelled,

    #[error("device not available: {0}")]
    DeviceUnavailable(String),
}

/// Decode failures for control-channel messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed control message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("binary control messages are not supported")]
    Binary,
}

pub type Result<T> = std::result::Result<T, CallError>;
