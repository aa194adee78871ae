pub mod call;
pub mod chat;
pub mod media;
pub mod recording;

use axum::http::StatusCode;

use crate::error::CallError;

pub type ApiResult<T> = Result<T, (StatusCode, String)>;

/// Map a call error onto the HTTP status the UI reacts to.
pub fn api_error(e: CallError) -> (StatusCode, String) {
    let status = match &e {
        CallError::InvalidSignalingPayload(_) => StatusCode::BAD_REQUEST,
        CallError::PermissionDenied | CallError::ScreenShareDenied => StatusCode::FORBIDDEN,
        CallError::NoActiveSession
        | CallError::NotConnected
        | CallError::InvalidState(_)
        | CallError::AlreadyRecording
        | CallError::RecordingUnavailable => StatusCode::CONFLICT,
        CallError::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        CallError::ConnectionFailure(_)
        | CallError::Transport(_)
        | CallError::Media(_)
        | CallError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_errors_are_not_server_errors() {
        assert_eq!(
            api_error(CallError::InvalidSignalingPayload("x".into())).0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(api_error(CallError::NotConnected).0, StatusCode::CONFLICT);
        assert_eq!(api_error(CallError::ScreenShareDenied).0, StatusCode::FORBIDDEN);
        let (status, body) = api_error(CallError::EngineUnavailable);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "session engine is not running");
    }
}
