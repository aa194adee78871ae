use serde::Serialize;
use tokio::sync::broadcast;

use crate::media::track::TrackKind;
use crate::models::{ChatMessage, ConnectionState, NotificationKind, Participant};

/// Transport-agnostic call events.
/// Emitted by the session engine, consumed by the WebSocket API.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum AppEvent {
    // Lifecycle
    ConnectionStateChanged { state: ConnectionState },
    RemoteTrackAdded { kind: TrackKind },
    // Roster & chat
    ParticipantUpdated(Participant),
    ParticipantsCleared,
    ChatMessage(ChatMessage),
    // Local media
    MediaStateChanged { muted: bool, video_enabled: bool, screen_sharing: bool },
    RecordingSaved { path: String, bytes: usize },
    // User-facing notifications
    Notification { kind: NotificationKind, message: String },
}

pub type EventSender = broadcast::Sender<AppEvent>;
pub type EventReceiver = broadcast::Receiver<AppEvent>;

pub fn create_event_bus() -> (EventSender, EventReceiver) {
    broadcast::channel(256)
}

/// Emit a user-facing notification. Send errors only mean nobody is listening.
pub fn notify(tx: &EventSender, kind: NotificationKind, message: impl Into<String>) {
    let _ = tx.send(AppEvent::Notification {
        kind,
        message: message.into(),
    });
}
