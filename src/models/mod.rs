use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================
// Call lifecycle
// ============================================================

/// Lifecycle of one call attempt.
///
/// ```text
/// Idle -> Negotiating -> Connected -> {Disconnected, Failed} -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Negotiating,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Transport loss; the only way out is `Closed`.
    pub fn is_lost(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Negotiating => "negotiating",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Caller,
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataChannelState {
    Closed,
    Connecting,
    Open,
}

// ============================================================
// Roster & chat
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub is_local: bool,
    pub is_muted: bool,
    pub hand_raised: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender: String,
    pub text: String,
    pub timestamp: String,
    pub is_local: bool,
}

// ============================================================
// Notifications
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Error,
}

// ============================================================
// Snapshot returned by GET /call/state
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallState {
    pub connection_state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub data_channel_state: DataChannelState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub muted: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
    pub recording: bool,
    pub participants: Vec<Participant>,
}

impl Default for CallState {
    fn default() -> Self {
        Self {
            connection_state: ConnectionState::Idle,
            role: None,
            data_channel_state: DataChannelState::Closed,
            created_at: None,
            muted: false,
            video_enabled: false,
            screen_sharing: false,
            recording: false,
            participants: Vec::new(),
        }
    }
}
