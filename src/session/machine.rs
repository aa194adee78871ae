use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use crate::models::{ConnectionState, DataChannelState};

/// Transport-level state as reported by the peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for TransportState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
            _ => Self::New,
        }
    }
}

/// Folds transport and data-channel signals into the call's
/// [`ConnectionState`]. Every method returns the new state when it changed.
///
/// `Connected` needs both the transport and the control channel up. Losing
/// either afterwards is `Disconnected`; from there and from `Failed` the only
/// move is `close()`.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    state: ConnectionState,
    transport_connected: bool,
    channel: DataChannelState,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
            transport_connected: false,
            channel: DataChannelState::Closed,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn data_channel_state(&self) -> DataChannelState {
        self.channel
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// A local description exists; waiting for the other side.
    pub fn begin(&mut self) -> Option<ConnectionState> {
        if self.state != ConnectionState::Idle {
            return None;
        }
        self.channel = DataChannelState::Connecting;
        self.set(ConnectionState::Negotiating)
    }

    pub fn on_transport(&mut self, transport: TransportState) -> Option<ConnectionState> {
        self.transport_connected = transport == TransportState::Connected;
        if !self.is_live() {
            return None;
        }
        match transport {
            TransportState::Connected => self.try_connect(),
            TransportState::Disconnected | TransportState::Closed => {
                self.set(ConnectionState::Disconnected)
            }
            TransportState::Failed => self.set(ConnectionState::Failed),
            TransportState::New | TransportState::Connecting => None,
        }
    }

    pub fn on_channel_open(&mut self) -> Option<ConnectionState> {
        if !self.is_live() {
            return None;
        }
        self.channel = DataChannelState::Open;
        self.try_connect()
    }

    pub fn on_channel_closed(&mut self) -> Option<ConnectionState> {
        let was_open = self.channel == DataChannelState::Open;
        self.channel = DataChannelState::Closed;
        if self.state == ConnectionState::Connected && was_open {
            return self.set(ConnectionState::Disconnected);
        }
        None
    }

    /// Terminal. Valid from every state.
    pub fn close(&mut self) -> Option<ConnectionState> {
        self.transport_connected = false;
        self.channel = DataChannelState::Closed;
        self.set(ConnectionState::Closed)
    }

    fn is_live(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Negotiating | ConnectionState::Connected
        )
    }

    fn try_connect(&mut self) -> Option<ConnectionState> {
        if self.state == ConnectionState::Negotiating
            && self.transport_connected
            && self.channel == DataChannelState::Open
        {
            return self.set(ConnectionState::Connected);
        }
        None
    }

    fn set(&mut self, next: ConnectionState) -> Option<ConnectionState> {
        if self.state == next {
            return None;
        }
        self.state = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiating() -> ConnectionTracker {
        let mut t = ConnectionTracker::new();
        assert_eq!(t.begin(), Some(ConnectionState::Negotiating));
        t
    }

    #[test]
    fn connected_needs_transport_and_channel() {
        let mut t = negotiating();
        assert_eq!(t.on_transport(TransportState::Connecting), None);
        assert_eq!(t.on_transport(TransportState::Connected), None);
        assert_eq!(t.on_channel_open(), Some(ConnectionState::Connected));

        let mut t = negotiating();
        assert_eq!(t.on_channel_open(), None);
        assert_eq!(
            t.on_transport(TransportState::Connected),
            Some(ConnectionState::Connected)
        );
        assert_eq!(t.data_channel_state(), DataChannelState::Open);
    }

    #[test]
    fn lost_states_only_close() {
        let mut t = negotiating();
        t.on_transport(TransportState::Connected);
        t.on_channel_open();
        assert_eq!(
            t.on_transport(TransportState::Failed),
            Some(ConnectionState::Failed)
        );
        assert_eq!(t.on_transport(TransportState::Connected), None);
        assert_eq!(t.on_channel_open(), None);
        assert_eq!(t.state(), ConnectionState::Failed);
        assert_eq!(t.close(), Some(ConnectionState::Closed));
    }

    #[test]
    fn channel_close_while_connected_is_disconnect() {
        let mut t = negotiating();
        t.on_transport(TransportState::Connected);
        t.on_channel_open();
        assert_eq!(t.on_channel_closed(), Some(ConnectionState::Disconnected));
        assert!(t.state().is_lost());
    }

    #[test]
    fn close_is_terminal_and_idempotent() {
        let mut t = ConnectionTracker::new();
        assert_eq!(t.close(), Some(ConnectionState::Closed));
        assert_eq!(t.close(), None);
        assert_eq!(t.begin(), None);
        assert_eq!(t.on_transport(TransportState::Connected), None);
        assert!(t.state().is_terminal());
    }
}
