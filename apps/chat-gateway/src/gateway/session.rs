//! Per-connection gateway session state.

use super::registry::ConnectionId;

/// Lifecycle of one socket. Joined rooms are tracked by the registry as a set
/// of facets on `Connected`, not as separate states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket accepted, waiting for IDENTIFY.
    Connecting,
    /// Admitted and registered.
    Connected,
    /// Terminal.
    Disconnected,
}

/// State owned by the task serving a single WebSocket connection.
pub struct GatewaySession {
    pub connection_id: ConnectionId,
    /// Set once IDENTIFY succeeds.
    pub user_id: Option<String>,
    state: ConnectionState,
    /// Monotonically increasing sequence number for dispatch events.
    seq: u64,
}

impl GatewaySession {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            user_id: None,
            state: ConnectionState::Connecting,
            seq: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// `Connecting -> Connected`. Returns `false` from any other state.
    pub fn mark_connected(&mut self, user_id: String) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.user_id = Some(user_id);
        self.state = ConnectionState::Connected;
        true
    }

    /// Move to `Disconnected`. Returns `false` if already there, so teardown
    /// runs at most once.
    pub fn mark_disconnected(&mut self) -> bool {
        if self.state == ConnectionState::Disconnected {
            return false;
        }
        self.state = ConnectionState::Disconnected;
        true
    }

    /// Get the next sequence number for a dispatch event.
    pub fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_moves_forward_only() {
        let mut session = GatewaySession::new(ConnectionId::from("c"));
        assert_eq!(session.state(), ConnectionState::Connecting);

        assert!(session.mark_connected("usr_1".into()));
        assert!(!session.mark_connected("usr_2".into()));
        assert_eq!(session.user_id.as_deref(), Some("usr_1"));

        assert!(session.mark_disconnected());
        assert!(!session.mark_disconnected());
        assert!(!session.mark_connected("usr_1".into()));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn handshake_failure_disconnects_from_connecting() {
        let mut session = GatewaySession::new(ConnectionId::from("c"));
        assert!(session.mark_disconnected());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn seq_starts_at_one() {
        let mut session = GatewaySession::new(ConnectionId::from("c"));
        assert_eq!(session.next_seq(), 1);
        assert_eq!(session.next_seq(), 2);
    }
}
