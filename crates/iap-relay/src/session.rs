//! Session identifier and connection phase

use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::{info, warn};

/// Connection phase of a relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Connecting,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Default)]
struct SessionState {
    phase: SessionPhase,
    sid: String,
}

/// Session state shared by both relay directions
///
/// Only the transport-to-local direction mutates it; the other direction
/// waits on the phase before emitting data.
#[derive(Debug)]
pub struct Session {
    state: watch::Sender<SessionState>,
    reconnect_acks: AtomicU64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            state,
            reconnect_acks: AtomicU64::new(0),
        }
    }

    /// Store the session token issued by the peer and mark the session connected
    ///
    /// A later call overwrites the token (reconnection).
    pub fn on_connect_success_sid(&self, sid: String) {
        let mut previous = None;
        self.state.send_modify(|state| {
            if !state.sid.is_empty() && state.sid != sid {
                previous = Some(std::mem::take(&mut state.sid));
            }
            state.sid = sid;
            if state.phase == SessionPhase::Connecting {
                state.phase = SessionPhase::Connected;
            }
        });

        let sid = self.current_sid();
        match previous {
            Some(old) => info!(sid = %sid, previous = %old, "Session identifier replaced"),
            None => info!(sid = %sid, "Session connected"),
        }
    }

    /// Note that the peer acknowledged a reconnect
    ///
    /// Phase and flow counters are left untouched.
    pub fn on_reconnect_success_ack(&self) {
        let count = self.reconnect_acks.fetch_add(1, Ordering::Relaxed) + 1;
        let phase = self.phase();
        if phase == SessionPhase::Connected {
            info!(sid = %self.current_sid(), count, "Reconnect acknowledged");
        } else {
            warn!(?phase, count, "Reconnect acknowledged outside a connected session");
        }
    }

    /// Current session token, empty until connected
    pub fn current_sid(&self) -> String {
        self.state.borrow().sid.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.borrow().phase
    }

    pub fn is_connected(&self) -> bool {
        self.phase() == SessionPhase::Connected
    }

    /// Number of ReconnectSuccessAck messages seen so far
    pub fn reconnect_acks(&self) -> u64 {
        self.reconnect_acks.load(Ordering::Relaxed)
    }

    /// Mark the session closed, releasing anyone waiting for it to connect
    pub fn close(&self) {
        self.state.send_modify(|state| state.phase = SessionPhase::Closed);
    }

    /// Wait until the session leaves `Connecting`
    ///
    /// Returns `true` if it is connected, `false` if it was closed first.
    pub async fn wait_connected(&self) -> bool {
        let mut rx = self.state.subscribe();
        let result = rx
            .wait_for(|state| state.phase != SessionPhase::Connecting)
            .await
            .map(|state| state.phase == SessionPhase::Connected);
        result.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_initial_state() {
        let session = Session::new();
        assert_eq!(session.current_sid(), "");
        assert_eq!(session.phase(), SessionPhase::Connecting);
        assert!(!session.is_connected());
    }

    #[test]
    fn test_connect_success_sid() {
        let session = Session::new();
        session.on_connect_success_sid("abc123".to_string());

        assert_eq!(session.current_sid(), "abc123");
        assert_eq!(session.phase(), SessionPhase::Connected);
    }

    #[test]
    fn test_sid_overwritten() {
        let session = Session::new();
        session.on_connect_success_sid("first".to_string());
        session.on_connect_success_sid("second".to_string());

        assert_eq!(session.current_sid(), "second");
        assert!(session.is_connected());
    }

    #[test]
    fn test_reconnect_ack_keeps_phase() {
        let session = Session::new();
        session.on_connect_success_sid("sid".to_string());
        session.on_reconnect_success_ack();
        session.on_reconnect_success_ack();

        assert!(session.is_connected());
        assert_eq!(session.current_sid(), "sid");
        assert_eq!(session.reconnect_acks(), 2);
    }

    #[test]
    fn test_close() {
        let session = Session::new();
        session.on_connect_success_sid("sid".to_string());
        session.close();
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert_eq!(session.current_sid(), "sid");
    }

    #[tokio::test]
    async fn test_wait_connected() {
        let session = Arc::new(Session::new());

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_connected().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        session.on_connect_success_sid("sid".to_string());
        assert!(waiter.await.unwrap());

        // Already connected: returns immediately
        assert!(session.wait_connected().await);
    }

    #[tokio::test]
    async fn test_wait_connected_released_by_close() {
        let session = Arc::new(Session::new());

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_connected().await })
        };

        session.close();
        assert!(!waiter.await.unwrap());
    }
}
