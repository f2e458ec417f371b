//! Session state machine
//!
//! ```text
//! Created -> Negotiating -> Connected -> Closing -> Closed
//!                 |             |           ^
//!                 +-> Failed <--+-----------+
//! ```
//!
//! Closing is entered exactly once, guarded by a compare-and-set flag, and
//! cancels the session token so every task bound to the session stops.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Lifecycle state of a call session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Negotiating,
    Connected,
    Failed,
    Closing,
    Closed,
}

impl SessionState {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Negotiating)
                | (Created, Closing)
                | (Negotiating, Connected)
                | (Negotiating, Failed)
                | (Negotiating, Closing)
                | (Connected, Failed)
                | (Connected, Closing)
                | (Failed, Closing)
                | (Closing, Closed)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Created => write!(f, "created"),
            SessionState::Negotiating => write!(f, "negotiating"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Failed => write!(f, "failed"),
            SessionState::Closing => write!(f, "closing"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Why a session was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Session lifetime elapsed
    Timeout,
    /// Peer connection failed or was closed by the remote side
    TransportFailure,
    /// Negotiation did not produce an answer
    NegotiationFailed,
    /// Media production faulted (encoder or sink error)
    Fault,
    /// Signaling asked for it (SIP BYE, HTTP close)
    Explicit,
    /// Process shutdown
    Shutdown,
}

impl CloseReason {
    /// Reasons that pass through the `Failed` state
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            CloseReason::TransportFailure | CloseReason::NegotiationFailed | CloseReason::Fault
        )
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Timeout => write!(f, "timeout"),
            CloseReason::TransportFailure => write!(f, "transport failure"),
            CloseReason::NegotiationFailed => write!(f, "negotiation failed"),
            CloseReason::Fault => write!(f, "fault"),
            CloseReason::Explicit => write!(f, "explicit close"),
            CloseReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// State, deadline and cancellation of one session
pub struct SessionLifecycle {
    state_tx: watch::Sender<SessionState>,
    closing: AtomicBool,
    cancel: CancellationToken,
    deadline: Instant,
}

impl SessionLifecycle {
    pub fn new(deadline: Instant) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Created);
        Self {
            state_tx,
            closing: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            deadline,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Apply a transition; illegal transitions are ignored
    pub fn transition(&self, next: SessionState) -> bool {
        let mut applied = false;
        self.state_tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                trace!("Session state {} -> {}", state, next);
                *state = next;
                applied = true;
                true
            } else {
                if *state != next {
                    debug!("Ignoring session state change {} -> {}", state, next);
                }
                false
            }
        });
        applied
    }

    /// Claim the close path; only the first caller gets `true`
    pub fn begin_close(&self, reason: CloseReason) -> bool {
        if self
            .closing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        if reason.is_failure() {
            self.transition(SessionState::Failed);
        }
        self.transition(SessionState::Closing);
        self.cancel.cancel();
        true
    }

    pub fn finish_close(&self) {
        self.transition(SessionState::Closed);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// False once closing started or the deadline passed
    pub fn is_valid(&self) -> bool {
        !self.is_closing() && !self.cancel.is_cancelled() && Instant::now() < self.deadline
    }

    /// Resolve `true` once connected, `false` if the session becomes invalid first
    pub async fn wait_connected(&self) -> bool {
        let mut rx = self.subscribe();
        loop {
            if *rx.borrow_and_update() == SessionState::Connected {
                return self.is_valid();
            }
            if !self.is_valid() {
                return false;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep_until(self.deadline) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn lifecycle(secs: u64) -> SessionLifecycle {
        SessionLifecycle::new(Instant::now() + Duration::from_secs(secs))
    }

    #[test]
    fn test_transition_table() {
        use SessionState::*;
        assert!(Created.can_transition_to(Negotiating));
        assert!(Negotiating.can_transition_to(Connected));
        assert!(Failed.can_transition_to(Closing));
        assert!(!Created.can_transition_to(Connected));
        assert!(!Closed.can_transition_to(Closing));
        assert!(!Closing.can_transition_to(Connected));
    }

    #[tokio::test]
    async fn test_begin_close_only_once() {
        let lc = lifecycle(60);
        lc.transition(SessionState::Negotiating);
        assert!(lc.begin_close(CloseReason::Explicit));
        assert!(!lc.begin_close(CloseReason::Timeout));
        assert_eq!(lc.state(), SessionState::Closing);
        assert!(lc.cancel_token().is_cancelled());
        assert!(!lc.is_valid());
    }

    #[tokio::test]
    async fn test_failure_passes_through_failed() {
        let lc = lifecycle(60);
        lc.transition(SessionState::Negotiating);
        lc.transition(SessionState::Connected);
        assert!(lc.transition(SessionState::Failed));
        assert!(!lc.transition(SessionState::Connected));

        // already Failed; begin_close only moves on to Closing
        assert!(lc.begin_close(CloseReason::TransportFailure));
        assert_eq!(lc.state(), SessionState::Closing);
        lc.finish_close();
        assert_eq!(lc.state(), SessionState::Closed);
    }

    #[test]
    fn test_failure_before_negotiation_goes_straight_to_closing() {
        let lc = lifecycle(60);
        assert!(lc.begin_close(CloseReason::Fault));
        assert_eq!(lc.state(), SessionState::Closing);
    }

    #[tokio::test]
    async fn test_wait_connected() {
        let lc = Arc::new(lifecycle(60));
        lc.transition(SessionState::Negotiating);

        let waiter = {
            let lc = lc.clone();
            tokio::spawn(async move { lc.wait_connected().await })
        };
        tokio::task::yield_now().await;
        lc.transition(SessionState::Connected);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_connected_gives_up_at_deadline() {
        let lc = lifecycle(5);
        lc.transition(SessionState::Negotiating);
        assert!(!lc.wait_connected().await);
        assert!(!lc.is_valid());
    }

    #[tokio::test]
    async fn test_wait_connected_false_after_close() {
        let lc = Arc::new(lifecycle(60));
        let waiter = {
            let lc = lc.clone();
            tokio::spawn(async move { lc.wait_connected().await })
        };
        tokio::task::yield_now().await;
        lc.begin_close(CloseReason::Explicit);
        assert!(!waiter.await.unwrap());
    }
}
