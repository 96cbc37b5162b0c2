//! services/client/src/sync/gate.rs
//!
//! The readiness gate withholds rendering until the auth session has resolved and,
//! for a signed-in user, the first profile snapshot has arrived. A one-shot timer
//! armed on every session acquisition opens it anyway so a store outage degrades to
//! stale or default data instead of an endless spinner.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why the gate opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenReason {
    SignedOut,
    ProfileLoaded,
    ProfileFailed,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    /// No auth event has been seen yet.
    AwaitingAuth,
    /// Signed in; waiting for the first profile snapshot of session scope `epoch`.
    PendingProfile { epoch: u64 },
    Open(OpenReason),
}

pub struct ReadinessGate {
    state: watch::Sender<GateState>,
    timeout: Duration,
    /// Cancels the timer of the pending acquisition.
    timer: Mutex<Option<CancellationToken>>,
}

impl ReadinessGate {
    pub fn new(timeout: Duration) -> Self {
        let (state, _) = watch::channel(GateState::AwaitingAuth);
        Self { state, timeout, timer: Mutex::new(None) }
    }

    pub fn state(&self) -> GateState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), GateState::Open(_))
    }

    pub fn watch(&self) -> watch::Receiver<GateState> {
        self.state.subscribe()
    }

    /// Resolves once the gate is open.
    pub async fn wait_ready(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail while we are borrowed.
        let _ = rx.wait_for(|state| matches!(state, GateState::Open(_))).await;
    }

    fn replace_timer(&self, next: Option<CancellationToken>) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timer.take() {
            previous.cancel();
        }
        *timer = next;
    }

    /// Closes the gate for a freshly acquired session and arms the fail-open timer.
    /// The timer's token is a child of `scope`, so tearing the session down disarms it.
    pub fn session_acquired(self: &Arc<Self>, epoch: u64, scope: &CancellationToken) {
        let token = scope.child_token();
        self.replace_timer(Some(token.clone()));
        self.state.send_replace(GateState::PendingProfile { epoch });
        debug!("Readiness gate closed for session scope {}", epoch);

        let gate = Arc::clone(self);
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if gate.open_if_pending(epoch, OpenReason::TimedOut) {
                        warn!("Profile load timed out after {:?}; releasing the readiness gate.", timeout);
                    }
                }
            }
        });
    }

    /// Reports the first profile snapshot (or subscription error) of scope `epoch`.
    pub fn profile_resolved(&self, epoch: u64, loaded: bool) {
        let reason = if loaded { OpenReason::ProfileLoaded } else { OpenReason::ProfileFailed };
        if self.open_if_pending(epoch, reason) {
            self.replace_timer(None);
            info!("Readiness gate opened: {:?}", reason);
        }
    }

    /// No session: nothing to wait for.
    pub fn session_lost(&self) {
        self.replace_timer(None);
        self.state.send_replace(GateState::Open(OpenReason::SignedOut));
    }

    /// Opens the gate only if it is still waiting on `epoch`. Returns whether it did.
    fn open_if_pending(&self, epoch: u64, reason: OpenReason) -> bool {
        self.state.send_if_modified(|state| match *state {
            GateState::PendingProfile { epoch: pending } if pending == epoch => {
                *state = GateState::Open(reason);
                true
            }
            _ => false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> Arc<ReadinessGate> {
        Arc::new(ReadinessGate::new(Duration::from_secs(5)))
    }

    /// Counts how many times the gate transitions into `Open`.
    fn count_openings(gate: &ReadinessGate) -> Arc<Mutex<Vec<OpenReason>>> {
        let openings = Arc::new(Mutex::new(Vec::new()));
        let mut rx = gate.watch();
        let sink = Arc::clone(&openings);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                if let GateState::Open(reason) = state {
                    sink.lock().unwrap().push(reason);
                }
            }
        });
        openings
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn first_snapshot_opens_the_gate_and_disarms_the_timer() {
        let gate = gate();
        let openings = count_openings(&gate);
        let scope = CancellationToken::new();

        gate.session_acquired(1, &scope);
        tokio::task::yield_now().await;
        assert!(!gate.is_ready());

        gate.profile_resolved(1, true);
        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        assert_eq!(gate.state(), GateState::Open(OpenReason::ProfileLoaded));
        assert_eq!(*openings.lock().unwrap(), vec![OpenReason::ProfileLoaded]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn timeout_fails_open_and_a_late_snapshot_does_not_reopen() {
        let gate = gate();
        let openings = count_openings(&gate);
        let scope = CancellationToken::new();

        gate.session_acquired(7, &scope);
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert_eq!(gate.state(), GateState::Open(OpenReason::TimedOut));

        gate.profile_resolved(7, true);
        tokio::task::yield_now().await;
        assert_eq!(*openings.lock().unwrap(), vec![OpenReason::TimedOut]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn stale_epochs_cannot_open_a_newer_acquisition() {
        let gate = gate();
        let first = CancellationToken::new();
        gate.session_acquired(1, &first);
        first.cancel();

        let second = CancellationToken::new();
        gate.session_acquired(2, &second);
        gate.profile_resolved(1, true);
        assert_eq!(gate.state(), GateState::PendingProfile { epoch: 2 });

        gate.profile_resolved(2, false);
        assert_eq!(gate.state(), GateState::Open(OpenReason::ProfileFailed));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn cancelled_scope_disarms_the_timer() {
        let gate = gate();
        let scope = CancellationToken::new();
        gate.session_acquired(3, &scope);
        tokio::task::yield_now().await;
        scope.cancel();
        tokio::time::advance(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(gate.state(), GateState::PendingProfile { epoch: 3 });
    }

    #[tokio::test]
    async fn losing_the_session_opens_immediately() {
        let gate = gate();
        assert_eq!(gate.state(), GateState::AwaitingAuth);
        gate.session_lost();
        gate.wait_ready().await;
        assert_eq!(gate.state(), GateState::Open(OpenReason::SignedOut));
    }
}
