//! services/client/src/sync/coordinator.rs
//!
//! Drives the synchronizers from the auth session stream. Each signed-in session
//! gets its own scope: a fresh epoch and a cancellation token that every listener
//! and the gate timer of that session hang off.

use futures::StreamExt;
use std::sync::Arc;
use study_sync_core::domain::Session;
use study_sync_core::ports::AuthProvider;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ProfileSync, ReadinessGate, ScheduleSync};

struct Scope {
    session: Session,
    epoch: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct CoordinatorState {
    scope: Option<Scope>,
    next_epoch: u64,
}

pub struct SessionCoordinator {
    auth: Arc<dyn AuthProvider>,
    gate: Arc<ReadinessGate>,
    profile: Arc<ProfileSync>,
    schedule: Arc<ScheduleSync>,
    state: Mutex<CoordinatorState>,
}

impl SessionCoordinator {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        gate: Arc<ReadinessGate>,
        profile: Arc<ProfileSync>,
        schedule: Arc<ScheduleSync>,
    ) -> Self {
        Self { auth, gate, profile, schedule, state: Mutex::new(CoordinatorState::default()) }
    }

    /// The session of the current scope, if signed in.
    pub async fn current_session(&self) -> Option<Session> {
        self.state.lock().await.scope.as_ref().map(|s| s.session.clone())
    }

    /// Consumes the provider's session stream until `shutdown` fires.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut sessions = coordinator.auth.session_changes();
            loop {
                let next = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = sessions.next() => next,
                };
                match next {
                    Some(session) => coordinator.on_session_changed(session).await,
                    None => {
                        warn!("Auth session stream ended.");
                        break;
                    }
                }
            }
            coordinator.on_session_changed(None).await;
        })
    }

    /// Applies one auth event. Teardown of the previous scope always completes
    /// before the next scope subscribes.
    pub async fn on_session_changed(&self, session: Option<Session>) {
        let mut state = self.state.lock().await;

        if let (Some(scope), Some(next)) = (state.scope.as_mut(), session.as_ref()) {
            if scope.session.id == next.id {
                scope.session = next.clone();
                self.profile.refresh_session(next.clone()).await;
                return;
            }
        }

        if let Some(previous) = state.scope.take() {
            previous.token.cancel();
            self.profile.unsubscribe().await;
            self.schedule.unsubscribe().await;
            info!("Session scope {} closed.", previous.epoch);
        }

        let Some(session) = session else {
            self.gate.session_lost();
            return;
        };

        state.next_epoch += 1;
        let epoch = state.next_epoch;
        let token = CancellationToken::new();
        info!("Session scope {} opened for user {}", epoch, session.id);

        self.gate.session_acquired(epoch, &token);
        let (first_tx, first_rx) = oneshot::channel();
        self.profile.subscribe(session.clone(), epoch, token.child_token(), first_tx).await;
        self.schedule.subscribe(&session.id, epoch, token.child_token()).await;

        let gate = Arc::clone(&self.gate);
        let scope_token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = scope_token.cancelled() => {}
                first = first_rx => {
                    let loaded = matches!(first, Ok(Ok(())));
                    if !loaded {
                        warn!("Profile subscription failed before its first snapshot.");
                    }
                    gate.profile_resolved(epoch, loaded);
                }
            }
        });

        state.scope = Some(Scope { session, epoch, token });
    }
}
