//! services/client/src/app/state.rs
//!
//! Defines the application's shared state: the injected port implementations and
//! the synchronizers built on top of them.

use crate::app::account::AccountFlows;
use crate::config::Config;
use crate::sync::{ProfileSync, ReadinessGate, ScheduleSync, SessionCoordinator};
use std::sync::Arc;
use study_sync_core::ports::{AuthProvider, ChatService, DocumentStore, VideoService};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

//=========================================================================================
// AppState (Created Once at Startup)
//=========================================================================================

/// The port implementations the client runs against.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub auth: Arc<dyn AuthProvider>,
    /// `None` when no chat model is configured.
    pub chat: Option<Arc<dyn ChatService>>,
    /// `None` when no video model is configured.
    pub video: Option<Arc<dyn VideoService>>,
    pub config: Arc<Config>,
}

//=========================================================================================
// StudyApp (Synchronizers Wired to the Ports)
//=========================================================================================

/// Every long-lived component, wired together once.
pub struct StudyApp {
    pub state: AppState,
    pub gate: Arc<ReadinessGate>,
    pub profile: Arc<ProfileSync>,
    pub schedule: Arc<ScheduleSync>,
    pub coordinator: Arc<SessionCoordinator>,
    pub account: AccountFlows,
}

impl StudyApp {
    /// Creates a new `StudyApp`. Nothing is subscribed until the coordinator runs.
    pub fn new(state: AppState) -> Self {
        let gate = Arc::new(ReadinessGate::new(state.config.profile_timeout));
        let profile = Arc::new(ProfileSync::new(Arc::clone(&state.store)));
        let schedule = Arc::new(ScheduleSync::new(Arc::clone(&state.store)));
        let coordinator = Arc::new(SessionCoordinator::new(
            Arc::clone(&state.auth),
            Arc::clone(&gate),
            Arc::clone(&profile),
            Arc::clone(&schedule),
        ));
        let account = AccountFlows::new(Arc::clone(&state.auth), Arc::clone(&profile));
        Self { state, gate, profile, schedule, coordinator, account }
    }

    /// Starts following the auth provider's session stream until `shutdown` fires.
    pub fn start(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.coordinator.spawn(shutdown)
    }
}
