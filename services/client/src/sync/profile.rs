//! services/client/src/sync/profile.rs
//!
//! Owns the canonical in-memory profile. A listener task replaces it wholesale on
//! every remote snapshot; `update` applies edits optimistically, merge-writes them,
//! and reverts to the captured snapshot when the write fails.

use futures::StreamExt;
use std::sync::Arc;
use study_sync_core::domain::{ProfilePatch, Session, UserProfile};
use study_sync_core::ports::{DocumentPath, DocumentSnapshot, DocumentStore, PortResult};
use study_sync_core::schema;
use tokio::sync::{oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::SyncError;

/// Lifecycle of the most recent profile mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    /// A write is in flight; `rollback` is what local state reverts to if it fails.
    Pending { rollback: UserProfile },
    Committed,
    RolledBack,
}

/// The subscription currently feeding local state.
struct ActiveProfile {
    session: Session,
    epoch: u64,
    token: CancellationToken,
}

#[derive(Default)]
struct ProfileInner {
    active: Option<ActiveProfile>,
    /// Bumped on every applied remote snapshot.
    remote_version: u64,
}

pub struct ProfileSync {
    store: Arc<dyn DocumentStore>,
    profile: watch::Sender<UserProfile>,
    mutation: watch::Sender<MutationState>,
    inner: Mutex<ProfileInner>,
    /// Serializes updates so one rollback can never clobber another in-flight edit.
    write_lock: Mutex<()>,
}

impl ProfileSync {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let (profile, _) = watch::channel(UserProfile::default());
        let (mutation, _) = watch::channel(MutationState::Idle);
        Self {
            store,
            profile,
            mutation,
            inner: Mutex::new(ProfileInner::default()),
            write_lock: Mutex::new(()),
        }
    }

    /// A copy of the current canonical profile.
    pub fn current(&self) -> UserProfile {
        self.profile.borrow().clone()
    }

    /// Read-only view of the canonical profile; every replacement is observable.
    pub fn watch(&self) -> watch::Receiver<UserProfile> {
        self.profile.subscribe()
    }

    pub fn mutation_state(&self) -> MutationState {
        self.mutation.borrow().clone()
    }

    /// Starts listening to `session`'s profile document for session scope `epoch`,
    /// tearing down any previous subscription first. The outcome of the first
    /// snapshot is sent on `first_snapshot`.
    pub async fn subscribe(
        self: &Arc<Self>,
        session: Session,
        epoch: u64,
        token: CancellationToken,
        first_snapshot: oneshot::Sender<PortResult<()>>,
    ) {
        let path = DocumentPath::user_profile(&session.id);
        {
            let mut inner = self.inner.lock().await;
            if let Some(previous) = inner.active.take() {
                previous.token.cancel();
            }
            inner.active = Some(ActiveProfile { session, epoch, token: token.clone() });
            self.profile.send_replace(UserProfile::default());
        }

        // Opened before returning so the subscription exists once `subscribe` resolves.
        let stream = self.store.watch_document(&path);
        let sync = Arc::clone(self);
        tokio::spawn(async move {
            sync.listen(stream, epoch, token, first_snapshot).await;
        });
        info!("Profile subscription started for {} (scope {})", path, epoch);
    }

    async fn listen(
        &self,
        mut stream: study_sync_core::ports::SnapshotStream<DocumentSnapshot>,
        epoch: u64,
        token: CancellationToken,
        first_snapshot: oneshot::Sender<PortResult<()>>,
    ) {
        let mut first_snapshot = Some(first_snapshot);
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(snapshot)) => {
                    self.apply_snapshot(epoch, snapshot).await;
                    if let Some(tx) = first_snapshot.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                Some(Err(e)) => {
                    error!("Profile snapshot error: {}", e);
                    if let Some(tx) = first_snapshot.take() {
                        let _ = tx.send(Err(e));
                    }
                }
                None => {
                    warn!("Profile subscription for scope {} ended.", epoch);
                    break;
                }
            }
        }
        debug!("Profile listener for scope {} stopped.", epoch);
    }

    /// Replaces local state with a decoded snapshot, unless the snapshot belongs to a
    /// subscription that has since been torn down.
    async fn apply_snapshot(&self, epoch: u64, snapshot: DocumentSnapshot) {
        let mut inner = self.inner.lock().await;
        let session = match &inner.active {
            Some(active) if active.epoch == epoch => active.session.clone(),
            _ => {
                debug!("Ignoring stale profile snapshot from scope {}", epoch);
                return;
            }
        };
        let profile = schema::decode_profile(snapshot.data.as_ref(), &session);
        self.profile.send_replace(profile);
        inner.remote_version += 1;
    }

    /// Refreshes the session attributes used as normalization fallbacks.
    pub async fn refresh_session(&self, session: Session) {
        let mut inner = self.inner.lock().await;
        if let Some(active) = inner.active.as_mut().filter(|a| a.session.id == session.id) {
            active.session = session;
        }
    }

    /// Stops the current subscription and resets local state to the empty profile.
    pub async fn unsubscribe(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(previous) = inner.active.take() {
            previous.token.cancel();
            info!("Profile subscription for scope {} torn down.", previous.epoch);
        }
        self.profile.send_replace(UserProfile::default());
        self.mutation.send_replace(MutationState::Idle);
    }

    /// Applies `patch` locally at once, then merge-writes it. On failure the profile
    /// is restored to its value from before this call and the error is returned.
    pub async fn update(&self, patch: ProfilePatch) -> Result<(), SyncError> {
        if patch.is_empty() {
            return Ok(());
        }
        let _serialized = self.write_lock.lock().await;

        let (path, epoch, rollback, seen_version) = {
            let inner = self.inner.lock().await;
            let active = inner.active.as_ref().ok_or(SyncError::NoSession)?;
            let rollback = self.profile.borrow().clone();
            self.profile.send_modify(|profile| patch.apply_to(profile));
            (
                DocumentPath::user_profile(&active.session.id),
                active.epoch,
                rollback,
                inner.remote_version,
            )
        };
        self.mutation.send_replace(MutationState::Pending { rollback: rollback.clone() });

        let payload = schema::encode_profile_patch(&patch);
        match self.store.merge(&path, payload).await {
            Ok(()) => {
                self.mutation.send_replace(MutationState::Committed);
                Ok(())
            }
            Err(e) => {
                error!("Failed to save profile changes: {}", e);
                let inner = self.inner.lock().await;
                let same_scope = inner.active.as_ref().map(|a| a.epoch) == Some(epoch);
                // A snapshot that arrived meanwhile is newer than our rollback copy.
                if same_scope && inner.remote_version == seen_version {
                    self.profile.send_replace(rollback);
                }
                self.mutation.send_replace(MutationState::RolledBack);
                Err(SyncError::RolledBack(e))
            }
        }
    }
}
