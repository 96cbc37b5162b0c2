//! services/client/src/adapters/memory.rs
//!
//! In-process implementations of the `DocumentStore` and `AuthProvider` ports.
//! They keep the same real-time delivery rules as the Postgres adapters and carry
//! fault-injection switches, so they back both the offline mode of the binary and
//! the synchronizer tests.

use async_stream::stream;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use study_sync_core::domain::Session;
use study_sync_core::ports::{
    AuthProvider, CollectionPath, CollectionSnapshot, Document, DocumentPath, DocumentSnapshot,
    DocumentStore, PortError, PortResult, SessionStream, SnapshotStream, StoredDocument,
};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

//=========================================================================================
// Document Store
//=========================================================================================

#[derive(Default)]
struct StoreState {
    /// Documents by full path, plus insertion order for stable collection snapshots.
    documents: BTreeMap<String, (u64, Document)>,
    next_seq: u64,
    fail_writes: Option<String>,
    stall_watches: bool,
}

/// A real-time document store held entirely in memory.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    changes: broadcast::Sender<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self { state: Arc::new(Mutex::new(StoreState::default())), changes }
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every subsequent write fail with `PortError::Unavailable(reason)`.
    pub fn fail_writes(&self, reason: Option<&str>) {
        self.state().fail_writes = reason.map(str::to_string);
    }

    /// Makes new subscriptions hang before their first snapshot.
    pub fn stall_watches(&self, stall: bool) {
        self.state().stall_watches = stall;
    }

    /// Number of documents currently stored under `collection`.
    pub fn count(&self, collection: &CollectionPath) -> usize {
        collection_documents(&self.state(), collection).len()
    }

    fn check_writable(&self) -> PortResult<()> {
        match &self.state().fail_writes {
            Some(reason) => Err(PortError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn notify(&self, path: &DocumentPath) {
        // No receivers simply means nobody is watching.
        let _ = self.changes.send(path.as_str().to_string());
    }
}

fn collection_documents(state: &StoreState, collection: &CollectionPath) -> Vec<StoredDocument> {
    let mut docs: Vec<(u64, StoredDocument)> = state
        .documents
        .iter()
        .filter_map(|(path, (seq, data))| {
            let path = DocumentPath::new(path.clone());
            (path.collection() == *collection)
                .then(|| (*seq, StoredDocument { id: path.id().to_string(), data: data.clone() }))
        })
        .collect();
    docs.sort_by_key(|(seq, _)| *seq);
    docs.into_iter().map(|(_, doc)| doc).collect()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocumentPath) -> PortResult<Option<Document>> {
        Ok(self.state().documents.get(path.as_str()).map(|(_, data)| data.clone()))
    }

    async fn merge(&self, path: &DocumentPath, fields: Document) -> PortResult<()> {
        self.check_writable()?;
        {
            let mut state = self.state();
            let seq = state.next_seq;
            let entry = state
                .documents
                .entry(path.as_str().to_string())
                .or_insert_with(|| (seq, Document::new()));
            entry.1.extend(fields);
            state.next_seq += 1;
        }
        self.notify(path);
        Ok(())
    }

    async fn add(&self, collection: &CollectionPath, fields: Document) -> PortResult<String> {
        self.check_writable()?;
        let id = Uuid::new_v4().simple().to_string();
        let path = collection.doc(&id);
        {
            let mut state = self.state();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.documents.insert(path.as_str().to_string(), (seq, fields));
        }
        self.notify(&path);
        Ok(id)
    }

    async fn delete(&self, path: &DocumentPath) -> PortResult<()> {
        self.check_writable()?;
        self.state().documents.remove(path.as_str());
        self.notify(path);
        Ok(())
    }

    fn watch_document(&self, path: &DocumentPath) -> SnapshotStream<DocumentSnapshot> {
        // Subscribe before the first read so no change can slip in between.
        let mut changes = self.changes.subscribe();
        let store = self.clone();
        let path = path.clone();
        Box::pin(stream! {
            let stalled = store.state().stall_watches;
            if stalled {
                futures::future::pending::<()>().await;
            }
            let data = store.state().documents.get(path.as_str()).map(|(_, d)| d.clone());
            yield Ok(DocumentSnapshot { path: path.clone(), data });
            loop {
                match changes.recv().await {
                    Ok(changed) if changed != path.as_str() => continue,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        let data = store.state().documents.get(path.as_str()).map(|(_, d)| d.clone());
                        yield Ok(DocumentSnapshot { path: path.clone(), data });
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Document watch on {} ended.", path);
        })
    }

    fn watch_collection(&self, collection: &CollectionPath) -> SnapshotStream<CollectionSnapshot> {
        let mut changes = self.changes.subscribe();
        let store = self.clone();
        let collection = collection.clone();
        Box::pin(stream! {
            let stalled = store.state().stall_watches;
            if stalled {
                futures::future::pending::<()>().await;
            }
            let documents = collection_documents(&store.state(), &collection);
            yield Ok(CollectionSnapshot { collection: collection.clone(), documents });
            loop {
                match changes.recv().await {
                    Ok(changed) if DocumentPath::new(changed.clone()).collection() != collection => continue,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        let documents = collection_documents(&store.state(), &collection);
                        yield Ok(CollectionSnapshot { collection: collection.clone(), documents });
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

//=========================================================================================
// Auth Provider
//=========================================================================================

struct Account {
    user_id: String,
    email: String,
    display_name: Option<String>,
    password: String,
}

#[derive(Default)]
struct AuthState {
    accounts: Vec<Account>,
    /// When the signed-in user last proved their password.
    last_authenticated: Option<Instant>,
}

/// An in-process auth provider. Passwords are held as given; it never leaves the process.
pub struct MemoryAuth {
    state: Mutex<AuthState>,
    session: watch::Sender<Option<Session>>,
    recent_login_window: Duration,
}

impl MemoryAuth {
    pub fn new(recent_login_window: Duration) -> Self {
        let (session, _) = watch::channel(None);
        Self { state: Mutex::new(AuthState::default()), session, recent_login_window }
    }

    fn state(&self) -> MutexGuard<'_, AuthState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forgets the last sign-in time so sensitive mutations demand re-authentication.
    pub fn expire_recent_login(&self) {
        self.state().last_authenticated = None;
    }

    fn current_account_index(&self, state: &AuthState) -> PortResult<usize> {
        let session = self.session.borrow().clone().ok_or(PortError::Unauthorized)?;
        state
            .accounts
            .iter()
            .position(|a| a.user_id == session.id)
            .ok_or_else(|| PortError::NotFound(format!("Account {} not found", session.id)))
    }

    fn require_recent_login(&self, state: &AuthState) -> PortResult<()> {
        match state.last_authenticated {
            Some(at) if at.elapsed() <= self.recent_login_window => Ok(()),
            _ => Err(PortError::RequiresRecentLogin),
        }
    }

    fn publish(&self, account: &Account) -> Session {
        let session = Session {
            id: account.user_id.clone(),
            display_name: account.display_name.clone(),
            email: Some(account.email.clone()),
        };
        self.session.send_replace(Some(session.clone()));
        session
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn sign_in(&self, email: &str, password: &str) -> PortResult<Session> {
        let mut state = self.state();
        let index = state
            .accounts
            .iter()
            .position(|a| a.email.eq_ignore_ascii_case(email) && a.password == password)
            .ok_or(PortError::InvalidCredentials)?;
        state.last_authenticated = Some(Instant::now());
        Ok(self.publish(&state.accounts[index]))
    }

    async fn sign_up(&self, email: &str, password: &str) -> PortResult<Session> {
        if password.chars().count() < 6 {
            return Err(PortError::WeakPassword);
        }
        let mut state = self.state();
        if state.accounts.iter().any(|a| a.email.eq_ignore_ascii_case(email)) {
            return Err(PortError::EmailInUse);
        }
        let account = Account {
            user_id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            display_name: None,
            password: password.to_string(),
        };
        let session = self.publish(&account);
        state.accounts.push(account);
        state.last_authenticated = Some(Instant::now());
        Ok(session)
    }

    async fn sign_out(&self) -> PortResult<()> {
        self.state().last_authenticated = None;
        self.session.send_replace(None);
        Ok(())
    }

    fn session_changes(&self) -> SessionStream {
        let mut rx = self.session.subscribe();
        Box::pin(stream! {
            let current = rx.borrow_and_update().clone();
            yield current;
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                yield next;
            }
        })
    }

    async fn reauthenticate(&self, password: &str) -> PortResult<()> {
        let mut state = self.state();
        let index = self.current_account_index(&state)?;
        if state.accounts[index].password != password {
            return Err(PortError::InvalidCredentials);
        }
        state.last_authenticated = Some(Instant::now());
        Ok(())
    }

    async fn update_email(&self, new_email: &str) -> PortResult<()> {
        let mut state = self.state();
        let index = self.current_account_index(&state)?;
        self.require_recent_login(&state)?;
        if state
            .accounts
            .iter()
            .enumerate()
            .any(|(i, a)| i != index && a.email.eq_ignore_ascii_case(new_email))
        {
            return Err(PortError::EmailInUse);
        }
        state.accounts[index].email = new_email.to_string();
        self.publish(&state.accounts[index]);
        Ok(())
    }

    async fn update_password(&self, new_password: &str) -> PortResult<()> {
        if new_password.chars().count() < 6 {
            return Err(PortError::WeakPassword);
        }
        let mut state = self.state();
        let index = self.current_account_index(&state)?;
        self.require_recent_login(&state)?;
        state.accounts[index].password = new_password.to_string();
        Ok(())
    }
}

/// Convenience used by the tests of several modules.
#[cfg(test)]
pub(crate) fn test_map(value: serde_json::Value) -> Document {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("expected a JSON object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn merge_writes_keep_unrelated_fields() {
        let store = MemoryStore::new();
        let path = DocumentPath::user_profile("u1");
        store.merge(&path, test_map(json!({"region": "French", "legacy": 1}))).await.unwrap();
        store.merge(&path, test_map(json!({"region": "German"}))).await.unwrap();
        assert_eq!(
            store.get(&path).await.unwrap(),
            Some(test_map(json!({"region": "German", "legacy": 1})))
        );
    }

    #[tokio::test]
    async fn document_watch_delivers_current_state_then_changes() {
        let store = MemoryStore::new();
        let path = DocumentPath::user_profile("u1");
        let mut watch = store.watch_document(&path);

        assert_eq!(watch.next().await.unwrap().unwrap().data, None);

        store.merge(&DocumentPath::user_profile("other"), test_map(json!({"x": 1}))).await.unwrap();
        store.merge(&path, test_map(json!({"displayName": "Ada"}))).await.unwrap();
        let snapshot = watch.next().await.unwrap().unwrap();
        assert_eq!(snapshot.data, Some(test_map(json!({"displayName": "Ada"}))));
    }

    #[tokio::test]
    async fn collection_watch_keeps_insertion_order() {
        let store = MemoryStore::new();
        let schedules = CollectionPath::schedules("u1");
        let first = store.add(&schedules, test_map(json!({"n": 1}))).await.unwrap();
        let second = store.add(&schedules, test_map(json!({"n": 2}))).await.unwrap();
        let mut watch = store.watch_collection(&schedules);
        let ids: Vec<String> =
            watch.next().await.unwrap().unwrap().documents.into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[tokio::test]
    async fn failing_writes_leave_the_store_untouched() {
        let store = MemoryStore::new();
        store.fail_writes(Some("offline"));
        let path = DocumentPath::user_profile("u1");
        let err = store.merge(&path, test_map(json!({"a": 1}))).await.unwrap_err();
        assert_eq!(err, PortError::Unavailable("offline".into()));
        assert_eq!(store.get(&path).await.unwrap(), None);
    }

    #[tokio::test]
    async fn sign_up_validates_and_publishes_the_session() {
        let auth = MemoryAuth::new(Duration::from_secs(300));
        let mut sessions = auth.session_changes();
        assert_eq!(sessions.next().await, Some(None));

        assert_eq!(auth.sign_up("a@b.c", "123").await, Err(PortError::WeakPassword));
        let session = auth.sign_up("a@b.c", "secret1").await.unwrap();
        assert_eq!(sessions.next().await, Some(Some(session)));
        assert_eq!(auth.sign_up("A@b.c", "secret2").await, Err(PortError::EmailInUse));
    }

    #[tokio::test]
    async fn sensitive_updates_require_a_recent_login() {
        let auth = MemoryAuth::new(Duration::from_secs(300));
        auth.sign_up("a@b.c", "secret1").await.unwrap();
        auth.expire_recent_login();
        assert_eq!(auth.update_password("secret2").await, Err(PortError::RequiresRecentLogin));
        auth.reauthenticate("secret1").await.unwrap();
        auth.update_password("secret2").await.unwrap();
        auth.sign_out().await.unwrap();
        assert_eq!(auth.sign_in("a@b.c", "secret1").await, Err(PortError::InvalidCredentials));
        assert!(auth.sign_in("a@b.c", "secret2").await.is_ok());
    }
}
