//! crates/study_sync_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the client's core logic.
//! These traits form the boundary of the hexagonal architecture: the synchronizers
//! receive them as injected capabilities, so the real-time store, the auth provider
//! and the generative services can be swapped for in-process doubles.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::domain::{ChatRequest, OperationHandle, OperationStatus, Session, VideoRequest};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Email is already registered")]
    EmailInUse,
    #[error("Password should be at least 6 characters")]
    WeakPassword,
    #[error("This operation requires a recent sign-in")]
    RequiresRecentLogin,
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// A live subscription. Dropping the stream unsubscribes.
pub type SnapshotStream<T> = Pin<Box<dyn Stream<Item = PortResult<T>> + Send>>;

/// An incremental sequence of text fragments produced by a generative service.
pub type TextStream = Pin<Box<dyn Stream<Item = PortResult<String>> + Send>>;

//=========================================================================================
// Document Store Types
//=========================================================================================

/// A schemaless document body as the store holds it.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Slash-separated path of a collection, e.g. `users/u1/schedules`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

/// Slash-separated path of a document, e.g. `users/u1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath(String);

impl CollectionPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The per-user schedule sub-collection.
    pub fn schedules(user_id: &str) -> Self {
        Self(format!("users/{}/schedules", user_id))
    }

    pub fn doc(&self, id: &str) -> DocumentPath {
        DocumentPath(format!("{}/{}", self.0, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl DocumentPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The per-user profile document.
    pub fn user_profile(user_id: &str) -> Self {
        Self(format!("users/{}", user_id))
    }

    /// The collection this document lives in.
    pub fn collection(&self) -> CollectionPath {
        match self.0.rsplit_once('/') {
            Some((parent, _)) => CollectionPath(parent.to_string()),
            None => CollectionPath(String::new()),
        }
    }

    /// The last path segment.
    pub fn id(&self) -> &str {
        self.0.rsplit_once('/').map(|(_, id)| id).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The state of one document at the time of a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub path: DocumentPath,
    /// `None` when the document does not exist.
    pub data: Option<Document>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub data: Document,
}

/// The full contents of a collection at the time of a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    pub collection: CollectionPath,
    pub documents: Vec<StoredDocument>,
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocumentPath) -> PortResult<Option<Document>>;

    /// Writes only the given fields, leaving every other field of the document untouched.
    /// Creates the document when it does not exist.
    async fn merge(&self, path: &DocumentPath, fields: Document) -> PortResult<()>;

    /// Creates a new document with a store-generated id and returns that id.
    async fn add(&self, collection: &CollectionPath, fields: Document) -> PortResult<String>;

    async fn delete(&self, path: &DocumentPath) -> PortResult<()>;

    /// Subscribes to one document. The current state is delivered first, then
    /// one snapshot per change.
    fn watch_document(&self, path: &DocumentPath) -> SnapshotStream<DocumentSnapshot>;

    /// Subscribes to every document of a collection, with the same delivery rules.
    fn watch_collection(&self, collection: &CollectionPath) -> SnapshotStream<CollectionSnapshot>;
}

/// A stream of session changes; `None` means signed out.
pub type SessionStream = Pin<Box<dyn Stream<Item = Option<Session>> + Send>>;

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> PortResult<Session>;

    async fn sign_up(&self, email: &str, password: &str) -> PortResult<Session>;

    async fn sign_out(&self) -> PortResult<()>;

    /// The current session is yielded first, then every change.
    fn session_changes(&self) -> SessionStream;

    /// Confirms the current user's password, refreshing the recent-login window.
    async fn reauthenticate(&self, password: &str) -> PortResult<()>;

    async fn update_email(&self, new_email: &str) -> PortResult<()>;

    async fn update_password(&self, new_password: &str) -> PortResult<()>;
}

#[async_trait]
pub trait ChatService: Send + Sync {
    /// Streams the model's reply to `request.message` given the prior history.
    async fn stream_reply(&self, request: ChatRequest) -> PortResult<TextStream>;
}

#[async_trait]
pub trait VideoService: Send + Sync {
    /// Starts a long-running generation.
    async fn submit(&self, request: &VideoRequest) -> PortResult<OperationHandle>;

    async fn poll(&self, operation: &OperationHandle) -> PortResult<OperationStatus>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_split_into_collection_and_id() {
        let schedules = CollectionPath::schedules("u1");
        let doc = schedules.doc("abc");
        assert_eq!(doc.as_str(), "users/u1/schedules/abc");
        assert_eq!(doc.id(), "abc");
        assert_eq!(doc.collection(), schedules);
        assert_eq!(DocumentPath::user_profile("u1").collection().as_str(), "users");
    }
}
