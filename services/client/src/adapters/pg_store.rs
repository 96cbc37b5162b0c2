//! services/client/src/adapters/pg_store.rs
//!
//! This module contains the Postgres-backed real-time document store, the concrete
//! implementation of the `DocumentStore` port. Documents are JSONB rows addressed by
//! path; every write raises a `NOTIFY` carrying the path, and watches re-read the
//! affected document or collection when a relevant notification arrives.

use async_stream::stream;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use study_sync_core::ports::{
    CollectionPath, CollectionSnapshot, Document, DocumentPath, DocumentSnapshot, DocumentStore,
    PortError, PortResult, SnapshotStream, StoredDocument,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// The `LISTEN`/`NOTIFY` channel every write is announced on.
const CHANGE_CHANNEL: &str = "document_changes";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A document store adapter that implements the `DocumentStore` port.
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Creates a new `PgDocumentStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Maps a driver error onto the port taxonomy.
pub(crate) fn port_error(e: sqlx::Error) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(e.to_string()),
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            PortError::Unavailable(e.to_string())
        }
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn into_document(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

async fn fetch_document(pool: &PgPool, path: &DocumentPath) -> PortResult<Option<Document>> {
    let data: Option<Value> = sqlx::query_scalar("SELECT data FROM documents WHERE path = $1")
        .bind(path.as_str())
        .fetch_optional(pool)
        .await
        .map_err(port_error)?;
    Ok(data.map(into_document))
}

async fn fetch_collection(pool: &PgPool, collection: &CollectionPath) -> PortResult<Vec<StoredDocument>> {
    let rows: Vec<(String, Value)> = sqlx::query_as(
        "SELECT doc_id, data FROM documents WHERE collection = $1 ORDER BY created_at ASC, doc_id ASC",
    )
    .bind(collection.as_str())
    .fetch_all(pool)
    .await
    .map_err(port_error)?;
    Ok(rows
        .into_iter()
        .map(|(id, data)| StoredDocument { id, data: into_document(data) })
        .collect())
}

async fn listen(pool: &PgPool) -> PortResult<PgListener> {
    let mut listener = PgListener::connect_with(pool).await.map_err(port_error)?;
    listener.listen(CHANGE_CHANNEL).await.map_err(port_error)?;
    Ok(listener)
}

//=========================================================================================
// `DocumentStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get(&self, path: &DocumentPath) -> PortResult<Option<Document>> {
        fetch_document(&self.pool, path).await
    }

    async fn merge(&self, path: &DocumentPath, fields: Document) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(port_error)?;
        sqlx::query(
            "INSERT INTO documents (path, collection, doc_id, data) VALUES ($1, $2, $3, $4)
             ON CONFLICT (path) DO UPDATE SET data = documents.data || EXCLUDED.data, updated_at = now()",
        )
        .bind(path.as_str())
        .bind(path.collection().as_str())
        .bind(path.id())
        .bind(Value::Object(fields))
        .execute(&mut *tx)
        .await
        .map_err(port_error)?;
        notify(&mut tx, path).await?;
        tx.commit().await.map_err(port_error)?;
        Ok(())
    }

    async fn add(&self, collection: &CollectionPath, fields: Document) -> PortResult<String> {
        let id = Uuid::new_v4().simple().to_string();
        let path = collection.doc(&id);
        let mut tx = self.pool.begin().await.map_err(port_error)?;
        sqlx::query("INSERT INTO documents (path, collection, doc_id, data) VALUES ($1, $2, $3, $4)")
            .bind(path.as_str())
            .bind(collection.as_str())
            .bind(&id)
            .bind(Value::Object(fields))
            .execute(&mut *tx)
            .await
            .map_err(port_error)?;
        notify(&mut tx, &path).await?;
        tx.commit().await.map_err(port_error)?;
        Ok(id)
    }

    async fn delete(&self, path: &DocumentPath) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(port_error)?;
        sqlx::query("DELETE FROM documents WHERE path = $1")
            .bind(path.as_str())
            .execute(&mut *tx)
            .await
            .map_err(port_error)?;
        notify(&mut tx, path).await?;
        tx.commit().await.map_err(port_error)?;
        Ok(())
    }

    fn watch_document(&self, path: &DocumentPath) -> SnapshotStream<DocumentSnapshot> {
        let pool = self.pool.clone();
        let path = path.clone();
        Box::pin(stream! {
            let mut listener = match listen(&pool).await {
                Ok(listener) => listener,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            yield fetch_document(&pool, &path)
                .await
                .map(|data| DocumentSnapshot { path: path.clone(), data });

            // After a dropped connection notifications may have been missed, so the
            // next successful receive always re-reads.
            let mut resync = false;
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        if resync || notification.payload() == path.as_str() {
                            resync = false;
                            yield fetch_document(&pool, &path)
                                .await
                                .map(|data| DocumentSnapshot { path: path.clone(), data });
                        }
                    }
                    Err(e) => {
                        warn!("Change listener for {} lost its connection: {}", path, e);
                        resync = true;
                        yield Err(port_error(e));
                    }
                }
            }
        })
    }

    fn watch_collection(&self, collection: &CollectionPath) -> SnapshotStream<CollectionSnapshot> {
        let pool = self.pool.clone();
        let collection = collection.clone();
        Box::pin(stream! {
            let mut listener = match listen(&pool).await {
                Ok(listener) => listener,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            yield fetch_collection(&pool, &collection)
                .await
                .map(|documents| CollectionSnapshot { collection: collection.clone(), documents });

            let mut resync = false;
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        let changed = DocumentPath::new(notification.payload());
                        if resync || changed.collection() == collection {
                            resync = false;
                            debug!("Collection {} changed at {}", collection, changed);
                            yield fetch_collection(&pool, &collection)
                                .await
                                .map(|documents| CollectionSnapshot { collection: collection.clone(), documents });
                        }
                    }
                    Err(e) => {
                        warn!("Change listener for {} lost its connection: {}", collection, e);
                        resync = true;
                        yield Err(port_error(e));
                    }
                }
            }
        })
    }
}

/// Announces a change; delivered to listeners when the transaction commits.
async fn notify(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, path: &DocumentPath) -> PortResult<()> {
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(CHANGE_CHANNEL)
        .bind(path.as_str())
        .execute(&mut **tx)
        .await
        .map_err(port_error)?;
    Ok(())
}
