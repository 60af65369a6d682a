//! Document store traits and a transactional in-memory implementation.
//!
//! Writes accept an optional [`SessionId`]. When the session has an open
//! transaction, the write is staged and only becomes visible on commit;
//! otherwise it is applied immediately.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use common::DocumentId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// A stored document.
pub type Document = serde_json::Value;

/// Identifier of a document-store session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a session ID from a raw number.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw session number.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Errors raised by a document store.
#[derive(Debug, Error)]
pub enum DocumentStoreError {
    /// No document exists under the given key.
    #[error("Document not found: {collection}/{id}")]
    NotFound {
        collection: String,
        id: DocumentId,
    },

    /// A document already exists under the given key.
    #[error("Duplicate document: {collection}/{id}")]
    Duplicate {
        collection: String,
        id: DocumentId,
    },

    /// The store could not be reached or refused the request.
    #[error("Document store unavailable: {0}")]
    Unavailable(String),

    /// The session is unknown or has already ended.
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    /// A transaction primitive was used out of order.
    #[error("Transaction error: {0}")]
    Transaction(String),
}

/// A session that can wrap document writes in a transaction.
#[async_trait]
pub trait DocumentSession: Send + Sync {
    /// Identifier writes pass to join this session.
    fn id(&self) -> SessionId;

    /// Begins a transaction on the session.
    async fn start_transaction(&self) -> Result<(), DocumentStoreError>;

    /// Makes every staged write visible.
    async fn commit_transaction(&self) -> Result<(), DocumentStoreError>;

    /// Discards every staged write.
    async fn abort_transaction(&self) -> Result<(), DocumentStoreError>;

    /// Releases the session. Aborts an open transaction.
    async fn end_session(&self) -> Result<(), DocumentStoreError>;
}

/// Opens document-store sessions.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn start_session(&self) -> Result<Box<dyn DocumentSession>, DocumentStoreError>;
}

/// Trait for document persistence.
#[async_trait]
pub trait DocumentStore: SessionProvider {
    /// Inserts a new document. Fails with `Duplicate` if the key is taken.
    async fn insert(
        &self,
        collection: &str,
        id: DocumentId,
        document: Document,
        session: Option<SessionId>,
    ) -> Result<(), DocumentStoreError>;

    /// Loads a committed document.
    async fn find(
        &self,
        collection: &str,
        id: DocumentId,
    ) -> Result<Option<Document>, DocumentStoreError>;

    /// Replaces an existing document and returns the previous version.
    async fn replace(
        &self,
        collection: &str,
        id: DocumentId,
        document: Document,
        session: Option<SessionId>,
    ) -> Result<Document, DocumentStoreError>;

    /// Deletes a document, returning it if it existed.
    async fn delete(
        &self,
        collection: &str,
        id: DocumentId,
        session: Option<SessionId>,
    ) -> Result<Option<Document>, DocumentStoreError>;
}

#[derive(Debug, Clone)]
enum PendingWrite {
    Put {
        collection: String,
        id: DocumentId,
        document: Document,
    },
    Remove {
        collection: String,
        id: DocumentId,
    },
}

impl PendingWrite {
    fn key(&self) -> (&str, DocumentId) {
        match self {
            PendingWrite::Put { collection, id, .. } | PendingWrite::Remove { collection, id } => {
                (collection.as_str(), *id)
            }
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    in_transaction: bool,
    pending: Vec<PendingWrite>,
}

#[derive(Debug, Default)]
struct InMemoryDocumentState {
    collections: HashMap<String, BTreeMap<DocumentId, Document>>,
    sessions: HashMap<SessionId, SessionState>,
    next_session: u64,
    fail_next_writes: u32,
    fail_on_commit: bool,
    commits: u32,
    aborts: u32,
}

impl InMemoryDocumentState {
    /// Current view of a key as seen from inside `session`: staged writes
    /// first, then committed data.
    fn lookup(
        &self,
        collection: &str,
        id: DocumentId,
        session: Option<SessionId>,
    ) -> Option<Document> {
        if let Some(pending) = session
            .and_then(|s| self.sessions.get(&s))
            .filter(|s| s.in_transaction)
            .map(|s| &s.pending)
        {
            for write in pending.iter().rev() {
                if write.key() == (collection, id) {
                    return match write {
                        PendingWrite::Put { document, .. } => Some(document.clone()),
                        PendingWrite::Remove { .. } => None,
                    };
                }
            }
        }

        self.collections
            .get(collection)
            .and_then(|docs| docs.get(&id))
            .cloned()
    }

    fn check_write(&mut self, session: Option<SessionId>) -> Result<(), DocumentStoreError> {
        if let Some(session) = session
            && !self.sessions.contains_key(&session)
        {
            return Err(DocumentStoreError::UnknownSession(session));
        }
        if self.fail_next_writes > 0 {
            self.fail_next_writes -= 1;
            return Err(DocumentStoreError::Unavailable(
                "write concern timed out".to_string(),
            ));
        }
        Ok(())
    }

    fn write(&mut self, write: PendingWrite, session: Option<SessionId>) {
        if let Some(state) = session
            .and_then(|s| self.sessions.get_mut(&s))
            .filter(|s| s.in_transaction)
        {
            state.pending.push(write);
            return;
        }
        self.apply(write);
    }

    fn apply(&mut self, write: PendingWrite) {
        match write {
            PendingWrite::Put {
                collection,
                id,
                document,
            } => {
                self.collections
                    .entry(collection)
                    .or_default()
                    .insert(id, document);
            }
            PendingWrite::Remove { collection, id } => {
                if let Some(docs) = self.collections.get_mut(&collection) {
                    docs.remove(&id);
                }
            }
        }
    }
}

/// In-memory document store with session-scoped transactions, for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    state: Arc<RwLock<InMemoryDocumentState>>,
}

impl InMemoryDocumentStore {
    /// Creates a new empty document store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` write calls fail.
    pub async fn fail_next_writes(&self, count: u32) {
        self.state.write().await.fail_next_writes = count;
    }

    /// Configures the store to reject every commit.
    pub async fn set_fail_on_commit(&self, fail: bool) {
        self.state.write().await.fail_on_commit = fail;
    }

    /// Returns the number of committed documents in a collection.
    pub async fn document_count(&self, collection: &str) -> usize {
        self.state
            .read()
            .await
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    /// Returns how many transactions were committed.
    pub async fn commit_count(&self) -> u32 {
        self.state.read().await.commits
    }

    /// Returns how many transactions were aborted.
    pub async fn abort_count(&self) -> u32 {
        self.state.read().await.aborts
    }

    /// Returns the number of sessions that have not been ended.
    pub async fn active_sessions(&self) -> usize {
        self.state.read().await.sessions.len()
    }
}

#[async_trait]
impl SessionProvider for InMemoryDocumentStore {
    async fn start_session(&self) -> Result<Box<dyn DocumentSession>, DocumentStoreError> {
        let mut state = self.state.write().await;
        state.next_session += 1;
        let id = SessionId(state.next_session);
        state.sessions.insert(id, SessionState::default());

        Ok(Box::new(InMemorySession {
            id,
            state: self.state.clone(),
        }))
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn insert(
        &self,
        collection: &str,
        id: DocumentId,
        document: Document,
        session: Option<SessionId>,
    ) -> Result<(), DocumentStoreError> {
        let mut state = self.state.write().await;
        state.check_write(session)?;

        if state.lookup(collection, id, session).is_some() {
            return Err(DocumentStoreError::Duplicate {
                collection: collection.to_string(),
                id,
            });
        }

        state.write(
            PendingWrite::Put {
                collection: collection.to_string(),
                id,
                document,
            },
            session,
        );
        Ok(())
    }

    async fn find(
        &self,
        collection: &str,
        id: DocumentId,
    ) -> Result<Option<Document>, DocumentStoreError> {
        Ok(self.state.read().await.lookup(collection, id, None))
    }

    async fn replace(
        &self,
        collection: &str,
        id: DocumentId,
        document: Document,
        session: Option<SessionId>,
    ) -> Result<Document, DocumentStoreError> {
        let mut state = self.state.write().await;
        state.check_write(session)?;

        let previous =
            state
                .lookup(collection, id, session)
                .ok_or_else(|| DocumentStoreError::NotFound {
                    collection: collection.to_string(),
                    id,
                })?;

        state.write(
            PendingWrite::Put {
                collection: collection.to_string(),
                id,
                document,
            },
            session,
        );
        Ok(previous)
    }

    async fn delete(
        &self,
        collection: &str,
        id: DocumentId,
        session: Option<SessionId>,
    ) -> Result<Option<Document>, DocumentStoreError> {
        let mut state = self.state.write().await;
        state.check_write(session)?;

        let previous = state.lookup(collection, id, session);
        if previous.is_some() {
            state.write(
                PendingWrite::Remove {
                    collection: collection.to_string(),
                    id,
                },
                session,
            );
        }
        Ok(previous)
    }
}

/// Session handed out by [`InMemoryDocumentStore`].
struct InMemorySession {
    id: SessionId,
    state: Arc<RwLock<InMemoryDocumentState>>,
}

#[async_trait]
impl DocumentSession for InMemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    async fn start_transaction(&self) -> Result<(), DocumentStoreError> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(&self.id)
            .ok_or(DocumentStoreError::UnknownSession(self.id))?;

        if session.in_transaction {
            return Err(DocumentStoreError::Transaction(
                "transaction already in progress".to_string(),
            ));
        }
        session.in_transaction = true;
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), DocumentStoreError> {
        let mut state = self.state.write().await;
        let fail_on_commit = state.fail_on_commit;
        let session = state
            .sessions
            .get_mut(&self.id)
            .ok_or(DocumentStoreError::UnknownSession(self.id))?;

        if !session.in_transaction {
            return Err(DocumentStoreError::Transaction(
                "no transaction in progress".to_string(),
            ));
        }
        session.in_transaction = false;
        let pending = std::mem::take(&mut session.pending);

        if fail_on_commit {
            return Err(DocumentStoreError::Transaction(
                "commit rejected, transaction aborted".to_string(),
            ));
        }

        for write in pending {
            state.apply(write);
        }
        state.commits += 1;
        Ok(())
    }

    async fn abort_transaction(&self) -> Result<(), DocumentStoreError> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(&self.id)
            .ok_or(DocumentStoreError::UnknownSession(self.id))?;

        if !session.in_transaction {
            return Err(DocumentStoreError::Transaction(
                "no transaction in progress".to_string(),
            ));
        }
        session.in_transaction = false;
        session.pending.clear();
        state.aborts += 1;
        Ok(())
    }

    async fn end_session(&self) -> Result<(), DocumentStoreError> {
        let mut state = self.state.write().await;
        match state.sessions.remove(&self.id) {
            Some(session) => {
                if session.in_transaction {
                    state.aborts += 1;
                }
                Ok(())
            }
            None => Err(DocumentStoreError::UnknownSession(self.id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const TOYS: &str = "toys";

    #[tokio::test]
    async fn test_insert_find_replace_delete_without_session() {
        let store = InMemoryDocumentStore::new();
        let id = DocumentId::new();

        store
            .insert(TOYS, id, json!({"name": "Robot"}), None)
            .await
            .unwrap();
        assert_eq!(
            store.find(TOYS, id).await.unwrap(),
            Some(json!({"name": "Robot"}))
        );

        let previous = store
            .replace(TOYS, id, json!({"name": "Robot v2"}), None)
            .await
            .unwrap();
        assert_eq!(previous, json!({"name": "Robot"}));

        let removed = store.delete(TOYS, id, None).await.unwrap();
        assert_eq!(removed, Some(json!({"name": "Robot v2"})));
        assert_eq!(store.document_count(TOYS).await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected() {
        let store = InMemoryDocumentStore::new();
        let id = DocumentId::new();
        store.insert(TOYS, id, json!({}), None).await.unwrap();

        let err = store.insert(TOYS, id, json!({}), None).await.unwrap_err();
        assert!(matches!(err, DocumentStoreError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_replace_missing_document_fails() {
        let store = InMemoryDocumentStore::new();
        let err = store
            .replace(TOYS, DocumentId::new(), json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_transactional_writes_are_hidden_until_commit() {
        let store = InMemoryDocumentStore::new();
        let session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();

        let id = DocumentId::new();
        store
            .insert(TOYS, id, json!({"name": "Robot"}), Some(session.id()))
            .await
            .unwrap();
        assert_eq!(store.find(TOYS, id).await.unwrap(), None);

        session.commit_transaction().await.unwrap();
        session.end_session().await.unwrap();

        assert_eq!(
            store.find(TOYS, id).await.unwrap(),
            Some(json!({"name": "Robot"}))
        );
        assert_eq!(store.commit_count().await, 1);
        assert_eq!(store.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_abort_discards_staged_writes() {
        let store = InMemoryDocumentStore::new();
        let existing = DocumentId::new();
        store
            .insert(TOYS, existing, json!({"v": 1}), None)
            .await
            .unwrap();

        let session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        store
            .replace(TOYS, existing, json!({"v": 2}), Some(session.id()))
            .await
            .unwrap();
        store
            .insert(TOYS, DocumentId::new(), json!({"v": 3}), Some(session.id()))
            .await
            .unwrap();

        session.abort_transaction().await.unwrap();
        session.end_session().await.unwrap();

        assert_eq!(store.find(TOYS, existing).await.unwrap(), Some(json!({"v": 1})));
        assert_eq!(store.document_count(TOYS).await, 1);
        assert_eq!(store.abort_count().await, 1);
    }

    #[tokio::test]
    async fn test_staged_writes_are_visible_inside_the_session() {
        let store = InMemoryDocumentStore::new();
        let session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();

        let id = DocumentId::new();
        store
            .insert(TOYS, id, json!({"v": 1}), Some(session.id()))
            .await
            .unwrap();
        let previous = store
            .replace(TOYS, id, json!({"v": 2}), Some(session.id()))
            .await
            .unwrap();
        assert_eq!(previous, json!({"v": 1}));
    }

    #[tokio::test]
    async fn test_failed_commit_discards_writes() {
        let store = InMemoryDocumentStore::new();
        store.set_fail_on_commit(true).await;

        let session = store.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        store
            .insert(TOYS, DocumentId::new(), json!({}), Some(session.id()))
            .await
            .unwrap();

        assert!(session.commit_transaction().await.is_err());
        assert_eq!(store.document_count(TOYS).await, 0);
        assert_eq!(store.commit_count().await, 0);
    }

    #[tokio::test]
    async fn test_fail_next_writes_counts_down() {
        let store = InMemoryDocumentStore::new();
        store.fail_next_writes(1).await;

        let id = DocumentId::new();
        assert!(matches!(
            store.insert(TOYS, id, json!({}), None).await,
            Err(DocumentStoreError::Unavailable(_))
        ));
        store.insert(TOYS, id, json!({}), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_session_is_rejected() {
        let store = InMemoryDocumentStore::new();
        let session = store.start_session().await.unwrap();
        let id = session.id();
        session.end_session().await.unwrap();

        let err = store
            .insert(TOYS, DocumentId::new(), json!({}), Some(id))
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::UnknownSession(_)));
    }
}
