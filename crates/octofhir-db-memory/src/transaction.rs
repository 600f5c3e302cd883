//! Snapshot transactions for the in-memory backend.

use std::sync::Arc;

use async_trait::async_trait;
use octofhir_storage::{
    HistoryParams, HistoryResult, SearchParams, SearchResult, StorageError, StoredResource,
    Transaction,
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::state::StoreState;

/// A transaction over a private copy of the table.
///
/// Commit replaces the shared table with the working copy, provided nobody
/// else wrote to it since the transaction began; otherwise the commit fails
/// and the working copy is discarded.
pub struct InMemoryTransaction {
    shared: Arc<RwLock<StoreState>>,
    working: StoreState,
    base_generation: u64,
}

impl InMemoryTransaction {
    pub(crate) fn new(shared: Arc<RwLock<StoreState>>, snapshot: StoreState) -> Self {
        Self {
            shared,
            base_generation: snapshot.generation,
            working: snapshot,
        }
    }

    /// Number of writes made through this transaction so far.
    pub fn pending_writes(&self) -> u64 {
        self.working.generation - self.base_generation
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let Self {
            shared,
            working,
            base_generation,
        } = *self;

        let mut guard = shared.write().await;
        if guard.generation != base_generation {
            warn!(
                expected = base_generation,
                actual = guard.generation,
                "Concurrent write detected, refusing to commit"
            );
            return Err(StorageError::transaction_error(
                "Storage was modified by another writer during the transaction",
            ));
        }
        let writes = working.generation - base_generation;
        *guard = working;
        debug!(writes, "Committed in-memory transaction");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        debug!(
            discarded = self.pending_writes(),
            "Rolled back in-memory transaction"
        );
        Ok(())
    }

    async fn create(&mut self, resource: &Value) -> Result<StoredResource, StorageError> {
        self.working.create(resource)
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        Ok(self.working.read(resource_type, id))
    }

    async fn update(
        &mut self,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<StoredResource, StorageError> {
        self.working.update(resource, if_match)
    }

    async fn delete(&mut self, resource_type: &str, id: &str) -> Result<(), StorageError> {
        self.working.delete(resource_type, id)
    }

    async fn vread(
        &self,
        resource_type: &str,
        id: &str,
        version: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        Ok(self.working.vread(resource_type, id, version))
    }

    async fn history(
        &self,
        resource_type: &str,
        id: Option<&str>,
        params: &HistoryParams,
    ) -> Result<HistoryResult, StorageError> {
        Ok(self.working.history(resource_type, id, params))
    }

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError> {
        Ok(self.working.search(resource_type, params))
    }
}

#[cfg(test)]
mod tests {
    use crate::InMemoryStorage;
    use octofhir_storage::FhirStorage;
    use serde_json::json;

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let storage = InMemoryStorage::new();
        let mut tx = storage.begin_transaction().await.unwrap();

        let created = tx.create(&json!({"resourceType": "Patient"})).await.unwrap();
        assert!(tx.read("Patient", &created.id).await.unwrap().is_some());
        assert!(storage.read("Patient", &created.id).await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert!(storage.read("Patient", &created.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let storage = InMemoryStorage::new();
        let existing = storage
            .create(&json!({"resourceType": "Patient", "gender": "female"}))
            .await
            .unwrap();

        let mut tx = storage.begin_transaction().await.unwrap();
        tx.create(&json!({"resourceType": "Patient"})).await.unwrap();
        tx.update(
            &json!({"resourceType": "Patient", "id": existing.id, "gender": "male"}),
            Some("1"),
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(storage.resource_count().await, 1);
        let current = storage.read("Patient", &existing.id).await.unwrap().unwrap();
        assert_eq!(current.version_id, "1");
        assert_eq!(current.resource["gender"], "female");
    }

    #[tokio::test]
    async fn test_commit_fails_after_concurrent_write() {
        let storage = InMemoryStorage::new();
        let mut tx = storage.begin_transaction().await.unwrap();
        tx.create(&json!({"resourceType": "Patient", "id": "in-tx"}))
            .await
            .unwrap();

        storage
            .create(&json!({"resourceType": "Patient", "id": "outside"}))
            .await
            .unwrap();

        let err = tx.commit().await.unwrap_err();
        assert!(err.to_string().starts_with("Transaction error"));
        assert!(storage.read("Patient", "in-tx").await.unwrap().is_none());
        assert!(storage.read("Patient", "outside").await.unwrap().is_some());
    }
}
