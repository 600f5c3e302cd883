use std::sync::Arc;

use async_trait::async_trait;
use octofhir_storage::{
    FhirStorage, HistoryParams, HistoryResult, SearchParams, SearchResult, StorageError,
    StoredResource, Transaction,
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::state::StoreState;
use crate::transaction::InMemoryTransaction;

/// In-memory FHIR storage backend.
///
/// - Per-resource version ids (`"1"`, `"2"`, ...) and `meta.lastUpdated` stamping
/// - Full history including deletes
/// - Snapshot transactions with commit/rollback
/// - Simple search with compartments and paging
#[derive(Debug, Clone)]
pub struct InMemoryStorage {
    pub(crate) state: Arc<RwLock<StoreState>>,
    transactional: bool,
}

impl InMemoryStorage {
    /// Creates an empty, transaction-capable storage.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            transactional: true,
        }
    }

    /// Controls whether this storage reports transaction support.
    ///
    /// With `false`, `begin_transaction` fails and transaction bundles are
    /// rejected up front by the processor.
    #[must_use]
    pub fn with_transactions(mut self, enabled: bool) -> Self {
        self.transactional = enabled;
        self
    }

    /// Number of current (non-deleted) resources.
    pub async fn resource_count(&self) -> usize {
        self.state.read().await.len()
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FhirStorage for InMemoryStorage {
    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError> {
        self.state.write().await.create(resource)
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        Ok(self.state.read().await.read(resource_type, id))
    }

    async fn update(
        &self,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<StoredResource, StorageError> {
        self.state.write().await.update(resource, if_match)
    }

    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), StorageError> {
        self.state.write().await.delete(resource_type, id)
    }

    async fn vread(
        &self,
        resource_type: &str,
        id: &str,
        version: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        Ok(self.state.read().await.vread(resource_type, id, version))
    }

    async fn history(
        &self,
        resource_type: &str,
        id: Option<&str>,
        params: &HistoryParams,
    ) -> Result<HistoryResult, StorageError> {
        Ok(self.state.read().await.history(resource_type, id, params))
    }

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError> {
        Ok(self.state.read().await.search(resource_type, params))
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError> {
        if !self.transactional {
            return Err(StorageError::transaction_error(
                "Transactions are disabled for this storage",
            ));
        }
        let snapshot = self.state.read().await.clone();
        debug!(generation = snapshot.generation, "Began in-memory transaction");
        Ok(Box::new(InMemoryTransaction::new(self.state.clone(), snapshot)))
    }

    fn supports_transactions(&self) -> bool {
        self.transactional
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}
