//! Shared fixtures for bundle processing tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use octofhir_bundle::{BundleConfig, BundleProcessor};
use octofhir_db_memory::InMemoryStorage;
use octofhir_storage::{
    FhirStorage, HistoryParams, HistoryResult, SearchParams, SearchResult, StorageError,
    StoredResource, Transaction,
};
use serde_json::{Value, json};

pub const BASE_URL: &str = "http://localhost:8888/fhir";

// =============================================================================
// Recording storage
// =============================================================================

/// One storage call as seen by [`RecordingStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub target: String,
    pub in_transaction: bool,
}

impl Call {
    pub fn is_write(&self) -> bool {
        matches!(self.op, "create" | "update" | "delete")
    }
}

type CallLog = Arc<Mutex<Vec<Call>>>;

fn record(log: &CallLog, op: &'static str, target: impl Into<String>, in_transaction: bool) {
    log.lock().unwrap().push(Call {
        op,
        target: target.into(),
        in_transaction,
    });
}

fn type_of(resource: &Value) -> String {
    resource["resourceType"].as_str().unwrap_or("?").to_string()
}

fn reference_of(resource: &Value) -> String {
    format!(
        "{}/{}",
        type_of(resource),
        resource["id"].as_str().unwrap_or("?")
    )
}

/// In-memory storage that logs every call, including calls made through
/// its transactions.
#[derive(Clone)]
pub struct RecordingStorage {
    inner: InMemoryStorage,
    log: CallLog,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::wrap(InMemoryStorage::new())
    }

    /// A storage that reports no transaction support.
    pub fn non_transactional() -> Self {
        Self::wrap(InMemoryStorage::new().with_transactions(false))
    }

    fn wrap(inner: InMemoryStorage) -> Self {
        Self {
            inner,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().clone()
    }

    /// Calls rendered as `op target`.
    pub fn ops(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|c| format!("{} {}", c.op, c.target))
            .collect()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_write).collect()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    /// The wrapped storage, for seeding and inspection without recording.
    pub fn inner(&self) -> &InMemoryStorage {
        &self.inner
    }

    pub async fn count(&self) -> usize {
        self.inner.resource_count().await
    }
}

#[async_trait]
impl FhirStorage for RecordingStorage {
    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError> {
        record(&self.log, "create", type_of(resource), false);
        self.inner.create(resource).await
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        record(&self.log, "read", format!("{resource_type}/{id}"), false);
        self.inner.read(resource_type, id).await
    }

    async fn update(
        &self,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<StoredResource, StorageError> {
        record(&self.log, "update", reference_of(resource), false);
        self.inner.update(resource, if_match).await
    }

    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), StorageError> {
        record(&self.log, "delete", format!("{resource_type}/{id}"), false);
        self.inner.delete(resource_type, id).await
    }

    async fn vread(
        &self,
        resource_type: &str,
        id: &str,
        version: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        record(&self.log, "vread", format!("{resource_type}/{id}/_history/{version}"), false);
        self.inner.vread(resource_type, id, version).await
    }

    async fn history(
        &self,
        resource_type: &str,
        id: Option<&str>,
        params: &HistoryParams,
    ) -> Result<HistoryResult, StorageError> {
        let target = id.map_or(resource_type.to_string(), |id| format!("{resource_type}/{id}"));
        record(&self.log, "history", target, false);
        self.inner.history(resource_type, id, params).await
    }

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError> {
        record(&self.log, "search", resource_type, false);
        self.inner.search(resource_type, params).await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError> {
        record(&self.log, "begin", "", true);
        let inner = self.inner.begin_transaction().await?;
        Ok(Box::new(RecordingTransaction {
            inner,
            log: self.log.clone(),
        }))
    }

    fn supports_transactions(&self) -> bool {
        self.inner.supports_transactions()
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}

struct RecordingTransaction {
    inner: Box<dyn Transaction>,
    log: CallLog,
}

#[async_trait]
impl Transaction for RecordingTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        record(&self.log, "commit", "", true);
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        record(&self.log, "rollback", "", true);
        self.inner.rollback().await
    }

    async fn create(&mut self, resource: &Value) -> Result<StoredResource, StorageError> {
        record(&self.log, "create", type_of(resource), true);
        self.inner.create(resource).await
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        record(&self.log, "read", format!("{resource_type}/{id}"), true);
        self.inner.read(resource_type, id).await
    }

    async fn update(
        &mut self,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<StoredResource, StorageError> {
        record(&self.log, "update", reference_of(resource), true);
        self.inner.update(resource, if_match).await
    }

    async fn delete(&mut self, resource_type: &str, id: &str) -> Result<(), StorageError> {
        record(&self.log, "delete", format!("{resource_type}/{id}"), true);
        self.inner.delete(resource_type, id).await
    }

    async fn vread(
        &self,
        resource_type: &str,
        id: &str,
        version: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        record(&self.log, "vread", format!("{resource_type}/{id}/_history/{version}"), true);
        self.inner.vread(resource_type, id, version).await
    }

    async fn history(
        &self,
        resource_type: &str,
        id: Option<&str>,
        params: &HistoryParams,
    ) -> Result<HistoryResult, StorageError> {
        let target = id.map_or(resource_type.to_string(), |id| format!("{resource_type}/{id}"));
        record(&self.log, "history", target, true);
        self.inner.history(resource_type, id, params).await
    }

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError> {
        record(&self.log, "search", resource_type, true);
        self.inner.search(resource_type, params).await
    }
}

// =============================================================================
// Builders
// =============================================================================

pub fn test_config() -> BundleConfig {
    let mut config = BundleConfig::default();
    config.server.base_url = BASE_URL.to_string();
    config
}

pub fn processor(storage: &RecordingStorage) -> BundleProcessor {
    processor_with(storage, test_config())
}

pub fn processor_with(storage: &RecordingStorage, config: BundleConfig) -> BundleProcessor {
    BundleProcessor::new(Arc::new(storage.clone()), config)
}

pub fn patient(family: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "name": [{"family": family}]
    })
}

pub fn observation_for(subject: &str) -> Value {
    json!({
        "resourceType": "Observation",
        "status": "final",
        "subject": {"reference": subject}
    })
}

/// Stores a resource directly, bypassing the call log.
pub async fn seed(storage: &RecordingStorage, resource: Value) -> StoredResource {
    storage
        .inner()
        .create(&resource)
        .await
        .expect("seed resource")
}
