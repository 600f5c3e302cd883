//! Storage traits implemented by persistence backends.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;
use crate::types::{HistoryParams, HistoryResult, SearchParams, SearchResult, StoredResource};

/// The persistence capability the bundle processor runs against.
///
/// Implementations must be thread-safe (`Send + Sync`): independent bundles
/// may be processed concurrently against one storage, and the backend is
/// responsible for arbitrating conflicting writes between them.
///
/// # Example
///
/// ```ignore
/// use octofhir_storage::{FhirStorage, StorageError, StoredResource};
///
/// async fn get_patient(storage: &dyn FhirStorage, id: &str) -> Result<StoredResource, StorageError> {
///     storage
///         .read("Patient", id)
///         .await?
///         .ok_or_else(|| StorageError::not_found("Patient", id))
/// }
/// ```
#[async_trait]
pub trait FhirStorage: Send + Sync {
    // ==================== CRUD Operations ====================

    /// Creates a new resource.
    ///
    /// The resource must contain a `resourceType` field. If it carries an
    /// `id`, that id is used (update-as-create); otherwise the backend
    /// generates one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if a resource with the same type and ID exists.
    /// Returns `StorageError::InvalidResource` if the resource is malformed.
    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError>;

    /// Reads the current version of a resource.
    ///
    /// Returns `None` if the resource does not exist or has been deleted.
    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError>;

    /// Stores a new version of an existing resource.
    ///
    /// When `if_match` is given the write only succeeds if it equals the
    /// current version id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the resource does not exist.
    /// Returns `StorageError::VersionConflict` if `if_match` doesn't match.
    async fn update(
        &self,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<StoredResource, StorageError>;

    /// Deletes a resource, keeping its history.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the resource does not exist.
    async fn delete(&self, resource_type: &str, id: &str) -> Result<(), StorageError>;

    // ==================== Versioning ====================

    /// Reads a specific version of a resource.
    ///
    /// Returns `None` if the resource or version does not exist.
    async fn vread(
        &self,
        resource_type: &str,
        id: &str,
        version: &str,
    ) -> Result<Option<StoredResource>, StorageError>;

    /// Returns the history of one resource (`id = Some`) or of a whole type.
    ///
    /// Entries are newest first. `total` counts all matching entries, not
    /// just the returned page.
    async fn history(
        &self,
        resource_type: &str,
        id: Option<&str>,
        params: &HistoryParams,
    ) -> Result<HistoryResult, StorageError>;

    // ==================== Search ====================

    /// Searches current resources of a type.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidResource` for malformed parameters.
    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError>;

    // ==================== Transactions ====================

    /// Begins a new transaction.
    ///
    /// The returned handle must be either committed or rolled back.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` if transactions are not supported
    /// or if a transaction cannot be started.
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError>;

    // ==================== Metadata ====================

    /// Returns whether this storage backend supports transactions.
    fn supports_transactions(&self) -> bool;

    /// Returns the name of this storage backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// An open persistence transaction.
///
/// Work done through the handle is invisible to other callers until
/// [`commit`](Transaction::commit); [`rollback`](Transaction::rollback)
/// discards it. Both consume the handle. Reads through the handle see the
/// transaction's own uncommitted writes.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Commits all operations in this transaction.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` if the commit fails.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Rolls back all operations in this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;

    /// See [`FhirStorage::create`].
    async fn create(&mut self, resource: &Value) -> Result<StoredResource, StorageError>;

    /// See [`FhirStorage::read`].
    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError>;

    /// See [`FhirStorage::update`].
    async fn update(
        &mut self,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<StoredResource, StorageError>;

    /// See [`FhirStorage::delete`].
    async fn delete(&mut self, resource_type: &str, id: &str) -> Result<(), StorageError>;

    /// See [`FhirStorage::vread`].
    async fn vread(
        &self,
        resource_type: &str,
        id: &str,
        version: &str,
    ) -> Result<Option<StoredResource>, StorageError>;

    /// See [`FhirStorage::history`].
    async fn history(
        &self,
        resource_type: &str,
        id: Option<&str>,
        params: &HistoryParams,
    ) -> Result<HistoryResult, StorageError>;

    /// See [`FhirStorage::search`].
    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult, StorageError>;
}

// Ensure traits are object-safe by using them as trait objects
#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_storage_object_safe(_: &dyn FhirStorage) {}

    fn _assert_transaction_object_safe(_: &dyn Transaction) {}
}
