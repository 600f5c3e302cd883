//! # octofhir-storage
//!
//! The persistence contract consumed by the bundle processor.
//!
//! A backend implements [`FhirStorage`] for plain calls and hands out a
//! [`Transaction`] for all-or-nothing work. Both expose the same resource
//! operations (create, read, update, delete, vread, history, search) and
//! return version-stamped [`StoredResource`] values: versions and
//! `lastUpdated` instants are always assigned by the backend.
//!
//! ## Example
//!
//! ```ignore
//! use octofhir_storage::{FhirStorage, SearchParams, StorageError, StoredResource};
//!
//! async fn patients_named(
//!     storage: &dyn FhirStorage,
//!     name: &str,
//! ) -> Result<Vec<StoredResource>, StorageError> {
//!     let params = SearchParams::new().with_param("name", name).with_count(10);
//!     Ok(storage.search("Patient", &params).await?.entries)
//! }
//! ```

mod error;
mod traits;
mod types;

pub use error::{ErrorCategory, StorageError};
pub use traits::{FhirStorage, Transaction};
pub use types::{
    Compartment, HistoryEntry, HistoryMethod, HistoryParams, HistoryResult, SearchParams,
    SearchResult, StoredResource,
};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared storage trait object.
pub type DynStorage = std::sync::Arc<dyn FhirStorage>;
