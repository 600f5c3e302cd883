//! In-memory FHIR storage backend.
//!
//! Implements [`FhirStorage`] over a single versioned table guarded by an
//! async `RwLock`. Transactions work on a private copy of the table and swap
//! it in on commit, so readers never observe a half-applied bundle.
//!
//! # Example
//!
//! ```ignore
//! use octofhir_db_memory::InMemoryStorage;
//! use octofhir_storage::FhirStorage;
//!
//! let storage = InMemoryStorage::new();
//! let created = storage
//!     .create(&serde_json::json!({"resourceType": "Patient", "name": [{"family": "Smith"}]}))
//!     .await?;
//! assert_eq!(created.version_id, "1");
//! ```

pub mod query;
mod state;
pub mod storage;
pub mod transaction;

pub use octofhir_storage::{FhirStorage, StorageError, StoredResource};
pub use state::StorageKey;
pub use storage::InMemoryStorage;
pub use transaction::InMemoryTransaction;
