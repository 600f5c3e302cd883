//! # octofhir-bundle
//!
//! Processing of FHIR `batch` and `transaction` bundles.
//!
//! A request bundle goes through these steps:
//!
//! 1. **Validation** ([`validation`]): bundle shape, entry shape and resource
//!    payloads. Entry failures are written into the response; a transaction
//!    with any invalid entry fails before anything is executed.
//! 2. **Execution** ([`processor`]): entries run in phases by HTTP verb
//!    (DELETE, POST, PUT, GET), in bundle order within a phase. Each entry is
//!    parsed into an [`Operation`] and run by the [`OperationExecutor`].
//!    Placeholder `urn:` references are resolved through a per-bundle
//!    [`LocalReferenceMap`].
//! 3. **Completion**: a transaction is committed, or rolled back on the first
//!    entry failure. The response has one entry per request entry, in
//!    request order.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use octofhir_bundle::{BundleConfig, BundleKind, BundleProcessor, RequestBundle, RequestEntry};
//! use octofhir_db_memory::InMemoryStorage;
//!
//! let processor = BundleProcessor::new(Arc::new(InMemoryStorage::new()), BundleConfig::default());
//! let bundle = RequestBundle::new(
//!     BundleKind::Transaction,
//!     vec![RequestEntry::post("Patient", serde_json::json!({"resourceType": "Patient"}))
//!         .with_full_url("urn:uuid:61ebe359-bfdc-4613-8bf2-c5e300945f0a")],
//! );
//! let response = processor.process_bundle(bundle).await?;
//! assert_eq!(response.entry[0].status_code(), Some(201));
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod model;
pub mod observability;
pub mod operation;
pub mod outcome;
pub mod processor;
pub mod reference;
pub mod response;
pub mod transaction_guard;
pub mod validation;

pub use config::{BundleConfig, PreferReturn};
pub use error::{BundleError, BundleFailure, ErrorCategory, Result};
pub use executor::{OperationExecutor, StorageHandle, WriteOutcome};
pub use model::{
    BundleKind, HttpVerb, RequestBundle, RequestEntry, ResponseBundle, ResponseEntry, ResultBundle,
};
pub use operation::{EntryUrl, Operation};
pub use outcome::{IssueSeverity, OperationOutcome, OutcomeIssue};
pub use processor::{BundleProcessor, ProcessOptions};
pub use reference::LocalReferenceMap;
pub use transaction_guard::ScopedTransaction;
pub use validation::{BasicValidator, ResourceValidator};
