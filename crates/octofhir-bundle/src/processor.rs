//! Bundle processing: validation, phased execution and transaction handling.

use std::sync::Arc;
use std::time::Instant;

use octofhir_core::InterceptorRegistry;
use octofhir_storage::DynStorage;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::{BundleConfig, PreferReturn};
use crate::error::{BundleError, BundleFailure, Result};
use crate::executor::{OperationExecutor, StorageHandle};
use crate::model::{BundleKind, HttpVerb, RequestBundle, RequestEntry, ResponseBundle, ResponseEntry};
use crate::operation::{EntryUrl, Operation};
use crate::reference::LocalReferenceMap;
use crate::response::{
    absolute_uri, bundle_entry, outcome_entry, resource_entry, write_entry,
};
use crate::transaction_guard::ScopedTransaction;
use crate::validation::{BasicValidator, ResourceValidator, ValidatedBundle, validate_bundle};

/// Per-call overrides of the configured behaviour.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Body of successful create/update responses; the configured
    /// preference when unset.
    pub prefer_return: Option<PreferReturn>,
}

impl ProcessOptions {
    pub fn with_prefer_return(prefer: PreferReturn) -> Self {
        Self {
            prefer_return: Some(prefer),
        }
    }
}

/// Processes `batch` and `transaction` bundles against a storage backend.
///
/// Cheap to clone; all collaborators are shared.
#[derive(Clone)]
pub struct BundleProcessor {
    storage: DynStorage,
    validator: Arc<dyn ResourceValidator>,
    interceptors: Arc<InterceptorRegistry>,
    config: Arc<BundleConfig>,
}

impl BundleProcessor {
    pub fn new(storage: DynStorage, config: BundleConfig) -> Self {
        let interceptors = InterceptorRegistry::with_timeout(config.interceptor_timeout());
        Self {
            storage,
            validator: Arc::new(BasicValidator),
            interceptors: Arc::new(interceptors),
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn ResourceValidator>) -> Self {
        self.validator = validator;
        self
    }

    #[must_use]
    pub fn with_interceptors(mut self, interceptors: Arc<InterceptorRegistry>) -> Self {
        self.interceptors = interceptors;
        self
    }

    pub fn interceptors(&self) -> &InterceptorRegistry {
        &self.interceptors
    }

    pub fn config(&self) -> &BundleConfig {
        &self.config
    }

    pub fn storage(&self) -> &DynStorage {
        &self.storage
    }

    pub async fn process_bundle(
        &self,
        bundle: RequestBundle,
    ) -> std::result::Result<ResponseBundle, BundleFailure> {
        self.process_bundle_with(bundle, &ProcessOptions::default())
            .await
    }

    /// Processes a bundle given as raw JSON.
    ///
    /// A document that does not deserialize as a bundle fails with a
    /// structural error and an unprocessed response sized to its `entry`
    /// array.
    pub async fn process_value(
        &self,
        value: &Value,
        options: &ProcessOptions,
    ) -> std::result::Result<ResponseBundle, BundleFailure> {
        let bundle: RequestBundle = match serde_json::from_value(value.clone()) {
            Ok(bundle) => bundle,
            Err(e) => {
                let len = value
                    .get("entry")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                let kind = value
                    .get("type")
                    .and_then(Value::as_str)
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(BundleKind::Batch);
                return Err(BundleFailure::new(
                    BundleError::structural(format!("Invalid request bundle: {e}")),
                    ResponseBundle::unprocessed(kind, len),
                ));
            }
        };
        self.process_bundle_with(bundle, options).await
    }

    /// Validates the bundle, then executes its entries phase by phase
    /// (DELETE, POST, PUT, GET). Response entries keep the request order.
    ///
    /// A `transaction` runs inside one storage transaction and fails as a
    /// whole on the first entry error; a `batch` records entry errors and
    /// carries on.
    #[instrument(skip_all, fields(bundle_type = bundle.bundle_type.as_deref().unwrap_or("unknown"), entries = bundle.entry.len()))]
    pub async fn process_bundle_with(
        &self,
        bundle: RequestBundle,
        options: &ProcessOptions,
    ) -> std::result::Result<ResponseBundle, BundleFailure> {
        let started = Instant::now();
        let transactional = self.storage.supports_transactions();

        let ValidatedBundle {
            kind,
            mut response,
            verbs,
            error_count,
        } = validate_bundle(&bundle, self.validator.as_ref(), transactional).inspect_err(
            |failure| warn!(error = %failure.error, category = %failure.error.category(), "Bundle rejected during validation"),
        )?;
        info!(
            bundle_type = kind.as_str(),
            entries = bundle.entry.len(),
            invalid = error_count,
            backend = self.storage.backend_name(),
            "Processing bundle"
        );

        let mut run = BundleRun {
            executor: OperationExecutor::new(
                self.validator.as_ref(),
                &self.interceptors,
                &self.config,
            ),
            config: &self.config,
            entries: &bundle.entry,
            verbs: &verbs,
            prefer: options
                .prefer_return
                .unwrap_or(self.config.processing.prefer_return),
            references: LocalReferenceMap::new(),
            fail_fast: kind.is_transaction(),
            state: BundleState::Validating,
        };

        if kind.is_transaction() {
            let transaction = match self.storage.begin_transaction().await {
                Ok(transaction) => transaction,
                Err(e) => return Err(BundleFailure::new(e.into(), response)),
            };
            let mut guard = ScopedTransaction::new(transaction);
            let executed = match guard.transaction() {
                Some(tx) => {
                    run.execute(&mut StorageHandle::Transaction(tx), &mut response)
                        .await
                }
                None => Err(BundleError::internal("Transaction closed before execution")),
            };

            if let Err(error) = executed {
                run.transition(BundleState::Aborted);
                if let Err(e) = guard.rollback().await {
                    warn!(error = %e, "Failed to roll back transaction");
                }
                warn!(error = %error, category = %error.category(), "Transaction bundle aborted and rolled back");
                return Err(BundleFailure::new(error, response));
            }

            run.transition(BundleState::Committing);
            if let Err(e) = guard.commit().await {
                run.transition(BundleState::Aborted);
                return Err(BundleFailure::new(e.into(), response));
            }
        } else {
            let mut store = StorageHandle::Direct(self.storage.as_ref());
            if let Err(error) = run.execute(&mut store, &mut response).await {
                return Err(BundleFailure::new(error, response));
            }
        }
        run.transition(BundleState::Done);
        for (local, resolved) in run.references.iter() {
            debug!(local, resolved, "Local reference bound");
        }

        info!(
            bundle_type = kind.as_str(),
            entries = response.len(),
            errors = response.error_count(),
            local_references = run.references.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Bundle processed"
        );
        Ok(response)
    }
}

impl std::fmt::Debug for BundleProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleProcessor")
            .field("backend", &self.storage.backend_name())
            .field("interceptors", &self.interceptors)
            .field("config", &self.config)
            .finish()
    }
}

/// Where a bundle run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BundleState {
    Validating,
    Executing(HttpVerb),
    Committing,
    Done,
    Aborted,
}

/// State of one bundle invocation. The local reference table lives and
/// dies with it.
struct BundleRun<'a> {
    executor: OperationExecutor<'a>,
    config: &'a BundleConfig,
    entries: &'a [RequestEntry],
    /// Parsed verb per entry, `None` for entries that failed validation.
    verbs: &'a [Option<HttpVerb>],
    prefer: PreferReturn,
    references: LocalReferenceMap,
    fail_fast: bool,
    state: BundleState,
}

impl BundleRun<'_> {
    fn transition(&mut self, next: BundleState) {
        debug!(from = ?self.state, to = ?next, "Bundle state change");
        self.state = next;
    }

    async fn execute(
        &mut self,
        store: &mut StorageHandle<'_>,
        response: &mut ResponseBundle,
    ) -> Result<()> {
        let entries = self.entries;
        for verb in HttpVerb::EXECUTION_ORDER {
            self.transition(BundleState::Executing(verb));
            for (index, entry) in entries.iter().enumerate() {
                if self.verbs[index] != Some(verb) || !response.entry[index].is_unset() {
                    continue;
                }
                let url = entry.url().unwrap_or_default();

                match self.execute_entry(store, entry, verb).await {
                    Ok(result) => {
                        debug!(index, method = verb.as_str(), url, status = ?result.status_code(), "Entry processed");
                        response.entry[index] = result;
                    }
                    Err(error) => {
                        debug!(index, method = verb.as_str(), url, status = error.status(), category = %error.category(), error = %error, "Entry failed");
                        response.entry[index] = ResponseEntry::from_error(&error);
                        if self.fail_fast {
                            return Err(error);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn execute_entry(
        &mut self,
        store: &mut StorageHandle<'_>,
        entry: &RequestEntry,
        verb: HttpVerb,
    ) -> Result<ResponseEntry> {
        let url = EntryUrl::parse(entry.url().unwrap_or_default(), self.config.base_url())?;
        let operation = Operation::parse(verb, &url)?;
        let request_uri = absolute_uri(self.config.base_url(), &url.relative);

        match operation {
            Operation::Create { resource_type } => {
                let local = self.references.retrieve_local_identifier(entry)?;
                let resource = self.resolved_payload(entry)?;
                let created = self.executor.create(store, &resource_type, resource).await?;
                if let Some(local) = local {
                    self.references
                        .add_mapping(&local, &resource_type, &created.stored.id)?;
                }
                Ok(write_entry(
                    201,
                    &created.stored,
                    created.location,
                    self.prefer,
                    &created.warnings,
                ))
            }
            Operation::Update { resource_type, id } => {
                let local = self.references.retrieve_local_identifier(entry)?;
                let resource = self.resolved_payload(entry)?;
                let current = self.executor.read_current(store, &resource_type, &id).await?;
                if current.is_none() && !self.config.processing.allow_update_create {
                    return Err(BundleError::method_not_allowed(format!(
                        "Resource {resource_type}/{id} does not exist and update-as-create is disabled"
                    )));
                }

                let updated = self
                    .executor
                    .update(store, &resource_type, &id, resource, current.as_ref(), entry.if_match())
                    .await?;
                if let Some(local) = local {
                    self.references.add_mapping(&local, &resource_type, &id)?;
                }
                let status = if updated.created { 201 } else { 200 };
                Ok(write_entry(
                    status,
                    &updated.stored,
                    updated.location,
                    self.prefer,
                    &updated.warnings,
                ))
            }
            Operation::Read { resource_type, id } => {
                let stored = self.executor.read(store, &resource_type, &id).await?;
                Ok(resource_entry(&stored))
            }
            Operation::VRead {
                resource_type,
                id,
                version,
            } => {
                let stored = self
                    .executor
                    .vread(store, &resource_type, &id, &version)
                    .await?;
                Ok(resource_entry(&stored))
            }
            Operation::History { resource_type, id } => {
                let history = self
                    .executor
                    .history(store, &resource_type, &id, &url.query, &request_uri)
                    .await?;
                Ok(bundle_entry(&history))
            }
            Operation::Search {
                resource_type,
                compartment,
            } => {
                let found = self
                    .executor
                    .search(store, &resource_type, compartment.as_ref(), &url.query, &request_uri)
                    .await?;
                Ok(bundle_entry(&found))
            }
            Operation::Delete { resource_type, id } => {
                self.ensure_delete_allowed()?;
                self.executor.delete(store, &resource_type, &id).await?;
                Ok(outcome_entry(
                    200,
                    format!("Successfully deleted resource {resource_type}/{id}"),
                ))
            }
            Operation::ConditionalDelete { resource_type } => {
                self.ensure_delete_allowed()?;
                let deleted = self
                    .executor
                    .conditional_delete(store, &resource_type, &url.query)
                    .await?;
                let diagnostics = if deleted == 0 {
                    format!("The search criteria for conditional delete of {resource_type} matched no resources")
                } else {
                    format!("Successfully deleted {deleted} {resource_type} resource(s) matching the search criteria")
                };
                Ok(outcome_entry(200, diagnostics))
            }
        }
    }

    /// The entry's payload with local references rewritten.
    fn resolved_payload(&self, entry: &RequestEntry) -> Result<Value> {
        let mut resource = entry.resource.clone().ok_or_else(|| {
            BundleError::structural("BundleEntry.resource is required for BundleEntry with POST or PUT method.")
        })?;
        self.references.process_local_references(&mut resource)?;
        Ok(resource)
    }

    fn ensure_delete_allowed(&self) -> Result<()> {
        if self.config.processing.allow_delete {
            Ok(())
        } else {
            Err(BundleError::method_not_allowed(
                "Delete interactions are not enabled on this server",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use octofhir_db_memory::InMemoryStorage;
    use serde_json::json;

    fn processor() -> BundleProcessor {
        BundleProcessor::new(Arc::new(InMemoryStorage::new()), BundleConfig::default())
    }

    #[tokio::test]
    async fn test_process_value_rejects_malformed_documents() {
        let failure = processor()
            .process_value(
                &json!({"resourceType": "Bundle", "type": "transaction", "entry": [1, 2]}),
                &ProcessOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(failure.response.len(), 2);
        assert!(failure.response.entry.iter().all(ResponseEntry::is_unset));
        assert!(matches!(failure.error, BundleError::Structural(_)));
    }

    #[tokio::test]
    async fn test_batch_reads_its_own_creates() {
        let bundle = RequestBundle::new(
            BundleKind::Batch,
            vec![
                RequestEntry::get("Patient?family=Doe"),
                RequestEntry::post("Patient", json!({"resourceType": "Patient", "family": "Doe"})),
            ],
        );
        let response = processor().process_bundle(bundle).await.unwrap();

        assert_eq!(response.entry[1].status_code(), Some(201));
        let searchset = response.entry[0].resource.as_ref().unwrap();
        assert_eq!(searchset["type"], "searchset");
        assert_eq!(searchset["total"], 1);
    }

    #[tokio::test]
    async fn test_prefer_return_override() {
        let bundle = RequestBundle::new(
            BundleKind::Batch,
            vec![RequestEntry::post("Patient", json!({"resourceType": "Patient"}))],
        );
        let response = processor()
            .process_bundle_with(bundle, &ProcessOptions::with_prefer_return(PreferReturn::Minimal))
            .await
            .unwrap();
        assert!(response.entry[0].resource.is_none());
        assert!(response.entry[0].response.location.is_some());
    }

    #[tokio::test]
    async fn test_custom_validator_and_shared_interceptors() {
        struct NameAdvisor;
        impl ResourceValidator for NameAdvisor {
            fn validate(&self, resource: &Value) -> Vec<crate::outcome::OutcomeIssue> {
                if resource.get("name").is_some() {
                    return Vec::new();
                }
                vec![crate::outcome::OutcomeIssue::warning(
                    "business-rule",
                    "Patient.name is recommended",
                )]
            }
        }

        let registry = Arc::new(InterceptorRegistry::new());
        let processor = processor()
            .with_validator(Arc::new(NameAdvisor))
            .with_interceptors(registry.clone());
        assert!(std::ptr::eq(processor.interceptors(), registry.as_ref()));

        let bundle = RequestBundle::new(
            BundleKind::Batch,
            vec![RequestEntry::post("Patient", json!({"resourceType": "Patient"}))],
        );
        let response = processor
            .process_bundle_with(
                bundle,
                &ProcessOptions::with_prefer_return(PreferReturn::OperationOutcome),
            )
            .await
            .unwrap();

        assert_eq!(response.entry[0].status_code(), Some(201));
        let outcome = response.entry[0].resource.as_ref().unwrap();
        assert_eq!(outcome["issue"][0]["severity"], "warning");
        assert_eq!(outcome["issue"][0]["diagnostics"], "Patient.name is recommended");
    }

    #[tokio::test]
    async fn test_zero_page_sizes_do_not_break_searches() {
        let mut config = BundleConfig::default();
        config.search.default_count = 0;
        config.search.max_count = 0;
        assert!(config.validate().is_err());

        let processor = BundleProcessor::new(Arc::new(InMemoryStorage::new()), config);
        let bundle = RequestBundle::new(BundleKind::Batch, vec![RequestEntry::get("Patient")]);
        let response = processor.process_bundle(bundle).await.unwrap();

        assert_eq!(response.entry[0].status_code(), Some(200));
        let searchset = response.entry[0].resource.as_ref().unwrap();
        assert_eq!(searchset["total"], 0);
    }

    #[tokio::test]
    async fn test_delete_disabled_by_default() {
        let bundle = RequestBundle::new(
            BundleKind::Batch,
            vec![RequestEntry::delete("Patient/1"), RequestEntry::delete("Patient?name=x")],
        );
        let response = processor().process_bundle(bundle).await.unwrap();
        assert_eq!(response.entry[0].status_code(), Some(405));
        assert_eq!(response.entry[1].status_code(), Some(405));
    }
}
