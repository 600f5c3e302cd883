//! Single-entry interactions against the storage.
//!
//! Each persistence call is bracketed by the `before`/`after` interceptor
//! hooks. Writes hand the (possibly rewritten) `before` payload to storage.

use octofhir_core::{FhirDateTime, InterceptorRegistry, PersistenceEvent, PersistenceOp};
use octofhir_storage::{
    Compartment, FhirStorage, HistoryParams, HistoryResult, SearchParams, SearchResult,
    StorageError, StoredResource, Transaction,
};
use serde_json::Value;
use tracing::debug;

use crate::config::BundleConfig;
use crate::error::{BundleError, Result};
use crate::model::ResultBundle;
use crate::outcome::OutcomeIssue;
use crate::response::{self, COUNT_PARAM, PAGE_PARAM, Paging, SINCE_PARAM};
use crate::validation::{ResourceValidator, validate_resource};

/// Where an entry's persistence calls go: straight to storage (batch) or
/// through the bundle's open transaction.
pub enum StorageHandle<'a> {
    Direct(&'a dyn FhirStorage),
    Transaction(&'a mut Box<dyn Transaction>),
}

impl StorageHandle<'_> {
    pub fn is_transactional(&self) -> bool {
        matches!(self, Self::Transaction(_))
    }

    async fn create(&mut self, resource: &Value) -> std::result::Result<StoredResource, StorageError> {
        match self {
            Self::Direct(storage) => storage.create(resource).await,
            Self::Transaction(tx) => tx.create(resource).await,
        }
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> std::result::Result<Option<StoredResource>, StorageError> {
        match self {
            Self::Direct(storage) => storage.read(resource_type, id).await,
            Self::Transaction(tx) => tx.read(resource_type, id).await,
        }
    }

    async fn update(
        &mut self,
        resource: &Value,
        if_match: Option<&str>,
    ) -> std::result::Result<StoredResource, StorageError> {
        match self {
            Self::Direct(storage) => storage.update(resource, if_match).await,
            Self::Transaction(tx) => tx.update(resource, if_match).await,
        }
    }

    async fn delete(&mut self, resource_type: &str, id: &str) -> std::result::Result<(), StorageError> {
        match self {
            Self::Direct(storage) => storage.delete(resource_type, id).await,
            Self::Transaction(tx) => tx.delete(resource_type, id).await,
        }
    }

    async fn vread(
        &self,
        resource_type: &str,
        id: &str,
        version: &str,
    ) -> std::result::Result<Option<StoredResource>, StorageError> {
        match self {
            Self::Direct(storage) => storage.vread(resource_type, id, version).await,
            Self::Transaction(tx) => tx.vread(resource_type, id, version).await,
        }
    }

    async fn history(
        &self,
        resource_type: &str,
        id: &str,
        params: &HistoryParams,
    ) -> std::result::Result<HistoryResult, StorageError> {
        match self {
            Self::Direct(storage) => storage.history(resource_type, Some(id), params).await,
            Self::Transaction(tx) => tx.history(resource_type, Some(id), params).await,
        }
    }

    async fn search(
        &self,
        resource_type: &str,
        params: &SearchParams,
    ) -> std::result::Result<SearchResult, StorageError> {
        match self {
            Self::Direct(storage) => storage.search(resource_type, params).await,
            Self::Transaction(tx) => tx.search(resource_type, params).await,
        }
    }
}

/// A successful create or update.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub stored: StoredResource,
    /// True for creates, including update-as-create.
    pub created: bool,
    pub location: String,
    /// Non-failing validation issues.
    pub warnings: Vec<OutcomeIssue>,
}

pub struct OperationExecutor<'a> {
    validator: &'a dyn ResourceValidator,
    interceptors: &'a InterceptorRegistry,
    config: &'a BundleConfig,
}

impl<'a> OperationExecutor<'a> {
    pub fn new(
        validator: &'a dyn ResourceValidator,
        interceptors: &'a InterceptorRegistry,
        config: &'a BundleConfig,
    ) -> Self {
        Self {
            validator,
            interceptors,
            config,
        }
    }

    /// Creates a resource that must not carry an id yet.
    pub async fn create(
        &self,
        store: &mut StorageHandle<'_>,
        resource_type: &str,
        resource: Value,
    ) -> Result<WriteOutcome> {
        check_type(resource_type, &resource)?;
        if resource.get("id").is_some() {
            return Err(BundleError::invalid_input(
                "A 'create' operation cannot be performed on a resource that contains an 'id' attribute.",
            ));
        }
        let warnings = validate_resource(self.validator, &resource)?;

        let stored = self.persist_create(store, resource_type, resource).await?;
        debug!(resource_type, id = %stored.id, version = %stored.version_id, "Created resource");
        Ok(WriteOutcome {
            location: response::location(self.config.base_url(), resource_type, &stored.id),
            stored,
            created: true,
            warnings,
        })
    }

    /// Version-aware update. With no `current` resource the update creates
    /// it under the given id; callers decide beforehand whether that is
    /// allowed.
    pub async fn update(
        &self,
        store: &mut StorageHandle<'_>,
        resource_type: &str,
        id: &str,
        resource: Value,
        current: Option<&StoredResource>,
        if_match: Option<&str>,
    ) -> Result<WriteOutcome> {
        check_type(resource_type, &resource)?;
        let warnings = validate_resource(self.validator, &resource)?;
        match resource.get("id").and_then(Value::as_str) {
            None => {
                return Err(BundleError::invalid_input(
                    "Input resource must contain an 'id' attribute.",
                ));
            }
            Some(resource_id) if resource_id != id => {
                return Err(BundleError::invalid_input(format!(
                    "Input resource 'id' attribute '{resource_id}' must match 'id' parameter '{id}'."
                )));
            }
            Some(_) => {}
        }

        let expected_version = match (current, if_match) {
            (Some(current), Some(header)) => {
                let version = response::parse_etag(header).ok_or_else(|| {
                    BundleError::invalid_input(format!(
                        "Invalid ETag value specified in request: {header}"
                    ))
                })?;
                if version != current.version_id {
                    return Err(BundleError::conflict(format!(
                        "If-Match version '{version}' does not match current latest version of resource: {}",
                        current.version_id
                    )));
                }
                Some(current.version_id.as_str())
            }
            (Some(current), None) => Some(current.version_id.as_str()),
            (None, Some(header)) => {
                return Err(BundleError::conflict(format!(
                    "If-Match '{header}' cannot be satisfied: {resource_type}/{id} does not exist"
                )));
            }
            (None, None) => None,
        };

        let created = current.is_none();
        let stored = if created {
            self.persist_create(store, resource_type, resource).await?
        } else {
            self.persist_update(store, resource_type, id, resource, expected_version)
                .await?
        };
        debug!(resource_type, id, version = %stored.version_id, created, "Updated resource");
        Ok(WriteOutcome {
            location: response::location(self.config.base_url(), resource_type, id),
            stored,
            created,
            warnings,
        })
    }

    /// Current version of a resource, if it exists.
    pub async fn read_current(
        &self,
        store: &StorageHandle<'_>,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>> {
        let mut event = PersistenceEvent::new(PersistenceOp::Read, resource_type).with_id(id);
        self.interceptors.fire_before(&mut event).await?;

        let found = store.read(resource_type, id).await?;
        if let Some(stored) = &found {
            event.version_id = Some(stored.version_id.clone());
            event.resource = Some(stored.resource.clone());
        }
        self.interceptors.fire_after(&mut event).await?;
        Ok(found)
    }

    pub async fn read(
        &self,
        store: &StorageHandle<'_>,
        resource_type: &str,
        id: &str,
    ) -> Result<StoredResource> {
        self.read_current(store, resource_type, id)
            .await?
            .ok_or_else(|| BundleError::not_found(format!("{resource_type}/{id}")))
    }

    pub async fn vread(
        &self,
        store: &StorageHandle<'_>,
        resource_type: &str,
        id: &str,
        version: &str,
    ) -> Result<StoredResource> {
        let mut event = PersistenceEvent::new(PersistenceOp::VRead, resource_type)
            .with_id(id)
            .with_version(version);
        self.interceptors.fire_before(&mut event).await?;

        let found = store.vread(resource_type, id, version).await?;
        if let Some(stored) = &found {
            event.resource = Some(stored.resource.clone());
        }
        self.interceptors.fire_after(&mut event).await?;
        found.ok_or_else(|| {
            BundleError::not_found(format!("{resource_type}/{id}/_history/{version}"))
        })
    }

    /// One page of a resource's history as a `history` bundle.
    pub async fn history(
        &self,
        store: &StorageHandle<'_>,
        resource_type: &str,
        id: &str,
        query: &[(String, String)],
        request_uri: &str,
    ) -> Result<ResultBundle> {
        let paging = Paging::from_query(query, &self.config.search)?;
        let mut params = HistoryParams::new()
            .count(paging.count)
            .offset(paging.offset());
        if let Some((_, since)) = query.iter().find(|(name, _)| name == SINCE_PARAM) {
            let since: FhirDateTime = since.parse().map_err(|_| {
                BundleError::invalid_query(format!(
                    "Invalid value '{since}' for parameter '{SINCE_PARAM}': expected an instant"
                ))
            })?;
            params = params.since(since.into_inner());
        }

        let mut event = PersistenceEvent::new(PersistenceOp::History, resource_type).with_id(id);
        self.interceptors.fire_before(&mut event).await?;

        let result = store.history(resource_type, id, &params).await?;
        let total = result.total.unwrap_or(result.entries.len() as u32);
        let links = paging.links(total, request_uri);
        let bundle = response::history(&result.entries, total, self.config.base_url(), links);

        event.resource = Some(bundle.to_value());
        self.interceptors.fire_after(&mut event).await?;
        Ok(bundle)
    }

    /// One page of matches as a `searchset` bundle.
    pub async fn search(
        &self,
        store: &StorageHandle<'_>,
        resource_type: &str,
        compartment: Option<&Compartment>,
        query: &[(String, String)],
        request_uri: &str,
    ) -> Result<ResultBundle> {
        let paging = Paging::from_query(query, &self.config.search)?;
        let mut params = search_params(query)
            .with_count(paging.count)
            .with_offset(paging.offset());
        if let Some(compartment) = compartment {
            params = params.with_compartment(compartment.clone());
        }

        let result = self.run_search(store, resource_type, &params).await?;
        let total = result.total.unwrap_or(result.entries.len() as u32);
        let links = paging.links(total, request_uri);
        Ok(response::searchset(
            &result.entries,
            total,
            self.config.base_url(),
            links,
        ))
    }

    pub async fn delete(
        &self,
        store: &mut StorageHandle<'_>,
        resource_type: &str,
        id: &str,
    ) -> Result<()> {
        let mut event = PersistenceEvent::new(PersistenceOp::Delete, resource_type).with_id(id);
        self.interceptors.fire_before(&mut event).await?;

        store.delete(resource_type, id).await.map_err(|e| {
            if e.is_not_found() {
                BundleError::not_found(format!("{resource_type}/{id}"))
            } else {
                e.into()
            }
        })?;
        self.interceptors.fire_after(&mut event).await?;
        debug!(resource_type, id, "Deleted resource");
        Ok(())
    }

    /// Deletes every match of `query`, or nothing if there are more matches
    /// than configured. Returns the number of deleted resources.
    pub async fn conditional_delete(
        &self,
        store: &mut StorageHandle<'_>,
        resource_type: &str,
        query: &[(String, String)],
    ) -> Result<usize> {
        let params = search_params(query);
        let result = self.run_search(store, resource_type, &params).await?;
        let matches = result
            .total
            .map_or(result.entries.len(), |total| total as usize);

        let max = self.config.processing.conditional_delete_max_number;
        if matches > max {
            return Err(BundleError::precondition_failed(format!(
                "The search criteria specified for a conditional delete operation returned too many matches ( > {max} )."
            )));
        }
        for stored in &result.entries {
            self.delete(store, resource_type, &stored.id).await?;
        }
        Ok(matches)
    }

    async fn run_search(
        &self,
        store: &StorageHandle<'_>,
        resource_type: &str,
        params: &SearchParams,
    ) -> Result<SearchResult> {
        let mut event = PersistenceEvent::new(PersistenceOp::Search, resource_type);
        self.interceptors.fire_before(&mut event).await?;

        let result = store.search(resource_type, params).await?;
        debug!(resource_type, matches = result.entries.len(), total = ?result.total, "Search finished");
        self.interceptors.fire_after(&mut event).await?;
        Ok(result)
    }

    async fn persist_create(
        &self,
        store: &mut StorageHandle<'_>,
        resource_type: &str,
        resource: Value,
    ) -> Result<StoredResource> {
        let mut event = PersistenceEvent::new(PersistenceOp::Create, resource_type).with_resource(resource);
        if let Some(id) = event.resource.as_ref().and_then(|r| r.get("id")).and_then(Value::as_str) {
            event.id = Some(id.to_string());
        }
        self.interceptors.fire_before(&mut event).await?;

        let payload = take_payload(&mut event)?;
        let stored = store.create(&payload).await?;
        self.fire_after_write(event, &stored).await?;
        Ok(stored)
    }

    async fn persist_update(
        &self,
        store: &mut StorageHandle<'_>,
        resource_type: &str,
        id: &str,
        resource: Value,
        expected_version: Option<&str>,
    ) -> Result<StoredResource> {
        let mut event = PersistenceEvent::new(PersistenceOp::Update, resource_type)
            .with_id(id)
            .with_resource(resource);
        if let Some(version) = expected_version {
            event.version_id = Some(version.to_string());
        }
        self.interceptors.fire_before(&mut event).await?;

        let payload = take_payload(&mut event)?;
        let stored = store.update(&payload, expected_version).await?;
        self.fire_after_write(event, &stored).await?;
        Ok(stored)
    }

    async fn fire_after_write(&self, event: PersistenceEvent, stored: &StoredResource) -> Result<()> {
        let mut event = event
            .with_id(&stored.id)
            .with_version(&stored.version_id)
            .with_resource(stored.resource.clone());
        self.interceptors.fire_after(&mut event).await?;
        Ok(())
    }
}

fn check_type(resource_type: &str, resource: &Value) -> Result<()> {
    let actual = resource
        .get("resourceType")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if actual != resource_type {
        return Err(BundleError::type_mismatch(resource_type, actual));
    }
    Ok(())
}

fn take_payload(event: &mut PersistenceEvent) -> Result<Value> {
    event
        .resource
        .take()
        .ok_or_else(|| BundleError::internal("Interceptor removed the resource payload"))
}

/// Search parameters from a query string, minus the paging controls.
fn search_params(query: &[(String, String)]) -> SearchParams {
    query
        .iter()
        .filter(|(name, _)| name != PAGE_PARAM && name != COUNT_PARAM)
        .fold(SearchParams::new(), |params, (name, value)| {
            params.with_param(name.clone(), value.clone())
        })
}
