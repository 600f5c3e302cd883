//! The versioned resource table shared by direct calls and transactions.

use std::collections::HashMap;

use octofhir_core::{FhirDateTime, generate_id};
use octofhir_storage::{
    HistoryEntry, HistoryMethod, HistoryParams, HistoryResult, SearchParams, SearchResult,
    StorageError, StoredResource,
};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;

use crate::query;

pub type StorageKey = String; // Format: "ResourceType/id"

pub(crate) fn make_storage_key(resource_type: &str, id: &str) -> StorageKey {
    format!("{resource_type}/{id}")
}

fn extract_resource_type(resource: &Value) -> Result<String, StorageError> {
    resource
        .get("resourceType")
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| StorageError::invalid_resource("Missing resourceType field"))
}

fn extract_id(resource: &Value) -> Option<String> {
    resource.get("id").and_then(Value::as_str).map(String::from)
}

/// Current versions plus full history, keyed by `Type/id`.
///
/// `generation` increases on every write; transactions use it to detect
/// that the table changed underneath them.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    current: HashMap<StorageKey, StoredResource>,
    /// Oldest first.
    history: HashMap<StorageKey, Vec<HistoryEntry>>,
    pub(crate) generation: u64,
}

impl StoreState {
    pub(crate) fn len(&self) -> usize {
        self.current.len()
    }

    pub(crate) fn create(&mut self, resource: &Value) -> Result<StoredResource, StorageError> {
        let resource_type = extract_resource_type(resource)?;
        let id = extract_id(resource).unwrap_or_else(generate_id);
        let key = make_storage_key(&resource_type, &id);

        if self.current.contains_key(&key) {
            return Err(StorageError::already_exists(&resource_type, &id));
        }

        let stored = self.stamp(&key, &resource_type, &id, resource)?;
        self.record(key.clone(), stored.clone(), HistoryMethod::Create);
        self.current.insert(key, stored.clone());
        Ok(stored)
    }

    pub(crate) fn read(&self, resource_type: &str, id: &str) -> Option<StoredResource> {
        self.current
            .get(&make_storage_key(resource_type, id))
            .cloned()
    }

    pub(crate) fn update(
        &mut self,
        resource: &Value,
        if_match: Option<&str>,
    ) -> Result<StoredResource, StorageError> {
        let resource_type = extract_resource_type(resource)?;
        let id = extract_id(resource)
            .ok_or_else(|| StorageError::invalid_resource("Missing id field for update"))?;
        let key = make_storage_key(&resource_type, &id);

        let existing = self
            .current
            .get(&key)
            .ok_or_else(|| StorageError::not_found(&resource_type, &id))?;
        if let Some(expected) = if_match
            && expected != existing.version_id
        {
            return Err(StorageError::version_conflict(
                expected,
                existing.version_id.clone(),
            ));
        }

        let stored = self.stamp(&key, &resource_type, &id, resource)?;
        self.record(key.clone(), stored.clone(), HistoryMethod::Update);
        self.current.insert(key, stored.clone());
        Ok(stored)
    }

    pub(crate) fn delete(&mut self, resource_type: &str, id: &str) -> Result<(), StorageError> {
        let key = make_storage_key(resource_type, id);
        let removed = self
            .current
            .remove(&key)
            .ok_or_else(|| StorageError::not_found(resource_type, id))?;

        let tombstone = self.stamp(&key, resource_type, id, &removed.resource)?;
        self.record(key, tombstone, HistoryMethod::Delete);
        Ok(())
    }

    pub(crate) fn vread(&self, resource_type: &str, id: &str, version: &str) -> Option<StoredResource> {
        self.history
            .get(&make_storage_key(resource_type, id))?
            .iter()
            .find(|e| e.resource.version_id == version && e.method != HistoryMethod::Delete)
            .map(|e| e.resource.clone())
    }

    pub(crate) fn history(
        &self,
        resource_type: &str,
        id: Option<&str>,
        params: &HistoryParams,
    ) -> HistoryResult {
        let mut entries: Vec<HistoryEntry> = match id {
            Some(id) => self
                .history
                .get(&make_storage_key(resource_type, id))
                .cloned()
                .unwrap_or_default(),
            None => self
                .history
                .values()
                .flatten()
                .filter(|e| e.resource.resource_type == resource_type)
                .cloned()
                .collect(),
        };

        if let Some(since) = params.since {
            entries.retain(|e| e.resource.last_updated > since);
        }
        entries.sort_by(|a, b| {
            b.resource
                .last_updated
                .cmp(&a.resource.last_updated)
                .then_with(|| version_number(&b.resource).cmp(&version_number(&a.resource)))
        });

        let total = entries.len() as u32;
        let (page, _) = query::paginate(entries, params.offset, params.count);
        HistoryResult::with_entries(page).with_total(total)
    }

    pub(crate) fn search(&self, resource_type: &str, params: &SearchParams) -> SearchResult {
        let mut matched: Vec<StoredResource> = self
            .current
            .values()
            .filter(|r| r.resource_type == resource_type && query::matches(r, params))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            a.last_updated
                .cmp(&b.last_updated)
                .then_with(|| a.id.cmp(&b.id))
        });

        let total = matched.len() as u32;
        let (page, has_more) = query::paginate(matched, params.offset, params.count);
        SearchResult::with_entries(page)
            .with_total(total)
            .with_has_more(has_more)
    }

    /// Versions are per resource and keep counting across deletes.
    fn next_version(&self, key: &str) -> String {
        let written = self.history.get(key).map_or(0, Vec::len);
        (written + 1).to_string()
    }

    fn stamp(
        &self,
        key: &str,
        resource_type: &str,
        id: &str,
        resource: &Value,
    ) -> Result<StoredResource, StorageError> {
        let Value::Object(fields) = resource else {
            return Err(StorageError::invalid_resource("Resource must be a JSON object"));
        };

        let version_id = self.next_version(key);
        let now = OffsetDateTime::now_utc();

        let mut fields = fields.clone();
        let mut meta = match fields.remove("meta") {
            Some(Value::Object(meta)) => meta,
            _ => Map::new(),
        };
        meta.insert("versionId".to_string(), json!(version_id));
        meta.insert(
            "lastUpdated".to_string(),
            json!(FhirDateTime::from(now).to_string()),
        );
        fields.insert("id".to_string(), json!(id));
        fields.insert("meta".to_string(), Value::Object(meta));

        Ok(StoredResource::new(id, version_id, resource_type, Value::Object(fields)).at(now))
    }

    fn record(&mut self, key: StorageKey, stored: StoredResource, method: HistoryMethod) {
        self.history
            .entry(key)
            .or_default()
            .push(HistoryEntry::new(stored, method));
        self.generation += 1;
    }
}

fn version_number(resource: &StoredResource) -> u64 {
    resource.version_id.parse().unwrap_or(0)
}
