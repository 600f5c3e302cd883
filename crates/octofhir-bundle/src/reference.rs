//! Bundle-local reference resolution.
//!
//! Entries may declare a placeholder `fullUrl` such as `urn:uuid:...` and other
//! entries may point at it from any `reference` field. Once the declaring entry
//! has been persisted the placeholder is bound to the real `Type/id`, and every
//! later POST/PUT payload has its placeholders rewritten before it is stored.

use indexmap::IndexMap;
use indexmap::map::Entry;
use octofhir_core::is_local_reference;
use serde_json::Value;
use tracing::debug;

use crate::error::{BundleError, Result};
use crate::model::RequestEntry;

/// Placeholder to `Type/id` bindings for one bundle invocation.
#[derive(Debug, Default, Clone)]
pub struct LocalReferenceMap {
    mappings: IndexMap<String, String>,
}

impl LocalReferenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, local: &str) -> Option<&str> {
        self.mappings.get(local).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Bindings in the order they were made.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.mappings.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The entry's local identifier, if its `fullUrl` is a placeholder.
    ///
    /// Fails when the placeholder is already bound by an earlier entry.
    pub fn retrieve_local_identifier(&self, entry: &RequestEntry) -> Result<Option<String>> {
        let Some(full_url) = entry.full_url.as_deref() else {
            return Ok(None);
        };
        if !is_local_reference(full_url) {
            return Ok(None);
        }
        if self.mappings.contains_key(full_url) {
            return Err(BundleError::DuplicateLocalReference(full_url.to_string()));
        }
        Ok(Some(full_url.to_string()))
    }

    /// Binds `local` to `Type/id`. A placeholder is bound at most once.
    pub fn add_mapping(&mut self, local: &str, resource_type: &str, id: &str) -> Result<()> {
        match self.mappings.entry(local.to_string()) {
            Entry::Occupied(_) => Err(BundleError::DuplicateLocalReference(local.to_string())),
            Entry::Vacant(slot) => {
                let external = format!("{resource_type}/{id}");
                debug!(local, external = %external, "Mapped local reference");
                slot.insert(external);
                Ok(())
            }
        }
    }

    /// Rewrites every placeholder `reference` in `resource` to its binding.
    ///
    /// Returns the number of references rewritten. Fails on the first
    /// placeholder that has no binding; `resource` may then be partially
    /// rewritten and should be discarded.
    pub fn process_local_references(&self, resource: &mut Value) -> Result<usize> {
        let mut rewritten = 0;
        self.rewrite(resource, &mut rewritten)?;
        Ok(rewritten)
    }

    fn rewrite(&self, value: &mut Value, rewritten: &mut usize) -> Result<()> {
        match value {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    match child {
                        Value::String(reference) if key == "reference" => {
                            if !is_local_reference(reference) {
                                continue;
                            }
                            let external = self.get(reference).ok_or_else(|| {
                                BundleError::UnresolvedLocalReference(reference.clone())
                            })?;
                            debug!(local = %reference, external, "Resolved local reference");
                            *reference = external.to_string();
                            *rewritten += 1;
                        }
                        _ => self.rewrite(child, rewritten)?,
                    }
                }
                Ok(())
            }
            Value::Array(items) => items
                .iter_mut()
                .try_for_each(|item| self.rewrite(item, rewritten)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retrieve_local_identifier() {
        let mut refs = LocalReferenceMap::new();
        let entry = RequestEntry::post("Patient", json!({"resourceType": "Patient"}))
            .with_full_url("urn:uuid:a");
        assert_eq!(
            refs.retrieve_local_identifier(&entry).unwrap().as_deref(),
            Some("urn:uuid:a")
        );

        let absolute = RequestEntry::post("Patient", json!({"resourceType": "Patient"}))
            .with_full_url("http://example.org/fhir/Patient/1");
        assert_eq!(refs.retrieve_local_identifier(&absolute).unwrap(), None);

        refs.add_mapping("urn:uuid:a", "Patient", "123").unwrap();
        let err = refs.retrieve_local_identifier(&entry).unwrap_err();
        assert!(matches!(err, BundleError::DuplicateLocalReference(ref id) if id == "urn:uuid:a"));
    }

    #[test]
    fn test_mapping_is_immutable() {
        let mut refs = LocalReferenceMap::new();
        refs.add_mapping("urn:1", "Patient", "a").unwrap();
        assert!(refs.add_mapping("urn:1", "Patient", "b").is_err());
        assert_eq!(refs.get("urn:1"), Some("Patient/a"));
        assert_eq!(refs.len(), 1);
    }

    #[test]
    fn test_process_local_references_rewrites_nested_fields() {
        let mut refs = LocalReferenceMap::new();
        refs.add_mapping("urn:uuid:p", "Patient", "p1").unwrap();
        refs.add_mapping("urn:uuid:d", "Practitioner", "d1").unwrap();

        let mut obs = json!({
            "resourceType": "Observation",
            "subject": {"reference": "urn:uuid:p", "display": "urn:uuid:p"},
            "performer": [
                {"reference": "urn:uuid:d"},
                {"reference": "Organization/o1"}
            ],
            "contained": [{"resourceType": "Provenance", "target": [{"reference": "urn:uuid:p"}]}]
        });
        let count = refs.process_local_references(&mut obs).unwrap();

        assert_eq!(count, 3);
        assert_eq!(obs["subject"]["reference"], "Patient/p1");
        assert_eq!(obs["subject"]["display"], "urn:uuid:p");
        assert_eq!(obs["performer"][0]["reference"], "Practitioner/d1");
        assert_eq!(obs["performer"][1]["reference"], "Organization/o1");
        assert_eq!(obs["contained"][0]["target"][0]["reference"], "Patient/p1");
    }

    #[test]
    fn test_unresolved_reference() {
        let refs = LocalReferenceMap::new();
        let mut obs = json!({"resourceType": "Observation", "subject": {"reference": "urn:uuid:x"}});
        let err = refs.process_local_references(&mut obs).unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(err.to_string().contains("urn:uuid:x"));
    }
}
