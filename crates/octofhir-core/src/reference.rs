//! FHIR reference parsing.
//!
//! References appear as `Patient/123`, `Patient/123/_history/2`, absolute URLs
//! under the server base, or bundle-local placeholders such as
//! `urn:uuid:61ebe359-bfdc-4613-8bf2-c5e300945f0a`. Placeholders only have
//! meaning inside the bundle that declares them.

use std::fmt;

use crate::error::{CoreError, Result};

/// Prefix that marks a bundle-local identifier in `fullUrl` and `reference` values.
pub const LOCAL_REFERENCE_PREFIX: &str = "urn:";

/// Returns true for bundle-local placeholder identifiers.
pub fn is_local_reference(value: &str) -> bool {
    value.starts_with(LOCAL_REFERENCE_PREFIX)
}

/// A resolved `Type/id[/_history/version]` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FhirReference {
    pub resource_type: String,
    pub id: String,
    pub version: Option<String>,
}

impl FhirReference {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version: None,
        }
    }

    /// Returns the reference as a relative string (Type/id).
    pub fn to_relative(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

impl fmt::Display for FhirReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_relative())
    }
}

/// Parses a literal reference.
///
/// Absolute URLs are accepted only when they live under `base_url`.
/// Contained (`#id`) and bundle-local (`urn:`) references are rejected.
pub fn parse_reference(reference: &str, base_url: Option<&str>) -> Result<FhirReference> {
    let reference = reference.trim();
    if reference.is_empty() || reference.starts_with('#') || is_local_reference(reference) {
        return Err(CoreError::invalid_reference(reference));
    }

    let path = if reference.contains("://") {
        let base = base_url
            .map(|b| b.trim_end_matches('/'))
            .ok_or_else(|| CoreError::invalid_reference(reference))?;
        reference
            .strip_prefix(base)
            .map(|rest| rest.trim_start_matches('/'))
            .ok_or_else(|| CoreError::invalid_reference(reference))?
    } else {
        reference
    };

    let parts: Vec<&str> = path.split('/').collect();
    match parts.as_slice() {
        [rt, id] if !rt.is_empty() && !id.is_empty() => Ok(FhirReference::new(*rt, *id)),
        [rt, id, "_history", version] if !rt.is_empty() && !id.is_empty() => {
            let mut parsed = FhirReference::new(*rt, *id);
            parsed.version = Some((*version).to_string());
            Ok(parsed)
        }
        _ => Err(CoreError::invalid_reference(reference)),
    }
}
