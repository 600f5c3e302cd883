//! Search matching for the in-memory backend.
//!
//! Supported parameters:
//! - `_id=a,b`: logical id is one of the listed values
//! - `<field>=value`: any string inside the top-level `<field>` contains `value`
//!   (case-insensitive); `<field>:exact=value` requires equality
//! - compartments: some `reference` inside the resource points at the
//!   compartment owner
//!
//! Other `_`-prefixed control parameters are ignored here; paging is applied
//! by the caller.

use octofhir_storage::{Compartment, SearchParams, StoredResource};
use serde_json::Value;

/// Returns true if `resource` satisfies every parameter in `params`.
pub fn matches(resource: &StoredResource, params: &SearchParams) -> bool {
    if let Some(compartment) = &params.compartment
        && !in_compartment(&resource.resource, compartment)
    {
        return false;
    }

    params.parameters.iter().all(|(key, values)| {
        // Repeated parameters are alternatives, as are comma-separated values.
        let mut alternatives = values.iter().flat_map(|v| v.split(','));
        let (name, modifier) = match key.split_once(':') {
            Some((name, modifier)) => (name, Some(modifier)),
            None => (key.as_str(), None),
        };

        match name {
            "_id" => alternatives.any(|v| v == resource.id),
            _ if name.starts_with('_') => true,
            _ => {
                let Some(field) = resource.resource.get(name) else {
                    return false;
                };
                let exact = modifier == Some("exact");
                alternatives.any(|v| field_matches(field, v, exact))
            }
        }
    })
}

fn field_matches(value: &Value, needle: &str, exact: bool) -> bool {
    match value {
        Value::String(s) if exact => s == needle,
        Value::String(s) => s.to_lowercase().contains(&needle.to_lowercase()),
        Value::Bool(b) => b.to_string() == needle,
        Value::Number(n) => n.to_string() == needle,
        Value::Array(items) => items.iter().any(|item| field_matches(item, needle, exact)),
        Value::Object(map) => map.values().any(|item| field_matches(item, needle, exact)),
        Value::Null => false,
    }
}

/// True if any `reference` value in the resource points at the compartment owner.
pub fn in_compartment(resource: &Value, compartment: &Compartment) -> bool {
    let target = compartment.reference();
    let suffix = format!("/{target}");
    let mut found = false;
    visit_references(resource, &mut |reference| {
        if reference == target || reference.ends_with(&suffix) {
            found = true;
        }
    });
    found
}

fn visit_references(value: &Value, visit: &mut impl FnMut(&str)) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match child {
                    Value::String(s) if key == "reference" => visit(s),
                    _ => visit_references(child, visit),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| visit_references(item, visit)),
        _ => {}
    }
}

/// Slices one page out of `items`, returning it and whether more follow.
pub fn paginate<T>(items: Vec<T>, offset: Option<u32>, count: Option<u32>) -> (Vec<T>, bool) {
    let total = items.len();
    let offset = offset.unwrap_or(0) as usize;
    let page: Vec<T> = match count {
        Some(count) => items.into_iter().skip(offset).take(count as usize).collect(),
        None => items.into_iter().skip(offset).collect(),
    };
    let has_more = offset + page.len() < total;
    (page, has_more)
}
