use std::fs;
use std::io::{self, Read};
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;

/// Reads a JSON document from `file`, or from stdin when no file is given.
pub fn read_json(file: Option<&Path>) -> Result<Value> {
    let content = match file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?,
        None => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read from stdin")?;
            buf
        }
    };
    serde_json::from_str(&content).context("Invalid JSON")
}

/// Resources to seed from a document: a single resource, an array of
/// resources, or the entry resources of a Bundle.
pub fn seed_resources(document: Value) -> Result<Vec<Value>> {
    let resources = match document {
        Value::Array(items) => items,
        Value::Object(ref fields)
            if fields.get("resourceType").and_then(Value::as_str) == Some("Bundle") =>
        {
            fields
                .get("entry")
                .and_then(Value::as_array)
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|entry| entry.get("resource").cloned())
                        .collect()
                })
                .unwrap_or_default()
        }
        Value::Object(_) => vec![document],
        _ => bail!("Seed document must be a resource, an array of resources or a Bundle"),
    };

    if let Some(index) = resources
        .iter()
        .position(|r| r.get("resourceType").and_then(Value::as_str).is_none())
    {
        bail!("Seed resource #{index} has no resourceType");
    }
    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_seed_shapes() {
        let single = seed_resources(json!({"resourceType": "Patient", "id": "a"})).unwrap();
        assert_eq!(single.len(), 1);

        let array = seed_resources(json!([
            {"resourceType": "Patient"},
            {"resourceType": "Observation"}
        ]))
        .unwrap();
        assert_eq!(array.len(), 2);

        let bundle = seed_resources(json!({
            "resourceType": "Bundle",
            "type": "collection",
            "entry": [{"resource": {"resourceType": "Patient"}}, {"fullUrl": "urn:x"}]
        }))
        .unwrap();
        assert_eq!(bundle.len(), 1);

        assert!(seed_resources(json!("Patient")).is_err());
        assert!(seed_resources(json!([{"id": "x"}])).is_err());
    }

    #[test]
    fn test_read_json_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"resourceType\": \"Bundle\"}}").unwrap();
        let value = read_json(Some(file.path())).unwrap();
        assert_eq!(value["resourceType"], "Bundle");

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "{{ not json").unwrap();
        assert!(read_json(Some(broken.path())).is_err());
    }
}
