use std::sync::LazyLock;

use crate::error::{CoreError, Result};

static ID_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z0-9\-\.]{1,64}$").expect("Invalid id regex"));

/// Generates a new server-assigned logical id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Checks a logical id against the FHIR `id` grammar.
pub fn validate_id(id: &str) -> Result<()> {
    if ID_PATTERN.is_match(id) {
        Ok(())
    } else {
        Err(CoreError::invalid_id(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_valid_and_unique() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert!(validate_id(&a).is_ok());
    }

    #[test]
    fn test_validate_id() {
        assert!(validate_id("pat-1.v2").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("has space").is_err());
        assert!(validate_id("slash/inside").is_err());
        assert!(validate_id(&"x".repeat(65)).is_err());
    }
}
