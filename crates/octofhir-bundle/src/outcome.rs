//! FHIR OperationOutcome used for per-entry diagnostics and validation issues.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// FHIR issue severity: fatal | error | warning | information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Fatal,
    Error,
    Warning,
    Information,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fatal => "fatal",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "information",
        }
    }

    /// Fatal and error issues make a resource unacceptable.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fatal | Self::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutcomeIssue {
    pub severity: IssueSeverity,
    /// FHIR issue type code, e.g. `invalid`, `not-found`, `conflict`.
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub expression: Vec<String>,
}

impl OutcomeIssue {
    pub fn new(severity: IssueSeverity, code: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            diagnostics: Some(diagnostics.into()),
            expression: Vec::new(),
        }
    }

    pub fn error(code: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Error, code, diagnostics)
    }

    pub fn warning(code: impl Into<String>, diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Warning, code, diagnostics)
    }

    pub fn information(diagnostics: impl Into<String>) -> Self {
        Self::new(IssueSeverity::Information, "informational", diagnostics)
    }

    /// Attaches a FHIRPath location such as `Patient.id`.
    pub fn at(mut self, expression: impl Into<String>) -> Self {
        self.expression.push(expression.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationOutcome {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    pub issue: Vec<OutcomeIssue>,
}

impl OperationOutcome {
    pub fn new(issue: Vec<OutcomeIssue>) -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            issue,
        }
    }

    pub fn single(
        severity: IssueSeverity,
        code: impl Into<String>,
        diagnostics: impl Into<String>,
    ) -> Self {
        Self::new(vec![OutcomeIssue::new(severity, code, diagnostics)])
    }

    /// Outcome for a successful interaction, carrying any non-fatal issues.
    pub fn success(warnings: &[OutcomeIssue]) -> Self {
        if warnings.is_empty() {
            return Self::new(vec![OutcomeIssue::information("All OK")]);
        }
        Self::new(warnings.to_vec())
    }

    pub fn has_failures(&self) -> bool {
        self.issue.iter().any(|i| i.severity.is_failure())
    }

    pub fn to_value(&self) -> Value {
        let issues: Vec<Value> = self
            .issue
            .iter()
            .map(|issue| {
                let mut value = json!({
                    "severity": issue.severity.as_str(),
                    "code": issue.code,
                });
                if let Some(diagnostics) = &issue.diagnostics {
                    value["diagnostics"] = json!(diagnostics);
                }
                if !issue.expression.is_empty() {
                    value["expression"] = json!(issue.expression);
                }
                value
            })
            .collect();
        json!({
            "resourceType": self.resource_type,
            "issue": issues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_outcome_shape() {
        let outcome = OperationOutcome::single(IssueSeverity::Error, "invalid", "bad id");
        let value = outcome.to_value();
        assert_eq!(value["resourceType"], "OperationOutcome");
        assert_eq!(value["issue"][0]["severity"], "error");
        assert_eq!(value["issue"][0]["code"], "invalid");
        assert_eq!(value["issue"][0]["diagnostics"], "bad id");
        assert!(value["issue"][0].get("expression").is_none());
        assert_eq!(value, serde_json::to_value(&outcome).unwrap());
    }

    #[test]
    fn test_success_outcome() {
        let ok = OperationOutcome::success(&[]);
        assert!(!ok.has_failures());
        assert_eq!(ok.issue[0].code, "informational");

        let warned = OperationOutcome::success(&[
            OutcomeIssue::warning("business-rule", "name is empty").at("Patient.name")
        ]);
        assert_eq!(warned.issue.len(), 1);
        assert_eq!(warned.to_value()["issue"][0]["expression"][0], "Patient.name");
    }

    #[test]
    fn test_failure_detection() {
        let outcome = OperationOutcome::new(vec![
            OutcomeIssue::warning("informational", "minor"),
            OutcomeIssue::error("required", "missing"),
        ]);
        assert!(outcome.has_failures());
        assert!(IssueSeverity::Fatal.is_failure());
        assert!(!IssueSeverity::Information.is_failure());
    }
}
