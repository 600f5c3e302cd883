//! Bundle and entry validation.
//!
//! Runs before anything is executed. Every request entry gets a response
//! entry; entries that fail here get their status and OperationOutcome filled
//! in and are skipped by the executor.

use octofhir_core::validate_id;
use serde_json::Value;
use tracing::debug;

use crate::error::{BundleError, BundleFailure, Result};
use crate::model::{BundleKind, HttpVerb, RequestBundle, RequestEntry, ResponseBundle, ResponseEntry};
use crate::outcome::OutcomeIssue;

/// Structural and profile validation of a single resource.
///
/// An empty list means the resource is valid. Issues with `error` or `fatal`
/// severity reject the resource; warnings are passed through to the response
/// when the client asks for an OperationOutcome.
pub trait ResourceValidator: Send + Sync {
    fn validate(&self, resource: &Value) -> Vec<OutcomeIssue>;
}

/// Checks the shape every FHIR resource must have.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicValidator;

impl ResourceValidator for BasicValidator {
    fn validate(&self, resource: &Value) -> Vec<OutcomeIssue> {
        let Value::Object(fields) = resource else {
            return vec![OutcomeIssue::error("structure", "Resource must be a JSON object")];
        };

        let mut issues = Vec::new();
        let resource_type = match fields.get("resourceType") {
            None => {
                issues.push(
                    OutcomeIssue::error("required", "Resource is missing the 'resourceType' field")
                        .at("resourceType"),
                );
                None
            }
            Some(Value::String(rt)) if is_resource_type_name(rt) => Some(rt.as_str()),
            Some(Value::String(rt)) => {
                issues.push(
                    OutcomeIssue::error("value", format!("'{rt}' is not a valid resource type"))
                        .at("resourceType"),
                );
                None
            }
            Some(_) => {
                issues.push(
                    OutcomeIssue::error("structure", "'resourceType' must be a string")
                        .at("resourceType"),
                );
                None
            }
        };

        let path = |field: &str| format!("{}.{field}", resource_type.unwrap_or("Resource"));
        match fields.get("id") {
            None => {}
            Some(Value::String(id)) => {
                if validate_id(id).is_err() {
                    issues.push(
                        OutcomeIssue::error("value", format!("'{id}' is not a valid resource id"))
                            .at(path("id")),
                    );
                }
            }
            Some(_) => {
                issues.push(OutcomeIssue::error("structure", "'id' must be a string").at(path("id")));
            }
        }

        if let Some(meta) = fields.get("meta")
            && !meta.is_object()
        {
            issues.push(OutcomeIssue::error("structure", "'meta' must be an object").at(path("meta")));
        }

        issues
    }
}

fn is_resource_type_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric())
}

/// Runs `validator` and splits the result: failures become an error,
/// warnings are returned.
pub fn validate_resource(validator: &dyn ResourceValidator, resource: &Value) -> Result<Vec<OutcomeIssue>> {
    let issues = validator.validate(resource);
    if issues.iter().any(|i| i.severity.is_failure()) {
        return Err(BundleError::validation_failed(issues));
    }
    Ok(issues)
}

/// Result of validating a whole request bundle.
#[derive(Debug)]
pub struct ValidatedBundle {
    pub kind: BundleKind,
    /// One entry per request entry; failed entries already carry a status.
    pub response: ResponseBundle,
    /// Parsed verb of every entry that passed validation.
    pub verbs: Vec<Option<HttpVerb>>,
    pub error_count: usize,
}

/// Validates the bundle as a whole and then each entry.
///
/// Bundle-level problems (empty bundle, missing or unsupported type,
/// a transaction against a non-transactional store) fail immediately with
/// every response entry unset. Entry problems are recorded in the response;
/// for a transaction any such problem then fails the bundle.
pub fn validate_bundle(
    bundle: &RequestBundle,
    validator: &dyn ResourceValidator,
    transactional: bool,
) -> std::result::Result<ValidatedBundle, BundleFailure> {
    let len = bundle.entry.len();
    let kind = check_bundle(bundle, transactional).map_err(|error| {
        let kind = bundle.kind().unwrap_or(BundleKind::Batch);
        BundleFailure::new(error, ResponseBundle::unprocessed(kind, len))
    })?;

    let mut response = ResponseBundle::unprocessed(kind, len);
    let mut verbs = Vec::with_capacity(len);
    let mut error_count = 0;

    for (index, entry) in bundle.entry.iter().enumerate() {
        match check_entry(entry, validator) {
            Ok(verb) => verbs.push(Some(verb)),
            Err(error) => {
                debug!(index, error = %error, "Bundle entry failed validation");
                response.entry[index] = ResponseEntry::from_error(&error);
                verbs.push(None);
                error_count += 1;
            }
        }
    }

    if error_count > 0 && kind.is_transaction() {
        return Err(BundleFailure::new(
            BundleError::invalid_input(
                "One or more errors were encountered while validating a 'transaction' request bundle.",
            ),
            response,
        ));
    }

    Ok(ValidatedBundle {
        kind,
        response,
        verbs,
        error_count,
    })
}

fn check_bundle(bundle: &RequestBundle, transactional: bool) -> Result<BundleKind> {
    if bundle.resource_type != "Bundle" {
        return Err(BundleError::structural(format!(
            "Expected a Bundle but found resource type '{}'",
            bundle.resource_type
        )));
    }
    if bundle.entry.is_empty() {
        return Err(BundleError::structural("Bundle parameter is missing or empty."));
    }
    let Some(bundle_type) = bundle.bundle_type.as_deref() else {
        return Err(BundleError::structural("Bundle.type is missing"));
    };
    match bundle_type.parse::<BundleKind>() {
        Ok(BundleKind::Transaction) if !transactional => Err(BundleError::unsupported(
            "Bundled 'transaction' request cannot be processed because the configured persistence layer does not support transactions.",
        )),
        Ok(kind) => Ok(kind),
        Err(_) => Err(BundleError::structural(
            "Bundle.type must be either 'batch' or 'transaction'.",
        )),
    }
}

fn check_entry(entry: &RequestEntry, validator: &dyn ResourceValidator) -> Result<HttpVerb> {
    let Some(request) = entry.request.as_ref() else {
        return Err(BundleError::structural("BundleEntry is missing the 'request' field."));
    };
    let Some(method) = request.method.as_deref() else {
        return Err(BundleError::structural("BundleEntry.request is missing the 'method' field"));
    };
    if request.url.as_deref().is_none_or(|url| url.trim().is_empty()) {
        return Err(BundleError::structural("BundleEntry.request is missing the 'url' field"));
    }

    let verb: HttpVerb = method.parse().map_err(BundleError::Structural)?;
    match (verb, entry.resource.is_some()) {
        (HttpVerb::Get | HttpVerb::Delete, true) => {
            return Err(BundleError::structural(format!(
                "BundleEntry.resource not allowed for BundleEntry with {verb} method."
            )));
        }
        (HttpVerb::Post | HttpVerb::Put, false) => {
            return Err(BundleError::structural(
                "BundleEntry.resource is required for BundleEntry with POST or PUT method.",
            ));
        }
        _ => {}
    }

    if let Some(resource) = entry.resource.as_ref() {
        validate_resource(validator, resource)?;
    }
    Ok(verb)
}
