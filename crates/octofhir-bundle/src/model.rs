//! Bundle wire types.
//!
//! Request entries are kept permissive (every field optional) so that a
//! malformed entry surfaces as a per-entry structural error instead of a
//! deserialization failure of the whole bundle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn bundle_resource_type() -> String {
    "Bundle".to_string()
}

// -------------------------
// Request side
// -------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestBundle {
    #[serde(default = "bundle_resource_type")]
    pub resource_type: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub bundle_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<RequestEntry>,
}

impl RequestBundle {
    pub fn new(kind: BundleKind, entry: Vec<RequestEntry>) -> Self {
        Self {
            resource_type: bundle_resource_type(),
            bundle_type: Some(kind.as_str().to_string()),
            entry,
        }
    }

    /// Parsed bundle type, if it is one this processor accepts.
    pub fn kind(&self) -> Option<BundleKind> {
        self.bundle_type.as_deref()?.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RequestEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<EntryRequest>,
}

impl RequestEntry {
    pub fn new(method: HttpVerb, url: impl Into<String>) -> Self {
        Self {
            full_url: None,
            resource: None,
            request: Some(EntryRequest {
                method: Some(method.as_str().to_string()),
                url: Some(url.into()),
                if_match: None,
            }),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpVerb::Get, url)
    }

    pub fn post(url: impl Into<String>, resource: Value) -> Self {
        Self::new(HttpVerb::Post, url).with_resource(resource)
    }

    pub fn put(url: impl Into<String>, resource: Value) -> Self {
        Self::new(HttpVerb::Put, url).with_resource(resource)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpVerb::Delete, url)
    }

    pub fn with_resource(mut self, resource: Value) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_full_url(mut self, full_url: impl Into<String>) -> Self {
        self.full_url = Some(full_url.into());
        self
    }

    pub fn with_if_match(mut self, if_match: impl Into<String>) -> Self {
        if let Some(request) = self.request.as_mut() {
            request.if_match = Some(if_match.into());
        }
        self
    }

    pub fn method(&self) -> Option<&str> {
        self.request.as_ref()?.method.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.request.as_ref()?.url.as_deref()
    }

    pub fn if_match(&self) -> Option<&str> {
        self.request.as_ref()?.if_match.as_deref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EntryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_match: Option<String>,
}

/// The request bundle types this processor accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BundleKind {
    Batch,
    Transaction,
}

impl BundleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Transaction => "transaction",
        }
    }

    pub fn response_type(&self) -> ResponseBundleType {
        match self {
            Self::Batch => ResponseBundleType::BatchResponse,
            Self::Transaction => ResponseBundleType::TransactionResponse,
        }
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self, Self::Transaction)
    }
}

impl fmt::Display for BundleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BundleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch" => Ok(Self::Batch),
            "transaction" => Ok(Self::Transaction),
            other => Err(format!("unsupported bundle type '{other}'")),
        }
    }
}

/// HTTP verbs allowed in bundle entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpVerb {
    /// Order in which entries are executed: deletes free up ids first, creates
    /// establish local references, updates may use them, reads observe the result.
    pub const EXECUTION_ORDER: [HttpVerb; 4] = [Self::Delete, Self::Post, Self::Put, Self::Get];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpVerb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            _ => Err(format!(
                "BundleEntry.request contains unsupported HTTP method: {s}"
            )),
        }
    }
}

// -------------------------
// Response side
// -------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResponseBundleType {
    BatchResponse,
    TransactionResponse,
}

/// Response bundle whose entries line up 1:1 with the request entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseBundle {
    pub resource_type: String,
    #[serde(rename = "type")]
    pub bundle_type: ResponseBundleType,
    #[serde(default)]
    pub entry: Vec<ResponseEntry>,
}

impl ResponseBundle {
    /// A response with `len` entries, none processed yet.
    pub fn unprocessed(kind: BundleKind, len: usize) -> Self {
        Self {
            resource_type: bundle_resource_type(),
            bundle_type: kind.response_type(),
            entry: vec![ResponseEntry::default(); len],
        }
    }

    pub fn len(&self) -> usize {
        self.entry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_empty()
    }

    /// Number of entries with a status outside 2xx.
    pub fn error_count(&self) -> usize {
        self.entry
            .iter()
            .filter(|e| e.status_code().is_some_and(|s| !(200..300).contains(&s)))
            .count()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResponseEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    pub response: EntryResponse,
}

impl ResponseEntry {
    pub fn with_status(status: u16) -> Self {
        Self {
            resource: None,
            response: EntryResponse {
                status: Some(status.to_string()),
                ..Default::default()
            },
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.resource = Some(body);
        self
    }

    /// An unset status means the entry has not been processed yet.
    pub fn is_unset(&self) -> bool {
        self.response.status.is_none()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.response.status.as_deref()?.parse().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EntryResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

// -------------------------
// Search and history result bundles
// -------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleLink {
    pub relation: String,
    pub url: String,
}

impl BundleLink {
    pub fn new(relation: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultEntry {
    pub full_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<ResultEntrySearch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<ResultEntryRequest>,
}

/// Search component of a searchset entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultEntrySearch {
    pub mode: String,
}

/// Request component of a history entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultEntryRequest {
    pub method: String,
    pub url: String,
}

/// A `searchset` or `history` bundle returned as the body of a GET entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultBundle {
    pub resource_type: String,
    pub id: String,
    #[serde(rename = "type")]
    pub bundle_type: String,
    pub total: u32,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub link: Vec<BundleLink>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub entry: Vec<ResultEntry>,
}

impl ResultBundle {
    pub fn searchset(total: u32, entry: Vec<ResultEntry>, link: Vec<BundleLink>) -> Self {
        Self::build("searchset", total, entry, link)
    }

    pub fn history(total: u32, entry: Vec<ResultEntry>, link: Vec<BundleLink>) -> Self {
        Self::build("history", total, entry, link)
    }

    fn build(kind: &str, total: u32, entry: Vec<ResultEntry>, link: Vec<BundleLink>) -> Self {
        Self {
            resource_type: bundle_resource_type(),
            id: octofhir_core::generate_id(),
            bundle_type: kind.to_string(),
            total,
            link,
            entry,
        }
    }

    pub fn link(&self, relation: &str) -> Option<&str> {
        self.link
            .iter()
            .find(|l| l.relation == relation)
            .map(|l| l.url.as_str())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
