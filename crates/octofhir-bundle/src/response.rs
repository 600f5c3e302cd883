//! Response entry assembly: status, Location, ETag, Last-Modified and body,
//! plus paging links and result bundles for search and history.

use octofhir_core::FhirDateTime;
use octofhir_storage::{HistoryEntry, HistoryMethod, StoredResource};
use serde_json::Value;

use crate::config::{PreferReturn, SearchSettings};
use crate::error::{BundleError, Result};
use crate::model::{
    BundleLink, ResponseEntry, ResultBundle, ResultEntry, ResultEntryRequest, ResultEntrySearch,
};
use crate::outcome::{OperationOutcome, OutcomeIssue};

pub const PAGE_PARAM: &str = "_page";
pub const COUNT_PARAM: &str = "_count";
pub const SINCE_PARAM: &str = "_since";

/// Weak ETag for a version id.
pub fn etag(version_id: &str) -> String {
    format!("W/\"{version_id}\"")
}

/// Extracts the version from a weak ETag (`W/"3"`).
pub fn parse_etag(value: &str) -> Option<&str> {
    let quoted = value.trim().strip_prefix("W/")?;
    let version = quoted.strip_prefix('"')?.strip_suffix('"')?;
    (!version.is_empty()).then_some(version)
}

pub fn location(base_url: &str, resource_type: &str, id: &str) -> String {
    format!("{}/{resource_type}/{id}", base_url.trim_end_matches('/'))
}

/// Joins the base URL and a relative request URL with exactly one slash.
pub fn absolute_uri(base_url: &str, relative: &str) -> String {
    let relative = relative.strip_prefix('/').unwrap_or(relative);
    if base_url.ends_with('/') {
        format!("{base_url}{relative}")
    } else {
        format!("{base_url}/{relative}")
    }
}

fn last_modified(stored: &StoredResource) -> String {
    stored
        .resource
        .pointer("/meta/lastUpdated")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| FhirDateTime::from(stored.last_updated).to_string())
}

impl ResponseEntry {
    /// Status and OperationOutcome for a failed entry.
    pub fn from_error(error: &BundleError) -> Self {
        Self::with_status(error.status()).with_body(error.to_operation_outcome().to_value())
    }
}

/// Response for a successful create or update.
pub fn write_entry(
    status: u16,
    stored: &StoredResource,
    location: String,
    prefer: PreferReturn,
    warnings: &[OutcomeIssue],
) -> ResponseEntry {
    let mut entry = ResponseEntry::with_status(status);
    entry.response.location = Some(location);
    entry.response.etag = Some(etag(&stored.version_id));
    entry.response.last_modified = Some(last_modified(stored));
    entry.resource = match prefer {
        PreferReturn::Minimal => None,
        PreferReturn::Representation => Some(stored.resource.clone()),
        PreferReturn::OperationOutcome => Some(OperationOutcome::success(warnings).to_value()),
    };
    entry
}

/// Response for a read or vread.
pub fn resource_entry(stored: &StoredResource) -> ResponseEntry {
    let mut entry = ResponseEntry::with_status(200).with_body(stored.resource.clone());
    entry.response.etag = Some(etag(&stored.version_id));
    entry.response.last_modified = Some(last_modified(stored));
    entry
}

/// Response for a search or history.
pub fn bundle_entry(bundle: &ResultBundle) -> ResponseEntry {
    ResponseEntry::with_status(200).with_body(bundle.to_value())
}

/// Response carrying an informational OperationOutcome.
pub fn outcome_entry(status: u16, diagnostics: impl Into<String>) -> ResponseEntry {
    ResponseEntry::with_status(status)
        .with_body(OperationOutcome::new(vec![OutcomeIssue::information(diagnostics)]).to_value())
}

/// Requested page of a search or history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    /// 1-based.
    pub page: u32,
    pub count: u32,
}

impl Paging {
    /// Reads `_page` and `_count`; `_count` defaults to the configured
    /// default and is capped at the configured maximum.
    pub fn from_query(query: &[(String, String)], settings: &SearchSettings) -> Result<Self> {
        let mut paging = Self {
            page: 1,
            count: settings.default_count.max(1),
        };
        for (name, value) in query {
            match name.as_str() {
                PAGE_PARAM => paging.page = positive(name, value)?,
                COUNT_PARAM => paging.count = positive(name, value)?.min(settings.max_count.max(1)),
                _ => {}
            }
        }
        Ok(paging)
    }

    pub fn offset(&self) -> u32 {
        (self.page - 1).saturating_mul(self.count)
    }

    pub fn last_page(&self, total: u32) -> u32 {
        total.div_ceil(self.count.max(1)).max(1)
    }

    /// `self`, and `next`/`previous` where those pages exist.
    pub fn links(&self, total: u32, request_uri: &str) -> Vec<BundleLink> {
        let mut links = vec![BundleLink::new("self", request_uri)];
        if self.page < self.last_page(total) {
            links.push(BundleLink::new(
                "next",
                page_url(request_uri, self.page + 1, self.count),
            ));
        }
        if self.page > 1 {
            links.push(BundleLink::new(
                "previous",
                page_url(request_uri, self.page - 1, self.count),
            ));
        }
        links
    }
}

fn positive(name: &str, value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(BundleError::invalid_query(format!(
            "Invalid value '{value}' for parameter '{name}': expected a positive integer"
        ))),
    }
}

/// `request_uri` with its paging parameters replaced.
fn page_url(request_uri: &str, page: u32, count: u32) -> String {
    let (path, query) = request_uri.split_once('?').unwrap_or((request_uri, ""));
    let paging = format!("{PAGE_PARAM}={page}&{COUNT_PARAM}={count}");
    let mut params: Vec<&str> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .filter(|p| {
            let name = p.split_once('=').map_or(*p, |(name, _)| name);
            name != PAGE_PARAM && name != COUNT_PARAM
        })
        .collect();
    params.push(&paging);
    format!("{path}?{}", params.join("&"))
}

pub fn searchset(
    matches: &[StoredResource],
    total: u32,
    base_url: &str,
    links: Vec<BundleLink>,
) -> ResultBundle {
    let entries = matches
        .iter()
        .map(|stored| ResultEntry {
            full_url: location(base_url, &stored.resource_type, &stored.id),
            resource: Some(stored.resource.clone()),
            search: Some(ResultEntrySearch {
                mode: "match".to_string(),
            }),
            request: None,
        })
        .collect();
    ResultBundle::searchset(total, entries, links)
}

pub fn history(
    versions: &[HistoryEntry],
    total: u32,
    base_url: &str,
    links: Vec<BundleLink>,
) -> ResultBundle {
    let entries = versions
        .iter()
        .map(|entry| {
            let stored = &entry.resource;
            let url = match entry.method {
                HistoryMethod::Create => stored.resource_type.clone(),
                HistoryMethod::Update | HistoryMethod::Delete => stored.reference(),
            };
            ResultEntry {
                full_url: location(base_url, &stored.resource_type, &stored.id),
                resource: (entry.method != HistoryMethod::Delete).then(|| stored.resource.clone()),
                search: None,
                request: Some(ResultEntryRequest {
                    method: entry.method.http_verb().to_string(),
                    url,
                }),
            }
        })
        .collect();
    ResultBundle::history(total, entries, links)
}
