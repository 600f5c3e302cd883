//! Entry URL parsing and dispatch to a single interaction.

use octofhir_storage::Compartment;

use crate::error::{BundleError, Result};
use crate::model::HttpVerb;

/// The request URL of a bundle entry, split into path tokens and query pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryUrl {
    /// Relative URL as given, minus any leading base URL.
    pub relative: String,
    pub tokens: Vec<String>,
    /// Decoded query parameters in request order.
    pub query: Vec<(String, String)>,
}

impl EntryUrl {
    /// Parses `raw`, which is either relative (`Patient/1?x=y`) or an absolute
    /// URL under `base_url`.
    pub fn parse(raw: &str, base_url: &str) -> Result<Self> {
        let raw = raw.trim();
        let base = base_url.trim_end_matches('/');
        let relative = match raw.strip_prefix(base) {
            Some(rest) if !base.is_empty() && (rest.is_empty() || rest.starts_with(['/', '?'])) => {
                rest.trim_start_matches('/')
            }
            _ if raw.split_once('?').map_or(raw, |(path, _)| path).contains("://") => {
                return Err(BundleError::structural(format!(
                    "Request URL '{raw}' is not relative to the server base URL"
                )));
            }
            _ => raw.trim_start_matches('/'),
        };

        let (path, query) = match relative.split_once('?') {
            Some((path, query)) => (path, query),
            None => (relative, ""),
        };
        let tokens = path
            .split('/')
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        let query = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();

        Ok(Self {
            relative: relative.to_string(),
            tokens,
            query,
        })
    }

    pub fn path(&self) -> String {
        self.tokens.join("/")
    }
}

/// One bundle entry interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Create {
        resource_type: String,
    },
    Update {
        resource_type: String,
        id: String,
    },
    Read {
        resource_type: String,
        id: String,
    },
    VRead {
        resource_type: String,
        id: String,
        version: String,
    },
    History {
        resource_type: String,
        id: String,
    },
    Search {
        resource_type: String,
        compartment: Option<Compartment>,
    },
    Delete {
        resource_type: String,
        id: String,
    },
    ConditionalDelete {
        resource_type: String,
    },
}

impl Operation {
    /// Determines the interaction from the verb and the shape of the path.
    pub fn parse(verb: HttpVerb, url: &EntryUrl) -> Result<Self> {
        let t: Vec<&str> = url.tokens.iter().map(String::as_str).collect();
        match verb {
            HttpVerb::Get => match t.as_slice() {
                [rt] => Ok(Self::Search {
                    resource_type: rt.to_string(),
                    compartment: None,
                }),
                [rt, id] => Ok(Self::Read {
                    resource_type: rt.to_string(),
                    id: id.to_string(),
                }),
                [rt, id, "_history"] => Ok(Self::History {
                    resource_type: rt.to_string(),
                    id: id.to_string(),
                }),
                [compartment, compartment_id, rt] => Ok(Self::Search {
                    resource_type: rt.to_string(),
                    compartment: Some(Compartment::new(*compartment, *compartment_id)),
                }),
                [rt, id, "_history", version] => Ok(Self::VRead {
                    resource_type: rt.to_string(),
                    id: id.to_string(),
                    version: version.to_string(),
                }),
                _ => Err(unrecognized(url)),
            },
            HttpVerb::Post => match t.as_slice() {
                [rt] => Ok(Self::Create {
                    resource_type: rt.to_string(),
                }),
                _ => Err(BundleError::structural(
                    "Request URL for bundled POST request should have path part with exactly one token (<resourceType>).",
                )),
            },
            HttpVerb::Put => match t.as_slice() {
                [rt, id] => Ok(Self::Update {
                    resource_type: rt.to_string(),
                    id: id.to_string(),
                }),
                _ => Err(BundleError::structural(
                    "Request URL for bundled PUT request should have path part with exactly two tokens (<resourceType>/<id>).",
                )),
            },
            HttpVerb::Delete => match t.as_slice() {
                [rt, id] => Ok(Self::Delete {
                    resource_type: rt.to_string(),
                    id: id.to_string(),
                }),
                [rt] if !url.query.is_empty() => Ok(Self::ConditionalDelete {
                    resource_type: rt.to_string(),
                }),
                [_] => Err(BundleError::structural(
                    "Conditional delete requires at least one search parameter",
                )),
                _ => Err(unrecognized(url)),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Read { .. } => "read",
            Self::VRead { .. } => "vread",
            Self::History { .. } => "history",
            Self::Search { .. } => "search",
            Self::Delete { .. } => "delete",
            Self::ConditionalDelete { .. } => "conditional-delete",
        }
    }

    pub fn resource_type(&self) -> &str {
        match self {
            Self::Create { resource_type }
            | Self::Update { resource_type, .. }
            | Self::Read { resource_type, .. }
            | Self::VRead { resource_type, .. }
            | Self::History { resource_type, .. }
            | Self::Search { resource_type, .. }
            | Self::Delete { resource_type, .. }
            | Self::ConditionalDelete { resource_type } => resource_type,
        }
    }
}

fn unrecognized(url: &EntryUrl) -> BundleError {
    BundleError::structural(format!(
        "Unrecognized path in request URL: {}",
        url.path()
    ))
}
