//! Shared primitives for the OctoFHIR bundle processor.
//!
//! - [`id`]: logical id generation and validation
//! - [`time`]: RFC 3339 instants as used in `meta.lastUpdated`
//! - [`reference`]: reference parsing and bundle-local (`urn:`) references
//! - [`interceptor`]: before/after hooks around every persistence call

pub mod error;
pub mod id;
pub mod interceptor;
pub mod reference;
pub mod time;

pub use error::{CoreError, Result};
pub use id::{generate_id, validate_id};
pub use interceptor::{
    HookError, InterceptorRegistry, PersistenceEvent, PersistenceInterceptor, PersistenceOp,
};
pub use reference::{FhirReference, LOCAL_REFERENCE_PREFIX, is_local_reference, parse_reference};
pub use time::{FhirDateTime, now_utc};
