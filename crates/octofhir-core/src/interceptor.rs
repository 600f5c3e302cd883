//! Persistence interceptors.
//!
//! Every persistence call made while processing a bundle is bracketed by a
//! `before` and an `after` notification. Unlike fire-and-forget event hooks,
//! interceptors run inline and in registration order: the first error aborts
//! the surrounding operation and is reported as its failure.
//!
//! ```ignore
//! struct StampSource;
//!
//! #[async_trait]
//! impl PersistenceInterceptor for StampSource {
//!     fn name(&self) -> &str { "stamp_source" }
//!
//!     async fn before(&self, event: &mut PersistenceEvent) -> Result<(), HookError> {
//!         if let Some(resource) = event.resource.as_mut() {
//!             resource["meta"]["source"] = json!("bundle");
//!         }
//!         Ok(())
//!     }
//! }
//!
//! registry.register(Arc::new(StampSource)).await;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Default upper bound for a single interceptor call.
pub const DEFAULT_INTERCEPTOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Error raised by an interceptor.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// The interceptor refused the operation (client-side problem).
    #[error("Rejected by interceptor: {0}")]
    Rejected(String),

    /// Interceptor execution failed.
    #[error("Interceptor execution failed: {0}")]
    Execution(String),

    /// The interceptor did not finish in time.
    #[error("Interceptor '{name}' timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    /// Generic error with source.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HookError {
    /// Create a rejection error from a string.
    pub fn rejected(msg: impl Into<String>) -> Self {
        HookError::Rejected(msg.into())
    }

    /// Create an execution error from a string.
    pub fn execution(msg: impl Into<String>) -> Self {
        HookError::Execution(msg.into())
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, HookError::Rejected(_))
    }
}

/// The persistence interaction an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistenceOp {
    Create,
    Update,
    Delete,
    Read,
    VRead,
    History,
    Search,
}

impl fmt::Display for PersistenceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Read => "read",
            Self::VRead => "vread",
            Self::History => "history",
            Self::Search => "search",
        };
        f.write_str(name)
    }
}

/// What an interceptor sees.
///
/// For writes, `resource` holds the payload about to be persisted during
/// `before` (changes made there are what gets stored) and the stored
/// version during `after`. For reads it is empty before the call and holds
/// the result (resource or result bundle) afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceEvent {
    pub op: PersistenceOp,
    pub resource_type: String,
    pub id: Option<String>,
    pub version_id: Option<String>,
    pub resource: Option<Value>,
}

impl PersistenceEvent {
    pub fn new(op: PersistenceOp, resource_type: impl Into<String>) -> Self {
        Self {
            op,
            resource_type: resource_type.into(),
            id: None,
            version_id: None,
            resource: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_version(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: Value) -> Self {
        self.resource = Some(resource);
        self
    }
}

/// Inline hook around persistence calls.
#[async_trait]
pub trait PersistenceInterceptor: Send + Sync {
    /// Unique name for this interceptor (for logging).
    fn name(&self) -> &str;

    /// Resource types this interceptor is interested in.
    ///
    /// An empty slice matches every type.
    fn resource_types(&self) -> &[&str] {
        &[]
    }

    fn matches(&self, event: &PersistenceEvent) -> bool {
        let types = self.resource_types();
        types.is_empty() || types.contains(&event.resource_type.as_str())
    }

    /// Called before the persistence call.
    async fn before(&self, _event: &mut PersistenceEvent) -> Result<(), HookError> {
        Ok(())
    }

    /// Called after a successful persistence call.
    async fn after(&self, _event: &mut PersistenceEvent) -> Result<(), HookError> {
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Before,
    After,
}

/// Ordered set of interceptors shared by bundle invocations.
pub struct InterceptorRegistry {
    interceptors: RwLock<Vec<Arc<dyn PersistenceInterceptor>>>,
    timeout: Duration,
}

impl InterceptorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_INTERCEPTOR_TIMEOUT)
    }

    /// Create a new registry with a custom per-call timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            interceptors: RwLock::new(Vec::new()),
            timeout,
        }
    }

    pub async fn register(&self, interceptor: Arc<dyn PersistenceInterceptor>) {
        let name = interceptor.name().to_string();
        self.interceptors.write().await.push(interceptor);
        debug!(interceptor = %name, "Registered persistence interceptor");
    }

    pub async fn interceptor_count(&self) -> usize {
        self.interceptors.read().await.len()
    }

    /// Runs every matching `before` hook.
    pub async fn fire_before(&self, event: &mut PersistenceEvent) -> Result<(), HookError> {
        self.fire(Phase::Before, event).await
    }

    /// Runs every matching `after` hook.
    pub async fn fire_after(&self, event: &mut PersistenceEvent) -> Result<(), HookError> {
        self.fire(Phase::After, event).await
    }

    async fn fire(&self, phase: Phase, event: &mut PersistenceEvent) -> Result<(), HookError> {
        let interceptors: Vec<_> = self.interceptors.read().await.iter().cloned().collect();

        for interceptor in &interceptors {
            if !interceptor.matches(event) {
                continue;
            }
            let name = interceptor.name();
            let call = async {
                match phase {
                    Phase::Before => interceptor.before(event).await,
                    Phase::After => interceptor.after(event).await,
                }
            };

            match tokio::time::timeout(self.timeout, call).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(interceptor = %name, error = %e, "Persistence interceptor failed");
                    return Err(e);
                }
                Err(_) => {
                    let timeout_ms = self.timeout.as_millis() as u64;
                    warn!(interceptor = %name, timeout_ms, "Persistence interceptor timed out");
                    return Err(HookError::Timeout {
                        name: name.to_string(),
                        timeout_ms,
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for InterceptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InterceptorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorRegistry")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct Recorder {
        name: String,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl PersistenceInterceptor for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn before(&self, event: &mut PersistenceEvent) -> Result<(), HookError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:before:{}", self.name, event.op));
            Ok(())
        }

        async fn after(&self, event: &mut PersistenceEvent) -> Result<(), HookError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:after:{}", self.name, event.op));
            Ok(())
        }
    }

    struct Rejecting;

    #[async_trait]
    impl PersistenceInterceptor for Rejecting {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn resource_types(&self) -> &[&str] {
            &["Observation"]
        }

        async fn before(&self, _event: &mut PersistenceEvent) -> Result<(), HookError> {
            Err(HookError::rejected("observations are read-only"))
        }
    }

    struct Tagger;

    #[async_trait]
    impl PersistenceInterceptor for Tagger {
        fn name(&self) -> &str {
            "tagger"
        }

        async fn before(&self, event: &mut PersistenceEvent) -> Result<(), HookError> {
            if let Some(resource) = event.resource.as_mut() {
                resource["active"] = json!(true);
            }
            Ok(())
        }
    }

    struct Sleepy;

    #[async_trait]
    impl PersistenceInterceptor for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        async fn after(&self, _event: &mut PersistenceEvent) -> Result<(), HookError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_interceptors_run_in_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = InterceptorRegistry::new();
        for name in ["first", "second"] {
            registry
                .register(Arc::new(Recorder {
                    name: name.to_string(),
                    calls: calls.clone(),
                }))
                .await;
        }
        assert_eq!(registry.interceptor_count().await, 2);

        let mut event = PersistenceEvent::new(PersistenceOp::Read, "Patient").with_id("1");
        registry.fire_before(&mut event).await.unwrap();
        registry.fire_after(&mut event).await.unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![
                "first:before:read",
                "second:before:read",
                "first:after:read",
                "second:after:read"
            ]
        );
    }

    #[tokio::test]
    async fn test_rejection_propagates_for_matching_type_only() {
        let registry = InterceptorRegistry::new();
        registry.register(Arc::new(Rejecting)).await;

        let mut patient = PersistenceEvent::new(PersistenceOp::Create, "Patient");
        assert!(registry.fire_before(&mut patient).await.is_ok());

        let mut observation = PersistenceEvent::new(PersistenceOp::Create, "Observation");
        let err = registry.fire_before(&mut observation).await.unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(
            err.to_string(),
            "Rejected by interceptor: observations are read-only"
        );
    }

    #[tokio::test]
    async fn test_before_hook_can_rewrite_payload() {
        let registry = InterceptorRegistry::new();
        registry.register(Arc::new(Tagger)).await;

        let mut event = PersistenceEvent::new(PersistenceOp::Create, "Patient")
            .with_resource(json!({"resourceType": "Patient"}));
        registry.fire_before(&mut event).await.unwrap();

        assert_eq!(
            event.resource,
            Some(json!({"resourceType": "Patient", "active": true}))
        );
    }

    #[tokio::test]
    async fn test_timeout_is_an_error() {
        let registry = InterceptorRegistry::with_timeout(Duration::from_millis(10));
        registry.register(Arc::new(Sleepy)).await;

        let mut event = PersistenceEvent::new(PersistenceOp::Search, "Patient");
        let err = registry.fire_after(&mut event).await.unwrap_err();
        assert!(matches!(err, HookError::Timeout { ref name, .. } if name == "sleepy"));
    }
}
