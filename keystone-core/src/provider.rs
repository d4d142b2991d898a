//! Provider - Trait abstracting the remote infrastructure API
//!
//! A Provider turns a fully substituted resource into a remote create call and
//! a provider identifier into a remote destroy call. Retries, timeouts and
//! exactly-once guarantees all belong to the Provider, never to the engine.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::resource::{ResourceKind, ResourceSpec, Value};

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,
    pub resource: Option<String>,
    /// Identifier of a resource that was partially created before the failure
    pub provider_id: Option<String>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref name) = self.resource {
            write!(f, "[{}] {}", name, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            resource: None,
            provider_id: None,
            cause: None,
        }
    }

    pub fn for_resource(mut self, name: impl Into<String>) -> Self {
        self.resource = Some(name.into());
        self
    }

    /// Record that the remote resource exists even though the call failed
    pub fn with_partial_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a successful create call reports back
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedResource {
    /// Opaque identifier assigned by the provider
    pub provider_id: String,
    /// Output attributes other resources may reference
    pub outputs: HashMap<String, Value>,
}

impl CreatedResource {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            outputs: HashMap::new(),
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(key.into(), value.into());
        self
    }
}

/// Main Provider trait
///
/// `create` receives a resource whose references have already been replaced
/// by concrete values. Calling it twice for the same logical resource must be
/// rejected or return the same identifier. `destroy` on an identifier that is
/// already gone must succeed.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "awscc")
    fn name(&self) -> &'static str;

    /// Create a resource
    fn create(&self, resource: &ResourceSpec) -> BoxFuture<'_, ProviderResult<CreatedResource>>;

    /// Destroy a resource by its provider identifier
    fn destroy(&self, kind: ResourceKind, provider_id: &str) -> BoxFuture<'_, ProviderResult<()>>;
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for Providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn create(&self, resource: &ResourceSpec) -> BoxFuture<'_, ProviderResult<CreatedResource>> {
        (**self).create(resource)
    }

    fn destroy(&self, kind: ResourceKind, provider_id: &str) -> BoxFuture<'_, ProviderResult<()>> {
        (**self).destroy(kind, provider_id)
    }
}
