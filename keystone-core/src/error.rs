//! Error types for the provisioning engine

use thiserror::Error;

use crate::state::Lifecycle;

/// Errors raised while loading, ordering, applying or reading back a resource graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A reference points at a logical name that is not part of the graph
    #[error("Resource '{resource}' references unknown resource '{target}'")]
    UnknownReference { resource: String, target: String },

    /// A requested output names a resource that is not part of the graph
    #[error("Output {resource}.{attribute} names unknown resource '{resource}'")]
    UnknownOutput { resource: String, attribute: String },

    /// Two resources share the same logical name
    #[error("Duplicate resource name: {0}")]
    DuplicateResource(String),

    /// The reference graph is not a DAG
    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    /// A reference could not be substituted because its target has no such output yet
    #[error("Resource '{resource}' cannot resolve {target}.{attribute}: target is not created")]
    UnresolvedReference {
        resource: String,
        target: String,
        attribute: String,
    },

    /// Substitution failed during apply even though the order said the target was ready
    #[error("Dependency '{target}' of '{resource}' was not ready when its turn came")]
    DependencyNotReady { resource: String, target: String },

    /// The state store refused a lifecycle change
    #[error("Invalid transition for '{resource}': {from} -> {to}")]
    InvalidTransition {
        resource: String,
        from: Lifecycle,
        to: Lifecycle,
    },

    /// A state store lookup for a name that was never loaded
    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    /// The transport reported a failed create call
    #[error("Failed to create '{resource}': {message}")]
    CreateFailed { resource: String, message: String },

    /// The transport reported a failed destroy call
    #[error("Failed to destroy '{resource}' ({provider_id}): {message}")]
    DestroyFailed {
        resource: String,
        provider_id: String,
        message: String,
    },

    /// Output extraction was asked for something the run never produced
    #[error("Output {resource}.{attribute} is not available: {reason}")]
    OutputNotAvailable {
        resource: String,
        attribute: String,
        reason: String,
    },
}

impl Error {
    /// Returns true for errors that indicate a bug in the engine rather than an operational failure
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Error::DependencyNotReady { .. } | Error::InvalidTransition { .. }
        )
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, Error>;

/// Errors raised while reading a manifest document
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The document is not valid JSON or does not have the manifest shape
    #[error("Invalid manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Unrecognised resource kind
    #[error("Unknown resource kind '{kind}' for resource '{resource}'")]
    UnknownKind { resource: String, kind: String },

    /// A JSON value that has no attribute representation
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}
