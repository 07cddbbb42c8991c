//! Plan-build error model.
//!
//! Everything here aborts plan building: no partial plan is ever returned.
//! Per-request resolver failures live in [`crate::resolver::ResolverError`].

use tg_types::TypeError;
use tg_util::{EncodingError, SecretError};
use thiserror::Error;

/// Bad or missing runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("runtime '{runtime}' is missing required parameter '{name}'")]
    MissingParameter { runtime: String, name: String },

    #[error("runtime '{runtime}' has invalid parameter '{name}': {reason}")]
    InvalidParameter { runtime: String, name: String, reason: String },

    #[error("runtime '{runtime}' declares unknown kind '{kind}'")]
    UnknownRuntimeKind { runtime: String, kind: String },

    #[error("stage '{stage}' references undeclared runtime '{runtime}'")]
    UnknownRuntime { stage: String, runtime: String },

    #[error("stage '{stage}' has an invalid materializer: {reason}")]
    InvalidMaterializer { stage: String, reason: String },

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("secret payload could not be decoded: {0}")]
    SecretEncoding(#[from] EncodingError),
}

/// Structural failure while turning declarative stages into a plan.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("stage '{stage}' has unsupported type kind '{kind}'")]
    UnsupportedType { stage: String, kind: String },

    #[error("stage '{stage}' has invalid type metadata: {source}")]
    Type {
        stage: String,
        #[source]
        source: TypeError,
    },

    #[error("duplicate stage identifier detected: '{0}'")]
    DuplicateStage(String),

    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    DependencyGap { stage: String, dependency: String },

    #[error("cycle detected in stage dependencies involving: {}", stages.join(", "))]
    DependencyCycle { stages: Vec<String> },

    #[error("assertion failed: {0}")]
    Assertion(String),
}

impl PlanError {
    /// Whether this error is one of the dependency-structure failures.
    pub fn is_dependency_error(&self) -> bool {
        matches!(self, PlanError::DependencyGap { .. } | PlanError::DependencyCycle { .. })
    }
}

/// Fail with [`PlanError::Assertion`] when `condition` does not hold.
///
/// The message closure only runs on failure.
pub fn ensure<F>(condition: bool, message: F) -> Result<(), PlanError>
where
    F: FnOnce() -> String,
{
    if condition { Ok(()) } else { Err(PlanError::Assertion(message())) }
}
