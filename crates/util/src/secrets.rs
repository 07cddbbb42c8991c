//! Secret lookup for runtime initialization.
//!
//! Runtimes never read the process environment directly. They receive a
//! [`SecretProvider`] and ask it for `TG_<SCOPE>_<KEY>` names built by
//! [`secret_name`], which keeps plan building testable without mutating
//! process state.

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

/// Prefix shared by every secret name.
pub const SECRET_PREFIX: &str = "TG";

/// Source of secret values keyed by fully-qualified secret name.
pub trait SecretProvider: Send + Sync {
    /// Return the value stored under `name`, if any.
    fn get(&self, name: &str) -> Option<String>;
}

/// Resolves secrets from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretProvider;

impl SecretProvider for EnvSecretProvider {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// In-memory secret table, mostly useful for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MapSecretProvider {
    values: HashMap<String, String>,
}

impl MapSecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under the name derived from `scope` and `key`.
    pub fn with_secret(mut self, scope: &str, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(secret_name(scope, key), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapSecretProvider {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(name, value)| (name.into(), value.into())).collect(),
        }
    }
}

impl SecretProvider for MapSecretProvider {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Build the secret name for a backend scope and key.
///
/// `secret_name("example", "seed")` yields `TG_EXAMPLE_SEED`.
pub fn secret_name(scope: &str, key: &str) -> String {
    format!("{}_{}_{}", SECRET_PREFIX, scope.to_uppercase(), key.to_uppercase())
}

/// Resolve a required secret, failing with a descriptive error when absent.
pub fn lookup_secret(provider: &dyn SecretProvider, scope: &str, key: &str) -> Result<String, SecretError> {
    let name = secret_name(scope, key);
    match provider.get(&name) {
        Some(value) => {
            debug!(secret = %name, "resolved secret -> [REDACTED]");
            Ok(value)
        }
        None => Err(SecretError::Missing {
            scope: scope.to_string(),
            key: key.to_string(),
            name,
        }),
    }
}

/// Errors that can occur while resolving secrets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("Missing secret '{key}' for '{scope}': {name} is not set")]
    Missing { scope: String, key: String, name: String },
}
