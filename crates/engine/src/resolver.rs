//! Resolver contract and batching of resolver output.

use std::fmt;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Everything a resolver may read for one invocation.
///
/// This is the only request-scoped state a resolver receives; shared runtime
/// state must not be mutated in a way visible across concurrent calls.
#[derive(Debug, Clone, Default)]
pub struct ResolverInput {
    pub stage_id: String,
    pub args: JsonMap<String, Value>,
    /// The parent instance this invocation resolves a field of, if any.
    pub parent: Option<Value>,
    /// Batched output of every declared dependency, keyed by stage id.
    pub dependencies: IndexMap<String, Vec<Value>>,
    pub variables: JsonMap<String, Value>,
    pub cancellation: CancellationToken,
}

impl ResolverInput {
    /// First batched value produced by `stage_id`.
    pub fn dependency(&self, stage_id: &str) -> Option<&Value> {
        self.dependencies.get(stage_id).and_then(|values| values.first())
    }
}

/// Executable function bound to a stage at materialization time.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, input: ResolverInput) -> Result<Value, ResolverError>;
}

/// Per-request resolution failure, reported against the stage that raised it.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("resolution cancelled")]
    Cancelled,

    #[error("backend request failed: {0}")]
    Backend(String),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("value generation failed: {0}")]
    Generation(String),

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

/// A resolved value together with its JSON pointer in the result document.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub pointer: String,
    pub value: Value,
}

/// Reshapes a resolver's raw output before dependents consume it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Batcher {
    #[default]
    Identity,
    /// Arrays become one instance per element; other values pass through.
    Flatten,
}

impl Batcher {
    pub fn apply(self, instances: Vec<Instance>) -> Vec<Instance> {
        match self {
            Batcher::Identity => instances,
            Batcher::Flatten => instances
                .into_iter()
                .flat_map(|instance| match instance.value {
                    Value::Array(items) => items
                        .into_iter()
                        .enumerate()
                        .map(|(index, value)| Instance {
                            pointer: format!("{}/{}", instance.pointer, index),
                            value,
                        })
                        .collect::<Vec<_>>(),
                    value => vec![Instance {
                        pointer: instance.pointer,
                        value,
                    }],
                })
                .collect(),
        }
    }
}

impl fmt::Display for Batcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Batcher::Identity => f.write_str("identity"),
            Batcher::Flatten => f.write_str("flatten"),
        }
    }
}

/// Selects one field of the parent instance.
#[derive(Debug, Clone)]
pub struct ParentFieldResolver {
    field: String,
}

impl ParentFieldResolver {
    pub fn new(field: impl Into<String>) -> Self {
        Self { field: field.into() }
    }
}

#[async_trait]
impl Resolver for ParentFieldResolver {
    async fn resolve(&self, input: ResolverInput) -> Result<Value, ResolverError> {
        Ok(input
            .parent
            .as_ref()
            .and_then(|parent| parent.get(&self.field))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_splits_arrays_into_indexed_instances() {
        let instances = vec![
            Instance {
                pointer: "/users".into(),
                value: json!([{"id": 1}, {"id": 2}]),
            },
            Instance {
                pointer: "/extra".into(),
                value: json!("kept"),
            },
        ];

        let flattened = Batcher::Flatten.apply(instances.clone());
        let pointers: Vec<&str> = flattened.iter().map(|instance| instance.pointer.as_str()).collect();
        assert_eq!(pointers, vec!["/users/0", "/users/1", "/extra"]);
        assert_eq!(flattened[1].value, json!({"id": 2}));

        assert_eq!(Batcher::Identity.apply(instances.clone()), instances);
    }

    #[tokio::test]
    async fn parent_field_resolver_reads_parent_value() {
        let resolver = ParentFieldResolver::new("name");
        let input = ResolverInput {
            stage_id: "user.name".into(),
            parent: Some(json!({"name": "ada", "id": 7})),
            ..Default::default()
        };
        assert_eq!(resolver.resolve(input).await.expect("resolve"), json!("ada"));

        let orphan = ResolverInput {
            stage_id: "user.name".into(),
            ..Default::default()
        };
        assert_eq!(resolver.resolve(orphan).await.expect("resolve"), Value::Null);
    }
}
