//! Declarative plan input: stages, runtime declarations and type metadata.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};
use tg_types::{TypeGraph, TypeId};

use crate::stage::StageAddress;

/// A declarative stage as produced by the query compiler.
///
/// Stages arrive in pre-order: every stage is immediately followed by its
/// subtree, and descendant ids extend the parent id by one or more segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Hierarchical address, segments separated by `.` or `/`.
    pub id: String,
    /// Name of the runtime instance that owns this stage.
    pub runtime: String,
    /// Expected output type.
    pub out_type: TypeId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Already-resolved query arguments for this field.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub args: JsonMap<String, Value>,
    /// Runtime-specific description of the backend operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub materializer: Option<Value>,
}

impl StageSpec {
    pub fn new(id: impl Into<String>, runtime: impl Into<String>, out_type: TypeId) -> Self {
        Self {
            id: id.into(),
            runtime: runtime.into(),
            out_type,
            dependencies: Vec::new(),
            args: JsonMap::new(),
            materializer: None,
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_args(mut self, args: JsonMap<String, Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_materializer(mut self, materializer: Value) -> Self {
        self.materializer = Some(materializer);
        self
    }
}

impl StageAddress for StageSpec {
    fn stage_id(&self) -> &str {
        &self.id
    }
}

/// One named backend instance declared by a plan document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeDeclaration {
    /// Backend kind tag looked up in the runtime registry (`random`, `http`).
    pub kind: String,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub params: JsonMap<String, Value>,
}

/// A complete plan document: runtimes, type metadata, stages and variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanDocument {
    #[serde(default)]
    pub runtimes: IndexMap<String, RuntimeDeclaration>,
    #[serde(default)]
    pub types: TypeGraph,
    #[serde(default)]
    pub stages: Vec<StageSpec>,
    /// Request variables available to resolvers.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub variables: JsonMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_spec_defaults_optional_fields() {
        let stage: StageSpec = serde_yaml::from_str("id: user.name\nruntime: fake\nout_type: 3\n").expect("stage");
        assert_eq!(stage, StageSpec::new("user.name", "fake", 3));
    }

    #[test]
    fn plan_document_keeps_runtime_and_stage_order() {
        let document: PlanDocument = serde_yaml::from_str(
            r#"
runtimes:
  zeta: { kind: random, params: { seed: 1 } }
  alpha: { kind: http, params: { endpoint: "https://api.test" } }
types:
  - { kind: struct, properties: { name: 1 } }
  - { kind: string }
stages:
  - { id: user, runtime: zeta, out_type: 0 }
  - { id: user.name, runtime: zeta, out_type: 1, dependencies: [user] }
"#,
        )
        .expect("document");

        assert_eq!(document.runtimes.keys().collect::<Vec<_>>(), vec!["zeta", "alpha"]);
        assert_eq!(document.types.len(), 2);
        let ids: Vec<&str> = document.stages.iter().map(|stage| stage.id.as_str()).collect();
        assert_eq!(ids, vec!["user", "user.name"]);
        assert_eq!(document.stages[1].dependencies, vec!["user"]);
    }

    #[test]
    fn plan_document_rejects_unknown_type_kind() {
        let error = serde_yaml::from_str::<PlanDocument>("types:\n  - { kind: tensor }\n").expect_err("unknown kind");
        assert!(error.to_string().contains("unsupported kind 'tensor'"), "unexpected error: {error}");
    }
}
