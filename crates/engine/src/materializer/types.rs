use std::fmt;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value};
use tg_types::TypeId;

use crate::error::PlanError;
use crate::model::StageSpec;
use crate::resolver::{Batcher, Resolver};
use crate::stage::StageAddress;

use super::validate::order_stages;

/// A stage bound to a concrete resolver with its final dependency set.
#[derive(Clone)]
pub struct MaterializedStage {
    pub id: String,
    pub runtime: String,
    pub out_type: TypeId,
    pub dependencies: Vec<String>,
    pub args: JsonMap<String, Value>,
    pub resolver: Arc<dyn Resolver>,
    pub batcher: Batcher,
}

impl MaterializedStage {
    /// Bind `spec` to `resolver`, keeping its id, type, args and dependencies.
    pub fn from_spec(spec: &StageSpec, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            id: spec.id.clone(),
            runtime: spec.runtime.clone(),
            out_type: spec.out_type,
            dependencies: spec.dependencies.clone(),
            args: spec.args.clone(),
            resolver,
            batcher: Batcher::Identity,
        }
    }

    /// Add `stage_id` to the dependency set if absent.
    pub fn depending_on(mut self, stage_id: &str) -> Self {
        if !self.dependencies.iter().any(|existing| existing == stage_id) {
            self.dependencies.push(stage_id.to_string());
        }
        self
    }

    pub fn with_batcher(mut self, batcher: Batcher) -> Self {
        self.batcher = batcher;
        self
    }
}

impl StageAddress for MaterializedStage {
    fn stage_id(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for MaterializedStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MaterializedStage")
            .field("id", &self.id)
            .field("runtime", &self.runtime)
            .field("out_type", &self.out_type)
            .field("dependencies", &self.dependencies)
            .field("batcher", &self.batcher)
            .finish_non_exhaustive()
    }
}

/// A validated set of materialized stages in plan order.
///
/// Ids are unique, every dependency names a stage of the plan and the
/// dependency graph is acyclic.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    stages: Vec<MaterializedStage>,
}

impl Plan {
    pub fn new(stages: Vec<MaterializedStage>) -> Result<Self, PlanError> {
        order_stages(&stages)?;
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[MaterializedStage] {
        &self.stages
    }

    pub fn get(&self, stage_id: &str) -> Option<&MaterializedStage> {
        self.stages.iter().find(|stage| stage.id == stage_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|stage| stage.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MaterializedStage> {
        self.stages.iter()
    }
}

impl<'a> IntoIterator for &'a Plan {
    type Item = &'a MaterializedStage;
    type IntoIter = std::slice::Iter<'a, MaterializedStage>;

    fn into_iter(self) -> Self::IntoIter {
        self.stages.iter()
    }
}
