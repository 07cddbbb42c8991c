//! Synthetic-value runtime.
//!
//! Produces one primary stage plus one dependent stage per claimed relative,
//! each generating a value for its own declared type. Useful for exercising
//! plans without a backend and as the smallest complete [`Runtime`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tg_types::{TypeGraph, TypeId};
use tracing::debug;

use super::generator::{GenerationError, ValueGenerator, check_generatable};
use super::{MaterializeContext, Runtime, RuntimeInit, RuntimeState, Waitlist, collect_relative_stages, log_materialized};
use crate::error::{ConfigError, PlanError};
use crate::materializer::MaterializedStage;
use crate::model::StageSpec;
use crate::resolver::{Resolver, ResolverError, ResolverInput};

#[derive(Debug)]
pub struct RandomRuntime {
    name: String,
    seed: Option<u64>,
    state: RuntimeState,
}

impl RandomRuntime {
    pub const KIND: &'static str = "random";

    /// Build from declarative params. `seed` is optional; without it values
    /// differ between runs.
    pub fn init(init: RuntimeInit<'_>) -> Result<Arc<dyn Runtime>, ConfigError> {
        let seed = init.optional_u64("seed")?;
        debug!(runtime = %init.name, seeded = seed.is_some(), "random runtime initialized");
        Ok(Arc::new(Self::new(init.name, seed)))
    }

    pub fn new(name: impl Into<String>, seed: Option<u64>) -> Self {
        Self {
            name: name.into(),
            seed,
            state: RuntimeState::default(),
        }
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    fn materialize_one(&self, stage: &StageSpec, context: &MaterializeContext) -> Result<MaterializedStage, PlanError> {
        check_generatable(&context.types, stage.out_type).map_err(|error| match error {
            GenerationError::Unsupported { kind } => PlanError::UnsupportedType {
                stage: stage.id.clone(),
                kind,
            },
            GenerationError::Type(source) => PlanError::Type {
                stage: stage.id.clone(),
                source,
            },
            other => PlanError::Assertion(format!("stage '{}': {other}", stage.id)),
        })?;

        let resolver = RandomResolver {
            types: Arc::clone(&context.types),
            out_type: stage.out_type,
            generator: Mutex::new(ValueGenerator::for_stage(self.seed, &stage.id)),
        };
        Ok(MaterializedStage::from_spec(stage, Arc::new(resolver)))
    }
}

impl Runtime for RandomRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn materialize(
        &self,
        stage: &StageSpec,
        waitlist: &mut Waitlist,
        context: &MaterializeContext,
    ) -> Result<Vec<MaterializedStage>, PlanError> {
        self.state.ensure_active(&self.name)?;

        let primary = self.materialize_one(stage, context)?;
        let relatives = collect_relative_stages(stage, waitlist);
        let mut produced = Vec::with_capacity(1 + relatives.len());
        for relative in &relatives {
            produced.push(self.materialize_one(relative, context)?.depending_on(&primary.id));
        }
        produced.insert(0, primary);

        log_materialized(&self.name, &produced, context.verbose);
        Ok(produced)
    }

    fn release(&self) {
        if self.state.release() {
            debug!(runtime = %self.name, "random runtime released");
        }
    }

    fn is_released(&self) -> bool {
        self.state.is_released()
    }
}

/// Generates one value per call for a fixed output type.
///
/// The generator is owned by this resolver alone, so concurrent calls for
/// other stages never observe its state.
struct RandomResolver {
    types: Arc<TypeGraph>,
    out_type: TypeId,
    generator: Mutex<ValueGenerator>,
}

#[async_trait]
impl Resolver for RandomResolver {
    async fn resolve(&self, input: ResolverInput) -> Result<Value, ResolverError> {
        if input.cancellation.is_cancelled() {
            return Err(ResolverError::Cancelled);
        }
        let mut generator = self
            .generator
            .lock()
            .map_err(|_| ResolverError::Generation("generator lock poisoned".to_string()))?;
        generator
            .generate(&self.types, self.out_type)
            .map_err(|error| ResolverError::Generation(error.to_string()))
    }
}
