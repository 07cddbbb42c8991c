//! Plan building: turn the declarative stage list into a validated [`Plan`].
//!
//! Stages are visited strictly in order. Each unclaimed stage is handed to
//! its owning runtime together with the remaining waitlist; whatever the
//! runtime claims from the waitlist is not visited again. Any failure aborts
//! the whole build.

mod types;
mod validate;

use std::collections::HashSet;
use std::sync::Arc;

use tg_types::TypeGraph;
use tracing::{debug, info};

use crate::error::{ConfigError, PlanError, ensure};
use crate::model::StageSpec;
use crate::runtime::{MaterializeContext, RuntimeSet, Waitlist};

pub use types::{MaterializedStage, Plan};
pub use validate::order_stages;

/// Materializes stages against a set of live runtimes.
#[derive(Debug)]
pub struct PlanBuilder<'a> {
    runtimes: &'a RuntimeSet,
    context: MaterializeContext,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(runtimes: &'a RuntimeSet, types: Arc<TypeGraph>) -> Self {
        Self {
            runtimes,
            context: MaterializeContext::new(types, false),
        }
    }

    /// Raise per-stage materialization logging. Never changes the plan.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.context.verbose = verbose;
        self
    }

    pub fn build(&self, stages: &[StageSpec]) -> Result<Plan, PlanError> {
        let mut seen = HashSet::new();
        for stage in stages {
            if !seen.insert(stage.id.as_str()) {
                return Err(PlanError::DuplicateStage(stage.id.clone()));
            }
        }

        let mut waitlist: Waitlist = stages.iter().cloned().collect();
        let mut produced = Vec::with_capacity(stages.len());

        while let Some(stage) = waitlist.pop_front() {
            let runtime = self.runtimes.get(&stage.runtime).ok_or_else(|| ConfigError::UnknownRuntime {
                stage: stage.id.clone(),
                runtime: stage.runtime.clone(),
            })?;

            let claimable = waitlist.len();
            let materialized = runtime.materialize(&stage, &mut waitlist, &self.context)?;
            ensure(!materialized.is_empty(), || {
                format!("runtime '{}' produced no stages for '{}'", runtime.name(), stage.id)
            })?;
            ensure(waitlist.len() <= claimable, || {
                format!("runtime '{}' grew the waitlist while materializing '{}'", runtime.name(), stage.id)
            })?;

            debug!(
                stage_id = %stage.id,
                runtime = %runtime.name(),
                produced = materialized.len(),
                claimed = claimable - waitlist.len(),
                "stage group materialized"
            );
            produced.extend(materialized);
        }

        let plan = Plan::new(produced)?;
        info!(
            input_stages = stages.len(),
            plan_stages = plan.len(),
            runtimes = self.runtimes.len(),
            "plan built"
        );
        Ok(plan)
    }
}

/// Build a plan in one call.
pub fn build_plan(stages: &[StageSpec], runtimes: &RuntimeSet, types: Arc<TypeGraph>, verbose: bool) -> Result<Plan, PlanError> {
    PlanBuilder::new(runtimes, types).verbose(verbose).build(stages)
}
