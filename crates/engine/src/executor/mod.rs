//! Concurrent plan execution.
//!
//! A stage starts once every declared dependency and its parent stage have
//! finished. Independent stages run concurrently on a [`JoinSet`]. A child
//! stage resolves once per object instance of its parent, after the parent's
//! batcher has been applied. Resolver errors fail the stage and skip its
//! dependents; they never abort the run.

mod assemble;
mod types;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value};
use tokio::task::{Id as TaskId, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::materializer::{MaterializedStage, Plan};
use crate::resolver::{Instance, Resolver, ResolverError, ResolverInput};
use crate::stage::{ancestors, field_name};

pub use assemble::child_pointer;
pub use types::{ExecutionError, ExecutionReport, StageOutcome, StageStatus, StatusSummary};

/// Execute every stage of `plan` and assemble the result document.
///
/// Returns [`ExecutionError::Cancelled`] when `cancellation` fires before all
/// stages finish; in-flight resolvers are aborted and nothing further is
/// scheduled.
pub async fn execute_plan(
    plan: &Plan,
    variables: &JsonMap<String, Value>,
    cancellation: CancellationToken,
) -> Result<ExecutionReport, ExecutionError> {
    let stages = plan.stages();
    let graph = StageGraph::new(stages);
    let variables = Arc::new(variables.clone());
    info!(stage_count = stages.len(), "plan execution started");

    let mut progress = Progress::new(stages.len());
    let mut join_set: JoinSet<(usize, Result<Vec<Instance>, ResolverError>)> = JoinSet::new();
    let mut running: HashMap<TaskId, usize> = HashMap::new();

    loop {
        if cancellation.is_cancelled() {
            join_set.abort_all();
            warn!(running = running.len(), "plan execution cancelled");
            return Err(ExecutionError::Cancelled);
        }

        for index in progress.settle(stages, &graph) {
            let stage = &stages[index];
            let task = StageTask {
                stage_id: stage.id.clone(),
                field: field_name(&stage.id).to_string(),
                args: stage.args.clone(),
                resolver: Arc::clone(&stage.resolver),
                parents: progress.parent_instances(&graph, index),
                dependencies: progress.dependency_values(stages, index),
                variables: Arc::clone(&variables),
                cancellation: cancellation.clone(),
            };
            debug!(stage_id = %stage.id, runtime = %stage.runtime, "stage execution started");
            let handle = join_set.spawn(async move { (index, task.run().await) });
            running.insert(handle.id(), index);
            progress.started[index] = true;
        }

        if join_set.is_empty() {
            break;
        }

        let joined = tokio::select! {
            biased;
            _ = cancellation.cancelled() => continue,
            joined = join_set.join_next_with_id() => joined,
        };

        match joined {
            None => break,
            Some(Ok((task_id, (index, result)))) => {
                running.remove(&task_id);
                progress.record(&stages[index], index, result);
            }
            Some(Err(error)) => {
                let Some(index) = running.remove(&error.id()) else {
                    continue;
                };
                let message = if error.is_panic() {
                    "resolver panicked".to_string()
                } else {
                    error.to_string()
                };
                progress.record(&stages[index], index, Err(ResolverError::Backend(message)));
            }
        }
    }

    progress.skip_unreachable(stages);
    let data = assemble::assemble(progress.writes(&graph));
    let outcomes = progress.into_outcomes(stages);
    let summary = StatusSummary::of(&outcomes);
    info!(
        stage_count = outcomes.len(),
        succeeded = summary.succeeded,
        failed = summary.failed,
        skipped = summary.skipped,
        "plan execution finished"
    );

    Ok(ExecutionReport { data, stages: outcomes })
}

/// Parent and prerequisite edges, by stage index.
struct StageGraph {
    parents: Vec<Option<usize>>,
    prerequisites: Vec<Vec<usize>>,
    has_children: Vec<bool>,
}

impl StageGraph {
    fn new(stages: &[MaterializedStage]) -> Self {
        let index_of: HashMap<&str, usize> = stages.iter().enumerate().map(|(index, stage)| (stage.id.as_str(), index)).collect();

        let parents: Vec<Option<usize>> = stages
            .iter()
            .map(|stage| ancestors(&stage.id).find_map(|ancestor| index_of.get(ancestor).copied()))
            .collect();

        let mut has_children = vec![false; stages.len()];
        for parent in parents.iter().flatten() {
            has_children[*parent] = true;
        }

        let prerequisites = stages
            .iter()
            .zip(&parents)
            .map(|(stage, parent)| {
                let mut seen = HashSet::new();
                parent
                    .iter()
                    .copied()
                    .chain(stage.dependencies.iter().filter_map(|dependency| index_of.get(dependency.as_str()).copied()))
                    .filter(|index| seen.insert(*index))
                    .collect()
            })
            .collect();

        Self {
            parents,
            prerequisites,
            has_children,
        }
    }
}

/// Mutable per-run bookkeeping.
struct Progress {
    started: Vec<bool>,
    outcomes: Vec<Option<StageOutcome>>,
    raw: Vec<Vec<Instance>>,
    batched: Vec<Vec<Instance>>,
}

impl Progress {
    fn new(len: usize) -> Self {
        Self {
            started: vec![false; len],
            outcomes: vec![None; len],
            raw: vec![Vec::new(); len],
            batched: vec![Vec::new(); len],
        }
    }

    fn status(&self, index: usize) -> Option<StageStatus> {
        self.outcomes[index].as_ref().map(|outcome| outcome.status)
    }

    /// Skip blocked stages until nothing changes, then return the stages
    /// whose prerequisites have all succeeded.
    fn settle(&mut self, stages: &[MaterializedStage], graph: &StageGraph) -> Vec<usize> {
        loop {
            let mut changed = false;
            for index in 0..stages.len() {
                if self.started[index] || self.outcomes[index].is_some() {
                    continue;
                }
                let blocker = graph.prerequisites[index].iter().find_map(|prerequisite| match self.status(*prerequisite) {
                    Some(StageStatus::Failed) => Some((*prerequisite, "failed earlier in the run")),
                    Some(StageStatus::Skipped) => Some((*prerequisite, "did not execute successfully")),
                    _ => None,
                });
                if let Some((prerequisite, detail)) = blocker {
                    let outcome = StageOutcome::skipped(&stages[index].id, &stages[prerequisite].id, detail);
                    info!(stage_id = %stages[index].id, dependency = %stages[prerequisite].id, "stage execution skipped due to dependency");
                    self.outcomes[index] = Some(outcome);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        (0..stages.len())
            .filter(|index| !self.started[*index] && self.outcomes[*index].is_none())
            .filter(|index| {
                graph.prerequisites[*index]
                    .iter()
                    .all(|prerequisite| self.status(*prerequisite) == Some(StageStatus::Succeeded))
            })
            .collect()
    }

    /// `(pointer, parent value)` pairs the stage resolves against.
    fn parent_instances(&self, graph: &StageGraph, index: usize) -> Vec<(String, Option<Value>)> {
        match graph.parents[index] {
            None => vec![(String::new(), None)],
            Some(parent) => self.batched[parent]
                .iter()
                .filter(|instance| instance.value.is_object())
                .map(|instance| (instance.pointer.clone(), Some(instance.value.clone())))
                .collect(),
        }
    }

    fn dependency_values(&self, stages: &[MaterializedStage], index: usize) -> IndexMap<String, Vec<Value>> {
        stages[index]
            .dependencies
            .iter()
            .filter_map(|dependency| {
                let position = stages.iter().position(|stage| &stage.id == dependency)?;
                let values = self.batched[position].iter().map(|instance| instance.value.clone()).collect();
                Some((dependency.clone(), values))
            })
            .collect()
    }

    fn record(&mut self, stage: &MaterializedStage, index: usize, result: Result<Vec<Instance>, ResolverError>) {
        let outcome = match result {
            Ok(instances) => {
                info!(stage_id = %stage.id, instances = instances.len(), "stage execution succeeded");
                let outcome = StageOutcome {
                    id: stage.id.clone(),
                    status: StageStatus::Succeeded,
                    instances: instances.len(),
                    error: None,
                    logs: vec![format!("stage '{}' resolved {} value(s)", stage.id, instances.len())],
                };
                self.batched[index] = stage.batcher.apply(instances.clone());
                self.raw[index] = instances;
                outcome
            }
            Err(error) => {
                warn!(stage_id = %stage.id, runtime = %stage.runtime, error = %error, "stage execution failed");
                StageOutcome {
                    id: stage.id.clone(),
                    status: StageStatus::Failed,
                    instances: 0,
                    error: Some(error.to_string()),
                    logs: vec![format!("stage '{}' failed: {}", stage.id, error)],
                }
            }
        };
        self.outcomes[index] = Some(outcome);
    }

    /// Stages still pending once nothing runs wait on each other through
    /// their parent links; they are reported as skipped.
    fn skip_unreachable(&mut self, stages: &[MaterializedStage]) {
        for (index, stage) in stages.iter().enumerate() {
            if self.outcomes[index].is_none() {
                warn!(stage_id = %stage.id, "stage never became ready");
                self.outcomes[index] = Some(StageOutcome {
                    id: stage.id.clone(),
                    status: StageStatus::Skipped,
                    instances: 0,
                    error: None,
                    logs: vec![format!("stage '{}' skipped because its prerequisites never completed", stage.id)],
                });
            }
        }
    }

    fn writes<'a>(&'a self, graph: &StageGraph) -> Vec<assemble::Write<'a>> {
        self.raw
            .iter()
            .enumerate()
            .filter(|(index, _)| self.status(*index) == Some(StageStatus::Succeeded))
            .flat_map(|(index, instances)| {
                let has_children = graph.has_children[index];
                instances.iter().map(move |instance| assemble::Write { instance, has_children })
            })
            .collect()
    }

    fn into_outcomes(self, stages: &[MaterializedStage]) -> Vec<StageOutcome> {
        self.outcomes
            .into_iter()
            .zip(stages)
            .map(|(outcome, stage)| {
                outcome.unwrap_or_else(|| StageOutcome {
                    id: stage.id.clone(),
                    status: StageStatus::Skipped,
                    instances: 0,
                    error: None,
                    logs: Vec::new(),
                })
            })
            .collect()
    }
}

/// Owned inputs for resolving one stage on a worker task.
struct StageTask {
    stage_id: String,
    field: String,
    args: JsonMap<String, Value>,
    resolver: Arc<dyn Resolver>,
    parents: Vec<(String, Option<Value>)>,
    dependencies: IndexMap<String, Vec<Value>>,
    variables: Arc<JsonMap<String, Value>>,
    cancellation: CancellationToken,
}

impl StageTask {
    async fn run(self) -> Result<Vec<Instance>, ResolverError> {
        let mut instances = Vec::with_capacity(self.parents.len());
        for (parent_pointer, parent) in self.parents {
            if self.cancellation.is_cancelled() {
                return Err(ResolverError::Cancelled);
            }
            let input = ResolverInput {
                stage_id: self.stage_id.clone(),
                args: self.args.clone(),
                parent,
                dependencies: self.dependencies.clone(),
                variables: (*self.variables).clone(),
                cancellation: self.cancellation.clone(),
            };
            let value = self.resolver.resolve(input).await?;
            instances.push(Instance {
                pointer: child_pointer(&parent_pointer, &self.field),
                value,
            });
        }
        Ok(instances)
    }
}
