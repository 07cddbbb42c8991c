//! Runtime contract, lifecycle state and shared materialization helpers.
//!
//! A runtime is a named backend instance. It is created once per declared
//! backend when a plan is prepared, turns declarative stages into
//! [`MaterializedStage`]s bound to resolvers, and is released when the plan is
//! done. Concrete backends live in the submodules and are selected through the
//! [`RuntimeRegistry`].

pub mod generator;
pub mod http;
pub mod random;
pub mod registry;

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::{Map as JsonMap, Value};
use tg_types::TypeGraph;
use tg_util::{SecretProvider, lookup_secret};
use tracing::{debug, info};

use crate::error::{ConfigError, PlanError, ensure};
use crate::materializer::MaterializedStage;
use crate::model::StageSpec;
use crate::stage::{StageAddress, is_descendant};

pub use generator::{GenerationError, ValueGenerator, check_generatable};
pub use http::HttpRuntime;
pub use random::RandomRuntime;
pub use registry::{RuntimeFactory, RuntimeRegistry, RuntimeSet};

/// Stages not yet claimed by any materialization call, in plan order.
pub type Waitlist = VecDeque<StageSpec>;

/// Read-only inputs shared by every materialization call of one plan build.
#[derive(Debug, Clone)]
pub struct MaterializeContext {
    pub types: Arc<TypeGraph>,
    /// Raises diagnostic detail only.
    pub verbose: bool,
}

impl MaterializeContext {
    pub fn new(types: Arc<TypeGraph>, verbose: bool) -> Self {
        Self { types, verbose }
    }
}

/// Backend contract every runtime satisfies.
pub trait Runtime: Send + Sync + fmt::Debug {
    /// Declared instance name.
    fn name(&self) -> &str;

    /// Backend kind tag this instance was built from.
    fn kind(&self) -> &'static str;

    /// Turn `stage` into one or more executable stages.
    ///
    /// The runtime may claim same-runtime relatives from the front of
    /// `waitlist`. Every stage produced for a claimed relative depends on the
    /// first stage in the returned list. The returned list is never empty.
    fn materialize(
        &self,
        stage: &StageSpec,
        waitlist: &mut Waitlist,
        context: &MaterializeContext,
    ) -> Result<Vec<MaterializedStage>, PlanError>;

    /// Release held resources. Idempotent and infallible.
    fn release(&self);

    fn is_released(&self) -> bool;
}

/// `initialized` / `released` lifecycle flag shared by runtime implementations.
#[derive(Debug, Default)]
pub struct RuntimeState {
    released: AtomicBool,
}

impl RuntimeState {
    /// Mark the runtime released. Returns `true` only for the first call.
    pub fn release(&self) -> bool {
        !self.released.swap(true, Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Fail fast when a released runtime is asked to materialize.
    pub fn ensure_active(&self, runtime: &str) -> Result<(), PlanError> {
        ensure(!self.is_released(), || format!("runtime '{runtime}' used after release"))
    }
}

/// Declarative inputs for constructing one runtime instance.
#[derive(Clone, Copy)]
pub struct RuntimeInit<'a> {
    pub name: &'a str,
    pub params: &'a JsonMap<String, Value>,
    pub secrets: &'a dyn SecretProvider,
}

impl<'a> RuntimeInit<'a> {
    pub fn new(name: &'a str, params: &'a JsonMap<String, Value>, secrets: &'a dyn SecretProvider) -> Self {
        Self { name, params, secrets }
    }

    pub fn required_str(&self, key: &str) -> Result<&'a str, ConfigError> {
        match self.params.get(key) {
            None | Some(Value::Null) => Err(ConfigError::MissingParameter {
                runtime: self.name.to_string(),
                name: key.to_string(),
            }),
            Some(value) => value.as_str().ok_or_else(|| self.invalid(key, "expected a string")),
        }
    }

    pub fn optional_str(&self, key: &str) -> Result<Option<&'a str>, ConfigError> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value.as_str().map(Some).ok_or_else(|| self.invalid(key, "expected a string")),
        }
    }

    /// Non-negative integer parameter; numeric strings are accepted.
    pub fn optional_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(number)) => number
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.invalid(key, "expected a non-negative integer")),
            Some(Value::String(text)) => text
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|error| self.invalid(key, &error.to_string())),
            Some(_) => Err(self.invalid(key, "expected a non-negative integer")),
        }
    }

    /// Resolve `TG_<RUNTIME NAME>_<KEY>` through the secret provider.
    pub fn secret(&self, key: &str) -> Result<String, ConfigError> {
        Ok(lookup_secret(self.secrets, self.name, key)?)
    }

    fn invalid(&self, key: &str, reason: &str) -> ConfigError {
        ConfigError::InvalidParameter {
            runtime: self.name.to_string(),
            name: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Debug for RuntimeInit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeInit")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Claim same-runtime relatives of `stage` from the front of `waitlist`.
///
/// Only the contiguous descendant block at the front of the waitlist is
/// considered. A descendant is claimed when it belongs to the same runtime,
/// its ancestors below `stage` were claimed too, and every dependency it
/// declares is `stage`, one of `stage`'s own dependencies, or an already
/// claimed relative. Everything else stays on the waitlist in its original
/// order, together with its subtree.
pub fn collect_relative_stages(stage: &StageSpec, waitlist: &mut Waitlist) -> Vec<StageSpec> {
    let block_len = waitlist
        .iter()
        .take_while(|candidate| is_descendant(&stage.id, &candidate.id))
        .count();
    let block: Vec<StageSpec> = waitlist.drain(..block_len).collect();

    let mut context: HashSet<&str> = stage.dependencies.iter().map(String::as_str).collect();
    context.insert(&stage.id);

    let mut claimed_ids: HashSet<String> = HashSet::new();
    let mut rejected_roots: Vec<String> = Vec::new();
    let mut claimed = Vec::new();
    let mut remaining = Vec::new();

    for candidate in block {
        let under_rejected = rejected_roots.iter().any(|root| is_descendant(root, &candidate.id));
        let same_context = candidate
            .dependencies
            .iter()
            .all(|dependency| context.contains(dependency.as_str()) || claimed_ids.contains(dependency));

        if !under_rejected && candidate.runtime == stage.runtime && same_context {
            claimed_ids.insert(candidate.id.clone());
            claimed.push(candidate);
        } else {
            if !under_rejected {
                rejected_roots.push(candidate.id.clone());
            }
            remaining.push(candidate);
        }
    }

    for candidate in remaining.into_iter().rev() {
        waitlist.push_front(candidate);
    }
    claimed
}

/// Emit per-stage materialization detail, louder when `verbose` is set.
pub(crate) fn log_materialized(runtime: &str, produced: &[MaterializedStage], verbose: bool) {
    for stage in produced {
        if verbose {
            info!(
                runtime = %runtime,
                stage_id = %stage.stage_id(),
                dependencies = ?stage.dependencies,
                batcher = %stage.batcher,
                "stage materialized"
            );
        } else {
            debug!(runtime = %runtime, stage_id = %stage.stage_id(), "stage materialized");
        }
    }
}
