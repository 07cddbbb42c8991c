//! One-stop preparation and execution of a [`PlanDocument`].

use std::fmt;
use std::sync::Arc;

use serde_json::{Map as JsonMap, Value};
use tg_util::{EnvSecretProvider, SecretProvider};
use tokio_util::sync::CancellationToken;

use crate::error::PlanError;
use crate::executor::{ExecutionError, ExecutionReport, execute_plan};
use crate::materializer::{Plan, PlanBuilder};
use crate::model::PlanDocument;
use crate::runtime::{RuntimeRegistry, RuntimeSet};

/// Runtime registry, secret source and diagnostics settings for preparing plans.
pub struct Gateway {
    registry: RuntimeRegistry,
    secrets: Arc<dyn SecretProvider>,
    verbose: bool,
}

impl Gateway {
    /// Built-in runtimes with secrets read from the process environment.
    pub fn new() -> Self {
        Self {
            registry: RuntimeRegistry::with_defaults(),
            secrets: Arc::new(EnvSecretProvider),
            verbose: false,
        }
    }

    pub fn with_registry(mut self, registry: RuntimeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretProvider>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Initialize the declared runtimes and materialize the stages.
    ///
    /// On error every runtime created for this document is released.
    pub fn prepare(&self, document: &PlanDocument) -> Result<PreparedPlan, PlanError> {
        let runtimes = RuntimeSet::initialize(&document.runtimes, &self.registry, self.secrets.as_ref())?;
        let plan = PlanBuilder::new(&runtimes, Arc::new(document.types.clone()))
            .verbose(self.verbose)
            .build(&document.stages)?;
        Ok(PreparedPlan {
            runtimes,
            plan,
            variables: document.variables.clone(),
        })
    }

    /// Prepare and execute `document`, releasing its runtimes afterwards.
    pub async fn run(&self, document: &PlanDocument, cancellation: CancellationToken) -> Result<ExecutionReport, ExecutionError> {
        let prepared = self.prepare(document)?;
        let report = prepared.execute(&JsonMap::new(), cancellation).await;
        prepared.release();
        report
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("registry", &self.registry)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

/// A materialized plan together with the runtimes its resolvers use.
#[derive(Debug)]
pub struct PreparedPlan {
    runtimes: RuntimeSet,
    plan: Plan,
    variables: JsonMap<String, Value>,
}

impl PreparedPlan {
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn runtimes(&self) -> &RuntimeSet {
        &self.runtimes
    }

    /// Execute with the document variables overlaid by `overrides`.
    pub async fn execute(&self, overrides: &JsonMap<String, Value>, cancellation: CancellationToken) -> Result<ExecutionReport, ExecutionError> {
        let mut variables = self.variables.clone();
        for (name, value) in overrides {
            variables.insert(name.clone(), value.clone());
        }
        execute_plan(&self.plan, &variables, cancellation).await
    }

    /// Release every runtime now instead of on drop.
    pub fn release(self) {
        self.runtimes.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tg_util::MapSecretProvider;

    fn document(yaml: &str) -> PlanDocument {
        serde_yaml::from_str(yaml).expect("document")
    }

    #[tokio::test]
    async fn runs_a_seeded_document() {
        let document = document(
            r#"
runtimes:
  fake: { kind: random, params: { seed: 7 } }
types:
  - { kind: struct, properties: { active: 1 } }
  - { kind: boolean }
stages:
  - { id: profile, runtime: fake, out_type: 0 }
  - { id: profile.active, runtime: fake, out_type: 1, dependencies: [profile] }
"#,
        );
        let gateway = Gateway::new().with_secrets(Arc::new(MapSecretProvider::new()));

        let first = gateway.run(&document, CancellationToken::new()).await.expect("first run");
        let second = gateway.run(&document, CancellationToken::new()).await.expect("second run");

        assert!(first.data["profile"]["active"].is_boolean());
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn prepare_failure_surfaces_configuration_error() {
        let document = document(
            r#"
runtimes:
  api: { kind: http, params: { endpoint: "http://127.0.0.1:9", basic_auth_secret: creds } }
stages: []
"#,
        );
        let gateway = Gateway::new().with_secrets(Arc::new(MapSecretProvider::new()));
        let error = gateway.prepare(&document).expect_err("missing secret");
        assert!(error.to_string().contains("TG_API_CREDS"), "unexpected error: {error}");
    }

    #[tokio::test]
    async fn prepared_plan_overlays_variables_and_releases_runtimes() {
        let document = document(
            r#"
runtimes:
  fake: { kind: random }
types:
  - { kind: uuid }
stages:
  - { id: id, runtime: fake, out_type: 0 }
variables: { region: eu }
"#,
        );
        let prepared = Gateway::new().prepare(&document).expect("prepare");
        let runtime = Arc::clone(prepared.runtimes().get("fake").expect("runtime"));

        let mut overrides = JsonMap::new();
        overrides.insert("region".into(), Value::from("us"));
        let report = prepared.execute(&overrides, CancellationToken::new()).await.expect("execute");
        assert!(report.data["id"].as_str().is_some_and(|id| uuid::Uuid::parse_str(id).is_ok()));

        prepared.release();
        assert!(runtime.is_released());
    }
}
