//! Runtime selection by backend kind, and the live instances of one plan.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tg_util::SecretProvider;
use tracing::{debug, warn};

use super::{HttpRuntime, RandomRuntime, Runtime, RuntimeInit};
use crate::error::ConfigError;
use crate::model::RuntimeDeclaration;

/// Constructor for one backend kind.
pub type RuntimeFactory = fn(RuntimeInit<'_>) -> Result<Arc<dyn Runtime>, ConfigError>;

/// Backend kind tag to constructor.
#[derive(Debug, Clone)]
pub struct RuntimeRegistry {
    factories: HashMap<String, RuntimeFactory>,
}

impl RuntimeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with the built-in `random` and `http` backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(RandomRuntime::KIND, RandomRuntime::init);
        registry.register(HttpRuntime::KIND, HttpRuntime::init);
        registry
    }

    /// Register or replace the constructor for `kind`.
    pub fn register(&mut self, kind: impl Into<String>, factory: RuntimeFactory) -> &mut Self {
        self.factories.insert(kind.into(), factory);
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Construct the runtime declared as `name`.
    pub fn create(
        &self,
        name: &str,
        declaration: &RuntimeDeclaration,
        secrets: &dyn SecretProvider,
    ) -> Result<Arc<dyn Runtime>, ConfigError> {
        let factory = self.factories.get(&declaration.kind).ok_or_else(|| ConfigError::UnknownRuntimeKind {
            runtime: name.to_string(),
            kind: declaration.kind.clone(),
        })?;
        factory(RuntimeInit::new(name, &declaration.params, secrets))
    }
}

impl Default for RuntimeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Runtime instances for one plan, keyed by declared name.
///
/// Every instance is released when the set is dropped.
#[derive(Debug, Default)]
pub struct RuntimeSet {
    runtimes: IndexMap<String, Arc<dyn Runtime>>,
}

impl RuntimeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct every declared runtime.
    ///
    /// On failure the instances created so far are released before the
    /// error is returned.
    pub fn initialize(
        declarations: &IndexMap<String, RuntimeDeclaration>,
        registry: &RuntimeRegistry,
        secrets: &dyn SecretProvider,
    ) -> Result<Self, ConfigError> {
        let mut set = Self::new();
        for (name, declaration) in declarations {
            match registry.create(name, declaration, secrets) {
                Ok(runtime) => {
                    debug!(runtime = %name, kind = %declaration.kind, "runtime initialized");
                    set.insert(name.clone(), runtime);
                }
                Err(error) => {
                    warn!(runtime = %name, kind = %declaration.kind, error = %error, "runtime initialization failed");
                    set.release_all();
                    return Err(error);
                }
            }
        }
        Ok(set)
    }

    pub fn insert(&mut self, name: impl Into<String>, runtime: Arc<dyn Runtime>) {
        self.runtimes.insert(name.into(), runtime);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Runtime>> {
        self.runtimes.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.runtimes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.runtimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtimes.is_empty()
    }

    /// Release every instance. Safe to call repeatedly.
    pub fn release_all(&self) {
        for runtime in self.runtimes.values() {
            runtime.release();
        }
    }
}

impl Drop for RuntimeSet {
    fn drop(&mut self) {
        self.release_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use tg_util::MapSecretProvider;

    fn declarations(value: serde_json::Value) -> IndexMap<String, RuntimeDeclaration> {
        serde_json::from_value(value).expect("declarations")
    }

    #[test]
    fn initializes_declared_runtimes_in_order() {
        let declared = declarations(json!({
            "fake": {"kind": "random", "params": {"seed": 1}},
            "api": {"kind": "http", "params": {"endpoint": "http://127.0.0.1:9"}}
        }));
        let set = RuntimeSet::initialize(&declared, &RuntimeRegistry::default(), &MapSecretProvider::new()).expect("runtimes");
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["fake", "api"]);
        assert_eq!(set.get("api").map(|runtime| runtime.kind()), Some("http"));
    }

    #[test]
    fn unknown_kind_is_a_configuration_error() {
        let declared = declarations(json!({"lambda": {"kind": "python"}}));
        let error = RuntimeSet::initialize(&declared, &RuntimeRegistry::default(), &MapSecretProvider::new()).expect_err("unknown kind");
        assert!(matches!(error, ConfigError::UnknownRuntimeKind { ref kind, .. } if kind == "python"));
    }

    static TRACKED: Mutex<Vec<Arc<dyn Runtime>>> = Mutex::new(Vec::new());

    fn tracked_random(init: RuntimeInit<'_>) -> Result<Arc<dyn Runtime>, ConfigError> {
        let runtime = RandomRuntime::init(init)?;
        TRACKED.lock().expect("tracked runtimes").push(Arc::clone(&runtime));
        Ok(runtime)
    }

    #[test]
    fn partial_initialization_releases_created_runtimes() {
        let declared = declarations(json!({
            "first": {"kind": "tracked"},
            "second": {"kind": "tracked"},
            "api": {"kind": "http"}
        }));
        let mut registry = RuntimeRegistry::default();
        registry.register("tracked", tracked_random);

        let error = RuntimeSet::initialize(&declared, &registry, &MapSecretProvider::new()).expect_err("missing endpoint");
        assert!(matches!(error, ConfigError::MissingParameter { ref name, .. } if name == "endpoint"));

        let tracked = TRACKED.lock().expect("tracked runtimes");
        assert_eq!(tracked.len(), 2);
        assert!(tracked.iter().all(|runtime| runtime.is_released()));
    }

    #[test]
    fn dropping_the_set_releases_every_runtime() {
        let runtime: Arc<dyn Runtime> = Arc::new(RandomRuntime::new("fake", None));
        let probe = Arc::clone(&runtime);
        {
            let mut set = RuntimeSet::new();
            set.insert("fake", runtime);
            assert!(!probe.is_released());
        }
        assert!(probe.is_released());
    }
}
