//! # Gateway Engine
//!
//! Turns a flat, pre-ordered list of declarative stages into an executable
//! plan and runs it.
//!
//! ## Flow
//!
//! 1. A [`PlanDocument`] declares runtimes, type metadata and stages.
//! 2. [`RuntimeSet::initialize`] builds one runtime instance per declaration
//!    through the [`RuntimeRegistry`].
//! 3. The [`PlanBuilder`] visits stages in order and asks each owning runtime
//!    to materialize it, letting the runtime claim same-runtime relatives so
//!    one backend operation can serve many fields.
//! 4. [`execute_plan`] runs resolvers concurrently in dependency order and
//!    assembles a single JSON result.
//!
//! ## Usage
//!
//! ```rust
//! use tg_engine::{Gateway, parse_plan_str};
//! use tokio_util::sync::CancellationToken;
//!
//! let document = parse_plan_str(r#"
//! runtimes:
//!   fake: { kind: random, params: { seed: 1 } }
//! types:
//!   - { kind: boolean }
//! stages:
//!   - { id: flag, runtime: fake, out_type: 0 }
//! "#)?;
//!
//! let runtime = tokio::runtime::Runtime::new()?;
//! let report = runtime.block_on(Gateway::new().run(&document, CancellationToken::new()))?;
//! assert!(report.data["flag"].is_boolean());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Modules
//!
//! - **`model`**: declarative plan input
//! - **`stage`** / **`grouping`**: hierarchical ids and parent/descendant blocks
//! - **`runtime`**: runtime contract, registry and the built-in backends
//! - **`materializer`**: plan building and dependency validation
//! - **`executor`**: concurrent execution and result assembly

use std::{fs, path::Path};

use anyhow::{Context, Result};

pub mod error;
pub mod executor;
pub mod gateway;
pub mod grouping;
pub mod materializer;
pub mod model;
pub mod resolver;
pub mod runtime;
pub mod stage;

pub use error::{ConfigError, PlanError, ensure};
pub use executor::{ExecutionError, ExecutionReport, StageOutcome, StageStatus, execute_plan};
pub use gateway::{Gateway, PreparedPlan};
pub use grouping::{ParentGroups, iter_parent_stages};
pub use materializer::{MaterializedStage, Plan, PlanBuilder, build_plan};
pub use model::{PlanDocument, RuntimeDeclaration, StageSpec};
pub use resolver::{Batcher, Instance, Resolver, ResolverError, ResolverInput};
pub use runtime::{HttpRuntime, MaterializeContext, RandomRuntime, Runtime, RuntimeInit, RuntimeRegistry, RuntimeSet, Waitlist};

/// Parse a plan document from YAML or JSON text.
pub fn parse_plan_str(content: &str) -> Result<PlanDocument> {
    serde_yaml::from_str(content).context("Failed to parse plan document")
}

/// Load a plan document from the filesystem.
///
/// JSON is accepted as a subset of YAML, so the extension is not inspected.
///
/// # Errors
///
/// Fails when the file cannot be read or does not describe a plan document,
/// including when its type metadata names an unsupported kind.
pub fn parse_plan_file(file_path: impl AsRef<Path>) -> Result<PlanDocument> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("Failed to read plan file: {}", file_path.display()))?;
    parse_plan_str(&content).with_context(|| format!("Invalid plan file: {}", file_path.display()))
}
