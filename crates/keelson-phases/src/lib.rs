//! Phase orchestration for keelson
//!
//! A cluster is converged by running its lifecycle phases in order
//! (infrastructure, kubernetes, distribution, plugins). Each lifecycle phase
//! is split into pre/core/post sub-phases driven by external tools. Before any
//! phase runs, preflight compares the new configuration with the one last
//! applied and enforces the migration rules.

#![deny(missing_docs)]

pub mod apply;
pub mod confirm;
pub mod lifecycle;
pub mod orchestrator;
pub mod phase;
pub mod preflight;
pub mod storer;
pub mod tool;

pub use apply::{Apply, ApplyOptions, ApplyOutcome};
pub use confirm::{Confirmer, StdinConfirmer};
pub use lifecycle::{LifecycleSteps, PhaseContext, PluginsPhase, ReducerHooks, ToolPhase, Toolchain};
pub use orchestrator::{Orchestrator, OrchestratorConfig, PhaseSet, RunOutcome, DEFAULT_TIMEOUT};
pub use phase::{OperationPhase, PersistingPhase};
pub use preflight::{Preflight, PreflightConfig, PreflightReport};
pub use storer::ConfigStorer;
pub use tool::{Invocation, ProcessRunner, ToolRunner, ToolStep};

/// Environment variable carrying the lifecycle phase name
pub const ENV_PHASE: &str = "KEELSON_PHASE";
/// Environment variable carrying the sub-phase name
pub const ENV_SUB_PHASE: &str = "KEELSON_SUB_PHASE";
/// Environment variable carrying the phase working directory
pub const ENV_WORKDIR: &str = "KEELSON_WORKDIR";
/// Environment variable pointing at the reducer template data file
pub const ENV_TEMPLATE_DATA: &str = "KEELSON_TEMPLATE_DATA";
/// Exported when the pods-running check is forced off
pub const ENV_SKIP_PODS_RUNNING_CHECK: &str = "KEELSON_SKIP_PODS_RUNNING_CHECK";
