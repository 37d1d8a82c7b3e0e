#![forbid(unsafe_code)]
//! testrig: build-and-test orchestration
//!
//! testrig discovers test items, builds each one in a Debug and (when the compiler produces real binaries) a
//! Release flavor, runs the results, parses pass/fail status, optionally extracts and validates code coverage, and
//! folds everything into one composite result per item and per run.
//!
//! ## Pipeline
//!
//! Discovery → Output Naming → Context Builder → Build Scheduler → Execution Scheduler → Reporter.
//! See [`pipeline::Orchestrator`] for the entry points.
//!
//! ## Panic Policy
//!
//! - **Production code**: Use `Result` or `Option` with `?` / `ok_or` / `map_err`. Library modules enforce
//!   `#![deny(clippy::unwrap_used)]`.
//! - **Plugin code**: panics raised by plugins inside worker tasks are caught at the task boundary and recorded as
//!   `-1` stage results, never propagated to the scheduler.
//! - **Test code**: `.unwrap()` and `.expect()` are acceptable in tests.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod plugins;
pub mod pool;
pub mod process;
pub mod reporter;

pub use config::RunConfig;
pub use error::SetupError;
pub use pipeline::Orchestrator;
pub use plugins::{PluginRegistry, PluginSelection, Plugins};
pub use pool::{OutputStream, Task, WorkerPool};
pub use reporter::{ConsoleReporter, Reporter, RunSummary, run_exit_code};

pub use testrig_core::{
    CodeCoverageExtractor, CodeCoverageValidator, CompleteResults, Compiler, CompilerRole, ContextItem,
    ContextRequest, ExecuteOutcome, Flavor, Granularity, PluginError, PluginResult, Results, StageKind,
    StageOutcome, StageStatus, TestItem, TestParser,
};
