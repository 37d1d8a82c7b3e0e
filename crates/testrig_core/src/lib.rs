//! Provide the results model and plugin contracts shared by the testrig orchestrator and its plugins.
//!
//! This crate is intentionally small and dependency-light. It contains:
//! - the per-stage / per-flavor / per-item results model and its composite-result precedence rules, and
//! - the traits a compiler, test parser, coverage extractor, or coverage validator implements to plug into a run.
//!
//! ## Notes
//!
//! - This is a “contract” crate: **no IO**, no global state, and no scheduling logic. Plugins write captured
//!   output into the sink they are handed; the orchestrator decides where it goes.
//! - Stage results are plain `i32` codes: `0` is success, negative is failure, positive is unknown. `None` means the
//!   stage never ran.

pub mod errors;
pub mod plugin;
pub mod results;

pub use errors::{PluginError, PluginResult};
pub use plugin::{
    CodeCoverageExtractor, CodeCoverageValidator, Compiler, CompilerRole, ContextItem, ContextRequest, Granularity,
    TestParser,
};
pub use results::{CompleteResults, ExecuteOutcome, Flavor, Results, StageKind, StageOutcome, StageStatus, TestItem};
