//! Plain execution without coverage.

use testrig_core::{CodeCoverageExtractor, Compiler, ContextItem, ExecuteOutcome, PluginResult};

use crate::process::{run_captured, shell_command};

pub const NAME: &str = "process";

/// Runs the command line through the platform shell. The test result is `0` on a zero exit code, `-1` otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExtractor;

impl CodeCoverageExtractor for ProcessExtractor {
    fn name(&self) -> &str {
        NAME
    }

    fn is_supported_compiler(&self, _compiler: &dyn Compiler) -> bool {
        true
    }

    fn execute(
        &self,
        _compiler: &dyn Compiler,
        _context: &dyn ContextItem,
        command_line: &str,
    ) -> PluginResult<ExecuteOutcome> {
        let run = run_captured(&mut shell_command(command_line))?;
        let result = if run.success() { 0 } else { -1 };
        Ok(ExecuteOutcome::test_only(result, run.duration, run.output))
    }
}
