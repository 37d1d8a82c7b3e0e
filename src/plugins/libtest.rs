//! Parser for the libtest harness output.

use testrig_core::{Compiler, CompilerRole, ContextItem, PluginResult, TestParser};

use crate::process::quote_path;

pub const NAME: &str = "libtest";

const PASSED: &str = "test result: ok.";
const FAILED: &str = "test result: FAILED.";

/// Runs harness binaries directly and reads the `test result:` summary line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibtestParser;

impl TestParser for LibtestParser {
    fn name(&self) -> &str {
        NAME
    }

    /// Only real binaries carry a libtest harness.
    fn is_supported_compiler(&self, compiler: &dyn Compiler) -> bool {
        compiler.role() == CompilerRole::Compiler
    }

    fn create_invoke_command_line(&self, context: &dyn ContextItem, debug_on_error: bool) -> PluginResult<String> {
        let binary = quote_path(context.output_path());
        if debug_on_error {
            Ok(format!("gdb -batch -ex run -ex bt --args {binary}"))
        } else {
            Ok(binary)
        }
    }

    /// `0` when every summary line is `ok`, `-1` when any says `FAILED`, `1` when there is no summary at all.
    fn parse(&self, raw_output: &str) -> i32 {
        let mut passed = false;
        for line in raw_output.lines().map(str::trim) {
            if line.starts_with(FAILED) {
                return -1;
            }
            passed |= line.starts_with(PASSED);
        }
        if passed { 0 } else { 1 }
    }
}
