//! Plugin contracts consumed by the orchestrator.
//!
//! A run selects exactly one implementation of each trait. Implementations are shared across worker threads, so
//! every trait requires `Send + Sync`; any cached state (for example "is the toolchain available") lives in fields
//! of the implementing value, guarded as the implementation sees fit.

use std::any::Any;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::{PluginError, PluginResult};
use crate::results::ExecuteOutcome;

/// Whether a compiler operates on single files or on whole directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    File,
    Directory,
}

/// What a compiler produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerRole {
    /// Produces real binaries; eligible for Release builds.
    Compiler,
    /// Generates artifacts (source, scripts) that are then executed.
    Generator,
    /// Checks the item in place; the item itself stands in for the binary.
    Verifier,
}

impl CompilerRole {
    /// Name of the operation a build task invokes for this role.
    pub fn operation(self) -> &'static str {
        match self {
            CompilerRole::Compiler => "compile",
            CompilerRole::Generator => "generate",
            CompilerRole::Verifier => "verify",
        }
    }
}

/// Arguments for [`Compiler::generate_context_item`].
#[derive(Debug, Clone, Copy)]
pub struct ContextRequest<'a> {
    pub item: &'a Path,
    pub is_debug: bool,
    /// Build with coverage instrumentation.
    pub is_profile: bool,
    /// Binary path for compilers and generators, the item itself for verifiers.
    pub output_path: &'a Path,
    /// Rebuild even when outputs look current.
    pub force: bool,
}

/// Opaque, compiler-produced description of how to build and run one (item, flavor) pair.
pub trait ContextItem: fmt::Debug + Send + Sync {
    fn item(&self) -> &Path;

    /// Path of the produced binary (or the item itself for verifiers).
    fn output_path(&self) -> &Path;

    fn is_debug(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// Downcast a context to the concrete type a plugin produced.
pub fn downcast_context<'a, T: 'static>(context: &'a dyn ContextItem, plugin: &str) -> PluginResult<&'a T> {
    context
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| PluginError::ForeignContext {
            plugin: plugin.to_string(),
            item: context.item().to_path_buf(),
        })
}

/// Builds (or generates, or verifies) test items.
pub trait Compiler: Send + Sync {
    fn name(&self) -> &str;

    fn granularity(&self) -> Granularity;

    fn role(&self) -> CompilerRole;

    /// Whether this compiler can handle the path at all (file type, project shape).
    fn is_supported(&self, path: &Path) -> bool;

    /// Whether a supported path is actually a test item.
    fn is_valid_test_item(&self, _path: &Path) -> bool {
        true
    }

    /// Check that the toolchain this compiler drives is usable.
    fn validate_environment(&self) -> PluginResult<()> {
        Ok(())
    }

    /// Extension (including the dot) appended to binary names; empty when none.
    fn binary_extension(&self) -> &str {
        ""
    }

    /// Prepare a build context, or `Ok(None)` when the flavor is disabled in this environment.
    fn generate_context_item(&self, request: &ContextRequest<'_>) -> PluginResult<Option<Box<dyn ContextItem>>>;

    fn compile(&self, _context: &dyn ContextItem, _sink: &mut dyn Write) -> PluginResult<i32> {
        Err(self.unsupported("compile"))
    }

    fn generate(&self, _context: &dyn ContextItem, _sink: &mut dyn Write) -> PluginResult<i32> {
        Err(self.unsupported("generate"))
    }

    fn verify(&self, _context: &dyn ContextItem, _sink: &mut dyn Write) -> PluginResult<i32> {
        Err(self.unsupported("verify"))
    }

    /// Invoke the single operation matching [`Compiler::role`].
    fn build(&self, context: &dyn ContextItem, sink: &mut dyn Write) -> PluginResult<i32> {
        match self.role() {
            CompilerRole::Compiler => self.compile(context, sink),
            CompilerRole::Generator => self.generate(context, sink),
            CompilerRole::Verifier => self.verify(context, sink),
        }
    }

    fn remove_temporary_artifacts(&self, _context: &dyn ContextItem) -> PluginResult<()> {
        Ok(())
    }

    /// Map a source path to the test item that exercises it.
    fn item_name_to_test_name(&self, source: &Path, test_type_name: &str) -> PathBuf {
        let stem = source.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let mut name = format!("{stem}_{test_type_name}");
        if let Some(ext) = source.extension().and_then(|e| e.to_str()) {
            name.push('.');
            name.push_str(ext);
        }
        source.with_file_name(name)
    }

    #[doc(hidden)]
    fn unsupported(&self, operation: &'static str) -> PluginError {
        PluginError::UnsupportedOperation {
            plugin: self.name().to_string(),
            operation,
        }
    }
}

/// Turns a built context into a command line and interprets its output.
pub trait TestParser: Send + Sync {
    fn name(&self) -> &str;

    fn is_supported_compiler(&self, compiler: &dyn Compiler) -> bool;

    /// Command line that runs the test. With `debug_on_error`, the command drops into a debugger on failure.
    fn create_invoke_command_line(&self, context: &dyn ContextItem, debug_on_error: bool) -> PluginResult<String>;

    /// Status code parsed from raw execution output.
    fn parse(&self, raw_output: &str) -> i32;
}

/// Runs a test command line and, when configured for it, extracts coverage.
pub trait CodeCoverageExtractor: Send + Sync {
    fn name(&self) -> &str;

    fn validate_environment(&self) -> PluginResult<()> {
        Ok(())
    }

    fn is_supported_compiler(&self, compiler: &dyn Compiler) -> bool;

    fn execute(
        &self,
        compiler: &dyn Compiler,
        context: &dyn ContextItem,
        command_line: &str,
    ) -> PluginResult<ExecuteOutcome>;
}

/// Judges a coverage percentage.
pub trait CodeCoverageValidator: Send + Sync {
    fn name(&self) -> &str;

    /// Returns the validation result and the minimum percentage it compared against.
    fn validate(&self, item: &Path, total_percentage: f64) -> (i32, Option<f64>);
}
