//! `rustc --test` compiler plugin.
//!
//! Every `*.rs` file below a test directory is its own test crate, built into a libtest harness binary.

use std::any::Any;
use std::env::consts::EXE_SUFFIX;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use testrig_core::plugin::downcast_context;
use testrig_core::{Compiler, CompilerRole, ContextItem, ContextRequest, Granularity, PluginError, PluginResult};

use crate::process::{program_available, run_captured};

pub const NAME: &str = "rustc";

const DEBUG_FLAGS: [&str; 4] = ["-C", "debuginfo=2", "-C", "opt-level=0"];
const RELEASE_FLAGS: [&str; 2] = ["-C", "opt-level=3"];
const PROFILE_FLAGS: [&str; 2] = ["-C", "instrument-coverage"];

/// Extensions of the profiling temporaries left next to an instrumented binary.
const PROFILE_EXTENSIONS: [&str; 2] = ["profraw", "profdata"];

#[derive(Debug, Clone)]
pub struct RustcContext {
    pub item: PathBuf,
    pub output_path: PathBuf,
    pub is_debug: bool,
    pub is_profile: bool,
}

impl RustcContext {
    /// Compiler flags for this flavor.
    pub fn flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.is_debug {
            flags.extend(DEBUG_FLAGS);
        } else {
            flags.extend(RELEASE_FLAGS);
        }
        if self.is_profile {
            flags.extend(PROFILE_FLAGS);
        }
        flags
    }
}

impl ContextItem for RustcContext {
    fn item(&self) -> &Path {
        &self.item
    }

    fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn is_debug(&self) -> bool {
        self.is_debug
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct RustcCompiler {
    program: PathBuf,
    edition: String,
    available: OnceLock<bool>,
}

impl Default for RustcCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl RustcCompiler {
    pub fn new() -> Self {
        Self::with_program("rustc")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            edition: "2021".to_string(),
            available: OnceLock::new(),
        }
    }

    pub fn with_edition(mut self, edition: impl Into<String>) -> Self {
        self.edition = edition.into();
        self
    }

    fn command(&self, context: &RustcContext) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("--test")
            .arg("--edition")
            .arg(&self.edition)
            .args(context.flags())
            .arg(&context.item)
            .arg("-o")
            .arg(&context.output_path);
        command
    }
}

impl Compiler for RustcCompiler {
    fn name(&self) -> &str {
        NAME
    }

    fn granularity(&self) -> Granularity {
        Granularity::File
    }

    fn role(&self) -> CompilerRole {
        CompilerRole::Compiler
    }

    fn is_supported(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "rs")
    }

    /// `mod.rs` files are shared helper modules, not test crates.
    fn is_valid_test_item(&self, path: &Path) -> bool {
        !path.file_name().is_some_and(|name| name == "mod.rs")
    }

    fn validate_environment(&self) -> PluginResult<()> {
        let available = *self.available.get_or_init(|| program_available(&self.program));
        if available {
            Ok(())
        } else {
            Err(PluginError::Environment(format!(
                "`{}` is not available",
                self.program.display()
            )))
        }
    }

    fn binary_extension(&self) -> &str {
        EXE_SUFFIX
    }

    fn generate_context_item(&self, request: &ContextRequest<'_>) -> PluginResult<Option<Box<dyn ContextItem>>> {
        // Coverage is only collected from unoptimized builds.
        if request.is_profile && !request.is_debug {
            return Ok(None);
        }

        Ok(Some(Box::new(RustcContext {
            item: request.item.to_path_buf(),
            output_path: request.output_path.to_path_buf(),
            is_debug: request.is_debug,
            is_profile: request.is_profile,
        })))
    }

    fn compile(&self, context: &dyn ContextItem, sink: &mut dyn Write) -> PluginResult<i32> {
        let context = downcast_context::<RustcContext>(context, NAME)?;
        let mut command = self.command(context);
        let run = run_captured(&mut command)?;

        writeln!(sink, "{:?}", command)?;
        sink.write_all(run.output.as_bytes())?;

        Ok(if run.success() { 0 } else { -1 })
    }

    fn remove_temporary_artifacts(&self, context: &dyn ContextItem) -> PluginResult<()> {
        let Some(dir) = context.output_path().parent() else {
            return Ok(());
        };
        if !dir.is_dir() {
            return Ok(());
        }

        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_profile = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| PROFILE_EXTENSIONS.contains(&ext));
            if is_profile {
                tracing::debug!(path = %path.display(), "removing profiling artifact");
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// `src/parser.rs` with `unit` becomes `src/tests/parser_unit.rs`.
    fn item_name_to_test_name(&self, source: &Path, test_type_name: &str) -> PathBuf {
        let stem = source.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let dir = source.parent().unwrap_or_else(|| Path::new(""));
        dir.join("tests").join(format!("{stem}_{test_type_name}.rs"))
    }
}
