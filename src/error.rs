//! Fatal, pre-scheduling errors.
//!
//! Anything that goes wrong inside a build or execution task is recovered into a stage result and a log file.
//! Only contract violations detected before the first task is created abort a run; they are represented here.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use testrig_core::PluginError;

#[derive(Debug, Error, Diagnostic)]
pub enum SetupError {
    #[error("no {kind} named '{name}' is registered")]
    #[diagnostic(code(testrig::setup::unknown_plugin), help("registered {kind}s: {available}"))]
    UnknownPlugin {
        kind: &'static str,
        name: String,
        available: String,
    },

    #[error("{kind} '{plugin}' does not support compiler '{compiler}'")]
    #[diagnostic(code(testrig::setup::unsupported_compiler))]
    UnsupportedCompiler {
        kind: &'static str,
        plugin: String,
        compiler: String,
    },

    #[error("{plugin} cannot run in this environment")]
    #[diagnostic(code(testrig::setup::environment))]
    Environment {
        plugin: String,
        #[source]
        source: PluginError,
    },

    #[error("invalid run configuration: {0}")]
    #[diagnostic(code(testrig::setup::config))]
    InvalidConfig(String),

    #[error("'{}' does not exist", path.display())]
    #[diagnostic(code(testrig::setup::missing_path))]
    MissingPath { path: PathBuf },

    #[error("'{}' is not a test item for compiler '{compiler}'", path.display())]
    #[diagnostic(
        code(testrig::setup::unsupported_item),
        help("files need a supported extension; directory items need a supported project layout")
    )]
    UnsupportedItem { path: PathBuf, compiler: String },

    #[error("cannot prepare output directory '{}': {source}", path.display())]
    #[diagnostic(code(testrig::setup::output_dir))]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot determine the current directory: {0}")]
    #[diagnostic(code(testrig::setup::cwd))]
    CurrentDir(#[source] std::io::Error),
}
