//! CLI module for testrig
//!
//! ## Commands
//!
//! - `run <ITEM>` - Build and run a single test item
//! - `sweep [ROOT]` - Discover every test item below a directory and run them all
//!
//! `--list-plugins` prints the registered plugins of every kind.
//!
//! ## Design
//!
//! The CLI uses clap for argument parsing with derive macros.
//! Command functions return `CliResult<T>` instead of calling `process::exit`.
//! Only the top-level `run()` function handles errors and exits.

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::fmt;
use std::path::{Path, PathBuf};
use std::process;
use std::slice;

use clap::{Args, Parser, Subcommand};

use crate::config::RunConfig;
use crate::error::SetupError;
use crate::pipeline::Orchestrator;
use crate::plugins::{PluginRegistry, PluginSelection, Plugins};
use crate::reporter::{ConsoleReporter, Reporter, RunSummary, run_exit_code};

// ============================================================================
// CLI Error handling
// ============================================================================

/// Exit code for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// Error type for CLI operations.
///
/// Contains a user-facing message and an exit code. The CLI entry point
/// catches these errors, prints the message, and exits with the code.
#[derive(Debug)]
pub struct CliError {
    /// User-facing error message (already formatted for display)
    pub message: String,
    /// Exit code to return to the shell
    pub exit_code: ExitCode,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    /// Create a failure error (exit code 1).
    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<SetupError> for CliError {
    /// Setup errors are rendered as miette diagnostics.
    fn from(error: SetupError) -> Self {
        CliError::failure(format!("{:?}", miette::Report::new(error)))
    }
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Clap CLI definition
// ============================================================================

/// Build-and-test orchestration for Debug/Release test items
#[derive(Parser, Debug)]
#[command(name = "testrig")]
#[command(version = VERSION)]
#[command(about = "Build, run and check test items in Debug and Release flavors", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Print registered plugins and exit
    #[arg(long)]
    pub list_plugins: bool,

    /// Verbose output (dump logs, report skipped items, debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build and run a single test item
    Run {
        /// Test item (a file or directory, depending on the compiler)
        #[arg(value_name = "ITEM")]
        item: PathBuf,
        #[command(flatten)]
        options: RunOptions,
    },

    /// Discover and run every test item below a directory
    Sweep {
        /// Directory to search
        #[arg(value_name = "ROOT", default_value = ".")]
        root: PathBuf,
        #[command(flatten)]
        options: RunOptions,
    },
}

/// Options shared by `run` and `sweep`.
#[derive(Args, Debug, Clone)]
pub struct RunOptions {
    /// Root of generated binaries and logs
    #[arg(long, value_name = "DIR", default_value = "Generated/testrig")]
    pub output_dir: PathBuf,

    /// Test directory name (or `.NAME.` directory fragment for directory compilers)
    #[arg(long, value_name = "NAME", default_value = "tests")]
    pub marker: String,

    /// Executions per built flavor
    #[arg(short = 'n', long, default_value_t = 1)]
    pub iterations: usize,

    /// Worker threads (default: logical CPUs)
    #[arg(short = 'j', long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Run iterations concurrently (ignored with --coverage)
    #[arg(long)]
    pub parallel: bool,

    /// Keep running iterations after a failed parse
    #[arg(long)]
    pub keep_going: bool,

    /// Only build the Debug flavor
    #[arg(long, conflicts_with = "release_only")]
    pub debug_only: bool,

    /// Only build the Release flavor
    #[arg(long)]
    pub release_only: bool,

    /// Collect and validate code coverage
    #[arg(long, conflicts_with = "release_only")]
    pub coverage: bool,

    /// Minimum accepted total line coverage, in percent
    #[arg(long, value_name = "PERCENT", default_value_t = 0.0)]
    pub min_coverage: f64,

    /// Run tests under a debugger that prints a backtrace on failure
    #[arg(long)]
    pub debug_on_error: bool,

    /// Compiler plugin
    #[arg(long, value_name = "NAME")]
    pub compiler: Option<String>,

    /// Test parser plugin
    #[arg(long, value_name = "NAME")]
    pub parser: Option<String>,

    /// Coverage extractor plugin (default depends on --coverage)
    #[arg(long, value_name = "NAME")]
    pub extractor: Option<String>,

    /// Coverage validator plugin
    #[arg(long, value_name = "NAME")]
    pub validator: Option<String>,
}

impl RunOptions {
    pub fn to_config(&self, verbose: bool) -> RunConfig {
        let mut config = RunConfig::new()
            .with_output_dir(&self.output_dir)
            .with_test_subdir_marker(&self.marker)
            .with_iterations(self.iterations)
            .with_parallel_execution(self.parallel)
            .with_continue_iterations_on_error(self.keep_going)
            .with_debug_only(self.debug_only)
            .with_release_only(self.release_only)
            .with_code_coverage(self.coverage)
            .with_min_coverage_percentage(self.min_coverage)
            .with_debug_on_error(self.debug_on_error)
            .with_verbose(verbose);
        if let Some(jobs) = self.jobs {
            config = config.with_max_workers(jobs);
        }
        config
    }

    pub fn selection(&self, config: &RunConfig) -> PluginSelection {
        let mut selection = PluginSelection::for_config(config);
        if let Some(name) = &self.compiler {
            selection.compiler = name.clone();
        }
        if let Some(name) = &self.parser {
            selection.parser = name.clone();
        }
        if let Some(name) = &self.extractor {
            selection.extractor = name.clone();
        }
        if let Some(name) = &self.validator {
            selection.validator = name.clone();
        }
        selection
    }
}

// ============================================================================
// CLI entry point
// ============================================================================

/// Main CLI entry point.
///
/// This is the only place where `process::exit` is called. All command
/// implementations return `CliResult` and errors are handled here.
pub fn run() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match execute(cli) {
        Ok(exit_code) => {
            if exit_code.0 != 0 {
                process::exit(exit_code.0);
            }
        }
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            process::exit(e.exit_code.0);
        }
    }
}

/// Default `tracing` filter when `RUST_LOG` is unset.
fn default_log_filter(verbose: bool) -> &'static str {
    if verbose { "debug" } else { "warn" }
}

/// Structured logging to stderr; `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_log_filter(verbose)));
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .try_init();
}

/// Execute the CLI command and return result.
fn execute(cli: Cli) -> CliResult<ExitCode> {
    if cli.list_plugins {
        print!("{}", list_plugins(&PluginRegistry::with_builtins(&RunConfig::default())));
        return Ok(ExitCode::SUCCESS);
    }

    match cli.command {
        Some(Command::Run { item, options }) => run_item(&item, &options, cli.verbose),
        Some(Command::Sweep { root, options }) => sweep(&root, &options, cli.verbose),
        None => Err(CliError::failure("Error: no command given (see `testrig --help`)")),
    }
}

fn setup(options: &RunOptions, verbose: bool) -> CliResult<Orchestrator> {
    let config = options.to_config(verbose);
    let registry = PluginRegistry::with_builtins(&config);
    let plugins: Plugins = registry.select(&options.selection(&config), &config)?;
    Ok(Orchestrator::new(plugins, config))
}

fn run_item(item: &Path, options: &RunOptions, verbose: bool) -> CliResult<ExitCode> {
    let orchestrator = setup(options, verbose)?;
    let results = orchestrator.run_item(item)?;

    let mut reporter = ConsoleReporter::new(orchestrator.output().clone(), verbose);
    reporter.on_item_complete(&results);

    Ok(ExitCode(run_exit_code(slice::from_ref(&results))))
}

fn sweep(root: &Path, options: &RunOptions, verbose: bool) -> CliResult<ExitCode> {
    let orchestrator = setup(options, verbose)?;
    let mut reporter = ConsoleReporter::new(orchestrator.output().clone(), verbose);

    let discovery = orchestrator.discover(root)?;
    reporter.on_discovery_complete(&discovery);

    let results = orchestrator.run_paths(discovery.items)?;
    for complete in &results {
        reporter.on_item_complete(complete);
    }
    reporter.on_run_complete(&RunSummary::from_results(&results));

    Ok(ExitCode(run_exit_code(&results)))
}

/// One line per plugin kind.
pub fn list_plugins(registry: &PluginRegistry) -> String {
    [
        ("compilers", registry.compiler_names()),
        ("test parsers", registry.parser_names()),
        ("coverage extractors", registry.extractor_names()),
        ("coverage validators", registry.validator_names()),
    ]
    .into_iter()
    .map(|(kind, names)| format!("{kind}: {}\n", names.join(", ")))
    .collect()
}

// ============================================================================
// Tests
// ============================================================================
