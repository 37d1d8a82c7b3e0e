//! Run configuration
//!
//! One `RunConfig` describes a whole run. The effective concurrency and flavor helpers below are the only place the
//! coverage / debug-only / release-only interactions are decided.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::thread;

use testrig_core::{CompilerRole, Flavor, Granularity};

use crate::error::SetupError;

/// Configuration for a run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Root of all generated output (binaries, logs).
    pub output_dir: PathBuf,
    /// Directory name (file-granular compilers) or `.{marker}.` name fragment (directory-granular compilers)
    /// that marks test items.
    pub test_subdir_marker: String,
    /// Directory name skipped while walking a tree.
    pub generated_dir_name: String,
    /// Executions per successfully built flavor.
    pub iterations: usize,
    /// Worker pool width; `None` uses the number of logical CPUs.
    pub max_workers: Option<usize>,
    /// Run iterations concurrently (ignored when coverage is enabled).
    pub parallel_execution: bool,
    /// Keep running iterations after a parse failure.
    pub continue_iterations_on_error: bool,
    pub debug_only: bool,
    pub release_only: bool,
    pub code_coverage: bool,
    /// Ask the test parser for a command line that drops into a debugger on failure.
    pub debug_on_error: bool,
    /// Dump captured logs in reports.
    pub verbose: bool,
    /// Minimum total coverage accepted by the built-in validator.
    pub min_coverage_percentage: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("Generated").join("testrig"),
            test_subdir_marker: "tests".to_string(),
            generated_dir_name: "Generated".to_string(),
            iterations: 1,
            max_workers: None,
            parallel_execution: false,
            continue_iterations_on_error: false,
            debug_only: false,
            release_only: false,
            code_coverage: false,
            debug_on_error: false,
            verbose: false,
            min_coverage_percentage: 0.0,
        }
    }
}

impl RunConfig {
    /// Create a new config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_test_subdir_marker(mut self, marker: impl Into<String>) -> Self {
        self.test_subdir_marker = marker.into();
        self
    }

    pub fn with_generated_dir_name(mut self, name: impl Into<String>) -> Self {
        self.generated_dir_name = name.into();
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    pub fn with_parallel_execution(mut self, parallel: bool) -> Self {
        self.parallel_execution = parallel;
        self
    }

    pub fn with_continue_iterations_on_error(mut self, keep_going: bool) -> Self {
        self.continue_iterations_on_error = keep_going;
        self
    }

    pub fn with_debug_only(mut self, debug_only: bool) -> Self {
        self.debug_only = debug_only;
        self
    }

    pub fn with_release_only(mut self, release_only: bool) -> Self {
        self.release_only = release_only;
        self
    }

    pub fn with_code_coverage(mut self, coverage: bool) -> Self {
        self.code_coverage = coverage;
        self
    }

    pub fn with_debug_on_error(mut self, debug_on_error: bool) -> Self {
        self.debug_on_error = debug_on_error;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_min_coverage_percentage(mut self, percentage: f64) -> Self {
        self.min_coverage_percentage = percentage;
        self
    }

    /// Reject contradictory settings before any work starts.
    pub fn validate(&self) -> Result<(), SetupError> {
        if self.iterations == 0 {
            return Err(SetupError::InvalidConfig("iterations must be at least 1".to_string()));
        }
        if self.debug_only && self.release_only {
            return Err(SetupError::InvalidConfig(
                "debug-only and release-only are mutually exclusive".to_string(),
            ));
        }
        if self.release_only && self.code_coverage {
            return Err(SetupError::InvalidConfig(
                "code coverage is collected from Debug builds and cannot be combined with release-only".to_string(),
            ));
        }
        if self.max_workers == Some(0) {
            return Err(SetupError::InvalidConfig("max workers must be at least 1".to_string()));
        }
        if !(0.0..=100.0).contains(&self.min_coverage_percentage) {
            return Err(SetupError::InvalidConfig(format!(
                "minimum coverage percentage {} is outside 0..=100",
                self.min_coverage_percentage
            )));
        }
        Ok(())
    }

    /// Worker pool width.
    pub fn worker_count(&self) -> usize {
        self.max_workers.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }

    /// Concurrency of the build phase.
    ///
    /// Directory-granular compilers share project state and always build one item at a time.
    pub fn build_concurrency(&self, granularity: Granularity) -> usize {
        if self.code_coverage || granularity == Granularity::Directory {
            1
        } else {
            self.worker_count()
        }
    }

    /// Concurrency of the execution phase.
    pub fn execution_concurrency(&self) -> usize {
        if self.parallel_execution && !self.code_coverage {
            self.worker_count()
        } else {
            1
        }
    }

    pub fn builds_debug(&self) -> bool {
        !self.release_only
    }

    /// Release builds need real binaries and are skipped entirely when collecting coverage.
    pub fn builds_release(&self, role: CompilerRole) -> bool {
        role == CompilerRole::Compiler && !self.debug_only && !self.code_coverage
    }

    pub fn builds_flavor(&self, flavor: Flavor, role: CompilerRole) -> bool {
        match flavor {
            Flavor::Debug => self.builds_debug(),
            Flavor::Release => self.builds_release(role),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert_eq!(config.iterations, 1);
        assert_eq!(config.test_subdir_marker, "tests");
        assert!(!config.parallel_execution);
        assert!(!config.continue_iterations_on_error);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_iterations() {
        let config = RunConfig::new().with_iterations(0);
        assert!(matches!(config.validate(), Err(SetupError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_debug_and_release_only() {
        let config = RunConfig::new().with_debug_only(true).with_release_only(true);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_release_only_with_coverage() {
        let config = RunConfig::new().with_release_only(true).with_code_coverage(true);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_minimum() {
        let config = RunConfig::new().with_min_coverage_percentage(120.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_coverage_forces_serial_phases() {
        let config = RunConfig::new()
            .with_max_workers(8)
            .with_parallel_execution(true)
            .with_code_coverage(true);
        assert_eq!(config.build_concurrency(Granularity::File), 1);
        assert_eq!(config.execution_concurrency(), 1);
    }

    #[test]
    fn test_directory_granularity_builds_serially() {
        let config = RunConfig::new().with_max_workers(8);
        assert_eq!(config.build_concurrency(Granularity::File), 8);
        assert_eq!(config.build_concurrency(Granularity::Directory), 1);
    }

    #[test]
    fn test_parallel_execution_is_opt_in() {
        let config = RunConfig::new().with_max_workers(4);
        assert_eq!(config.execution_concurrency(), 1);
        assert_eq!(config.with_parallel_execution(true).execution_concurrency(), 4);
    }

    #[test]
    fn test_flavor_selection() {
        let config = RunConfig::new();
        assert!(config.builds_flavor(Flavor::Debug, CompilerRole::Compiler));
        assert!(config.builds_flavor(Flavor::Release, CompilerRole::Compiler));
        assert!(!config.builds_flavor(Flavor::Release, CompilerRole::Generator));
        assert!(!config.builds_flavor(Flavor::Release, CompilerRole::Verifier));

        let debug_only = RunConfig::new().with_debug_only(true);
        assert!(!debug_only.builds_flavor(Flavor::Release, CompilerRole::Compiler));

        let release_only = RunConfig::new().with_release_only(true);
        assert!(!release_only.builds_flavor(Flavor::Debug, CompilerRole::Compiler));
        assert!(release_only.builds_flavor(Flavor::Release, CompilerRole::Compiler));

        let coverage = RunConfig::new().with_code_coverage(true);
        assert!(coverage.builds_flavor(Flavor::Debug, CompilerRole::Compiler));
        assert!(!coverage.builds_flavor(Flavor::Release, CompilerRole::Compiler));
    }
}
