//! Run pipeline
//!
//! ```text
//! Discovery → Output Naming → Context Builder → Build Scheduler → Execution Scheduler → cleanup
//! ```
//!
//! Every fatal check happens before the build phase starts. From then on failures only ever become stage results.

pub mod build;
pub mod context;
pub mod discovery;
pub mod execute;
pub mod naming;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use testrig_core::{CompleteResults, Flavor, Granularity};

use crate::config::RunConfig;
use crate::error::SetupError;
use crate::plugins::Plugins;
use crate::pool::{OutputStream, WorkerPool};

use build::BuildScheduler;
use context::{ContextBuilder, ItemState};
use discovery::{Discovery, DiscoveryReport};
use execute::ExecutionScheduler;

/// Results of a directory sweep.
#[derive(Debug)]
pub struct TreeRun {
    pub discovery: DiscoveryReport,
    pub results: Vec<CompleteResults>,
}

/// Drives one run with a fixed plugin set and configuration.
pub struct Orchestrator {
    plugins: Plugins,
    config: RunConfig,
    pool: WorkerPool,
    output: OutputStream,
}

impl Orchestrator {
    /// Orchestrator writing to stdout, with a pool sized by the configuration.
    pub fn new(plugins: Plugins, config: RunConfig) -> Self {
        let pool = WorkerPool::new(config.worker_count());
        Self {
            plugins,
            config,
            pool,
            output: OutputStream::stdout(),
        }
    }

    pub fn with_output(mut self, output: OutputStream) -> Self {
        self.output = output;
        self
    }

    pub fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn plugins(&self) -> &Plugins {
        &self.plugins
    }

    pub fn output(&self) -> &OutputStream {
        &self.output
    }

    /// Build and run a single test item.
    pub fn run_item(&self, path: &Path) -> Result<CompleteResults, SetupError> {
        self.check_setup()?;

        if !path.exists() {
            return Err(SetupError::MissingPath {
                path: path.to_path_buf(),
            });
        }

        let compiler = self.plugins.compiler.as_ref();
        let shape_matches = match compiler.granularity() {
            Granularity::File => path.is_file(),
            Granularity::Directory => path.is_dir(),
        };
        if !shape_matches || !compiler.is_supported(path) || !compiler.is_valid_test_item(path) {
            return Err(SetupError::UnsupportedItem {
                path: path.to_path_buf(),
                compiler: compiler.name().to_string(),
            });
        }

        let mut results = self.run_checked(vec![path.to_path_buf()])?;
        results.pop().ok_or_else(|| SetupError::UnsupportedItem {
            path: path.to_path_buf(),
            compiler: compiler.name().to_string(),
        })
    }

    /// Discover every test item below `root`, then build and run them all.
    pub fn run_tree(&self, root: &Path) -> Result<TreeRun, SetupError> {
        self.check_setup()?;
        let discovery = self.discover_checked(root)?;
        let results = self.run_checked(discovery.items.clone())?;
        Ok(TreeRun { discovery, results })
    }

    /// Walk `root` for test items without building anything.
    pub fn discover(&self, root: &Path) -> Result<DiscoveryReport, SetupError> {
        self.check_setup()?;
        self.discover_checked(root)
    }

    /// Build and run already discovered items.
    pub fn run_paths(&self, paths: Vec<PathBuf>) -> Result<Vec<CompleteResults>, SetupError> {
        self.check_setup()?;
        self.run_checked(paths)
    }

    /// Fatal checks shared by every entry point: configuration, plugin compatibility, plugin environments.
    fn check_setup(&self) -> Result<(), SetupError> {
        self.config.validate()?;
        self.plugins.check()
    }

    fn discover_checked(&self, root: &Path) -> Result<DiscoveryReport, SetupError> {
        if !root.is_dir() {
            return Err(SetupError::MissingPath {
                path: root.to_path_buf(),
            });
        }

        Ok(
            Discovery::new(self.plugins.compiler.as_ref(), self.config.test_subdir_marker.as_str())
                .with_generated_dir_name(self.config.generated_dir_name.as_str())
                .exclude(&self.config.output_dir)
                .discover(root),
        )
    }

    fn run_checked(&self, paths: Vec<PathBuf>) -> Result<Vec<CompleteResults>, SetupError> {
        let compiler = self.plugins.compiler.as_ref();
        let cwd = env::current_dir().map_err(SetupError::CurrentDir)?;
        let items = naming::assign_output_names(paths, &cwd);

        fs::create_dir_all(&self.config.output_dir).map_err(|source| SetupError::OutputDir {
            path: self.config.output_dir.clone(),
            source,
        })?;

        let states = ContextBuilder::new(compiler, &self.config).build(items)?;
        tracing::info!(items = states.len(), compiler = compiler.name(), "contexts ready");

        let build_concurrency = self.config.build_concurrency(compiler.granularity());
        BuildScheduler::new(compiler, &self.pool, build_concurrency).run(&states, &self.output);
        ExecutionScheduler::new(&self.plugins, &self.config, &self.pool).run(&states, &self.output);

        self.remove_temporary_artifacts(&states);

        Ok(states.into_iter().map(ItemState::into_complete_results).collect())
    }

    fn remove_temporary_artifacts(&self, states: &[ItemState]) {
        let compiler = self.plugins.compiler.as_ref();
        for state in states {
            for flavor in Flavor::ALL {
                let Some(context) = state.slot(flavor).context.as_deref() else {
                    continue;
                };
                if let Err(e) = compiler.remove_temporary_artifacts(context) {
                    tracing::warn!(
                        item = %state.item.path.display(),
                        %flavor,
                        "cannot remove temporary artifacts: {}",
                        e
                    );
                }
            }
        }
    }
}
