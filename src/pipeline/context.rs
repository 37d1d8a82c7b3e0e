//! Context builder and per-item run state.
//!
//! Contexts are created here, on the scheduling thread, before any worker task exists. Some compiler back-ends keep
//! thread-affine state per context, so this must never move into a pool task.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use testrig_core::{
    CompleteResults, Compiler, CompilerRole, ContextItem, ContextRequest, Flavor, Results, StageKind, StageOutcome,
    TestItem,
};

use crate::config::RunConfig;
use crate::error::SetupError;

/// Everything the schedulers need for one (item, flavor) pair.
#[derive(Debug)]
pub struct FlavorSlot {
    pub flavor: Flavor,
    /// `None` when the flavor is not built (not applicable, disabled by the compiler, or context creation failed).
    pub context: Option<Box<dyn ContextItem>>,
    /// `<output_dir>/<output_base_name>/<Flavor>`
    pub dir: PathBuf,
    pub compile_log: PathBuf,
    results: Mutex<Results>,
}

impl FlavorSlot {
    fn new(flavor: Flavor, dir: PathBuf, compile_log: PathBuf) -> Self {
        Self {
            flavor,
            context: None,
            dir,
            compile_log,
            results: Mutex::new(Results::default()),
        }
    }

    /// Lock this pair's results record.
    pub fn results(&self) -> MutexGuard<'_, Results> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_enabled(&self) -> bool {
        self.context.is_some()
    }

    /// Log path for one stage of one iteration. Unique per (item, flavor, stage, iteration).
    pub fn iteration_log(&self, item: &TestItem, stage: StageKind, iteration: usize) -> PathBuf {
        self.dir.join(format!(
            "{}.{}.{}.{}.log",
            item.output_base_name,
            self.flavor.as_str(),
            stage.as_str(),
            iteration
        ))
    }

    fn into_results(self) -> Results {
        self.results.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared run state for one test item.
#[derive(Debug)]
pub struct ItemState {
    pub item: TestItem,
    pub debug: FlavorSlot,
    pub release: FlavorSlot,
}

impl ItemState {
    pub fn slot(&self, flavor: Flavor) -> &FlavorSlot {
        match flavor {
            Flavor::Debug => &self.debug,
            Flavor::Release => &self.release,
        }
    }

    fn slot_mut(&mut self, flavor: Flavor) -> &mut FlavorSlot {
        match flavor {
            Flavor::Debug => &mut self.debug,
            Flavor::Release => &mut self.release,
        }
    }

    pub fn into_complete_results(self) -> CompleteResults {
        CompleteResults {
            item: self.item,
            debug: self.debug.into_results(),
            release: self.release.into_results(),
        }
    }
}

/// Asks the compiler for one context per applicable flavor of every item.
pub struct ContextBuilder<'a> {
    compiler: &'a dyn Compiler,
    config: &'a RunConfig,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(compiler: &'a dyn Compiler, config: &'a RunConfig) -> Self {
        Self { compiler, config }
    }

    pub fn build(&self, items: Vec<TestItem>) -> Result<Vec<ItemState>, SetupError> {
        items.into_iter().map(|item| self.build_item(item)).collect()
    }

    fn build_item(&self, item: TestItem) -> Result<ItemState, SetupError> {
        let item_dir = self.config.output_dir.join(&item.output_base_name);
        let mut state = ItemState {
            debug: self.empty_slot(&item, &item_dir, Flavor::Debug),
            release: self.empty_slot(&item, &item_dir, Flavor::Release),
            item,
        };

        let role = self.compiler.role();
        for flavor in Flavor::ALL {
            if !self.config.builds_flavor(flavor, role) {
                tracing::debug!(item = %state.item.path.display(), %flavor, "flavor not applicable");
                continue;
            }
            let item_path = state.item.path.clone();
            let base_name = state.item.output_base_name.clone();
            self.populate(&item_path, &base_name, state.slot_mut(flavor))?;
        }

        Ok(state)
    }

    fn empty_slot(&self, item: &TestItem, item_dir: &Path, flavor: Flavor) -> FlavorSlot {
        let dir = item_dir.join(flavor.as_str());
        let compile_log = dir.join(format!(
            "{}.{}.{}.log",
            item.output_base_name,
            flavor.as_str(),
            StageKind::Compile.as_str()
        ));
        FlavorSlot::new(flavor, dir, compile_log)
    }

    fn populate(&self, item_path: &Path, base_name: &str, slot: &mut FlavorSlot) -> Result<(), SetupError> {
        fs::create_dir_all(&slot.dir).map_err(|source| SetupError::OutputDir {
            path: slot.dir.clone(),
            source,
        })?;

        let output_path = match self.compiler.role() {
            CompilerRole::Verifier => item_path.to_path_buf(),
            CompilerRole::Compiler | CompilerRole::Generator => {
                slot.dir.join(format!("{}{}", base_name, self.compiler.binary_extension()))
            }
        };

        let request = ContextRequest {
            item: item_path,
            is_debug: slot.flavor.is_debug(),
            is_profile: self.config.code_coverage,
            output_path: &output_path,
            force: true,
        };

        match self.compiler.generate_context_item(&request) {
            Ok(Some(context)) => {
                slot.context = Some(context);
            }
            Ok(None) => {
                tracing::info!(
                    item = %item_path.display(),
                    flavor = %slot.flavor,
                    "{} disabled this flavor for the current environment",
                    self.compiler.name()
                );
            }
            Err(e) => {
                tracing::error!(item = %item_path.display(), flavor = %slot.flavor, "context creation failed: {}", e);
                let mut outcome = StageOutcome {
                    result: Some(-1),
                    ..StageOutcome::default()
                };
                match fs::write(&slot.compile_log, format!("context creation failed: {e}\n")) {
                    Ok(()) => outcome.log_path = Some(slot.compile_log.clone()),
                    Err(io) => tracing::warn!("cannot write {}: {}", slot.compile_log.display(), io),
                }
                slot.results().compile = outcome;
            }
        }

        Ok(())
    }
}
