//! Build scheduler
//!
//! All Debug build tasks are queued before any Release build task. Reusing one toolchain session for differently
//! configured invocations in an interleaved order has been seen to corrupt its state.
//!
//! The Debug and Release tasks of one item additionally share a per-item lock, so compiler-side state keyed by item
//! identity is never touched by both flavors at once.

use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use testrig_core::{Compiler, Flavor, StageOutcome};

use super::context::ItemState;
use crate::pool::{OutputStream, Task, WorkerPool, panic_message};

/// One mutex per test item, shared by that item's build tasks.
#[derive(Debug, Default)]
pub struct ItemLocks {
    locks: HashMap<PathBuf, Mutex<()>>,
}

impl ItemLocks {
    pub fn for_items(states: &[ItemState]) -> Self {
        Self {
            locks: states
                .iter()
                .map(|state| (state.item.path.clone(), Mutex::new(())))
                .collect(),
        }
    }

    pub fn lock(&self, item: &Path) -> Option<MutexGuard<'_, ()>> {
        self.locks
            .get(item)
            .map(|lock| lock.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

pub struct BuildScheduler<'a> {
    compiler: &'a dyn Compiler,
    pool: &'a WorkerPool,
    concurrency: usize,
}

impl<'a> BuildScheduler<'a> {
    pub fn new(compiler: &'a dyn Compiler, pool: &'a WorkerPool, concurrency: usize) -> Self {
        Self {
            compiler,
            pool,
            concurrency,
        }
    }

    /// Build every enabled (item, flavor) pair and record its compile stage.
    pub fn run(&self, states: &[ItemState], output: &OutputStream) -> i32 {
        let locks = ItemLocks::for_items(states);
        let compiler = self.compiler;
        let operation = compiler.role().operation();

        let mut tasks = Vec::new();
        for flavor in Flavor::ALL {
            for state in states.iter().filter(|s| s.slot(flavor).is_enabled()) {
                let locks = &locks;
                tasks.push(Task::new(
                    format!("{} ({})", state.item.output_base_name, flavor),
                    format!("{operation} {}", state.item.path.display()),
                    move |_, output| build_flavor(compiler, locks, state, flavor, output),
                ));
            }
        }

        tracing::info!(tasks = tasks.len(), concurrency = self.concurrency, "build phase");
        self.pool.execute(tasks, self.concurrency, output)
    }
}

fn build_flavor(
    compiler: &dyn Compiler,
    locks: &ItemLocks,
    state: &ItemState,
    flavor: Flavor,
    output: &OutputStream,
) -> i32 {
    let _item_guard = locks.lock(&state.item.path);

    let slot = state.slot(flavor);
    let Some(context) = slot.context.as_deref() else {
        return 0;
    };
    let operation = compiler.role().operation();

    let start = Instant::now();
    let mut captured = Vec::new();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| compiler.build(context, &mut captured)));
    let duration = start.elapsed();

    let mut log = String::from_utf8_lossy(&captured).into_owned();
    let result = match outcome {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            tracing::error!(item = %state.item.path.display(), %flavor, "{} failed: {}", operation, e);
            append_line(&mut log, &format!("{operation} failed: {e}"));
            -1
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(item = %state.item.path.display(), %flavor, "{} panicked: {}", operation, message);
            append_line(&mut log, &format!("{operation} panicked: {message}"));
            -1
        }
    };

    let mut stage = StageOutcome::new(result, duration);
    match fs::write(&slot.compile_log, &log) {
        Ok(()) => stage.log_path = Some(slot.compile_log.clone()),
        Err(e) => tracing::warn!("cannot write {}: {}", slot.compile_log.display(), e),
    }

    if result != 0 {
        output.write_str(&format!(
            "{} ({}) {} failed with {}:\n{}\n",
            state.item.path.display(),
            flavor,
            operation,
            result,
            log.trim_end()
        ));
    }

    tracing::debug!(item = %state.item.path.display(), %flavor, result, ?duration, "{} finished", operation);
    slot.results().compile = stage;
    result
}

fn append_line(log: &mut String, line: &str) {
    if !log.is_empty() && !log.ends_with('\n') {
        log.push('\n');
    }
    log.push_str(line);
    log.push('\n');
}
