//! Execution scheduler
//!
//! Every successfully built (item, flavor) pair gets `iterations` tasks. One iteration runs the test through the
//! coverage extractor, validates coverage when some was produced, and parses the raw output.
//!
//! Iterations of one pair may run concurrently (opt-in, never with coverage). Each iteration does its work without
//! holding the pair's results lock and records everything in a single locked section at the end. The parse
//! stage keeps the first failure it sees: a later successful iteration never overwrites it.

use std::collections::BTreeMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use testrig_core::{ContextItem, Flavor, PluginResult, StageKind, StageOutcome};

use super::context::{FlavorSlot, ItemState};
use crate::config::RunConfig;
use crate::plugins::Plugins;
use crate::pool::{OutputStream, Task, WorkerPool, panic_message};

pub struct ExecutionScheduler<'a> {
    plugins: &'a Plugins,
    config: &'a RunConfig,
    pool: &'a WorkerPool,
}

impl<'a> ExecutionScheduler<'a> {
    pub fn new(plugins: &'a Plugins, config: &'a RunConfig, pool: &'a WorkerPool) -> Self {
        Self { plugins, config, pool }
    }

    pub fn run(&self, states: &[ItemState], output: &OutputStream) -> i32 {
        let mut tasks = Vec::new();

        for state in states {
            for flavor in Flavor::ALL {
                let slot = state.slot(flavor);
                if !slot.is_enabled() || slot.results().compile.result != Some(0) {
                    continue;
                }
                for iteration in 1..=self.config.iterations {
                    let runner = IterationRunner {
                        plugins: self.plugins,
                        config: self.config,
                        state,
                        flavor,
                        iteration,
                    };
                    tasks.push(Task::new(
                        format!("{} ({}) #{}", state.item.output_base_name, flavor, iteration),
                        format!("run {}", state.item.path.display()),
                        move |_, output| runner.run(output),
                    ));
                }
            }
        }

        let concurrency = self.config.execution_concurrency();
        tracing::info!(tasks = tasks.len(), concurrency, "execution phase");
        self.pool.execute(tasks, concurrency, output)
    }
}

/// Coverage values produced by one iteration.
struct CoverageRecord {
    outcome: StageOutcome,
    output: Option<String>,
    data: Option<String>,
    total_percentage: Option<f64>,
    percentages: BTreeMap<String, f64>,
}

/// Everything one iteration records, gathered before taking the results lock.
struct IterationRecord {
    test: StageOutcome,
    test_output: String,
    coverage: Option<CoverageRecord>,
    validation: Option<(StageOutcome, Option<f64>)>,
    parse: StageOutcome,
}

impl IterationRecord {
    fn status(&self) -> i32 {
        [
            self.test.result,
            self.parse.result,
            self.coverage.as_ref().and_then(|c| c.outcome.result),
            self.validation.as_ref().and_then(|(v, _)| v.result),
        ]
        .into_iter()
        .flatten()
        .find(|code| *code != 0)
        .unwrap_or(0)
    }
}

#[derive(Clone, Copy)]
struct IterationRunner<'a> {
    plugins: &'a Plugins,
    config: &'a RunConfig,
    state: &'a ItemState,
    flavor: Flavor,
    iteration: usize,
}

impl IterationRunner<'_> {
    fn slot(&self) -> &FlavorSlot {
        self.state.slot(self.flavor)
    }

    fn log_path(&self, stage: StageKind) -> PathBuf {
        self.slot().iteration_log(&self.state.item, stage, self.iteration)
    }

    fn run(self, output: &OutputStream) -> i32 {
        let slot = self.slot();
        let Some(context) = slot.context.as_deref() else {
            return 0;
        };

        if !self.config.continue_iterations_on_error && slot.results().parse.is_failure() {
            tracing::debug!(
                item = %self.state.item.path.display(),
                flavor = %self.flavor,
                iteration = self.iteration,
                "skipping iteration after earlier parse failure"
            );
            return 0;
        }

        let start = Instant::now();
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| self.execute(context, output)));
        let error = match attempt {
            Ok(Ok(record)) => return self.record(record),
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };

        self.record_exception(&error, start.elapsed(), output);
        -1
    }

    fn execute(&self, context: &dyn ContextItem, output: &OutputStream) -> PluginResult<IterationRecord> {
        let Plugins {
            compiler,
            parser,
            extractor,
            validator,
        } = self.plugins;
        let item = &self.state.item;

        let command_line = parser.create_invoke_command_line(context, self.config.debug_on_error)?;
        tracing::debug!(item = %item.path.display(), flavor = %self.flavor, "invoking `{}`", command_line);

        let executed = extractor.execute(compiler.as_ref(), context, &command_line)?;

        let test_log = self.log_path(StageKind::Test);
        let test = self.stage_with_log(
            StageOutcome::new(executed.test_result, executed.test_duration),
            &test_log,
            &executed.test_output,
        );

        let coverage = executed.coverage_result.map(|result| {
            let mut outcome = StageOutcome::new(result, executed.coverage_duration.unwrap_or_default());
            if let Some(text) = &executed.coverage_output {
                outcome = self.stage_with_log(outcome, &self.log_path(StageKind::Coverage), text);
            }
            CoverageRecord {
                outcome,
                output: executed.coverage_output.clone(),
                data: executed.coverage_data.clone(),
                total_percentage: executed.coverage_total_percentage,
                percentages: executed.coverage_percentages.clone(),
            }
        });

        let validation = coverage.as_ref().map(|record| {
            let start = Instant::now();
            let (result, minimum) = validator.validate(&item.path, record.total_percentage.unwrap_or(0.0));
            (StageOutcome::new(result, start.elapsed()), minimum)
        });

        let start = Instant::now();
        let parse_result = parser.parse(&executed.test_output);
        let mut parse = StageOutcome::new(parse_result, start.elapsed());
        parse.log_path = test.log_path.clone();

        if parse_result != 0 {
            output.write_str(&format!(
                "{} ({}) iteration {} failed with {}:\n{}\n",
                item.path.display(),
                self.flavor,
                self.iteration,
                parse_result,
                executed.test_output.trim_end()
            ));
        }

        Ok(IterationRecord {
            test,
            test_output: executed.test_output,
            coverage,
            validation,
            parse,
        })
    }

    fn record(&self, record: IterationRecord) -> i32 {
        let status = record.status();
        let mut results = self.slot().results();

        results.test = record.test;
        results.test_output = Some(record.test_output);

        if let Some(coverage) = record.coverage {
            results.coverage = coverage.outcome;
            results.coverage_output = coverage.output;
            results.coverage_data = coverage.data;
            results.coverage_total_percentage = coverage.total_percentage;
            results.coverage_percentages = coverage.percentages;
        }

        if let Some((validation, minimum)) = record.validation {
            results.coverage_validation = validation;
            results.coverage_min_percentage = minimum;
        }

        if !results.record_parse(record.parse) {
            tracing::debug!(
                item = %self.state.item.path.display(),
                flavor = %self.flavor,
                iteration = self.iteration,
                "keeping earlier parse failure"
            );
        }

        status
    }

    fn record_exception(&self, error: &str, duration: Duration, output: &OutputStream) {
        let item = &self.state.item;
        tracing::error!(
            item = %item.path.display(),
            flavor = %self.flavor,
            iteration = self.iteration,
            "iteration failed: {}",
            error
        );
        output.write_line(&format!(
            "{} ({}) iteration {} raised an error: {}",
            item.path.display(),
            self.flavor,
            self.iteration,
            error
        ));

        let outcome = self.stage_with_log(
            StageOutcome::new(-1, duration),
            &self.log_path(StageKind::Test),
            &format!("{error}\n"),
        );
        self.slot().results().test = outcome;
    }

    fn stage_with_log(&self, mut outcome: StageOutcome, path: &Path, text: &str) -> StageOutcome {
        match fs::write(path, text) {
            Ok(()) => outcome.log_path = Some(path.to_path_buf()),
            Err(e) => tracing::warn!("cannot write {}: {}", path.display(), e),
        }
        outcome
    }
}
