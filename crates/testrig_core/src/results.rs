//! Results model: per-stage outcomes, per-flavor results, and per-item composites.
//!
//! ## Result codes
//!
//! | Value      | Meaning                       |
//! |------------|-------------------------------|
//! | `None`     | stage never ran ("N/A")       |
//! | `Some(0)`  | success                       |
//! | `Some(<0)` | failure                       |
//! | `Some(>0)` | unknown (treated as failure)  |
//!
//! Composite precedence is fixed: compile, test, parse, coverage, coverage validation. The first non-zero stage
//! wins; a flavor where nothing ran has no composite at all.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Build configuration of a test item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flavor {
    Debug,
    Release,
}

impl Flavor {
    /// Both flavors, in scheduling order.
    pub const ALL: [Flavor; 2] = [Flavor::Debug, Flavor::Release];

    pub fn as_str(self) -> &'static str {
        match self {
            Flavor::Debug => "Debug",
            Flavor::Release => "Release",
        }
    }

    pub fn is_debug(self) -> bool {
        matches!(self, Flavor::Debug)
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Compile,
    Test,
    Parse,
    Coverage,
    CoverageValidation,
}

impl StageKind {
    /// All stages in composite precedence order.
    pub const PRECEDENCE: [StageKind; 5] = [
        StageKind::Compile,
        StageKind::Test,
        StageKind::Parse,
        StageKind::Coverage,
        StageKind::CoverageValidation,
    ];

    /// Short identifier used in log file names.
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Compile => "compile",
            StageKind::Test => "test",
            StageKind::Parse => "parse",
            StageKind::Coverage => "coverage",
            StageKind::CoverageValidation => "coverage_validation",
        }
    }

    /// Human-readable label used by reporters.
    pub fn label(self) -> &'static str {
        match self {
            StageKind::Compile => "Compile",
            StageKind::Test => "Test",
            StageKind::Parse => "Parse",
            StageKind::Coverage => "Coverage",
            StageKind::CoverageValidation => "Coverage Validation",
        }
    }
}

/// Display classification of a stage or composite result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    NotRun,
    Succeeded,
    Failed,
    Unknown,
}

impl StageStatus {
    pub fn from_result(result: Option<i32>) -> Self {
        match result {
            None => StageStatus::NotRun,
            Some(0) => StageStatus::Succeeded,
            Some(code) if code < 0 => StageStatus::Failed,
            Some(_) => StageStatus::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::NotRun => "N/A",
            StageStatus::Succeeded => "Succeeded",
            StageStatus::Failed => "Failed",
            StageStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutcome {
    /// `None` strictly means "not executed".
    pub result: Option<i32>,
    pub log_path: Option<PathBuf>,
    pub duration: Option<Duration>,
}

impl StageOutcome {
    pub fn new(result: i32, duration: Duration) -> Self {
        Self {
            result: Some(result),
            log_path: None,
            duration: Some(duration),
        }
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn has_run(&self) -> bool {
        self.result.is_some()
    }

    /// True when the stage ran and did not succeed.
    pub fn is_failure(&self) -> bool {
        matches!(self.result, Some(code) if code != 0)
    }

    pub fn status(&self) -> StageStatus {
        StageStatus::from_result(self.result)
    }
}

/// Stage outcomes for one flavor of one test item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Results {
    pub compile: StageOutcome,
    pub test: StageOutcome,
    /// Raw output of the most recent test execution.
    pub test_output: Option<String>,
    pub parse: StageOutcome,
    pub coverage: StageOutcome,
    pub coverage_output: Option<String>,
    /// Opaque coverage payload produced by the extractor.
    pub coverage_data: Option<String>,
    pub coverage_total_percentage: Option<f64>,
    /// Per-sub-target coverage (for example per source file).
    pub coverage_percentages: BTreeMap<String, f64>,
    pub coverage_validation: StageOutcome,
    /// Minimum percentage the validator compared against, when it reported one.
    pub coverage_min_percentage: Option<f64>,
}

impl Results {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self, kind: StageKind) -> &StageOutcome {
        match kind {
            StageKind::Compile => &self.compile,
            StageKind::Test => &self.test,
            StageKind::Parse => &self.parse,
            StageKind::Coverage => &self.coverage,
            StageKind::CoverageValidation => &self.coverage_validation,
        }
    }

    /// Stages paired with their outcome, in precedence order.
    pub fn stages(&self) -> impl Iterator<Item = (StageKind, &StageOutcome)> {
        StageKind::PRECEDENCE.into_iter().map(move |kind| (kind, self.stage(kind)))
    }

    /// Composite result of this flavor.
    ///
    /// ## Returns
    /// - `Some(code)` for the first non-zero stage in precedence order,
    /// - `Some(0)` when every stage that ran succeeded,
    /// - `None` when no stage ran.
    pub fn composite_result(&self) -> Option<i32> {
        let mut any_ran = false;
        for (_, outcome) in self.stages() {
            match outcome.result {
                Some(0) => any_ran = true,
                Some(code) => return Some(code),
                None => {}
            }
        }
        any_ran.then_some(0)
    }

    pub fn composite_status(&self) -> StageStatus {
        StageStatus::from_result(self.composite_result())
    }

    /// Record a parse outcome unless a failure is already stored.
    ///
    /// Returns `true` when the outcome was stored.
    pub fn record_parse(&mut self, outcome: StageOutcome) -> bool {
        if self.parse.is_failure() {
            return false;
        }
        self.parse = outcome;
        true
    }

    /// Sum of the durations of every stage that recorded one.
    pub fn total_duration(&self) -> Option<Duration> {
        self.stages()
            .filter_map(|(_, outcome)| outcome.duration)
            .reduce(|acc, d| acc + d)
    }
}

/// A discovered test item and its derived output name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestItem {
    pub path: PathBuf,
    /// Unique, filesystem-safe, length-capped name used for the item's output directory.
    pub output_base_name: String,
}

impl TestItem {
    pub fn new(path: impl Into<PathBuf>, output_base_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            output_base_name: output_base_name.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Everything recorded for one test item across both flavors.
#[derive(Debug, Clone, PartialEq)]
pub struct CompleteResults {
    pub item: TestItem,
    pub debug: Results,
    pub release: Results,
}

impl CompleteResults {
    pub fn new(item: TestItem) -> Self {
        Self {
            item,
            debug: Results::default(),
            release: Results::default(),
        }
    }

    pub fn flavor(&self, flavor: Flavor) -> &Results {
        match flavor {
            Flavor::Debug => &self.debug,
            Flavor::Release => &self.release,
        }
    }

    pub fn flavor_mut(&mut self, flavor: Flavor) -> &mut Results {
        match flavor {
            Flavor::Debug => &mut self.debug,
            Flavor::Release => &mut self.release,
        }
    }

    /// Composite result of the item: the first failing flavor wins, `None` when neither flavor ran.
    pub fn composite_result(&self) -> Option<i32> {
        let debug = self.debug.composite_result();
        let release = self.release.composite_result();

        for code in [debug, release].into_iter().flatten() {
            if code != 0 {
                return Some(code);
            }
        }

        if debug.is_none() && release.is_none() {
            None
        } else {
            Some(0)
        }
    }

    pub fn composite_status(&self) -> StageStatus {
        StageStatus::from_result(self.composite_result())
    }
}

/// Values produced by a coverage extractor's `execute` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecuteOutcome {
    pub test_result: i32,
    pub test_duration: Duration,
    pub test_output: String,
    /// `None` when the extractor did not attempt coverage extraction.
    pub coverage_result: Option<i32>,
    pub coverage_duration: Option<Duration>,
    pub coverage_output: Option<String>,
    pub coverage_data: Option<String>,
    pub coverage_total_percentage: Option<f64>,
    pub coverage_percentages: BTreeMap<String, f64>,
}

impl ExecuteOutcome {
    /// Outcome of a plain execution without coverage extraction.
    pub fn test_only(result: i32, duration: Duration, output: impl Into<String>) -> Self {
        Self {
            test_result: result,
            test_duration: duration,
            test_output: output.into(),
            ..Self::default()
        }
    }
}
