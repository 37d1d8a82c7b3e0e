//! Result reporting
//!
//! Reporters see results only after both phases have drained, so rendering is deterministic regardless of how
//! tasks were scheduled.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use testrig_core::{CompleteResults, Flavor, Results, StageKind, StageOutcome, StageStatus};

use crate::pipeline::discovery::DiscoveryReport;
use crate::pool::OutputStream;

/// Receives run events. Implementations decide how (and whether) to render them.
pub trait Reporter {
    /// Called once after a tree walk, before anything is built.
    fn on_discovery_complete(&mut self, _report: &DiscoveryReport) {}

    fn on_item_complete(&mut self, results: &CompleteResults);

    /// Called once after a directory sweep.
    fn on_run_complete(&mut self, summary: &RunSummary);
}

/// One executed (item, flavor) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryEntry {
    pub item: PathBuf,
    pub flavor: Flavor,
    pub result: i32,
    pub duration: Duration,
}

impl SummaryEntry {
    pub fn passed(&self) -> bool {
        self.result == 0
    }
}

/// Per-(item, flavor) pass/fail lines of a sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub entries: Vec<SummaryEntry>,
}

impl RunSummary {
    /// Collect every flavor that produced a composite result. Flavors where nothing ran are left out.
    pub fn from_results(results: &[CompleteResults]) -> Self {
        let entries = results
            .iter()
            .flat_map(|complete| {
                Flavor::ALL.into_iter().filter_map(move |flavor| {
                    let flavor_results = complete.flavor(flavor);
                    flavor_results.composite_result().map(|result| SummaryEntry {
                        item: complete.item.path.clone(),
                        flavor,
                        result,
                        duration: flavor_results.total_duration().unwrap_or_default(),
                    })
                })
            })
            .collect();
        Self { entries }
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn passed(&self) -> usize {
        self.entries.iter().filter(|e| e.passed()).count()
    }

    /// `passed / total × 100`; `None` when nothing ran.
    pub fn percentage(&self) -> Option<f64> {
        (self.total() > 0).then(|| self.passed() as f64 / self.total() as f64 * 100.0)
    }
}

/// Aggregate return value of a run: the first non-zero item composite, else `0`.
pub fn run_exit_code(results: &[CompleteResults]) -> i32 {
    results
        .iter()
        .filter_map(CompleteResults::composite_result)
        .find(|code| *code != 0)
        .unwrap_or(0)
}

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

const LABEL_WIDTH: usize = 21;

/// Human-readable reporter. Colors only when the stream is a terminal.
pub struct ConsoleReporter {
    pub verbose: bool,
    out: OutputStream,
}

impl ConsoleReporter {
    pub fn new(out: OutputStream, verbose: bool) -> Self {
        Self { verbose, out }
    }

    fn paint(&self, status: StageStatus, text: &str) -> String {
        let color = match status {
            StageStatus::Succeeded => GREEN,
            StageStatus::Failed => RED,
            StageStatus::Unknown => YELLOW,
            StageStatus::NotRun => return text.to_string(),
        };
        if self.out.is_terminal() {
            format!("{color}{text}{RESET}")
        } else {
            text.to_string()
        }
    }

    fn status_text(&self, result: Option<i32>) -> String {
        let status = StageStatus::from_result(result);
        match result {
            Some(code) if code != 0 => format!("{} ({})", self.paint(status, status.as_str()), code),
            _ => self.paint(status, status.as_str()),
        }
    }

    fn render_flavor(&self, text: &mut String, flavor: Flavor, results: &Results) {
        let _ = writeln!(text, "  {flavor}:");
        for (kind, outcome) in results.stages() {
            let mut line = self.status_text(outcome.result);
            match kind {
                StageKind::Coverage => {
                    if let Some(total) = results.coverage_total_percentage {
                        let _ = write!(line, " [{total:.2}%]");
                    }
                }
                StageKind::CoverageValidation => {
                    if let Some(min) = results.coverage_min_percentage.filter(|_| outcome.has_run()) {
                        let _ = write!(line, " [minimum {min:.2}%]");
                    }
                }
                _ => {}
            }
            let label = format!("{}:", kind.label());
            let _ = writeln!(text, "    {label:<LABEL_WIDTH$} {line}");
        }
        let _ = writeln!(
            text,
            "    {:<LABEL_WIDTH$} {}",
            "Result:",
            self.status_text(results.composite_result())
        );

        if self.verbose {
            for (path, sub_percentage) in &results.coverage_percentages {
                let _ = writeln!(text, "      {sub_percentage:>6.2}%  {path}");
            }
            for kind in [StageKind::Compile, StageKind::Test, StageKind::Coverage] {
                dump_log(text, kind, results.stage(kind));
            }
        }
    }
}

fn dump_log(text: &mut String, kind: StageKind, outcome: &StageOutcome) {
    let Some(path) = outcome.log_path.as_deref() else {
        return;
    };
    let _ = writeln!(text, "    --- {} log: {} ---", kind.as_str(), path.display());
    match read_log(path) {
        Some(contents) => {
            for line in contents.lines() {
                let _ = writeln!(text, "    {line}");
            }
        }
        None => {
            let _ = writeln!(text, "    <unreadable>");
        }
    }
}

fn read_log(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .inspect_err(|e| tracing::warn!("cannot read log {}: {}", path.display(), e))
        .ok()
}

impl Reporter for ConsoleReporter {
    fn on_discovery_complete(&mut self, report: &DiscoveryReport) {
        if report.items.is_empty() {
            self.out.write_line("No test items found");
        }
        if self.verbose {
            let mut text = String::new();
            for path in &report.unsupported {
                let _ = writeln!(text, "unsupported: {}", path.display());
            }
            for path in &report.ignored {
                let _ = writeln!(text, "ignored: {}", path.display());
            }
            if !text.is_empty() {
                self.out.write_str(&text);
            }
        }
    }

    fn on_item_complete(&mut self, results: &CompleteResults) {
        let mut text = String::new();
        let _ = writeln!(text, "{}", results.item.path.display());
        self.render_flavor(&mut text, Flavor::Debug, &results.debug);
        self.render_flavor(&mut text, Flavor::Release, &results.release);
        let _ = writeln!(text, "  Result: {}", self.status_text(results.composite_result()));
        self.out.write_str(&text);
    }

    fn on_run_complete(&mut self, summary: &RunSummary) {
        let mut text = String::from("\n");
        for entry in &summary.entries {
            let status = StageStatus::from_result(Some(entry.result));
            let word = if entry.passed() { "Succeeded" } else { "Failed" };
            let _ = writeln!(
                text,
                "{}: {} ({}) in {:.2}s",
                self.paint(status, word),
                entry.item.display(),
                entry.flavor,
                entry.duration.as_secs_f64()
            );
        }

        match summary.percentage() {
            Some(percentage) => {
                let _ = writeln!(
                    text,
                    "====== {}/{} passed ({:.2}%) ======",
                    summary.passed(),
                    summary.total(),
                    percentage
                );
            }
            None => {
                let _ = writeln!(text, "====== nothing ran ======");
            }
        }
        self.out.write_str(&text);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use testrig_core::TestItem;

    fn ran(result: i32, millis: u64) -> StageOutcome {
        StageOutcome::new(result, Duration::from_millis(millis))
    }

    fn passing(path: &str) -> CompleteResults {
        let mut complete = CompleteResults::new(TestItem::new(path, path));
        complete.debug.compile = ran(0, 1000);
        complete.debug.test = ran(0, 250);
        complete.debug.parse = ran(0, 0);
        complete
    }

    #[test]
    fn test_exit_code_is_first_failure() {
        let mut failing = passing("b.rs");
        failing.debug.parse = ran(-1, 0);
        let mut unknown = passing("c.rs");
        unknown.debug.parse = ran(1, 0);
        assert_eq!(run_exit_code(&[passing("a.rs"), failing, unknown]), -1);
        assert_eq!(run_exit_code(&[passing("a.rs")]), 0);
        assert_eq!(run_exit_code(&[]), 0);
    }

    #[test]
    fn test_summary_skips_flavors_that_never_ran() {
        let mut with_release = passing("a.rs");
        with_release.release.compile = ran(-1, 10);
        let summary = RunSummary::from_results(&[with_release, passing("b.rs")]);

        assert_eq!(summary.total(), 3);
        assert_eq!(summary.passed(), 2);
        assert_eq!(summary.entries[0].duration, Duration::from_millis(1250));
        assert_eq!(summary.entries[1].flavor, Flavor::Release);
        assert!((summary.percentage().unwrap() - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_summary_has_no_percentage() {
        assert_eq!(RunSummary::default().percentage(), None);
    }

    #[test]
    fn test_item_report_is_plain_when_not_a_terminal() {
        let (out, captured) = OutputStream::capture();
        let mut reporter = ConsoleReporter::new(out, false);
        let mut complete = passing("tests/a.rs");
        complete.release.compile = ran(-1, 5);
        reporter.on_item_complete(&complete);

        insta::assert_snapshot!(captured.contents(), @r"
        tests/a.rs
          Debug:
            Compile:              Succeeded
            Test:                 Succeeded
            Parse:                Succeeded
            Coverage:             N/A
            Coverage Validation:  N/A
            Result:               Succeeded
          Release:
            Compile:              Failed (-1)
            Test:                 N/A
            Parse:                N/A
            Coverage:             N/A
            Coverage Validation:  N/A
            Result:               Failed (-1)
          Result: Failed (-1)
        ");
    }

    #[test]
    fn test_terminal_output_is_colored() {
        let out = OutputStream::from_writer(Vec::new(), true);
        let reporter = ConsoleReporter::new(out, false);
        assert_eq!(reporter.status_text(Some(0)), "\x1b[32mSucceeded\x1b[0m");
        assert_eq!(reporter.status_text(Some(-1)), "\x1b[31mFailed\x1b[0m (-1)");
        assert_eq!(reporter.status_text(None), "N/A");
    }

    #[test]
    fn test_coverage_lines_show_percentages() {
        let (out, captured) = OutputStream::capture();
        let mut reporter = ConsoleReporter::new(out, false);
        let mut complete = passing("tests/a.rs");
        complete.debug.coverage = ran(0, 0);
        complete.debug.coverage_total_percentage = Some(72.5);
        complete.debug.coverage_validation = ran(-1, 0);
        complete.debug.coverage_min_percentage = Some(80.0);
        reporter.on_item_complete(&complete);

        let text = captured.contents();
        assert!(text.contains("Coverage:             Succeeded [72.50%]"));
        assert!(text.contains("Coverage Validation:  Failed (-1) [minimum 80.00%]"));
    }

    #[test]
    fn test_sweep_summary() {
        let (out, captured) = OutputStream::capture();
        let mut reporter = ConsoleReporter::new(out, false);
        let mut failing = passing("tests/b.rs");
        failing.debug.parse = ran(-1, 0);
        reporter.on_run_complete(&RunSummary::from_results(&[passing("tests/a.rs"), failing]));

        insta::assert_snapshot!(captured.contents().trim_start(), @r"
        Succeeded: tests/a.rs (Debug) in 1.25s
        Failed: tests/b.rs (Debug) in 1.25s
        ====== 1/2 passed (50.00%) ======
        ");
    }

    #[test]
    fn test_verbose_dumps_logs() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("a.Debug.compile.log");
        fs::write(&log, "warning: unused variable\n").unwrap();

        let (out, captured) = OutputStream::capture();
        let mut reporter = ConsoleReporter::new(out, true);
        let mut complete = passing("tests/a.rs");
        complete.debug.compile = ran(0, 0).with_log_path(&log);
        reporter.on_item_complete(&complete);

        let text = captured.contents();
        assert!(text.contains("--- compile log:"));
        assert!(text.contains("    warning: unused variable"));
    }
}
