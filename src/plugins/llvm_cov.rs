//! Source-based coverage through the LLVM tools.
//!
//! The test runs with `LLVM_PROFILE_FILE` pointing next to the binary. The raw profiles are merged with
//! `llvm-profdata`, and `llvm-cov export -summary-only` produces the JSON summary the percentages come from.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Instant;

use serde::Deserialize;

use testrig_core::{
    CodeCoverageExtractor, Compiler, CompilerRole, ContextItem, ExecuteOutcome, PluginError, PluginResult,
};

use crate::process::{program_available, run_captured, shell_command};

pub const NAME: &str = "llvm-cov";

#[derive(Debug, Deserialize)]
struct Export {
    data: Vec<ExportData>,
}

#[derive(Debug, Deserialize)]
struct ExportData {
    #[serde(default)]
    files: Vec<FileSummary>,
    totals: Summary,
}

#[derive(Debug, Deserialize)]
struct FileSummary {
    filename: String,
    summary: Summary,
}

#[derive(Debug, Deserialize)]
struct Summary {
    lines: Counts,
}

#[derive(Debug, Deserialize)]
struct Counts {
    percent: f64,
}

/// Line coverage extracted from an `llvm-cov export` summary.
#[derive(Debug, Clone, PartialEq)]
pub struct LineCoverage {
    pub total: f64,
    pub per_file: BTreeMap<String, f64>,
}

/// Parse the JSON written by `llvm-cov export -summary-only`.
pub fn parse_export(json: &str) -> PluginResult<LineCoverage> {
    let export: Export = serde_json::from_str(json)
        .map_err(|e| PluginError::message(format!("malformed llvm-cov export: {e}")))?;
    let data = export
        .data
        .into_iter()
        .next()
        .ok_or_else(|| PluginError::message("llvm-cov export contains no data"))?;

    Ok(LineCoverage {
        total: data.totals.lines.percent,
        per_file: data
            .files
            .into_iter()
            .map(|file| (file.filename, file.summary.lines.percent))
            .collect(),
    })
}

#[derive(Debug)]
pub struct LlvmCovExtractor {
    profdata: PathBuf,
    cov: PathBuf,
    available: OnceLock<Result<(), String>>,
}

impl Default for LlvmCovExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl LlvmCovExtractor {
    pub fn new() -> Self {
        Self::with_tools("llvm-profdata", "llvm-cov")
    }

    pub fn with_tools(profdata: impl Into<PathBuf>, cov: impl Into<PathBuf>) -> Self {
        Self {
            profdata: profdata.into(),
            cov: cov.into(),
            available: OnceLock::new(),
        }
    }

    fn probe(&self) -> Result<(), String> {
        let missing: Vec<String> = [&self.profdata, &self.cov]
            .into_iter()
            .filter(|tool| !program_available(tool))
            .map(|tool| tool.display().to_string())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing LLVM tools: {}", missing.join(", ")))
        }
    }

    /// Merge raw profiles and export a summary. Returns the coverage result, the tool output and the summary JSON.
    fn extract(&self, binary: &Path, raw_profiles: &[PathBuf]) -> PluginResult<(i32, String, Option<String>)> {
        let mut log = String::new();
        if raw_profiles.is_empty() {
            log.push_str("no raw profile was written by the test run\n");
            return Ok((-1, log, None));
        }

        let merged = profile_path(binary, ".profdata");
        let mut merge = Command::new(&self.profdata);
        merge.arg("merge").arg("-sparse").args(raw_profiles).arg("-o").arg(&merged);
        let run = run_captured(&mut merge)?;
        log.push_str(&run.output);
        if !run.success() {
            return Ok((-1, log, None));
        }

        let mut export = Command::new(&self.cov);
        export
            .arg("export")
            .arg("-summary-only")
            .arg("-instr-profile")
            .arg(&merged)
            .arg(binary);
        let output = export.output().map_err(|source| PluginError::Spawn {
            program: self.cov.display().to_string(),
            source,
        })?;
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return Ok((-1, log, None));
        }

        Ok((0, log, Some(String::from_utf8_lossy(&output.stdout).into_owned())))
    }
}

/// `<dir>/<binary name><suffix>`
fn profile_path(binary: &Path, suffix: &str) -> PathBuf {
    let mut name = binary.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    binary.with_file_name(name)
}

fn raw_profiles(binary: &Path) -> PluginResult<Vec<PathBuf>> {
    let Some(dir) = binary.parent().filter(|d| d.is_dir()) else {
        return Ok(Vec::new());
    };
    let prefix = binary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut profiles = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".profraw"));
        if matches {
            profiles.push(path);
        }
    }
    profiles.sort();
    Ok(profiles)
}

impl CodeCoverageExtractor for LlvmCovExtractor {
    fn name(&self) -> &str {
        NAME
    }

    fn validate_environment(&self) -> PluginResult<()> {
        self.available
            .get_or_init(|| self.probe())
            .clone()
            .map_err(PluginError::Environment)
    }

    /// Needs an instrumented native binary.
    fn is_supported_compiler(&self, compiler: &dyn Compiler) -> bool {
        compiler.role() == CompilerRole::Compiler
    }

    fn execute(
        &self,
        compiler: &dyn Compiler,
        context: &dyn ContextItem,
        command_line: &str,
    ) -> PluginResult<ExecuteOutcome> {
        let binary = context.output_path();

        // Stale profiles from an earlier iteration would be merged into this one.
        compiler.remove_temporary_artifacts(context)?;

        let mut command = shell_command(command_line);
        command.env("LLVM_PROFILE_FILE", profile_path(binary, "-%p.profraw"));
        let run = run_captured(&mut command)?;
        let mut outcome = ExecuteOutcome::test_only(if run.success() { 0 } else { -1 }, run.duration, run.output);

        let start = Instant::now();
        let (mut result, mut log, json) = self.extract(binary, &raw_profiles(binary)?)?;
        if let Some(json) = &json {
            match parse_export(json) {
                Ok(coverage) => {
                    tracing::debug!(item = %context.item().display(), total = coverage.total, "coverage extracted");
                    outcome.coverage_total_percentage = Some(coverage.total);
                    outcome.coverage_percentages = coverage.per_file;
                }
                Err(e) => {
                    log.push_str(&format!("{e}\n"));
                    result = -1;
                }
            }
        }

        outcome.coverage_result = Some(result);
        outcome.coverage_duration = Some(start.elapsed());
        outcome.coverage_output = Some(log);
        outcome.coverage_data = json;
        Ok(outcome)
    }
}
