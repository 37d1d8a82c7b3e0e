//! End-to-end pipeline tests driven by in-process fake plugins.
//!
//! The fakes record every call and track how many builds are in flight, so scheduling properties can be asserted
//! without a real toolchain.

use std::any::Any;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use testrig::pool::CapturedOutput;
use testrig::{
    CodeCoverageExtractor, CodeCoverageValidator, Compiler, CompilerRole, ContextItem, ContextRequest,
    ExecuteOutcome, Flavor, Granularity, Orchestrator, OutputStream, PluginError, PluginResult, Plugins,
    RunConfig, SetupError, TestParser,
};

// =============================================================================
// Fakes
// =============================================================================

#[derive(Debug)]
struct FakeContext {
    item: PathBuf,
    output: PathBuf,
    debug: bool,
}

impl ContextItem for FakeContext {
    fn item(&self) -> &Path {
        &self.item
    }
    fn output_path(&self) -> &Path {
        &self.output
    }
    fn is_debug(&self) -> bool {
        self.debug
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Shared call recorder.
#[derive(Default)]
struct Probe {
    active: AtomicUsize,
    peak: AtomicUsize,
    builds: Mutex<Vec<(String, Flavor)>>,
    /// Operation name and context output path of every build, in call order.
    operations: Mutex<Vec<(&'static str, PathBuf)>>,
    executions: AtomicUsize,
    cleaned: AtomicUsize,
}

impl Probe {
    fn builds(&self) -> Vec<(String, Flavor)> {
        self.builds.lock().unwrap().clone()
    }

    fn operations(&self) -> Vec<(&'static str, PathBuf)> {
        self.operations.lock().unwrap().clone()
    }
}

struct FakeCompiler {
    granularity: Granularity,
    role: CompilerRole,
    compile_result: i32,
    disable_release: bool,
    fail_context: bool,
    panic_on_compile: bool,
    broken_environment: bool,
    probe: Arc<Probe>,
}

impl FakeCompiler {
    fn new(probe: &Arc<Probe>) -> Self {
        Self {
            granularity: Granularity::File,
            role: CompilerRole::Compiler,
            compile_result: 0,
            disable_release: false,
            fail_context: false,
            panic_on_compile: false,
            broken_environment: false,
            probe: Arc::clone(probe),
        }
    }

    fn record(&self, operation: &'static str, context: &dyn ContextItem, sink: &mut dyn Write) -> PluginResult<i32> {
        let flavor = if context.is_debug() { Flavor::Debug } else { Flavor::Release };
        let name = context.item().file_name().unwrap().to_string_lossy().into_owned();
        self.probe.builds.lock().unwrap().push((name, flavor));
        self.probe
            .operations
            .lock()
            .unwrap()
            .push((operation, context.output_path().to_path_buf()));

        let now = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        self.probe.active.fetch_sub(1, Ordering::SeqCst);

        if self.panic_on_compile {
            panic!("compiler crashed");
        }
        writeln!(sink, "{operation} {}", context.item().display())?;
        Ok(self.compile_result)
    }
}

impl Compiler for FakeCompiler {
    fn name(&self) -> &str {
        "fake"
    }
    fn granularity(&self) -> Granularity {
        self.granularity
    }
    fn role(&self) -> CompilerRole {
        self.role
    }
    fn is_supported(&self, path: &Path) -> bool {
        match self.granularity {
            Granularity::File => path.extension().is_some_and(|e| e == "t"),
            Granularity::Directory => true,
        }
    }
    fn validate_environment(&self) -> PluginResult<()> {
        if self.broken_environment {
            return Err(PluginError::Environment("fake toolchain missing".to_string()));
        }
        Ok(())
    }
    fn generate_context_item(&self, request: &ContextRequest<'_>) -> PluginResult<Option<Box<dyn ContextItem>>> {
        if self.fail_context {
            return Err(PluginError::message("no toolchain for this item"));
        }
        if self.disable_release && !request.is_debug {
            return Ok(None);
        }
        Ok(Some(Box::new(FakeContext {
            item: request.item.to_path_buf(),
            output: request.output_path.to_path_buf(),
            debug: request.is_debug,
        })))
    }
    fn compile(&self, context: &dyn ContextItem, sink: &mut dyn Write) -> PluginResult<i32> {
        self.record("compile", context, sink)
    }
    fn generate(&self, context: &dyn ContextItem, sink: &mut dyn Write) -> PluginResult<i32> {
        self.record("generate", context, sink)
    }
    fn verify(&self, context: &dyn ContextItem, sink: &mut dyn Write) -> PluginResult<i32> {
        self.record("verify", context, sink)
    }
    fn remove_temporary_artifacts(&self, _context: &dyn ContextItem) -> PluginResult<()> {
        self.probe.cleaned.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Plays back scripted outputs, one per execution. `ok` parses to 0, `fail` to -1, `unknown` to 1.
struct ScriptedExtractor {
    script: Vec<&'static str>,
    coverage: Option<f64>,
    probe: Arc<Probe>,
}

impl CodeCoverageExtractor for ScriptedExtractor {
    fn name(&self) -> &str {
        "scripted"
    }
    fn is_supported_compiler(&self, _compiler: &dyn Compiler) -> bool {
        true
    }
    fn execute(
        &self,
        _compiler: &dyn Compiler,
        _context: &dyn ContextItem,
        _command_line: &str,
    ) -> PluginResult<ExecuteOutcome> {
        let n = self.probe.executions.fetch_add(1, Ordering::SeqCst);
        let output = self.script.get(n).or(self.script.last()).copied().unwrap_or("ok");
        let mut outcome = ExecuteOutcome::test_only(0, Duration::from_millis(1), output);
        if let Some(total) = self.coverage {
            outcome.coverage_result = Some(0);
            outcome.coverage_duration = Some(Duration::from_millis(1));
            outcome.coverage_total_percentage = Some(total);
            outcome.coverage_output = Some(format!("total {total}"));
        }
        Ok(outcome)
    }
}

/// `compatible: false` rejects every compiler.
struct WordParser {
    compatible: bool,
}

impl TestParser for WordParser {
    fn name(&self) -> &str {
        "word"
    }
    fn is_supported_compiler(&self, _compiler: &dyn Compiler) -> bool {
        self.compatible
    }
    fn create_invoke_command_line(&self, context: &dyn ContextItem, _debug_on_error: bool) -> PluginResult<String> {
        Ok(context.output_path().display().to_string())
    }
    fn parse(&self, raw_output: &str) -> i32 {
        match raw_output {
            "ok" => 0,
            "fail" => -1,
            "boom" => panic!("parser blew up"),
            _ => 1,
        }
    }
}

struct Minimum(f64);

impl CodeCoverageValidator for Minimum {
    fn name(&self) -> &str {
        "minimum"
    }
    fn validate(&self, _item: &Path, total_percentage: f64) -> (i32, Option<f64>) {
        (if total_percentage >= self.0 { 0 } else { -1 }, Some(self.0))
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    tmp: TempDir,
    probe: Arc<Probe>,
}

impl Harness {
    fn new() -> Self {
        Self {
            tmp: tempfile::tempdir().unwrap(),
            probe: Arc::new(Probe::default()),
        }
    }

    fn item(&self, relative: &str) -> PathBuf {
        let path = self.tmp.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "").unwrap();
        path
    }

    fn config(&self) -> RunConfig {
        RunConfig::new().with_output_dir(self.tmp.path().join("out"))
    }

    fn compiler(&self) -> FakeCompiler {
        FakeCompiler::new(&self.probe)
    }

    fn extractor(&self, script: Vec<&'static str>) -> ScriptedExtractor {
        ScriptedExtractor {
            script,
            coverage: None,
            probe: Arc::clone(&self.probe),
        }
    }

    fn orchestrator(
        &self,
        compiler: FakeCompiler,
        extractor: ScriptedExtractor,
        config: RunConfig,
    ) -> (Orchestrator, CapturedOutput) {
        self.orchestrator_with_parser(compiler, WordParser { compatible: true }, extractor, config)
    }

    fn orchestrator_with_parser(
        &self,
        compiler: FakeCompiler,
        parser: WordParser,
        extractor: ScriptedExtractor,
        config: RunConfig,
    ) -> (Orchestrator, CapturedOutput) {
        let plugins = Plugins::new(
            Arc::new(compiler),
            Arc::new(parser),
            Arc::new(extractor),
            Arc::new(Minimum(60.0)),
        );
        let (output, captured) = OutputStream::capture();
        (Orchestrator::new(plugins, config).with_output(output), captured)
    }
}

// =============================================================================
// End-to-end
// =============================================================================

#[test]
fn passing_item_succeeds_in_both_flavors() {
    let h = Harness::new();
    let item = h.item("tests/a.t");
    let (orchestrator, _) = h.orchestrator(h.compiler(), h.extractor(vec!["ok"]), h.config());

    let results = orchestrator.run_item(&item).unwrap();

    assert_eq!(results.composite_result(), Some(0));
    assert_eq!(results.debug.composite_result(), Some(0));
    assert_eq!(results.release.composite_result(), Some(0));
    assert_eq!(results.debug.coverage.result, None);
    assert_eq!(h.probe.executions.load(Ordering::SeqCst), 2);

    let compile_log = results.debug.compile.log_path.as_ref().unwrap();
    assert!(fs::read_to_string(compile_log).unwrap().starts_with("compile "));
    let test_log = results.release.test.log_path.as_ref().unwrap();
    assert!(test_log.to_string_lossy().ends_with(".Release.test.1.log"));
    assert_eq!(fs::read_to_string(test_log).unwrap(), "ok");
}

#[test]
fn failed_compile_never_executes() {
    let h = Harness::new();
    let item = h.item("tests/a.t");
    let mut compiler = h.compiler();
    compiler.compile_result = -1;
    let (orchestrator, captured) = h.orchestrator(compiler, h.extractor(vec!["ok"]), h.config());

    let results = orchestrator.run_item(&item).unwrap();

    assert_eq!(results.composite_result(), Some(-1));
    assert_eq!(results.debug.test.result, None);
    assert_eq!(results.debug.parse.result, None);
    assert_eq!(h.probe.executions.load(Ordering::SeqCst), 0);
    assert!(captured.contents().contains("compile failed with -1"));
}

#[test]
fn parse_failure_is_sticky() {
    let h = Harness::new();
    let item = h.item("tests/a.t");
    let config = h
        .config()
        .with_debug_only(true)
        .with_iterations(2)
        .with_continue_iterations_on_error(true);
    let (orchestrator, _) = h.orchestrator(h.compiler(), h.extractor(vec!["unknown", "ok"]), config);

    let results = orchestrator.run_item(&item).unwrap();

    assert_eq!(h.probe.executions.load(Ordering::SeqCst), 2);
    assert_eq!(results.debug.parse.result, Some(1));
    assert_eq!(results.debug.test_output.as_deref(), Some("ok"));
    assert_eq!(results.composite_result(), Some(1));
}

#[test]
fn fail_fast_skips_remaining_iterations() {
    let h = Harness::new();
    let item = h.item("tests/a.t");
    let config = h.config().with_debug_only(true).with_iterations(3);
    let (orchestrator, captured) = h.orchestrator(h.compiler(), h.extractor(vec!["fail", "ok", "ok"]), config);

    let results = orchestrator.run_item(&item).unwrap();

    assert_eq!(h.probe.executions.load(Ordering::SeqCst), 1);
    assert_eq!(results.debug.parse.result, Some(-1));
    assert!(captured.contents().contains("iteration 1 failed with -1"));
}

#[test]
fn disabled_flavor_never_runs() {
    let h = Harness::new();
    let item = h.item("tests/a.t");
    let mut compiler = h.compiler();
    compiler.disable_release = true;
    let (orchestrator, _) = h.orchestrator(compiler, h.extractor(vec!["ok"]), h.config());

    let results = orchestrator.run_item(&item).unwrap();

    assert_eq!(results.release.composite_result(), None);
    assert_eq!(results.composite_result(), Some(0));
    assert_eq!(h.probe.builds(), vec![("a.t".to_string(), Flavor::Debug)]);
    assert_eq!(h.probe.executions.load(Ordering::SeqCst), 1);
    assert_eq!(h.probe.cleaned.load(Ordering::SeqCst), 1);
}

#[test]
fn context_error_is_a_compile_failure() {
    let h = Harness::new();
    let item = h.item("tests/a.t");
    let mut compiler = h.compiler();
    compiler.fail_context = true;
    let (orchestrator, _) = h.orchestrator(compiler, h.extractor(vec!["ok"]), h.config());

    let results = orchestrator.run_item(&item).unwrap();

    assert_eq!(results.debug.compile.result, Some(-1));
    let log = fs::read_to_string(results.debug.compile.log_path.as_ref().unwrap()).unwrap();
    assert!(log.contains("no toolchain for this item"));
    assert!(h.probe.builds().is_empty());
}

#[test]
fn compiler_panic_is_contained() {
    let h = Harness::new();
    let item = h.item("tests/a.t");
    let mut compiler = h.compiler();
    compiler.panic_on_compile = true;
    let (orchestrator, _) = h.orchestrator(compiler, h.extractor(vec!["ok"]), h.config().with_debug_only(true));

    let results = orchestrator.run_item(&item).unwrap();

    assert_eq!(results.debug.compile.result, Some(-1));
    let log = fs::read_to_string(results.debug.compile.log_path.as_ref().unwrap()).unwrap();
    assert!(log.contains("compile panicked: compiler crashed"));
}

#[test]
fn parser_panic_becomes_test_failure() {
    let h = Harness::new();
    let item = h.item("tests/a.t");
    let (orchestrator, _) = h.orchestrator(h.compiler(), h.extractor(vec!["boom"]), h.config().with_debug_only(true));

    let results = orchestrator.run_item(&item).unwrap();

    assert_eq!(results.debug.test.result, Some(-1));
    assert_eq!(results.debug.parse.result, None);
    let log = fs::read_to_string(results.debug.test.log_path.as_ref().unwrap()).unwrap();
    assert!(log.contains("parser blew up"));
}

#[test]
fn coverage_below_minimum_fails_validation() {
    let h = Harness::new();
    let item = h.item("tests/a.t");
    let mut extractor = h.extractor(vec!["ok"]);
    extractor.coverage = Some(55.0);
    let (orchestrator, _) = h.orchestrator(h.compiler(), extractor, h.config().with_code_coverage(true));

    let results = orchestrator.run_item(&item).unwrap();

    assert_eq!(results.debug.coverage.result, Some(0));
    assert_eq!(results.debug.coverage_total_percentage, Some(55.0));
    assert_eq!(results.debug.coverage_validation.result, Some(-1));
    assert_eq!(results.debug.coverage_min_percentage, Some(60.0));
    assert_eq!(results.composite_result(), Some(-1));
    // no Release builds while collecting coverage
    assert_eq!(results.release.composite_result(), None);
}

#[test]
fn generator_builds_debug_only_through_generate() {
    let h = Harness::new();
    let item = h.item("tests/a.t");
    let mut compiler = h.compiler();
    compiler.role = CompilerRole::Generator;
    let (orchestrator, _) = h.orchestrator(compiler, h.extractor(vec!["ok"]), h.config());

    let results = orchestrator.run_item(&item).unwrap();

    assert_eq!(h.probe.builds(), vec![("a.t".to_string(), Flavor::Debug)]);
    let operations = h.probe.operations();
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].0, "generate");
    assert_ne!(operations[0].1, item);
    assert_eq!(results.release.composite_result(), None);
    assert_eq!(results.composite_result(), Some(0));
    assert_eq!(h.probe.executions.load(Ordering::SeqCst), 1);
}

#[test]
fn verifier_checks_the_item_in_place() {
    let h = Harness::new();
    let item = h.item("tests/a.t");
    let mut compiler = h.compiler();
    compiler.role = CompilerRole::Verifier;
    let (orchestrator, _) = h.orchestrator(compiler, h.extractor(vec!["ok"]), h.config());

    let results = orchestrator.run_item(&item).unwrap();

    assert_eq!(h.probe.builds(), vec![("a.t".to_string(), Flavor::Debug)]);
    assert_eq!(h.probe.operations(), vec![("verify", item.clone())]);
    assert_eq!(results.release.composite_result(), None);
    assert_eq!(results.debug.compile.result, Some(0));
    let compile_log = results.debug.compile.log_path.as_ref().unwrap();
    assert!(fs::read_to_string(compile_log).unwrap().starts_with("verify "));
}

#[test]
fn parallel_iterations_keep_the_first_parse_failure() {
    let h = Harness::new();
    let item = h.item("tests/a.t");
    let config = h
        .config()
        .with_debug_only(true)
        .with_max_workers(4)
        .with_parallel_execution(true)
        .with_continue_iterations_on_error(true)
        .with_iterations(8);
    let script = vec!["unknown", "ok", "ok", "ok", "ok", "ok", "ok", "ok"];
    let (orchestrator, _) = h.orchestrator(h.compiler(), h.extractor(script), config);

    let results = orchestrator.run_item(&item).unwrap();

    assert_eq!(h.probe.executions.load(Ordering::SeqCst), 8);
    assert_eq!(results.debug.parse.result, Some(1));
    assert_eq!(results.debug.test.result, Some(0));
    assert_eq!(results.composite_result(), Some(1));
}

// =============================================================================
// Scheduling
// =============================================================================

#[test]
fn debug_builds_are_queued_before_release_builds() {
    let h = Harness::new();
    h.item("tests/a.t");
    h.item("tests/b.t");
    let (orchestrator, _) = h.orchestrator(h.compiler(), h.extractor(vec!["ok"]), h.config().with_max_workers(1));

    let run = orchestrator.run_tree(h.tmp.path()).unwrap();

    assert_eq!(run.results.len(), 2);
    assert_eq!(
        h.probe.builds(),
        vec![
            ("a.t".to_string(), Flavor::Debug),
            ("b.t".to_string(), Flavor::Debug),
            ("a.t".to_string(), Flavor::Release),
            ("b.t".to_string(), Flavor::Release),
        ]
    );
}

#[test]
fn directory_compiler_builds_one_item_at_a_time() {
    let h = Harness::new();
    for name in ["one", "two", "three", "four"] {
        h.item(&format!("src/{name}.tests.unit/build.txt"));
    }
    let mut compiler = h.compiler();
    compiler.granularity = Granularity::Directory;
    let (orchestrator, _) = h.orchestrator(compiler, h.extractor(vec!["ok"]), h.config().with_max_workers(8));

    let run = orchestrator.run_tree(h.tmp.path()).unwrap();

    assert_eq!(run.discovery.items.len(), 4);
    assert_eq!(h.probe.builds().len(), 8);
    assert_eq!(h.probe.peak.load(Ordering::SeqCst), 1);
}

#[test]
fn flavors_of_one_item_never_build_together() {
    let h = Harness::new();
    let item = h.item("tests/a.t");
    let (orchestrator, _) = h.orchestrator(h.compiler(), h.extractor(vec!["ok"]), h.config().with_max_workers(4));

    orchestrator.run_item(&item).unwrap();

    assert_eq!(h.probe.builds().len(), 2);
    assert_eq!(h.probe.peak.load(Ordering::SeqCst), 1);
}

#[test]
fn output_directory_is_not_rediscovered() {
    let h = Harness::new();
    h.item("tests/a.t");
    h.item("out/tests/stale.t");
    let (orchestrator, _) = h.orchestrator(h.compiler(), h.extractor(vec!["ok"]), h.config());

    let run = orchestrator.run_tree(h.tmp.path()).unwrap();

    assert_eq!(run.discovery.items, vec![h.tmp.path().join("tests/a.t")]);
}

// =============================================================================
// Setup errors
// =============================================================================

#[test]
fn missing_item_is_a_setup_error() {
    let h = Harness::new();
    let (orchestrator, _) = h.orchestrator(h.compiler(), h.extractor(vec!["ok"]), h.config());
    let err = orchestrator.run_item(&h.tmp.path().join("nope.t")).unwrap_err();
    assert!(matches!(err, SetupError::MissingPath { .. }));
}

#[test]
fn unsupported_item_is_a_setup_error() {
    let h = Harness::new();
    let item = h.item("tests/a.md");
    let (orchestrator, _) = h.orchestrator(h.compiler(), h.extractor(vec!["ok"]), h.config());
    let err = orchestrator.run_item(&item).unwrap_err();
    assert!(matches!(err, SetupError::UnsupportedItem { .. }));
    assert_eq!(h.probe.builds().len(), 0);
}

#[test]
fn contradictory_config_aborts_before_building() {
    let h = Harness::new();
    let item = h.item("tests/a.t");
    let config = h.config().with_debug_only(true).with_release_only(true);
    let (orchestrator, _) = h.orchestrator(h.compiler(), h.extractor(vec!["ok"]), config);
    let err = orchestrator.run_item(&item).unwrap_err();
    assert!(matches!(err, SetupError::InvalidConfig(_)));
    assert!(h.probe.builds().is_empty());
}

#[test]
fn incompatible_parser_aborts_before_building() {
    let h = Harness::new();
    let item = h.item("tests/a.t");
    let (orchestrator, _) = h.orchestrator_with_parser(
        h.compiler(),
        WordParser { compatible: false },
        h.extractor(vec!["ok"]),
        h.config(),
    );

    let err = orchestrator.run_item(&item).unwrap_err();

    assert!(matches!(
        err,
        SetupError::UnsupportedCompiler { kind: "test parser", .. }
    ));
    assert!(h.probe.builds().is_empty());
    assert_eq!(h.probe.executions.load(Ordering::SeqCst), 0);
}

#[test]
fn incompatible_parser_aborts_a_sweep() {
    let h = Harness::new();
    h.item("tests/a.t");
    let (orchestrator, _) = h.orchestrator_with_parser(
        h.compiler(),
        WordParser { compatible: false },
        h.extractor(vec!["ok"]),
        h.config(),
    );

    assert!(matches!(
        orchestrator.discover(h.tmp.path()),
        Err(SetupError::UnsupportedCompiler { .. })
    ));
    assert!(matches!(
        orchestrator.run_tree(h.tmp.path()),
        Err(SetupError::UnsupportedCompiler { .. })
    ));
    assert!(h.probe.builds().is_empty());
}

#[test]
fn failing_environment_aborts_before_building() {
    let h = Harness::new();
    let item = h.item("tests/a.t");
    let mut compiler = h.compiler();
    compiler.broken_environment = true;
    let (orchestrator, _) = h.orchestrator(compiler, h.extractor(vec!["ok"]), h.config());

    let err = orchestrator.run_paths(vec![item]).unwrap_err();

    assert!(matches!(err, SetupError::Environment { .. }));
    assert!(h.probe.builds().is_empty());
}
