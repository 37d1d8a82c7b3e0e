//! Plugin registry and built-in plugins.
//!
//! The host assembles a [`PluginRegistry`], then [`PluginRegistry::select`] picks one plugin of each kind by name
//! and runs every setup check. Nothing is looked up implicitly at run time. The orchestrator repeats
//! [`Plugins::check`] before each run, so hand-assembled plugin sets get the same checks.

pub mod libtest;
pub mod llvm_cov;
pub mod process_extractor;
pub mod rustc;
pub mod threshold;

use std::fmt;
use std::sync::Arc;

use testrig_core::{CodeCoverageExtractor, CodeCoverageValidator, Compiler, TestParser};

use crate::config::RunConfig;
use crate::error::SetupError;

pub use libtest::LibtestParser;
pub use llvm_cov::LlvmCovExtractor;
pub use process_extractor::ProcessExtractor;
pub use rustc::RustcCompiler;
pub use threshold::MinimumCoverageValidator;

/// The plugin set of one run.
#[derive(Clone)]
pub struct Plugins {
    pub compiler: Arc<dyn Compiler>,
    pub parser: Arc<dyn TestParser>,
    pub extractor: Arc<dyn CodeCoverageExtractor>,
    pub validator: Arc<dyn CodeCoverageValidator>,
}

impl Plugins {
    /// Assemble a plugin set without running any checks. See [`Plugins::check`].
    pub fn new(
        compiler: Arc<dyn Compiler>,
        parser: Arc<dyn TestParser>,
        extractor: Arc<dyn CodeCoverageExtractor>,
        validator: Arc<dyn CodeCoverageValidator>,
    ) -> Self {
        Self {
            compiler,
            parser,
            extractor,
            validator,
        }
    }

    /// Setup checks: compatibility with the compiler first, then the environments.
    pub fn check(&self) -> Result<(), SetupError> {
        let compiler = self.compiler.as_ref();

        if !self.parser.is_supported_compiler(compiler) {
            return Err(SetupError::UnsupportedCompiler {
                kind: "test parser",
                plugin: self.parser.name().to_string(),
                compiler: compiler.name().to_string(),
            });
        }
        if !self.extractor.is_supported_compiler(compiler) {
            return Err(SetupError::UnsupportedCompiler {
                kind: "coverage extractor",
                plugin: self.extractor.name().to_string(),
                compiler: compiler.name().to_string(),
            });
        }

        compiler.validate_environment().map_err(|source| SetupError::Environment {
            plugin: compiler.name().to_string(),
            source,
        })?;
        self.extractor
            .validate_environment()
            .map_err(|source| SetupError::Environment {
                plugin: self.extractor.name().to_string(),
                source,
            })?;

        Ok(())
    }
}

impl fmt::Debug for Plugins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugins")
            .field("compiler", &self.compiler.name())
            .field("parser", &self.parser.name())
            .field("extractor", &self.extractor.name())
            .field("validator", &self.validator.name())
            .finish()
    }
}

/// Names of the plugins to use for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSelection {
    pub compiler: String,
    pub parser: String,
    pub extractor: String,
    pub validator: String,
}

impl PluginSelection {
    /// Built-in defaults: `llvm-cov` when collecting coverage, plain process execution otherwise.
    pub fn for_config(config: &RunConfig) -> Self {
        let extractor = if config.code_coverage {
            llvm_cov::NAME
        } else {
            process_extractor::NAME
        };
        Self {
            compiler: rustc::NAME.to_string(),
            parser: libtest::NAME.to_string(),
            extractor: extractor.to_string(),
            validator: threshold::NAME.to_string(),
        }
    }
}

/// Named plugins available to a host.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    compilers: Vec<Arc<dyn Compiler>>,
    parsers: Vec<Arc<dyn TestParser>>,
    extractors: Vec<Arc<dyn CodeCoverageExtractor>>,
    validators: Vec<Arc<dyn CodeCoverageValidator>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in plugin.
    pub fn with_builtins(config: &RunConfig) -> Self {
        Self::new()
            .with_compiler(RustcCompiler::new())
            .with_parser(LibtestParser)
            .with_extractor(ProcessExtractor)
            .with_extractor(LlvmCovExtractor::new())
            .with_validator(MinimumCoverageValidator::new(config.min_coverage_percentage))
    }

    pub fn with_compiler(mut self, compiler: impl Compiler + 'static) -> Self {
        self.compilers.push(Arc::new(compiler));
        self
    }

    pub fn with_parser(mut self, parser: impl TestParser + 'static) -> Self {
        self.parsers.push(Arc::new(parser));
        self
    }

    pub fn with_extractor(mut self, extractor: impl CodeCoverageExtractor + 'static) -> Self {
        self.extractors.push(Arc::new(extractor));
        self
    }

    pub fn with_validator(mut self, validator: impl CodeCoverageValidator + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn compiler_names(&self) -> Vec<&str> {
        self.compilers.iter().map(|p| p.name()).collect()
    }

    pub fn parser_names(&self) -> Vec<&str> {
        self.parsers.iter().map(|p| p.name()).collect()
    }

    pub fn extractor_names(&self) -> Vec<&str> {
        self.extractors.iter().map(|p| p.name()).collect()
    }

    pub fn validator_names(&self) -> Vec<&str> {
        self.validators.iter().map(|p| p.name()).collect()
    }

    /// Look up one plugin of each kind and run [`Plugins::check`] and [`RunConfig::validate`].
    pub fn select(&self, selection: &PluginSelection, config: &RunConfig) -> Result<Plugins, SetupError> {
        config.validate()?;

        let plugins = Plugins {
            compiler: lookup("compiler", &selection.compiler, &self.compilers, |p| p.name())?,
            parser: lookup("test parser", &selection.parser, &self.parsers, |p| p.name())?,
            extractor: lookup("coverage extractor", &selection.extractor, &self.extractors, |p| p.name())?,
            validator: lookup("coverage validator", &selection.validator, &self.validators, |p| p.name())?,
        };
        plugins.check()?;

        tracing::debug!(?plugins, "plugins selected");
        Ok(plugins)
    }
}

fn lookup<T: ?Sized>(
    kind: &'static str,
    name: &str,
    entries: &[Arc<T>],
    name_of: impl Fn(&T) -> &str,
) -> Result<Arc<T>, SetupError> {
    entries
        .iter()
        .find(|entry| name_of(entry.as_ref()) == name)
        .cloned()
        .ok_or_else(|| SetupError::UnknownPlugin {
            kind,
            name: name.to_string(),
            available: entries
                .iter()
                .map(|entry| name_of(entry.as_ref()))
                .collect::<Vec<_>>()
                .join(", "),
        })
}
