//! Test item discovery
//!
//! File-granular compilers: every file below a directory named exactly like the marker (default `tests`).
//! Directory-granular compilers: every directory whose name contains `.{marker}.`; matched directories are
//! not searched further.
//!
//! A sibling file named `<item>-ignore` removes an item from the run. Hidden directories, the generated-artifacts
//! directory and the run's own output directory are never entered.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use testrig_core::{Compiler, Granularity};

const IGNORE_SUFFIX: &str = "-ignore";

/// What a tree walk found.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Test items, sorted.
    pub items: Vec<PathBuf>,
    /// Candidates the compiler does not support (reported in verbose mode, never an error).
    pub unsupported: Vec<PathBuf>,
    /// Candidates skipped because of an ignore marker.
    pub ignored: Vec<PathBuf>,
}

/// Tree walker bound to one compiler and marker.
pub struct Discovery<'a> {
    compiler: &'a dyn Compiler,
    marker: String,
    generated_dir_name: String,
    excluded: Vec<PathBuf>,
}

impl<'a> Discovery<'a> {
    pub fn new(compiler: &'a dyn Compiler, marker: impl Into<String>) -> Self {
        Self {
            compiler,
            marker: marker.into(),
            generated_dir_name: "Generated".to_string(),
            excluded: Vec::new(),
        }
    }

    /// Directory name never entered while walking.
    pub fn with_generated_dir_name(mut self, name: impl Into<String>) -> Self {
        self.generated_dir_name = name.into();
        self
    }

    /// A specific directory never entered while walking (typically the run's output directory).
    pub fn exclude(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.excluded.push(fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf()));
        self
    }

    pub fn discover(&self, root: &Path) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        match self.compiler.granularity() {
            Granularity::File => {
                let under_marker = root.file_name().is_some_and(|n| n == self.marker.as_str());
                self.walk_files(root, under_marker, &mut report);
            }
            Granularity::Directory => {
                if self.is_directory_candidate(root) {
                    self.classify(root, &mut report);
                } else {
                    self.walk_directories(root, &mut report);
                }
            }
        }

        report.items.sort();
        report.unsupported.sort();
        report.ignored.sort();
        tracing::debug!(
            root = %root.display(),
            items = report.items.len(),
            unsupported = report.unsupported.len(),
            ignored = report.ignored.len(),
            "discovery complete"
        );
        report
    }

    fn walk_files(&self, dir: &Path, under_marker: bool, report: &mut DiscoveryReport) {
        for entry_path in self.read_dir(dir) {
            if entry_path.is_dir() {
                if self.should_enter(&entry_path) {
                    let nested = under_marker || entry_path.file_name().is_some_and(|n| n == self.marker.as_str());
                    self.walk_files(&entry_path, nested, report);
                }
            } else if under_marker && !is_ignore_marker(&entry_path) {
                if has_ignore_marker(&entry_path) {
                    report.ignored.push(entry_path);
                } else if !self.compiler.is_supported(&entry_path) {
                    tracing::debug!(path = %entry_path.display(), "unsupported by {}", self.compiler.name());
                    report.unsupported.push(entry_path);
                } else if self.compiler.is_valid_test_item(&entry_path) {
                    report.items.push(entry_path);
                }
            }
        }
    }

    fn walk_directories(&self, dir: &Path, report: &mut DiscoveryReport) {
        for entry_path in self.read_dir(dir) {
            if !entry_path.is_dir() || !self.should_enter(&entry_path) {
                continue;
            }
            if self.is_directory_candidate(&entry_path) {
                self.classify(&entry_path, report);
            } else {
                self.walk_directories(&entry_path, report);
            }
        }
    }

    fn classify(&self, dir: &Path, report: &mut DiscoveryReport) {
        if has_ignore_marker(dir) {
            report.ignored.push(dir.to_path_buf());
        } else if self.compiler.is_supported(dir) && self.compiler.is_valid_test_item(dir) {
            report.items.push(dir.to_path_buf());
        } else {
            tracing::debug!(path = %dir.display(), "unsupported by {}", self.compiler.name());
            report.unsupported.push(dir.to_path_buf());
        }
    }

    fn is_directory_candidate(&self, dir: &Path) -> bool {
        let needle = format!(".{}.", self.marker);
        dir.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.contains(&needle))
    }

    fn should_enter(&self, dir: &Path) -> bool {
        let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.starts_with('.') || name == self.generated_dir_name {
            return false;
        }
        if self.excluded.is_empty() {
            return true;
        }
        let canonical = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        !self.excluded.contains(&canonical)
    }

    fn read_dir(&self, dir: &Path) -> Vec<PathBuf> {
        match fs::read_dir(dir) {
            Ok(entries) => {
                let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
                paths.sort();
                paths
            }
            Err(e) => {
                tracing::warn!("cannot read directory {}: {}", dir.display(), e);
                Vec::new()
            }
        }
    }
}

/// Path of the marker file that excludes `item` from runs.
pub fn ignore_marker_path(item: &Path) -> PathBuf {
    let mut marker = OsString::from(item.as_os_str());
    marker.push(IGNORE_SUFFIX);
    PathBuf::from(marker)
}

pub fn has_ignore_marker(item: &Path) -> bool {
    ignore_marker_path(item).exists()
}

fn is_ignore_marker(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(IGNORE_SUFFIX))
}
