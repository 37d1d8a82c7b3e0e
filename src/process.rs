//! Captured process execution used by the built-in plugins.
//!
//! stdout and stderr are captured separately and joined (stdout first), the same way a terminal user would read
//! them after the fact. There is no timeout: a hung child occupies its worker until it exits.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

use testrig_core::{PluginError, PluginResult};

/// Result of a finished child process.
#[derive(Debug, Clone)]
pub struct CapturedRun {
    /// Exit code, or `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    /// Combined stdout + stderr.
    pub output: String,
    pub duration: Duration,
}

impl CapturedRun {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run `command` to completion and capture its output.
pub fn run_captured(command: &mut Command) -> PluginResult<CapturedRun> {
    let program = command.get_program().to_string_lossy().into_owned();
    tracing::debug!(program = %program, "spawning process");

    let start = Instant::now();
    let output = command
        .output()
        .map_err(|source| PluginError::Spawn { program, source })?;
    let duration = start.elapsed();

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let combined = match (stdout.is_empty(), stderr.is_empty()) {
        (_, true) => stdout.into_owned(),
        (true, false) => stderr.into_owned(),
        (false, false) => format!("{}\n{}", stdout, stderr),
    };

    Ok(CapturedRun {
        exit_code: output.status.code().unwrap_or(-1),
        output: combined,
        duration,
    })
}

/// Build a command that runs `command_line` through the platform shell.
pub fn shell_command(command_line: &str) -> Command {
    if cfg!(windows) {
        let mut command = Command::new("cmd");
        command.arg("/C").arg(command_line);
        command
    } else {
        let mut command = Command::new("sh");
        command.arg("-c").arg(command_line);
        command
    }
}

/// Whether `program` can be launched (probes `<program> --version`).
pub fn program_available(program: impl AsRef<OsStr>) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Quote a path for inclusion in a shell command line.
pub fn quote_path(path: &Path) -> String {
    let text = path.to_string_lossy();
    if cfg!(windows) {
        format!("\"{}\"", text)
    } else {
        format!("'{}'", text.replace('\'', r"'\''"))
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_captures_exit_code_and_combined_output() {
        let run = run_captured(&mut shell_command("echo out; echo err 1>&2; exit 3")).unwrap();
        assert_eq!(run.exit_code, 3);
        assert!(!run.success());
        assert_eq!(run.output, "out\n\nerr\n");
    }

    #[test]
    fn test_stdout_precedes_stderr_regardless_of_write_order() {
        let run = run_captured(&mut shell_command("echo first 1>&2; echo second")).unwrap();
        assert_eq!(run.output, "second\n\nfirst\n");
    }

    #[test]
    fn test_stdout_only() {
        let run = run_captured(&mut shell_command("echo hello")).unwrap();
        assert!(run.success());
        assert_eq!(run.output, "hello\n");
    }

    #[test]
    fn test_missing_program_is_a_spawn_error() {
        let err = run_captured(&mut Command::new("definitely-not-a-real-program-testrig")).unwrap_err();
        assert!(matches!(err, PluginError::Spawn { .. }));
    }

    #[test]
    fn test_quote_path_escapes_single_quotes() {
        assert_eq!(quote_path(Path::new("/tmp/it's")), r"'/tmp/it'\''s'");
        let run = run_captured(&mut shell_command(&format!("echo {}", quote_path(Path::new("a b"))))).unwrap();
        assert_eq!(run.output, "a b\n");
    }
}
