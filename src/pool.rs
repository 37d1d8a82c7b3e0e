//! Bounded worker pool
//!
//! Tasks are queued in submission order and pulled by a fixed number of scoped worker threads. A task is a blocking
//! unit of work (subprocess + file I/O) that returns a status code; the pool's result is the first non-zero status
//! in submission order, or `0`.
//!
//! Tasks may borrow from the caller: the pool only returns once every task has finished.

use std::any::Any;
use std::collections::VecDeque;
use std::io::{self, IsTerminal, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// Shared, thread-safe sink for user-facing run output.
#[derive(Clone)]
pub struct OutputStream {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
    terminal: bool,
}

impl OutputStream {
    /// Standard output; colored when stdout is an interactive terminal.
    pub fn stdout() -> Self {
        let terminal = io::stdout().is_terminal();
        Self::from_writer(io::stdout(), terminal)
    }

    pub fn from_writer(writer: impl Write + Send + 'static, terminal: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
            terminal,
        }
    }

    /// An in-memory stream (never a terminal) plus a handle to read what was written.
    pub fn capture() -> (Self, CapturedOutput) {
        let captured = CapturedOutput::default();
        (Self::from_writer(captured.clone(), false), captured)
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Write a block of text atomically with respect to other writers.
    pub fn write_str(&self, text: &str) {
        let mut writer = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writer.write_all(text.as_bytes()).and_then(|()| writer.flush()) {
            tracing::warn!("failed to write run output: {}", e);
        }
    }

    pub fn write_line(&self, line: &str) {
        let mut text = String::with_capacity(line.len() + 1);
        text.push_str(line);
        text.push('\n');
        self.write_str(&text);
    }
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream").field("terminal", &self.terminal).finish()
    }
}

/// Buffer behind [`OutputStream::capture`].
#[derive(Clone, Default)]
pub struct CapturedOutput(Arc<Mutex<Vec<u8>>>);

impl CapturedOutput {
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

type TaskFn<'a> = Box<dyn FnOnce(usize, &OutputStream) -> i32 + Send + 'a>;

/// A named unit of work. The closure receives its task index and the run's output stream.
pub struct Task<'a> {
    pub name: String,
    pub status: String,
    run: TaskFn<'a>,
}

impl<'a> Task<'a> {
    pub fn new(
        name: impl Into<String>,
        status: impl Into<String>,
        run: impl FnOnce(usize, &OutputStream) -> i32 + Send + 'a,
    ) -> Self {
        Self {
            name: name.into(),
            status: status.into(),
            run: Box::new(run),
        }
    }
}

impl std::fmt::Debug for Task<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Fixed-width pool of blocking workers.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    max_width: usize,
}

impl WorkerPool {
    pub fn new(max_width: usize) -> Self {
        Self {
            max_width: max_width.max(1),
        }
    }

    pub fn max_width(&self) -> usize {
        self.max_width
    }

    /// Run `tasks` on at most `concurrency` workers and wait for all of them.
    ///
    /// Returns the first non-zero task status in submission order, else `0`. A panicking task counts as `-1`.
    pub fn execute(&self, tasks: Vec<Task<'_>>, concurrency: usize, output: &OutputStream) -> i32 {
        if tasks.is_empty() {
            return 0;
        }

        let total = tasks.len();
        let width = concurrency.clamp(1, self.max_width).min(total);
        tracing::debug!(tasks = total, width, "dispatching tasks");

        let queue: Mutex<VecDeque<(usize, Task<'_>)>> = Mutex::new(tasks.into_iter().enumerate().collect());
        let statuses: Mutex<Vec<Option<i32>>> = Mutex::new(vec![None; total]);

        thread::scope(|scope| {
            for worker in 0..width {
                let queue = &queue;
                let statuses = &statuses;
                scope.spawn(move || {
                    loop {
                        let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
                        let Some((index, task)) = next else {
                            break;
                        };

                        tracing::debug!(worker, task = %task.name, "{}", task.status);
                        let status = run_task(index, task, output);
                        statuses.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(status);
                    }
                });
            }
        });

        statuses
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .into_iter()
            .flatten()
            .find(|status| *status != 0)
            .unwrap_or(0)
    }
}

fn run_task(index: usize, task: Task<'_>, output: &OutputStream) -> i32 {
    let Task { name, run, .. } = task;
    match panic::catch_unwind(AssertUnwindSafe(|| run(index, output))) {
        Ok(status) => status,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(task = %name, "task panicked: {}", message);
            output.write_line(&format!("{name}: task panicked: {message}"));
            -1
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
