// src/config/options.rs

//! Per-run configuration.
//!
//! A `RunOptions` is built by the caller, consumed by a single run and
//! never mutated by the engine. All fields are public; the `Default`
//! implementation matches what the plain two-argument call would do.

use std::process::Stdio;
use std::time::Duration;

use crate::types::{Encoding, StreamSpec};

/// How the engine consumes child output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    /// One reader task per captured pipe; chunks are delivered to sinks
    /// while the child runs. Required for queue and callback sinks.
    #[default]
    Poller,
    /// No reader tasks: poll the child until it exits, then drain both
    /// pipes once. Lower overhead, no live delivery.
    Monitor,
}

/// Exit codes that should not be logged as errors.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ValidExitCodes {
    /// Only 0 is considered a success.
    #[default]
    ZeroOnly,
    /// Any exit code is fine.
    All,
    /// These codes (in addition to nothing else) are fine.
    List(Vec<i32>),
}

impl ValidExitCodes {
    pub fn covers(&self, code: i32) -> bool {
        match self {
            ValidExitCodes::ZeroOnly => code == 0,
            ValidExitCodes::All => true,
            ValidExitCodes::List(codes) => codes.contains(&code),
        }
    }
}

/// CPU scheduling priority for the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Normal,
    High,
    /// Raw niceness on POSIX, clamped to [-20, 19]. Mapped to the nearest
    /// priority class on Windows.
    Nice(i32),
}

/// I/O scheduling priority for the child (Linux only; accepted and
/// ignored elsewhere).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoPriority {
    Low,
    Normal,
    High,
}

/// Everything a single run can be configured with.
pub struct RunOptions {
    /// Upper bound on total wall time. `None` disables the limit.
    pub timeout: Option<Duration>,

    /// Run the command through the platform shell (`cmd.exe /C` / `sh -c`).
    pub shell: bool,

    /// Codec for child output. Defaults to UTF-8 on POSIX and CP437 on
    /// Windows; [`Encoding::Raw`] disables decoding entirely.
    pub encoding: Encoding,

    /// Handle passed to the child as stdin at spawn time. `None` inherits
    /// the caller's stdin.
    pub stdin: Option<Stdio>,

    /// Destination for the child's stdout.
    pub stdout: StreamSpec,

    /// Destination for the child's stderr. The default merges it into
    /// stdout.
    pub stderr: StreamSpec,

    /// Return (exit, stdout, stderr) instead of (exit, merged).
    pub split_streams: bool,

    /// Echo captured output to the caller's own stdout as it arrives.
    pub live_output: bool,

    /// Poller or monitor; see [`Method`].
    pub method: Method,

    /// Supervisor tick. Timeout, stop predicate and heartbeat are all
    /// evaluated at this granularity.
    pub check_interval: Duration,

    /// External stop predicate, polled every tick. Returning true aborts
    /// the run with exit code -251.
    pub stop_on: Option<Box<dyn Fn() -> bool + Send + Sync>>,

    /// Invoked once with the child's pid, after spawn and before the
    /// first supervisor tick.
    pub process_callback: Option<Box<dyn FnOnce(u32) + Send + Sync>>,

    /// Invoked after the result has been classified, before the engine
    /// returns.
    pub on_exit: Option<Box<dyn FnOnce() + Send + Sync>>,

    /// Exit codes that must not produce error logs.
    pub valid_exit_codes: ValidExitCodes,

    /// Suppress non-debug log emission for this run.
    pub silent: bool,

    pub priority: Option<Priority>,
    pub io_priority: Option<IoPriority>,

    /// Emit a "still running" log line every this often while the child
    /// runs.
    pub heartbeat: Option<Duration>,

    /// Suppress the console window on Windows.
    pub windows_no_window: bool,

    /// Pipe read chunk size.
    pub bufsize: usize,
}

pub(crate) const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(50);
pub(crate) const DEFAULT_BUFSIZE: usize = 16_384;

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            shell: false,
            encoding: Encoding::platform_default(),
            stdin: None,
            stdout: StreamSpec::Capture,
            stderr: StreamSpec::Merge,
            split_streams: false,
            live_output: false,
            method: Method::default(),
            check_interval: DEFAULT_CHECK_INTERVAL,
            stop_on: None,
            process_callback: None,
            on_exit: None,
            valid_exit_codes: ValidExitCodes::default(),
            silent: false,
            priority: None,
            io_priority: None,
            heartbeat: None,
            windows_no_window: false,
            bufsize: DEFAULT_BUFSIZE,
        }
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("timeout", &self.timeout)
            .field("shell", &self.shell)
            .field("encoding", &self.encoding)
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .field("split_streams", &self.split_streams)
            .field("live_output", &self.live_output)
            .field("method", &self.method)
            .field("check_interval", &self.check_interval)
            .field("valid_exit_codes", &self.valid_exit_codes)
            .field("silent", &self.silent)
            .field("priority", &self.priority)
            .field("io_priority", &self.io_priority)
            .field("heartbeat", &self.heartbeat)
            .field("windows_no_window", &self.windows_no_window)
            .field("bufsize", &self.bufsize)
            .finish_non_exhaustive()
    }
}

impl RunOptions {
    /// Convenience constructor for the most common case.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_capture_and_merge() {
        let opts = RunOptions::default();
        assert!(matches!(opts.stdout, StreamSpec::Capture));
        assert!(matches!(opts.stderr, StreamSpec::Merge));
        assert_eq!(opts.method, Method::Poller);
        assert_eq!(opts.bufsize, DEFAULT_BUFSIZE);
        assert!(opts.timeout.is_none());
    }

    #[test]
    fn valid_exit_codes_coverage() {
        assert!(ValidExitCodes::ZeroOnly.covers(0));
        assert!(!ValidExitCodes::ZeroOnly.covers(7));
        assert!(ValidExitCodes::All.covers(-254));
        assert!(ValidExitCodes::List(vec![1, 7]).covers(7));
        assert!(!ValidExitCodes::List(vec![1, 7]).covers(0));
    }
}
