// src/lib.rs

//! Run external commands with strict bounds on wall time and resource
//! usage, capture their output while they run, and always get an integer
//! exit code back, even when the child hangs, spawns runaway
//! grandchildren, or never starts at all.
//!
//! The single entry point is [`run`] (async; [`run_blocking`] for sync
//! callers). It spawns the child, consumes stdout/stderr concurrently,
//! enforces the timeout and stop predicate, kills the whole process
//! subtree on every abort path, and returns a [`RunResult`]. It never
//! returns an error and never panics: failures are folded into a reserved
//! negative exit-code range disjoint from the 0-255 children use.
//!
//! ```no_run
//! # #[tokio::main]
//! # async fn main() {
//! use std::time::Duration;
//! use cmdrun::{run, RunOptions};
//!
//! let result = run(
//!     "ping -c 1 127.0.0.1",
//!     RunOptions::with_timeout(Duration::from_secs(5)),
//! )
//! .await;
//!
//! assert_eq!(result.exit_code, 0);
//! println!("{}", result.output_string());
//! # }
//! ```

pub mod config;
pub mod elevate;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod process;
pub mod types;

use std::process::Stdio;

pub use config::{CommandSpec, IoPriority, Method, Priority, RunOptions, ValidExitCodes};
pub use errors::RunnerError;
pub use exec::{
    EXIT_INTERRUPTED, EXIT_INVALID_ARGS, EXIT_IO_FAILURE, EXIT_STOPPED, EXIT_TIMEOUT,
    EXIT_UNKNOWN_FAILURE,
};
pub use types::{
    ChunkFn, ChunkSender, Encoding, OutputChunk, RunOutput, RunResult, StreamSpec,
};

/// Execute a command under supervision and return its classified result.
///
/// Accepts a command line (`"ping -c 1 127.0.0.1"`) or an argv
/// (`["ping", "-c", "1", "127.0.0.1"]`). Never fails: spawn errors,
/// timeouts, stop requests and interrupts all come back as reserved exit
/// codes in the result.
pub async fn run(command: impl Into<CommandSpec>, options: RunOptions) -> RunResult {
    exec::supervisor::execute(command.into(), options).await
}

/// Blocking variant of [`run`] for synchronous callers.
///
/// Builds a private single-threaded runtime per call; must not be called
/// from inside an async context.
pub fn run_blocking(command: impl Into<CommandSpec>, options: RunOptions) -> RunResult {
    let split = options.split_streams;
    match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime.block_on(run(command, options)),
        Err(err) => failed_result(
            format!("cannot build runtime for command execution: {}", err),
            split,
        ),
    }
}

/// Run the engine on a background task and return immediately.
///
/// The handle resolves to the same [`RunResult`] that [`run`] would
/// produce. Meant for callers that consume a queue sink while the command
/// runs. Must be called from inside a tokio runtime.
pub fn run_threaded(
    command: impl Into<CommandSpec>,
    options: RunOptions,
) -> tokio::task::JoinHandle<RunResult> {
    let command = command.into();
    tokio::spawn(run(command, options))
}

/// Launch `command` through a detached shell after roughly `defer_secs`
/// seconds, fully disconnected from this process.
///
/// Useful for self-update or self-deletion of a running executable. The
/// timer is a loopback `ping`, which exists on virtually any system; the
/// spawned shell survives this process exiting.
pub fn deferred_command(command: &str, defer_secs: u64) -> std::io::Result<()> {
    let line = if cfg!(windows) {
        format!("ping 127.0.0.1 -n {} > NUL & {}", defer_secs, command)
    } else {
        format!("ping -c {} 127.0.0.1 > /dev/null && {}", defer_secs, command)
    };

    let (shell, flag) = if cfg!(windows) {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    };

    std::process::Command::new(shell)
        .arg(flag)
        .arg(line)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
}

fn failed_result(message: String, split_streams: bool) -> RunResult {
    let chunk = Some(OutputChunk::Text(message));
    RunResult {
        exit_code: EXIT_UNKNOWN_FAILURE,
        output: if split_streams {
            RunOutput::Split {
                stdout: chunk,
                stderr: None,
            }
        } else {
            RunOutput::Merged(chunk)
        },
    }
}
