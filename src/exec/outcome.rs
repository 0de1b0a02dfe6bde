// src/exec/outcome.rs

//! Internal run outcome and its mapping to the public exit-code scheme.
//!
//! Nothing in the engine signals failure by unwinding: every way a run can
//! end is a variant here, and `classify` turns the variant into the
//! integer + message the caller sees. Children are expected to use 0-255,
//! so the reserved negative range can never collide with a native code.

use std::process::ExitStatus;
use std::time::Duration;

use crate::config::CommandSpec;

/// Argument or option combination that cannot be executed.
pub const EXIT_INVALID_ARGS: i32 = -250;
/// The `stop_on` predicate returned true.
pub const EXIT_STOPPED: i32 = -251;
/// A keyboard interrupt arrived during execution.
pub const EXIT_INTERRUPTED: i32 = -252;
/// Spawn-time or I/O failure (binary not found, OS error).
pub const EXIT_IO_FAILURE: i32 = -253;
/// The wall-clock timeout elapsed.
pub const EXIT_TIMEOUT: i32 = -254;
/// Any other failure inside the engine.
pub const EXIT_UNKNOWN_FAILURE: i32 = -255;

/// How a single run ended, before classification.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// The child exited on its own.
    Completed(ExitStatus),
    /// The engine killed the subtree because the deadline passed.
    TimedOut(Duration),
    /// The engine killed the subtree because `stop_on` returned true.
    Stopped,
    /// The engine killed the subtree after a keyboard interrupt.
    Interrupted,
    /// The child never started, or waiting on it failed.
    IoFailure(std::io::Error),
    /// The invocation itself was rejected before spawn.
    Invalid(String),
    /// Anything else.
    Other(anyhow::Error),
}

/// Classified terminal state: the exit code plus an explanatory message
/// for every non-natural ending.
pub(crate) struct Classified {
    pub exit_code: i32,
    pub message: Option<String>,
    /// Partial output should be appended after the message.
    pub keep_partial_output: bool,
}

pub(crate) fn classify(outcome: &Outcome, command: &CommandSpec) -> Classified {
    match outcome {
        Outcome::Completed(status) => Classified {
            exit_code: native_code(status),
            message: None,
            keep_partial_output: true,
        },
        Outcome::TimedOut(timeout) => Classified {
            exit_code: EXIT_TIMEOUT,
            message: Some(format!(
                "Timeout of {} seconds expired for command '{}'.",
                timeout.as_secs_f64(),
                command
            )),
            keep_partial_output: true,
        },
        Outcome::Stopped => Classified {
            exit_code: EXIT_STOPPED,
            message: Some(format!(
                "Command '{}' was stopped because stop_on function returned true.",
                command
            )),
            keep_partial_output: true,
        },
        Outcome::Interrupted => Classified {
            exit_code: EXIT_INTERRUPTED,
            message: Some(format!(
                "Command '{}' was interrupted by keyboard.",
                command
            )),
            keep_partial_output: true,
        },
        Outcome::IoFailure(err) => Classified {
            exit_code: EXIT_IO_FAILURE,
            message: Some(format!("Command '{}' failed, reason: {}", command, err)),
            keep_partial_output: false,
        },
        Outcome::Invalid(reason) => Classified {
            exit_code: EXIT_INVALID_ARGS,
            message: Some(format!("Command '{}' cannot run: {}", command, reason)),
            keep_partial_output: false,
        },
        Outcome::Other(err) => Classified {
            exit_code: EXIT_UNKNOWN_FAILURE,
            message: Some(format!(
                "Command '{}' failed for unknown reasons: {}",
                command, err
            )),
            keep_partial_output: false,
        },
    }
}

/// Native exit code of a child that ended by itself.
///
/// On POSIX a signal death maps to the `128 + signal` shell convention.
/// This is only consulted for natural exits; engine-initiated kills carry
/// their own reserved code and never reach this function.
fn native_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    EXIT_UNKNOWN_FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd() -> CommandSpec {
        CommandSpec::from("true")
    }

    #[test]
    fn reserved_codes_are_disjoint_from_native_range() {
        for code in [
            EXIT_INVALID_ARGS,
            EXIT_STOPPED,
            EXIT_INTERRUPTED,
            EXIT_IO_FAILURE,
            EXIT_TIMEOUT,
            EXIT_UNKNOWN_FAILURE,
        ] {
            assert!(code < 0, "reserved codes must be negative, got {code}");
        }
    }

    #[test]
    fn timeout_message_names_the_timeout() {
        let classified = classify(&Outcome::TimedOut(Duration::from_secs(3)), &cmd());
        assert_eq!(classified.exit_code, EXIT_TIMEOUT);
        assert!(classified.message.unwrap().contains("Timeout"));
    }

    #[test]
    fn spawn_failure_message_mentions_failed() {
        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let classified = classify(&Outcome::IoFailure(err), &cmd());
        assert_eq!(classified.exit_code, EXIT_IO_FAILURE);
        assert!(classified.message.unwrap().contains("failed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn natural_signal_death_maps_to_shell_convention() {
        use std::process::Stdio;

        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("kill -TERM $$")
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn");
        let status = child.wait().await.expect("wait");

        let classified = classify(&Outcome::Completed(status), &cmd());
        assert_eq!(classified.exit_code, 128 + libc::SIGTERM);
    }
}
