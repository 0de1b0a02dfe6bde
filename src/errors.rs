// src/errors.rs

//! Crate-wide error types.
//!
//! These never cross the public `run` boundary (the supervisor folds every
//! failure into a reserved exit code), but internal plumbing propagates them
//! with `?` like any other crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    /// The command or option combination cannot be executed as given
    /// (e.g. an unlexable command line, or a queue sink with the monitor
    /// method).
    #[error("invalid invocation: {0}")]
    Invalid(String),

    /// The child process could not be spawned (binary not found,
    /// permission denied, ...).
    #[error("spawn failed: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RunnerError>;
