// src/config/command.rs

//! Command normalization.
//!
//! A command arrives either as an argv vector or as a single line. Shell
//! execution wraps the line in the platform shell; direct execution of a
//! line lexes it with shell rules first (the safer default, no shell
//! involved).

use crate::errors::{Result, RunnerError};

/// A command to execute: explicit argv, or a single command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSpec {
    Argv(Vec<String>),
    Line(String),
}

impl From<&str> for CommandSpec {
    fn from(line: &str) -> Self {
        CommandSpec::Line(line.to_string())
    }
}

impl From<String> for CommandSpec {
    fn from(line: String) -> Self {
        CommandSpec::Line(line)
    }
}

impl From<Vec<String>> for CommandSpec {
    fn from(argv: Vec<String>) -> Self {
        CommandSpec::Argv(argv)
    }
}

impl From<&[&str]> for CommandSpec {
    fn from(argv: &[&str]) -> Self {
        CommandSpec::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for CommandSpec {
    fn from(argv: [&str; N]) -> Self {
        CommandSpec::Argv(argv.iter().map(|s| s.to_string()).collect())
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandSpec::Line(line) => f.write_str(line),
            CommandSpec::Argv(argv) => f.write_str(&argv.join(" ")),
        }
    }
}

impl CommandSpec {
    /// Resolve to the program + arguments actually handed to the OS.
    ///
    /// With `shell` set, the whole line goes through `cmd.exe /C` or
    /// `sh -c` verbatim (an argv is joined first). Without it, a line is
    /// lexed with shell-words rules; an unterminated quote is an
    /// invocation error.
    pub(crate) fn resolve(&self, shell: bool) -> Result<(String, Vec<String>)> {
        if shell {
            let line = self.to_string();
            return Ok(if cfg!(windows) {
                ("cmd".to_string(), vec!["/C".to_string(), line])
            } else {
                ("sh".to_string(), vec!["-c".to_string(), line])
            });
        }

        let argv = match self {
            CommandSpec::Argv(argv) => argv.clone(),
            CommandSpec::Line(line) => shlex::split(line).ok_or_else(|| {
                RunnerError::Invalid(format!("cannot lex command line {:?}", line))
            })?,
        };

        match argv.split_first() {
            Some((program, args)) => Ok((program.clone(), args.to_vec())),
            None => Err(RunnerError::Invalid("empty command".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_is_lexed_without_shell() {
        let spec = CommandSpec::from("echo 'hello world' done");
        let (program, args) = spec.resolve(false).unwrap();
        assert_eq!(program, "echo");
        assert_eq!(args, vec!["hello world", "done"]);
    }

    #[test]
    fn argv_passes_through_untouched() {
        let spec = CommandSpec::from(["ping", "-c", "1", "127.0.0.1"]);
        let (program, args) = spec.resolve(false).unwrap();
        assert_eq!(program, "ping");
        assert_eq!(args, vec!["-c", "1", "127.0.0.1"]);
    }

    #[cfg(unix)]
    #[test]
    fn shell_wraps_the_verbatim_line() {
        let spec = CommandSpec::from("echo a && echo b");
        let (program, args) = spec.resolve(true).unwrap();
        assert_eq!(program, "sh");
        assert_eq!(args, vec!["-c", "echo a && echo b"]);
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        let spec = CommandSpec::from("echo 'oops");
        assert!(spec.resolve(false).is_err());
    }

    #[test]
    fn empty_command_is_an_error() {
        let spec = CommandSpec::Argv(vec![]);
        assert!(spec.resolve(false).is_err());
    }
}
