// src/exec/spawn.rs

//! Child process creation.
//!
//! The spawner turns a resolved command plus per-stream stdio plans into a
//! running `tokio::process::Child`. Captured streams get anonymous pipes;
//! file and discard destinations are wired at the OS level so their bytes
//! never travel through the engine.
//!
//! On POSIX the child becomes its own process-group leader, which is what
//! makes whole-subtree signalling possible later. On Windows the same job
//! is done by creation flags, which also carry the priority class and the
//! optional no-window request.

use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::{CommandSpec, RunOptions};
use crate::errors::{Result, RunnerError};

/// Where one child stream is pointed at the OS level.
pub(crate) enum StdioPlan {
    /// Anonymous pipe, consumed by a pump or drained by the monitor.
    Piped,
    /// `/dev/null` / `NUL`.
    Null,
    /// An already-open file handle (the engine owns and closes the
    /// original; this is a duplicate for the child).
    ToFile(std::fs::File),
}

impl StdioPlan {
    fn into_stdio(self) -> Stdio {
        match self {
            StdioPlan::Piped => Stdio::piped(),
            StdioPlan::Null => Stdio::null(),
            StdioPlan::ToFile(file) => Stdio::from(file),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Spawned {
    pub child: Child,
    pub pid: u32,
}

/// Launch the child. Spawn errors are not classified here; the supervisor
/// owns the mapping to exit codes.
pub(crate) fn spawn_child(
    command: &CommandSpec,
    options: &mut RunOptions,
    stdout: StdioPlan,
    stderr: StdioPlan,
) -> Result<Spawned> {
    let (program, args) = command.resolve(options.shell)?;

    let mut cmd = Command::new(&program);
    cmd.args(&args);

    let stdin = options
        .stdin
        .take()
        .unwrap_or_else(Stdio::inherit);
    cmd.stdin(stdin)
        .stdout(stdout.into_stdio())
        .stderr(stderr.into_stdio())
        .kill_on_drop(true);

    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            // New process group, so the whole subtree can be signalled as
            // one unit.
            if libc::setpgid(0, 0) == 0 {
                Ok(())
            } else {
                Err(std::io::Error::last_os_error())
            }
        });
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Threading::{
            CREATE_NEW_PROCESS_GROUP, CREATE_NO_WINDOW,
        };

        let mut flags = CREATE_NEW_PROCESS_GROUP;
        if options.windows_no_window {
            flags |= CREATE_NO_WINDOW;
        }
        flags |= crate::process::priority::creation_flags_for(options.priority);
        crate::process::priority::note_ignored_io_priority(options.io_priority);
        cmd.creation_flags(flags);
    }

    let child = cmd.spawn().map_err(RunnerError::Spawn)?;
    let pid = child.id().unwrap_or_default();
    debug!(pid, program = %program, "child spawned");

    #[cfg(unix)]
    crate::process::priority::apply_posix(pid, options.priority, options.io_priority);

    Ok(Spawned { child, pid })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawned_child_is_its_own_group_leader() {
        let mut options = RunOptions::default();
        options.stdin = Some(Stdio::null());
        let spec = CommandSpec::from("sleep 2");
        let mut spawned =
            spawn_child(&spec, &mut options, StdioPlan::Null, StdioPlan::Null).unwrap();

        let pgid = nix::unistd::getpgid(Some(nix::unistd::Pid::from_raw(spawned.pid as i32)))
            .expect("getpgid");
        assert_eq!(pgid.as_raw(), spawned.pid as i32);

        spawned.child.kill().await.expect("kill");
        let _ = spawned.child.wait().await;
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let mut options = RunOptions::default();
        let spec = CommandSpec::from("this_binary_does_not_exist_xyz");
        let err = spawn_child(&spec, &mut options, StdioPlan::Piped, StdioPlan::Piped)
            .expect_err("spawn should fail");
        assert!(matches!(err, RunnerError::Spawn(_)));
    }
}
