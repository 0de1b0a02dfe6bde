// src/process/kill_tree.rs

//! Terminate a process together with every descendant it has spawned.
//!
//! POSIX children are spawned as their own process-group leaders, so the
//! whole tree is reachable with one `killpg`: SIGTERM first, SIGKILL for
//! whatever survives the grace window.
//!
//! Windows has no process groups to signal, so the tree is discovered from
//! a Toolhelp32 snapshot: build the parent → children map, walk down from
//! the root and `TerminateProcess` youngest-first. A second snapshot after
//! the grace window catches children born between the walk and the kill.
//! Descendants orphaned by an already-dead parent are unreachable from the
//! snapshot and stay that way.

use std::time::Duration;

/// How long the polite phase gets before escalation.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(500);

/// Kill `pid` and all its descendants. Never fails; best effort against
/// processes that die or reparent mid-walk.
pub async fn kill_tree(pid: u32, grace: Duration) {
    #[cfg(unix)]
    posix::kill_group(pid, grace).await;

    #[cfg(windows)]
    windows::kill_snapshot_tree(pid, grace).await;
}

#[cfg(unix)]
mod posix {
    use std::time::{Duration, Instant};

    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    use tracing::{debug, warn};

    const GROUP_POLL: Duration = Duration::from_millis(25);

    pub(super) async fn kill_group(pid: u32, grace: Duration) {
        let pgid = Pid::from_raw(pid as i32);

        match killpg(pgid, Signal::SIGTERM) {
            Ok(()) => debug!(pid, "sent SIGTERM to process group"),
            Err(Errno::ESRCH) => {
                debug!(pid, "process group already gone");
                return;
            }
            Err(err) => warn!(pid, error = %err, "failed to SIGTERM process group"),
        }

        // Give the polite signal up to `grace` to take effect, polling so a
        // promptly-dying tree does not pay the full window.
        let deadline = Instant::now() + grace;
        loop {
            tokio::time::sleep(GROUP_POLL).await;
            if killpg(pgid, None) == Err(Errno::ESRCH) {
                debug!(pid, "process group exited within grace period");
                return;
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) => warn!(pid, "process group survived SIGTERM, escalated to SIGKILL"),
            Err(Errno::ESRCH) => debug!(pid, "process group exited within grace period"),
            Err(err) => warn!(pid, error = %err, "failed to SIGKILL process group"),
        }
    }
}

#[cfg(windows)]
mod windows {
    use std::collections::HashMap;
    use std::time::Duration;

    use tracing::{debug, warn};
    use windows_sys::Win32::Foundation::{CloseHandle, FILETIME, HANDLE, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
        TH32CS_SNAPPROCESS,
    };
    use windows_sys::Win32::System::Threading::{
        GetProcessTimes, OpenProcess, TerminateProcess, PROCESS_QUERY_LIMITED_INFORMATION,
        PROCESS_TERMINATE,
    };

    pub(super) async fn kill_snapshot_tree(root: u32, grace: Duration) {
        let first = kill_pass(root);
        tokio::time::sleep(grace).await;
        // Children of grandchildren may have appeared after the first
        // snapshot was taken; one more pass catches them.
        let second = kill_pass(root);
        if second > 0 {
            warn!(
                pid = root,
                killed = second,
                "late-born descendants terminated on second pass"
            );
        }
        debug!(pid = root, killed = first + second, "subtree termination done");
    }

    /// One snapshot + reverse-BFS kill. Returns the number of processes
    /// terminated.
    fn kill_pass(root: u32) -> usize {
        let entries = snapshot();
        if entries.is_empty() {
            return 0;
        }

        let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
        for (pid, ppid) in &entries {
            children.entry(*ppid).or_default().push(*pid);
        }

        let root_started = creation_time(root);

        // BFS from the root, remembering depth so the kill order can be
        // youngest-first (deepest descendants before their parents).
        let mut ordered: Vec<(u32, usize)> = Vec::new();
        let mut frontier = vec![(root, 0usize)];
        while let Some((pid, depth)) = frontier.pop() {
            ordered.push((pid, depth));
            if let Some(kids) = children.get(&pid) {
                for kid in kids {
                    // A pid can be recycled onto an unrelated process; a
                    // descendant can never predate its ancestor, so prefer
                    // the newest start time and skip older claimants.
                    if *kid == root {
                        continue;
                    }
                    match (root_started, creation_time(*kid)) {
                        (Some(root_t), Some(kid_t)) if kid_t < root_t => {
                            debug!(pid = kid, "skipping pid older than subtree root (pid reuse)");
                        }
                        _ => frontier.push((*kid, depth + 1)),
                    }
                }
            }
        }

        ordered.sort_by(|a, b| b.1.cmp(&a.1));

        let mut killed = 0usize;
        for (pid, _) in ordered {
            if terminate(pid) {
                killed += 1;
            }
        }
        killed
    }

    fn snapshot() -> Vec<(u32, u32)> {
        let mut out = Vec::new();
        unsafe {
            let snap: HANDLE = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0);
            if snap == INVALID_HANDLE_VALUE {
                warn!("CreateToolhelp32Snapshot failed");
                return out;
            }
            let mut entry: PROCESSENTRY32W = std::mem::zeroed();
            entry.dwSize = std::mem::size_of::<PROCESSENTRY32W>() as u32;
            if Process32FirstW(snap, &mut entry) != 0 {
                loop {
                    out.push((entry.th32ProcessID, entry.th32ParentProcessID));
                    if Process32NextW(snap, &mut entry) == 0 {
                        break;
                    }
                }
            }
            CloseHandle(snap);
        }
        out
    }

    /// Process creation time as a FILETIME tick count, for pid-reuse
    /// disambiguation. `None` when the process is gone or inaccessible.
    fn creation_time(pid: u32) -> Option<u64> {
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                return None;
            }
            let mut creation: FILETIME = std::mem::zeroed();
            let mut exit: FILETIME = std::mem::zeroed();
            let mut kernel: FILETIME = std::mem::zeroed();
            let mut user: FILETIME = std::mem::zeroed();
            let ok = GetProcessTimes(handle, &mut creation, &mut exit, &mut kernel, &mut user);
            CloseHandle(handle);
            if ok == 0 {
                return None;
            }
            Some(((creation.dwHighDateTime as u64) << 32) | creation.dwLowDateTime as u64)
        }
    }

    fn terminate(pid: u32) -> bool {
        unsafe {
            let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
            if handle.is_null() {
                return false;
            }
            let ok = TerminateProcess(handle, 1);
            CloseHandle(handle);
            if ok == 0 {
                debug!(pid, "TerminateProcess failed (may have exited already)");
                false
            } else {
                true
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[tokio::test]
    async fn kill_tree_terminates_a_process_group() {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg("sleep 30");
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
        unsafe {
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) == 0 {
                    Ok(())
                } else {
                    Err(std::io::Error::last_os_error())
                }
            });
        }
        let mut child = cmd.spawn().expect("spawn sleep");
        let pid = child.id().expect("child pid");

        kill_tree(pid, Duration::from_millis(100)).await;

        let status = tokio::time::timeout(Duration::from_secs(2), child.wait())
            .await
            .expect("child should be dead well within two seconds")
            .expect("wait succeeds");
        assert!(!status.success());
    }

    #[tokio::test]
    async fn kill_tree_on_dead_pid_is_a_no_op() {
        let mut child = tokio::process::Command::new("true")
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn true");
        let pid = child.id().expect("child pid");
        child.wait().await.expect("wait");

        // Nothing to kill; must not hang or panic.
        kill_tree(pid, Duration::from_millis(10)).await;
    }
}
