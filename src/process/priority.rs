// src/process/priority.rs

//! CPU and I/O scheduling priority for the child process.
//!
//! POSIX niceness and the Linux I/O class are applied from the parent
//! right after spawn, keyed by pid. On Windows the priority class travels
//! in the process creation flags instead (see the spawner); the I/O class
//! has no supported user-mode API there and is ignored with a log line.

use tracing::debug;
#[cfg(unix)]
use tracing::warn;

use crate::config::options::{IoPriority, Priority};

#[cfg(unix)]
pub(crate) fn apply_posix(pid: u32, priority: Option<Priority>, io_priority: Option<IoPriority>) {
    if let Some(priority) = priority {
        let nice = niceness_of(priority);
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS as _, pid as _, nice) };
        if rc != 0 {
            warn!(
                pid,
                nice,
                error = %std::io::Error::last_os_error(),
                "failed to set child niceness"
            );
        } else {
            debug!(pid, nice, "child niceness set");
        }
    }

    if let Some(io_priority) = io_priority {
        apply_io_class(pid, io_priority);
    }
}

#[cfg(unix)]
fn niceness_of(priority: Priority) -> i32 {
    match priority {
        Priority::Low => 15,
        Priority::Normal => 0,
        Priority::High => -15,
        Priority::Nice(n) => n.clamp(-20, 19),
    }
}

#[cfg(target_os = "linux")]
fn apply_io_class(pid: u32, io_priority: IoPriority) {
    // ioprio_set(2): priority word is class << 13 | data.
    const IOPRIO_WHO_PROCESS: libc::c_int = 1;
    const IOPRIO_CLASS_SHIFT: i32 = 13;
    let (class, data): (i32, i32) = match io_priority {
        IoPriority::High => (1, 4),   // IOPRIO_CLASS_RT; needs privileges
        IoPriority::Normal => (2, 4), // IOPRIO_CLASS_BE
        IoPriority::Low => (3, 0),    // IOPRIO_CLASS_IDLE
    };
    let prio = (class << IOPRIO_CLASS_SHIFT) | data;
    let rc = unsafe { libc::syscall(libc::SYS_ioprio_set, IOPRIO_WHO_PROCESS, pid, prio) };
    if rc != 0 {
        warn!(
            pid,
            class,
            error = %std::io::Error::last_os_error(),
            "failed to set child I/O priority"
        );
    } else {
        debug!(pid, class, "child I/O priority set");
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn apply_io_class(pid: u32, io_priority: IoPriority) {
    debug!(pid, ?io_priority, "I/O priority not supported on this platform, ignoring");
}

#[cfg(windows)]
pub(crate) fn creation_flags_for(priority: Option<Priority>) -> u32 {
    use windows_sys::Win32::System::Threading::{
        BELOW_NORMAL_PRIORITY_CLASS, HIGH_PRIORITY_CLASS, NORMAL_PRIORITY_CLASS,
    };

    match priority {
        Some(Priority::Low) => BELOW_NORMAL_PRIORITY_CLASS,
        Some(Priority::High) => HIGH_PRIORITY_CLASS,
        Some(Priority::Normal) => NORMAL_PRIORITY_CLASS,
        Some(Priority::Nice(n)) if n > 0 => BELOW_NORMAL_PRIORITY_CLASS,
        Some(Priority::Nice(n)) if n < 0 => HIGH_PRIORITY_CLASS,
        Some(Priority::Nice(_)) => NORMAL_PRIORITY_CLASS,
        None => 0,
    }
}

#[cfg(windows)]
pub(crate) fn note_ignored_io_priority(io_priority: Option<IoPriority>) {
    if let Some(io_priority) = io_priority {
        debug!(?io_priority, "I/O priority is not supported on Windows, ignoring");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn niceness_values_match_priority_levels() {
        assert_eq!(niceness_of(Priority::Low), 15);
        assert_eq!(niceness_of(Priority::Normal), 0);
        assert_eq!(niceness_of(Priority::High), -15);
    }

    #[test]
    fn raw_niceness_is_clamped() {
        assert_eq!(niceness_of(Priority::Nice(100)), 19);
        assert_eq!(niceness_of(Priority::Nice(-100)), -20);
        assert_eq!(niceness_of(Priority::Nice(5)), 5);
    }
}
