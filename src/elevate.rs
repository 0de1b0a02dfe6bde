// src/elevate.rs

//! Privilege elevation: relaunch the current executable with
//! administrator / root rights and forward its exit code.
//!
//! This is a sibling utility of the engine, not part of it. Typical use:
//!
//! ```no_run
//! fn real_main() -> i32 {
//!     println!("running with privileges");
//!     0
//! }
//!
//! fn main() {
//!     cmdrun::elevate::elevate(real_main);
//! }
//! ```

use tracing::{debug, warn};

/// Whether the current process already has administrative privileges.
pub fn is_admin() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(windows)]
    {
        unsafe { windows_sys::Win32::UI::Shell::IsUserAnAdmin() != 0 }
    }
}

/// Run `main` with elevated privileges.
///
/// Already elevated: `main` runs in-process and its return value becomes
/// the exit code. Otherwise the current executable is relaunched with the
/// original argument vector (through `sudo` on POSIX, through the
/// `runas` shell verb on Windows) and this process exits with the
/// child's code. When no elevation route exists, `main` runs unelevated
/// as a last resort.
pub fn elevate<F: FnOnce() -> i32>(main: F) -> ! {
    if is_admin() {
        debug!("already elevated, running main directly");
        std::process::exit(main());
    }

    #[cfg(unix)]
    {
        elevate_posix(main)
    }

    #[cfg(windows)]
    {
        elevate_windows(main)
    }
}

#[cfg(unix)]
fn elevate_posix<F: FnOnce() -> i32>(main: F) -> ! {
    use crate::{run_blocking, RunOptions};

    let Some(sudo) = find_in_path("sudo") else {
        warn!("cannot find sudo, running without privilege elevation");
        std::process::exit(main());
    };
    let Ok(exe) = std::env::current_exe() else {
        warn!("cannot resolve current executable, running without privilege elevation");
        std::process::exit(main());
    };

    let mut argv = vec![sudo.display().to_string(), exe.display().to_string()];
    argv.extend(std::env::args().skip(1));

    debug!(?argv, "relaunching with sudo");
    let result = run_blocking(
        argv,
        RunOptions {
            timeout: None,
            live_output: true,
            ..Default::default()
        },
    );
    std::process::exit(result.exit_code);
}

#[cfg(unix)]
fn find_in_path(name: &str) -> Option<std::path::PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

#[cfg(windows)]
fn elevate_windows<F: FnOnce() -> i32>(main: F) -> ! {
    use std::os::windows::ffi::OsStrExt;

    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{
        GetExitCodeProcess, WaitForSingleObject, INFINITE,
    };
    use windows_sys::Win32::UI::Shell::{
        ShellExecuteExW, SEE_MASK_NOCLOSEPROCESS, SHELLEXECUTEINFOW,
    };

    fn wide(s: &std::ffi::OsStr) -> Vec<u16> {
        s.encode_wide().chain(std::iter::once(0)).collect()
    }

    let Ok(exe) = std::env::current_exe() else {
        warn!("cannot resolve current executable, running without privilege elevation");
        std::process::exit(main());
    };

    // Quote each forwarded argument so spaces survive the round trip.
    let params = std::env::args()
        .skip(1)
        .map(|a| format!("\"{}\"", a))
        .collect::<Vec<_>>()
        .join(" ");

    let verb = wide(std::ffi::OsStr::new("runas"));
    let file = wide(exe.as_os_str());
    let params_w = wide(std::ffi::OsStr::new(&params));

    unsafe {
        let mut info: SHELLEXECUTEINFOW = std::mem::zeroed();
        info.cbSize = std::mem::size_of::<SHELLEXECUTEINFOW>() as u32;
        info.fMask = SEE_MASK_NOCLOSEPROCESS;
        info.lpVerb = verb.as_ptr();
        info.lpFile = file.as_ptr();
        info.lpParameters = params_w.as_ptr();
        info.nShow = 0; // SW_HIDE

        if ShellExecuteExW(&mut info) == 0 || info.hProcess.is_null() {
            warn!("elevation request failed, running without privilege elevation");
            std::process::exit(main());
        }

        WaitForSingleObject(info.hProcess, INFINITE);
        let mut code: u32 = 255;
        GetExitCodeProcess(info.hProcess, &mut code);
        CloseHandle(info.hProcess);
        std::process::exit(code as i32);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn is_admin_matches_euid() {
        let euid_root = unsafe { libc::geteuid() } == 0;
        assert_eq!(is_admin(), euid_root);
    }

    #[test]
    fn path_lookup_finds_a_shell() {
        // Every POSIX box has sh somewhere on PATH.
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("definitely_not_a_real_binary_xyz").is_none());
    }
}
