//! Process helpers shared across the workspace.
//!
//! - Spawning commands without a console window on Windows.
//! - Signalling children (`SIGTERM`/`SIGKILL` on unix).
//! - Graceful-then-forced termination of tokio children with a bounded grace period.

use std::ffi::OsStr;
use std::io;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Probe a binary for its version string (`<program> <flag>`), returning the first
/// non-empty line of its stdout.
pub fn detect_version(program: impl AsRef<OsStr>, flag: &str) -> Option<String> {
    let output = std_command(program).arg(flag).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Signals understood by [`send_signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the process to shut down (`SIGTERM`).
    Terminate,
    /// Kill the process immediately (`SIGKILL`).
    Kill,
}

/// Send a signal to a process id.
///
/// A process that already exited (`ESRCH`) is not an error.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let raw = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };

    // SAFETY: kill(2) has no memory-safety preconditions.
    let result = unsafe { libc::kill(pid as libc::pid_t, raw) };
    if result != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }
    Ok(())
}

/// Send a signal to a process id.
///
/// Windows has no graceful console signal for detached children, so only
/// [`Signal::Kill`] is delivered (through `taskkill`).
#[cfg(not(unix))]
pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    match signal {
        Signal::Terminate => Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "graceful termination is not supported on this platform",
        )),
        Signal::Kill => {
            let status = std_command("taskkill")
                .args(["/F", "/PID", &pid.to_string()])
                .status()?;
            if status.success() {
                Ok(())
            } else {
                Err(io::Error::other(format!("taskkill exited with {status}")))
            }
        }
    }
}

#[cfg(feature = "tokio")]
mod tokio_support {
    use std::io;
    use std::process::ExitStatus;
    use std::time::Duration;

    use tokio::process::Child;
    use tracing::{debug, warn};

    use super::{NoWindowExt, Signal, send_signal};

    impl NoWindowExt for tokio::process::Command {
        fn no_window(&mut self) {
            #[cfg(windows)]
            {
                use std::os::windows::process::CommandExt;
                self.as_std_mut().creation_flags(super::CREATE_NO_WINDOW);
            }
        }
    }

    /// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
    pub fn tokio_command(program: impl AsRef<std::ffi::OsStr>) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(program);
        cmd.no_window();
        cmd
    }

    /// Ask a child to exit, wait up to `grace`, then kill it.
    ///
    /// Returns the exit status of the child. Children that already exited are
    /// reaped without being signalled.
    pub async fn terminate_gracefully(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }

        match child.id() {
            Some(pid) => {
                if let Err(e) = send_signal(pid, Signal::Terminate) {
                    debug!(pid, error = %e, "graceful signal not delivered, killing");
                    child.start_kill()?;
                }
            }
            None => return child.wait().await,
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                warn!(pid = ?child.id(), grace_secs = grace.as_secs_f64(), "process ignored termination, killing");
                child.start_kill()?;
                child.wait().await
            }
        }
    }
}

#[cfg(feature = "tokio")]
pub use tokio_support::{terminate_gracefully, tokio_command};

#[cfg(all(test, unix, feature = "tokio"))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn terminates_cooperative_child_with_sigterm() {
        let mut child = tokio_command("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .unwrap();

        let started = Instant::now();
        let status = terminate_gracefully(&mut child, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn kills_child_that_ignores_sigterm() {
        let mut child = tokio_command("sh")
            .args(["-c", "trap '' TERM; sleep 30"])
            .spawn()
            .unwrap();
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        let status = terminate_gracefully(&mut child, Duration::from_millis(300))
            .await
            .unwrap();

        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn reaps_already_exited_child() {
        let mut child = tokio_command("true").spawn().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = terminate_gracefully(&mut child, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(status.success());
    }

    #[test]
    fn signalling_missing_process_is_not_an_error() {
        // pid_max on linux is well below this value.
        assert!(send_signal(0x3fff_fff0, Signal::Terminate).is_ok());
    }

    #[test]
    fn detect_version_reports_missing_binary() {
        assert!(detect_version("definitely-not-a-real-binary-xyz", "--version").is_none());
    }
}
