//! # Subprocess runner
//! Shell-interpreted execution of converter commands with a wall-clock
//! timeout.
//!
//! Converters often fan out into helper processes (office servers,
//! ghostscript), so every child is started in its own session and a timeout
//! signals the whole process group rather than just the leader. A non-zero
//! exit is not an error here; classification is up to the caller.
use std::{
    io::Read,
    path::Path,
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use log::debug;

/// The `stdout` value reported when a command exceeded its timeout.
pub const TIMEOUT_MARKER: &str = "timeout";

/// How often a running child is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutcome {
    pub fn timed_out(&self) -> bool {
        self.stdout == TIMEOUT_MARKER
    }
}

/// Run `command` through `sh -c` with the given working directory, killing
/// the child's entire process group once `timeout_secs` elapses.
///
/// Captured output is flushed even on early termination: children run with
/// `PYTHONUNBUFFERED=1` and the capture threads drain the pipes until the
/// group is gone.
pub fn run_shell(command: &str, cwd: Option<&Path>, timeout_secs: u64) -> RunOutcome {
    debug!("Running command: {command}");
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("PYTHONUNBUFFERED", "1");
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // a new session puts the child in its own process group
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            return RunOutcome {
                exit_code: 1,
                stdout: String::new(),
                stderr: err.to_string(),
            };
        }
    };
    let out_handle = spawn_reader(child.stdout.take());
    let err_handle = spawn_reader(child.stderr.take());

    let deadline = Instant::now() + Duration::from_secs(timeout_secs);
    let mut timed_out = false;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break Some(status),
            Ok(None) => {
                if Instant::now() >= deadline {
                    debug!("Command timed out after {timeout_secs}s, killing process group");
                    timed_out = true;
                    kill_group(&mut child);
                    let _ = child.wait();
                    break None;
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(err) => {
                kill_group(&mut child);
                let _ = child.wait();
                return RunOutcome {
                    exit_code: 1,
                    stdout: join_reader(out_handle),
                    stderr: err.to_string(),
                };
            }
        }
    };

    let stdout = join_reader(out_handle);
    let stderr = join_reader(err_handle);
    match status {
        Some(status) => RunOutcome {
            exit_code: status.code().unwrap_or(1),
            stdout,
            stderr,
        },
        None => {
            debug_assert!(timed_out);
            RunOutcome {
                exit_code: 1,
                stdout: TIMEOUT_MARKER.into(),
                stderr: String::new(),
            }
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
    let _ = unsafe { libc::killpg(child.id() as libc::pid_t, libc::SIGTERM) };
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    let _ = child.kill();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_both_streams() {
        let out = run_shell("printf hello; printf oops >&2", None, 10);
        assert_eq!(out.exit_code, 0);
        assert_eq!(out.stdout, "hello");
        assert_eq!(out.stderr, "oops");
        assert!(!out.timed_out());
    }

    #[test]
    fn nonzero_exit_is_not_an_error() {
        let out = run_shell("exit 3", None, 10);
        assert_eq!(out.exit_code, 3);
    }

    #[test]
    fn respects_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell("pwd", Some(dir.path()), 10);
        assert_eq!(out.exit_code, 0);
        assert!(out.stdout.trim().ends_with(
            dir.path()
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
        ));
    }

    #[test]
    fn kills_sleeping_child_at_timeout() {
        let start = Instant::now();
        let out = run_shell("sleep 30", None, 1);
        assert_eq!(out.exit_code, 1);
        assert!(out.timed_out());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_binary_reports_failure() {
        let out = run_shell("definitely-not-a-real-binary-xyz", None, 10);
        assert_ne!(out.exit_code, 0);
    }
}
