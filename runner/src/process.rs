//! Bounded child-process execution shared by local and container runs.

use std::io::{self, Read};
use std::process::{Child, Command as ProcessCommand, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::debug;
use wait_timeout::ChildExt;

/// What a bounded process run observed.
#[derive(Debug)]
pub(crate) struct ProcessOutput {
    /// Exit code, or `128 + signal` for a process killed by a signal.
    /// `None` only when the deadline expired.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Spawns `command` with null stdin and piped output, waits at most
/// `timeout`, and kills the child's whole process group on expiry.
///
/// # Errors
///
/// Returns the spawn or wait error. The child is killed and reaped before a
/// wait error is returned.
pub(crate) fn run_with_timeout(
    mut command: ProcessCommand,
    timeout: Duration,
) -> io::Result<ProcessOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let start = Instant::now();
    let mut child = command.spawn()?;

    // Drain both pipes on their own threads so a chatty child cannot block
    // on a full pipe buffer while we wait on it.
    let stdout_thread = child.stdout.take().map(drain);
    let stderr_thread = child.stderr.take().map(drain);

    let status = match child.wait_timeout(timeout) {
        Ok(status) => status,
        Err(err) => {
            kill_process_group(&mut child);
            return Err(err);
        }
    };

    let timed_out = status.is_none();
    if timed_out {
        debug!(pid = child.id(), timeout_ms = timeout.as_millis() as u64, "Deadline expired, killing process group");
        kill_process_group(&mut child);
    }
    let duration = start.elapsed();

    let stdout = join_drain(stdout_thread);
    let stderr = join_drain(stderr_thread);

    Ok(ProcessOutput {
        exit_code: status.map(exit_code),
        stdout,
        stderr,
        timed_out,
        duration,
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(err) = pipe.read_to_end(&mut buf) {
            debug!(error = %err, "Failed to read child output");
        }
        buf
    })
}

fn join_drain(handle: Option<JoinHandle<Vec<u8>>>) -> String {
    handle
        .and_then(|thread| thread.join().ok())
        .map(|buf| String::from_utf8_lossy(&buf).into_owned())
        .unwrap_or_default()
}

fn exit_code(status: ExitStatus) -> i32 {
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
    -1
}

/// Kills the child and everything it spawned, then reaps it.
fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: kill(2) has no memory-safety preconditions. The child
            // leads its own group, so -pid targets only its descendants.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> ProcessCommand {
        let mut command = ProcessCommand::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn test_captures_output_and_exit_code() {
        let output = run_with_timeout(shell("echo out; echo err >&2; exit 3"), Duration::from_secs(10))
            .unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(!output.timed_out);
    }

    #[test]
    fn test_deadline_kills_whole_group() {
        let output = run_with_timeout(shell("sleep 5 & sleep 5; wait"), Duration::from_millis(200))
            .unwrap();
        assert!(output.timed_out);
        assert_eq!(output.exit_code, None);
        assert!(output.duration < Duration::from_secs(4));
    }

    #[test]
    fn test_large_output_does_not_deadlock() {
        let output = run_with_timeout(
            shell("i=0; while [ $i -lt 20000 ]; do echo 0123456789; i=$((i+1)); done"),
            Duration::from_secs(30),
        )
        .unwrap();
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout.len(), 20000 * 11);
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let err = run_with_timeout(
            ProcessCommand::new("definitely-not-a-real-program-xyz"),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
