//! Shared helpers used by the sources that shell out to system tools.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Check if a command exists by running `which`.
pub fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Run a command with a timeout. Returns (stdout_option, elapsed).
///
/// Stdout is `None` when the command cannot be spawned, exits non-zero, or is
/// killed at the deadline. Elapsed time is reported in every case. Stdout is
/// drained on a separate thread while the child runs, so output larger than
/// the pipe buffer cannot stall it.
pub fn run_command_timed(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> (Option<String>, Duration) {
    let t0 = Instant::now();

    let child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn();

    let mut child = match child {
        Ok(c) => c,
        Err(_) => return (None, t0.elapsed()),
    };

    let Some(mut stdout) = child.stdout.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return (None, t0.elapsed());
    };
    let reader = thread::spawn(move || {
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).map(|_| buf)
    });

    let deadline = t0 + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                let output = reader.join().ok().and_then(|r| r.ok());
                if !status.success() {
                    return (None, t0.elapsed());
                }
                let stdout = output.map(|o| String::from_utf8_lossy(&o).into_owned());
                return (stdout, t0.elapsed());
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    // The reader ends once the pipe closes; not joined, since
                    // a grandchild may still hold the write end.
                    return (None, t0.elapsed());
                }
                thread::sleep(Duration::from_millis(50));
            }
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                return (None, t0.elapsed());
            }
        }
    }
}

/// Render a command line for log and error messages.
pub fn describe_command(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // run_command_timed tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_run_command_timed_echo() {
        let (out, _) = run_command_timed("echo", &["hello"], Duration::from_secs(5));
        assert_eq!(out.unwrap().trim(), "hello");
    }

    #[test]
    fn test_run_command_timed_nonexistent() {
        let (out, _) = run_command_timed("/nonexistent/binary", &[], Duration::from_secs(5));
        assert!(out.is_none());
    }

    #[test]
    fn test_run_command_timed_failing_status() {
        // `false` always exits with status 1
        let (out, _) = run_command_timed("false", &[], Duration::from_secs(5));
        assert!(out.is_none());
    }

    #[test]
    fn test_run_command_timed_output_larger_than_pipe_buffer() {
        let (out, elapsed) = run_command_timed(
            "sh",
            &["-c", "head -c 200000 /dev/zero | tr '\\0' 'x'"],
            Duration::from_secs(10),
        );
        let out = out.unwrap();
        assert_eq!(out.len(), 200_000);
        assert!(out.bytes().all(|b| b == b'x'));
        assert!(elapsed < Duration::from_secs(10));
    }

    #[test]
    fn test_run_command_timed_kills_at_deadline() {
        let (out, elapsed) = run_command_timed("sleep", &["10"], Duration::from_millis(100));
        assert!(out.is_none());
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_command_exists() {
        assert!(command_exists("echo"));
        assert!(!command_exists("nonexistent_binary_xyz_12345"));
    }

    #[test]
    fn test_describe_command() {
        assert_eq!(
            describe_command("ping", &["-c", "5", "host"]),
            "ping -c 5 host"
        );
    }
}
