// Execute a shell command with a timeout and safe handling of the communication.
//
// Used for all external queries (journalctl, kubectl).  Those commands can produce a lot of
// output, and there is limited capacity in the pipe: if we simply wait for the child before
// reading, the child blocks once the pipe fills up and we deadlock or time out.  The fix is to
// drain the pipe while waiting for termination, bounding the time we're willing to wait for more
// output to appear.  See:
//
//   https://github.com/rust-lang/rust/issues/45572
//   https://doc.rust-lang.org/std/process/index.html ("Handling I/O")

use anyhow::{bail, Result};
use std::io;
use std::time::Duration;
use subprocess::{Exec, ExitStatus, Redirection};

/// Run `command` under the shell and return its stdout as a string.  Any stderr output, a nonzero
/// exit, or expiry of `timeout` is an error carrying the command and whatever output was seen.

pub fn run_with_timeout(command: &str, timeout: Duration) -> Result<String> {
    let mut p = Exec::shell(command)
        .stdout(Redirection::Pipe)
        .stderr(Redirection::Pipe)
        .popen()?;

    let mut comm = p.communicate_start(None).limit_time(timeout);
    let mut stdout_text = String::new();
    let mut failure: Option<String> = None;
    loop {
        match comm.read_string() {
            Ok((Some(stdout), Some(stderr))) => {
                if !stderr.is_empty() {
                    failure = Some(stderr);
                    break;
                }
                if stdout.is_empty() {
                    // EOF - timeouts are signaled as Err
                    break;
                }
                stdout_text += &stdout;
            }
            Ok((_, _)) => {
                failure = Some("lost the output pipes".to_string());
                break;
            }
            Err(e) if e.error.kind() == io::ErrorKind::TimedOut => {
                // The child is hung or too slow; reap it so it does not linger.
                let _ = p.terminate();
                failure = Some(format!("timed out after {}s", timeout.as_secs()));
                break;
            }
            Err(e) => {
                failure = Some(format!("broken communication: {}", e.error));
                break;
            }
        }
    }

    let status = p.wait()?;
    match (failure, status) {
        (None, ExitStatus::Exited(0)) => Ok(stdout_text),
        (Some(msg), _) => {
            bail!("command `{command}` failed: {msg}");
        }
        (None, status) => {
            bail!("command `{command}` failed: exit status {status:?}");
        }
    }
}

#[test]
fn test_run_with_timeout() {
    let out = run_with_timeout("echo hi there", Duration::from_secs(5)).unwrap();
    assert_eq!(out.trim(), "hi there");

    assert!(run_with_timeout("echo oops 1>&2", Duration::from_secs(5)).is_err());
    assert!(run_with_timeout("exit 37", Duration::from_secs(5)).is_err());
}
