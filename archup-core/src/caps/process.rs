//! Bounded external command execution.
//!
//! Bootstrap runs unattended, often early in a machine's life; external
//! commands must not be allowed to hang indefinitely.

use archup_error::{CapError, CapResult};
use std::io::Read;
use std::process::{Command, ExitStatus, Output, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

pub fn status_with_timeout(
    program: &str,
    cmd: &mut Command,
    timeout: Duration,
) -> CapResult<ExitStatus> {
    // Avoid commands hanging waiting for input.
    cmd.stdin(Stdio::null());
    let mut child = cmd.spawn()?;

    match child.wait_timeout(timeout)? {
        Some(status) => Ok(status),
        None => {
            let _ = child.kill();
            let _ = child.wait();
            Err(CapError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            })
        }
    }
}

pub fn output_with_timeout(
    program: &str,
    cmd: &mut Command,
    timeout: Duration,
) -> CapResult<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout.take() {
            let _ = out.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr.take() {
            let _ = err.read_to_end(&mut buf);
        }
        buf
    });

    let status = match child.wait_timeout(timeout)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_handle.join();
            let _ = stderr_handle.join();
            return Err(CapError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}
