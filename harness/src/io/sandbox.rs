//! Isolated execution of generated code.
//!
//! The [`Sandbox`] trait decouples the iteration controller from the
//! containment mechanism (currently `docker run`). Tests use scripted
//! sandboxes that return predetermined outputs without spawning anything.

use std::io::Write;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_command_with_timeout;

/// Outcome of one sandbox invocation. Two shapes the caller must
/// discriminate: a run that produced output streams, or a mechanism-level
/// failure message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The code ran; stdout and stderr are captured separately. A
    /// non-zero exit is annotated into stderr so it stays distinguishable
    /// from a clean run with empty output.
    Output { stdout: String, stderr: String },
    /// The sandbox mechanism itself failed (container error, timeout).
    Failed(String),
}

/// Abstraction over code-execution backends.
///
/// Each call is isolated; implementations share no state between calls.
pub trait Sandbox {
    /// Define `code`, call `entry_point()`, print its result. Returns
    /// `Err` only for infrastructure problems (e.g. the container runtime
    /// is missing); everything the generated code does wrong comes back
    /// as an [`ExecOutcome`].
    fn execute(&self, code: &str, entry_point: &str) -> Result<ExecOutcome>;
}

/// Sandbox that runs each snippet in a fresh docker container.
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    pub image: String,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl DockerSandbox {
    pub fn new(image: impl Into<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            image: image.into(),
            timeout,
            output_limit_bytes,
        }
    }
}

impl Sandbox for DockerSandbox {
    #[instrument(skip_all, fields(image = %self.image, entry_point))]
    fn execute(&self, code: &str, entry_point: &str) -> Result<ExecOutcome> {
        let script = wrap_entry_point(code, entry_point);

        let mut script_file = tempfile::Builder::new()
            .suffix(".py")
            .tempfile()
            .context("create sandbox script file")?;
        script_file
            .write_all(script.as_bytes())
            .context("write sandbox script")?;
        script_file.flush().context("flush sandbox script")?;

        let mut cmd = Command::new("docker");
        cmd.arg("run")
            .arg("--rm")
            .arg("--network=none")
            .arg("-v")
            .arg(format!(
                "{}:/sandbox/main.py:ro",
                script_file.path().display()
            ))
            .arg(&self.image)
            .arg("python")
            .arg("/sandbox/main.py");

        info!("running snippet in container");
        let output = run_command_with_timeout(cmd, None, self.timeout, self.output_limit_bytes)
            .context("spawn docker run")?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "sandbox timed out");
            return Ok(ExecOutcome::Failed(format!(
                "Execution timed out after {}s",
                self.timeout.as_secs()
            )));
        }

        let stdout = output.stdout_text();
        let stderr = annotate_exit(output.status, output.stderr_text());
        debug!(exit_code = ?output.status.code(), stdout_len = stdout.len(), "sandbox finished");
        Ok(ExecOutcome::Output { stdout, stderr })
    }
}

/// Append the entry-point call so the function's result lands on stdout.
pub fn wrap_entry_point(code: &str, entry_point: &str) -> String {
    format!("{code}\nprint({entry_point}())\n")
}

/// Annotate a silent non-zero exit into stderr so it stays
/// distinguishable from a clean run with empty output.
fn annotate_exit(status: std::process::ExitStatus, stderr: String) -> String {
    if status.success() || !stderr.is_empty() {
        return stderr;
    }
    format!("process exited with status {:?}", status.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exit_status(code: i32) -> std::process::ExitStatus {
        Command::new("sh")
            .arg("-c")
            .arg(format!("exit {code}"))
            .status()
            .expect("run sh")
    }

    #[test]
    fn wraps_entry_point_call() {
        let script = wrap_entry_point("def f():\n    return 1", "f");
        assert!(script.ends_with("\nprint(f())\n"));
        assert!(script.starts_with("def f():"));
    }

    #[test]
    fn silent_nonzero_exit_is_annotated() {
        let annotated = annotate_exit(exit_status(3), String::new());
        assert!(annotated.contains("process exited with status"));
        assert!(annotated.contains('3'));
    }

    #[test]
    fn clean_or_noisy_exits_keep_stderr_untouched() {
        assert_eq!(annotate_exit(exit_status(0), String::new()), "");
        assert_eq!(
            annotate_exit(exit_status(2), "Traceback ...".to_string()),
            "Traceback ..."
        );
    }
}
