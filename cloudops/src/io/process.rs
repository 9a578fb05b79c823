//! Child processes with timeouts and bounded output.
//!
//! Every collaborator that shells out (aws, kubectl, the text-generation
//! command) goes through [`run_command_with_timeout`], so a hung provider can
//! never block an investigation past its per-call budget.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Default cap on captured stdout/stderr per stream.
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 4 * 1024 * 1024;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Fail unless the command exited zero within its timeout and without
    /// losing stdout to truncation.
    pub fn require_success(&self, label: &str) -> Result<()> {
        if self.timed_out {
            bail!("{label} timed out");
        }
        if !self.status.success() {
            let stderr = String::from_utf8_lossy(&self.stderr);
            bail!(
                "{label} exited with {}: {}",
                self.status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                stderr.trim()
            );
        }
        if self.stdout_truncated > 0 {
            bail!(
                "{label} output exceeded limit ({} bytes dropped)",
                self.stdout_truncated
            );
        }
        Ok(())
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_secs = timeout.as_secs()))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        // A child that exits without reading stdin closes the pipe early.
        if let Err(e) = child_stdin.write_all(input) {
            warn!(err = %e, "child closed stdin early");
        }
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Run `argv` and parse its stdout as JSON.
pub fn run_json(
    argv: &[String],
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<serde_json::Value> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("empty command"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    let output = run_command_with_timeout(cmd, None, timeout, output_limit_bytes)
        .with_context(|| format!("run {program}"))?;
    output.require_success(program)?;
    serde_json::from_slice(&output.stdout).with_context(|| format!("parse {program} output"))
}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_pipes_stdin() {
        let output = run_command_with_timeout(
            sh("cat"),
            Some(b"hello"),
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        output.require_success("cat").expect("success");
        assert_eq!(output.stdout_text(), "hello");
    }

    #[test]
    fn kills_on_timeout() {
        let output =
            run_command_with_timeout(sh("sleep 5"), None, Duration::from_millis(100), 1024)
                .expect("run");
        assert!(output.timed_out);
        let err = output.require_success("sleep").unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn truncates_beyond_limit() {
        let output =
            run_command_with_timeout(sh("printf 0123456789"), None, Duration::from_secs(5), 4)
                .expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
        assert!(output.require_success("printf").is_err());
    }

    #[test]
    fn non_zero_exit_reports_stderr() {
        let output =
            run_command_with_timeout(sh("echo denied >&2; exit 3"), None, Duration::from_secs(5), 1024)
                .expect("run");
        let err = output.require_success("aws").unwrap_err();
        assert_eq!(err.to_string(), "aws exited with 3: denied");
    }

    #[test]
    fn run_json_parses_stdout() {
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"echo '{"ok": true}'"#.to_string(),
        ];
        let value = run_json(&argv, Duration::from_secs(5), 1024).expect("json");
        assert_eq!(value["ok"], serde_json::json!(true));
    }
}
