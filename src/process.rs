use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

pub(crate) struct CmdOutput {
    pub(crate) status: ExitStatus,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

impl CmdOutput {
    pub(crate) fn success(&self) -> bool {
        self.status.success()
    }
}

/// Run a command with an argument list (never through a shell) and capture
/// its output.
pub(crate) fn run_capture(program: &str, args: &[&str], cwd: Option<&Path>) -> Result<CmdOutput> {
    let mut command = Command::new(program);
    command.args(args);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    let output = command
        .output()
        .with_context(|| format!("failed to run `{program}`"))?;

    Ok(CmdOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run a command with the given bytes on stdin, capturing its output.
pub(crate) fn run_capture_with_input(
    program: &str,
    args: &[&str],
    input: &[u8],
) -> Result<CmdOutput> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to run `{program}`"))?;
    if let Some(stdin) = child.stdin.as_mut() {
        stdin
            .write_all(input)
            .with_context(|| format!("failed to write stdin to `{program}`"))?;
    }
    let output = child
        .wait_with_output()
        .with_context(|| format!("failed to wait for `{program}`"))?;

    Ok(CmdOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run a command with the given bytes on stdin, inheriting stdout/stderr.
/// Used to pipe diffs into an external viewer.
pub(crate) fn run_stream_with_input(program: &str, args: &[&str], input: &[u8]) -> Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to run `{program}`"))?;
    if let Some(stdin) = child.stdin.as_mut() {
        stdin
            .write_all(input)
            .with_context(|| format!("failed to write stdin to `{program}`"))?;
    }
    child
        .wait()
        .with_context(|| format!("failed to wait for `{program}`"))?;
    Ok(())
}

/// Check whether a command is resolvable on PATH.
pub(crate) fn command_exists(command: &str) -> bool {
    Command::new("which")
        .arg(command)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

pub(crate) fn first_line(value: &str) -> String {
    value
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("unknown error")
        .to_string()
}

/// Pick the most useful line out of a tool's stderr: the first line that
/// looks like an error, otherwise the last non-empty one.
pub(crate) fn best_error_line(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        return "unknown error".to_string();
    }

    if let Some(line) = lines
        .iter()
        .find(|line| line.to_ascii_lowercase().starts_with("error:"))
    {
        return (*line).to_string();
    }

    lines
        .last()
        .map(|line| (*line).to_string())
        .unwrap_or_else(|| "unknown error".to_string())
}

pub(crate) fn path_to_str(path: &Path) -> Result<&str> {
    path.to_str()
        .with_context(|| format!("path is not valid UTF-8: {}", path.display()))
}
