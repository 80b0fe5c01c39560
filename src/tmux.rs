use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

use crate::config::SESSION_PREFIX;
use crate::process::{best_error_line, path_to_str, run_capture};

/// All live tmux session names. A failing query (tmux not installed, no
/// server running) degrades to an empty list, never an error.
pub(crate) fn list_sessions() -> Vec<String> {
    match run_capture("tmux", &["list-sessions", "-F", "#{session_name}"], None) {
        Ok(output) if output.success() => output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Restrict a session listing to the names this tool manages.
pub(crate) fn filter_managed(names: impl IntoIterator<Item = String>) -> HashSet<String> {
    names
        .into_iter()
        .filter(|name| name.starts_with(SESSION_PREFIX))
        .collect()
}

/// The observed session set: live sessions carrying the reserved prefix.
pub(crate) fn list_active() -> HashSet<String> {
    filter_managed(list_sessions())
}

pub(crate) fn session_exists(name: &str) -> bool {
    run_capture("tmux", &["has-session", "-t", name], None)
        .map(|output| output.success())
        .unwrap_or(false)
}

/// Create a detached session rooted at `cwd`, optionally running a command
/// argv instead of the default shell.
pub(crate) fn new_session(name: &str, cwd: &Path, command: Option<&[String]>) -> Result<()> {
    let cwd_str = path_to_str(cwd)?;
    let mut args = vec!["new-session", "-d", "-s", name, "-c", cwd_str];
    if let Some(command) = command {
        args.extend(command.iter().map(String::as_str));
    }
    let output = run_capture("tmux", &args, None).context("failed to run tmux")?;
    if !output.success() {
        bail!(
            "failed to create session `{name}`: {}",
            best_error_line(&output.stderr)
        );
    }
    Ok(())
}

/// Kill a session. Idempotent: a session that is already gone (or a tmux
/// that is not running at all) counts as success, since the desired end
/// state already holds.
pub(crate) fn kill_session(name: &str) {
    let _ = run_capture("tmux", &["kill-session", "-t", name], None);
}

pub(crate) fn capture_pane(session: &str, lines: usize) -> String {
    let start = format!("-{lines}");
    match run_capture(
        "tmux",
        &["capture-pane", "-t", session, "-p", "-S", &start],
        None,
    ) {
        Ok(output) if output.success() => output.stdout,
        _ => String::new(),
    }
}

/// Attach to a session by replacing this process image with tmux, so
/// detaching and signal handling behave exactly like plain tmux. On
/// success this never returns.
pub(crate) fn attach(session: &str) -> Result<()> {
    let err = Command::new("tmux").args(["attach", "-t", session]).exec();
    Err(err).context("failed to exec `tmux attach`")
}
