use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::{Config, SessionKey};
use crate::git;
use crate::process::best_error_line;
use crate::ui::progress;

pub(crate) const CONTEXT_DIR: &str = ".context";
pub(crate) const NOTES_FILE: &str = "notes.md";

/// Directory name for a fresh worktree: repo, branch, and a time-based
/// disambiguator so repeated spawns of the same branch never collide.
/// Branch slashes are flattened to keep the name a single path component.
pub(crate) fn worktree_name(repo: &str, branch: &str, now: DateTime<Local>) -> String {
    let branch = branch.replace(['/', '\\'], "-");
    format!("{repo}-{branch}-{}", now.format("%H%M%S"))
}

/// Like `worktree_name`, but advances the time stamp until the derived
/// session key is free in both `agents` and `archives`. A key must never
/// exist in both maps at once, and a second-resolution stamp alone cannot
/// guarantee that against a still-archived workspace of the same
/// repo/branch.
pub(crate) fn unique_worktree_name(
    config: &Config,
    repo: &str,
    branch: &str,
    start: DateTime<Local>,
) -> String {
    let mut now = start;
    loop {
        let name = worktree_name(repo, branch, now);
        match SessionKey::for_worktree(&name) {
            Ok(key)
                if config.agents.contains_key(&key)
                    || config.archives.contains_key(&key) =>
            {
                now = now + chrono::Duration::seconds(1);
            }
            _ => return name,
        }
    }
}

/// Create the on-disk isolation unit for an agent: ensure the branch
/// exists, then add a worktree checked out to it. On failure the add is
/// retried with a forced branch reset at the worktree location; if that
/// also fails, git's own error text is surfaced and nothing is persisted.
pub(crate) fn provision(repo_path: &Path, worktree: &Path, branch: &str) -> Result<()> {
    if !git::branch_exists(repo_path, branch) {
        progress(&format!("creating new branch `{branch}`"));
        let base = git::current_branch(repo_path);
        let output = git::create_branch(repo_path, branch, base.as_deref())?;
        if !output.success() {
            bail!(
                "failed to create branch `{branch}`: {}",
                best_error_line(&output.stderr)
            );
        }
    }

    progress("creating isolated workspace");
    let output = git::worktree_add(repo_path, worktree, branch, false)?;
    if output.success() {
        return Ok(());
    }

    // The branch may be checked out elsewhere or a stale worktree
    // registration may linger; -B resets the branch at the new location.
    let forced = git::worktree_add(repo_path, worktree, branch, true)?;
    if !forced.success() {
        bail!(
            "failed to create worktree: {}",
            best_error_line(&forced.stderr)
        );
    }
    Ok(())
}

/// Create the agent's scratch directory inside the worktree and register
/// it in the repository's exclude list so scratch notes never get
/// committed. The exclude write is best effort.
pub(crate) fn ensure_context_dir(worktree: &Path) -> Result<PathBuf> {
    let context_dir = worktree.join(CONTEXT_DIR);
    fs::create_dir_all(&context_dir)
        .with_context(|| format!("failed to create {}", context_dir.display()))?;

    if let Some(git_dir) = git::common_git_dir(worktree) {
        let _ = append_exclude_line(&git_dir, &format!("{CONTEXT_DIR}/"));
    }
    Ok(context_dir)
}

fn append_exclude_line(git_dir: &Path, line: &str) -> std::io::Result<()> {
    let exclude_path = git_dir.join("info").join("exclude");
    let contents = fs::read_to_string(&exclude_path).unwrap_or_default();
    if contents.lines().any(|existing| existing.trim() == line) {
        return Ok(());
    }
    if let Some(parent) = exclude_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&exclude_path)?;
    if !contents.is_empty() && !contents.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{line}")
}

pub(crate) fn notes_path(worktree: &Path) -> PathBuf {
    worktree.join(CONTEXT_DIR).join(NOTES_FILE)
}

/// Read scratch notes left by the agent, tolerating their absence.
pub(crate) fn read_notes(worktree: &Path) -> String {
    fs::read_to_string(notes_path(worktree)).unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SharedPathOptions {
    pub(crate) link_node_modules: bool,
    pub(crate) link_venv: bool,
    pub(crate) copy_env: bool,
}

/// Outcome of one best-effort link/copy. Surfaced only as progress output,
/// never as an error to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkOutcome {
    Linked,
    Copied,
    AlreadyPresent,
    Skipped,
    Failed,
}

/// Link shared dependency directories or copy the env file from the base
/// checkout into the new worktree. Convenience only: every failure is
/// swallowed into its `LinkOutcome`.
pub(crate) fn link_shared_paths(
    base: &Path,
    worktree: &Path,
    options: SharedPathOptions,
) -> Vec<(&'static str, LinkOutcome)> {
    let mut outcomes = Vec::new();
    if options.link_node_modules {
        outcomes.push((
            "node_modules",
            link_dir(&base.join("node_modules"), &worktree.join("node_modules")),
        ));
    }
    if options.link_venv {
        outcomes.push((".venv", link_dir(&base.join(".venv"), &worktree.join(".venv"))));
    }
    if options.copy_env {
        outcomes.push((".env", copy_file(&base.join(".env"), &worktree.join(".env"))));
    }
    outcomes
}

fn link_dir(src: &Path, dest: &Path) -> LinkOutcome {
    if !src.is_dir() {
        return LinkOutcome::Skipped;
    }
    if dest.exists() || dest.is_symlink() {
        return LinkOutcome::AlreadyPresent;
    }
    match std::os::unix::fs::symlink(src, dest) {
        Ok(()) => LinkOutcome::Linked,
        Err(_) => LinkOutcome::Failed,
    }
}

fn copy_file(src: &Path, dest: &Path) -> LinkOutcome {
    if !src.is_file() {
        return LinkOutcome::Skipped;
    }
    if dest.exists() {
        return LinkOutcome::AlreadyPresent;
    }
    match fs::copy(src, dest) {
        Ok(_) => LinkOutcome::Copied,
        Err(_) => LinkOutcome::Failed,
    }
}

pub(crate) fn report_link_outcomes(outcomes: &[(&str, LinkOutcome)]) {
    for (name, outcome) in outcomes {
        let verb = match outcome {
            LinkOutcome::Linked => "linked",
            LinkOutcome::Copied => "copied",
            LinkOutcome::AlreadyPresent => "already present, left",
            LinkOutcome::Skipped => "not found in base, skipped",
            LinkOutcome::Failed => "could not be shared, skipped",
        };
        progress(&format!("shared {name}: {verb}"));
    }
}
