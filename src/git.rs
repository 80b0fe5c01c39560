use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};

use crate::process::{CmdOutput, best_error_line, path_to_str, run_capture};

pub(crate) fn clone(url: &str, dest: &Path) -> Result<CmdOutput> {
    run_capture("git", &["clone", url, path_to_str(dest)?], None)
}

/// Check whether a branch exists locally or as a tracked `origin/` branch.
pub(crate) fn branch_exists(repo: &Path, branch: &str) -> bool {
    let local = run_capture("git", &["rev-parse", "--verify", "--quiet", branch], Some(repo))
        .map(|output| output.success())
        .unwrap_or(false);
    if local {
        return true;
    }
    run_capture(
        "git",
        &[
            "rev-parse",
            "--verify",
            "--quiet",
            &format!("origin/{branch}"),
        ],
        Some(repo),
    )
    .map(|output| output.success())
    .unwrap_or(false)
}

pub(crate) fn create_branch(repo: &Path, branch: &str, base: Option<&str>) -> Result<CmdOutput> {
    let mut args = vec!["branch", branch];
    if let Some(base) = base {
        args.push(base);
    }
    run_capture("git", &args, Some(repo))
}

pub(crate) fn current_branch(repo: &Path) -> Option<String> {
    let output = run_capture("git", &["rev-parse", "--abbrev-ref", "HEAD"], Some(repo)).ok()?;
    if !output.success() {
        return None;
    }
    let branch = output.stdout.trim();
    if branch.is_empty() || branch == "HEAD" {
        return None;
    }
    Some(branch.to_string())
}

pub(crate) fn worktree_add(
    repo: &Path,
    worktree: &Path,
    branch: &str,
    force_branch: bool,
) -> Result<CmdOutput> {
    let worktree_str = path_to_str(worktree)?;
    if force_branch {
        run_capture(
            "git",
            &["worktree", "add", "-B", branch, worktree_str],
            Some(repo),
        )
    } else {
        run_capture("git", &["worktree", "add", worktree_str, branch], Some(repo))
    }
}

pub(crate) fn worktree_remove(repo: &Path, worktree: &Path, force: bool) -> Result<CmdOutput> {
    let worktree_str = path_to_str(worktree)?;
    let mut args = vec!["worktree", "remove", worktree_str];
    if force {
        args.push("--force");
    }
    run_capture("git", &args, Some(repo))
}

pub(crate) fn status_porcelain(worktree: &Path) -> Result<CmdOutput> {
    run_capture("git", &["status", "--porcelain"], Some(worktree))
}

/// Any uncommitted change, staged or not.
pub(crate) fn is_dirty(worktree: &Path) -> Result<bool> {
    let output = status_porcelain(worktree)
        .with_context(|| format!("failed to read status for {}", worktree.display()))?;
    if !output.success() {
        bail!(
            "failed to read status for {}: {}",
            worktree.display(),
            best_error_line(&output.stderr)
        );
    }
    Ok(!output.stdout.trim().is_empty())
}

pub(crate) fn diff(worktree: &Path, cached: bool, stat: bool) -> Result<CmdOutput> {
    let mut args = vec!["diff"];
    if cached {
        args.push("--cached");
    }
    if stat {
        args.push("--stat");
    }
    run_capture("git", &args, Some(worktree))
}

pub(crate) fn untracked_files(worktree: &Path) -> Vec<String> {
    match run_capture(
        "git",
        &["ls-files", "--others", "--exclude-standard"],
        Some(worktree),
    ) {
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

pub(crate) fn push(worktree: &Path, remote: &str, branch: Option<&str>) -> Result<CmdOutput> {
    let mut args = vec!["push", remote];
    if let Some(branch) = branch {
        args.push(branch);
    }
    run_capture("git", &args, Some(worktree))
}

pub(crate) fn log_oneline(worktree: &Path, range: &str, count: usize) -> Result<CmdOutput> {
    let count_str = count.to_string();
    run_capture(
        "git",
        &["log", "--oneline", "-n", &count_str, range],
        Some(worktree),
    )
}

pub(crate) fn rev_list_count(worktree: &Path, range: &str) -> usize {
    match run_capture("git", &["rev-list", "--count", range], Some(worktree)) {
        Ok(output) if output.success() => output.stdout.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// The repository's shared git directory, resolved from inside a worktree.
pub(crate) fn common_git_dir(worktree: &Path) -> Option<PathBuf> {
    let output = run_capture(
        "git",
        &["rev-parse", "--path-format=absolute", "--git-common-dir"],
        Some(worktree),
    )
    .ok()?;
    if !output.success() {
        return None;
    }
    let dir = output.stdout.trim();
    if dir.is_empty() {
        return None;
    }
    Some(PathBuf::from(dir))
}
