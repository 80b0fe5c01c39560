use anyhow::Result;
use indexmap::IndexMap;

use crate::config::{ArchiveRecord, Repo, SessionKey};
use crate::process::{command_exists, run_capture_with_input};
use crate::reconcile::ActiveAgent;
use crate::ui::{read_line, truncate};

pub(crate) fn has_fzf() -> bool {
    command_exists("fzf")
}

/// Present numbered lines and return the chosen 0-based index, via fzf when
/// available, otherwise a plain numbered prompt. `None` means cancelled.
fn pick_index(lines: &[String], prompt: &str) -> Option<usize> {
    if lines.is_empty() {
        return None;
    }
    if has_fzf() {
        pick_index_fzf(lines, prompt)
    } else {
        pick_index_simple(lines, prompt)
    }
}

fn pick_index_fzf(lines: &[String], prompt: &str) -> Option<usize> {
    let input = lines.join("\n");
    let output = run_capture_with_input(
        "fzf",
        &["--prompt", prompt, "--height", "40%", "--reverse"],
        input.as_bytes(),
    )
    .ok()?;
    if !output.success() {
        return None;
    }
    parse_picked_index(&output.stdout, lines.len())
}

fn pick_index_simple(lines: &[String], prompt: &str) -> Option<usize> {
    println!("{prompt}");
    for line in lines {
        println!("  {line}");
    }
    let choice = read_line("\nEnter number (or 'q' to cancel): ").ok()?;
    if choice.eq_ignore_ascii_case("q") {
        return None;
    }
    parse_picked_index(&choice, lines.len())
}

/// Extract the 1-based number from a selection like `3: repo/branch - task`
/// and convert it to a bounds-checked 0-based index.
pub(crate) fn parse_picked_index(selection: &str, len: usize) -> Option<usize> {
    let number = selection.trim().split(':').next()?.trim();
    let picked: usize = number.parse().ok()?;
    if picked == 0 || picked > len {
        return None;
    }
    Some(picked - 1)
}

pub(crate) fn agent_lines(view: &[ActiveAgent]) -> Vec<String> {
    view.iter()
        .map(|agent| {
            let task = truncate(&agent.record.task, 40);
            let task_str = if task.is_empty() {
                String::new()
            } else {
                format!(" - {task}")
            };
            format!(
                "{}: {}/{}{task_str}",
                agent.ordinal, agent.record.repo, agent.record.branch
            )
        })
        .collect()
}

pub(crate) fn pick_agent<'a>(view: &'a [ActiveAgent], prompt: &str) -> Option<&'a ActiveAgent> {
    let index = pick_index(&agent_lines(view), prompt)?;
    view.get(index)
}

pub(crate) fn pick_repo(repos: &IndexMap<String, Repo>, prompt: &str) -> Option<String> {
    let names: Vec<String> = repos
        .keys()
        .enumerate()
        .map(|(offset, name)| format!("{}: {name}", offset + 1))
        .collect();
    let index = pick_index(&names, prompt)?;
    repos.get_index(index).map(|(name, _)| name.clone())
}

pub(crate) fn pick_archive(
    archives: &IndexMap<SessionKey, ArchiveRecord>,
    prompt: &str,
) -> Option<SessionKey> {
    let lines: Vec<String> = archives
        .iter()
        .enumerate()
        .map(|(offset, (key, entry))| {
            format!(
                "{}: {} ({}:{}, archived {})",
                offset + 1,
                key,
                entry.repo,
                entry.branch,
                entry.archived_at.format("%Y-%m-%d %H:%M")
            )
        })
        .collect();
    let index = pick_index(&lines, prompt)?;
    archives.get_index(index).map(|(key, _)| key.clone())
}

/// Variant of `pick_agent` for commands that error rather than silently
/// return when nothing is selected.
pub(crate) fn require_agent<'a>(
    view: &'a [ActiveAgent],
    prompt: &str,
) -> Result<Option<&'a ActiveAgent>> {
    if view.is_empty() {
        println!("No active agents.");
        return Ok(None);
    }
    let picked = pick_agent(view, prompt);
    if picked.is_none() {
        println!("No agent selected.");
    }
    Ok(picked)
}
