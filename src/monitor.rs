use anyhow::Result;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::git;
use crate::picker;
use crate::process::run_stream_with_input;
use crate::reconcile::{self, ActiveAgent};
use crate::settings::Settings;
use crate::tmux;
use crate::ui::truncate;

#[derive(Serialize)]
struct StatusAgentRow<'a> {
    session: &'a str,
    repo: &'a str,
    branch: &'a str,
    worktree: &'a Path,
    task: &'a str,
    agent: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'a str>,
    started: &'a DateTime<Utc>,
    changed_files: usize,
    commits_ahead: usize,
}

#[derive(Serialize)]
struct StatusPayload<'a> {
    agents: IndexMap<String, StatusAgentRow<'a>>,
    count: usize,
}

fn changed_file_count(worktree: &Path) -> usize {
    match git::status_porcelain(worktree) {
        Ok(output) if output.success() => output
            .stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count(),
        _ => 0,
    }
}

pub(crate) fn cmd_status(config: &Config, label: Option<&str>, json: bool) -> Result<()> {
    let view = reconcile::observed_active_agents(config, label);

    if json {
        let mut agents = IndexMap::new();
        for agent in &view {
            let record = &agent.record;
            agents.insert(
                agent.ordinal.to_string(),
                StatusAgentRow {
                    session: agent.key.as_str(),
                    repo: &record.repo,
                    branch: &record.branch,
                    worktree: &record.worktree,
                    task: &record.task,
                    agent: record.agent_type.display_name(),
                    label: record.label.as_deref(),
                    started: &record.started,
                    changed_files: changed_file_count(&record.worktree),
                    commits_ahead: git::rev_list_count(
                        &record.worktree,
                        &format!("origin/{}..HEAD", record.branch),
                    ),
                },
            );
        }
        let payload = StatusPayload {
            count: agents.len(),
            agents,
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("\n=== AGENT STATUS ===");
    if view.is_empty() {
        match label {
            Some(label) => println!("  No active agents with label '{label}'."),
            None => println!("  No active agents. Use `maestro spawn <repo> <branch>`"),
        }
        println!();
        return Ok(());
    }

    for agent in &view {
        let record = &agent.record;
        println!("\n[{}] {}:{}", agent.ordinal, record.repo, record.branch);
        println!("    session:  {}", agent.key);
        println!("    agent:    {}", record.agent_type.display_name());
        if let Some(label) = &record.label {
            println!("    label:    {label}");
        }
        if !record.task.is_empty() {
            println!("    task:     {}", truncate(&record.task, 60));
        }
        println!("    worktree: {}", record.worktree.display());
        println!("    started:  {}", record.started.format("%Y-%m-%d %H:%M"));
        let changed = changed_file_count(&record.worktree);
        let ahead = git::rev_list_count(
            &record.worktree,
            &format!("origin/{}..HEAD", record.branch),
        );
        println!("    changes:  {changed} file(s) changed, {ahead} commit(s) ahead");
    }
    println!();
    Ok(())
}

/// Resolve a token against the active view, or run the picker when no token
/// was given. `None` means the user cancelled or nothing matched; a message
/// has already been printed.
pub(crate) fn resolve_or_pick<'a>(
    view: &'a [ActiveAgent],
    token: Option<&str>,
    prompt: &str,
) -> Result<Option<&'a ActiveAgent>> {
    match token {
        Some(token) => {
            let key = reconcile::resolve_session(token, view)?;
            match reconcile::find_in_view(view, &key) {
                Some(agent) => Ok(Some(agent)),
                None => {
                    println!("Agent not found.");
                    Ok(None)
                }
            }
        }
        None => picker::require_agent(view, prompt),
    }
}

pub(crate) fn cmd_attach(config: &Config, token: Option<&str>) -> Result<()> {
    let view = reconcile::observed_active_agents(config, None);
    let key = match token {
        // A name token may target a session outside the view; attaching to
        // it fails at the tmux level with its own message.
        Some(token) => reconcile::resolve_session(token, &view)?,
        None => match picker::require_agent(&view, "Attach to: ")? {
            Some(agent) => agent.key.clone(),
            None => return Ok(()),
        },
    };
    // Replaces the process image; only returns on failure.
    tmux::attach(key.as_str())
}

pub(crate) fn cmd_logs(
    config: &Config,
    token: Option<&str>,
    lines: usize,
    follow: bool,
) -> Result<()> {
    let view = reconcile::observed_active_agents(config, None);
    let key = match token {
        Some(token) => reconcile::resolve_session(token, &view)?,
        None => match picker::require_agent(&view, "Logs for: ")? {
            Some(agent) => agent.key.clone(),
            None => return Ok(()),
        },
    };

    if !follow {
        print!("{}", tmux::capture_pane(key.as_str(), lines));
        return Ok(());
    }

    println!("Following {key} (Ctrl+C to stop)...");
    let mut last = String::new();
    loop {
        let output = tmux::capture_pane(key.as_str(), lines);
        if output != last {
            // Clear and repaint, like watch(1).
            print!("\x1b[2J\x1b[H=== {key} ===\n{output}");
            last = output;
        }
        std::thread::sleep(Duration::from_millis(500));
    }
}

pub(crate) fn cmd_diff(
    config: &Config,
    settings: &Settings,
    token: Option<&str>,
    tool: Option<&str>,
) -> Result<()> {
    let view = reconcile::observed_active_agents(config, None);
    if view.is_empty() {
        println!("No active agents.");
        return Ok(());
    }

    let selected: Vec<&ActiveAgent> = match token {
        Some(token) => {
            let key = reconcile::resolve_session(token, &view)?;
            match reconcile::find_in_view(&view, &key) {
                Some(agent) => vec![agent],
                None => {
                    println!("Agent not found.");
                    return Ok(());
                }
            }
        }
        None => view.iter().collect(),
    };

    let tool = tool.or(settings.diff_tool.as_deref());
    for agent in selected {
        let record = &agent.record;
        println!(
            "\n=== [{}] {}:{} ===",
            agent.ordinal, record.repo, record.branch
        );

        if let Some(tool) = tool {
            let output = git::diff(&record.worktree, false, false)?;
            if output.stdout.trim().is_empty() {
                println!("  No unstaged changes.");
            } else if let Err(err) =
                run_stream_with_input(tool, &[], output.stdout.as_bytes())
            {
                eprintln!("warning: {err:#}; showing raw diff");
                print!("{}", output.stdout);
            }
            continue;
        }

        print_diff_summary(&record.worktree, &record.branch)?;
    }
    println!();
    Ok(())
}

fn print_diff_summary(worktree: &Path, branch: &str) -> Result<()> {
    let unstaged = git::diff(worktree, false, true)?;
    if !unstaged.stdout.trim().is_empty() {
        println!("--- Unstaged ---\n{}", unstaged.stdout.trim_end());
    }
    let staged = git::diff(worktree, true, true)?;
    if !staged.stdout.trim().is_empty() {
        println!("--- Staged ---\n{}", staged.stdout.trim_end());
    }
    let untracked = git::untracked_files(worktree);
    if !untracked.is_empty() {
        println!("--- Untracked ---");
        for file in &untracked {
            println!("  {file}");
        }
    }
    let range = format!("origin/{branch}..HEAD");
    if let Ok(log) = git::log_oneline(worktree, &range, 5)
        && log.success()
        && !log.stdout.trim().is_empty()
    {
        println!("--- Recent commits ---\n{}", log.stdout.trim_end());
    }
    if unstaged.stdout.trim().is_empty()
        && staged.stdout.trim().is_empty()
        && untracked.is_empty()
    {
        println!("  No uncommitted changes.");
    }
    Ok(())
}

#[derive(Serialize)]
struct PickRow<'a> {
    number: usize,
    session: &'a str,
    repo: &'a str,
    branch: &'a str,
    worktree: &'a Path,
    task: &'a str,
}

pub(crate) fn cmd_pick(config: &Config, format: crate::cli::PickFormat) -> Result<()> {
    let view = reconcile::observed_active_agents(config, None);
    if view.is_empty() {
        eprintln!("No active agents.");
        std::process::exit(1);
    }
    let Some(agent) = picker::pick_agent(&view, "Select agent: ") else {
        std::process::exit(1);
    };

    match format {
        crate::cli::PickFormat::Number => println!("{}", agent.ordinal),
        crate::cli::PickFormat::Session => println!("{}", agent.key),
        crate::cli::PickFormat::Json => {
            let record = &agent.record;
            let row = PickRow {
                number: agent.ordinal,
                session: agent.key.as_str(),
                repo: &record.repo,
                branch: &record.branch,
                worktree: &record.worktree,
                task: &record.task,
            };
            println!("{}", serde_json::to_string(&row)?);
        }
    }
    Ok(())
}
