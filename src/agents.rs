use anyhow::{Result, bail};
use chrono::{Local, Utc};
use std::path::{Path, PathBuf};

use crate::config::{AgentRecord, AgentType, Config, SessionKey, StateDirs};
use crate::git;
use crate::picker;
use crate::pr;
use crate::process::best_error_line;
use crate::reconcile;
use crate::settings::Settings;
use crate::tmux;
use crate::ui::{confirm, progress, read_line};
use crate::workspace::{self, SharedPathOptions};

pub(crate) struct SpawnRequest {
    pub(crate) repo: Option<String>,
    pub(crate) branch: Option<String>,
    pub(crate) task: String,
    /// `None` means ask interactively when a task was given.
    pub(crate) auto_accept: Option<bool>,
    pub(crate) agent: AgentType,
    pub(crate) label: Option<String>,
    pub(crate) from_pr: Option<String>,
    pub(crate) from_branch: Option<String>,
    pub(crate) shared: SharedPathOptions,
}

/// Build the tmux command argv for an agent. With a task the agent runs it
/// inside a wrapper that keeps the pane alive afterwards, so output stays
/// inspectable and the session drops to a shell on Enter.
pub(crate) fn build_agent_command(
    agent: AgentType,
    bin: &str,
    task: &str,
    auto_accept: bool,
) -> Vec<String> {
    if task.is_empty() {
        return vec![bin.to_string()];
    }
    let runner = match (agent, auto_accept) {
        (AgentType::Claude, true) => format!("{bin} --dangerously-skip-permissions"),
        (AgentType::Claude, false) => bin.to_string(),
        (AgentType::Codex, true) => format!("{bin} --full-auto"),
        (AgentType::Codex, false) => bin.to_string(),
    };
    vec![
        "bash".to_string(),
        "-lc".to_string(),
        format!(
            "{runner} \"$1\"; echo; \
             echo '[Agent finished. Press Enter for a shell, Ctrl+D to exit]'; \
             read -r _; exec bash"
        ),
        "--".to_string(),
        task.to_string(),
    ]
}

fn prompt_branch(repo_path: &Path) -> Result<String> {
    let default = git::current_branch(repo_path).unwrap_or_else(|| "main".to_string());
    let response = read_line(&format!("Branch name [{default}]: "))?;
    if response.is_empty() {
        Ok(default)
    } else {
        Ok(response)
    }
}

fn confirm_auto_accept() -> Result<bool> {
    println!("\nAuto-accept mode lets the agent edit files and run commands");
    println!("without asking. Only enable it for tasks you trust.");
    confirm("Enable auto-accept? [y/N]: ")
}

pub(crate) fn cmd_spawn(
    dirs: &StateDirs,
    config: &mut Config,
    settings: &Settings,
    request: SpawnRequest,
) -> Result<()> {
    if request.from_pr.is_some() && request.from_branch.is_some() {
        bail!("use only one of --from-pr and --from-branch");
    }

    let mut repo_name = request.repo;
    let mut branch = request.branch;
    if let Some(pr_ref) = &request.from_pr {
        match pr::resolve_from_pr(pr_ref, config)? {
            Some((resolved_repo, resolved_branch)) => {
                repo_name = Some(resolved_repo);
                branch = Some(resolved_branch);
            }
            None => return Ok(()),
        }
    }
    if let Some(from_branch) = &request.from_branch {
        branch = Some(from_branch.clone());
    }

    let repo_name = match repo_name {
        Some(name) => name,
        None => {
            if config.repos.is_empty() {
                println!("No repositories. Use `maestro add-repo <git-url>` first.");
                return Ok(());
            }
            match picker::pick_repo(&config.repos, "Select repository: ") {
                Some(name) => name,
                None => {
                    println!("No repository selected.");
                    return Ok(());
                }
            }
        }
    };
    let Some(repo) = config.repos.get(&repo_name) else {
        bail!("repository `{repo_name}` not found; run `maestro add-repo` first");
    };
    let repo_path = repo.path.clone();
    // A repo registered from a local directory keeps that directory as the
    // base for shared-dependency linking.
    let base_path = if !repo.url.is_empty() && Path::new(&repo.url).is_dir() {
        PathBuf::from(&repo.url)
    } else {
        repo_path.clone()
    };

    let branch = match branch {
        Some(branch) => branch,
        None => prompt_branch(&repo_path)?,
    };

    let auto_accept = match request.auto_accept {
        Some(value) => value,
        None if request.task.is_empty() => false,
        None => confirm_auto_accept()?,
    };

    let worktree_dir = workspace::unique_worktree_name(config, &repo_name, &branch, Local::now());
    let worktree = dirs.worktrees.join(&worktree_dir);
    let session = SessionKey::for_worktree(&worktree_dir)?;

    workspace::provision(&repo_path, &worktree, &branch)?;

    match workspace::ensure_context_dir(&worktree) {
        Ok(_) => {}
        Err(err) => eprintln!("warning: could not set up context dir: {err:#}"),
    }
    let outcomes = workspace::link_shared_paths(&base_path, &worktree, request.shared);
    workspace::report_link_outcomes(&outcomes);

    let bin = match request.agent {
        AgentType::Claude => settings.claude_bin.as_str(),
        AgentType::Codex => settings.codex_bin.as_str(),
    };
    let command = build_agent_command(request.agent, bin, &request.task, auto_accept);
    progress(&format!("starting {} session", request.agent.display_name()));
    // If this fails, no record is persisted; the worktree is left on disk
    // for inspection and a later `kill --cleanup` or manual removal.
    tmux::new_session(session.as_str(), &worktree, Some(&command))?;

    config.agents.insert(
        session.clone(),
        AgentRecord {
            repo: repo_name.clone(),
            repo_path,
            branch: branch.clone(),
            worktree,
            task: request.task.clone(),
            agent_type: request.agent,
            label: request.label,
            started: Utc::now(),
        },
    );
    dirs.save(config)?;

    let count = reconcile::observed_active_agents(config, None).len();
    println!("\nSpawned agent on {repo_name}:{branch}");
    if !request.task.is_empty() {
        println!("  task: {}", request.task);
    }
    println!("  attach with: maestro attach {count}");
    Ok(())
}

pub(crate) fn cmd_kill(
    dirs: &StateDirs,
    config: &mut Config,
    token: &str,
    cleanup: bool,
) -> Result<()> {
    let view = reconcile::observed_active_agents(config, None);
    let key = reconcile::resolve_session(token, &view)?;

    tmux::kill_session(key.as_str());
    println!("Killed session: {key}");

    let Some(record) = config.agents.shift_remove(&key) else {
        return Ok(());
    };
    if cleanup {
        remove_worktree(&record.repo_path, &record.worktree);
    }
    dirs.save(config)?;
    Ok(())
}

pub(crate) fn cmd_killall(dirs: &StateDirs, config: &mut Config, cleanup: bool) -> Result<()> {
    let view = reconcile::observed_active_agents(config, None);
    if view.is_empty() && config.agents.is_empty() {
        println!("No active agents.");
        return Ok(());
    }

    for agent in &view {
        println!("Killing {}...", agent.key);
        tmux::kill_session(agent.key.as_str());
    }
    if cleanup {
        for record in config.agents.values() {
            remove_worktree(&record.repo_path, &record.worktree);
        }
    }
    let count = config.agents.len();
    config.agents.clear();
    dirs.save(config)?;
    println!("Killed {count} agent(s)");
    Ok(())
}

/// Force-remove a worktree, downgrading failure to a warning: the record is
/// going away either way, and a stray directory is recoverable by hand.
fn remove_worktree(repo_path: &Path, worktree: &Path) {
    progress(&format!("removing worktree {}", worktree.display()));
    match git::worktree_remove(repo_path, worktree, true) {
        Ok(output) if output.success() => {}
        Ok(output) => eprintln!(
            "warning: could not remove {}: {}",
            worktree.display(),
            best_error_line(&output.stderr)
        ),
        Err(err) => eprintln!("warning: could not remove {}: {err:#}", worktree.display()),
    }
}
