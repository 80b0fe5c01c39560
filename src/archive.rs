use anyhow::{Result, bail};
use chrono::Utc;
use indexmap::IndexMap;
use std::fs;

use crate::config::{ArchiveRecord, Config, SessionKey, StateDirs};
use crate::git;
use crate::monitor::resolve_or_pick;
use crate::picker;
use crate::process::best_error_line;
use crate::reconcile;
use crate::tmux;
use crate::ui::{progress, truncate};
use crate::workspace;

pub(crate) fn cmd_archive(
    dirs: &StateDirs,
    config: &mut Config,
    token: Option<&str>,
    keep_worktree: bool,
) -> Result<()> {
    let view = reconcile::observed_active_agents(config, None);
    let Some(agent) = resolve_or_pick(&view, token, "Archive: ")? else {
        return Ok(());
    };
    let key = agent.key.clone();
    let record = agent.record.clone();

    tmux::kill_session(key.as_str());

    // Notes are read before the worktree goes away so they survive in the
    // archive record.
    let notes = workspace::read_notes(&record.worktree);

    if !keep_worktree {
        progress(&format!("removing worktree {}", record.worktree.display()));
        match git::worktree_remove(&record.repo_path, &record.worktree, true) {
            Ok(output) if output.success() => {}
            Ok(output) => eprintln!(
                "warning: could not remove {}: {}",
                record.worktree.display(),
                best_error_line(&output.stderr)
            ),
            Err(err) => eprintln!(
                "warning: could not remove {}: {err:#}",
                record.worktree.display()
            ),
        }
    }

    config.archive_agent(&key, notes, Utc::now());
    dirs.save(config)?;
    println!("Archived: {key}");
    if keep_worktree {
        println!("  worktree kept at {}", record.worktree.display());
    }
    Ok(())
}

pub(crate) fn cmd_archives(config: &Config, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&config.archives)?);
        return Ok(());
    }

    println!("\n=== ARCHIVED WORKSPACES ===");
    if config.archives.is_empty() {
        println!("  No archived workspaces.");
    }
    for (offset, (key, entry)) in config.archives.iter().enumerate() {
        println!(
            "  [{}] {} ({}:{})",
            offset + 1,
            key,
            entry.repo,
            entry.branch
        );
        println!("       archived: {}", entry.archived_at.format("%Y-%m-%d %H:%M"));
        if !entry.task.is_empty() {
            println!("       task: {}", truncate(&entry.task, 50));
        }
        if !entry.notes.is_empty() {
            println!("       notes: {}", truncate(entry.notes.trim(), 50));
        }
    }
    println!();
    Ok(())
}

/// Map a user token to an archive key. All-digit tokens are 1-based
/// positions in the archives listing, matching the numbers `archives`
/// prints; anything else gets the session-name prefix treatment.
pub(crate) fn resolve_archive_key(
    archives: &IndexMap<SessionKey, ArchiveRecord>,
    token: &str,
) -> Result<SessionKey> {
    let trimmed = token.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        let position: usize = trimmed.parse().unwrap_or(0);
        return match position
            .checked_sub(1)
            .and_then(|offset| archives.get_index(offset))
        {
            Some((key, _)) => Ok(key.clone()),
            None => bail!("invalid archive number: {trimmed}"),
        };
    }
    reconcile::resolve_session(trimmed, &[])
}

pub(crate) fn cmd_restore(
    dirs: &StateDirs,
    config: &mut Config,
    name: Option<&str>,
    recreate: bool,
) -> Result<()> {
    if config.archives.is_empty() {
        println!("No archived workspaces.");
        return Ok(());
    }

    let archive_key = match name {
        Some(name) => resolve_archive_key(&config.archives, name)?,
        None => match picker::pick_archive(&config.archives, "Restore: ") {
            Some(key) => key,
            None => {
                println!("No archive selected.");
                return Ok(());
            }
        },
    };
    let Some(entry) = config.archives.get(&archive_key).cloned() else {
        println!("Archive not found: {archive_key}");
        return Ok(());
    };

    let Some(repo) = config.repos.get(&entry.repo) else {
        println!(
            "Repository '{}' is no longer registered. Run `maestro add-repo` first.",
            entry.repo
        );
        return Ok(());
    };
    let repo_path = repo.path.clone();

    // Re-provision under the state root if the recorded parent vanished.
    let mut worktree = entry.worktree.clone();
    if worktree
        .parent()
        .map(|parent| !parent.is_dir())
        .unwrap_or(true)
    {
        if let Some(dir_name) = entry.worktree.file_name() {
            worktree = dirs.worktrees.join(dir_name);
        }
    }

    if recreate || !worktree.is_dir() {
        workspace::provision(&repo_path, &worktree, &entry.branch)?;
    }
    match workspace::ensure_context_dir(&worktree) {
        Ok(_) => {}
        Err(err) => eprintln!("warning: could not set up context dir: {err:#}"),
    }

    let dir_name = worktree
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| archive_key.as_str().to_string());
    let session = SessionKey::for_worktree(&dir_name)?;

    if config.agents.contains_key(&session) {
        println!("An active agent already holds {session}. Kill or archive it first.");
        return Ok(());
    }

    if tmux::session_exists(session.as_str()) {
        println!("Session already exists: {session}");
    } else {
        tmux::new_session(session.as_str(), &worktree, None)?;
    }

    let Some(notes) = config.restore_archived(&archive_key, session.clone(), worktree.clone())
    else {
        println!("Archive not found: {archive_key}");
        return Ok(());
    };
    if !notes.is_empty() {
        let _ = fs::write(workspace::notes_path(&worktree), &notes);
    }
    dirs.save(config)?;

    println!("Restored: {session}");
    println!("  worktree: {}", worktree.display());
    println!("  attach with: maestro attach {session}");
    Ok(())
}

pub(crate) fn cmd_open(config: &Config, token: Option<&str>, editor: Option<&str>) -> Result<()> {
    let view = reconcile::observed_active_agents(config, None);
    let Some(agent) = resolve_or_pick(&view, token, "Open: ")? else {
        return Ok(());
    };

    let editor = editor
        .map(str::to_string)
        .or_else(|| std::env::var("EDITOR").ok().filter(|value| !value.is_empty()))
        .or_else(|| std::env::var("VISUAL").ok().filter(|value| !value.is_empty()))
        .unwrap_or_else(|| "code".to_string());

    match std::process::Command::new(&editor)
        .arg(&agent.record.worktree)
        .spawn()
    {
        Ok(_) => println!("Opened {} in {editor}", agent.record.worktree.display()),
        Err(_) => println!("Editor not found: {editor}"),
    }
    Ok(())
}
