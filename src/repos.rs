use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::{Config, Repo, StateDirs};
use crate::git;
use crate::process::best_error_line;
use crate::reconcile::{self, ActiveAgent};
use crate::ui::{progress, truncate};

/// Derive a repo name from its URL: last path component, `.git` stripped.
pub(crate) fn repo_name_from_url(url: &str) -> Option<String> {
    let clean = url.trim_end_matches('/');
    let clean = clean.strip_suffix(".git").unwrap_or(clean);
    Path::new(clean)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .filter(|name| !name.trim().is_empty())
}

pub(crate) fn cmd_add_repo(
    dirs: &StateDirs,
    config: &mut Config,
    url: &str,
    name: Option<&str>,
) -> Result<()> {
    let name = match name {
        Some(name) => name.to_string(),
        None => repo_name_from_url(url)
            .with_context(|| format!("could not derive a repo name from `{url}`"))?,
    };
    let repo_path = dirs.repos.join(&name);
    if repo_path.exists() {
        println!("Repository '{name}' already exists at {}", repo_path.display());
        return Ok(());
    }

    progress(&format!("cloning {url}"));
    let output = git::clone(url, &repo_path)?;
    if !output.success() {
        bail!("failed to clone: {}", best_error_line(&output.stderr));
    }

    config.repos.insert(
        name.clone(),
        Repo {
            path: repo_path,
            url: url.to_string(),
            added: Utc::now(),
        },
    );
    dirs.save(config)?;
    println!("Added repository: {name}");
    Ok(())
}

/// Register an existing local checkout without cloning. The path doubles as
/// the base for shared-dependency linking on spawn.
pub(crate) fn cmd_add_dir(
    dirs: &StateDirs,
    config: &mut Config,
    path: &str,
    name: Option<&str>,
) -> Result<()> {
    let repo_path = PathBuf::from(path)
        .canonicalize()
        .with_context(|| format!("cannot resolve directory `{path}`"))?;
    if !repo_path.join(".git").exists() {
        bail!("`{}` is not a git repository", repo_path.display());
    }

    let name = match name {
        Some(name) => name.to_string(),
        None => repo_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .context("directory has no name")?,
    };
    if config.repos.contains_key(&name) {
        println!("Repository '{name}' is already registered");
        return Ok(());
    }

    let url = repo_path.display().to_string();
    config.repos.insert(
        name.clone(),
        Repo {
            path: repo_path,
            url,
            added: Utc::now(),
        },
    );
    dirs.save(config)?;
    println!("Added repository: {name}");
    Ok(())
}

#[derive(Serialize)]
struct ListAgentRow<'a> {
    number: usize,
    session: &'a str,
    repo: &'a str,
    branch: &'a str,
    task: &'a str,
}

#[derive(Serialize)]
struct ListPayload<'a> {
    repos: &'a indexmap::IndexMap<String, Repo>,
    agents: Vec<ListAgentRow<'a>>,
}

pub(crate) fn cmd_list(config: &Config, json: bool) -> Result<()> {
    let view = reconcile::observed_active_agents(config, None);

    if json {
        let payload = ListPayload {
            repos: &config.repos,
            agents: view
                .iter()
                .map(|agent| ListAgentRow {
                    number: agent.ordinal,
                    session: agent.key.as_str(),
                    repo: &agent.record.repo,
                    branch: &agent.record.branch,
                    task: &agent.record.task,
                })
                .collect(),
        };
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    println!("\n=== REPOSITORIES ===");
    if config.repos.is_empty() {
        println!("  No repositories. Use `maestro add-repo <git-url>`");
    }
    for (name, repo) in &config.repos {
        println!("  {name}: {}", repo.path.display());
    }

    println!("\n=== ACTIVE AGENTS ===");
    if view.is_empty() {
        println!("  No active agents. Use `maestro spawn <repo> <branch>`");
    }
    for ActiveAgent { ordinal, record, .. } in &view {
        println!("  * [{ordinal}] {}:{}", record.repo, record.branch);
        if !record.task.is_empty() {
            println!("       task: {}", truncate(&record.task, 50));
        }
    }
    println!();
    Ok(())
}
