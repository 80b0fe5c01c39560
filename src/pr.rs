use anyhow::Result;
use serde::Deserialize;

use crate::config::Config;
use crate::git;
use crate::monitor::resolve_or_pick;
use crate::picker;
use crate::process::{command_exists, first_line, run_capture};
use crate::reconcile;

/// Check that the GitHub CLI is installed and authenticated, printing a
/// pointer when it is not.
fn gh_ready() -> Result<bool> {
    if !command_exists("gh") {
        println!("GitHub CLI (gh) is not installed. See https://cli.github.com");
        return Ok(false);
    }
    let output = run_capture("gh", &["auth", "status"], None)?;
    if !output.success() {
        println!("GitHub CLI is not authenticated. Run `gh auth login` first.");
        return Ok(false);
    }
    Ok(true)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrHead {
    head_ref_name: String,
    #[serde(default)]
    head_repository_owner: Option<PrOwner>,
    #[serde(default)]
    head_repository: Option<PrRepoName>,
}

#[derive(Deserialize)]
struct PrOwner {
    login: String,
}

#[derive(Deserialize)]
struct PrRepoName {
    name: String,
}

/// Resolve a PR reference (number or URL) to a registered repo name and the
/// PR's head branch. `None` means resolution did not complete and a message
/// was already printed.
pub(crate) fn resolve_from_pr(pr_ref: &str, config: &Config) -> Result<Option<(String, String)>> {
    if !gh_ready()? {
        return Ok(None);
    }

    let output = run_capture(
        "gh",
        &[
            "pr",
            "view",
            pr_ref,
            "--json",
            "headRefName,headRepositoryOwner,headRepository",
        ],
        None,
    )?;
    if !output.success() {
        println!("Could not resolve PR `{pr_ref}`: {}", first_line(&output.stderr));
        return Ok(None);
    }
    let head: PrHead = serde_json::from_str(&output.stdout)?;

    // Match the PR's owner/name against registered repo URLs; ambiguity
    // falls back to the picker.
    let full_name = match (&head.head_repository_owner, &head.head_repository) {
        (Some(owner), Some(repo)) => Some(format!("{}/{}", owner.login, repo.name)),
        _ => None,
    };
    let matched = full_name.as_deref().and_then(|full_name| {
        config
            .repos
            .iter()
            .find(|(_, repo)| repo.url.to_lowercase().contains(&full_name.to_lowercase()))
            .map(|(name, _)| name.clone())
    });
    let repo_name = match matched {
        Some(name) => name,
        None => {
            println!("PR repo not recognized; pick the matching registered repo.");
            match picker::pick_repo(&config.repos, "Select repository: ") {
                Some(name) => name,
                None => {
                    println!("No repository selected.");
                    return Ok(None);
                }
            }
        }
    };
    Ok(Some((repo_name, head.head_ref_name)))
}

pub(crate) struct PrCreateOptions<'a> {
    pub(crate) base: Option<&'a str>,
    pub(crate) title: Option<&'a str>,
    pub(crate) body: Option<&'a str>,
    pub(crate) fill: bool,
    pub(crate) draft: bool,
    pub(crate) web: bool,
}

pub(crate) fn cmd_pr_create(
    config: &Config,
    token: Option<&str>,
    options: PrCreateOptions<'_>,
) -> Result<()> {
    if !gh_ready()? {
        return Ok(());
    }
    let view = reconcile::observed_active_agents(config, None);
    let Some(agent) = resolve_or_pick(&view, token, "Create PR for: ")? else {
        return Ok(());
    };
    let record = &agent.record;

    if git::is_dirty(&record.worktree)? {
        println!("Note: the worktree has uncommitted changes; they will not be in the PR.");
    }

    // The branch must exist on the remote before gh can open a PR from it.
    let push = git::push(&record.worktree, "origin", Some(&record.branch))?;
    if !push.success() {
        println!("Push failed: {}", push.stderr.trim());
        return Ok(());
    }

    let mut args = vec!["pr", "create", "--head", record.branch.as_str()];
    if let Some(base) = options.base {
        args.extend(["--base", base]);
    }
    if let Some(title) = options.title {
        args.extend(["--title", title]);
    }
    if let Some(body) = options.body {
        args.extend(["--body", body]);
    }
    if options.fill {
        args.push("--fill");
    }
    if options.draft {
        args.push("--draft");
    }
    if options.web {
        args.push("--web");
    }
    if options.title.is_none() && options.body.is_none() && !options.fill && !options.web {
        // Non-interactive default so the command never hangs in scripts.
        args.push("--fill");
    }

    let output = run_capture("gh", &args, Some(&record.worktree))?;
    if output.success() {
        print!("{}", output.stdout);
    } else {
        println!("{}", output.stderr.trim());
    }
    Ok(())
}

pub(crate) fn cmd_pr_view(config: &Config, token: Option<&str>, web: bool) -> Result<()> {
    if !gh_ready()? {
        return Ok(());
    }
    let view = reconcile::observed_active_agents(config, None);
    let Some(agent) = resolve_or_pick(&view, token, "View PR for: ")? else {
        return Ok(());
    };
    let record = &agent.record;

    let mut args = vec!["pr", "view", record.branch.as_str()];
    if web {
        args.push("--web");
    }
    let output = run_capture("gh", &args, Some(&record.worktree))?;
    if output.success() {
        print!("{}", output.stdout);
    } else {
        println!("{}", output.stderr.trim());
    }
    Ok(())
}

pub(crate) struct PrMergeOptions {
    pub(crate) merge: bool,
    pub(crate) squash: bool,
    pub(crate) rebase: bool,
    pub(crate) delete_branch: bool,
    pub(crate) auto: bool,
}

pub(crate) fn cmd_pr_merge(
    config: &Config,
    token: Option<&str>,
    options: PrMergeOptions,
) -> Result<()> {
    if !gh_ready()? {
        return Ok(());
    }
    let view = reconcile::observed_active_agents(config, None);
    let Some(agent) = resolve_or_pick(&view, token, "Merge PR for: ")? else {
        return Ok(());
    };
    let record = &agent.record;

    let mut args = vec!["pr", "merge", record.branch.as_str()];
    if options.merge {
        args.push("--merge");
    }
    if options.squash {
        args.push("--squash");
    }
    if options.rebase {
        args.push("--rebase");
    }
    if !options.merge && !options.squash && !options.rebase {
        args.push("--squash");
    }
    if options.delete_branch {
        args.push("--delete-branch");
    }
    if options.auto {
        args.push("--auto");
    }

    let output = run_capture("gh", &args, Some(&record.worktree))?;
    if output.success() {
        print!("{}", output.stdout);
    } else {
        println!("{}", output.stderr.trim());
    }
    Ok(())
}
