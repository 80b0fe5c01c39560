use anyhow::Result;

use crate::config::Config;
use crate::git;
use crate::process::best_error_line;
use crate::reconcile;
use crate::ui::progress;

/// Push an agent's branch to origin. Refuses while the worktree has
/// uncommitted changes unless forced, so half-done agent work does not end
/// up on the remote by accident.
pub(crate) fn cmd_merge(config: &Config, token: &str, force: bool) -> Result<()> {
    let view = reconcile::observed_active_agents(config, None);
    let key = reconcile::resolve_session(token, &view)?;
    let Some(record) = config.agents.get(&key) else {
        println!("Agent not found: {key}");
        return Ok(());
    };

    if git::is_dirty(&record.worktree)? {
        println!("Worktree has uncommitted changes:");
        let status = git::status_porcelain(&record.worktree)?;
        print!("{}", status.stdout);
        if !force {
            println!("Commit them first, or pass --force to push anyway.");
            return Ok(());
        }
    }

    progress(&format!("pushing {} to origin", record.branch));
    let output = git::push(&record.worktree, "origin", Some(&record.branch))?;
    if output.success() {
        println!("Pushed {} to origin", record.branch);
    } else {
        println!("Push failed: {}", best_error_line(&output.stderr));
    }
    Ok(())
}
