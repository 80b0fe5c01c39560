use clap::{Parser, Subcommand, ValueEnum};

use crate::config::AgentType;

#[derive(Debug, Parser)]
#[command(
    name = "maestro",
    version,
    about = "Conduct multiple AI coding agents across tmux sessions and git worktrees"
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Clone and register a repository.
    AddRepo {
        /// Git repository URL.
        url: String,
        /// Custom name for the repo. Defaults to the last URL component.
        #[arg(long)]
        name: Option<String>,
    },
    /// Register an existing local checkout without cloning.
    AddDir {
        /// Path to a local git repository.
        path: String,
        /// Custom name for the repo. Defaults to the directory name.
        #[arg(long)]
        name: Option<String>,
    },
    /// List repositories and active agents.
    List {
        #[arg(long)]
        json: bool,
    },
    /// Spawn a new coding agent in an isolated worktree.
    Spawn {
        /// Repository name. Omit to pick interactively.
        repo: Option<String>,
        /// Branch to work on. Omit to be prompted.
        branch: Option<String>,
        /// Task/prompt for the agent.
        #[arg(short = 't', long)]
        task: Option<String>,
        /// Enable auto-accept mode (skip permission prompts).
        #[arg(short = 'y', long, conflicts_with = "no_auto_accept")]
        auto_accept: bool,
        /// Disable auto-accept mode (interactive).
        #[arg(short = 'n', long)]
        no_auto_accept: bool,
        /// Which agent to launch.
        #[arg(long, value_enum, default_value_t = AgentType::Claude)]
        agent: AgentType,
        /// Free-form label used for filtering in `status`.
        #[arg(long)]
        label: Option<String>,
        /// Resolve repo and branch from a GitHub PR reference.
        #[arg(long)]
        from_pr: Option<String>,
        /// Spawn onto an existing branch.
        #[arg(long)]
        from_branch: Option<String>,
        /// Symlink node_modules from the base checkout (best effort).
        #[arg(long)]
        link_node_modules: bool,
        /// Symlink .venv from the base checkout (best effort).
        #[arg(long)]
        link_venv: bool,
        /// Copy .env from the base checkout (best effort).
        #[arg(long)]
        copy_env: bool,
    },
    /// Show detailed status of all active agents.
    Status {
        /// Only show agents with this label.
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Attach to an agent's tmux session.
    Attach {
        /// Agent number or session name. Omit to pick interactively.
        session: Option<String>,
    },
    /// Show changes made by agents.
    Diff {
        /// Agent number or session name. Shows all agents if omitted.
        session: Option<String>,
        /// Pipe the diff through an external tool (delta, difftastic, ...).
        #[arg(long)]
        tool: Option<String>,
    },
    /// Push an agent's branch to origin.
    Merge {
        /// Agent number or session name.
        session: String,
        /// Push even with uncommitted changes.
        #[arg(short = 'f', long)]
        force: bool,
    },
    /// Show recent output from an agent's terminal.
    Logs {
        /// Agent number or session name. Omit to pick interactively.
        session: Option<String>,
        /// Number of scrollback lines to capture.
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
        /// Keep following the output until interrupted.
        #[arg(short = 'f', long)]
        follow: bool,
    },
    /// Kill an agent's session.
    Kill {
        /// Agent number or session name.
        session: String,
        /// Also remove the worktree.
        #[arg(short = 'c', long)]
        cleanup: bool,
    },
    /// Kill all agents.
    Killall {
        /// Also remove all worktrees.
        #[arg(short = 'c', long)]
        cleanup: bool,
    },
    /// Interactive agent picker for scripting.
    Pick {
        #[arg(long, value_enum, default_value_t = PickFormat::Number)]
        format: PickFormat,
    },
    /// Archive an agent workspace for later restoration.
    Archive {
        /// Agent number or session name. Omit to pick interactively.
        session: Option<String>,
        /// Keep the worktree on disk instead of removing it.
        #[arg(long)]
        keep_worktree: bool,
    },
    /// List archived workspaces.
    Archives {
        #[arg(long)]
        json: bool,
    },
    /// Restore an archived workspace.
    Restore {
        /// Archive number (as listed by `archives`) or session name. Omit
        /// to pick interactively.
        name: Option<String>,
        /// Recreate the worktree even if it still exists.
        #[arg(long)]
        recreate: bool,
    },
    /// Open an agent's worktree in an editor.
    Open {
        /// Agent number or session name. Omit to pick interactively.
        session: Option<String>,
        /// Editor command. Defaults to $EDITOR, $VISUAL, then `code`.
        #[arg(long)]
        editor: Option<String>,
    },
    /// GitHub pull-request workflow for agent branches.
    Pr {
        #[command(subcommand)]
        command: PrCommands,
    },
}

#[derive(Debug, Subcommand)]
pub(crate) enum PrCommands {
    /// Create a PR from an agent's branch.
    Create {
        /// Agent number or session name. Omit to pick interactively.
        session: Option<String>,
        /// Base branch for the PR.
        #[arg(long)]
        base: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        body: Option<String>,
        /// Fill title and body from commits.
        #[arg(long)]
        fill: bool,
        #[arg(long)]
        draft: bool,
        /// Open the PR in a browser.
        #[arg(long)]
        web: bool,
    },
    /// View the PR for an agent's branch.
    View {
        session: Option<String>,
        #[arg(long)]
        web: bool,
    },
    /// Merge the PR for an agent's branch.
    Merge {
        session: Option<String>,
        /// Use a merge commit.
        #[arg(long)]
        merge: bool,
        /// Squash-merge.
        #[arg(long)]
        squash: bool,
        /// Rebase-merge.
        #[arg(long)]
        rebase: bool,
        /// Delete the branch after merging.
        #[arg(long)]
        delete_branch: bool,
        /// Enable auto-merge once checks pass.
        #[arg(long)]
        auto: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum PickFormat {
    Number,
    Session,
    Json,
}

impl std::fmt::Display for PickFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Number => "number",
            Self::Session => "session",
            Self::Json => "json",
        })
    }
}

/// Collapse the -y / -n flag pair and the settings default into the
/// tri-state the spawn flow uses: `None` means "ask when a task is given".
pub(crate) fn effective_auto_accept(
    flag_yes: bool,
    flag_no: bool,
    settings_default: Option<bool>,
) -> Option<bool> {
    if flag_yes {
        Some(true)
    } else if flag_no {
        Some(false)
    } else {
        settings_default
    }
}
