mod agents;
mod archive;
mod cli;
mod config;
mod git;
mod monitor;
mod picker;
mod pr;
mod process;
mod reconcile;
mod repos;
mod settings;
mod sync;
mod tmux;
mod ui;
mod workspace;

#[cfg(test)]
mod tests;

use clap::{CommandFactory, Parser};

use crate::agents::SpawnRequest;
use crate::cli::{Cli, Commands, PrCommands, effective_auto_accept};
use crate::config::{AgentType, StateDirs};
use crate::process::command_exists;
use crate::settings::Settings;
use crate::workspace::SharedPathOptions;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        let _ = Cli::command().print_help();
        println!();
        return 0;
    };

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("warning: {err:#}");
            Settings::default()
        }
    };

    let missing = missing_dependencies(&command, &settings);
    if !missing.is_empty() {
        println!("Missing dependencies: {}", missing.join(", "));
        println!("Please install them first.");
        return 1;
    }

    let dirs = match StateDirs::init() {
        Ok(dirs) => dirs,
        Err(err) => {
            eprintln!("error: {err:#}");
            return 1;
        }
    };
    let mut config = dirs.load();

    match dispatch(command, &dirs, &mut config, &settings) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err:#}");
            0
        }
    }
}

/// External binaries a command needs up front. Anything else degrades at
/// the point of use instead.
fn missing_dependencies(command: &Commands, settings: &Settings) -> Vec<String> {
    let mut required: Vec<String> = Vec::new();
    match command {
        Commands::AddRepo { .. } | Commands::AddDir { .. } => required.push("git".to_string()),
        Commands::Spawn { agent, .. } => {
            required.push("git".to_string());
            required.push("tmux".to_string());
            required.push(match agent {
                AgentType::Claude => settings.claude_bin.clone(),
                AgentType::Codex => settings.codex_bin.clone(),
            });
        }
        _ => {}
    }
    required
        .into_iter()
        .filter(|bin| !command_exists(bin))
        .collect()
}

fn dispatch(
    command: Commands,
    dirs: &StateDirs,
    config: &mut crate::config::Config,
    settings: &Settings,
) -> anyhow::Result<()> {
    match command {
        Commands::AddRepo { url, name } => {
            repos::cmd_add_repo(dirs, config, &url, name.as_deref())
        }
        Commands::AddDir { path, name } => {
            repos::cmd_add_dir(dirs, config, &path, name.as_deref())
        }
        Commands::List { json } => repos::cmd_list(config, json),
        Commands::Spawn {
            repo,
            branch,
            task,
            auto_accept,
            no_auto_accept,
            agent,
            label,
            from_pr,
            from_branch,
            link_node_modules,
            link_venv,
            copy_env,
        } => agents::cmd_spawn(
            dirs,
            config,
            settings,
            SpawnRequest {
                repo,
                branch,
                task: task.unwrap_or_default(),
                auto_accept: effective_auto_accept(
                    auto_accept,
                    no_auto_accept,
                    settings.auto_accept,
                ),
                agent,
                label,
                from_pr,
                from_branch,
                shared: SharedPathOptions {
                    link_node_modules,
                    link_venv,
                    copy_env,
                },
            },
        ),
        Commands::Status { label, json } => monitor::cmd_status(config, label.as_deref(), json),
        Commands::Attach { session } => monitor::cmd_attach(config, session.as_deref()),
        Commands::Diff { session, tool } => {
            monitor::cmd_diff(config, settings, session.as_deref(), tool.as_deref())
        }
        Commands::Merge { session, force } => sync::cmd_merge(config, &session, force),
        Commands::Logs {
            session,
            lines,
            follow,
        } => monitor::cmd_logs(config, session.as_deref(), lines, follow),
        Commands::Kill { session, cleanup } => agents::cmd_kill(dirs, config, &session, cleanup),
        Commands::Killall { cleanup } => agents::cmd_killall(dirs, config, cleanup),
        Commands::Pick { format } => monitor::cmd_pick(config, format),
        Commands::Archive {
            session,
            keep_worktree,
        } => archive::cmd_archive(dirs, config, session.as_deref(), keep_worktree),
        Commands::Archives { json } => archive::cmd_archives(config, json),
        Commands::Restore { name, recreate } => {
            archive::cmd_restore(dirs, config, name.as_deref(), recreate)
        }
        Commands::Open { session, editor } => {
            archive::cmd_open(config, session.as_deref(), editor.as_deref())
        }
        Commands::Pr { command } => match command {
            PrCommands::Create {
                session,
                base,
                title,
                body,
                fill,
                draft,
                web,
            } => pr::cmd_pr_create(
                config,
                session.as_deref(),
                pr::PrCreateOptions {
                    base: base.as_deref(),
                    title: title.as_deref(),
                    body: body.as_deref(),
                    fill,
                    draft,
                    web,
                },
            ),
            PrCommands::View { session, web } => pr::cmd_pr_view(config, session.as_deref(), web),
            PrCommands::Merge {
                session,
                merge,
                squash,
                rebase,
                delete_branch,
                auto,
            } => pr::cmd_pr_merge(
                config,
                session.as_deref(),
                pr::PrMergeOptions {
                    merge,
                    squash,
                    rebase,
                    delete_branch,
                    auto,
                },
            ),
        },
    }
}
