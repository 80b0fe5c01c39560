use chrono::{TimeZone, Utc};
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::TempDir;

use crate::archive::resolve_archive_key;
use crate::cli::{Cli, effective_auto_accept};
use crate::config::{
    AgentRecord, AgentType, ArchiveRecord, Config, Repo, SESSION_PREFIX, SessionKey, StateDirs,
};
use crate::picker::parse_picked_index;
use crate::process::{best_error_line, first_line, run_capture};
use crate::reconcile::{active_agents, find_in_view, resolve_session};
use crate::repos::repo_name_from_url;
use crate::tmux::filter_managed;
use crate::ui::truncate;
use crate::workspace;

fn run_git_checked(dir: &Path, args: &[&str]) {
    let output = run_capture("git", args, Some(dir)).unwrap();
    assert!(
        output.success(),
        "git {args:?} failed: {}",
        output.stderr
    );
}

fn init_test_repo(dir: &Path) {
    run_git_checked(dir, &["init", "-b", "main"]);
    run_git_checked(dir, &["config", "user.email", "test@example.com"]);
    run_git_checked(dir, &["config", "user.name", "Test"]);
    fs::write(dir.join("README.md"), "hello\n").unwrap();
    run_git_checked(dir, &["add", "."]);
    run_git_checked(dir, &["commit", "-m", "init"]);
}

fn key(name: &str) -> SessionKey {
    SessionKey::new(format!("{SESSION_PREFIX}{name}")).unwrap()
}

fn record(repo: &str, branch: &str, label: Option<&str>) -> AgentRecord {
    AgentRecord {
        repo: repo.to_string(),
        repo_path: Path::new("/tmp/repo").to_path_buf(),
        branch: branch.to_string(),
        worktree: Path::new("/tmp/wt").to_path_buf(),
        task: String::new(),
        agent_type: AgentType::Claude,
        label: label.map(str::to_string),
        started: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
    }
}

fn archive_record(repo: &str, branch: &str) -> ArchiveRecord {
    ArchiveRecord {
        repo: repo.to_string(),
        repo_path: Path::new("/tmp/repo").to_path_buf(),
        branch: branch.to_string(),
        worktree: Path::new("/tmp/wt").to_path_buf(),
        task: String::new(),
        agent_type: AgentType::Claude,
        label: None,
        started: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        notes: String::new(),
        archived_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
    }
}

// --- config persistence ---

#[test]
fn load_missing_config_yields_default() {
    let tmp = TempDir::new().unwrap();
    let dirs = StateDirs::rooted(tmp.path()).unwrap();
    let config = dirs.load();
    assert!(config.repos.is_empty());
    assert!(config.agents.is_empty());
    assert!(config.archives.is_empty());
}

#[test]
fn load_corrupt_config_moves_it_aside() {
    let tmp = TempDir::new().unwrap();
    let dirs = StateDirs::rooted(tmp.path()).unwrap();
    fs::write(&dirs.config_file, "{ not json").unwrap();

    let config = dirs.load();
    assert!(config.agents.is_empty());
    assert!(!dirs.config_file.exists());
    assert!(tmp.path().join("config.json.bak").exists());
}

#[test]
fn config_save_load_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let dirs = StateDirs::rooted(tmp.path()).unwrap();

    let mut config = Config::default();
    config.repos.insert(
        "myrepo".to_string(),
        Repo {
            path: tmp.path().join("repos/myrepo"),
            url: "https://example.com/myrepo.git".to_string(),
            added: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        },
    );
    config
        .agents
        .insert(key("myrepo-main-120000"), record("myrepo", "main", Some("x")));
    dirs.save(&config).unwrap();

    let loaded = dirs.load();
    assert_eq!(loaded.repos.len(), 1);
    assert_eq!(loaded.agents.len(), 1);
    let (loaded_key, loaded_record) = loaded.agents.first().unwrap();
    assert_eq!(loaded_key, &key("myrepo-main-120000"));
    assert_eq!(loaded_record.repo, "myrepo");
    assert_eq!(loaded_record.label.as_deref(), Some("x"));
}

#[test]
fn interrupted_save_leaves_prior_config_readable() {
    let tmp = TempDir::new().unwrap();
    let dirs = StateDirs::rooted(tmp.path()).unwrap();

    let mut config = Config::default();
    config
        .agents
        .insert(key("survivor"), record("myrepo", "main", None));
    dirs.save(&config).unwrap();

    // A save killed before the rename leaves a stray half-written temp
    // file beside the target; the live file must be unaffected.
    fs::write(tmp.path().join(".tmpab12cd"), r#"{"repos": {"half"#).unwrap();

    let loaded = dirs.load();
    assert_eq!(loaded.agents.len(), 1);
    assert!(loaded.agents.contains_key(&key("survivor")));
    assert!(!tmp.path().join("config.json.bak").exists());
}

#[test]
fn saved_config_is_owner_only() {
    let tmp = TempDir::new().unwrap();
    let dirs = StateDirs::rooted(tmp.path()).unwrap();
    dirs.save(&Config::default()).unwrap();

    let mode = fs::metadata(&dirs.config_file).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn state_dirs_are_private() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("state");
    let dirs = StateDirs::rooted(&root).unwrap();

    for dir in [&root, &dirs.repos, &dirs.worktrees] {
        let mode = fs::metadata(dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700, "{}", dir.display());
    }
}

#[test]
fn unknown_config_fields_are_tolerated() {
    let tmp = TempDir::new().unwrap();
    let dirs = StateDirs::rooted(tmp.path()).unwrap();
    fs::write(
        &dirs.config_file,
        r#"{"repos": {}, "agents": {}, "archives": {}, "future_field": 1}"#,
    )
    .unwrap();
    let config = dirs.load();
    assert!(config.repos.is_empty());
}

// --- session keys ---

#[test]
fn session_key_requires_prefix() {
    assert!(SessionKey::new("maestro-foo").is_ok());
    assert!(SessionKey::new("foo").is_err());
    assert!(SessionKey::new("maestro-").is_err());
    assert!(SessionKey::new("").is_err());
}

#[test]
fn session_key_for_worktree() {
    let session = SessionKey::for_worktree("myrepo-main-120000").unwrap();
    assert_eq!(session.as_str(), "maestro-myrepo-main-120000");
}

// --- reconciliation ---

#[test]
fn active_view_is_intersection_in_insertion_order() {
    let mut config = Config::default();
    config.agents.insert(key("a"), record("r1", "b1", None));
    config.agents.insert(key("b"), record("r2", "b2", None));
    config.agents.insert(key("c"), record("r3", "b3", None));

    // "b" has no live session; "stray" is live but has no record.
    let observed: HashSet<String> = ["maestro-a", "maestro-c", "maestro-stray"]
        .into_iter()
        .map(str::to_string)
        .collect();

    let view = active_agents(&config, &observed, None);
    assert_eq!(view.len(), 2);
    assert_eq!(view[0].ordinal, 1);
    assert_eq!(view[0].key, key("a"));
    assert_eq!(view[1].ordinal, 2);
    assert_eq!(view[1].key, key("c"));
    // The record without a session is retained, just not listed.
    assert!(config.agents.contains_key(&key("b")));
}

#[test]
fn active_view_label_filter() {
    let mut config = Config::default();
    config.agents.insert(key("a"), record("r", "b", Some("api")));
    config.agents.insert(key("b"), record("r", "b", None));
    config.agents.insert(key("c"), record("r", "b", Some("api")));

    let observed: HashSet<String> = ["maestro-a", "maestro-b", "maestro-c"]
        .into_iter()
        .map(str::to_string)
        .collect();

    let view = active_agents(&config, &observed, Some("api"));
    assert_eq!(view.len(), 2);
    assert_eq!(view[0].key, key("a"));
    assert_eq!(view[1].key, key("c"));
    assert_eq!(view[1].ordinal, 2);
}

#[test]
fn resolve_numeric_token_is_bounds_checked() {
    let mut config = Config::default();
    config.agents.insert(key("a"), record("r", "b", None));
    config.agents.insert(key("b"), record("r", "b", None));
    let observed: HashSet<String> = ["maestro-a", "maestro-b"]
        .into_iter()
        .map(str::to_string)
        .collect();
    let view = active_agents(&config, &observed, None);

    assert_eq!(resolve_session("1", &view).unwrap(), key("a"));
    assert_eq!(resolve_session("2", &view).unwrap(), key("b"));
    assert!(resolve_session("0", &view).is_err());
    assert!(resolve_session("3", &view).is_err());
    assert!(resolve_session("99", &view).is_err());
}

#[test]
fn resolve_name_token_prepends_prefix() {
    let resolved = resolve_session("myrepo-main-120000", &[]).unwrap();
    assert_eq!(resolved.as_str(), "maestro-myrepo-main-120000");

    // Already-prefixed names pass through unchanged, even with no view.
    let resolved = resolve_session("maestro-dead-session", &[]).unwrap();
    assert_eq!(resolved.as_str(), "maestro-dead-session");
}

#[test]
fn find_in_view_matches_resolved_key() {
    let mut config = Config::default();
    config.agents.insert(key("a"), record("r", "b", None));
    let observed: HashSet<String> =
        ["maestro-a"].into_iter().map(str::to_string).collect();
    let view = active_agents(&config, &observed, None);

    assert!(find_in_view(&view, &key("a")).is_some());
    assert!(find_in_view(&view, &key("gone")).is_none());
}

#[test]
fn filter_managed_keeps_only_prefixed_sessions() {
    let names = vec![
        "maestro-a".to_string(),
        "other".to_string(),
        "maestro-b".to_string(),
        "maestr".to_string(),
    ];
    let managed = filter_managed(names);
    assert_eq!(managed.len(), 2);
    assert!(managed.contains("maestro-a"));
    assert!(managed.contains("maestro-b"));
}

// --- archive / restore record moves ---

#[test]
fn archive_and_restore_roundtrip() {
    let mut config = Config::default();
    config.agents.insert(key("a"), record("myrepo", "feat", None));

    let archived_at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let archived = config
        .archive_agent(&key("a"), "left off mid-refactor".to_string(), archived_at)
        .unwrap();
    assert_eq!(archived.repo, "myrepo");
    assert_eq!(archived.notes, "left off mid-refactor");
    assert!(config.agents.is_empty());
    assert_eq!(config.archives.len(), 1);

    let notes = config
        .restore_archived(
            &key("a"),
            key("a2"),
            Path::new("/tmp/wt2").to_path_buf(),
        )
        .unwrap();
    assert_eq!(notes, "left off mid-refactor");
    assert!(config.archives.is_empty());
    let restored = config.agents.get(&key("a2")).unwrap();
    assert_eq!(restored.repo, "myrepo");
    assert_eq!(restored.branch, "feat");
    assert_eq!(restored.worktree, Path::new("/tmp/wt2"));
}

#[test]
fn restore_refuses_key_held_by_active_agent() {
    let mut config = Config::default();
    config.agents.insert(key("wt"), record("myrepo", "feat", None));
    config.archives.insert(key("old"), archive_record("myrepo", "feat"));

    let notes = config.restore_archived(&key("old"), key("wt"), Path::new("/tmp/wt").to_path_buf());
    assert!(notes.is_none());
    // Nothing moved: the archive survives and the live agent is untouched.
    assert!(config.archives.contains_key(&key("old")));
    assert_eq!(config.agents.get(&key("wt")).unwrap().branch, "feat");
}

#[test]
fn worktree_names_skip_keys_in_use() {
    let now = chrono::Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let taken = workspace::worktree_name("myrepo", "feat", now);

    let mut config = Config::default();
    config
        .archives
        .insert(SessionKey::for_worktree(&taken).unwrap(), archive_record("myrepo", "feat"));

    // Same repo/branch spawned at the same wall-clock second must not
    // collide with the archived key.
    let fresh = workspace::unique_worktree_name(&config, "myrepo", "feat", now);
    assert_eq!(fresh, "myrepo-feat-030406");

    // Active agents block a stamp the same way.
    config.agents.insert(
        SessionKey::for_worktree(&fresh).unwrap(),
        record("myrepo", "feat", None),
    );
    let next = workspace::unique_worktree_name(&config, "myrepo", "feat", now);
    assert_eq!(next, "myrepo-feat-030407");

    // With nothing in the way, the stamp is used as-is.
    assert_eq!(
        workspace::unique_worktree_name(&Config::default(), "myrepo", "feat", now),
        taken
    );
}

#[test]
fn archive_unknown_key_is_none() {
    let mut config = Config::default();
    assert!(config.archive_agent(&key("nope"), String::new(), Utc::now()).is_none());
    assert!(config
        .restore_archived(&key("nope"), key("x"), Path::new("/tmp").to_path_buf())
        .is_none());
}

// --- workspace provisioning (real git) ---

#[test]
fn worktree_name_flattens_branch_and_stamps_time() {
    let now = chrono::Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    assert_eq!(
        workspace::worktree_name("myrepo", "feat/login", now),
        "myrepo-feat-login-030405"
    );
}

#[test]
fn provision_creates_branch_and_worktree() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir(&repo).unwrap();
    init_test_repo(&repo);

    let worktree = tmp.path().join("wt");
    workspace::provision(&repo, &worktree, "feature").unwrap();

    assert!(worktree.join("README.md").is_file());
    assert!(crate::git::branch_exists(&repo, "feature"));
}

#[test]
fn forced_worktree_add_creates_missing_branch() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir(&repo).unwrap();
    init_test_repo(&repo);

    // Plain add refuses an unknown ref; -B creates the branch in place.
    let worktree = tmp.path().join("wt");
    let plain = crate::git::worktree_add(&repo, &worktree, "hotfix", false).unwrap();
    assert!(!plain.success());
    let forced = crate::git::worktree_add(&repo, &worktree, "hotfix", true).unwrap();
    assert!(forced.success(), "{}", forced.stderr);
    assert!(crate::git::branch_exists(&repo, "hotfix"));
}

#[test]
fn provision_surfaces_git_error_when_branch_is_busy() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir(&repo).unwrap();
    init_test_repo(&repo);

    let first = tmp.path().join("wt1");
    workspace::provision(&repo, &first, "feature").unwrap();

    // The branch is checked out at wt1; both add attempts fail and the
    // spawn aborts with git's own text.
    let second = tmp.path().join("wt2");
    let err = workspace::provision(&repo, &second, "feature").unwrap_err();
    assert!(err.to_string().contains("failed to create worktree"));
}

#[test]
fn context_dir_is_created_and_excluded_once() {
    let tmp = TempDir::new().unwrap();
    let repo = tmp.path().join("repo");
    fs::create_dir(&repo).unwrap();
    init_test_repo(&repo);

    let context = workspace::ensure_context_dir(&repo).unwrap();
    assert!(context.is_dir());
    workspace::ensure_context_dir(&repo).unwrap();

    let exclude = fs::read_to_string(repo.join(".git/info/exclude")).unwrap();
    let hits = exclude
        .lines()
        .filter(|line| line.trim() == ".context/")
        .count();
    assert_eq!(hits, 1);
}

#[test]
fn spawn_kill_lifecycle_without_a_multiplexer() {
    let tmp = TempDir::new().unwrap();
    let dirs = StateDirs::rooted(&tmp.path().join("state")).unwrap();
    let repo = tmp.path().join("demo");
    fs::create_dir(&repo).unwrap();
    init_test_repo(&repo);

    // Spawn, minus the tmux call: provision and persist a record.
    let now = chrono::Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let dir_name = workspace::worktree_name("demo", "feature-x", now);
    let worktree = dirs.worktrees.join(&dir_name);
    workspace::provision(&repo, &worktree, "feature-x").unwrap();

    let session = SessionKey::for_worktree(&dir_name).unwrap();
    assert!(session.as_str().contains("demo"));
    assert!(session.as_str().contains("feature-x"));

    let mut config = Config::default();
    config.agents.insert(
        session.clone(),
        AgentRecord {
            repo: "demo".to_string(),
            repo_path: repo.clone(),
            branch: "feature-x".to_string(),
            worktree: worktree.clone(),
            task: String::new(),
            agent_type: AgentType::Claude,
            label: None,
            started: Utc::now(),
        },
    );
    dirs.save(&config).unwrap();

    let observed: HashSet<String> =
        [session.as_str().to_string()].into_iter().collect();
    let view = active_agents(&config, &observed, None);
    assert_eq!(view.len(), 1);
    assert_eq!(view[0].ordinal, 1);

    // Kill ordinal 1 with cleanup.
    let resolved = resolve_session("1", &view).unwrap();
    let removed = config.agents.shift_remove(&resolved).unwrap();
    let output = crate::git::worktree_remove(&removed.repo_path, &removed.worktree, true).unwrap();
    assert!(output.success(), "{}", output.stderr);
    dirs.save(&config).unwrap();

    assert!(!worktree.exists());
    let view = active_agents(&dirs.load(), &observed, None);
    assert!(view.is_empty());
}

#[test]
fn read_notes_tolerates_absence() {
    let tmp = TempDir::new().unwrap();
    assert_eq!(workspace::read_notes(tmp.path()), "");
}

#[test]
fn link_shared_paths_links_and_copies() {
    let tmp = TempDir::new().unwrap();
    let base = tmp.path().join("base");
    let worktree = tmp.path().join("wt");
    fs::create_dir_all(base.join("node_modules")).unwrap();
    fs::write(base.join(".env"), "SECRET=1\n").unwrap();
    fs::create_dir(&worktree).unwrap();

    let outcomes = workspace::link_shared_paths(
        &base,
        &worktree,
        workspace::SharedPathOptions {
            link_node_modules: true,
            link_venv: true,
            copy_env: true,
        },
    );

    assert_eq!(
        outcomes,
        vec![
            ("node_modules", workspace::LinkOutcome::Linked),
            (".venv", workspace::LinkOutcome::Skipped),
            (".env", workspace::LinkOutcome::Copied),
        ]
    );
    assert!(worktree.join("node_modules").is_symlink());
    assert_eq!(fs::read_to_string(worktree.join(".env")).unwrap(), "SECRET=1\n");
}

// --- git helpers (real git) ---

#[test]
fn dirty_detection_covers_untracked_files() {
    let tmp = TempDir::new().unwrap();
    init_test_repo(tmp.path());

    assert!(!crate::git::is_dirty(tmp.path()).unwrap());
    fs::write(tmp.path().join("scratch.txt"), "wip\n").unwrap();
    assert!(crate::git::is_dirty(tmp.path()).unwrap());
}

#[test]
fn current_branch_reads_head() {
    let tmp = TempDir::new().unwrap();
    init_test_repo(tmp.path());
    assert_eq!(
        crate::git::current_branch(tmp.path()).as_deref(),
        Some("main")
    );
}

// --- picker / cli plumbing ---

#[test]
fn picked_index_parses_fzf_selection() {
    assert_eq!(parse_picked_index("3: repo/branch - task", 5), Some(2));
    assert_eq!(parse_picked_index("1", 1), Some(0));
    assert_eq!(parse_picked_index("0", 5), None);
    assert_eq!(parse_picked_index("6", 5), None);
    assert_eq!(parse_picked_index("abc", 5), None);
    assert_eq!(parse_picked_index("", 5), None);
}

#[test]
fn archive_tokens_resolve_by_listing_position() {
    let mut config = Config::default();
    config.archives.insert(key("one"), archive_record("r1", "b1"));
    config.archives.insert(key("two"), archive_record("r2", "b2"));

    assert_eq!(resolve_archive_key(&config.archives, "1").unwrap(), key("one"));
    assert_eq!(resolve_archive_key(&config.archives, "2").unwrap(), key("two"));
    assert!(resolve_archive_key(&config.archives, "0").is_err());
    assert!(resolve_archive_key(&config.archives, "3").is_err());

    // Name tokens get the prefix treatment, checked or not against the map.
    assert_eq!(
        resolve_archive_key(&config.archives, "two").unwrap(),
        key("two")
    );
}

#[test]
fn auto_accept_flags_override_settings() {
    assert_eq!(effective_auto_accept(true, false, Some(false)), Some(true));
    assert_eq!(effective_auto_accept(false, true, Some(true)), Some(false));
    assert_eq!(effective_auto_accept(false, false, Some(true)), Some(true));
    assert_eq!(effective_auto_accept(false, false, None), None);
}

#[test]
fn spawn_auto_accept_flags_conflict() {
    use clap::Parser;
    assert!(Cli::try_parse_from(["maestro", "spawn", "-y", "-n"]).is_err());
    assert!(Cli::try_parse_from(["maestro", "spawn", "repo", "branch", "-y"]).is_ok());
}

#[test]
fn logs_defaults_to_fifty_lines() {
    use clap::Parser;
    let cli = Cli::try_parse_from(["maestro", "logs", "1"]).unwrap();
    match cli.command {
        Some(crate::cli::Commands::Logs { lines, follow, .. }) => {
            assert_eq!(lines, 50);
            assert!(!follow);
        }
        other => panic!("unexpected parse: {other:?}"),
    }
}

#[test]
fn agent_command_wraps_task() {
    let plain = crate::agents::build_agent_command(AgentType::Claude, "claude", "", false);
    assert_eq!(plain, vec!["claude".to_string()]);

    let tasked =
        crate::agents::build_agent_command(AgentType::Claude, "claude", "fix the bug", true);
    assert_eq!(tasked[0], "bash");
    assert_eq!(tasked[1], "-lc");
    assert!(tasked[2].contains("--dangerously-skip-permissions"));
    assert_eq!(tasked.last().map(String::as_str), Some("fix the bug"));
}

#[test]
fn repo_names_derive_from_urls() {
    assert_eq!(
        repo_name_from_url("https://github.com/me/myrepo.git").as_deref(),
        Some("myrepo")
    );
    assert_eq!(
        repo_name_from_url("git@github.com:me/myrepo.git").as_deref(),
        Some("myrepo")
    );
    assert_eq!(
        repo_name_from_url("https://example.com/myrepo/").as_deref(),
        Some("myrepo")
    );
}

#[test]
fn truncate_is_char_safe() {
    assert_eq!(truncate("short", 10), "short");
    assert_eq!(truncate("a very long task description", 10), "a very ...");
}

#[test]
fn error_line_distillation() {
    assert_eq!(first_line("\n  first\nsecond\n"), "first");
    assert_eq!(first_line(""), "unknown error");
    assert_eq!(
        best_error_line("warning: stuff\nerror: branch taken\ndetail"),
        "error: branch taken"
    );
    assert_eq!(best_error_line("one\ntwo\n"), "two");
    assert_eq!(best_error_line("  \n"), "unknown error");
}
