use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Namespace prefix separating this tool's tmux sessions from everything
/// else running on the host.
pub(crate) const SESSION_PREFIX: &str = "maestro-";

/// A validated tmux session name carrying the reserved prefix. Used as the
/// key for both active agents and archives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct SessionKey(String);

impl SessionKey {
    pub(crate) fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        match raw.strip_prefix(SESSION_PREFIX) {
            Some(rest) if !rest.trim().is_empty() => Ok(Self(raw)),
            _ => bail!("session key `{raw}` must start with `{SESSION_PREFIX}`"),
        }
    }

    /// Build the key for a worktree directory name.
    pub(crate) fn for_worktree(worktree_name: &str) -> Result<Self> {
        Self::new(format!("{SESSION_PREFIX}{worktree_name}"))
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub(crate) enum AgentType {
    #[default]
    Claude,
    Codex,
}

impl AgentType {
    pub(crate) fn display_name(self) -> &'static str {
        match self {
            Self::Claude => "Claude Code",
            Self::Codex => "Codex",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Repo {
    pub(crate) path: PathBuf,
    #[serde(default)]
    pub(crate) url: String,
    pub(crate) added: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct AgentRecord {
    pub(crate) repo: String,
    /// Snapshot of the repo's path taken at spawn time, so kill/cleanup
    /// still works if the repo is later removed from the registry.
    pub(crate) repo_path: PathBuf,
    pub(crate) branch: String,
    pub(crate) worktree: PathBuf,
    #[serde(default)]
    pub(crate) task: String,
    #[serde(default)]
    pub(crate) agent_type: AgentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) label: Option<String>,
    pub(crate) started: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ArchiveRecord {
    pub(crate) repo: String,
    #[serde(default)]
    pub(crate) repo_path: PathBuf,
    pub(crate) branch: String,
    pub(crate) worktree: PathBuf,
    #[serde(default)]
    pub(crate) task: String,
    #[serde(default)]
    pub(crate) agent_type: AgentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) label: Option<String>,
    pub(crate) started: DateTime<Utc>,
    #[serde(default)]
    pub(crate) notes: String,
    pub(crate) archived_at: DateTime<Utc>,
}

/// The single persisted aggregate. Loaded once at command entry, mutated in
/// memory, saved once at exit; no ambient instance exists anywhere.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct Config {
    pub(crate) repos: IndexMap<String, Repo>,
    pub(crate) agents: IndexMap<SessionKey, AgentRecord>,
    pub(crate) archives: IndexMap<SessionKey, ArchiveRecord>,
}

impl Config {
    /// Move an active agent into the archives, stamping `archived_at`.
    /// Returns the archived record, or `None` if the key was not active.
    pub(crate) fn archive_agent(
        &mut self,
        key: &SessionKey,
        notes: String,
        archived_at: DateTime<Utc>,
    ) -> Option<&ArchiveRecord> {
        let agent = self.agents.shift_remove(key)?;
        let archived = ArchiveRecord {
            repo: agent.repo,
            repo_path: agent.repo_path,
            branch: agent.branch,
            worktree: agent.worktree,
            task: agent.task,
            agent_type: agent.agent_type,
            label: agent.label,
            started: agent.started,
            notes,
            archived_at,
        };
        self.archives.insert(key.clone(), archived);
        self.archives.get(key)
    }

    /// Move an archived record back into the active set under `session`,
    /// with a possibly recreated worktree path. Returns the notes captured
    /// at archive time, or `None` if the archive key was unknown or the
    /// target key is already held by an active agent. Refusing the
    /// collision keeps a key from existing in both maps at once.
    pub(crate) fn restore_archived(
        &mut self,
        archive_key: &SessionKey,
        session: SessionKey,
        worktree: PathBuf,
    ) -> Option<String> {
        if self.agents.contains_key(&session) {
            return None;
        }
        let entry = self.archives.shift_remove(archive_key)?;
        let record = AgentRecord {
            repo: entry.repo,
            repo_path: entry.repo_path,
            branch: entry.branch,
            worktree,
            task: entry.task,
            agent_type: entry.agent_type,
            label: entry.label,
            started: entry.started,
        };
        self.agents.insert(session, record);
        Some(entry.notes)
    }
}

/// Locations of the persisted state: `~/.maestro` with the config file and
/// the shared `repos/` and `worktrees/` directories, all owner-only.
#[derive(Debug, Clone)]
pub(crate) struct StateDirs {
    pub(crate) repos: PathBuf,
    pub(crate) worktrees: PathBuf,
    pub(crate) config_file: PathBuf,
    home: PathBuf,
}

impl StateDirs {
    pub(crate) fn init() -> Result<Self> {
        let home_dir = dirs::home_dir().context("could not determine home directory")?;
        Self::rooted(&home_dir.join(".maestro"))
    }

    pub(crate) fn rooted(home: &Path) -> Result<Self> {
        let state = Self {
            repos: home.join("repos"),
            worktrees: home.join("worktrees"),
            config_file: home.join("config.json"),
            home: home.to_path_buf(),
        };
        for dir in [&state.home, &state.repos, &state.worktrees] {
            create_private_dir(dir)?;
        }
        Ok(state)
    }

    /// Load the persisted config. Never fails the caller: a missing file
    /// yields the empty default, and an unparsable file is renamed aside as
    /// a forensic `.bak` artifact before the default is returned.
    pub(crate) fn load(&self) -> Config {
        let raw = match fs::read_to_string(&self.config_file) {
            Ok(raw) => raw,
            Err(_) => return Config::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(_) => {
                let backup = self.config_file.with_extension("json.bak");
                let _ = fs::rename(&self.config_file, &backup);
                Config::default()
            }
        }
    }

    /// Write the config durably: serialize to a temp file in the same
    /// directory, rename it over the target, then restrict permissions to
    /// the owner. The live file is never observable half-written.
    pub(crate) fn save(&self, config: &Config) -> Result<()> {
        let mut serialized =
            serde_json::to_string_pretty(config).context("failed to serialize config")?;
        serialized.push('\n');

        let dir = self
            .config_file
            .parent()
            .context("config file has no parent directory")?;
        let mut tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
        tmp.write_all(serialized.as_bytes())
            .context("failed to write config")?;
        tmp.persist(&self.config_file).with_context(|| {
            format!("failed to replace {}", self.config_file.display())
        })?;
        fs::set_permissions(&self.config_file, fs::Permissions::from_mode(0o600))
            .with_context(|| {
                format!("failed to restrict {}", self.config_file.display())
            })?;
        Ok(())
    }
}

fn create_private_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
        .with_context(|| format!("failed to create {}", path.display()))
}
