use anyhow::{Result, bail};
use std::collections::HashSet;

use crate::config::{AgentRecord, Config, SESSION_PREFIX, SessionKey};
use crate::tmux;

/// One row of the canonical active-agent view: an agent whose persisted
/// record has a matching live session, numbered for user addressing.
/// Ordinals are view-relative and must not be cached across commands.
#[derive(Debug, Clone)]
pub(crate) struct ActiveAgent {
    pub(crate) ordinal: usize,
    pub(crate) key: SessionKey,
    pub(crate) record: AgentRecord,
}

/// Compute the canonical view by intersecting the persisted agent map with
/// the observed session set. Insertion order of `config.agents` is
/// preserved; ordinals run 1..N over the (optionally label-filtered)
/// intersection. Records without a live session are not listed but stay in
/// the config, so their worktree and metadata survive a crashed terminal.
pub(crate) fn active_agents(
    config: &Config,
    observed: &HashSet<String>,
    label: Option<&str>,
) -> Vec<ActiveAgent> {
    config
        .agents
        .iter()
        .filter(|(_, record)| match label {
            Some(label) => record.label.as_deref() == Some(label),
            None => true,
        })
        .filter(|(key, _)| observed.contains(key.as_str()))
        .enumerate()
        .map(|(offset, (key, record))| ActiveAgent {
            ordinal: offset + 1,
            key: key.clone(),
            record: record.clone(),
        })
        .collect()
}

/// The canonical view against the live tmux server.
pub(crate) fn observed_active_agents(config: &Config, label: Option<&str>) -> Vec<ActiveAgent> {
    active_agents(config, &tmux::list_active(), label)
}

/// Map a user-supplied token to a session key. All-digit tokens are
/// 1-based ordinals into `view` and are bounds-checked against it; name
/// tokens get the reserved prefix prepended (when absent) and are returned
/// without an existence check, so a record whose terminal died can still
/// be targeted for cleanup.
pub(crate) fn resolve_session(token: &str, view: &[ActiveAgent]) -> Result<SessionKey> {
    let trimmed = token.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|ch| ch.is_ascii_digit()) {
        let ordinal: usize = trimmed.parse().unwrap_or(0);
        return match ordinal
            .checked_sub(1)
            .and_then(|offset| view.get(offset))
        {
            Some(agent) => Ok(agent.key.clone()),
            None => bail!("invalid agent number: {trimmed}"),
        };
    }

    if trimmed.starts_with(SESSION_PREFIX) {
        SessionKey::new(trimmed)
    } else {
        SessionKey::new(format!("{SESSION_PREFIX}{trimmed}"))
    }
}

/// Find the view row for a resolved key, used by commands that only operate
/// on currently active agents.
pub(crate) fn find_in_view<'a>(
    view: &'a [ActiveAgent],
    key: &SessionKey,
) -> Option<&'a ActiveAgent> {
    view.iter().find(|agent| &agent.key == key)
}
