use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Default)]
struct PartialSettings {
    auto_accept: Option<bool>,
    diff_tool: Option<String>,
    claude_bin: Option<String>,
    codex_bin: Option<String>,
}

/// Optional user preferences layered over built-in defaults. Distinct from
/// the persisted workspace state in `config.json`: this file is only ever
/// read.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    /// Default for spawn's auto-accept mode; `None` means ask.
    pub(crate) auto_accept: Option<bool>,
    pub(crate) diff_tool: Option<String>,
    pub(crate) claude_bin: String,
    pub(crate) codex_bin: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_accept: None,
            diff_tool: None,
            claude_bin: "claude".to_string(),
            codex_bin: "codex".to_string(),
        }
    }
}

impl Settings {
    pub(crate) fn load() -> Result<Self> {
        let mut settings = Self::default();
        for path in settings_paths() {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings file {}", path.display()))?;
            let parsed: PartialSettings = toml::from_str(&raw)
                .with_context(|| format!("failed to parse settings file {}", path.display()))?;
            if parsed.auto_accept.is_some() {
                settings.auto_accept = parsed.auto_accept;
            }
            if let Some(diff_tool) = parsed.diff_tool
                && !diff_tool.trim().is_empty()
            {
                settings.diff_tool = Some(diff_tool);
            }
            if let Some(claude_bin) = parsed.claude_bin
                && !claude_bin.trim().is_empty()
            {
                settings.claude_bin = claude_bin;
            }
            if let Some(codex_bin) = parsed.codex_bin
                && !codex_bin.trim().is_empty()
            {
                settings.codex_bin = codex_bin;
            }
            break;
        }
        Ok(settings)
    }
}

fn settings_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("maestro").join("settings.toml"));
    }
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".maestro").join("settings.toml"));
    }
    paths
}
