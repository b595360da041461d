//! Kit configuration stored under `.gemini-kit/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::find::FindOptions;

/// Kit configuration (TOML).
///
/// Missing fields take their defaults, so an empty or absent file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KitConfig {
    /// Where session files live, relative to the project root.
    pub sessions_dir: PathBuf,

    /// Persist session mutations in the background (debounced).
    pub auto_save: bool,

    /// Quiet period before a debounced write, in milliseconds.
    pub save_debounce_ms: u64,

    /// Retry budget for sessions not started by a workflow.
    pub max_retries_default: u32,

    pub search: FindOptions,

    /// Command-backed agents keyed by agent id.
    pub agents: BTreeMap<String, AgentCommandConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentCommandConfig {
    /// Program and arguments; the rendered prompt is written to stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for AgentCommandConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            timeout_secs: 10 * 60,
        }
    }
}

impl Default for KitConfig {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from(".gemini-kit").join("sessions"),
            auto_save: true,
            save_debounce_ms: 500,
            max_retries_default: 3,
            search: FindOptions::default(),
            agents: BTreeMap::new(),
        }
    }
}

impl KitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sessions_dir.as_os_str().is_empty() {
            return Err(anyhow!("sessions_dir must not be empty"));
        }
        if self.save_debounce_ms == 0 {
            return Err(anyhow!("save_debounce_ms must be > 0"));
        }
        if self.search.max_files == 0 {
            return Err(anyhow!("search.max_files must be > 0"));
        }
        if self.search.max_file_bytes == 0 {
            return Err(anyhow!("search.max_file_bytes must be > 0"));
        }
        for (id, agent) in &self.agents {
            if agent.command.is_empty() || agent.command[0].trim().is_empty() {
                return Err(anyhow!("agents.{id}.command must be a non-empty array"));
            }
            if agent.timeout_secs == 0 {
                return Err(anyhow!("agents.{id}.timeout_secs must be > 0"));
            }
        }
        Ok(())
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

/// All canonical kit paths for a project root.
#[derive(Debug, Clone)]
pub struct KitPaths {
    pub root: PathBuf,
    pub kit_dir: PathBuf,
    pub config_path: PathBuf,
}

impl KitPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let kit_dir = root.join(".gemini-kit");
        Self {
            config_path: kit_dir.join("config.toml"),
            kit_dir,
            root,
        }
    }

    /// Absolute sessions directory for `config`.
    pub fn sessions_dir(&self, config: &KitConfig) -> PathBuf {
        self.root.join(&config.sessions_dir)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `KitConfig::default()`.
pub fn load_config(path: &Path) -> Result<KitConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "no config file, using defaults");
        let cfg = KitConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: KitConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &KitConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
