//! Operator settings – reads/writes `~/.warden/config.toml`.
//!
//! The file names the policy, the storage directory and the sub-agent roster.
//! Everything has a default so a missing file still yields a runnable kernel
//! backed by offline digest agents.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use warden_kernel::{ClearanceRegistry, LoggingContainment, Policy};
use warden_memory::{SqliteDeferredQueue, SqliteReputationLedger, SqliteShardVault};
use warden_middleware::EventBus;
use warden_runtime::{AgentPool, Components, DigestAgent, DigestSink, HttpAgent};
use warden_types::{CriticalityIndex, WardenError};

/// How a configured sub-agent produces its reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    /// Offline executor with a fixed proposal.
    #[default]
    Digest,
    /// OpenAI-compatible chat completions endpoint.
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    #[serde(default)]
    pub kind: AgentKind,
    /// Highest classification (1–5) this agent may receive.
    #[serde(default = "default_clearance")]
    pub clearance: u8,
    /// Http agents only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Digest agents only.
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default = "default_risk")]
    pub risk: f64,
}

/// Persisted operator configuration stored in `~/.warden/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Policy file.  The baseline policy is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_path: Option<PathBuf>,

    /// Directory for the SQLite stores.  Volatile stores when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(default = "default_agents")]
    pub agents: Vec<AgentConfig>,
}

fn default_clearance() -> u8 {
    5
}
fn default_action() -> String {
    "hold position".to_string()
}
fn default_risk() -> f64 {
    0.2
}
fn default_agents() -> Vec<AgentConfig> {
    ["sentinel-a", "sentinel-b", "sentinel-c"]
        .into_iter()
        .map(|id| AgentConfig {
            id: id.to_string(),
            kind: AgentKind::Digest,
            clearance: default_clearance(),
            base_url: None,
            model: None,
            action: default_action(),
            risk: default_risk(),
        })
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy_path: None,
            data_dir: None,
            agents: default_agents(),
        }
    }
}

impl Config {
    /// Build the agent pool and clearance registry from the roster.
    pub fn agents(&self) -> Result<(AgentPool, ClearanceRegistry), String> {
        let mut pool = AgentPool::new();
        let mut clearance = ClearanceRegistry::new();
        for a in &self.agents {
            let ci = CriticalityIndex::from_level(a.clearance)
                .ok_or_else(|| format!("agent {}: clearance {} is outside 1..=5", a.id, a.clearance))?;
            match a.kind {
                AgentKind::Digest => pool.register(DigestAgent::new(&a.id, &a.action, a.risk)),
                AgentKind::Http => {
                    let (Some(url), Some(model)) = (&a.base_url, &a.model) else {
                        return Err(format!("agent {}: http agents need base_url and model", a.id));
                    };
                    pool.register(HttpAgent::new(&a.id, url, model));
                }
            }
            clearance.grant(&a.id, ci);
        }
        Ok((pool, clearance))
    }

    /// Load the configured policy, or the baseline when none is set.
    pub fn policy(&self) -> Result<Policy, String> {
        match &self.policy_path {
            Some(path) => load_policy(path),
            None => Ok(Policy::baseline()),
        }
    }

    /// Wire the kernel's collaborators.
    pub fn components(&self) -> Result<Components, String> {
        let (agents, clearance) = self.agents()?;
        let Some(dir) = &self.data_dir else {
            return Components::in_memory(agents, clearance).map_err(|e| e.to_string());
        };
        fs::create_dir_all(dir)
            .map_err(|e| format!("Failed to create data directory {}: {}", dir.display(), e))?;
        let db = |name: &str| dir.join(name).to_string_lossy().into_owned();
        let storage = |e: warden_memory::StorageError| WardenError::from(e).to_string();
        Ok(Components {
            agents,
            clearance,
            reputation: Arc::new(SqliteReputationLedger::open(&db("reputation.db")).map_err(storage)?),
            vault: Arc::new(SqliteShardVault::open(&db("vault.db")).map_err(storage)?),
            deferred: Arc::new(SqliteDeferredQueue::open(&db("deferred.db")).map_err(storage)?),
            sink: Arc::new(DigestSink),
            containment: Arc::new(LoggingContainment),
            bus: EventBus::default(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy files
// ─────────────────────────────────────────────────────────────────────────────

/// Parse and validate a policy file.  Any error here is fatal at startup.
pub fn load_policy(path: &Path) -> Result<Policy, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read policy at {}: {}", path.display(), e))?;
    let policy: Policy =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse policy: {}", e))?;
    policy.validate().map_err(|e| e.to_string())?;
    Ok(policy)
}

/// Write the baseline policy to `path`.  Refuses to overwrite unless `force`.
pub fn write_baseline_policy(path: &Path, force: bool) -> Result<(), String> {
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", path.display()));
    }
    let raw = toml::to_string_pretty(&Policy::baseline())
        .map_err(|e| format!("Failed to serialize policy: {}", e))?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {}", parent.display(), e))?;
        }
    }
    fs::write(path, raw).map_err(|e| format!("Failed to write policy at {}: {}", path.display(), e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Config files
// ─────────────────────────────────────────────────────────────────────────────

fn home() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

/// Return the path to `~/.warden/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home())
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".warden").join("config.toml")
}

/// Load `path`, falling back to defaults when it does not exist.  `WARDEN_*`
/// overrides apply either way.
pub fn load_or_default(path: &Path) -> Result<Config, String> {
    let mut cfg = load_from(path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `WARDEN_*` environment variable overrides to `cfg`.
///
/// | Variable | Effect |
/// |---|---|
/// | `WARDEN_POLICY` | `policy_path` |
/// | `WARDEN_DATA_DIR` | `data_dir`; `memory` selects volatile stores |
/// | `WARDEN_LLM_URL` | `base_url` of every http agent |
/// | `WARDEN_MODEL` | `model` of every http agent |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("WARDEN_POLICY") {
        cfg.policy_path = Some(PathBuf::from(v));
    }
    if let Ok(v) = std::env::var("WARDEN_DATA_DIR") {
        cfg.data_dir = if v == "memory" { None } else { Some(PathBuf::from(v)) };
    }
    let url = std::env::var("WARDEN_LLM_URL").ok();
    let model = std::env::var("WARDEN_MODEL").ok();
    for agent in cfg.agents.iter_mut().filter(|a| a.kind == AgentKind::Http) {
        if let Some(url) = &url {
            agent.base_url = Some(url.clone());
        }
        if let Some(model) = &model {
            agent.model = Some(model.clone());
        }
    }
}

/// Save the config to a specific path, owner-only on Unix.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

/// Write a default config to `~/.warden/config.toml` with a data directory
/// beside it.
pub fn init_default() -> Result<PathBuf, String> {
    let path = config_path();
    let cfg = Config {
        data_dir: path.parent().map(|p| p.join("data")),
        ..Config::default()
    };
    save_to(&cfg, &path)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_agent(id: &str) -> AgentConfig {
        AgentConfig {
            id: id.to_string(),
            kind: AgentKind::Http,
            clearance: 4,
            base_url: Some("http://localhost:11434".to_string()),
            model: Some("llama3".to_string()),
            action: default_action(),
            risk: default_risk(),
        }
    }

    #[test]
    fn config_path_points_to_warden_dir() {
        let p = config_path_for_home("/home/operator");
        assert!(p.to_string_lossy().contains(".warden"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn roundtrip_config_with_mixed_agents() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let mut cfg = Config::default();
        cfg.agents.push(http_agent("remote"));
        save_to(&cfg, &path).expect("save");
        assert_eq!(load_from(&path).expect("load").expect("some"), cfg);
    }

    #[test]
    fn minimal_agent_entry_gets_defaults() {
        let cfg: Config = toml::from_str("[[agents]]\nid = \"solo\"\n").expect("parse");
        assert_eq!(cfg.agents.len(), 1);
        assert_eq!(cfg.agents[0].kind, AgentKind::Digest);
        assert_eq!(cfg.agents[0].clearance, 5);
        assert!(cfg.data_dir.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");
        let mode = std::fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn agents_are_registered_with_their_clearance() {
        let mut cfg = Config::default();
        cfg.agents.push(http_agent("remote"));
        let (pool, clearance) = cfg.agents().expect("agents");
        assert_eq!(pool.len(), 4);
        assert!(clearance.check("remote", CriticalityIndex::Ci4).is_ok());
        assert!(clearance.check("remote", CriticalityIndex::Ci5).is_err());
    }

    #[test]
    fn http_agent_without_endpoint_is_rejected() {
        let mut agent = http_agent("remote");
        agent.base_url = None;
        let cfg = Config {
            agents: vec![agent],
            ..Config::default()
        };
        assert!(cfg.agents().is_err());
    }

    #[test]
    fn out_of_range_clearance_is_rejected() {
        let mut cfg = Config::default();
        cfg.agents[0].clearance = 9;
        assert!(cfg.agents().is_err());
    }

    #[test]
    fn baseline_policy_file_loads_back() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("policy.toml");
        write_baseline_policy(&path, false).expect("write");
        assert_eq!(load_policy(&path).expect("load"), Policy::baseline());
        assert!(write_baseline_policy(&path, false).is_err());
        assert!(write_baseline_policy(&path, true).is_ok());
    }

    #[test]
    fn invalid_policy_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("policy.toml");
        let mut policy = Policy::baseline();
        policy.round_limit = 0;
        std::fs::write(&path, toml::to_string_pretty(&policy).unwrap()).unwrap();
        assert!(load_policy(&path).unwrap_err().contains("round_limit"));
    }

    #[test]
    fn sqlite_components_live_in_data_dir() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cfg = Config {
            data_dir: Some(dir.path().join("data")),
            ..Config::default()
        };
        let components = cfg.components().expect("components");
        assert_eq!(components.agents.len(), 3);
        assert!(dir.path().join("data").join("reputation.db").exists());
        assert!(dir.path().join("data").join("deferred.db").exists());
    }

    #[test]
    fn env_overrides_reach_http_agents_only() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("WARDEN_MODEL", "qwen2") };
        let mut cfg = Config::default();
        cfg.agents.push(http_agent("remote"));
        apply_env_overrides(&mut cfg);
        unsafe { std::env::remove_var("WARDEN_MODEL") };
        assert_eq!(cfg.agents[3].model.as_deref(), Some("qwen2"));
        assert!(cfg.agents[0].model.is_none());
    }
}
