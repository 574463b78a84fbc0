//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use kce_knowledge::StoreConfig;

/// Everything the engine needs to assemble its components. Passed once at
/// construction; nothing here changes during a run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Knowledge store backend
    pub store: StoreConfig,
    /// Root directory for human-readable blobs; in-memory sink when unset
    pub blob_root: Option<PathBuf>,
    /// Default per-node script timeout
    pub default_node_timeout: Duration,
    /// Optional wall-clock limit for a whole run
    pub run_timeout: Option<Duration>,
    /// Maximum planner steps per run
    pub depth_budget: usize,
    /// Grace window before a cancelled subprocess is killed
    pub kill_grace: Duration,
    /// Environment variables passed through to scripts
    pub script_env_allowlist: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::Memory,
            blob_root: None,
            default_node_timeout: Duration::from_secs(60),
            run_timeout: None,
            depth_budget: 64,
            kill_grace: Duration::from_secs(5),
            script_env_allowlist: ["PATH", "HOME", "LANG"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl EngineConfig {
    /// In-memory config for tests, with a short node timeout
    pub fn ephemeral() -> Self {
        Self {
            default_node_timeout: Duration::from_secs(10),
            ..Self::default()
        }
    }
}
