//! Process configuration (spec's CLI/config loading is excluded from the
//! core but required of the binary entrypoint): a `serde` + `toml` file
//! plus environment overrides for secrets, per spec §6's "plugin-specific
//! secrets are read from process environment; otherwise configuration
//! comes from the config root".

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct ProcessConfig {
    pub node_id: String,
    #[serde(default)]
    pub config_root: Option<PathBuf>,
    #[serde(default)]
    pub leader: LeaderConfig,
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    /// This node's own reachable address, announced into the cluster
    /// membership snapshot for diagnostics. Not required for any protocol
    /// to function.
    #[serde(default)]
    pub announced_address: Option<String>,
    #[serde(default = "default_membership_interval_ms")]
    pub membership_interval_ms: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LeaderConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ready_ttl_secs")]
    pub ready_ttl_secs: u64,
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ready_ttl_secs: default_ready_ttl_secs(),
            refresh_interval_ms: default_refresh_interval_ms(),
        }
    }
}

fn default_ready_ttl_secs() -> u64 {
    30
}

fn default_refresh_interval_ms() -> u64 {
    10_000
}

fn default_reconcile_interval_ms() -> u64 {
    2_000
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_membership_interval_ms() -> u64 {
    10_000
}

impl ProcessConfig {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
        let config: ProcessConfig = toml::from_str(&text)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
        Ok(config)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_in_defaults() {
        let config: ProcessConfig = toml::from_str(r#"node_id = "n1""#).unwrap();
        assert_eq!(config.node_id, "n1");
        assert!(!config.leader.enabled);
        assert_eq!(config.reconcile_interval_ms, 2_000);
        assert_eq!(config.log_filter, "info");
        assert!(config.announced_address.is_none());
        assert_eq!(config.membership_interval_ms, 10_000);
    }

    #[test]
    fn load_reads_and_parses_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.toml");
        std::fs::write(&path, "node_id = \"n2\"\nreconcile_interval_ms = 500\n").unwrap();
        let config = ProcessConfig::load(&path).unwrap();
        assert_eq!(config.node_id, "n2");
        assert_eq!(config.reconcile_interval_ms, 500);
    }
}
