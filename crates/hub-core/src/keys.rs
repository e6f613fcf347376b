//! KV keyspace string templates (spec §6), centralized so no subsystem
//! hand-formats a key inline and risks drifting from the normative prefixes.

pub fn leader_ready() -> String {
    "cluster:leader:ready".to_string()
}

pub fn proj_desired(node_id: &str) -> String {
    format!("cluster:proj_desired:{node_id}")
}

pub fn proj_actual(node_id: &str) -> String {
    format!("cluster:proj_actual:{node_id}")
}

pub fn proj_ts(node_id: &str) -> String {
    format!("cluster:proj_ts:{node_id}")
}

pub fn project_config(project_id: &str) -> String {
    format!("cluster:project_config:{project_id}")
}

pub fn ops_history() -> String {
    "cluster:ops_history".to_string()
}

/// Hash of `nodeID -> JSON cluster record` (spec §3's Cluster record),
/// refreshed by each node's own membership heartbeat.
pub fn cluster_members() -> String {
    "cluster:members".to_string()
}

pub fn component_source(kind: &str, id: &str) -> String {
    format!("{kind}:{id}")
}

pub fn daily_stats_hash(date: &str) -> String {
    format!("hub:daily_stats:hash:{date}")
}

pub fn daily_stats_field(
    node_id: &str,
    project_id: &str,
    component_type: &str,
    component_id: &str,
    pns: &str,
) -> String {
    format!("{node_id}|{project_id}|{component_type}|{component_id}|{pns}")
}

pub fn sample_data(sampler_name: &str, pns: &str) -> String {
    format!("sample_data:{sampler_name}:{pns}")
}

pub fn sample_count(sampler_name: &str, pns: &str) -> String {
    format!("sample_count:{sampler_name}:{pns}")
}

pub fn sample_hash(sampler_name: &str, pns: &str) -> String {
    format!("sample_hash:{sampler_name}:{pns}")
}

pub fn plugin_stats(date: &str, plugin_name: &str, outcome: &str) -> String {
    format!("plugin_stats:{date}:{plugin_name}:{outcome}")
}

pub fn lock(name: &str) -> String {
    format!("lock:{name}")
}

pub fn qps_series(node_id: &str, pns: &str) -> String {
    format!("hub:qps:{node_id}:{pns}")
}

/// The four retention / trim constants named in spec §6.
pub mod retention {
    pub const OPS_HISTORY_MAX_ENTRIES: usize = 10_000;
    pub const OPS_HISTORY_TTL_DAYS: u64 = 31;
    pub const PROJECT_CONFIG_TTL_DAYS: u64 = 7;
    pub const QPS_WINDOW_SECS: u64 = 3600;
    pub const DEFAULT_SAMPLE_MAX: usize = 1000;
    pub const DEFAULT_SAMPLE_TTL_SECS: u64 = 24 * 3600;
    pub const DEFAULT_DAILY_RETENTION_DAYS: u32 = 30;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_normative_prefixes() {
        assert_eq!(proj_desired("n1"), "cluster:proj_desired:n1");
        assert_eq!(
            daily_stats_field("n1", "p1", "ruleset", "r1", "PNS.x"),
            "n1|p1|ruleset|r1|PNS.x"
        );
        assert_eq!(lock("project:p1"), "lock:project:p1");
    }
}
