use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Ordered list of shard database data directories. Contiguous shard
    /// index ranges are derived from the order, so reordering this list
    /// moves data; only ever append.
    #[serde(default = "default_databases")]
    pub databases: Vec<String>,
    #[serde(default = "default_meta_path")]
    pub meta_path: String,
    /// Upper bound of the shard index space. Raise when growing the fleet,
    /// never lower.
    #[serde(default = "default_max_shard_index")]
    pub max_shard_index: u32,
    #[serde(default = "default_metrics_flush_secs")]
    pub metrics_flush_secs: u64,
    #[serde(default = "default_metrics_retention_days")]
    pub metrics_retention_days: u32,
    /// Poll interval for picking up rule/hook changes from the meta store.
    #[serde(default = "default_rule_reload_secs")]
    pub rule_reload_secs: u64,
    /// Side-effect worker pool size; `0` means the CPU count.
    #[serde(default)]
    pub side_effect_workers: usize,
    /// Process-wide hide texts redacted from every outbound alarm.
    #[serde(default)]
    pub hide_texts: Vec<String>,
}

fn default_http_port() -> u16 {
    31300
}

fn default_databases() -> Vec<String> {
    vec!["data/db1".to_string()]
}

fn default_meta_path() -> String {
    "data/meta.db".to_string()
}

fn default_max_shard_index() -> u32 {
    loghive_storage::sharding::DEFAULT_MAX_SHARD_INDEX
}

fn default_metrics_flush_secs() -> u64 {
    60
}

fn default_metrics_retention_days() -> u32 {
    30
}

fn default_rule_reload_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            databases: default_databases(),
            meta_path: default_meta_path(),
            max_shard_index: default_max_shard_index(),
            metrics_flush_secs: default_metrics_flush_secs(),
            metrics_retention_days: default_metrics_retention_days(),
            rule_reload_secs: default_rule_reload_secs(),
            side_effect_workers: 0,
            hide_texts: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }
}

/// JSON seed file for `loghive-server seed-rules`.
#[derive(Debug, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub hooks: Vec<HookSeed>,
    #[serde(default)]
    pub rules: Vec<RuleSeed>,
}

#[derive(Debug, Deserialize)]
pub struct HookSeed {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub hide_texts: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RuleSeed {
    pub module: String,
    pub short: String,
    pub level: i32,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub hook_id: String,
    #[serde(default)]
    pub rate_sec: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_method() -> String {
    "dingtalk".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_apply_to_missing_fields() {
        let config: ServerConfig = toml::from_str("databases = [\"/srv/db1\", \"/srv/db2\"]").unwrap();
        assert_eq!(config.databases.len(), 2);
        assert_eq!(config.max_shard_index, 8);
        assert_eq!(config.metrics_flush_secs, 60);
        assert_eq!(config.metrics_retention_days, 30);
        assert_eq!(config.side_effect_workers, 0);
    }

    #[test]
    fn seed_file_parses_with_defaults() {
        let seed: SeedFile = serde_json::from_str(
            r#"{
                "hooks": [{"id": "h1", "url": "https://example.com/robot"}],
                "rules": [{"module": "svc-a", "short": "oom", "level": 2, "hook_id": "h1", "rate_sec": 60}]
            }"#,
        )
        .unwrap();
        assert_eq!(seed.hooks[0].method, "dingtalk");
        assert!(seed.rules[0].enabled);
    }
}
