use serde::{Deserialize, Serialize};

use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Process settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The single configuration record the core consumes.
///
/// Every field has a serde default so a partial (or absent) TOML file
/// still yields a usable value. The host's bootstrap reads this once and
/// hands it to `MongoConfigs::connect`; nothing else in the core reads
/// configuration from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// MongoDB URI.
    #[serde(default = "d_connection_string")]
    pub connection_string: String,

    /// Database used when a bundle omits its own.
    #[serde(default = "d_default_database")]
    pub default_database: String,

    /// Collection used when a config bundle omits its own.
    #[serde(default = "d_configs_collection")]
    pub configs_collection: String,

    /// Collection used when a message bundle omits its own.
    #[serde(default = "d_messages_collection")]
    pub messages_collection: String,

    /// Collection holding per-player language preferences.
    #[serde(default = "d_languages_collection")]
    pub languages_collection: String,

    /// Upper bound on cached entries per cache instance.
    #[serde(default = "d_cache_max_size")]
    pub cache_max_size: usize,

    /// Time-to-live after write. 0 disables expiry by age.
    #[serde(default = "d_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    /// Time-to-idle after access. 0 disables.
    #[serde(default)]
    pub cache_idle_seconds: u64,

    /// Toggle hit/miss/eviction counters.
    #[serde(default = "d_true")]
    pub cache_record_stats: bool,

    /// Initial change-stream retry delay.
    #[serde(default = "d_backoff_start")]
    pub change_stream_backoff_start_millis: u64,

    /// Change-stream retry ceiling.
    #[serde(default = "d_backoff_max")]
    pub change_stream_backoff_max_millis: u64,

    /// Consecutive failures before a watch is declared lost.
    #[serde(default = "d_max_failures")]
    pub change_stream_max_consecutive_failures: u32,

    /// Fallback language code.
    #[serde(default = "d_default_language")]
    pub default_language: String,

    /// Driver connection pool size.
    #[serde(default = "d_storage_pool_size")]
    pub storage_pool_size: u32,

    /// Concurrent change-event dispatch bound.
    #[serde(default = "d_event_pool_size")]
    pub event_pool_size: usize,

    /// Per-call storage deadline.
    #[serde(default = "d_operation_timeout")]
    pub operation_timeout_millis: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_connection_string() -> String {
    "mongodb://localhost:27017".into()
}
fn d_default_database() -> String {
    "configs".into()
}
fn d_configs_collection() -> String {
    "configs".into()
}
fn d_messages_collection() -> String {
    "messages".into()
}
fn d_languages_collection() -> String {
    "player-languages".into()
}
fn d_cache_max_size() -> usize {
    10_000
}
fn d_cache_ttl_seconds() -> u64 {
    600
}
fn d_true() -> bool {
    true
}
fn d_backoff_start() -> u64 {
    1_000
}
fn d_backoff_max() -> u64 {
    60_000
}
fn d_max_failures() -> u32 {
    10
}
fn d_default_language() -> String {
    "en".into()
}
fn d_storage_pool_size() -> u32 {
    8
}
fn d_event_pool_size() -> usize {
    4
}
fn d_operation_timeout() -> u64 {
    10_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connection_string: d_connection_string(),
            default_database: d_default_database(),
            configs_collection: d_configs_collection(),
            messages_collection: d_messages_collection(),
            languages_collection: d_languages_collection(),
            cache_max_size: d_cache_max_size(),
            cache_ttl_seconds: d_cache_ttl_seconds(),
            cache_idle_seconds: 0,
            cache_record_stats: d_true(),
            change_stream_backoff_start_millis: d_backoff_start(),
            change_stream_backoff_max_millis: d_backoff_max(),
            change_stream_max_consecutive_failures: d_max_failures(),
            default_language: d_default_language(),
            storage_pool_size: d_storage_pool_size(),
            event_pool_size: d_event_pool_size(),
            operation_timeout_millis: d_operation_timeout(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, falling back to defaults for
    /// missing keys.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load from file if it exists and parses, otherwise return defaults.
    pub fn load_or_default(path: &str) -> Self {
        Self::load(path).unwrap_or_default()
    }
}
