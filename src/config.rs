//! Configuration loading and management.

use serde::Deserialize;
use std::net::SocketAddr;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Daemon configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server identity and logging.
    #[serde(default)]
    pub server: ServerConfig,
    /// HTTP listen configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Ingest pipeline tunables.
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Webhook authentication.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Quality score weight table.
    #[serde(default)]
    pub quality: QualityWeights,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Name reported in logs and the health endpoint.
    #[serde(default = "default_server_name")]
    pub name: String,
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            log_format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Listen address for ingest, read APIs and /metrics.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Maximum accepted request body, in bytes. Oversize bodies get 413.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite path, or ":memory:" for an ephemeral store.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Capacity of the recent-notice dedup memo. The store's unique
    /// constraint stays authoritative; the memo only short-circuits hot
    /// repeats.
    #[serde(default = "default_dedup_cache_size")]
    pub dedup_cache_size: usize,
    /// Per-notification store deadline in milliseconds. On expiry the
    /// transaction rolls back and the caller is told to retry.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    /// Hard cap on sessions returned per epoch by read APIs.
    #[serde(default = "default_session_response_cap")]
    pub session_response_cap: usize,
    /// Wall-clock skew tolerated when matching a join webhook to a session
    /// for initial-role inference, in seconds.
    #[serde(default = "default_initial_role_tolerance_secs")]
    pub initial_role_tolerance_secs: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_cache_size: default_dedup_cache_size(),
            deadline_ms: default_deadline_ms(),
            session_response_cap: default_session_response_cap(),
            initial_role_tolerance_secs: default_initial_role_tolerance_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    /// HMAC-SHA256 secret for webhook signature verification. When unset,
    /// signatures are not checked and a warning is logged at startup.
    pub webhook_secret: Option<String>,
}

/// Quality score weight table.
///
/// The defaults are the hand-tuned production values; tests pin this table
/// so score changes show up as diffs. Each `*_penalty` applies per counted
/// session, capped by the matching `*_cap`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct QualityWeights {
    #[serde(default = "d_abnormal_penalty")]
    pub abnormal_penalty: f64,
    #[serde(default = "d_abnormal_cap")]
    pub abnormal_cap: f64,
    #[serde(default = "d_unknown_penalty")]
    pub unknown_penalty: f64,
    #[serde(default = "d_unknown_cap")]
    pub unknown_cap: f64,
    #[serde(default = "d_network_penalty")]
    pub network_penalty: f64,
    #[serde(default = "d_network_cap")]
    pub network_cap: f64,
    #[serde(default = "d_server_penalty")]
    pub server_penalty: f64,
    #[serde(default = "d_server_cap")]
    pub server_cap: f64,
    #[serde(default = "d_control_penalty")]
    pub control_penalty: f64,
    #[serde(default = "d_control_cap")]
    pub control_cap: f64,
    #[serde(default = "d_failed_call_penalty")]
    pub failed_call_penalty: f64,
    #[serde(default = "d_failed_call_cap")]
    pub failed_call_cap: f64,
    /// Flat penalty when the average session runs under one minute.
    #[serde(default = "d_short_avg_penalty")]
    pub short_avg_penalty: f64,
    /// Bonus when the normal-exit share exceeds `normal_exit_ratio`.
    #[serde(default = "d_normal_exit_bonus")]
    pub normal_exit_bonus: f64,
    #[serde(default = "d_normal_exit_ratio")]
    pub normal_exit_ratio: f64,
    /// Per-user penalties for reconnection behavior.
    #[serde(default = "d_unstable_penalty")]
    pub unstable_penalty: f64,
    #[serde(default = "d_moderate_penalty")]
    pub moderate_penalty: f64,
    #[serde(default = "d_rapid_penalty")]
    pub rapid_penalty: f64,
    #[serde(default = "d_burst_penalty")]
    pub burst_penalty: f64,
    #[serde(default = "d_burst_cap")]
    pub burst_cap: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            abnormal_penalty: d_abnormal_penalty(),
            abnormal_cap: d_abnormal_cap(),
            unknown_penalty: d_unknown_penalty(),
            unknown_cap: d_unknown_cap(),
            network_penalty: d_network_penalty(),
            network_cap: d_network_cap(),
            server_penalty: d_server_penalty(),
            server_cap: d_server_cap(),
            control_penalty: d_control_penalty(),
            control_cap: d_control_cap(),
            failed_call_penalty: d_failed_call_penalty(),
            failed_call_cap: d_failed_call_cap(),
            short_avg_penalty: d_short_avg_penalty(),
            normal_exit_bonus: d_normal_exit_bonus(),
            normal_exit_ratio: d_normal_exit_ratio(),
            unstable_penalty: d_unstable_penalty(),
            moderate_penalty: d_moderate_penalty(),
            rapid_penalty: d_rapid_penalty(),
            burst_penalty: d_burst_penalty(),
            burst_cap: d_burst_cap(),
        }
    }
}

fn default_server_name() -> String {
    "callscope".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8090))
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

fn default_db_path() -> String {
    "data/callscope.db".to_string()
}

fn default_dedup_cache_size() -> usize {
    10
}

fn default_deadline_ms() -> u64 {
    5_000
}

fn default_session_response_cap() -> usize {
    1_000
}

fn default_initial_role_tolerance_secs() -> i64 {
    5
}

fn d_abnormal_penalty() -> f64 {
    15.0
}
fn d_abnormal_cap() -> f64 {
    60.0
}
fn d_unknown_penalty() -> f64 {
    10.0
}
fn d_unknown_cap() -> f64 {
    40.0
}
fn d_network_penalty() -> f64 {
    8.0
}
fn d_network_cap() -> f64 {
    35.0
}
fn d_server_penalty() -> f64 {
    6.0
}
fn d_server_cap() -> f64 {
    25.0
}
fn d_control_penalty() -> f64 {
    3.0
}
fn d_control_cap() -> f64 {
    15.0
}
fn d_failed_call_penalty() -> f64 {
    5.0
}
fn d_failed_call_cap() -> f64 {
    30.0
}
fn d_short_avg_penalty() -> f64 {
    20.0
}
fn d_normal_exit_bonus() -> f64 {
    5.0
}
fn d_normal_exit_ratio() -> f64 {
    0.7
}
fn d_unstable_penalty() -> f64 {
    25.0
}
fn d_moderate_penalty() -> f64 {
    15.0
}
fn d_rapid_penalty() -> f64 {
    10.0
}
fn d_burst_penalty() -> f64 {
    5.0
}
fn d_burst_cap() -> f64 {
    20.0
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Validate configuration, returning all problems at once.
pub fn validate(config: &Config) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.ingest.dedup_cache_size == 0 {
        errors.push("ingest.dedup_cache_size must be at least 1".to_string());
    }
    if config.ingest.deadline_ms == 0 {
        errors.push("ingest.deadline_ms must be at least 1".to_string());
    }
    if config.ingest.session_response_cap == 0 {
        errors.push("ingest.session_response_cap must be at least 1".to_string());
    }
    if config.ingest.initial_role_tolerance_secs < 0 {
        errors.push("ingest.initial_role_tolerance_secs must not be negative".to_string());
    }
    if config.http.max_body_bytes == 0 {
        errors.push("http.max_body_bytes must be at least 1".to_string());
    }
    if !(0.0..=1.0).contains(&config.quality.normal_exit_ratio) {
        errors.push("quality.normal_exit_ratio must be within [0, 1]".to_string());
    }
    if let Some(secret) = &config.security.webhook_secret
        && secret.len() < 16
    {
        errors.push("security.webhook_secret must be at least 16 characters".to_string());
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
