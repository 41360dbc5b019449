//! Configuration management for Unigraph services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Graph store configuration
    #[serde(default)]
    pub graph: GraphStoreConfig,

    /// Text generation configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Query engine policy values
    #[serde(default)]
    pub engine: EngineConfig,

    /// Row cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GraphStoreConfig {
    /// Store provider: neo4j, memory
    #[serde(default = "default_graph_provider")]
    pub provider: String,

    /// HTTP endpoint of the graph database
    #[serde(default = "default_graph_uri")]
    pub uri: String,

    /// Database user
    #[serde(default = "default_graph_user")]
    pub user: String,

    /// Database password
    #[serde(default)]
    pub password: Option<String>,

    /// Database name
    #[serde(default = "default_graph_database")]
    pub database: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_graph_timeout")]
    pub timeout_secs: u64,

    /// Snapshot file for the in-memory provider
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Generation provider: ollama, mock
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API base URL
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model to use
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Generation timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// System prompt override
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Minimum confidence for a catalog match to count
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Candidates closer than this to the best match make a mention ambiguous
    #[serde(default = "default_ambiguity_margin")]
    pub ambiguity_margin: f32,

    /// Upper bound for user-requested counts ("top 500")
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Maximum fact statements handed to the synthesizer
    #[serde(default = "default_max_facts")]
    pub max_facts: usize,

    /// Estimated token budget for the fact list
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Maximum hops for path queries
    #[serde(default = "default_path_max_hops")]
    pub path_max_hops: usize,

    /// Store retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Explicit name canonicalizations (alias -> catalog name)
    #[serde(default = "default_aliases")]
    pub aliases: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    /// First backoff interval in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Enable the Redis row cache
    #[serde(default)]
    pub enabled: bool,

    /// Redis URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Default TTL in seconds
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    /// Key prefix for namespacing
    #[serde(default = "default_cache_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 90 }
fn default_graph_provider() -> String { "neo4j".to_string() }
fn default_graph_uri() -> String { "http://localhost:7474".to_string() }
fn default_graph_user() -> String { "neo4j".to_string() }
fn default_graph_database() -> String { "neo4j".to_string() }
fn default_graph_timeout() -> u64 { 30 }
fn default_llm_provider() -> String { "ollama".to_string() }
fn default_llm_base_url() -> String { "http://localhost:11434".to_string() }
fn default_llm_model() -> String { "mistral".to_string() }
fn default_temperature() -> f32 { 0.3 }
fn default_max_tokens() -> usize { 500 }
fn default_llm_timeout() -> u64 { 60 }
fn default_min_confidence() -> f32 { 0.55 }
fn default_ambiguity_margin() -> f32 { 0.05 }
fn default_max_limit() -> usize { 50 }
fn default_max_facts() -> usize { 25 }
fn default_max_context_tokens() -> usize { 1500 }
fn default_path_max_hops() -> usize { 4 }
fn default_retry_attempts() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 100 }
fn default_max_backoff() -> u64 { 2000 }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_cache_ttl() -> u64 { 300 }
fn default_cache_prefix() -> String { "unigraph".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "unigraph".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

fn default_aliases() -> BTreeMap<String, String> {
    [
        ("bengaluru", "Bangalore"),
        ("gurugram", "Gurgaon"),
        ("new delhi", "Delhi"),
        ("ecommerce", "E-Commerce"),
    ]
    .into_iter()
    .map(|(alias, name)| (alias.to_string(), name.to_string()))
    .collect()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for GraphStoreConfig {
    fn default() -> Self {
        Self {
            provider: default_graph_provider(),
            uri: default_graph_uri(),
            user: default_graph_user(),
            password: None,
            database: default_graph_database(),
            timeout_secs: default_graph_timeout(),
            snapshot_path: None,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_llm_timeout(),
            system_prompt: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            ambiguity_margin: default_ambiguity_margin(),
            max_limit: default_max_limit(),
            max_facts: default_max_facts(),
            max_context_tokens: default_max_context_tokens(),
            path_max_hops: default_path_max_hops(),
            retry: RetryConfig::default(),
            aliases: default_aliases(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            ttl_secs: default_cache_ttl(),
            key_prefix: default_cache_prefix(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            graph: GraphStoreConfig::default(),
            llm: LlmConfig::default(),
            engine: EngineConfig::default(),
            cache: CacheConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__GRAPH__URI=http://neo4j:7474
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.llm.model, "mistral");
        assert_eq!(config.engine.retry.max_attempts, 3);
        assert!((config.engine.min_confidence - 0.55).abs() < f32::EPSILON);
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: AppConfig = Config::builder()
            .set_override("graph.provider", "memory").unwrap()
            .set_override("engine.max_facts", 5).unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.graph.provider, "memory");
        assert_eq!(config.graph.database, "neo4j");
        assert_eq!(config.engine.max_facts, 5);
        assert_eq!(config.engine.max_limit, 50);
        assert_eq!(config.engine.aliases.get("bengaluru").map(String::as_str), Some("Bangalore"));
    }
}
