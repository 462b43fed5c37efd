//! Configuration management for the Visual Neurons backend
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Media storage configuration
    pub media: MediaConfig,

    /// External generation provider configuration
    pub providers: ProvidersConfig,

    /// Video generation configuration
    pub video: VideoConfig,

    /// Authentication configuration
    pub auth: AuthConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
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

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaConfig {
    /// Root directory for session-scoped media files
    #[serde(default = "default_media_root")]
    pub root: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    /// Replicate API configuration
    #[serde(default)]
    pub replicate: ReplicateConfig,

    /// Gemini API configuration
    #[serde(default)]
    pub gemini: GeminiConfig,

    /// AWS Bedrock configuration (Nova Canvas + Claude advisor)
    #[serde(default)]
    pub bedrock: BedrockConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReplicateConfig {
    /// Replicate API token
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct GeminiConfig {
    /// Gemini API key
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BedrockConfig {
    /// Whether Bedrock-backed features are enabled
    #[serde(default)]
    pub enabled: bool,

    /// AWS region
    #[serde(default = "default_bedrock_region")]
    pub region: String,

    /// Nova Canvas model id
    #[serde(default = "default_canvas_model")]
    pub canvas_model_id: String,

    /// Claude model id used by the advisor
    #[serde(default = "default_advisor_model")]
    pub advisor_model_id: String,
}

impl Default for BedrockConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            region: default_bedrock_region(),
            canvas_model_id: default_canvas_model(),
            advisor_model_id: default_advisor_model(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VideoConfig {
    /// Base URL the provider calls back on completion.
    /// Presence toggles webhook mode; absence falls back to polling.
    pub webhook_base_url: Option<String>,

    /// Fixed polling delay in seconds
    #[serde(default = "default_video_poll_interval")]
    pub poll_interval_secs: u64,

    /// Hard polling budget in seconds
    #[serde(default = "default_video_timeout")]
    pub timeout_secs: u64,

    /// Age after which a processing prediction is re-checked by the
    /// reconciliation sweep, in seconds
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,

    /// Reconciliation sweep interval in seconds (0 disables the sweep)
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// HS256 secret used to verify identity tokens
    pub jwt_secret: Option<String>,

    /// Cookie carrying the identity token
    #[serde(default = "default_auth_cookie")]
    pub cookie_name: String,
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
    /// Requests per second
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
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 50 }
fn default_min_connections() -> u32 { 5 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_media_root() -> String { "/var/visualneurons/media".to_string() }
fn default_bedrock_region() -> String { "eu-west-1".to_string() }
fn default_canvas_model() -> String { "amazon.nova-canvas-v1:0".to_string() }
fn default_advisor_model() -> String { "anthropic.claude-3-5-sonnet-20241022-v2:0".to_string() }
fn default_video_poll_interval() -> u64 { 10 }
fn default_video_timeout() -> u64 { 420 }
fn default_stale_after() -> u64 { 600 }
fn default_reconcile_interval() -> u64 { 300 }
fn default_auth_cookie() -> String { "vn_auth_token".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "visualneurons".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__VIDEO__TIMEOUT_SECS=600
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }

    /// Whether video generation runs in webhook mode
    pub fn webhook_mode(&self) -> bool {
        self.video.webhook_base_url.is_some()
    }
}

impl VideoConfig {
    /// Fixed polling delay
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Hard polling budget
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/visualneurons".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            media: MediaConfig {
                root: default_media_root(),
            },
            providers: ProvidersConfig {
                replicate: ReplicateConfig::default(),
                gemini: GeminiConfig::default(),
                bedrock: BedrockConfig::default(),
            },
            video: VideoConfig {
                webhook_base_url: None,
                poll_interval_secs: default_video_poll_interval(),
                timeout_secs: default_video_timeout(),
                stale_after_secs: default_stale_after(),
                reconcile_interval_secs: default_reconcile_interval(),
            },
            auth: AuthConfig {
                jwt_secret: None,
                cookie_name: default_auth_cookie(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
            rate_limit: RateLimitConfig {
                requests_per_second: default_rate_limit(),
                burst: default_burst(),
                enabled: default_enabled(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.video.timeout_secs, 420);
        assert!(!config.webhook_mode());
    }

    #[test]
    fn test_webhook_mode_toggles_on_base_url() {
        let mut config = AppConfig::default();
        config.video.webhook_base_url = Some("https://example.com".to_string());
        assert!(config.webhook_mode());
    }

    #[test]
    fn test_read_database_fallback() {
        let config = AppConfig::default();
        assert_eq!(config.read_database_url(), "postgres://localhost/visualneurons");
    }
}
