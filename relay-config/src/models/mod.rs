pub mod sources;

use std::{path::PathBuf, time::Duration};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_NOTIFY_CHANNEL: &str = "new_message";
pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;
pub const DEFAULT_POLL_CEILING_MS: u64 = 30_000;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
pub const DEFAULT_JITTER_RATIO: f64 = 0.2;
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com/v19.0";
pub const DEFAULT_COUNTRY_CODE: &str = "961";

/// Fully resolved runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub fanout: FanoutConfig,
    pub meta: MetaConfig,
    pub cors: CorsConfig,
    pub dev_mode: bool,
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Without a database URL the relay runs on the in-memory store with an
    /// in-process feed.
    pub fn single_process(&self) -> bool {
        self.database.url.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Realtime fan-out tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct FanoutConfig {
    /// Postgres `LISTEN/NOTIFY` channel carrying change events.
    pub notify_channel: String,
    pub heartbeat_interval: Duration,
    /// Longest a single long-poll request may wait.
    pub poll_ceiling: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub jitter_ratio: f64,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            notify_channel: DEFAULT_NOTIFY_CHANNEL.to_string(),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            poll_ceiling: Duration::from_millis(DEFAULT_POLL_CEILING_MS),
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            jitter_ratio: DEFAULT_JITTER_RATIO,
        }
    }
}

/// Meta (WhatsApp Cloud API / Messenger) credentials and defaults.
#[derive(Clone)]
pub struct MetaConfig {
    /// Shared secret echoed back during the webhook verification handshake.
    pub verify_token: String,
    pub graph_base_url: String,
    pub whatsapp_token: Option<String>,
    pub page_token: Option<String>,
    /// Phone number id new WhatsApp chats are started from.
    pub default_phone_number_id: Option<String>,
    pub default_country_code: String,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            verify_token: String::new(),
            graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            whatsapp_token: None,
            page_token: None,
            default_phone_number_id: None,
            default_country_code: DEFAULT_COUNTRY_CODE.to_string(),
        }
    }
}

impl std::fmt::Debug for MetaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaConfig")
            .field("verify_token", &redacted(Some(&self.verify_token)))
            .field("graph_base_url", &self.graph_base_url)
            .field("whatsapp_token", &redacted(self.whatsapp_token.as_ref()))
            .field("page_token", &redacted(self.page_token.as_ref()))
            .field("default_phone_number_id", &self.default_phone_number_id)
            .field("default_country_code", &self.default_country_code)
            .finish()
    }
}

fn redacted(secret: Option<&String>) -> &'static str {
    match secret {
        Some(value) if !value.is_empty() => "<redacted>",
        _ => "<unset>",
    }
}

#[derive(Debug, Clone)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}

impl CorsConfig {
    pub fn is_wildcard_included(&self) -> bool {
        self.allowed_origins
            .iter()
            .any(|origin| origin.trim() == "*")
    }
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_single_process_mode() {
        let config = Config::default();
        assert!(config.single_process());
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.fanout.notify_channel, "new_message");
        assert_eq!(config.fanout.poll_ceiling, Duration::from_secs(30));
        assert_eq!(config.meta.default_country_code, "961");
    }

    #[test]
    fn meta_debug_redacts_tokens() {
        let meta = MetaConfig {
            verify_token: "hunter2".to_string(),
            whatsapp_token: Some("EAAB-secret".to_string()),
            ..MetaConfig::default()
        };
        let rendered = format!("{meta:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("EAAB-secret"));
        assert!(rendered.contains("page_token: \"<unset>\""));
    }
}
