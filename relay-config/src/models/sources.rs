use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::util::{parse_bool_var, parse_csv_var, parse_var, string_var};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub database: FileDatabaseConfig,
    #[serde(default)]
    pub fanout: FileFanoutConfig,
    #[serde(default)]
    pub meta: FileMetaConfig,
    #[serde(default)]
    pub cors: FileCorsConfig,
    pub dev_mode: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileFanoutConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_ceiling_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_base_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_max_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter_ratio: Option<f64>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileMetaConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whatsapp_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_phone_number_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_country_code: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileCorsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub database_url: Option<String>,
    pub database_max_connections: Option<u32>,
    pub notify_channel: Option<String>,
    pub heartbeat_secs: Option<u64>,
    pub poll_ceiling_ms: Option<u64>,
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub jitter_ratio: Option<f64>,
    pub verify_token: Option<String>,
    pub graph_base_url: Option<String>,
    pub whatsapp_token: Option<String>,
    pub page_token: Option<String>,
    pub default_phone_number_id: Option<String>,
    pub default_country_code: Option<String>,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub dev_mode: Option<bool>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: string_var("RELAY_CONFIG_PATH").map(PathBuf::from),
            server_host: string_var("SERVER_HOST"),
            server_port: parse_var("SERVER_PORT"),
            database_url: string_var("DATABASE_URL"),
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS"),
            notify_channel: string_var("RELAY_NOTIFY_CHANNEL"),
            heartbeat_secs: parse_var("RELAY_HEARTBEAT_SECS"),
            poll_ceiling_ms: parse_var("RELAY_POLL_CEILING_MS"),
            backoff_base_ms: parse_var("RELAY_FEED_BACKOFF_BASE_MS"),
            backoff_max_ms: parse_var("RELAY_FEED_BACKOFF_MAX_MS"),
            jitter_ratio: parse_var("RELAY_FEED_JITTER_RATIO"),
            // VERIFY_TOKEN is the name older deployments used.
            verify_token: string_var("META_VERIFY_TOKEN")
                .or_else(|| string_var("VERIFY_TOKEN")),
            graph_base_url: string_var("META_GRAPH_BASE_URL"),
            whatsapp_token: string_var("WHATSAPP_TOKEN"),
            page_token: string_var("META_PAGE_TOKEN"),
            default_phone_number_id: string_var("WHATSAPP_PHONE_NUMBER_ID_MAIN"),
            default_country_code: string_var("DEFAULT_COUNTRY_CODE"),
            cors_allowed_origins: parse_csv_var("CORS_ALLOWED_ORIGINS"),
            dev_mode: parse_bool_var("DEV_MODE"),
        }
    }
}
