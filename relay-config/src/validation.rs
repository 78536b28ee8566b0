use axum::http::HeaderValue;
use thiserror::Error;
use url::Url;

use super::models::{Config, CorsConfig, FanoutConfig, MetaConfig};

/// Postgres truncates identifiers beyond this length.
const MAX_CHANNEL_LENGTH: usize = 63;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("feed backoff cap ({max_ms} ms) is below its base ({base_ms} ms)")]
    BackoffCapBelowBase { base_ms: u128, max_ms: u128 },
    #[error("feed jitter ratio {0} must be within 0.0..=1.0")]
    InvalidJitter(f64),
    #[error("invalid notify channel '{channel}': {reason}")]
    InvalidNotifyChannel { channel: String, reason: &'static str },
    #[error("invalid Graph API base url '{url}'")]
    InvalidGraphUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("CORS wildcard origins are not allowed when DEV_MODE is false")]
    DangerousCorsWildcard,
    #[error("invalid CORS configuration: {reason}")]
    InvalidCorsConfig { reason: String },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.items.iter().any(|item| item.message.contains(needle))
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    validate_fanout(&config.fanout)?;
    validate_meta(&config.meta, &mut warnings)?;

    if !config.dev_mode && config.cors.is_wildcard_included() {
        return Err(ConfigGuardRailError::DangerousCorsWildcard);
    }
    validate_cors(&config.cors)?;

    if config.single_process() {
        warnings.push_with_hint(
            "DATABASE_URL not configured; using the in-memory store and an in-process change feed",
            "Set DATABASE_URL to persist conversations and fan out across server processes",
        );
    }

    Ok(warnings)
}

fn validate_fanout(fanout: &FanoutConfig) -> Result<(), ConfigGuardRailError> {
    if fanout.heartbeat_interval.is_zero() {
        return Err(ConfigGuardRailError::ZeroDuration {
            field: "heartbeat interval",
        });
    }
    if fanout.poll_ceiling.is_zero() {
        return Err(ConfigGuardRailError::ZeroDuration {
            field: "long-poll ceiling",
        });
    }
    if fanout.backoff_base.is_zero() {
        return Err(ConfigGuardRailError::ZeroDuration {
            field: "feed backoff base",
        });
    }
    if fanout.backoff_max < fanout.backoff_base {
        return Err(ConfigGuardRailError::BackoffCapBelowBase {
            base_ms: fanout.backoff_base.as_millis(),
            max_ms: fanout.backoff_max.as_millis(),
        });
    }
    if !(0.0..=1.0).contains(&fanout.jitter_ratio) {
        return Err(ConfigGuardRailError::InvalidJitter(fanout.jitter_ratio));
    }

    let channel = &fanout.notify_channel;
    if channel.trim().is_empty() {
        return Err(ConfigGuardRailError::InvalidNotifyChannel {
            channel: channel.clone(),
            reason: "must not be empty",
        });
    }
    if channel.len() > MAX_CHANNEL_LENGTH {
        return Err(ConfigGuardRailError::InvalidNotifyChannel {
            channel: channel.clone(),
            reason: "longer than 63 bytes",
        });
    }

    Ok(())
}

fn validate_meta(
    meta: &MetaConfig,
    warnings: &mut ConfigWarnings,
) -> Result<(), ConfigGuardRailError> {
    Url::parse(&meta.graph_base_url).map_err(|source| {
        ConfigGuardRailError::InvalidGraphUrl {
            url: meta.graph_base_url.clone(),
            source,
        }
    })?;

    if meta.verify_token.is_empty() {
        warnings.push_with_hint(
            "META_VERIFY_TOKEN not set; webhook verification requests will be rejected",
            "Set META_VERIFY_TOKEN to the token configured in the Meta app dashboard",
        );
    }
    if meta.whatsapp_token.is_none() {
        warnings.push_with_hint(
            "WHATSAPP_TOKEN not set; replies on WhatsApp conversations will fail",
            "Provide a WhatsApp Cloud API access token",
        );
    }
    if meta.page_token.is_none() {
        warnings.push_with_hint(
            "META_PAGE_TOKEN not set; replies on Messenger conversations will fail",
            "Provide a page access token for the connected Facebook page",
        );
    }
    if meta.default_phone_number_id.is_none() {
        warnings.push(
            "WHATSAPP_PHONE_NUMBER_ID_MAIN not set; chats started from the dashboard cannot be replied to",
        );
    }

    Ok(())
}

fn validate_cors(cors: &CorsConfig) -> Result<(), ConfigGuardRailError> {
    for origin in &cors.allowed_origins {
        if origin.trim() == "*" {
            continue;
        }
        HeaderValue::from_str(origin).map_err(|_| {
            ConfigGuardRailError::InvalidCorsConfig {
                reason: format!(
                    "invalid origin `{}` in CORS_ALLOWED_ORIGINS",
                    origin
                ),
            }
        })?;
    }

    Ok(())
}
