pub mod error;

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use url::Url;

use self::error::ConfigLoadError;
use super::{
    models::{
        Config, ConfigMetadata, CorsConfig, DatabaseConfig, FanoutConfig,
        MetaConfig, ServerConfig,
        sources::{EnvConfig, FileConfig},
    },
    validation::{self, ConfigWarnings},
};

const DEFAULT_CONFIG_LOCATIONS: &[&str] = &["relay.toml", "config/relay.toml"];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Skip `.env` loading entirely.
    pub skip_env_file: bool,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn without_env_file(mut self) -> Self {
        self.options.skip_env_file = true;
        self
    }

    /// Loads `.env`, then reads the process environment.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = self.load_env_file()?;
        self.compose(EnvConfig::gather(), env_file_loaded)
    }

    /// Composes against an explicit environment snapshot; `.env` and the
    /// process environment are not consulted.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        self.compose(env, false)
    }

    fn load_env_file(&self) -> Result<bool, ConfigLoadError> {
        if self.options.skip_env_file {
            return Ok(false);
        }

        let loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true),
            None => dotenvy::dotenv().map(|_| true),
        };

        match loaded {
            Ok(loaded) => Ok(loaded),
            Err(dotenvy::Error::Io(_)) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn compose(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;

        let mut warnings = ConfigWarnings::default();
        if file_config.is_none() {
            warnings.push_with_hint(
                "No relay.toml detected; falling back to environment variables",
                "Pass --config or set RELAY_CONFIG_PATH to use a configuration file",
            );
        }

        let config = compose_config(
            file_config.unwrap_or_default(),
            env,
            ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        )?;

        warnings.extend(validation::apply_guard_rails(&config)?);
        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let mut source = ConfigPathSource::default();

        if let Some(explicit) = &self.options.config_path {
            source.explicit = Some(explicit.clone());
        } else if let Some(from_env) = &env.config_path {
            source.env = Some(from_env.clone());
        } else {
            source.default = DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists());
        }

        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };

        if !path.exists() {
            if provenance.is_explicit() {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        Ok((Some(read_file_config(&path)?), Some(path)))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents =
        fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Environment values win over the file, the file over defaults.
fn compose_config(
    file: FileConfig,
    env: EnvConfig,
    metadata: ConfigMetadata,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        server: file_server,
        database: file_database,
        fanout: file_fanout,
        meta: file_meta,
        cors: file_cors,
        dev_mode: file_dev_mode,
    } = file;

    let server_defaults = ServerConfig::default();
    let server = ServerConfig {
        host: env
            .server_host
            .or(file_server.host)
            .unwrap_or(server_defaults.host),
        port: env.server_port.or(file_server.port).unwrap_or(server_defaults.port),
    };

    let database_defaults = DatabaseConfig::default();
    let database = DatabaseConfig {
        url: resolve_database_url(env.database_url.or(file_database.url))?,
        max_connections: env
            .database_max_connections
            .or(file_database.max_connections)
            .unwrap_or(database_defaults.max_connections),
    };

    let fanout_defaults = FanoutConfig::default();
    let fanout = FanoutConfig {
        notify_channel: env
            .notify_channel
            .or(file_fanout.notify_channel)
            .unwrap_or(fanout_defaults.notify_channel),
        heartbeat_interval: env
            .heartbeat_secs
            .or(file_fanout.heartbeat_secs)
            .map(Duration::from_secs)
            .unwrap_or(fanout_defaults.heartbeat_interval),
        poll_ceiling: env
            .poll_ceiling_ms
            .or(file_fanout.poll_ceiling_ms)
            .map(Duration::from_millis)
            .unwrap_or(fanout_defaults.poll_ceiling),
        backoff_base: env
            .backoff_base_ms
            .or(file_fanout.backoff_base_ms)
            .map(Duration::from_millis)
            .unwrap_or(fanout_defaults.backoff_base),
        backoff_max: env
            .backoff_max_ms
            .or(file_fanout.backoff_max_ms)
            .map(Duration::from_millis)
            .unwrap_or(fanout_defaults.backoff_max),
        jitter_ratio: env
            .jitter_ratio
            .or(file_fanout.jitter_ratio)
            .unwrap_or(fanout_defaults.jitter_ratio),
    };

    let meta_defaults = MetaConfig::default();
    let meta = MetaConfig {
        verify_token: env
            .verify_token
            .or(file_meta.verify_token)
            .unwrap_or(meta_defaults.verify_token),
        graph_base_url: env
            .graph_base_url
            .or(file_meta.graph_base_url)
            .unwrap_or(meta_defaults.graph_base_url),
        whatsapp_token: non_blank(env.whatsapp_token.or(file_meta.whatsapp_token)),
        page_token: non_blank(env.page_token.or(file_meta.page_token)),
        default_phone_number_id: non_blank(
            env.default_phone_number_id
                .or(file_meta.default_phone_number_id),
        ),
        default_country_code: env
            .default_country_code
            .or(file_meta.default_country_code)
            .unwrap_or(meta_defaults.default_country_code),
    };

    let cors = CorsConfig {
        allowed_origins: env
            .cors_allowed_origins
            .or(file_cors.allowed_origins)
            .unwrap_or_else(|| CorsConfig::default().allowed_origins),
    };

    Ok(Config {
        server,
        database,
        fanout,
        meta,
        cors,
        dev_mode: env.dev_mode.or(file_dev_mode).unwrap_or(false),
        metadata,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_database_url(
    raw: Option<String>,
) -> Result<Option<String>, ConfigLoadError> {
    let Some(raw) = non_blank(raw) else {
        return Ok(None);
    };

    let parsed = Url::parse(&raw)
        .map_err(|source| ConfigLoadError::InvalidDatabaseUrl { source })?;
    match parsed.scheme() {
        "postgres" | "postgresql" => Ok(Some(raw)),
        other => Err(ConfigLoadError::UnsupportedDatabaseScheme {
            scheme: other.to_string(),
        }),
    }
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        self.default
            .as_ref()
            .map(|path| (path.clone(), ConfigPathProvenance::Default))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

impl ConfigPathProvenance {
    fn is_explicit(self) -> bool {
        matches!(
            self,
            ConfigPathProvenance::Explicit | ConfigPathProvenance::Env
        )
    }
}
