//! Configuration for the inbox relay.
//!
//! Values are layered: a `.env` file (via `dotenvy`) seeds the process
//! environment, a TOML file provides the base, environment variables
//! override the file, and defaults fill whatever is left. The composed
//! [`Config`] then passes through [`validation::apply_guard_rails`].

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{
    ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError,
};
pub use models::sources::{EnvConfig, FileConfig};
pub use models::{
    Config, ConfigMetadata, CorsConfig, DatabaseConfig, FanoutConfig,
    MetaConfig, ServerConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
