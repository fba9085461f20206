use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "DOCBASE";

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct DocbaseConfig {
    pub catalog: Catalog,
    #[serde(default)]
    pub frontend: Frontend,
    #[serde(default)]
    pub misc: Misc,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Catalog {
    Postgres(Postgres),
    #[serde(rename = "memory")]
    InMemory(InMemory),
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Postgres {
    pub dsn: String,
    /// Schema holding the metadata tables
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct InMemory {}

fn default_schema() -> String {
    "public".to_string()
}

fn default_max_connections() -> u32 {
    16
}

#[derive(Deserialize, Debug, PartialEq, Eq, Default, Clone)]
pub struct Frontend {
    pub http: Option<HttpFrontend>,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct HttpFrontend {
    pub bind_host: String,
    pub bind_port: u16,
    pub request_timeout_ms: u64,
}

impl HttpFrontend {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for HttpFrontend {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            bind_port: 8080,
            request_timeout_ms: 30000,
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone, Default)]
#[serde(default)]
pub struct Misc {
    pub log_format: LogFormat,
}

pub fn validate_config(config: DocbaseConfig) -> Result<DocbaseConfig, ConfigError> {
    if let Catalog::Postgres(Postgres {
        max_connections: 0, ..
    }) = config.catalog
    {
        return Err(ConfigError::Message(
            "catalog.max_connections must be at least 1".to_string(),
        ));
    }

    if let Some(HttpFrontend {
        request_timeout_ms: 0,
        ..
    }) = config.frontend.http
    {
        return Err(ConfigError::Message(
            "frontend.http.request_timeout_ms must be greater than 0".to_string(),
        ));
    }

    Ok(config)
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
}

/// Load a config file, letting `DOCBASE__SECTION__KEY` variables override it
pub fn load_config(path: &Path) -> Result<DocbaseConfig, ConfigError> {
    let path = path
        .to_str()
        .ok_or_else(|| ConfigError::Message(format!("invalid config path {path:?}")))?;

    let config = Config::builder()
        .add_source(File::with_name(path))
        .add_source(environment());

    config.build()?.try_deserialize().and_then(validate_config)
}

// Load a config from a string (to test our structs are defined correctly)
pub fn load_config_from_string(
    config_str: &str,
    skip_validation: bool,
) -> Result<DocbaseConfig, ConfigError> {
    let config = Config::builder().add_source(File::from_str(config_str, FileFormat::Toml));

    if skip_validation {
        config.build()?.try_deserialize()
    } else {
        config.build()?.try_deserialize().and_then(validate_config)
    }
}
