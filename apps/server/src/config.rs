//! Configuration management for the validation service.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub fhir: FhirConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    /// Maximum request body size in bytes. Prevents oversized payloads.
    #[serde(default = "default_max_request_body_size")]
    pub max_request_body_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FhirConfig {
    #[serde(default = "default_fhir_version")]
    pub default_version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for persisted project state (rule sets, terminology,
    /// feature flags), one JSON document per object.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
    /// Emit JSON log lines instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_max_request_body_size() -> usize {
    10 * 1024 * 1024
}

fn default_fhir_version() -> String {
    "4.0.1".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_filter() -> String {
    "info,lektor=debug".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
            max_request_body_size: default_max_request_body_size(),
        }
    }
}

impl Default for FhirConfig {
    fn default() -> Self {
        Self {
            default_version: default_fhir_version(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

impl Config {
    /// Layered load: defaults ← optional `config/default.toml` ← environment
    /// (`LEKTOR__SERVER__PORT` style).
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::Environment::with_prefix("LEKTOR")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize().or_else(|_| {
            // No sources at all still yields a runnable default config.
            Ok(Config {
                server: ServerConfig::default(),
                fhir: FhirConfig::default(),
                storage: StorageConfig::default(),
                logging: LoggingConfig::default(),
            })
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_runnable() {
        let config = Config {
            server: ServerConfig::default(),
            fhir: FhirConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        };
        assert_eq!(config.server.port, 8080);
        assert!(config.socket_addr().is_ok());
        assert_eq!(config.fhir.default_version, "4.0.1");
    }
}
