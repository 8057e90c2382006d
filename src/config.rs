use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::RetryConfig;

// ============================================================================
// Configuration - TOML file with command-line overrides
// ============================================================================

#[derive(Debug, Clone, Parser)]
#[command(name = "license-quote")]
#[command(about = "License cost quotation service")]
pub struct Cli {
    #[arg(long, default_value = "config.toml", help = "Path to the TOML configuration file")]
    pub config: PathBuf,

    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long, env = "DATABASE_URL", help = "PostgreSQL URL; in-memory store when absent")]
    pub database_url: Option<String>,

    #[arg(long, env = "PRICING_SERVICE_URL", help = "External pricer endpoint")]
    pub pricing_url: Option<String>,

    #[arg(long, env = "PRICING_SECRET_KEY", hide_env_values = true)]
    pub pricing_secret: Option<String>,

    #[arg(long, help = "Emit JSON log lines")]
    pub json_logs: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub pricing: PricingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL the pricer uses to reach our callback endpoint.
    pub public_base_url: String,
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_base_url: "http://localhost:8080".to_string(),
            workers: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Without it, costs are computed locally and synchronously.
    pub service_url: Option<String>,
    pub secret_key: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            secret_key: String::new(),
            timeout_secs: 5,
            max_attempts: 3,
            initial_backoff_ms: 200,
        }
    }
}

impl PricingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,license_quote=debug".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Loads the file if it exists; a missing file means defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Command-line values win over the file.
    pub fn with_overrides(mut self, cli: &Cli) -> Self {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(url) = &cli.database_url {
            self.database.url = Some(url.clone());
        }
        if let Some(url) = &cli.pricing_url {
            self.pricing.service_url = Some(url.clone());
        }
        if let Some(secret) = &cli.pricing_secret {
            self.pricing.secret_key = secret.clone();
        }
        if cli.json_logs {
            self.logging.json = true;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.pricing.service_url.is_some() {
            if self.pricing.secret_key.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "pricing.secret_key is required when pricing.service_url is set".to_string(),
                ));
            }
            if self.pricing.timeout_secs == 0 {
                return Err(ConfigError::Invalid(
                    "pricing.timeout_secs must be positive".to_string(),
                ));
            }
            if self.pricing.max_attempts == 0 {
                return Err(ConfigError::Invalid(
                    "pricing.max_attempts must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["license-quote"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = AppConfig::load(Path::new("/definitely/not/here.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.pricing.timeout_secs, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
port = 9090
public_base_url = "https://quotes.example.com"

[pricing]
service_url = "http://pricer:8000/calculate"
secret_key = "shared"
max_attempts = 5
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.pricing.max_attempts, 5);
        assert_eq!(config.pricing.timeout_secs, 5);
        assert_eq!(config.pricing.retry().max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        let err = AppConfig::from_toml_str("[server\nport = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_cli_overrides_file() {
        let config = AppConfig::default().with_overrides(&cli(&[
            "--port",
            "7000",
            "--pricing-url",
            "http://pricer/calc",
            "--pricing-secret",
            "abc",
        ]));

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.pricing.service_url.as_deref(), Some("http://pricer/calc"));
        assert_eq!(config.pricing.secret_key, "abc");
    }

    #[test]
    fn test_pricer_requires_secret() {
        let mut config = AppConfig::default();
        config.pricing.service_url = Some("http://pricer/calc".to_string());

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
