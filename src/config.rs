use crate::constants::{DEFAULT_API_PREFIX, DEFAULT_DATABASE_PATH};
use crate::error::{LoanAppError, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "LOAN_APP_CONFIG";
pub const DB_PATH_ENV: &str = "LOAN_APP_DB_PATH";
pub const PORT_ENV: &str = "LOAN_APP_PORT";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub path_prefix: String,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            path_prefix: DEFAULT_API_PREFIX.to_string(),
            read_timeout_secs: 60,
            write_timeout_secs: 60,
            idle_timeout_secs: 60,
            shutdown_grace_secs: 5,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                LoanAppError::Config(format!(
                    "Invalid bind address '{}:{}': {e}",
                    self.host, self.port
                ))
            })
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
    pub migration_timeout_secs: u64,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_DATABASE_PATH.to_string(),
            migration_timeout_secs: 30,
            busy_timeout_ms: 5000,
        }
    }
}

/// Origins accepted for cross-origin requests. Empty means any origin.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl AppConfig {
    /// Load from the TOML file named by `LOAN_APP_CONFIG` (default `loan_app.toml`),
    /// falling back to defaults when the file does not exist, then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "loan_app.toml".to_string());

        let mut config = match fs::read_to_string(&config_path) {
            Ok(content) => Self::from_toml_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config file at '{}', using defaults", config_path);
                Self::default()
            }
            Err(e) => {
                return Err(LoanAppError::Config(format!(
                    "Failed to read config file '{}': {}",
                    config_path, e
                )))
            }
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = env::var(DB_PATH_ENV) {
            self.database.path = path;
        }
        if let Ok(port) = env::var(PORT_ENV) {
            self.server.port = port
                .parse()
                .map_err(|_| {
                    LoanAppError::Config(format!("{PORT_ENV} is not a valid port: {port}"))
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.path_prefix, "/api/v1/loan-app");
        assert_eq!(config.server.read_timeout(), Duration::from_secs(60));
        assert_eq!(config.server.shutdown_grace(), Duration::from_secs(5));
        assert!(config.cors.allowed_origins.is_empty());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [server]
            port = 8081

            [cors]
            allowed_origins = ["https://loans.example.com"]
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8081);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.database.migration_timeout_secs, 30);
        assert_eq!(config.cors.allowed_origins.len(), 1);
        assert_eq!(config.server.bind_addr().unwrap().port(), 8081);
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        assert!(AppConfig::from_toml_str("[server\nport = ").is_err());
    }
}
