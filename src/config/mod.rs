pub mod toml_config;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use toml_config::BizConfig;

pub const DEFAULT_ODBC_DRIVER: &str = "{ODBC Driver 18 for SQL Server}";

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub(crate) fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "yes" | "true" | "1" | "on"
    )
}

/// Database connection settings. Certificate trust is off unless opted into.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_driver")]
    pub driver: String,
    pub server: String,
    pub database: String,
    pub db_user: String,
    pub db_pass: String,
    #[serde(default)]
    pub trust_server_certificate: bool,
}

fn default_driver() -> String {
    DEFAULT_ODBC_DRIVER.to_string()
}

impl ConnectionConfig {
    pub fn new(
        driver: impl Into<String>,
        server: impl Into<String>,
        database: impl Into<String>,
        db_user: impl Into<String>,
        db_pass: impl Into<String>,
    ) -> Self {
        Self {
            driver: driver.into(),
            server: server.into(),
            database: database.into(),
            db_user: db_user.into(),
            db_pass: db_pass.into(),
            trust_server_certificate: false,
        }
    }

    /// Skips server certificate validation. Only for servers with self-signed certificates.
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.trust_server_certificate = trust;
        self
    }

    /// Reads `DB_DRIVER`, `DB_HOST`, `DB_NAME`, `DB_USER`, `DB_PASS` and
    /// `DB_TRUST_SERVER_CERTIFICATE`.
    pub fn from_env() -> Self {
        Self {
            driver: env_or("DB_DRIVER", DEFAULT_ODBC_DRIVER),
            server: env_or("DB_HOST", ""),
            database: env_or("DB_NAME", ""),
            db_user: env_or("DB_USER", ""),
            db_pass: env_or("DB_PASS", ""),
            trust_server_certificate: std::env::var("DB_TRUST_SERVER_CERTIFICATE")
                .map(|value| parse_flag(&value))
                .unwrap_or(false),
        }
    }

    pub fn connection_string(&self) -> String {
        format!(
            "Driver={};Server={};Database={};UID={};PWD={};TrustServerCertificate={};",
            self.driver,
            self.server,
            self.database,
            self.db_user,
            self.db_pass,
            if self.trust_server_certificate { "yes" } else { "no" }
        )
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("driver", &self.driver)
            .field("server", &self.server)
            .field("database", &self.database)
            .field("db_user", &self.db_user)
            .field("db_pass", &"<redacted>")
            .field("trust_server_certificate", &self.trust_server_certificate)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub api_base_url: String,
}

impl SlackConfig {
    /// Reads `SLACK_BOT_TOKEN` and `SLACK_API_BASE_URL`; both default to empty.
    pub fn from_env() -> Self {
        Self {
            bot_token: env_or("SLACK_BOT_TOKEN", ""),
            api_base_url: env_or("SLACK_API_BASE_URL", ""),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub connection_string: String,
}

impl EmailConfig {
    pub fn from_env() -> Self {
        Self {
            connection_string: env_or("EMAIL_CONNECTION_STRING", ""),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveConfig {
    pub service_account_file: Option<String>,
}

impl DriveConfig {
    pub fn from_env() -> Self {
        Self {
            service_account_file: std::env::var("SERVICE_ACCOUNT_FILE").ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerConfig {
    #[serde(default = "default_logger_name")]
    pub name: String,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

fn default_logger_name() -> String {
    crate::utils::logger::DEFAULT_LOGGER_NAME.to_string()
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_log_dir() -> String {
    crate::utils::logger::DEFAULT_LOG_DIR.to_string()
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            name: default_logger_name(),
            level: default_log_level(),
            log_dir: default_log_dir(),
        }
    }
}

impl LoggerConfig {
    pub fn from_env() -> Self {
        Self {
            name: default_logger_name(),
            level: env_or("LOG_LEVEL", "INFO"),
            log_dir: env_or("LOG_DIR", crate::utils::logger::DEFAULT_LOG_DIR),
        }
    }

    pub fn level(&self) -> tracing::Level {
        crate::utils::logger::parse_log_level(&self.level)
    }

    /// Installs the logger described by this config.
    pub fn init(&self) -> crate::utils::error::Result<crate::utils::logger::LoggerHandle> {
        crate::utils::logger::setup_logger_in(
            &self.name,
            self.level(),
            std::path::Path::new(&self.log_dir),
        )
    }
}
