use crate::config::{
    parse_flag, ConnectionConfig, DriveConfig, EmailConfig, LoggerConfig, SlackConfig,
};
use crate::utils::error::{BizError, Result};
use crate::adapters::email::AcsCredentials;
use crate::utils::validation::{
    require, validate_key_file, validate_log_dir, validate_non_empty, validate_slack_api_base,
    validate_sql_server, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings for every wrapper, loaded from a TOML file and/or the environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BizConfig {
    pub database: Option<ConnectionConfig>,
    pub slack: Option<SlackConfig>,
    pub email: Option<EmailConfig>,
    pub drive: Option<DriveConfig>,
    #[serde(default)]
    pub logging: LoggerConfig,
}

impl BizConfig {
    /// Every section read from environment variables only.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// Parses TOML after replacing `${VAR}` references with environment values.
    /// Unknown variables are left as written.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed = Self::substitute_env_vars(content)?;
        Ok(toml::from_str(&processed)?)
    }

    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| BizError::config(format!("invalid substitution pattern: {}", e)))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// Environment variables win over values from the file.
    pub fn with_env_overrides(mut self) -> Self {
        let env = |key: &str| std::env::var(key).ok();

        if ["DB_DRIVER", "DB_HOST", "DB_NAME", "DB_USER", "DB_PASS"]
            .iter()
            .any(|key| env(key).is_some())
            || self.database.is_some()
        {
            let mut database = self
                .database
                .take()
                .unwrap_or_else(|| ConnectionConfig::new(crate::config::DEFAULT_ODBC_DRIVER, "", "", "", ""));
            if let Some(value) = env("DB_DRIVER") {
                database.driver = value;
            }
            if let Some(value) = env("DB_HOST") {
                database.server = value;
            }
            if let Some(value) = env("DB_NAME") {
                database.database = value;
            }
            if let Some(value) = env("DB_USER") {
                database.db_user = value;
            }
            if let Some(value) = env("DB_PASS") {
                database.db_pass = value;
            }
            if let Some(value) = env("DB_TRUST_SERVER_CERTIFICATE") {
                database.trust_server_certificate = parse_flag(&value);
            }
            self.database = Some(database);
        }

        if env("SLACK_BOT_TOKEN").is_some() || env("SLACK_API_BASE_URL").is_some() {
            let mut slack = self.slack.take().unwrap_or_default();
            if let Some(value) = env("SLACK_BOT_TOKEN") {
                slack.bot_token = value;
            }
            if let Some(value) = env("SLACK_API_BASE_URL") {
                slack.api_base_url = value;
            }
            self.slack = Some(slack);
        }

        if let Some(value) = env("EMAIL_CONNECTION_STRING") {
            self.email = Some(EmailConfig {
                connection_string: value,
            });
        }

        if let Some(value) = env("SERVICE_ACCOUNT_FILE") {
            self.drive = Some(DriveConfig {
                service_account_file: Some(value),
            });
        }

        if let Some(value) = env("LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = env("LOG_DIR") {
            self.logging.log_dir = value;
        }

        self
    }
}

impl Validate for BizConfig {
    fn validate(&self) -> Result<()> {
        if let Some(database) = &self.database {
            validate_non_empty("database.driver", &database.driver)?;
            validate_sql_server("database.server", &database.server)?;
            validate_non_empty("database.database", &database.database)?;
        }

        if let Some(slack) = &self.slack {
            validate_non_empty("slack.bot_token", &slack.bot_token)?;
            validate_slack_api_base("slack.api_base_url", &slack.api_base_url)?;
        }

        if let Some(email) = &self.email {
            AcsCredentials::parse(&email.connection_string)?;
        }

        if let Some(drive) = &self.drive {
            let path = require("drive.service_account_file", &drive.service_account_file)?;
            validate_key_file("drive.service_account_file", path)?;
        }

        validate_log_dir("logging.log_dir", &self.logging.log_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
[database]
server = "db01.internal"
database = "sales"
db_user = "app"
db_pass = "${BIZTOOLS_TEST_DB_PASS}"

[slack]
bot_token = "xoxb-test"
api_base_url = "https://slack.com/api"

[logging]
level = "debug"
log_dir = "./logs"
"#;

    #[test]
    fn test_parse_toml_config() {
        let config = BizConfig::from_toml_str(SAMPLE).unwrap();

        let database = config.database.as_ref().unwrap();
        assert_eq!(database.driver, crate::config::DEFAULT_ODBC_DRIVER);
        assert_eq!(database.server, "db01.internal");
        assert!(!database.trust_server_certificate);
        assert_eq!(config.slack.as_ref().unwrap().bot_token, "xoxb-test");
        assert_eq!(config.logging.level(), tracing::Level::DEBUG);
        assert!(config.email.is_none());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("BIZTOOLS_TEST_SUBST_PASS", "from-env");
        let content = SAMPLE.replace("BIZTOOLS_TEST_DB_PASS", "BIZTOOLS_TEST_SUBST_PASS");

        let config = BizConfig::from_toml_str(&content).unwrap();
        assert_eq!(config.database.unwrap().db_pass, "from-env");

        std::env::remove_var("BIZTOOLS_TEST_SUBST_PASS");
    }

    #[test]
    fn test_unknown_variable_left_untouched() {
        let config = BizConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.database.unwrap().db_pass, "${BIZTOOLS_TEST_DB_PASS}");
    }

    #[test]
    fn test_validation_rejects_bad_slack_url() {
        let content = SAMPLE.replace("https://slack.com/api", "not a url");
        let config = BizConfig::from_toml_str(&content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_accepts_sample() {
        let config = BizConfig::from_toml_str(SAMPLE).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = BizConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.database.unwrap().database, "sales");
    }

    #[test]
    fn test_validation_rejects_method_in_slack_base() {
        let content = SAMPLE.replace(
            "https://slack.com/api",
            "https://slack.com/api/chat.postMessage",
        );
        let config = BizConfig::from_toml_str(&content).unwrap();
        assert!(matches!(
            config.validate(),
            Err(BizError::InvalidConfigValueError { field, .. }) if field == "slack.api_base_url"
        ));
    }

    #[test]
    fn test_validation_checks_email_connection_string() {
        let config = BizConfig {
            email: Some(EmailConfig {
                connection_string: "endpoint=https://contoso.communication.azure.com/".to_string(),
            }),
            ..BizConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BizError::MissingConfigError { field }) if field == "accesskey"
        ));
    }

    #[test]
    fn test_drive_section_requires_file() {
        let config = BizConfig {
            drive: Some(DriveConfig {
                service_account_file: None,
            }),
            ..BizConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(BizError::MissingConfigError { .. })
        ));
    }
}
