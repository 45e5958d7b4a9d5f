use crate::utils::error::{BizError, Result};
use std::path::Path;
use url::Url;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(field: &str, value: &str, reason: impl Into<String>) -> BizError {
    BizError::InvalidConfigValueError {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

pub fn require<'a, T>(field: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| BizError::MissingConfigError {
        field: field.to_string(),
    })
}

pub fn validate_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(field, value, "must be set"));
    }
    Ok(())
}

/// An absolute `http`/`https` URL that wrappers append API paths to.
pub fn validate_http_url(field: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value).map_err(|e| invalid(field, value, format!("not a URL: {}", e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(invalid(field, value, format!("scheme {} is not http(s)", scheme))),
    }
}

/// The Slack Web API root. `chat.postMessage` is appended per send, so the
/// base must not already name a method.
pub fn validate_slack_api_base(field: &str, value: &str) -> Result<()> {
    let url = validate_http_url(field, value)?;
    let last_segment = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();
    if last_segment.contains('.') {
        return Err(invalid(
            field,
            value,
            format!("ends in method {}; use the API root, e.g. https://slack.com/api", last_segment),
        ));
    }
    if value.ends_with('/') {
        return Err(invalid(field, value, "trailing slash would double up before the method name"));
    }
    Ok(())
}

/// `host`, `tcp:host` or `host,port`; named instances are not reachable without SQL Browser.
pub fn validate_sql_server(field: &str, value: &str) -> Result<()> {
    validate_non_empty(field, value)?;
    let address = value.strip_prefix("tcp:").unwrap_or(value);
    if address.contains('\\') {
        return Err(invalid(field, value, "named instances are not supported, use host,port"));
    }
    if let Some((_, port)) = address.split_once(',') {
        port.trim()
            .parse::<u16>()
            .map_err(|e| invalid(field, value, format!("invalid port: {}", e)))?;
    }
    Ok(())
}

pub fn validate_log_dir(field: &str, value: &str) -> Result<()> {
    validate_non_empty(field, value)?;
    if value.contains('\0') {
        return Err(invalid(field, value, "contains a NUL byte"));
    }
    Ok(())
}

/// The service-account key is read at construction, so it has to exist up front.
pub fn validate_key_file(field: &str, value: &str) -> Result<()> {
    validate_non_empty(field, value)?;
    if !Path::new(value).is_file() {
        return Err(invalid(field, value, "service-account key file not found"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_slack_api_base() {
        assert!(validate_slack_api_base("slack.api_base_url", "https://slack.com/api").is_ok());
        assert!(validate_slack_api_base("slack.api_base_url", "http://127.0.0.1:8080").is_ok());
        assert!(validate_slack_api_base("slack.api_base_url", "").is_err());
        assert!(validate_slack_api_base("slack.api_base_url", "ftp://slack.com/api").is_err());
        assert!(validate_slack_api_base("slack.api_base_url", "https://slack.com/api/").is_err());

        match validate_slack_api_base("slack.api_base_url", "https://slack.com/api/chat.postMessage") {
            Err(BizError::InvalidConfigValueError { reason, .. }) => {
                assert!(reason.contains("chat.postMessage"))
            }
            other => panic!("expected invalid value, got {:?}", other),
        }
    }

    #[test]
    fn test_sql_server() {
        assert!(validate_sql_server("database.server", "db01").is_ok());
        assert!(validate_sql_server("database.server", "tcp:db01.internal,14330").is_ok());
        assert!(validate_sql_server("database.server", "db01\\SQLEXPRESS").is_err());
        assert!(validate_sql_server("database.server", "db01,port").is_err());
        assert!(validate_sql_server("database.server", "  ").is_err());
    }

    #[test]
    fn test_key_file_must_exist() {
        let key = NamedTempFile::new().unwrap();
        let path = key.path().to_str().unwrap();
        assert!(validate_key_file("drive.service_account_file", path).is_ok());
        assert!(validate_key_file("drive.service_account_file", "/no/such/sa.json").is_err());
    }

    #[test]
    fn test_require_and_log_dir() {
        let missing: Option<String> = None;
        assert!(matches!(
            require("drive.service_account_file", &missing),
            Err(BizError::MissingConfigError { .. })
        ));
        assert!(validate_log_dir("logging.log_dir", "./logs").is_ok());
        assert!(validate_log_dir("logging.log_dir", "a\0b").is_err());
    }
}
