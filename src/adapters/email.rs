//! Azure Communication Services email.
//!
//! Requests are signed with the ACS HMAC-SHA256 scheme using the access key
//! from the connection string (`endpoint=https://...;accesskey=...`).

use crate::adapters::http::error_for_status;
use crate::config::EmailConfig;
use crate::core::{EmailSendOperation, ErrorPolicy, ResourceFactory, ResourceHandle, Scoped};
use crate::utils::error::{BizError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use ring::{digest, hmac};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use url::Url;

pub const EMAIL_API_VERSION: &str = "2023-03-31";

#[derive(Clone)]
pub struct AcsCredentials {
    endpoint: Url,
    access_key: Vec<u8>,
}

impl fmt::Debug for AcsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcsCredentials")
            .field("endpoint", &self.endpoint.as_str())
            .field("access_key", &"<redacted>")
            .finish()
    }
}

impl AcsCredentials {
    pub fn parse(connection_string: &str) -> Result<Self> {
        let mut endpoint = None;
        let mut access_key = None;

        for segment in connection_string.split(';') {
            if let Some((key, value)) = segment.split_once('=') {
                match key.trim().to_lowercase().as_str() {
                    "endpoint" => endpoint = Some(value.trim().to_string()),
                    "accesskey" => access_key = Some(value.trim().to_string()),
                    _ => {}
                }
            }
        }

        let endpoint = endpoint.ok_or_else(|| BizError::MissingConfigError {
            field: "endpoint".to_string(),
        })?;
        let endpoint = Url::parse(&endpoint).map_err(|e| BizError::InvalidConfigValueError {
            field: "endpoint".to_string(),
            value: endpoint.clone(),
            reason: e.to_string(),
        })?;
        let access_key = access_key.ok_or_else(|| BizError::MissingConfigError {
            field: "accesskey".to_string(),
        })?;
        let access_key = STANDARD
            .decode(access_key.as_bytes())
            .map_err(|e| BizError::config(format!("accesskey is not valid base64: {}", e)))?;

        Ok(Self {
            endpoint,
            access_key,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Headers for one signed ACS request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub date: String,
    pub content_hash: String,
    pub authorization: String,
}

pub fn content_hash(body: &[u8]) -> String {
    STANDARD.encode(digest::digest(&digest::SHA256, body).as_ref())
}

/// Signs `method path_and_query` for `host` at `date` (RFC 1123, GMT).
pub fn sign_request(
    access_key: &[u8],
    method: &str,
    path_and_query: &str,
    host: &str,
    date: &str,
    body: &[u8],
) -> SignedHeaders {
    let content_hash = content_hash(body);
    let string_to_sign = format!(
        "{}\n{}\n{};{};{}",
        method, path_and_query, date, host, content_hash
    );
    let key = hmac::Key::new(hmac::HMAC_SHA256, access_key);
    let signature = STANDARD.encode(hmac::sign(&key, string_to_sign.as_bytes()).as_ref());

    SignedHeaders {
        date: date.to_string(),
        content_hash,
        authorization: format!(
            "HMAC-SHA256 SignedHeaders=x-ms-date;host;x-ms-content-sha256&Signature={}",
            signature
        ),
    }
}

#[derive(Debug, Deserialize)]
struct SendStatus {
    id: String,
    status: String,
}

/// Signed HTTP client for the ACS email endpoint.
#[derive(Debug)]
pub struct EmailClient {
    http: Client,
    credentials: AcsCredentials,
}

impl EmailClient {
    pub fn from_connection_string(connection_string: &str) -> Result<Self> {
        Ok(Self {
            http: Client::builder().build()?,
            credentials: AcsCredentials::parse(connection_string)?,
        })
    }

    /// Starts the send operation; ACS answers `202 Accepted` with the operation to poll.
    pub async fn begin_send(&self, message: &Value) -> Result<EmailSendOperation> {
        let body = serde_json::to_vec(message)?;
        let base = self.credentials.endpoint.as_str().trim_end_matches('/');
        let url = Url::parse(&format!(
            "{}/emails:send?api-version={}",
            base, EMAIL_API_VERSION
        ))
        .map_err(|e| BizError::config(format!("invalid email endpoint: {}", e)))?;

        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(BizError::config("email endpoint has no host")),
        };
        let date = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        let signed = sign_request(
            &self.credentials.access_key,
            "POST",
            &url[url::Position::BeforePath..],
            &host,
            &date,
            &body,
        );

        let response = self
            .http
            .post(url)
            .header("x-ms-date", signed.date)
            .header("x-ms-content-sha256", signed.content_hash)
            .header(AUTHORIZATION, signed.authorization)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let response = error_for_status(response).await?;

        // The send is only queued when ACS answers 202 with an operation to poll.
        let status = response.status();
        if status != StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            return Err(BizError::HttpStatusError {
                status: status.as_u16(),
                body,
            });
        }
        let operation_location = response
            .headers()
            .get("operation-location")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let status: SendStatus = response.json().await?;

        Ok(EmailSendOperation {
            id: status.id,
            status: status.status,
            operation_location,
        })
    }
}

pub struct EmailClientFactory {
    connection_string: String,
}

#[async_trait]
impl ResourceFactory for EmailClientFactory {
    type Resource = EmailClient;

    async fn create(&self) -> Result<EmailClient> {
        EmailClient::from_connection_string(&self.connection_string)
    }
}

/// Sends email through ACS.
///
/// The client is built on first send. Failures are logged together with the
/// message and, under the default [`ErrorPolicy::Swallow`], reported as `None`.
pub struct EmailService {
    client: ResourceHandle<EmailClientFactory>,
    policy: ErrorPolicy,
}

impl EmailService {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            client: ResourceHandle::new(EmailClientFactory {
                connection_string: connection_string.into(),
            }),
            policy: ErrorPolicy::Swallow,
        }
    }

    pub fn from_config(config: &EmailConfig) -> Self {
        Self::new(config.connection_string.clone())
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn has_client(&self) -> bool {
        self.client.is_live().await
    }

    pub async fn send_email(&self, message: &Value) -> Result<Option<EmailSendOperation>> {
        let outcome = match self.client.acquire().await {
            Ok(client) => client.begin_send(message).await,
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            tracing::error!("Error while sending email, err is: {}", e);
            tracing::error!("Message is: {}", message);
        }

        self.policy.settle(outcome)
    }

    pub async fn close(&self) {
        self.client.release().await;
    }
}

#[async_trait]
impl Scoped for EmailService {
    async fn enter(&self) -> Result<()> {
        Ok(())
    }

    async fn exit(&self) {
        self.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connection_string() {
        let credentials = AcsCredentials::parse(
            "endpoint=https://contoso.communication.azure.com/;accesskey=dGVzdC1hY2Nlc3Mta2V5LTAxMjM0NTY3ODk=",
        )
        .unwrap();

        assert_eq!(credentials.endpoint().host_str(), Some("contoso.communication.azure.com"));
        assert_eq!(credentials.access_key, b"test-access-key-0123456789".to_vec());
        assert!(!format!("{:?}", credentials).contains("dGVzd"));
    }

    #[test]
    fn test_parse_connection_string_errors() {
        assert!(matches!(
            AcsCredentials::parse("accesskey=abcd"),
            Err(BizError::MissingConfigError { .. })
        ));
        assert!(AcsCredentials::parse("endpoint=https://x.example;accesskey=***").is_err());
    }

    #[test]
    fn test_sign_request_matches_reference_signature() {
        let signed = sign_request(
            b"test-access-key-0123456789",
            "POST",
            "/emails:send?api-version=2023-03-31",
            "contoso.communication.azure.com",
            "Mon, 06 Jan 2025 10:00:00 GMT",
            br#"{"senderAddress":"a@b.com"}"#,
        );

        assert_eq!(signed.content_hash, "JPrTwWHWMEmdug2KnLic0dA7Go3PaGi5sQKkqb6+Y38=");
        assert_eq!(
            signed.authorization,
            "HMAC-SHA256 SignedHeaders=x-ms-date;host;x-ms-content-sha256&Signature=QPIXetX6tP8ZnTc91P8lJPJEUOPe6g69p0cUvYhvDFc="
        );
    }

    #[tokio::test]
    async fn test_invalid_connection_string_is_swallowed() {
        let service = EmailService::new("not a connection string");
        let result = service
            .send_email(&serde_json::json!({"senderAddress": "a@b.com"}))
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(!service.has_client().await);
    }
}
