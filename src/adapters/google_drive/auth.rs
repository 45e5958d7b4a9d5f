use crate::adapters::http::error_for_status;
use crate::core::TokenSource;
use crate::utils::error::{BizError, Result};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// The service-account key file downloaded from the Google Cloud console.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountCredentials {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl fmt::Debug for ServiceAccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountCredentials")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("project_id", &self.project_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountCredentials {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_json(&content)
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Exchanges a signed JWT assertion for an access token on every call.
pub struct ServiceAccountTokenSource {
    credentials: ServiceAccountCredentials,
    scopes: Vec<String>,
    http: Client,
}

impl ServiceAccountTokenSource {
    pub fn new(credentials: ServiceAccountCredentials) -> Result<Self> {
        Ok(Self {
            credentials,
            scopes: vec![DRIVE_SCOPE.to_string()],
            http: Client::builder().build()?,
        })
    }

    pub fn credentials(&self) -> &ServiceAccountCredentials {
        &self.credentials
    }

    /// RS256 JWT asserting the service account's identity for the configured scopes.
    pub fn signed_assertion(&self, issued_at: i64) -> Result<String> {
        let claims = AssertionClaims {
            iss: &self.credentials.client_email,
            scope: self.scopes.join(" "),
            aud: &self.credentials.token_uri,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.credentials.private_key_id.clone();
        let key = EncodingKey::from_rsa_pem(self.credentials.private_key.as_bytes())?;

        Ok(jsonwebtoken::encode(&header, &claims, &key)?)
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn access_token(&self) -> Result<String> {
        let assertion = self.signed_assertion(chrono::Utc::now().timestamp())?;

        let response = self
            .http
            .post(&self.credentials.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let response = error_for_status(response).await.map_err(|e| {
            BizError::auth(format!("token exchange for {} failed: {}", self.credentials.client_email, e))
        })?;

        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }
}
