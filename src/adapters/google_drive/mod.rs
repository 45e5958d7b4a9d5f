//! Google Drive v3 folders, uploads and sharing for a service account.
//!
//! Every operation opens its own authenticated session (a freshly exchanged
//! access token), so calls share no mutable state besides the discovery cache.

pub mod auth;

use crate::adapters::http::error_for_status;
use crate::config::DriveConfig;
use crate::core::{DriveRole, ErrorPolicy, ShareResult, TokenSource};
use crate::utils::error::{BizError, Result};
use auth::{ServiceAccountCredentials, ServiceAccountTokenSource};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::Path;
use tokio::sync::RwLock;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
pub const DEFAULT_DISCOVERY_URL: &str = "https://www.googleapis.com/discovery/v1/apis/drive/v3/rest";

/// Base URLs of the Drive API surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveApi {
    pub api_base: String,
    pub upload_base: String,
}

impl Default for DriveApi {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            upload_base: DEFAULT_UPLOAD_BASE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscoveryDocument {
    root_url: String,
    service_path: String,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Debug, Default, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Permission {
    #[serde(rename = "type")]
    kind: Option<String>,
    email_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PermissionList {
    #[serde(default)]
    permissions: Vec<Permission>,
}

/// One authenticated request scope.
struct DriveSession<'a> {
    http: &'a Client,
    token: String,
    api: DriveApi,
}

impl DriveSession<'_> {
    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request.bearer_auth(&self.token).send().await?;
        error_for_status(response).await
    }

    async fn send_json<T: serde::de::DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        Ok(self.send(request).await?.json().await?)
    }

    fn files_url(&self) -> String {
        format!("{}/files", self.api.api_base)
    }
}

pub struct GoogleDrive<T: TokenSource = ServiceAccountTokenSource> {
    tokens: T,
    http: Client,
    discovery_url: String,
    default_api: DriveApi,
    discovered: RwLock<Option<DriveApi>>,
    grant_policy: ErrorPolicy,
}

impl GoogleDrive<ServiceAccountTokenSource> {
    /// Loads credentials from the file named by `SERVICE_ACCOUNT_FILE`.
    pub fn new() -> Result<Self> {
        Self::from_config(&DriveConfig::from_env())
    }

    pub fn from_config(config: &DriveConfig) -> Result<Self> {
        let path = config
            .service_account_file
            .as_deref()
            .ok_or_else(|| BizError::MissingConfigError {
                field: "SERVICE_ACCOUNT_FILE".to_string(),
            })?;
        Self::from_service_account_file(path)
    }

    pub fn from_service_account_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let credentials = ServiceAccountCredentials::from_file(path)?;
        Self::with_token_source(ServiceAccountTokenSource::new(credentials)?)
    }
}

impl<T: TokenSource> GoogleDrive<T> {
    pub fn with_token_source(tokens: T) -> Result<Self> {
        Ok(Self {
            tokens,
            http: Client::builder().build()?,
            discovery_url: DEFAULT_DISCOVERY_URL.to_string(),
            default_api: DriveApi::default(),
            discovered: RwLock::new(None),
            grant_policy: ErrorPolicy::Swallow,
        })
    }

    pub fn with_api(mut self, api: DriveApi) -> Self {
        self.default_api = api;
        self
    }

    pub fn with_discovery_url(mut self, discovery_url: impl Into<String>) -> Self {
        self.discovery_url = discovery_url.into();
        self
    }

    /// What a failed per-recipient grant does during [`share_folder`](Self::share_folder).
    pub fn with_grant_policy(mut self, policy: ErrorPolicy) -> Self {
        self.grant_policy = policy;
        self
    }

    /// The discovered API surface, or the configured default before `initialize`.
    pub async fn api(&self) -> DriveApi {
        self.discovered
            .read()
            .await
            .clone()
            .unwrap_or_else(|| self.default_api.clone())
    }

    async fn session(&self) -> Result<DriveSession<'_>> {
        Ok(DriveSession {
            http: &self.http,
            token: self.tokens.access_token().await?,
            api: self.api().await,
        })
    }

    /// Fetches the Drive v3 discovery document and caches its base URLs.
    pub async fn initialize(&self) -> Result<&Self> {
        let response = self.http.get(&self.discovery_url).send().await?;
        let document: DiscoveryDocument = error_for_status(response).await?.json().await?;

        let root = document.root_url.trim_end_matches('/');
        let service_path = document.service_path.trim_matches('/');
        let api = DriveApi {
            api_base: format!("{}/{}", root, service_path),
            upload_base: format!("{}/upload/{}", root, service_path),
        };
        tracing::debug!("Discovered Drive API at {}", api.api_base);
        *self.discovered.write().await = Some(api);

        Ok(self)
    }

    /// Id of the first folder named exactly `folder_name`, if any.
    pub async fn get_folder_id(&self, folder_name: &str) -> Result<Option<String>> {
        let session = self.session().await?;
        let query = format!(
            "name = '{}' and mimeType = '{}'",
            escape_query_value(folder_name),
            FOLDER_MIME_TYPE
        );

        let list: FileList = session
            .send_json(session.http.get(session.files_url()).query(&[
                ("q", query.as_str()),
                ("pageSize", "10"),
                ("fields", "files(id, name)"),
            ]))
            .await?;

        Ok(list.files.into_iter().next().map(|file| file.id))
    }

    pub async fn create_folder(&self, folder_name: &str, parent_folder_id: Option<&str>) -> Result<String> {
        let session = self.session().await?;
        let mut metadata = json!({
            "name": folder_name,
            "mimeType": FOLDER_MIME_TYPE,
        });
        if let Some(parent) = parent_folder_id {
            metadata["parents"] = json!([parent]);
        }

        let folder: DriveFile = session
            .send_json(
                session
                    .http
                    .post(session.files_url())
                    .query(&[("fields", "id")])
                    .json(&metadata),
            )
            .await?;

        tracing::info!("Folder {} created with ID: {}", folder_name, folder.id);
        Ok(folder.id)
    }

    /// Uploads the whole file in one multipart request into `folder_id`.
    pub async fn upload_file<P: AsRef<Path>>(&self, file_path: P, folder_id: &str, mime_type: &str) -> Result<String> {
        let file_path = file_path.as_ref();
        let file_name = file_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| BizError::validation(format!("not a file path: {}", file_path.display())))?
            .to_string();
        let content = tokio::fs::read(file_path).await?;

        let session = self.session().await?;
        let metadata = json!({ "name": file_name, "parents": [folder_id] });
        let boundary = multipart_boundary(&content);
        let body = multipart_related_body(&boundary, &metadata, mime_type, &content);

        let file: DriveFile = session
            .send_json(
                session
                    .http
                    .post(format!("{}/files", session.api.upload_base))
                    .query(&[("uploadType", "multipart"), ("fields", "id")])
                    .header(CONTENT_TYPE, format!("multipart/related; boundary={}", boundary))
                    .body(body),
            )
            .await?;

        tracing::info!("File uploaded with ID {}", file.id);
        Ok(file.id)
    }

    /// Email addresses of users holding any permission on `folder_id`. Errors propagate.
    pub async fn get_folder_permissions(&self, folder_id: &str) -> Result<HashSet<String>> {
        match self.list_user_permissions(folder_id).await {
            Ok(emails) => Ok(emails),
            Err(e) => {
                tracing::error!("Error checking folder sharing for {}, error is {}", folder_id, e);
                Err(e)
            }
        }
    }

    async fn list_user_permissions(&self, folder_id: &str) -> Result<HashSet<String>> {
        let session = self.session().await?;
        let list: PermissionList = session
            .send_json(
                session
                    .http
                    .get(format!("{}/{}/permissions", session.files_url(), folder_id))
                    .query(&[
                        ("fields", "permissions(id, emailAddress, role, type)"),
                        ("supportsAllDrives", "true"),
                    ]),
            )
            .await?;

        Ok(list
            .permissions
            .into_iter()
            .filter(|permission| permission.kind.as_deref() == Some("user"))
            .filter_map(|permission| permission.email_address)
            .collect())
    }

    /// Permanently deletes the folder, bypassing the trash.
    pub async fn delete_folder(&self, folder_id: &str) -> Result<()> {
        let session = self.session().await?;
        session
            .send(
                session
                    .http
                    .delete(format!("{}/{}", session.files_url(), folder_id))
                    .query(&[("supportsAllDrives", "true")]),
            )
            .await?;

        tracing::info!("Permanently deleted folder with id {}", folder_id);
        Ok(())
    }

    /// Grants `role` on `folder_id` to every address that does not already have access.
    ///
    /// Only the folder itself is shared; sub-folders inherit through Drive's own
    /// permission model. Addresses that already have access are left out of the result.
    pub async fn share_folder<S: AsRef<str>>(
        &self,
        folder_id: &str,
        email_addresses: &[S],
        role: DriveRole,
    ) -> Result<ShareResult> {
        if email_addresses.is_empty() {
            return Err(BizError::validation("Email addresses list cannot be empty"));
        }

        let existing = self.get_folder_permissions(folder_id).await?;
        let mut pending: Vec<&str> = Vec::new();
        for email in email_addresses {
            let email: &str = email.as_ref();
            if !existing.contains(email) && !pending.contains(&email) {
                pending.push(email);
            }
        }

        let mut results = ShareResult::new();
        if pending.is_empty() {
            return Ok(results);
        }

        let session = self.session().await?;
        for email in pending {
            match grant_permission(&session, folder_id, email, role).await {
                Ok(permission_id) => {
                    tracing::info!(
                        "Folder {} shared with {}, permission ID: {}",
                        folder_id,
                        email,
                        permission_id
                    );
                    results.insert(email.to_string(), Some(permission_id));
                }
                Err(e) => {
                    tracing::error!("Failed to share folder {} with {}: {}", folder_id, email, e);
                    if self.grant_policy == ErrorPolicy::Propagate {
                        return Err(e);
                    }
                    results.insert(email.to_string(), None);
                }
            }
        }

        Ok(results)
    }

    /// Alias of [`share_folder`](Self::share_folder); it does not walk sub-folders.
    pub async fn share_folder_recursively<S: AsRef<str>>(
        &self,
        folder_id: &str,
        email_addresses: &[S],
        role: DriveRole,
    ) -> Result<ShareResult> {
        self.share_folder(folder_id, email_addresses, role).await
    }
}

async fn grant_permission(
    session: &DriveSession<'_>,
    folder_id: &str,
    email: &str,
    role: DriveRole,
) -> Result<String> {
    let permission: DriveFile = session
        .send_json(
            session
                .http
                .post(format!("{}/{}/permissions", session.files_url(), folder_id))
                .query(&[
                    ("fields", "id"),
                    ("supportsAllDrives", "true"),
                    ("moveToNewOwnersRoot", "false"),
                ])
                .json(&json!({
                    "type": "user",
                    "role": role.as_str(),
                    "emailAddress": email,
                })),
        )
        .await?;
    Ok(permission.id)
}

/// Escapes a literal for use inside single quotes in a Drive `q` expression.
fn escape_query_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn multipart_boundary(content: &[u8]) -> String {
    let mut attempt = 0u32;
    loop {
        let boundary = format!("biztools_boundary_{}", attempt);
        if !content
            .windows(boundary.len())
            .any(|window| window == boundary.as_bytes())
        {
            return boundary;
        }
        attempt += 1;
    }
}

fn multipart_related_body(boundary: &str, metadata: &Value, mime_type: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(content.len() + 256);
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{}\r\n--{}\r\nContent-Type: {}\r\n\r\n",
            boundary, metadata, boundary, mime_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_query_value() {
        assert_eq!(escape_query_value("Q1 Reports"), "Q1 Reports");
        assert_eq!(escape_query_value("Bob's \\ files"), "Bob\\'s \\\\ files");
    }

    #[test]
    fn test_multipart_boundary_avoids_content() {
        let content = b"payload with biztools_boundary_0 inside";
        assert_eq!(multipart_boundary(content), "biztools_boundary_1");
        assert_eq!(multipart_boundary(b"plain"), "biztools_boundary_0");
    }

    #[test]
    fn test_multipart_related_body_layout() {
        let body = multipart_related_body("b0", &json!({"name": "a.txt"}), "text/plain", b"hello");
        let text = String::from_utf8(body).unwrap();

        assert!(text.starts_with("--b0\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n"));
        assert!(text.contains("{\"name\":\"a.txt\"}\r\n--b0\r\nContent-Type: text/plain\r\n\r\nhello"));
        assert!(text.ends_with("\r\n--b0--\r\n"));
    }
}
