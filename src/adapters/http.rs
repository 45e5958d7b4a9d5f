use crate::core::ResourceFactory;
use crate::utils::error::{BizError, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};

/// Builds the pooled HTTP client behind a wrapper's lazy session.
#[derive(Debug, Clone, Default)]
pub struct HttpClientFactory;

#[async_trait]
impl ResourceFactory for HttpClientFactory {
    type Resource = Client;

    async fn create(&self) -> Result<Client> {
        tracing::debug!("Opening HTTP session");
        Ok(Client::builder().build()?)
    }
}

/// Turns a non-success response into `HttpStatusError` carrying the body text.
pub async fn error_for_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(BizError::HttpStatusError {
        status: status.as_u16(),
        body,
    })
}
