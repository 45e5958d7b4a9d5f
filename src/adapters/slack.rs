use crate::adapters::http::HttpClientFactory;
use crate::config::SlackConfig;
use crate::core::{ErrorPolicy, ResourceHandle, Scoped};
use crate::utils::error::{BizError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

pub const SLACK_API_BASE_URL_ENV: &str = "SLACK_API_BASE_URL";

/// Posts messages through the Slack Web API.
///
/// Failures are logged and, under the default [`ErrorPolicy::Swallow`], turned into `None`.
pub struct SlackService {
    bot_token: String,
    api_base_url: String,
    policy: ErrorPolicy,
    session: ResourceHandle<HttpClientFactory>,
}

impl SlackService {
    /// Reads the API base URL from `SLACK_API_BASE_URL` (empty when unset).
    pub fn new(bot_token: impl Into<String>) -> Self {
        let api_base_url = std::env::var(SLACK_API_BASE_URL_ENV).unwrap_or_default();
        Self {
            bot_token: bot_token.into(),
            api_base_url,
            policy: ErrorPolicy::Swallow,
            session: ResourceHandle::new(HttpClientFactory),
        }
    }

    pub fn from_config(config: &SlackConfig) -> Self {
        Self::new(config.bot_token.clone()).with_base_url(config.api_base_url.clone())
    }

    pub fn with_base_url(mut self, api_base_url: impl Into<String>) -> Self {
        self.api_base_url = api_base_url.into();
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.policy
    }

    pub async fn has_session(&self) -> bool {
        self.session.is_live().await
    }

    /// Sends `message` to `chat.postMessage` and returns Slack's JSON reply.
    pub async fn send_message(&self, message: &Value) -> Result<Option<Value>> {
        let outcome = self.post_message(message).await;

        match &outcome {
            Err(BizError::HttpStatusError { body, .. }) => {
                tracing::error!("Error while sending Slack message, error is: {}", body)
            }
            Err(e) => tracing::error!("Error while posting to Slack API, err is: {}", e),
            Ok(_) => {}
        }

        self.policy.settle(outcome)
    }

    async fn post_message(&self, message: &Value) -> Result<Value> {
        let session = self.session.acquire().await?;
        let url = format!("{}/chat.postMessage", self.api_base_url);

        let response = session
            .post(&url)
            .bearer_auth(&self.bot_token)
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(BizError::HttpStatusError {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    /// Drops the HTTP session; a later send opens a new one.
    pub async fn close(&self) {
        self.session.release().await;
    }
}

#[async_trait]
impl Scoped for SlackService {
    async fn enter(&self) -> Result<()> {
        self.session.acquire().await.map(|_| ())
    }

    async fn exit(&self) {
        self.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_base_url_overrides_env_value() {
        let service = SlackService::new("xoxb-token").with_base_url("https://slack.example/api");
        assert_eq!(service.api_base_url(), "https://slack.example/api");
        assert_eq!(service.error_policy(), ErrorPolicy::Swallow);
    }

    #[tokio::test]
    async fn test_session_is_lazy() {
        let service = SlackService::new("xoxb-token").with_base_url("http://127.0.0.1:9");
        assert!(!service.has_session().await);

        service.enter().await.unwrap();
        assert!(service.has_session().await);

        service.exit().await;
        service.exit().await;
        assert!(!service.has_session().await);
    }

    #[tokio::test]
    async fn test_empty_base_url_is_swallowed() {
        let service = SlackService::new("xoxb-token").with_base_url("");
        let result = service
            .send_message(&serde_json::json!({"channel": "C1", "text": "hi"}))
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_propagate_policy_returns_error() {
        let service = SlackService::new("xoxb-token")
            .with_base_url("")
            .with_error_policy(ErrorPolicy::Propagate);
        let result = service
            .send_message(&serde_json::json!({"channel": "C1", "text": "hi"}))
            .await;
        assert!(matches!(result, Err(BizError::HttpError(_))));
    }
}
