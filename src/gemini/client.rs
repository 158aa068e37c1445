use std::future::Future;
use std::time::Duration;

use reqwest::Client;

use super::error::GeminiError;
use super::types::{GenerateContentRequest, GenerateContentResponse};

pub const API_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Anything that can answer a `generateContent` request.
///
/// The evaluator is generic over this so tests can script responses.
pub trait ContentGenerator: Send + Sync {
    fn generate_content(
        &self,
        model: &str,
        req: &GenerateContentRequest,
    ) -> impl Future<Output = Result<GenerateContentResponse, GeminiError>> + Send;
}

pub struct GeminiClient {
    api_key: String,
    client: Client,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self, GeminiError> {
        Self::with_base_url(api_key, API_BASE_URL.to_string())
    }

    /// Create a client pointing at a custom base URL (useful for testing).
    pub fn with_base_url(api_key: String, base_url: String) -> Result<Self, GeminiError> {
        Self::with_timeouts(api_key, base_url, Duration::from_secs(10), Duration::from_secs(120))
    }

    pub fn with_timeouts(
        api_key: String,
        base_url: String,
        connect_timeout: Duration,
        timeout: Duration,
    ) -> Result<Self, GeminiError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            api_key,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{model}:generateContent", self.base_url)
    }
}

impl ContentGenerator for GeminiClient {
    async fn generate_content(
        &self,
        model: &str,
        req: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GeminiError> {
        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(req)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(GeminiError::RateLimited {
                retry_after_ms: retry_after,
            });
        }

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(GeminiError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.json::<GenerateContentResponse>().await?;
        Ok(body)
    }
}
