//! Gemini text-generation backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ReportConfig;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Failure talking to a text-generation backend.
#[derive(Debug, Error)]
pub enum ReportError {
    /// A required setting is missing.
    #[error("report backend not configured: {0}")]
    NotConfigured(&'static str),
    /// The HTTP request could not be sent or read.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The service answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// Response status.
        status: reqwest::StatusCode,
        /// Response body, as text.
        body: String,
    },
    /// The response body was not the expected JSON.
    #[error("JSON decode failed: {0}")]
    Json(#[from] serde_json::Error),
    /// The response carried no text.
    #[error("empty response")]
    EmptyResponse,
    /// Any other backend failure.
    #[error("{0}")]
    Backend(String),
}

/// A service that turns one prompt into one block of text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Name of the model prompts are sent to.
    fn model(&self) -> &str;

    /// Send `prompt` and return the generated text.
    async fn generate(&self, prompt: &str) -> Result<String, ReportError>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [RequestPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

impl<'a> GenerateRequest<'a> {
    fn user_prompt(text: &'a str) -> Self {
        Self {
            contents: [Content {
                role: "user",
                parts: [RequestPart { text }],
            }],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text parts of the first candidate.
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        (!text.is_empty()).then_some(text)
    }
}

/// Client for the `generateContent` endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    api_key: Option<String>,
    model: String,
    endpoint: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("configured", &self.is_configured())
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Build a client from the report settings.
    ///
    /// A missing key is not an error here; requests fail with
    /// [`ReportError::NotConfigured`] instead.
    #[must_use]
    pub fn from_config(config: &ReportConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
            model: config.model.clone(),
            endpoint: config.endpoint.trim().trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Whether an API key is set.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Full URL of the `generateContent` call.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, ReportError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ReportError::NotConfigured("API_KEY"))?;

        let url = self.url();
        debug!(%url, prompt_len = prompt.len(), "Sending report prompt");

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, api_key)
            .json(&GenerateRequest::user_prompt(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReportError::HttpStatus { status, body });
        }

        let bytes = response.bytes().await?;
        let parsed: GenerateResponse = serde_json::from_slice(&bytes)?;
        parsed.text().ok_or(ReportError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_key(key: Option<&str>) -> ReportConfig {
        ReportConfig {
            api_key: key.map(str::to_string),
            ..ReportConfig::default()
        }
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(GenerateRequest::user_prompt("hello")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "hello"}]}]
            })
        );
    }

    #[test]
    fn test_response_joins_first_candidate_parts() {
        let json = r#"{
            "candidates": [
                {"content": {"role": "model", "parts": [{"text": "Hello, "}, {"text": "class."}]}},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        }"#;
        let parsed: GenerateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.text().as_deref(), Some("Hello, class."));
    }

    #[test]
    fn test_response_without_text_is_empty() {
        let parsed: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.text().is_none());

        let parsed: GenerateResponse =
            serde_json::from_str(r#"{"candidates": [{"finishReason": "SAFETY"}]}"#).unwrap();
        assert!(parsed.text().is_none());
    }

    #[test]
    fn test_url() {
        let mut config = config_with_key(Some("k"));
        config.endpoint = "https://example.test/v1beta/".to_string();
        let client = GeminiClient::from_config(&config);
        assert_eq!(
            client.url(),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(client.model(), "gemini-2.5-flash");
    }

    #[test]
    fn test_blank_key_counts_as_missing() {
        assert!(!GeminiClient::from_config(&config_with_key(Some("  "))).is_configured());
        assert!(GeminiClient::from_config(&config_with_key(Some("k"))).is_configured());
    }

    #[test]
    fn test_debug_hides_key() {
        let client = GeminiClient::from_config(&config_with_key(Some("secret-key")));
        assert!(!format!("{client:?}").contains("secret-key"));
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_sending() {
        let client = GeminiClient::from_config(&config_with_key(None));
        let err = client.generate("prompt").await.unwrap_err();
        assert!(matches!(err, ReportError::NotConfigured("API_KEY")));
    }
}
