//! Summarization via an OpenAI-compatible chat-completions API.
//!
//! Only derived text leaves the machine; audio never does. The API key is
//! read from the environment, never from the config file.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{SummarizeError, Summarizer, SummaryStyle};

/// Environment variable holding the API key.
const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Chat-completions response envelope (the parts we read)
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// HTTP summarizer against an OpenAI-compatible endpoint.
pub struct ChatSummarizer {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

impl ChatSummarizer {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
            api_key: std::env::var(API_KEY_ENV).ok(),
        }
    }

    /// Override the key, for tests.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Summarizer for ChatSummarizer {
    fn name(&self) -> &str {
        "chat-completions"
    }

    async fn summarize(&self, text: &str, style: &SummaryStyle) -> Result<String, SummarizeError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SummarizeError::Auth(format!("{} not set", API_KEY_ENV)))?;

        let body = json!({
            "model": style.model,
            "max_tokens": style.max_tokens,
            "temperature": style.temperature,
            "messages": [{
                "role": "user",
                "content": format!(
                    "Summarize the following transcript of the day's audio. \
                     Be concise and concrete; mention key topics, decisions, \
                     and action items.\n\n{}",
                    text
                ),
            }],
        });

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SummarizeError::Timeout
                } else {
                    SummarizeError::Api(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(SummarizeError::RateLimited);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SummarizeError::Auth(format!("API returned {}", status)));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SummarizeError::Api(format!(
                "API returned {}: {}",
                status,
                detail.chars().take(200).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SummarizeError::Api(format!("failed to parse response: {}", e)))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| SummarizeError::Api("response had no choices".to_string()))?;

        debug!(chars = content.len(), "summary received");
        Ok(content.trim().to_string())
    }
}
