//! LLM client for the single-call analysis engine.
//!
//! Speaks the OpenAI-compatible `/chat/completions` contract so the model
//! endpoint is swappable via configuration. Exactly one call per analysis;
//! no retries beyond the transport layer, no streaming.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{QuantdeskError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct LlmClient {
    config: LlmConfig,
    http: Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| QuantdeskError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    pub fn default_model(&self) -> &str {
        &self.config.model
    }

    /// Send one chat request and return the assistant text.
    pub async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        model: Option<&str>,
        json_mode: bool,
    ) -> Result<String> {
        if !self.is_configured() {
            return Err(QuantdeskError::LlmInvocationFailed(
                "LLM API key not configured".to_string(),
            ));
        }

        let request = ChatRequest {
            model: model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(&self.config.model)
                .to_string(),
            messages,
            temperature: Some(self.config.temperature),
            response_format: json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let url = format!("{}/chat/completions", self.config.base_url);
        debug!(model = %request.model, "Sending LLM request");

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| QuantdeskError::LlmInvocationFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(500).collect();
            warn!("LLM API error: {} - {}", status, truncated);
            return Err(QuantdeskError::LlmInvocationFailed(format!(
                "{} - {}",
                status, truncated
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| QuantdeskError::LlmInvocationFailed(format!("bad response: {}", e)))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();
        debug!("LLM response received: {} chars", content.len());
        Ok(content)
    }

    /// Chat expecting a JSON object back; parses fenced or inline JSON.
    pub async fn chat_json(
        &self,
        messages: Vec<ChatMessage>,
        model: Option<&str>,
    ) -> Result<Value> {
        let text = self.chat(messages, model, true).await?;
        extract_json(&text).ok_or_else(|| {
            QuantdeskError::LlmInvocationFailed(format!(
                "response is not JSON: {}",
                text.chars().take(200).collect::<String>()
            ))
        })
    }

    /// Like `chat_json` but never fails: any error yields the caller-supplied
    /// default structure so the analysis can degrade instead of aborting.
    pub async fn safe_chat_json(
        &self,
        messages: Vec<ChatMessage>,
        model: Option<&str>,
        default: Value,
    ) -> Value {
        match self.chat_json(messages, model).await {
            Ok(v) => v,
            Err(e) => {
                warn!("LLM call failed, using default structure: {}", e);
                default
            }
        }
    }
}

/// Pull the first JSON object out of a model response. Handles plain JSON,
/// ```json fences, and prose-wrapped objects via brace scanning.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        if v.is_object() || v.is_array() {
            return Some(v);
        }
    }

    // Fenced block
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            if let Ok(v) = serde_json::from_str::<Value>(after[..end].trim()) {
                return Some(v);
            }
        }
    }

    // Brace scan: first balanced {...}
    let bytes = trimmed.as_bytes();
    let start = trimmed.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&trimmed[start..=i]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_plain_json() {
        let v = extract_json(r#"{"decision": "BUY", "confidence": 70}"#).unwrap();
        assert_eq!(v["decision"], "BUY");
    }

    #[test]
    fn extract_fenced_json() {
        let text = "Here is my analysis:\n```json\n{\"decision\": \"HOLD\"}\n```\nDone.";
        let v = extract_json(text).unwrap();
        assert_eq!(v["decision"], "HOLD");
    }

    #[test]
    fn extract_prose_wrapped_json() {
        let text = "Sure! {\"a\": {\"nested\": \"} tricky {\"}, \"b\": 2} trailing words";
        let v = extract_json(text).unwrap();
        assert_eq!(v["b"], 2);
    }

    #[test]
    fn extract_returns_none_for_prose() {
        assert!(extract_json("no json here at all").is_none());
    }

    #[test]
    fn unconfigured_client_is_reported() {
        let client = LlmClient::new(LlmConfig::default()).unwrap();
        assert!(!client.is_configured());
    }

    #[tokio::test]
    async fn safe_chat_json_returns_default_on_failure() {
        let client = LlmClient::new(LlmConfig::default()).unwrap();
        let default = json!({"decision": "HOLD"});
        let v = client
            .safe_chat_json(vec![ChatMessage::user("hi")], None, default.clone())
            .await;
        assert_eq!(v, default);
    }
}
