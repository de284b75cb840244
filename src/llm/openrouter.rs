use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::utils::http::{ensure_success, get_http_client, truncate_for_log, RemoteError};
use crate::utils::timing::log_remote_timing;

static CHANNEL_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<\|.*?\|>").expect("valid channel marker regex"));
static THINK_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>(.*?)</think>(.*)").expect("valid think block regex"));

fn summarize_payload(payload: &Value) -> String {
    let model = payload
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let message_count = payload
        .get("messages")
        .and_then(|v| v.as_array())
        .map(|messages| messages.len())
        .unwrap_or(0);
    let response_format = payload
        .pointer("/response_format/type")
        .and_then(|v| v.as_str())
        .unwrap_or("text");

    format!(
        "model={}, messages={}, response_format={}",
        model, message_count, response_format
    )
}

// Strips `<|message|>` channel markers and `<think>` blocks; falls back to the reasoning text.
pub fn strip_reasoning_markup(content: &str) -> String {
    if let Some(last_pos) = content.rfind("<|message|>") {
        let analysis = &content[..last_pos];
        let final_text = &content[last_pos + "<|message|>".len()..];
        let final_clean = CHANNEL_MARKER_RE.replace_all(final_text, "").trim().to_string();
        if !final_clean.is_empty() {
            return final_clean;
        }
        return CHANNEL_MARKER_RE.replace_all(analysis, "").trim().to_string();
    }

    if let Some(caps) = THINK_BLOCK_RE.captures(content) {
        let final_text = caps.get(2).map(|m| m.as_str()).unwrap_or("").trim();
        if !final_text.is_empty() {
            return final_text.to_string();
        }
        return caps.get(1).map(|m| m.as_str()).unwrap_or("").trim().to_string();
    }

    content.trim().to_string()
}

fn extract_reasoning_text(message: &Value) -> Option<String> {
    if let Some(reasoning) = message.get("reasoning").and_then(|v| v.as_str()) {
        let trimmed = reasoning.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }

    let details = message.get("reasoning_details").and_then(|v| v.as_array())?;
    let parts = details
        .iter()
        .filter_map(|detail| detail.get("text").and_then(|v| v.as_str()))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

pub fn extract_completion_content(response: &Value) -> Option<String> {
    let message = response.pointer("/choices/0/message")?;
    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim();

    let content = if content.is_empty() {
        extract_reasoning_text(message)?
    } else {
        content.to_string()
    };
    let cleaned = strip_reasoning_markup(&content);
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenRouterClient {
    pub fn new(base_url: &str, api_key: &str, model: &str, temperature: f32) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.trim().to_string(),
            model: model.trim().to_string(),
            temperature,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.openrouter_base_url,
            &config.openrouter_api_key,
            &config.assistant_model,
            config.assistant_temperature,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn build_payload(&self, system_prompt: &str, user_content: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_content }
            ],
            "temperature": self.temperature,
            "response_format": { "type": "json_object" }
        })
    }

    async fn call_api(&self, payload: &Value) -> Result<Value, RemoteError> {
        debug!("OpenRouter request: {}", summarize_payload(payload));

        let response = get_http_client()
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("X-Title", "image-prompt-studio")
            .json(payload)
            .send()
            .await?;
        let response = ensure_success("OpenRouter", response).await?;
        let value = response.json::<Value>().await?;
        debug!("OpenRouter response received for model={}", self.model);
        Ok(value)
    }

    pub async fn chat_completion(
        &self,
        system_prompt: &str,
        user_content: &str,
        operation: &str,
    ) -> Result<String, RemoteError> {
        if self.api_key.is_empty() {
            return Err(RemoteError::NotConfigured("OPENROUTER_API_KEY"));
        }
        if self.model.is_empty() {
            return Err(RemoteError::Validation("model identifier is required".to_string()));
        }

        let payload = self.build_payload(system_prompt, user_content);
        let operation = format!("openrouter:{operation}");
        let metadata = json!({ "input_chars": user_content.chars().count() });

        log_remote_timing("openrouter", &self.model, &operation, Some(metadata), || async {
            let response = self.call_api(&payload).await?;
            extract_completion_content(&response).ok_or_else(|| {
                warn!(
                    "OpenRouter response had empty content: {}",
                    truncate_for_log(&response.to_string(), 2000)
                );
                RemoteError::InvalidResponse("empty completion".to_string())
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_channel_markers_and_think_blocks() {
        assert_eq!(
            strip_reasoning_markup("<|channel|>analysis<|message|>{\"a\":1}<|end|>"),
            "{\"a\":1}"
        );
        assert_eq!(
            strip_reasoning_markup("<think>\nplan the reply\n</think>\n{\"b\":2}"),
            "{\"b\":2}"
        );
        assert_eq!(strip_reasoning_markup("  plain  "), "plain");
    }

    #[test]
    fn extracts_content_or_reasoning_fallback() {
        let response = json!({
            "choices": [{ "message": { "content": "  {\"ok\":true} " } }]
        });
        assert_eq!(extract_completion_content(&response).as_deref(), Some("{\"ok\":true}"));

        let reasoning_only = json!({
            "choices": [{ "message": {
                "content": "",
                "reasoning_details": [{ "text": "first" }, { "text": " " }, { "text": "second" }]
            } }]
        });
        assert_eq!(
            extract_completion_content(&reasoning_only).as_deref(),
            Some("first\nsecond")
        );
        assert!(extract_completion_content(&json!({ "choices": [] })).is_none());
    }

    #[test]
    fn payload_requests_json_output() {
        let client = OpenRouterClient::new("https://example.test/api/", "key", "openai/gpt-4o-mini", 0.4);
        let payload = client.build_payload("system", "user");
        assert_eq!(payload["model"], "openai/gpt-4o-mini");
        assert_eq!(payload["messages"][1]["content"], "user");
        assert_eq!(payload["response_format"]["type"], "json_object");
        assert_eq!(
            summarize_payload(&payload),
            "model=openai/gpt-4o-mini, messages=2, response_format=json_object"
        );
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_network() {
        let client = OpenRouterClient::new("https://example.test", " ", "m/x", 0.4);
        let err = client.chat_completion("s", "u", "test").await.unwrap_err();
        assert!(matches!(err, RemoteError::NotConfigured("OPENROUTER_API_KEY")));
    }
}
