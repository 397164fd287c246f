use crate::config::DecisionConfig;
use relay_core::{RelayError, RelayResult};
use tracing::debug;

/// Client for an OpenAI-compatible chat completions endpoint.
///
/// Works with llama.cpp's server, Ollama, vLLM, OpenAI and anything else that
/// speaks `/v1/chat/completions`.
#[derive(Debug, Clone)]
pub struct ChatClient {
    config: DecisionConfig,
    http: reqwest::Client,
}

impl ChatClient {
    /// Create a client for `config`.
    pub fn new(config: DecisionConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// The settings this client uses.
    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// One system + user exchange; returns the assistant's text.
    ///
    /// No timeout and no retry: a slow endpoint stalls only the caller's task.
    pub async fn complete(&self, system: &str, user: &str) -> RelayResult<String> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let body = serde_json::json!({
            "model": self.config.model_id,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut request = self
            .http
            .post(&url)
            .header("Content-Type", "application/json");
        if !self.config.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let resp = request
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Decision(format!("endpoint unreachable: {e}")))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RelayError::Decision(format!("unreadable response: {e}")))?;

        if !status.is_success() {
            return Err(RelayError::Decision(format!(
                "endpoint error {status}: {resp_body}"
            )));
        }

        let content = parse_chat_response(&resp_body)?;
        debug!(model = %self.config.model_id, chars = content.len(), "Chat completion received");
        Ok(content)
    }
}

/// Pull `choices[0].message.content` out of a completions body.
pub fn parse_chat_response(body: &serde_json::Value) -> RelayResult<String> {
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RelayError::Decision("response has no message content".to_string()))
}
