//! GLM chat-completions provider.
//!
//! GLM publishes strict message-sequence rules (single system message at
//! index 0, null content on tool-call turns, at least one user message), so
//! every request passes through [`crate::ai::reshape`] before the wire.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::ai::provider::{LlmProvider, Result};
use crate::ai::reshape::reshape_messages;
use crate::ai::types::{CompletionRequest, CompletionResponse, Message, MessageRole, ToolCall};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Approximate `(input, output)` cost per 1M tokens.
const GLM_PRICES: &[(&str, f64, f64)] = &[
    ("glm-5", 0.005, 0.015),
    ("glm-4.7", 0.002, 0.006),
    ("glm-4.7-flash", 0.0005, 0.0015),
    ("glm-4-plus", 0.003, 0.009),
];

const DEFAULT_PRICE: (f64, f64) = (0.002, 0.006);

pub struct GlmProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GlmProvider {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| format!("failed to create HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
        })
    }

    fn wire_messages(messages: &[Message]) -> Vec<Value> {
        reshape_messages(messages)
            .iter()
            .map(|m| {
                let role = match m.role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                    MessageRole::Tool => "tool",
                };
                let mut obj = json!({ "role": role, "content": m.content });
                if let Some(calls) = &m.tool_calls {
                    obj["tool_calls"] = json!(calls
                        .iter()
                        .map(|c| json!({
                            "id": c.id,
                            "type": "function",
                            "function": { "name": c.name, "arguments": c.arguments },
                        }))
                        .collect::<Vec<Value>>());
                }
                if let Some(id) = &m.tool_call_id {
                    obj["tool_call_id"] = json!(id);
                }
                obj
            })
            .collect()
    }

    fn estimate_cost(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        let (input, output) = GLM_PRICES
            .iter()
            .find(|(name, _, _)| *name == model)
            .map(|(_, i, o)| (*i, *o))
            .unwrap_or(DEFAULT_PRICE);
        f64::from(input_tokens) * input / 1_000_000.0
            + f64::from(output_tokens) * output / 1_000_000.0
    }

    fn parse_tool_calls(message: &Value) -> Option<Vec<ToolCall>> {
        let raw = message.get("tool_calls")?.as_array()?;
        if raw.is_empty() {
            return None;
        }
        Some(
            raw.iter()
                .filter_map(|tc| {
                    Some(ToolCall::new(
                        tc.get("id")?.as_str()?,
                        tc.get("function")?.get("name")?.as_str()?,
                        tc.get("function")?.get("arguments")?.as_str()?,
                    ))
                })
                .collect(),
        )
    }
}

#[async_trait]
impl LlmProvider for GlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let mut payload = json!({
            "model": request.model,
            "messages": Self::wire_messages(&request.messages),
        });
        if let Some(t) = request.temperature {
            payload["temperature"] = json!(t);
        }
        if let Some(m) = request.max_tokens {
            payload["max_tokens"] = json!(m);
        }
        if let Some(tools) = &request.tools {
            payload["tools"] = json!(tools
                .iter()
                .map(|t| json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    },
                }))
                .collect::<Vec<Value>>());
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept-Language", "en-US,en")
            .json(&payload)
            .send()
            .await
            .map_err(|e| format!("GLM request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("GLM API error {status}: {body}"));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| format!("GLM response parse error: {e}"))?;
        let message = data
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or("GLM returned no choices")?;

        let input_tokens = data
            .pointer("/usage/prompt_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;
        let output_tokens = data
            .pointer("/usage/completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;

        Ok(CompletionResponse {
            content: message
                .get("content")
                .and_then(Value::as_str)
                .map(str::to_owned),
            model: request.model.clone(),
            provider: "glm".to_owned(),
            input_tokens,
            output_tokens,
            cost: Self::estimate_cost(&request.model, input_tokens, output_tokens),
            tool_calls: Self::parse_tool_calls(message),
        })
    }

    async fn health_check(&self) -> bool {
        let payload = json!({
            "model": "glm-4.7-flash",
            "messages": [{ "role": "user", "content": "hi" }],
            "max_tokens": 1,
        });
        let result = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept-Language", "en-US,en")
            .timeout(HEALTH_TIMEOUT)
            .json(&payload)
            .send()
            .await;
        match result {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                log::warn!("GLM not reachable: {e}");
                false
            }
        }
    }

    fn provider_name(&self) -> &str {
        "glm"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_prices() {
        let cost = GlmProvider::estimate_cost("glm-4.7", 1_000_000, 1_000_000);
        assert!((cost - 0.008).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_uses_default_price() {
        let cost = GlmProvider::estimate_cost("glm-99", 1_000_000, 0);
        assert!((cost - 0.002).abs() < 1e-9);
    }

    #[test]
    fn wire_messages_are_reshaped() {
        // Two system messages and no user message: the wire form must have a
        // single merged system at index 0 and a placeholder user.
        let messages = vec![Message::system("a"), Message::system("b")];
        let wire = GlmProvider::wire_messages(&messages);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[0]["content"], "a\n\nb");
        assert_eq!(wire[1]["role"], "user");
    }

    #[test]
    fn tool_call_turn_has_null_content_on_wire() {
        let messages = vec![
            Message::user("u"),
            Message::assistant_tool_calls(vec![ToolCall::new("c1", "t", "{}")]),
            Message::tool_reply("c1", "ok"),
        ];
        let wire = GlmProvider::wire_messages(&messages);
        assert!(wire[1]["content"].is_null());
        assert_eq!(wire[2]["tool_call_id"], "c1");
    }

    #[test]
    fn parse_tool_calls_from_response_message() {
        let message = json!({
            "content": null,
            "tool_calls": [{
                "id": "call_7",
                "type": "function",
                "function": { "name": "file_read", "arguments": "{\"path\":\"x\"}" },
            }],
        });
        let calls = GlmProvider::parse_tool_calls(&message).unwrap();
        assert_eq!(calls[0].id, "call_7");
        assert_eq!(calls[0].name, "file_read");
    }

    #[test]
    fn no_tool_calls_yields_none() {
        let message = json!({ "content": "plain text" });
        assert!(GlmProvider::parse_tool_calls(&message).is_none());
    }
}
