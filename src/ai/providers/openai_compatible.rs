//! Generic OpenAI-compatible chat-completions provider.
//!
//! Works with any endpoint that follows the OpenAI protocol — OpenRouter,
//! Ollama (`/v1`), and most gateways.  The only differences between
//! deployments are the base URL, whether an API key is required, and the
//! model-id convention.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ai::provider::{LlmProvider, Result};
use crate::ai::types::{
    CompletionRequest, CompletionResponse, Message, MessageRole, ToolCall,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Wire types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    // Explicit null is required for tool-call assistant turns.
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Debug, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

// ─── Config ───────────────────────────────────────────────────────────────────

/// Configuration for an OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    /// API key (empty for local providers like Ollama).
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    /// Per-model `(input, output)` price per 1M tokens, for cost estimation.
    /// Models absent from the table record zero cost.
    pub prices: HashMap<String, (f64, f64)>,
    /// Marks a local deployment (gated by health failures).
    pub local: bool,
}

impl OpenAiCompatibleConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            prices: HashMap::new(),
            local: false,
        }
    }

    /// OpenRouter deployment.
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self::new(api_key, "https://openrouter.ai/api/v1")
    }

    /// Local Ollama deployment (no auth, marked local).
    pub fn ollama() -> Self {
        let mut cfg = Self::new("", "http://localhost:11434/v1");
        cfg.local = true;
        cfg
    }

    pub fn with_prices(mut self, prices: HashMap<String, (f64, f64)>) -> Self {
        self.prices = prices;
        self
    }
}

// ─── Provider ─────────────────────────────────────────────────────────────────

pub struct OpenAiCompatibleProvider {
    client: Client,
    config: OpenAiCompatibleConfig,
    provider_name: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(config: OpenAiCompatibleConfig, provider_name: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| format!("failed to create HTTP client: {e}"))?;
        Ok(Self {
            client,
            config,
            provider_name: provider_name.into(),
        })
    }

    fn convert_message(msg: &Message) -> ApiMessage {
        let role = match msg.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        };
        let tool_calls = msg.tool_calls.as_ref().map(|calls| {
            calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": c.arguments },
                    })
                })
                .collect()
        });
        ApiMessage {
            role,
            content: msg.content.clone(),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }

    fn build_payload(&self, request: &CompletionRequest) -> Value {
        let messages: Vec<ApiMessage> =
            request.messages.iter().map(Self::convert_message).collect();
        let mut payload = json!({
            "model": request.model,
            "messages": messages,
        });
        if let Some(t) = request.temperature {
            payload["temperature"] = json!(t);
        }
        if let Some(m) = request.max_tokens {
            payload["max_tokens"] = json!(m);
        }
        if let Some(tools) = &request.tools {
            let wire: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect();
            payload["tools"] = json!(wire);
        }
        payload
    }

    fn estimate_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        match self.config.prices.get(model) {
            Some((input, output)) => {
                f64::from(input_tokens) * input / 1_000_000.0
                    + f64::from(output_tokens) * output / 1_000_000.0
            }
            None => 0.0,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let payload = self.build_payload(&request);

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Content-Type", "application/json");
        if !self.config.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = builder
            .json(&payload)
            .send()
            .await
            .map_err(|e| format!("{} request failed: {e}", self.provider_name))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "{} API error {status}: {body}",
                self.provider_name
            ));
        }

        let api: ApiResponse = response
            .json()
            .await
            .map_err(|e| format!("{} response parse error: {e}", self.provider_name))?;
        let choice = api
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| format!("{} returned no choices", self.provider_name))?;

        let tool_calls = choice.tool_calls();
        let (input_tokens, output_tokens) = api
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));
        let model = api.model.unwrap_or_else(|| request.model.clone());
        let cost = self.estimate_cost(&model, input_tokens, output_tokens);

        Ok(CompletionResponse {
            content: choice.message.content,
            model,
            provider: self.provider_name.clone(),
            input_tokens,
            output_tokens,
            cost,
            tool_calls,
        })
    }

    async fn health_check(&self) -> bool {
        let mut builder = self
            .client
            .get(format!("{}/models", self.config.base_url))
            .timeout(HEALTH_TIMEOUT);
        if !self.config.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.config.api_key));
        }
        match builder.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                log::warn!("{} not reachable: {e}", self.provider_name);
                false
            }
        }
    }

    fn provider_name(&self) -> &str {
        &self.provider_name
    }

    fn local(&self) -> bool {
        self.config.local
    }
}

impl ApiChoice {
    fn tool_calls(&self) -> Option<Vec<ToolCall>> {
        let raw = self.message.tool_calls.as_ref()?;
        if raw.is_empty() {
            return None;
        }
        Some(
            raw.iter()
                .map(|tc| ToolCall::new(&tc.id, &tc.function.name, &tc.function.arguments))
                .collect(),
        )
    }
}
