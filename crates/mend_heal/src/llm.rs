//! LLM-backed repair service.
//!
//! Supports OpenAI and Anthropic APIs, selected via environment variables.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{HealError, HealResult};
use crate::repair::{RepairRequest, RepairResponse, RepairService};

/// Summary used when the model omits one.
pub const DEFAULT_SUMMARY: &str = "LLM updated spec";

const SYSTEM_PROMPT: &str = "You are testmend, an autonomous QA engineer. \
You receive a failing Playwright test spec and must rewrite it so the intent still holds but the failure is fixed. \
Return JSON with keys `summary` (short sentence about fix) and `updatedSpec` (full updated TypeScript file). \
Do not change the test name or add new dependencies. Keep assertions deterministic.";

/// LLM provider type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Anthropic,
}

/// Repair service calling a hosted chat model.
pub struct LlmRepairService {
    provider: LlmProvider,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl LlmRepairService {
    pub fn new(provider: LlmProvider, api_key: String, model: Option<String>) -> Self {
        let default_model = match provider {
            LlmProvider::OpenAI => "gpt-4o-mini".to_string(),
            LlmProvider::Anthropic => "claude-3-5-sonnet-latest".to_string(),
        };

        Self {
            provider,
            api_key,
            model: model.unwrap_or(default_model),
            client: reqwest::Client::new(),
        }
    }

    /// Create a service from environment variables
    ///
    /// Checks in order:
    /// 1. OPENAI_API_KEY
    /// 2. ANTHROPIC_API_KEY
    ///
    /// `MEND_HEALING_LLM_MODEL` overrides the model.
    pub fn from_env() -> HealResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> HealResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let model = lookup("MEND_HEALING_LLM_MODEL").filter(|m| !m.is_empty());

        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            return Ok(Self::new(LlmProvider::OpenAI, key, model));
        }
        if let Some(key) = lookup("ANTHROPIC_API_KEY").filter(|k| !k.is_empty()) {
            return Ok(Self::new(LlmProvider::Anthropic, key, model));
        }

        Err(HealError::RepairService(
            "OPENAI_API_KEY or ANTHROPIC_API_KEY is required for AI repair".to_string(),
        ))
    }

    pub fn provider(&self) -> &LlmProvider {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, user: String) -> HealResult<String> {
        match self.provider {
            LlmProvider::OpenAI => self.complete_openai(user).await,
            LlmProvider::Anthropic => self.complete_anthropic(user).await,
        }
    }

    async fn complete_openai(&self, user: String) -> HealResult<String> {
        let request = OpenAIRequest {
            model: self.model.clone(),
            response_format: ResponseFormat {
                kind: "json_object".to_string(),
            },
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user,
                },
            ],
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| HealError::RepairService(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HealError::RepairService(format!(
                "OpenAI API error {}: {}",
                status, body
            )));
        }

        let result: OpenAIResponse = response
            .json()
            .await
            .map_err(|e| HealError::RepairService(format!("Failed to parse response: {}", e)))?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| HealError::RepairService("No response from OpenAI".to_string()))
    }

    async fn complete_anthropic(&self, user: String) -> HealResult<String> {
        let request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: 8192,
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: user,
            }],
        };

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| HealError::RepairService(format!("Network error: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HealError::RepairService(format!(
                "Anthropic API error {}: {}",
                status, body
            )));
        }

        let result: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| HealError::RepairService(format!("Failed to parse response: {}", e)))?;

        result
            .content
            .into_iter()
            .next()
            .map(|c| c.text)
            .ok_or_else(|| HealError::RepairService("No response from Anthropic".to_string()))
    }
}

#[async_trait]
impl RepairService for LlmRepairService {
    async fn repair(&self, request: &RepairRequest) -> HealResult<RepairResponse> {
        debug!("Requesting repair of {} from {}", request.spec_path, self.model);
        let raw = self.complete(build_user_prompt(request)).await?;
        parse_repair_reply(&raw)
    }
}

/// User message describing the failure and the current spec.
pub fn build_user_prompt(request: &RepairRequest) -> String {
    let mut details = vec![format!("Spec path: {}", request.spec_path)];
    if let Some(message) = request.failure_message.as_deref().filter(|m| !m.is_empty()) {
        details.push(format!("Failure: {}", message));
    }
    if !request.stdout.is_empty() {
        details.push(format!("stdout:\n{}", request.stdout));
    }
    if !request.stderr.is_empty() {
        details.push(format!("stderr:\n{}", request.stderr));
    }

    [
        details.join("\n\n"),
        "Current spec file:".to_string(),
        "```ts".to_string(),
        request.spec_content.clone(),
        "```".to_string(),
        "Respond ONLY with JSON: {\"summary\": string, \"updatedSpec\": string}".to_string(),
    ]
    .join("\n\n")
}

/// Parse the model's JSON reply.
pub fn parse_repair_reply(raw: &str) -> HealResult<RepairResponse> {
    let trimmed = raw.trim();
    let trimmed = if trimmed.is_empty() { "{}" } else { trimmed };
    let reply: RepairReply = serde_json::from_str(trimmed).map_err(|e| {
        warn!("Repair model returned invalid JSON");
        HealError::RepairService(format!("LLM returned invalid JSON: {}", e))
    })?;

    let updated_spec = reply
        .updated_spec
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HealError::RepairService("LLM did not return updatedSpec content".to_string()))?;

    Ok(RepairResponse {
        updated_spec,
        summary: reply.summary.unwrap_or_else(|| DEFAULT_SUMMARY.to_string()),
        raw: trimmed.to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepairReply {
    summary: Option<String>,
    updated_spec: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

// Anthropic API types
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_provider_detection() {
        assert!(LlmRepairService::from_lookup(lookup(&[])).is_err());

        let service = LlmRepairService::from_lookup(lookup(&[("OPENAI_API_KEY", "k")])).unwrap();
        assert_eq!(service.provider(), &LlmProvider::OpenAI);
        assert_eq!(service.model(), "gpt-4o-mini");

        let service = LlmRepairService::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "k"),
            ("MEND_HEALING_LLM_MODEL", "claude-custom"),
        ]))
        .unwrap();
        assert_eq!(service.provider(), &LlmProvider::Anthropic);
        assert_eq!(service.model(), "claude-custom");
    }

    #[test]
    fn test_parse_reply() {
        let response =
            parse_repair_reply(r#"{"summary": "Waited for the button", "updatedSpec": "test('a')"}"#)
                .unwrap();
        assert_eq!(response.summary, "Waited for the button");
        assert_eq!(response.updated_spec, "test('a')");

        let response = parse_repair_reply(r#"{"updatedSpec": "x"}"#).unwrap();
        assert_eq!(response.summary, DEFAULT_SUMMARY);
    }

    #[test]
    fn test_parse_reply_errors() {
        assert!(matches!(
            parse_repair_reply("not json"),
            Err(HealError::RepairService(_))
        ));
        assert!(matches!(
            parse_repair_reply(r#"{"summary": "nothing"}"#),
            Err(HealError::RepairService(_))
        ));
        assert!(matches!(parse_repair_reply(""), Err(HealError::RepairService(_))));
    }

    #[test]
    fn test_user_prompt_layout() {
        let request = RepairRequest {
            spec_path: "tests/a.spec.ts".into(),
            failure_message: Some("boom".into()),
            stdout: String::new(),
            stderr: "trace".into(),
            spec_content: "test('a')".into(),
        };
        let prompt = build_user_prompt(&request);
        assert!(prompt.starts_with("Spec path: tests/a.spec.ts\n\nFailure: boom\n\nstderr:\ntrace"));
        assert!(prompt.contains("```ts\n\ntest('a')\n\n```"));
        assert!(!prompt.contains("stdout:"));
    }
}
