// src/llm/openai.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::http::{OutboundRequest, RetryingClient};
use crate::llm::{parse_template, QueryRewriter, RewriteError, Rewritten};

pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const MAX_TOKENS: u32 = 512;

/// OpenAI Chat Completions rewriter. The system prompt carries the schema contract.
pub struct OpenAiRewriter {
    client: RetryingClient,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    prompt: String,
}

impl OpenAiRewriter {
    pub fn new(
        api_key: impl Into<String>,
        model: Option<&str>,
        temperature: f32,
        prompt: impl Into<String>,
        client: RetryingClient,
    ) -> Self {
        Self {
            client,
            endpoint: OPENAI_CHAT_URL.to_string(),
            api_key: api_key.into(),
            model: model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or(DEFAULT_MODEL)
                .to_string(),
            temperature,
            prompt: prompt.into(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    content: Option<String>,
}

fn user_message(query: &str) -> String {
    format!(
        "Rewrite the following natural language query into the strict JSON schema.\n\
         Return ONLY valid JSON with no markdown fences.\n\
         Query: {query}"
    )
}

#[async_trait]
impl QueryRewriter for OpenAiRewriter {
    async fn rewrite(&self, query: &str) -> Result<Rewritten, RewriteError> {
        let user = user_message(query);
        let body = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &self.prompt,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: self.temperature,
            max_tokens: MAX_TOKENS,
        };
        let body = serde_json::to_value(&body).map_err(|e| RewriteError::Service(e.to_string()))?;

        let req = OutboundRequest::post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body);
        let resp = self
            .client
            .execute(&req)
            .await
            .map_err(|e| RewriteError::Service(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(RewriteError::Service(format!("upstream error: {}", status.as_u16())));
        }
        if status.is_client_error() {
            // 4xx here is quota/auth/request shape, reported as a service failure
            return Err(RewriteError::Service(format!("request failed: {}", status.as_u16())));
        }

        let parsed: Resp = resp
            .json()
            .await
            .map_err(|e| RewriteError::Service(format!("unexpected response structure: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RewriteError::Service("response has no message content".into()))?;

        tracing::debug!(model = %self.model, chars = content.len(), "rewrite received");
        parse_template(&content)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
