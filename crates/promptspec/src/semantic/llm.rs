//! [`SemanticOracle`] backed by a chat-completions model.

use tracing::{debug, warn};

use super::{SemanticOracle, TransformFuture, TransformRequest, TransformResponse};
use crate::client::retry::retry_call;
use crate::client::{ChatRequest, Message, OpenRouterClient, ResponseFormat, RetryConfig};
use crate::{DEFAULT_MODEL, json_schema_for};

const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Sends each transform request to a model and expects a JSON reply shaped
/// like [`TransformResponse`].
pub struct LlmOracle {
    client: OpenRouterClient,
    model: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetryConfig,
}

impl LlmOracle {
    pub fn new(client: OpenRouterClient) -> Self {
        Self {
            client,
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            retry: RetryConfig::default(),
        }
    }

    /// Oracle using the key in `OPENROUTER_KEY`.
    pub fn from_env() -> Result<Self, String> {
        Ok(Self::new(OpenRouterClient::from_env()?))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, request: &TransformRequest) -> ChatRequest {
        ChatRequest {
            model: Some(self.model.clone()),
            messages: vec![
                Message::system(system_prompt(request)),
                Message::user(user_prompt(request)),
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: Some(ResponseFormat::json_schema(
                "transform_response",
                json_schema_for::<TransformResponse>(),
            )),
        }
    }
}

impl SemanticOracle for LlmOracle {
    fn transform<'a>(&'a self, request: &'a TransformRequest) -> TransformFuture<'a> {
        Box::pin(async move {
            let body = self.build_request(request);
            let completion = retry_call(&self.retry, || self.client.chat(&body)).await?;
            if completion.finish_reason.as_deref() == Some("length") {
                warn!("{} reply was truncated at {} tokens", request.operation, self.max_tokens);
            }
            let content = completion
                .content
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| format!("empty reply from {} for {}", self.model, request.operation))?;
            let reply = parse_reply(&content);
            debug!(
                "{}: {} -> {} bytes{}",
                request.operation,
                request.target_text.len(),
                reply.text.len(),
                if reply.could_not_satisfy.is_some() {
                    " (not satisfied)"
                } else {
                    ""
                }
            );
            Ok(reply)
        })
    }

    fn name(&self) -> &str {
        &self.model
    }
}

fn system_prompt(request: &TransformRequest) -> String {
    format!(
        "You transform prompt text. Operation: {}.\n{}\n\n\
         Sequences written as @@ are escaped at-signs; keep them exactly as they are.\n\
         Reply with a JSON object {{\"text\": \"...\", \"could_not_satisfy\": \"...\"}}. \
         Put the complete resulting text in \"text\". Include \"could_not_satisfy\" only \
         when the operation cannot be carried out as asked, with a one-sentence reason.",
        request.operation,
        request.operation.contract()
    )
}

fn user_prompt(request: &TransformRequest) -> String {
    let mut out = String::new();
    if !request.parameters.is_empty() {
        let params = serde_json::to_string_pretty(&request.parameters).unwrap_or_default();
        out.push_str(&format!("Parameters:\n{params}\n\n"));
    }
    if let Some(hint) = &request.context_hint {
        out.push_str(&format!("Context: {hint}\n\n"));
    }
    out.push_str("Text:\n<<<\n");
    out.push_str(&request.target_text);
    out.push_str("\n>>>");
    out
}

/// Parse the model's JSON reply, tolerating code fences. A reply that is not
/// JSON is taken as the text itself.
fn parse_reply(content: &str) -> TransformResponse {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);
    serde_json::from_str::<TransformResponse>(unfenced)
        .unwrap_or_else(|_| TransformResponse::text(trimmed))
}
