use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{debug, warn};

use super::gateway::{
    AssistantMessage, LlmGateway, LlmGatewayError, LlmGatewayFuture, LlmGatewayRequest,
    LlmGatewayResponse, LlmTokenUsage, ModelPurpose, ResponseFormat, ToolInvocation,
};
use crate::config::{ConfigError, LlmConfig};

#[derive(Clone)]
pub struct OpenAiCompatibleGateway {
    client: reqwest::Client,
    config: LlmConfig,
    chat_completions_url: String,
}

impl OpenAiCompatibleGateway {
    pub fn new(config: LlmConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| {
                ConfigError::InvalidConfiguration(format!("failed to build llm http client: {err}"))
            })?;

        Ok(Self {
            client,
            chat_completions_url: config.chat_completions_url(),
            config,
        })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn model_for(&self, purpose: ModelPurpose) -> &str {
        match purpose {
            ModelPurpose::Generation => &self.config.generation_model,
            ModelPurpose::SafetyCheck => &self.config.safety_model,
        }
    }

    async fn complete_with_retries(
        &self,
        request: &LlmGatewayRequest,
    ) -> Result<LlmGatewayResponse, LlmGatewayError> {
        let model = self.model_for(request.purpose);
        let mut attempt = 0_u32;

        loop {
            match self.send_once(model, request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if err.retryable && attempt < self.config.max_retries {
                        let backoff_multiplier = 2_u64.saturating_pow(attempt);
                        let backoff_ms = self
                            .config
                            .retry_base_backoff_ms
                            .saturating_mul(backoff_multiplier);
                        warn!(
                            provider = self.config.provider.as_str(),
                            model = model,
                            attempt = attempt + 1,
                            backoff_ms = backoff_ms,
                            "transient llm provider failure, retrying: {}",
                            err.error
                        );
                        sleep(Duration::from_millis(backoff_ms)).await;
                        attempt = attempt.saturating_add(1);
                        continue;
                    }

                    return Err(err.error);
                }
            }
        }
    }

    async fn send_once(
        &self,
        model: &str,
        request: &LlmGatewayRequest,
    ) -> Result<LlmGatewayResponse, SendAttemptError> {
        let request_body = build_request_body(model, request);
        debug!(
            model = model,
            purpose = request.purpose.as_str(),
            tools = request.tools.len(),
            "sending chat completion request"
        );

        let response = self
            .client
            .post(&self.chat_completions_url)
            .bearer_auth(&self.config.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    SendAttemptError::retryable(LlmGatewayError::Timeout)
                } else {
                    SendAttemptError::retryable(LlmGatewayError::ProviderFailure(format!(
                        "request_unavailable: {err}"
                    )))
                }
            })?;

        let status = response.status();
        let header_request_id = header_request_id(response.headers());
        let body = response.text().await.map_err(|_| {
            SendAttemptError::non_retryable(LlmGatewayError::InvalidProviderPayload(
                "response_body_read_failed".to_string(),
            ))
        })?;

        if !status.is_success() {
            let provider_code = parse_provider_error_code(&body);
            return Err(SendAttemptError {
                error: LlmGatewayError::ProviderFailure(format!(
                    "status={} code={provider_code}",
                    status.as_u16()
                )),
                retryable: is_retryable_status(status),
            });
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body).map_err(|_| {
            SendAttemptError::non_retryable(LlmGatewayError::InvalidProviderPayload(
                "response_json_parse_failed".to_string(),
            ))
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            SendAttemptError::non_retryable(LlmGatewayError::InvalidProviderPayload(
                "missing_choice".to_string(),
            ))
        })?;

        let message = AssistantMessage {
            content: content_to_text(choice.message.content),
            tool_calls: choice
                .message
                .tool_calls
                .into_iter()
                .map(|call| ToolInvocation {
                    name: call.function.name,
                    arguments: arguments_to_text(call.function.arguments),
                })
                .collect(),
        };

        if message.content.is_none() && message.tool_calls.is_empty() {
            return Err(SendAttemptError::non_retryable(
                LlmGatewayError::InvalidProviderPayload("empty_message".to_string()),
            ));
        }

        Ok(LlmGatewayResponse {
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            provider_request_id: header_request_id.or(parsed.id),
            message,
            usage: parsed.usage.map(|usage| LlmTokenUsage {
                prompt_tokens: clamp_u64_to_u32(usage.prompt_tokens.unwrap_or(0)),
                completion_tokens: clamp_u64_to_u32(usage.completion_tokens.unwrap_or(0)),
                total_tokens: clamp_u64_to_u32(usage.total_tokens.unwrap_or(0)),
            }),
        })
    }
}

impl LlmGateway for OpenAiCompatibleGateway {
    fn complete<'a>(&'a self, request: LlmGatewayRequest) -> LlmGatewayFuture<'a> {
        Box::pin(async move { self.complete_with_retries(&request).await })
    }
}

fn build_request_body(model: &str, request: &LlmGatewayRequest) -> Value {
    let mut body = json!({
        "model": model,
        "messages": request.messages,
    });

    if request.response_format == ResponseFormat::JsonObject {
        body["response_format"] = json!({ "type": "json_object" });
    }

    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.iter().map(|tool| tool.to_wire()).collect());
        body["tool_choice"] = json!("auto");
    }

    body
}

#[derive(Debug)]
struct SendAttemptError {
    error: LlmGatewayError,
    retryable: bool,
}

impl SendAttemptError {
    fn retryable(error: LlmGatewayError) -> Self {
        Self {
            error,
            retryable: true,
        }
    }

    fn non_retryable(error: LlmGatewayError) -> Self {
        Self {
            error,
            retryable: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    id: Option<String>,
    model: Option<String>,
    choices: Vec<ChatCompletionChoice>,
    usage: Option<ChatCompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionMessage {
    #[serde(default)]
    content: Value,
    #[serde(default)]
    tool_calls: Vec<ChatCompletionToolCall>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionToolCall {
    function: ChatCompletionFunction,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

fn content_to_text(content: Value) -> Option<String> {
    match content {
        Value::Null => None,
        Value::String(text) => Some(text),
        // Some providers return content parts: [{"type":"text","text":"..."}].
        Value::Array(parts) => {
            let joined = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("");
            (!joined.is_empty()).then_some(joined)
        }
        other => Some(other.to_string()),
    }
}

fn arguments_to_text(arguments: Value) -> String {
    match arguments {
        Value::String(raw) => raw,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn header_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

fn parse_provider_error_code(body: &str) -> String {
    #[derive(Deserialize)]
    struct ProviderErrorEnvelope {
        error: Option<ProviderErrorDetails>,
    }

    #[derive(Deserialize)]
    struct ProviderErrorDetails {
        code: Option<Value>,
    }

    let parsed = serde_json::from_str::<ProviderErrorEnvelope>(body).ok();
    let Some(provider_error_code) = parsed
        .and_then(|envelope| envelope.error)
        .and_then(|details| details.code)
    else {
        return "unknown".to_string();
    };

    match provider_error_code {
        Value::String(code) => code,
        Value::Number(code) => code.to_string(),
        _ => "unknown".to_string(),
    }
}

fn clamp_u64_to_u32(value: u64) -> u32 {
    value.min(u32::MAX as u64) as u32
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_request_body, content_to_text};
    use crate::llm::gateway::{LlmGatewayRequest, ModelPurpose, ToolDefinition};

    #[test]
    fn request_body_includes_tools_and_json_format_only_when_requested() {
        let plain = LlmGatewayRequest::new(ModelPurpose::Generation, "sys", "user");
        let body = build_request_body("m", &plain);
        assert!(body.get("tools").is_none());
        assert!(body.get("response_format").is_none());
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "user");

        let tooled = plain
            .clone()
            .with_tool(ToolDefinition {
                name: "write_fairytale".to_string(),
                description: "d".to_string(),
                parameters: json!({"type": "object"}),
            })
            .with_json_response();
        let body = build_request_body("m", &tooled);
        assert_eq!(body["tools"][0]["function"]["name"], "write_fairytale");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn content_parts_are_joined() {
        assert_eq!(
            content_to_text(json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}])),
            Some("ab".to_string())
        );
        assert_eq!(content_to_text(json!(null)), None);
    }
}
