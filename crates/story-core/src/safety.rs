use serde_json::Value;
use tracing::{info, warn};

use crate::llm::{LlmGateway, LlmGatewayRequest, ModelPurpose, SafetyPolicy};
use crate::models::{SafetyVerdict, Story};

const MISSING_REASON: &str = "no reason provided";

/// Binary safe/unsafe classification through the safety model.
///
/// Fails closed: transport errors and unparseable classifier output are
/// reported as unsafe with the error description as the reason.
pub struct SafetyGate<'a> {
    gateway: &'a dyn LlmGateway,
}

impl<'a> SafetyGate<'a> {
    pub fn new(gateway: &'a dyn LlmGateway) -> Self {
        Self { gateway }
    }

    pub async fn check_prompt(&self, prompt: &str) -> SafetyVerdict {
        let verdict = self.classify(prompt, SafetyPolicy::PromptIntent).await;
        log_verdict(SafetyPolicy::PromptIntent, &verdict);
        verdict
    }

    pub async fn check_content(&self, story: &Story) -> SafetyVerdict {
        let verdict = self
            .classify(&story.full_text(), SafetyPolicy::StoryContent)
            .await;
        log_verdict(SafetyPolicy::StoryContent, &verdict);
        verdict
    }

    pub async fn classify(&self, text: &str, policy: SafetyPolicy) -> SafetyVerdict {
        let request =
            LlmGatewayRequest::new(ModelPurpose::SafetyCheck, policy.system_prompt(), text)
                .with_json_response();

        match self.gateway.complete(request).await {
            Ok(response) => match response.message.non_empty_content() {
                Some(content) => parse_verdict(content),
                None => SafetyVerdict::unsafe_because(
                    "safety classifier returned no text content",
                ),
            },
            Err(err) => SafetyVerdict::unsafe_because(format!("safety check failed: {err}")),
        }
    }
}

/// Parses `{"is_safe": bool, "reason": string}`. Anything else is unsafe.
pub fn parse_verdict(raw: &str) -> SafetyVerdict {
    let payload = match serde_json::from_str::<Value>(strip_code_fence(raw)) {
        Ok(payload) => payload,
        Err(err) => {
            return SafetyVerdict::unsafe_because(format!(
                "safety classifier output is not valid json: {err}"
            ));
        }
    };

    let Some(object) = payload.as_object() else {
        return SafetyVerdict::unsafe_because("safety classifier output is not a json object");
    };

    SafetyVerdict {
        is_safe: object
            .get("is_safe")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        reason: object
            .get("reason")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .unwrap_or_else(|| MISSING_REASON.to_string()),
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn log_verdict(policy: SafetyPolicy, verdict: &SafetyVerdict) {
    if verdict.is_safe {
        info!(policy = policy.as_str(), reason = %verdict.reason, "safety check passed");
    } else {
        warn!(policy = policy.as_str(), reason = %verdict.reason, "safety check failed");
    }
}
