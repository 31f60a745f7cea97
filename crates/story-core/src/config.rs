use std::str::FromStr;

use thiserror::Error;

use crate::config_env::{
    optional_trimmed_env, parse_bool_env, parse_u32_env, parse_u64_env, require_http_url,
    require_non_empty_env,
};

const DEFAULT_LLM_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_LLM_MAX_RETRIES: u32 = 2;
const DEFAULT_LLM_RETRY_BASE_BACKOFF_MS: u64 = 500;

const DEFAULT_IMAGE_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";
const DEFAULT_IMAGE_TIMEOUT_MS: u64 = 120_000;

const DEFAULT_SPEECH_TIMEOUT_MS: u64 = 60_000;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
    #[error("invalid boolean in env var {0}")]
    ParseBool(String),
    #[error("unsupported llm provider '{0}' (expected deepseek, qwen, openrouter, openai or custom)")]
    UnsupportedProvider(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// OpenAI-compatible chat completion providers the gateway knows how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    DeepSeek,
    Qwen,
    OpenRouter,
    OpenAi,
    Custom,
}

impl LlmProvider {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DeepSeek => "deepseek",
            Self::Qwen => "qwen",
            Self::OpenRouter => "openrouter",
            Self::OpenAi => "openai",
            Self::Custom => "custom",
        }
    }

    pub const fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::DeepSeek => Some("https://api.deepseek.com/v1"),
            Self::Qwen => Some("https://dashscope.aliyuncs.com/compatible-mode/v1"),
            Self::OpenRouter => Some("https://openrouter.ai/api/v1"),
            Self::OpenAi => Some("https://api.openai.com/v1"),
            Self::Custom => None,
        }
    }

    /// (generation model, safety classification model)
    pub const fn default_models(self) -> (&'static str, &'static str) {
        match self {
            Self::DeepSeek => ("deepseek-chat", "deepseek-chat"),
            Self::Qwen => ("qwen-plus", "qwen-turbo"),
            Self::OpenRouter => ("openai/gpt-4o-mini", "openai/gpt-4o-mini"),
            Self::OpenAi | Self::Custom => ("gpt-4o-mini", "gpt-4o-mini"),
        }
    }
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "deepseek" => Ok(Self::DeepSeek),
            "qwen" | "dashscope" => Ok(Self::Qwen),
            "openrouter" => Ok(Self::OpenRouter),
            "openai" => Ok(Self::OpenAi),
            "custom" => Ok(Self::Custom),
            other => Err(ConfigError::UnsupportedProvider(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: String,
    pub base_url: String,
    pub generation_model: String,
    pub safety_model: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_backoff_ms: u64,
}

impl LlmConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider = match optional_trimmed_env("STORYBOOK_LLM_PROVIDER") {
            Some(raw) => raw.parse::<LlmProvider>()?,
            None => LlmProvider::DeepSeek,
        };
        let api_key = require_non_empty_env("STORYBOOK_LLM_API_KEY")?;

        let base_url = match optional_trimmed_env("STORYBOOK_LLM_BASE_URL") {
            Some(url) => url,
            None => provider
                .default_base_url()
                .map(ToString::to_string)
                .ok_or_else(|| ConfigError::MissingVar("STORYBOOK_LLM_BASE_URL".to_string()))?,
        };
        let base_url = require_http_url("STORYBOOK_LLM_BASE_URL", base_url)?;

        let (default_generation_model, default_safety_model) = provider.default_models();

        Ok(Self {
            provider,
            api_key,
            base_url,
            generation_model: optional_trimmed_env("STORYBOOK_GENERATION_MODEL")
                .unwrap_or_else(|| default_generation_model.to_string()),
            safety_model: optional_trimmed_env("STORYBOOK_SAFETY_MODEL")
                .unwrap_or_else(|| default_safety_model.to_string()),
            timeout_ms: parse_u64_env("STORYBOOK_LLM_TIMEOUT_MS", DEFAULT_LLM_TIMEOUT_MS)?,
            max_retries: parse_u32_env("STORYBOOK_LLM_MAX_RETRIES", DEFAULT_LLM_MAX_RETRIES)?,
            retry_base_backoff_ms: parse_u64_env(
                "STORYBOOK_LLM_RETRY_BASE_BACKOFF_MS",
                DEFAULT_LLM_RETRY_BASE_BACKOFF_MS,
            )?,
        })
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Debug, Clone)]
pub struct ImageBackendConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
}

impl ImageBackendConfig {
    /// `Ok(None)` when no image key is configured; the image stage is then skipped.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(api_key) = optional_trimmed_env("STORYBOOK_IMAGE_API_KEY") else {
            return Ok(None);
        };
        let base_url = optional_trimmed_env("STORYBOOK_IMAGE_BASE_URL")
            .unwrap_or_else(|| DEFAULT_IMAGE_BASE_URL.to_string());

        Ok(Some(Self {
            api_key,
            base_url: require_http_url("STORYBOOK_IMAGE_BASE_URL", base_url)?,
            model: optional_trimmed_env("STORYBOOK_IMAGE_MODEL")
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            timeout_ms: parse_u64_env("STORYBOOK_IMAGE_TIMEOUT_MS", DEFAULT_IMAGE_TIMEOUT_MS)?,
        }))
    }

    pub fn generations_url(&self) -> String {
        format!("{}/images/generations", self.base_url)
    }
}

#[derive(Debug, Clone)]
pub struct SpeechBackendConfig {
    pub subscription_key: String,
    pub endpoint: String,
    pub timeout_ms: u64,
}

impl SpeechBackendConfig {
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(subscription_key) = optional_trimmed_env("STORYBOOK_SPEECH_KEY") else {
            return Ok(None);
        };
        let endpoint = match optional_trimmed_env("STORYBOOK_SPEECH_ENDPOINT") {
            Some(endpoint) => require_http_url("STORYBOOK_SPEECH_ENDPOINT", endpoint)?,
            None => {
                let region = require_non_empty_env("STORYBOOK_SPEECH_REGION")?;
                format!("https://{region}.tts.speech.microsoft.com/cognitiveservices/v1")
            }
        };

        Ok(Some(Self {
            subscription_key,
            endpoint,
            timeout_ms: parse_u64_env("STORYBOOK_SPEECH_TIMEOUT_MS", DEFAULT_SPEECH_TIMEOUT_MS)?,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationPolicy {
    pub max_attempts: u32,
    /// Carry the previous rejection reason into the next attempt's prompt.
    pub retry_feedback: bool,
}

impl Default for GenerationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_feedback: true,
        }
    }
}

impl GenerationPolicy {
    pub fn from_env() -> Result<Self, ConfigError> {
        let policy = Self {
            max_attempts: parse_u32_env("STORYBOOK_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            retry_feedback: parse_bool_env("STORYBOOK_RETRY_FEEDBACK", true)?,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Result<Self, ConfigError> {
        self.max_attempts = max_attempts;
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "max attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{GenerationPolicy, LlmProvider};

    #[test]
    fn provider_parsing_is_case_insensitive_and_rejects_unknown_keys() {
        assert_eq!(
            " DeepSeek ".parse::<LlmProvider>().expect("known provider"),
            LlmProvider::DeepSeek
        );
        assert_eq!(
            "dashscope".parse::<LlmProvider>().expect("alias"),
            LlmProvider::Qwen
        );
        assert!("mystery".parse::<LlmProvider>().is_err());
        assert!(LlmProvider::Custom.default_base_url().is_none());
    }

    #[test]
    fn generation_policy_rejects_zero_attempts() {
        assert!(GenerationPolicy::default().with_max_attempts(0).is_err());
        assert_eq!(
            GenerationPolicy::default()
                .with_max_attempts(5)
                .expect("five attempts is valid")
                .max_attempts,
            5
        );
    }
}
