use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::voices::{Voice, VoicePlan};
use super::{RenderError, RenderReport, ensure_dir, is_retryable_status, remove_artifact};
use crate::config::{ConfigError, SpeechBackendConfig};
use crate::models::Story;

pub const MAX_SPEECH_CHARS: usize = 1000;
pub const DEFAULT_SPEECH_TRIES: u32 = 3;
pub const DEFAULT_SPEECH_RETRY_BACKOFF: Duration = Duration::from_secs(2);

const OUTPUT_FORMAT: &str = "riff-24khz-16bit-mono-pcm";

pub type SpeechBackendFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<u8>, SpeechBackendError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum SpeechBackendError {
    #[error("speech text is empty")]
    EmptyText,
    #[error("speech text has {chars} characters, limit is {max}")]
    TextTooLong { chars: usize, max: usize },
    #[error("speech request timed out")]
    Timeout,
    #[error("speech provider request failed: {message}")]
    ProviderFailure { message: String, retryable: bool },
    #[error("speech provider returned an invalid payload: {0}")]
    InvalidPayload(String),
}

impl SpeechBackendError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::ProviderFailure { retryable, .. } => *retryable,
            Self::EmptyText | Self::TextTooLong { .. } | Self::InvalidPayload(_) => false,
        }
    }
}

/// Speaks one text with one voice and returns WAV bytes.
pub trait SpeechBackend: Send + Sync {
    fn synthesize<'a>(&'a self, text: &'a str, voice: &'a Voice) -> SpeechBackendFuture<'a>;
}

/// Azure neural text-to-speech over the REST endpoint.
pub struct AzureSpeechBackend {
    client: reqwest::Client,
    config: SpeechBackendConfig,
}

impl AzureSpeechBackend {
    pub fn new(config: SpeechBackendConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| {
                ConfigError::InvalidConfiguration(format!("failed to build speech http client: {err}"))
            })?;
        Ok(Self { client, config })
    }

    async fn synthesize_text(&self, text: &str, voice: &Voice) -> Result<Vec<u8>, SpeechBackendError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SpeechBackendError::EmptyText);
        }
        let chars = text.chars().count();
        if chars > MAX_SPEECH_CHARS {
            return Err(SpeechBackendError::TextTooLong {
                chars,
                max: MAX_SPEECH_CHARS,
            });
        }

        debug!(voice = voice.id(), chars = chars, "sending speech synthesis request");
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Ocp-Apim-Subscription-Key", &self.config.subscription_key)
            .header(reqwest::header::CONTENT_TYPE, "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .header(reqwest::header::USER_AGENT, "storybook")
            .body(build_ssml(text, voice))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    SpeechBackendError::Timeout
                } else {
                    SpeechBackendError::ProviderFailure {
                        message: format!("request_unavailable: {err}"),
                        retryable: true,
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SpeechBackendError::ProviderFailure {
                message: format!("status={}", status.as_u16()),
                retryable: is_retryable_status(status),
            });
        }

        let audio = response.bytes().await.map_err(|_| {
            SpeechBackendError::InvalidPayload("response_body_read_failed".to_string())
        })?;
        if audio.is_empty() {
            return Err(SpeechBackendError::InvalidPayload("empty_audio".to_string()));
        }
        Ok(audio.to_vec())
    }
}

impl SpeechBackend for AzureSpeechBackend {
    fn synthesize<'a>(&'a self, text: &'a str, voice: &'a Voice) -> SpeechBackendFuture<'a> {
        Box::pin(async move { self.synthesize_text(text, voice).await })
    }
}

pub fn build_ssml(text: &str, voice: &Voice) -> String {
    format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='{locale}'>\
<voice name='{id}'>{text}</voice></speak>",
        locale = voice.locale(),
        id = escape_xml(voice.id()),
        text = escape_xml(text),
    )
}

fn escape_xml(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Truncates to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

pub fn voice_file_name(part_number: u32) -> String {
    format!("voice_{part_number}.wav")
}

/// Narrates each part in order, one request at a time.
pub struct AudioRenderer<'a> {
    backend: &'a dyn SpeechBackend,
    voices: &'a VoicePlan,
    max_tries: u32,
    retry_backoff: Duration,
}

impl<'a> AudioRenderer<'a> {
    pub fn new(backend: &'a dyn SpeechBackend, voices: &'a VoicePlan) -> Self {
        Self {
            backend,
            voices,
            max_tries: DEFAULT_SPEECH_TRIES,
            retry_backoff: DEFAULT_SPEECH_RETRY_BACKOFF,
        }
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub async fn render(&self, story: &Story, dir: &Path) -> Result<RenderReport, RenderError> {
        ensure_dir(dir).await?;
        let mut report = RenderReport::default();

        for part in &story.parts {
            let content = part.content.trim();
            if content.is_empty() {
                warn!(part_number = part.part_number, "empty part content, skipping narration");
                remove_artifact(&dir.join(voice_file_name(part.part_number))).await;
                report.skipped.push(part.part_number);
                continue;
            }
            let text = truncate_chars(content, MAX_SPEECH_CHARS);
            if text.len() < content.len() {
                warn!(
                    part_number = part.part_number,
                    max_chars = MAX_SPEECH_CHARS,
                    "part content truncated for narration"
                );
            }

            let voice = self.voices.voice_for(part.part_number);
            let audio = match self.synthesize_with_retries(part.part_number, text, voice).await {
                Ok(audio) => audio,
                Err(err) => {
                    remove_artifact(&dir.join(voice_file_name(part.part_number))).await;
                    report.fail(part.part_number, err.to_string());
                    continue;
                }
            };

            let path = dir.join(voice_file_name(part.part_number));
            if let Err(err) = tokio::fs::write(&path, &audio).await {
                warn!(part_number = part.part_number, path = %path.display(), "failed to save narration: {err}");
                report.fail(part.part_number, format!("failed to write {}: {err}", path.display()));
                continue;
            }

            info!(
                part_number = part.part_number,
                voice = voice.id(),
                path = %path.display(),
                "narration saved"
            );
            report.produced.push(path);
        }

        Ok(report)
    }

    async fn synthesize_with_retries(
        &self,
        part_number: u32,
        text: &str,
        voice: &Voice,
    ) -> Result<Vec<u8>, SpeechBackendError> {
        let mut attempt = 1_u32;
        loop {
            match self.backend.synthesize(text, voice).await {
                Ok(audio) => return Ok(audio),
                Err(err) if err.is_retryable() && attempt < self.max_tries => {
                    warn!(
                        part_number = part_number,
                        attempt = attempt,
                        "speech synthesis failed, retrying: {err}"
                    );
                    sleep(self.retry_backoff).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(
                        part_number = part_number,
                        attempt = attempt,
                        "speech synthesis failed: {err}"
                    );
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{build_ssml, truncate_chars};
    use crate::render::voices::Voice;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("小熊出发了", 2), "小熊");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn ssml_escapes_text_and_sets_voice_locale() {
        let ssml = build_ssml("Tom & <Jerry>", &Voice::Guy);
        assert!(ssml.contains("xml:lang='en-US'"));
        assert!(ssml.contains("<voice name='en-US-GuyNeural'>"));
        assert!(ssml.contains("Tom &amp; &lt;Jerry&gt;"));
    }
}
