use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{RenderError, RenderReport, ensure_dir, remove_artifact};
use crate::config::{ConfigError, ImageBackendConfig};
use crate::models::Story;

pub type ImageBackendFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<u8>, ImageBackendError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum ImageBackendError {
    #[error("image request timed out")]
    Timeout,
    #[error("image provider request failed: {0}")]
    ProviderFailure(String),
    #[error("image provider returned an invalid payload: {0}")]
    InvalidPayload(String),
}

/// Turns one prompt into encoded image bytes of the requested size.
pub trait ImageBackend: Send + Sync {
    fn generate<'a>(&'a self, prompt: &'a str, width: u32, height: u32) -> ImageBackendFuture<'a>;
}

/// Client for OpenAI-style `/images/generations` endpoints.
pub struct HttpImageBackend {
    client: reqwest::Client,
    config: ImageBackendConfig,
    generations_url: String,
}

impl HttpImageBackend {
    pub fn new(config: ImageBackendConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| {
                ConfigError::InvalidConfiguration(format!("failed to build image http client: {err}"))
            })?;

        Ok(Self {
            client,
            generations_url: config.generations_url(),
            config,
        })
    }

    async fn generate_image(
        &self,
        prompt: &str,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, ImageBackendError> {
        let body = json!({
            "model": self.config.model,
            "prompt": prompt,
            "n": 1,
            "size": format!("{width}x{height}"),
            "response_format": "b64_json",
        });

        let response = self
            .client
            .post(&self.generations_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(|_| {
            ImageBackendError::InvalidPayload("response_body_read_failed".to_string())
        })?;
        if !status.is_success() {
            return Err(ImageBackendError::ProviderFailure(format!(
                "status={}",
                status.as_u16()
            )));
        }

        let parsed: ImageGenerationResponse = serde_json::from_str(&body).map_err(|_| {
            ImageBackendError::InvalidPayload("response_json_parse_failed".to_string())
        })?;
        let image = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ImageBackendError::InvalidPayload("missing_image".to_string()))?;

        if let Some(encoded) = image.b64_json {
            return BASE64_STANDARD
                .decode(encoded.trim())
                .map_err(|_| ImageBackendError::InvalidPayload("invalid_base64".to_string()));
        }

        let url = image
            .url
            .ok_or_else(|| ImageBackendError::InvalidPayload("missing_image_data".to_string()))?;
        debug!("downloading generated image by url");
        self.download(&url).await
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ImageBackendError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ImageBackendError::ProviderFailure(format!(
                "download status={}",
                status.as_u16()
            )));
        }
        let bytes = response.bytes().await.map_err(|_| {
            ImageBackendError::InvalidPayload("image_download_read_failed".to_string())
        })?;
        Ok(bytes.to_vec())
    }
}

impl ImageBackend for HttpImageBackend {
    fn generate<'a>(&'a self, prompt: &'a str, width: u32, height: u32) -> ImageBackendFuture<'a> {
        Box::pin(async move { self.generate_image(prompt, width, height).await })
    }
}

#[derive(Debug, Deserialize)]
struct ImageGenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    b64_json: Option<String>,
    url: Option<String>,
}

fn map_transport_error(err: reqwest::Error) -> ImageBackendError {
    if err.is_timeout() {
        ImageBackendError::Timeout
    } else {
        ImageBackendError::ProviderFailure(format!("request_unavailable: {err}"))
    }
}

pub(crate) const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

pub fn image_file_name(part_number: u32) -> String {
    format!("image_{part_number}.png")
}

/// Every file name the document renderer would accept as a generated image for a part.
pub fn generated_image_file_names(part_number: u32) -> impl Iterator<Item = String> {
    IMAGE_EXTENSIONS
        .iter()
        .map(move |extension| format!("image_{part_number}.{extension}"))
}

async fn discard_previous_images(dir: &Path, part_number: u32) {
    for name in generated_image_file_names(part_number) {
        remove_artifact(&dir.join(name)).await;
    }
}

/// One image per part with a non-empty image prompt.
pub struct ImageRenderer<'a> {
    backend: &'a dyn ImageBackend,
}

impl<'a> ImageRenderer<'a> {
    pub fn new(backend: &'a dyn ImageBackend) -> Self {
        Self { backend }
    }

    pub async fn render(&self, story: &Story, dir: &Path) -> Result<RenderReport, RenderError> {
        ensure_dir(dir).await?;
        let mut report = RenderReport::default();

        for part in &story.parts {
            if !part.has_image_prompt() {
                warn!(part_number = part.part_number, "empty image prompt, skipping image");
                discard_previous_images(dir, part.part_number).await;
                report.skipped.push(part.part_number);
                continue;
            }

            let bytes = match self
                .backend
                .generate(part.image_prompt.trim(), part.width, part.height)
                .await
            {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(part_number = part.part_number, "image generation failed: {err}");
                    discard_previous_images(dir, part.part_number).await;
                    report.fail(part.part_number, err.to_string());
                    continue;
                }
            };

            let path: PathBuf = dir.join(image_file_name(part.part_number));
            if let Err(err) = tokio::fs::write(&path, &bytes).await {
                warn!(part_number = part.part_number, path = %path.display(), "failed to save image: {err}");
                discard_previous_images(dir, part.part_number).await;
                report.fail(part.part_number, format!("failed to write {}: {err}", path.display()));
                continue;
            }

            info!(part_number = part.part_number, path = %path.display(), "image saved");
            report.produced.push(path);
        }

        Ok(report)
    }
}
