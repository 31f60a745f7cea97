use std::path::Path;

use story_core::config::{
    ConfigError, GenerationPolicy, ImageBackendConfig, LlmConfig, SpeechBackendConfig,
};
use story_core::generation::{GenerationOutcome, StoryGenerator};
use story_core::llm::OpenAiCompatibleGateway;
use story_core::render::{
    AudioRenderer, AzureSpeechBackend, DocumentRenderer, HttpImageBackend, ImageRenderer,
    RenderError, RenderReport,
};
use story_core::storage::{DEFAULT_OUTPUT_DIR, StorageError, StoryStore};
use story_core::story_config::{StoryConfigError, load_story_file};
use story_core::{Story, build_prompt};
use thiserror::Error;
use tracing::{info, warn};

use crate::cli::CliOptions;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    StoryConfig(#[from] StoryConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PipelineError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::StoryConfig(_) => 2,
            Self::Storage(_) => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageStatus {
    Ok(String),
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Generated,
    Refused,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct PipelineSummary {
    title: String,
    generation: GenerationStatus,
    stages: Vec<(&'static str, StageStatus)>,
}

impl PipelineSummary {
    fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            generation: GenerationStatus::Exhausted,
            stages: Vec::new(),
        }
    }

    fn record(&mut self, stage: &'static str, status: StageStatus) {
        self.stages.push((stage, status));
    }

    pub fn exit_code(&self) -> i32 {
        match self.generation {
            GenerationStatus::Refused => 3,
            GenerationStatus::Exhausted => 4,
            GenerationStatus::Generated if self.has_failures() => 1,
            GenerationStatus::Generated => 0,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.stages
            .iter()
            .any(|(_, status)| matches!(status, StageStatus::Failed(_)))
    }

    pub fn print(&self) {
        println!("Storybook: {}", self.title);

        let (mut ok, mut failed, mut skipped) = (0usize, 0usize, 0usize);
        for (stage, status) in &self.stages {
            match status {
                StageStatus::Ok(detail) => {
                    ok += 1;
                    println!("[OK] {stage}: {detail}");
                }
                StageStatus::Failed(detail) => {
                    failed += 1;
                    println!("[FAIL] {stage}: {detail}");
                }
                StageStatus::Skipped(detail) => {
                    skipped += 1;
                    println!("[SKIP] {stage}: {detail}");
                }
            }
        }

        println!("Summary: {ok} ok, {failed} failed, {skipped} skipped");
    }
}

/// Backend settings read once, before any model call.
struct RunConfig {
    llm: LlmConfig,
    policy: GenerationPolicy,
    image: Option<ImageBackendConfig>,
    speech: Option<SpeechBackendConfig>,
}

impl RunConfig {
    fn from_env(options: &CliOptions) -> Result<Self, ConfigError> {
        let mut policy = GenerationPolicy::from_env()?;
        if let Some(max_attempts) = options.max_attempts {
            policy = policy.with_max_attempts(max_attempts)?;
        }

        Ok(Self {
            llm: LlmConfig::from_env()?,
            policy,
            image: if options.skip_images {
                None
            } else {
                ImageBackendConfig::from_env()?
            },
            speech: if options.skip_audio {
                None
            } else {
                SpeechBackendConfig::from_env()?
            },
        })
    }
}

pub async fn run_pipeline(options: &CliOptions) -> Result<PipelineSummary, PipelineError> {
    let story_file = load_story_file(&options.config_path)?;
    let mut summary = PipelineSummary::new(&story_file.story.title);
    summary.record(
        "config",
        StageStatus::Ok(format!("loaded {}", options.config_path.display())),
    );

    let prompt = build_prompt(&story_file.story)?;
    if options.print_prompt {
        println!("{prompt}\n");
    }
    summary.record(
        "prompt",
        StageStatus::Ok(format!("{} characters", prompt.chars().count())),
    );

    let run_config = RunConfig::from_env(options)?;
    info!(
        provider = run_config.llm.provider.as_str(),
        generation_model = %run_config.llm.generation_model,
        safety_model = %run_config.llm.safety_model,
        max_attempts = run_config.policy.max_attempts,
        "starting story generation"
    );

    let gateway = OpenAiCompatibleGateway::new(run_config.llm)?;
    let store = StoryStore::new(
        options
            .output_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.into()),
    );
    let outcome = StoryGenerator::new(&gateway, &store, run_config.policy)
        .generate(&prompt)
        .await?;

    let (story, story_dir) = match outcome {
        GenerationOutcome::Generated {
            story,
            story_dir,
            report,
            ..
        } => {
            summary.generation = GenerationStatus::Generated;
            summary.record(
                "generation",
                StageStatus::Ok(format!(
                    "\"{}\" with {} parts after {} attempt(s), saved to {}",
                    story.title,
                    story.parts.len(),
                    report.attempts,
                    story_dir.display()
                )),
            );
            (story, story_dir)
        }
        GenerationOutcome::PromptRejected { reason } => {
            summary.generation = GenerationStatus::Refused;
            summary.record(
                "generation",
                StageStatus::Failed(format!("prompt refused by content policy: {reason}")),
            );
            skip_renderers(&mut summary);
            return Ok(summary);
        }
        GenerationOutcome::Exhausted { report } => {
            summary.generation = GenerationStatus::Exhausted;
            let last_reason = report
                .discarded
                .last()
                .map(|discarded| discarded.failure.to_string())
                .unwrap_or_else(|| "no attempts made".to_string());
            summary.record(
                "generation",
                StageStatus::Failed(format!(
                    "no safe story after {} attempt(s), last: {last_reason}",
                    report.attempts
                )),
            );
            skip_renderers(&mut summary);
            return Ok(summary);
        }
    };

    let images = if options.skip_images {
        StageStatus::Skipped("disabled by --skip-images".to_string())
    } else {
        match run_config.image {
            Some(config) => match HttpImageBackend::new(config) {
                Ok(backend) => {
                    stage_status(ImageRenderer::new(&backend).render(&story, &story_dir).await)
                }
                Err(err) => StageStatus::Failed(err.to_string()),
            },
            None => StageStatus::Skipped("STORYBOOK_IMAGE_API_KEY not set".to_string()),
        }
    };
    summary.record("images", images);

    let audio = if options.skip_audio {
        StageStatus::Skipped("disabled by --skip-audio".to_string())
    } else {
        match run_config.speech {
            Some(config) => match AzureSpeechBackend::new(config) {
                Ok(backend) => stage_status(
                    AudioRenderer::new(&backend, &story_file.voices)
                        .render(&story, &story_dir)
                        .await,
                ),
                Err(err) => StageStatus::Failed(err.to_string()),
            },
            None => StageStatus::Skipped("STORYBOOK_SPEECH_KEY not set".to_string()),
        }
    };
    summary.record("audio", audio);

    let document = if options.skip_document {
        StageStatus::Skipped("disabled by --skip-document".to_string())
    } else {
        document_status(&story, &story_dir).await
    };
    summary.record("document", document);

    Ok(summary)
}

fn skip_renderers(summary: &mut PipelineSummary) {
    for stage in ["images", "audio", "document"] {
        summary.record(stage, StageStatus::Skipped("no story generated".to_string()));
    }
}

async fn document_status(story: &Story, story_dir: &Path) -> StageStatus {
    match DocumentRenderer::new().render(story, story_dir).await {
        Ok(report) => match report.produced.first() {
            Some(path) if report.skipped.is_empty() => {
                StageStatus::Ok(format!("saved {}", path.display()))
            }
            Some(path) => StageStatus::Ok(format!(
                "saved {} ({} page(s) without image)",
                path.display(),
                report.skipped.len()
            )),
            None => StageStatus::Failed("no document produced".to_string()),
        },
        Err(err) => {
            warn!("document rendering failed: {err}");
            StageStatus::Failed(err.to_string())
        }
    }
}

fn stage_status(result: Result<RenderReport, RenderError>) -> StageStatus {
    match result {
        Ok(report) if report.is_success() => StageStatus::Ok(format!(
            "{} file(s) written, {} part(s) skipped",
            report.produced.len(),
            report.skipped.len()
        )),
        Ok(report) => {
            let parts = report
                .failed
                .iter()
                .map(|failure| failure.part_number.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            StageStatus::Failed(format!(
                "{} file(s) written, failed parts: {parts}",
                report.produced.len()
            ))
        }
        Err(err) => {
            warn!("renderer could not start: {err}");
            StageStatus::Failed(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use story_core::render::{PartFailure, RenderReport};

    use super::{GenerationStatus, PipelineSummary, StageStatus, stage_status};

    #[test]
    fn exit_codes_follow_generation_and_renderer_results() {
        let mut summary = PipelineSummary::new("t");
        summary.generation = GenerationStatus::Generated;
        summary.record("images", StageStatus::Ok("1 file(s)".to_string()));
        assert_eq!(summary.exit_code(), 0);

        summary.record("audio", StageStatus::Failed("part 1".to_string()));
        assert_eq!(summary.exit_code(), 1);

        summary.generation = GenerationStatus::Refused;
        assert_eq!(summary.exit_code(), 3);
        summary.generation = GenerationStatus::Exhausted;
        assert_eq!(summary.exit_code(), 4);
    }

    #[test]
    fn partial_renderer_failure_is_a_failed_stage() {
        let report = RenderReport {
            produced: vec![PathBuf::from("image_2.png")],
            skipped: Vec::new(),
            failed: vec![PartFailure {
                part_number: 1,
                reason: "status=500".to_string(),
            }],
        };
        assert_eq!(
            stage_status(Ok(report)),
            StageStatus::Failed("1 file(s) written, failed parts: 1".to_string())
        );
        assert!(matches!(
            stage_status(Ok(RenderReport::default())),
            StageStatus::Ok(_)
        ));
    }
}
