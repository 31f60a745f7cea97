use std::fmt;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::GenerationPolicy;
use crate::extract::{ExtractionSource, extract};
use crate::llm::prompts::retry_feedback;
use crate::llm::{GENERATION_SYSTEM_PROMPT, LlmGateway, LlmGatewayRequest, ModelPurpose, story_tool};
use crate::models::Story;
use crate::safety::SafetyGate;
use crate::storage::{StorageError, StoryStore};

/// Why a single generation attempt was discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The model call itself failed.
    Transport(String),
    /// Neither the tool call nor the text fallback produced a story.
    Unparseable,
    /// A story was extracted but the content check rejected it.
    UnsafeOutput { reason: String },
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(message) => write!(f, "model call failed: {message}"),
            Self::Unparseable => f.write_str("response did not contain a parseable story"),
            Self::UnsafeOutput { reason } => write!(f, "story rejected by content check: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscardedAttempt {
    pub attempt: u32,
    pub failure: AttemptFailure,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationReport {
    /// Generation calls issued, discarded or not.
    pub attempts: u32,
    pub discarded: Vec<DiscardedAttempt>,
}

#[derive(Debug)]
pub enum GenerationOutcome {
    /// First safe story, already persisted under `story_dir`.
    Generated {
        story: Story,
        story_dir: PathBuf,
        source: ExtractionSource,
        report: GenerationReport,
    },
    /// The prompt failed the intent check; no generation call was made.
    PromptRejected { reason: String },
    /// Every attempt was discarded.
    Exhausted { report: GenerationReport },
}

impl GenerationOutcome {
    pub fn story(&self) -> Option<&Story> {
        match self {
            Self::Generated { story, .. } => Some(story),
            Self::PromptRejected { .. } | Self::Exhausted { .. } => None,
        }
    }

    pub fn into_story(self) -> Option<Story> {
        match self {
            Self::Generated { story, .. } => Some(story),
            Self::PromptRejected { .. } | Self::Exhausted { .. } => None,
        }
    }
}

/// Bounded generate-then-validate loop.
pub struct StoryGenerator<'a> {
    gateway: &'a dyn LlmGateway,
    store: &'a StoryStore,
    policy: GenerationPolicy,
}

impl<'a> StoryGenerator<'a> {
    pub fn new(gateway: &'a dyn LlmGateway, store: &'a StoryStore, policy: GenerationPolicy) -> Self {
        Self {
            gateway,
            store,
            policy,
        }
    }

    pub fn policy(&self) -> GenerationPolicy {
        self.policy
    }

    /// Only a storage failure on the winning story is an error; every other
    /// failure is folded into the outcome.
    pub async fn generate(&self, prompt: &str) -> Result<GenerationOutcome, StorageError> {
        let gate = SafetyGate::new(self.gateway);

        let verdict = gate.check_prompt(prompt).await;
        if !verdict.is_safe {
            warn!(reason = %verdict.reason, "prompt refused, no generation attempted");
            return Ok(GenerationOutcome::PromptRejected {
                reason: verdict.reason,
            });
        }

        let mut report = GenerationReport::default();
        let mut feedback: Option<String> = None;

        for attempt in 1..=self.policy.max_attempts {
            report.attempts = attempt;
            let user_prompt = match feedback.as_deref() {
                Some(feedback) => format!("{prompt}{feedback}"),
                None => prompt.to_string(),
            };

            match self.attempt(&gate, &user_prompt).await {
                Ok((story, source)) => {
                    let story_dir = self.store.save(&story).await?;
                    info!(
                        attempt = attempt,
                        title = %story.title,
                        parts = story.parts.len(),
                        "story generated"
                    );
                    return Ok(GenerationOutcome::Generated {
                        story,
                        story_dir,
                        source,
                        report,
                    });
                }
                Err(failure) => {
                    warn!(
                        attempt = attempt,
                        max_attempts = self.policy.max_attempts,
                        "generation attempt discarded: {failure}"
                    );
                    if self.policy.retry_feedback {
                        if let AttemptFailure::UnsafeOutput { reason } = &failure {
                            feedback = Some(retry_feedback(reason));
                        }
                    }
                    report.discarded.push(DiscardedAttempt { attempt, failure });
                }
            }
        }

        warn!(
            attempts = report.attempts,
            "generation exhausted without a safe story"
        );
        Ok(GenerationOutcome::Exhausted { report })
    }

    async fn attempt(
        &self,
        gate: &SafetyGate<'_>,
        user_prompt: &str,
    ) -> Result<(Story, ExtractionSource), AttemptFailure> {
        let request =
            LlmGatewayRequest::new(ModelPurpose::Generation, GENERATION_SYSTEM_PROMPT, user_prompt)
                .with_tool(story_tool());

        let response = self
            .gateway
            .complete(request)
            .await
            .map_err(|err| AttemptFailure::Transport(err.to_string()))?;

        let extraction = extract(&response.message).ok_or(AttemptFailure::Unparseable)?;

        let verdict = gate.check_content(&extraction.story).await;
        if !verdict.is_safe {
            return Err(AttemptFailure::UnsafeOutput {
                reason: verdict.reason,
            });
        }

        Ok((extraction.story, extraction.source))
    }
}
