pub mod config;
mod config_env;
pub mod extract;
pub mod generation;
pub mod llm;
pub mod models;
pub mod prompt_builder;
pub mod render;
pub mod safety;
pub mod storage;
pub mod story_config;

pub use config::{
    ConfigError, GenerationPolicy, ImageBackendConfig, LlmConfig, LlmProvider, SpeechBackendConfig,
};
pub use extract::{Extraction, ExtractionSource, extract};
pub use generation::{
    AttemptFailure, DiscardedAttempt, GenerationOutcome, GenerationReport, StoryGenerator,
};
pub use models::{SafetyVerdict, Story, StoryPart};
pub use prompt_builder::build_prompt;
pub use safety::SafetyGate;
pub use storage::{StorageError, StoryStore};
pub use story_config::{StoryConfig, StoryConfigError, StoryFile, load_story_file};
