use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::render::voices::VoicePlan;

#[derive(Debug, Error)]
pub enum StoryConfigError {
    #[error("failed to read story config {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("story config {path} is not valid YAML: {source}")]
    ParseYaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unsupported language '{0}' (expected zh, en, fr or yue)")]
    UnsupportedLanguage(String),
    #[error("part_num must be greater than zero")]
    ZeroParts,
    #[error("word_len ({word_length}) must be at least part_num ({part_count})")]
    WordLengthTooShort { word_length: u32, part_count: u32 },
    #[error("title must not be empty")]
    EmptyTitle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Language {
    Zh,
    En,
    Fr,
    Yue,
    Unsupported(String),
}

impl Language {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "zh" => Self::Zh,
            "en" => Self::En,
            "fr" => Self::Fr,
            "yue" | "ca" => Self::Yue,
            _ => Self::Unsupported(raw.trim().to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Zh => "zh",
            Self::En => "en",
            Self::Fr => "fr",
            Self::Yue => "yue",
            Self::Unsupported(raw) => raw,
        }
    }

    /// Name used inside the generation prompt.
    pub fn prompt_name(&self) -> Result<&'static str, StoryConfigError> {
        match self {
            Self::Zh => Ok("中文"),
            Self::En => Ok("英文"),
            Self::Fr => Ok("法语"),
            Self::Yue => Ok("粤语正字"),
            Self::Unsupported(raw) => Err(StoryConfigError::UnsupportedLanguage(raw.clone())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

impl Serialize for Language {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "trait")]
    pub species: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryConfig {
    pub title: String,
    #[serde(default)]
    pub characters: Vec<Character>,
    pub lesson: String,
    pub language: Language,
    #[serde(rename = "trg_age", alias = "target_age")]
    pub target_age: u32,
    #[serde(rename = "part_num", alias = "part_count")]
    pub part_count: u32,
    #[serde(rename = "word_len", alias = "word_length")]
    pub word_length: u32,
    #[serde(
        rename = "good_words",
        alias = "vocabulary",
        default,
        deserialize_with = "deserialize_vocabulary"
    )]
    pub vocabulary: Vec<String>,
}

impl StoryConfig {
    pub fn validate(&self) -> Result<(), StoryConfigError> {
        if self.title.trim().is_empty() {
            return Err(StoryConfigError::EmptyTitle);
        }
        self.language.prompt_name()?;
        if self.part_count == 0 {
            return Err(StoryConfigError::ZeroParts);
        }
        if self.word_length < self.part_count {
            return Err(StoryConfigError::WordLengthTooShort {
                word_length: self.word_length,
                part_count: self.part_count,
            });
        }
        Ok(())
    }

    pub fn words_per_part(&self) -> u32 {
        self.word_length / self.part_count.max(1)
    }
}

#[derive(Debug, Deserialize)]
struct RawStoryFile {
    #[serde(flatten)]
    story: StoryConfig,
    #[serde(default)]
    voices: BTreeMap<String, String>,
}

/// Story settings plus renderer options, validated and resolved at load time.
#[derive(Debug, Clone)]
pub struct StoryFile {
    pub story: StoryConfig,
    pub voices: VoicePlan,
}

impl StoryFile {
    pub fn from_yaml_str(raw: &str, path: &str) -> Result<Self, StoryConfigError> {
        let parsed = serde_yaml::from_str::<RawStoryFile>(raw).map_err(|source| {
            StoryConfigError::ParseYaml {
                path: path.to_string(),
                source,
            }
        })?;
        parsed.story.validate()?;

        Ok(Self {
            story: parsed.story,
            voices: VoicePlan::resolve(&parsed.voices),
        })
    }
}

pub fn load_story_file(path: &Path) -> Result<StoryFile, StoryConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| StoryConfigError::ReadFile {
        path: path.display().to_string(),
        source,
    })?;
    StoryFile::from_yaml_str(&raw, &path.display().to_string())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VocabularyInput {
    List(Vec<String>),
    Joined(String),
}

fn deserialize_vocabulary<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<String>, D::Error> {
    let words = match Option::<VocabularyInput>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(VocabularyInput::List(items)) => items,
        Some(VocabularyInput::Joined(raw)) => raw
            .trim_matches(|c| c == '[' || c == ']')
            .split(['、', ',', '，'])
            .map(|item| item.trim().trim_matches(|c| c == '"' || c == '\''))
            .map(ToString::to_string)
            .collect(),
    };

    Ok(words
        .into_iter()
        .map(|word| word.trim().to_string())
        .filter(|word| !word.is_empty())
        .collect())
}
