use serde::{Deserialize, Serialize};

pub const DEFAULT_IMAGE_WIDTH: u32 = 512;
pub const DEFAULT_IMAGE_HEIGHT: u32 = 512;
pub const UNTITLED_STORY: &str = "未命名故事";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryPart {
    pub part_number: u32,
    pub content: String,
    #[serde(default)]
    pub image_prompt: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

impl StoryPart {
    pub fn new(part_number: u32, content: impl Into<String>, image_prompt: impl Into<String>) -> Self {
        Self {
            part_number,
            content: content.into(),
            image_prompt: image_prompt.into(),
            width: DEFAULT_IMAGE_WIDTH,
            height: DEFAULT_IMAGE_HEIGHT,
        }
    }

    pub fn has_image_prompt(&self) -> bool {
        !self.image_prompt.trim().is_empty()
    }
}

/// A finalized story. Parts are kept in ascending `part_number` order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub title: String,
    pub parts: Vec<StoryPart>,
}

impl Story {
    pub fn new(title: impl Into<String>, mut parts: Vec<StoryPart>) -> Self {
        parts.sort_by_key(|part| part.part_number);
        Self {
            title: title.into(),
            parts,
        }
    }

    /// Title followed by every part's content, one per line.
    pub fn full_text(&self) -> String {
        let mut text = String::with_capacity(
            self.title.len() + self.parts.iter().map(|p| p.content.len() + 1).sum::<usize>() + 1,
        );
        text.push_str(&self.title);
        text.push('\n');
        for part in &self.parts {
            text.push_str(&part.content);
            text.push('\n');
        }
        text
    }

    /// Part numbers that are missing from an otherwise 1..=max sequence.
    pub fn part_number_gaps(&self) -> Vec<u32> {
        let Some(max) = self.parts.iter().map(|part| part.part_number).max() else {
            return Vec::new();
        };
        (1..=max)
            .filter(|number| !self.parts.iter().any(|part| part.part_number == *number))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyVerdict {
    pub is_safe: bool,
    pub reason: String,
}

impl SafetyVerdict {
    pub fn unsafe_because(reason: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            reason: reason.into(),
        }
    }
}

fn default_width() -> u32 {
    DEFAULT_IMAGE_WIDTH
}

fn default_height() -> u32 {
    DEFAULT_IMAGE_HEIGHT
}
