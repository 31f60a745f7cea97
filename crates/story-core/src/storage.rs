use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::models::Story;

pub const DEFAULT_OUTPUT_DIR: &str = "books";
pub const STORY_FILE_NAME: &str = "story.json";
const UNTITLED_DIR_NAME: &str = "untitled_story";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to create story directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to remove stale file {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },
    #[error("failed to encode story json: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("story file {path} is not valid json: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Directory-per-story persistence under one output root.
///
/// Layout: `<root>/<sanitized title>/story.json` plus one `part_<N>.json`
/// per part. Saving the same title again overwrites in place and drops
/// per-part files (json, images, narration) of parts the new story lacks.
#[derive(Debug, Clone)]
pub struct StoryStore {
    root: PathBuf,
}

impl Default for StoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_DIR)
    }
}

impl StoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn story_dir(&self, title: &str) -> PathBuf {
        self.root.join(sanitize_dir_name(title))
    }

    pub async fn save(&self, story: &Story) -> Result<PathBuf, StorageError> {
        let dir = self.story_dir(&story.title);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::CreateDir {
                path: dir.clone(),
                source,
            })?;

        for part in &story.parts {
            let path = dir.join(part_file_name(part.part_number));
            write_json(&path, part).await?;
        }
        write_json(&dir.join(STORY_FILE_NAME), story).await?;

        self.remove_stale_artifacts(&dir, story).await?;

        info!(
            title = %story.title,
            parts = story.parts.len(),
            dir = %dir.display(),
            "story saved"
        );
        Ok(dir)
    }

    pub async fn load(&self, title: &str) -> Result<Story, StorageError> {
        let path = self.story_dir(title).join(STORY_FILE_NAME);
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|source| StorageError::Read {
                path: path.clone(),
                source,
            })?;
        serde_json::from_slice(&raw).map_err(|source| StorageError::Decode { path, source })
    }

    async fn remove_stale_artifacts(&self, dir: &Path, story: &Story) -> Result<(), StorageError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|source| StorageError::Read {
                path: dir.to_path_buf(),
                source,
            })?;

        loop {
            let entry = entries
                .next_entry()
                .await
                .map_err(|source| StorageError::Read {
                    path: dir.to_path_buf(),
                    source,
                })?;
            let Some(entry) = entry else {
                break;
            };

            let file_name = entry.file_name();
            let Some(part_number) = file_name.to_str().and_then(artifact_part_number) else {
                continue;
            };
            if story.parts.iter().any(|part| part.part_number == part_number) {
                continue;
            }

            let path = entry.path();
            debug!(path = %path.display(), "removing stale part artifact");
            tokio::fs::remove_file(&path)
                .await
                .map_err(|source| StorageError::Remove { path, source })?;
        }

        Ok(())
    }
}

pub fn part_file_name(part_number: u32) -> String {
    format!("part_{part_number}.json")
}

const PART_ARTIFACTS: [(&str, &str); 5] = [
    ("part_", ".json"),
    ("image_", ".png"),
    ("image_", ".jpg"),
    ("image_", ".jpeg"),
    ("voice_", ".wav"),
];

/// Part number of a per-part file written by the store or a renderer.
fn artifact_part_number(name: &str) -> Option<u32> {
    PART_ARTIFACTS.iter().find_map(|(prefix, suffix)| {
        name.strip_prefix(prefix)?.strip_suffix(suffix)?.parse().ok()
    })
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let encoded = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, encoded)
        .await
        .map_err(|source| StorageError::Write {
            path: path.to_path_buf(),
            source,
        })
}

/// Title to a single safe path component.
pub fn sanitize_dir_name(title: &str) -> String {
    let sanitized = title
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>();
    let sanitized = sanitized.trim_matches(|c: char| c == '.' || c.is_whitespace());

    if sanitized.is_empty() {
        UNTITLED_DIR_NAME.to_string()
    } else {
        sanitized.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::{artifact_part_number, sanitize_dir_name};

    #[test]
    fn sanitizes_titles_into_one_path_component() {
        assert_eq!(sanitize_dir_name("小熊的冒险"), "小熊的冒险");
        assert_eq!(sanitize_dir_name("a/b\\c: d?"), "a_b_c_ d_");
        assert_eq!(sanitize_dir_name(".."), "untitled_story");
        assert_eq!(sanitize_dir_name("   "), "untitled_story");
    }

    #[test]
    fn recognises_per_part_artifacts() {
        assert_eq!(artifact_part_number("part_3.json"), Some(3));
        assert_eq!(artifact_part_number("image_1.png"), Some(1));
        assert_eq!(artifact_part_number("image_2.jpeg"), Some(2));
        assert_eq!(artifact_part_number("voice_4.wav"), Some(4));
        assert_eq!(artifact_part_number("story.json"), None);
        assert_eq!(artifact_part_number("part_x.json"), None);
        assert_eq!(artifact_part_number("part1.png"), None);
        assert_eq!(artifact_part_number("小熊.html"), None);
    }
}
