//! Turns a raw model response into a [`Story`].
//!
//! The structured tool call is preferred. When the model answered in free
//! text instead, the fixed `第N段：/内容：/图片提示词：` grammar requested by
//! the prompt builder is parsed with regular expressions. Extraction does no
//! safety filtering and no retries.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::llm::{AssistantMessage, STORY_TOOL_NAME, StoryToolArguments, validate_tool_arguments_json};
use crate::models::{DEFAULT_IMAGE_HEIGHT, DEFAULT_IMAGE_WIDTH, Story, StoryPart, UNTITLED_STORY};

static PART_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:\*\*)?(?:第\s*(\d+)\s*段|Part\s+(\d+))(?:\*\*)?[ \t]*[：:](?:\*\*)?")
        .unwrap_or_else(|err| unreachable!("part marker pattern is valid: {err}"))
});

static PART_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)^\s*(?:\*\*)?(?:内容|Content)(?:\*\*)?\s*[：:]\s*(?:\*\*)?\s*(.*?)\s*(?:(?:\*\*)?(?:图片提示词|Image\s+prompt)(?:\*\*)?\s*[：:]\s*(?:\*\*)?\s*(.*?))?\s*$",
    )
    .unwrap_or_else(|err| unreachable!("part body pattern is valid: {err}"))
});

static TITLE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:\*\*)?(?:标题|Title)(?:\*\*)?[ \t]*[：:][ \t]*(.+?)[ \t]*$")
        .unwrap_or_else(|err| unreachable!("title pattern is valid: {err}"))
});

/// Which path produced an extracted story.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionSource {
    ToolCall,
    TextFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub story: Story,
    pub source: ExtractionSource,
}

/// Structured path first, then the text fallback. `None` when neither yields parts.
pub fn extract(message: &AssistantMessage) -> Option<Extraction> {
    if let Some(story) = extract_from_tool_calls(message) {
        return Some(Extraction {
            story,
            source: ExtractionSource::ToolCall,
        });
    }

    let text = message.non_empty_content()?;
    parse_fallback_text(text).map(|story| Extraction {
        story,
        source: ExtractionSource::TextFallback,
    })
}

fn extract_from_tool_calls(message: &AssistantMessage) -> Option<Story> {
    let invocation = message
        .tool_calls
        .iter()
        .find(|call| call.name == STORY_TOOL_NAME)?;

    match validate_tool_arguments_json(&invocation.arguments) {
        Ok(arguments) => story_from_tool_arguments(arguments),
        Err(err) => {
            warn!("story tool call rejected: {err}");
            None
        }
    }
}

/// Normalizes validated tool arguments. Rejects empty stories, empty
/// content, part number 0 and duplicate part numbers.
pub fn story_from_tool_arguments(arguments: StoryToolArguments) -> Option<Story> {
    if arguments.story_parts.is_empty() {
        warn!("story tool call contained no parts");
        return None;
    }

    let mut parts = Vec::with_capacity(arguments.story_parts.len());
    for part in arguments.story_parts {
        let content = part.content.trim();
        if part.part_number == 0 || content.is_empty() {
            warn!(
                part_number = part.part_number,
                "story tool call contained an invalid part"
            );
            return None;
        }
        parts.push(StoryPart {
            part_number: part.part_number,
            content: content.to_string(),
            image_prompt: part.image_prompt.trim().to_string(),
            width: non_zero_or(part.width, DEFAULT_IMAGE_WIDTH),
            height: non_zero_or(part.height, DEFAULT_IMAGE_HEIGHT),
        });
    }

    finalize(clean_title(&arguments.title), parts)
}

/// Parses the free-text grammar. Zero recognised parts is a failure, never an empty story.
pub fn parse_fallback_text(text: &str) -> Option<Story> {
    let markers = PART_MARKER
        .captures_iter(text)
        .filter_map(|captures| {
            let whole = captures.get(0)?;
            let number = captures
                .get(1)
                .or_else(|| captures.get(2))?
                .as_str()
                .parse::<u32>()
                .ok()?;
            Some((number, whole.start(), whole.end()))
        })
        .collect::<Vec<_>>();

    let mut parts = Vec::with_capacity(markers.len());
    for (index, (part_number, _, body_start)) in markers.iter().enumerate() {
        let body_end = markers
            .get(index + 1)
            .map(|(_, next_start, _)| *next_start)
            .unwrap_or(text.len());
        let body = &text[*body_start..body_end];

        let Some(captures) = PART_BODY.captures(body) else {
            debug!(part_number = part_number, "part block without a content marker skipped");
            continue;
        };
        let content = captures.get(1).map_or("", |m| m.as_str()).trim();
        if content.is_empty() || *part_number == 0 {
            continue;
        }
        let image_prompt = captures
            .get(2)
            .map_or_else(String::new, |m| first_paragraph(m.as_str()));
        parts.push(StoryPart::new(*part_number, content, image_prompt));
    }

    if parts.is_empty() {
        return None;
    }

    let title = TITLE_LINE
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|title| clean_title(title.as_str()))
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| UNTITLED_STORY.to_string());

    finalize(title, parts)
}

fn finalize(title: String, parts: Vec<StoryPart>) -> Option<Story> {
    let mut seen = HashSet::with_capacity(parts.len());
    if let Some(duplicate) = parts.iter().find(|part| !seen.insert(part.part_number)) {
        warn!(
            part_number = duplicate.part_number,
            "extracted story repeats a part number"
        );
        return None;
    }

    let title = if title.is_empty() {
        UNTITLED_STORY.to_string()
    } else {
        title
    };
    let story = Story::new(title, parts);

    let gaps = story.part_number_gaps();
    if !gaps.is_empty() {
        warn!(missing = ?gaps, "extracted story has gaps in its part numbers");
    }

    Some(story)
}

fn clean_title(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c| c == '《' || c == '》' || c == '*')
        .trim()
        .to_string()
}

// An image prompt ends at the first blank line.
fn first_paragraph(text: &str) -> String {
    text.trim()
        .lines()
        .map(str::trim_end)
        .take_while(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn non_zero_or(value: Option<u32>, default: u32) -> u32 {
    value.filter(|value| *value > 0).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ExtractionSource, extract, parse_fallback_text};
    use crate::llm::{AssistantMessage, STORY_TOOL_NAME};
    use crate::models::{Story, StoryPart};

    #[test]
    fn fallback_parses_reference_text() {
        let text = "标题：测试\n第1段：\n内容：甲\n图片提示词：乙\n第2段：\n内容：丙\n图片提示词：丁";

        let story = parse_fallback_text(text).expect("text should parse");

        assert_eq!(
            story,
            Story {
                title: "测试".to_string(),
                parts: vec![StoryPart::new(1, "甲", "乙"), StoryPart::new(2, "丙", "丁")],
            }
        );
        assert!(story.parts.iter().all(|p| p.width == 512 && p.height == 512));
    }

    #[test]
    fn fallback_without_markers_fails() {
        assert_eq!(parse_fallback_text("从前有一只小兔子，它很快乐。"), None);
        assert_eq!(parse_fallback_text(""), None);
    }

    #[test]
    fn fallback_handles_multiline_content_english_markers_and_missing_title() {
        let text = "Part 1:\nContent: Once upon a time\nthere was a fox.\nImage prompt: a fox\n\n\
                    Part 2:\nContent: The end.\n";

        let story = parse_fallback_text(text).expect("english markers parse");

        assert_eq!(story.title, "未命名故事");
        assert_eq!(story.parts[0].content, "Once upon a time\nthere was a fox.");
        assert_eq!(story.parts[0].image_prompt, "a fox");
        assert_eq!(story.parts[1].content, "The end.");
        assert_eq!(story.parts[1].image_prompt, "");
    }

    #[test]
    fn fallback_trims_book_title_brackets_and_inline_content() {
        let text = "标题：《小熊的冒险》\n\n第1段：内容：小熊出发了。图片提示词：小熊背着书包";

        let story = parse_fallback_text(text).expect("inline markers parse");

        assert_eq!(story.title, "小熊的冒险");
        assert_eq!(story.parts[0].content, "小熊出发了。");
        assert_eq!(story.parts[0].image_prompt, "小熊背着书包");
    }

    #[test]
    fn fallback_accepts_bold_markdown_markers() {
        let text = "**标题：** 月亮船\n**第1段：**\n**内容：** 甲\n**图片提示词：** 乙\n\n\
                    第2段：\n**内容**：丙\n**图片提示词**：丁";

        let story = parse_fallback_text(text).expect("bold markers parse");

        assert_eq!(story.title, "月亮船");
        assert_eq!(
            story.parts,
            vec![StoryPart::new(1, "甲", "乙"), StoryPart::new(2, "丙", "丁")]
        );
    }

    #[test]
    fn closing_remarks_stay_out_of_the_last_image_prompt() {
        let text = "标题：测试\n第1段：\n内容：甲\n图片提示词：乙\n\n希望你喜欢这个故事！";

        let story = parse_fallback_text(text).expect("text should parse");

        assert_eq!(story.parts[0].image_prompt, "乙");
        assert_eq!(story.parts[0].content, "甲");
    }

    #[test]
    fn fallback_rejects_duplicate_part_numbers() {
        let text = "第1段：\n内容：甲\n图片提示词：乙\n第1段：\n内容：丙\n图片提示词：丁";
        assert_eq!(parse_fallback_text(text), None);
    }

    #[test]
    fn structured_path_sorts_parts_and_backfills_sizes() {
        let arguments = json!({
            "title": "森林音乐会",
            "story_parts": [
                {"part_number": 2, "content": "第二段", "image_prompt": "舞台", "width": 800, "height": 600},
                {"part_number": 1, "content": "第一段", "image_prompt": "森林"},
                {"part_number": 3, "content": "第三段", "image_prompt": "", "width": 0}
            ]
        });
        let message = AssistantMessage::tool_call(STORY_TOOL_NAME, arguments.to_string());

        let extraction = extract(&message).expect("tool call should extract");

        assert_eq!(extraction.source, ExtractionSource::ToolCall);
        let story = extraction.story;
        assert_eq!(story.title, "森林音乐会");
        assert_eq!(story.parts.len(), 3);
        assert_eq!(
            story.parts.iter().map(|p| p.part_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!((story.parts[0].width, story.parts[0].height), (512, 512));
        assert_eq!((story.parts[1].width, story.parts[1].height), (800, 600));
        assert_eq!((story.parts[2].width, story.parts[2].height), (512, 512));
    }

    #[test]
    fn invalid_tool_call_falls_back_to_text_content() {
        let message = AssistantMessage {
            content: Some("标题：备用\n第1段：\n内容：甲\n图片提示词：乙".to_string()),
            tool_calls: vec![crate::llm::ToolInvocation {
                name: STORY_TOOL_NAME.to_string(),
                arguments: "{\"title\": \"broken\"".to_string(),
            }],
        };

        let extraction = extract(&message).expect("fallback should recover");

        assert_eq!(extraction.source, ExtractionSource::TextFallback);
        assert_eq!(extraction.story.title, "备用");
    }

    #[test]
    fn tool_call_with_empty_content_or_no_parts_fails() {
        let empty_parts = AssistantMessage::tool_call(
            STORY_TOOL_NAME,
            json!({"title": "x", "story_parts": []}).to_string(),
        );
        assert_eq!(extract(&empty_parts), None);

        let blank = AssistantMessage::tool_call(
            STORY_TOOL_NAME,
            json!({"title": "x", "story_parts": [{"part_number": 1, "content": "  "}]}).to_string(),
        );
        assert_eq!(extract(&blank), None);
    }

    #[test]
    fn unrelated_tool_calls_are_ignored() {
        let message = AssistantMessage::tool_call("get_weather", "{}");
        assert_eq!(extract(&message), None);
    }
}
