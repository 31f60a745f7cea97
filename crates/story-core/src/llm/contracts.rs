use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::gateway::ToolDefinition;

pub const STORY_TOOL_NAME: &str = "write_fairytale";
const STORY_TOOL_DESCRIPTION: &str = "Write a children's fairytale split into numbered parts, \
    strictly following the provided settings. Each part carries its text and a one-sentence \
    illustration prompt.";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StoryToolArguments {
    #[schemars(description = "Title of the story.")]
    pub title: String,
    #[schemars(description = "Story parts in reading order.")]
    pub story_parts: Vec<StoryToolPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StoryToolPart {
    #[schemars(range(min = 1), description = "1-based position of the part.")]
    pub part_number: u32,
    #[schemars(description = "Text of this part.")]
    pub content: String,
    #[schemars(description = "One sentence describing the illustration for this part.")]
    #[serde(default)]
    pub image_prompt: String,
    #[schemars(description = "Illustration width in pixels; 512 when omitted.")]
    #[serde(default)]
    pub width: Option<u32>,
    #[schemars(description = "Illustration height in pixels; 512 when omitted.")]
    #[serde(default)]
    pub height: Option<u32>,
}

pub fn story_tool_schema() -> Value {
    let settings = SchemaSettings::draft07().with(|settings| {
        settings.inline_subschemas = true;
        settings.meta_schema = None;
    });
    let schema = settings
        .into_generator()
        .into_root_schema_for::<StoryToolArguments>();

    let mut value = serde_json::to_value(schema).unwrap_or_else(|_| Value::Object(Default::default()));
    if let Some(object) = value.as_object_mut() {
        object.remove("title");
        object.remove("definitions");
    }
    value
}

pub fn story_tool() -> ToolDefinition {
    ToolDefinition {
        name: STORY_TOOL_NAME.to_string(),
        description: STORY_TOOL_DESCRIPTION.to_string(),
        parameters: story_tool_schema(),
    }
}
