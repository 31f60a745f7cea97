pub mod contracts;
pub mod gateway;
pub mod openai_compat;
pub mod prompts;
pub mod validation;

pub use contracts::{STORY_TOOL_NAME, StoryToolArguments, StoryToolPart, story_tool, story_tool_schema};
pub use gateway::{
    AssistantMessage, ChatMessage, ChatRole, LlmGateway, LlmGatewayError, LlmGatewayFuture,
    LlmGatewayRequest, LlmGatewayResponse, LlmTokenUsage, ModelPurpose, ResponseFormat,
    ToolDefinition, ToolInvocation,
};
pub use openai_compat::OpenAiCompatibleGateway;
pub use prompts::{GENERATION_SYSTEM_PROMPT, SafetyPolicy};
pub use validation::{ToolArgumentsError, validate_tool_arguments_json, validate_tool_arguments_value};
