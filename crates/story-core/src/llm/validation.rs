use std::sync::LazyLock;

use jsonschema::JSONSchema;
use serde_json::Value;
use thiserror::Error;

use super::contracts::{StoryToolArguments, story_tool_schema};

#[derive(Debug, Error)]
pub enum ToolArgumentsError {
    #[error("story tool arguments are not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("story tool schema failed to compile: {0}")]
    SchemaCompile(String),
    #[error("story tool arguments failed schema validation: {errors:?}")]
    SchemaViolation { errors: Vec<String> },
}

static STORY_TOOL_VALIDATOR: LazyLock<Result<JSONSchema, String>> = LazyLock::new(|| {
    JSONSchema::compile(&story_tool_schema()).map_err(|err| err.to_string())
});

pub fn validate_tool_arguments_json(raw_json: &str) -> Result<StoryToolArguments, ToolArgumentsError> {
    let payload: Value = serde_json::from_str(raw_json)?;
    validate_tool_arguments_value(&payload)
}

pub fn validate_tool_arguments_value(
    payload: &Value,
) -> Result<StoryToolArguments, ToolArgumentsError> {
    let validator = STORY_TOOL_VALIDATOR
        .as_ref()
        .map_err(|message| ToolArgumentsError::SchemaCompile(message.clone()))?;

    if let Err(validation_errors) = validator.validate(payload) {
        let errors = validation_errors
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(ToolArgumentsError::SchemaViolation { errors });
    }

    Ok(serde_json::from_value(payload.clone())?)
}
