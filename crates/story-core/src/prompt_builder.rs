use std::fmt::Write as _;

use crate::story_config::{StoryConfig, StoryConfigError};

/// Renders the single instruction block sent to the model for `config`.
///
/// The output is a pure function of the config. The template uses the same
/// section markers the fallback parser in [`crate::extract`] looks for.
pub fn build_prompt(config: &StoryConfig) -> Result<String, StoryConfigError> {
    let language = config.language.prompt_name()?;
    if config.part_count == 0 {
        return Err(StoryConfigError::ZeroParts);
    }
    let part_count = config.part_count;
    let per_part = config.words_per_part();

    let mut prompt = String::new();
    prompt.push_str("你是一名童话故事创作者。\n");
    let _ = writeln!(
        prompt,
        "现在请根据以下设定，生成一篇约 {} 字的童话故事，并将其分成 {part_count} 个段落，每段约 {per_part} 字，\
每段提供**一句**图片提示词。童话故事中必须包含指定的好词好句，以便让阅读者学习。",
        config.word_length
    );

    prompt.push_str("\n【设定】\n");
    let _ = writeln!(prompt, "标题：{}", config.title.trim());
    prompt.push_str("角色：\n");
    if config.characters.is_empty() {
        prompt.push_str("\t（由作者自由设定）\n");
    }
    for (index, character) in config.characters.iter().enumerate() {
        let _ = write!(prompt, "\t第{}个角色：", index + 1);
        if !character.name.trim().is_empty() {
            let _ = write!(prompt, "\t名字：{}", character.name.trim());
        }
        if let Some(species) = character
            .species
            .as_deref()
            .map(str::trim)
            .filter(|species| !species.is_empty())
        {
            let _ = write!(prompt, "\t物种：{species}");
        }
        prompt.push('\n');
    }
    let _ = writeln!(prompt, "寓意：{}", config.lesson.trim());
    let _ = writeln!(prompt, "语言：{language}");
    let _ = writeln!(prompt, "目标年龄：{}岁", config.target_age);
    if config.vocabulary.is_empty() {
        prompt.push_str("好词好句：无\n");
    } else {
        let _ = writeln!(prompt, "好词好句：{}", config.vocabulary.join("、"));
    }

    prompt.push_str("\n【输出格式】\n");
    prompt.push_str("标题：<故事标题>\n");
    for part_number in 1..=part_count.min(2) {
        let _ = write!(
            prompt,
            "\n第{part_number}段：\n内容：<第{part_number}段故事内容，约 {per_part} 字>\n图片提示词：<用于生成图片的描述语句>\n"
        );
    }
    if part_count > 2 {
        let _ = write!(prompt, "\n……（依此类推，直到第{part_count}段）\n");
    }

    let _ = write!(
        prompt,
        "\n请严格遵守段落数（共 {part_count} 段）和输出格式，每个段落都必须包含“内容：”和“图片提示词：”。"
    );

    Ok(prompt)
}
