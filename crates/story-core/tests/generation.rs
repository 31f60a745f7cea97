use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::json;
use story_core::config::GenerationPolicy;
use story_core::generation::{AttemptFailure, GenerationOutcome, StoryGenerator};
use story_core::llm::{
    AssistantMessage, LlmGateway, LlmGatewayError, LlmGatewayFuture, LlmGatewayRequest,
    LlmGatewayResponse, ModelPurpose, STORY_TOOL_NAME,
};
use story_core::safety::SafetyGate;
use story_core::storage::StoryStore;
use story_core::{ExtractionSource, Story, StoryPart};
use tempfile::TempDir;
use tokio::sync::Mutex;

type Scripted = Result<AssistantMessage, LlmGatewayError>;

/// Replays scripted replies per purpose and records every request.
#[derive(Clone, Default)]
struct ScriptedGateway {
    generation: Arc<Mutex<VecDeque<Scripted>>>,
    safety: Arc<Mutex<VecDeque<Scripted>>>,
    seen: Arc<Mutex<Vec<LlmGatewayRequest>>>,
}

impl ScriptedGateway {
    fn new(generation: Vec<Scripted>, safety: Vec<Scripted>) -> Self {
        Self {
            generation: Arc::new(Mutex::new(VecDeque::from(generation))),
            safety: Arc::new(Mutex::new(VecDeque::from(safety))),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn calls(&self, purpose: ModelPurpose) -> usize {
        self.seen
            .lock()
            .await
            .iter()
            .filter(|request| request.purpose == purpose)
            .count()
    }

    async fn generation_prompts(&self) -> Vec<String> {
        self.seen
            .lock()
            .await
            .iter()
            .filter(|request| request.purpose == ModelPurpose::Generation)
            .filter_map(|request| request.user_prompt().map(ToString::to_string))
            .collect()
    }
}

impl LlmGateway for ScriptedGateway {
    fn complete<'a>(&'a self, request: LlmGatewayRequest) -> LlmGatewayFuture<'a> {
        Box::pin(async move {
            let purpose = request.purpose;
            self.seen.lock().await.push(request);

            let queue = match purpose {
                ModelPurpose::Generation => &self.generation,
                ModelPurpose::SafetyCheck => &self.safety,
            };
            let reply = queue.lock().await.pop_front().unwrap_or_else(|| {
                Err(LlmGatewayError::ProviderFailure(
                    "missing_scripted_reply".to_string(),
                ))
            });
            reply.map(|message| LlmGatewayResponse::new("scripted-model", message))
        })
    }
}

fn verdict(is_safe: bool, reason: &str) -> Scripted {
    Ok(AssistantMessage::text(
        json!({"is_safe": is_safe, "reason": reason}).to_string(),
    ))
}

fn tool_story(title: &str) -> Scripted {
    Ok(AssistantMessage::tool_call(
        STORY_TOOL_NAME,
        json!({
            "title": title,
            "story_parts": [
                {"part_number": 2, "content": "小熊回到了家。", "image_prompt": "小熊在家门口"},
                {"part_number": 1, "content": "小熊出门去冒险。", "image_prompt": "森林里的小熊"}
            ]
        })
        .to_string(),
    ))
}

fn text_story() -> Scripted {
    Ok(AssistantMessage::text(
        "标题：测试\n第1段：\n内容：甲\n图片提示词：乙\n第2段：\n内容：丙\n图片提示词：丁",
    ))
}

fn policy(max_attempts: u32) -> GenerationPolicy {
    GenerationPolicy {
        max_attempts,
        retry_feedback: true,
    }
}

#[tokio::test]
async fn unsafe_prompt_makes_no_generation_calls() {
    let gateway = ScriptedGateway::new(vec![tool_story("小熊")], vec![verdict(false, "暴力主题")]);
    let dir = TempDir::new().expect("temp dir");
    let store = StoryStore::new(dir.path());

    let outcome = StoryGenerator::new(&gateway, &store, policy(3))
        .generate("写一个打架的故事")
        .await
        .expect("generation should not hit storage errors");

    assert!(matches!(outcome, GenerationOutcome::PromptRejected { ref reason } if reason == "暴力主题"));
    assert!(outcome.story().is_none());
    assert_eq!(gateway.calls(ModelPurpose::Generation).await, 0);
    assert_eq!(gateway.calls(ModelPurpose::SafetyCheck).await, 1);
    assert_eq!(
        std::fs::read_dir(dir.path()).expect("read temp dir").count(),
        0
    );
}

#[tokio::test]
async fn first_safe_story_wins_and_is_persisted() {
    let gateway = ScriptedGateway::new(
        vec![tool_story("小熊的冒险"), tool_story("never requested")],
        vec![verdict(true, "ok"), verdict(true, "ok")],
    );
    let dir = TempDir::new().expect("temp dir");
    let store = StoryStore::new(dir.path());

    let outcome = StoryGenerator::new(&gateway, &store, policy(3))
        .generate("写一个小熊的故事")
        .await
        .expect("generation should succeed");

    let (story, story_dir, source, report) = match outcome {
        GenerationOutcome::Generated {
            story,
            story_dir,
            source,
            report,
        } => (story, story_dir, source, report),
        other => panic!("expected a generated story, got {other:?}"),
    };

    assert_eq!(source, ExtractionSource::ToolCall);
    assert_eq!(story.title, "小熊的冒险");
    assert_eq!(
        story.parts.iter().map(|part| part.part_number).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(report.attempts, 1);
    assert!(report.discarded.is_empty());
    assert_eq!(gateway.calls(ModelPurpose::Generation).await, 1);
    assert_eq!(gateway.calls(ModelPurpose::SafetyCheck).await, 2);

    assert_eq!(story_dir, dir.path().join("小熊的冒险"));
    let persisted = store.load("小熊的冒险").await.expect("story should load");
    assert_eq!(persisted, story);
}

#[tokio::test]
async fn always_unsafe_output_exhausts_exactly_max_attempts() {
    let gateway = ScriptedGateway::new(
        vec![tool_story("a"), tool_story("b"), tool_story("c"), tool_story("d")],
        vec![
            verdict(true, "prompt ok"),
            verdict(false, "情节吓人"),
            verdict(false, "情节吓人"),
            verdict(false, "情节吓人"),
            verdict(false, "情节吓人"),
        ],
    );
    let dir = TempDir::new().expect("temp dir");
    let store = StoryStore::new(dir.path());

    let outcome = StoryGenerator::new(&gateway, &store, policy(3))
        .generate("写一个故事")
        .await
        .expect("generation should not hit storage errors");

    let report = match outcome {
        GenerationOutcome::Exhausted { report } => report,
        other => panic!("expected exhaustion, got {other:?}"),
    };
    assert_eq!(report.attempts, 3);
    assert_eq!(report.discarded.len(), 3);
    assert!(report.discarded.iter().all(|discarded| matches!(
        discarded.failure,
        AttemptFailure::UnsafeOutput { ref reason } if reason == "情节吓人"
    )));
    assert_eq!(gateway.calls(ModelPurpose::Generation).await, 3);
    assert_eq!(
        std::fs::read_dir(dir.path()).expect("read temp dir").count(),
        0
    );
}

#[tokio::test]
async fn transport_and_parse_failures_are_discarded_and_loop_continues() {
    let gateway = ScriptedGateway::new(
        vec![
            Err(LlmGatewayError::Timeout),
            Ok(AssistantMessage::text("从前有一只小兔子。")),
            text_story(),
        ],
        vec![verdict(true, "ok"), verdict(true, "ok")],
    );
    let dir = TempDir::new().expect("temp dir");
    let store = StoryStore::new(dir.path());

    let outcome = StoryGenerator::new(&gateway, &store, policy(3))
        .generate("写一个故事")
        .await
        .expect("generation should succeed");

    let (story, source, report) = match outcome {
        GenerationOutcome::Generated {
            story,
            source,
            report,
            ..
        } => (story, source, report),
        other => panic!("expected a generated story, got {other:?}"),
    };
    assert_eq!(source, ExtractionSource::TextFallback);
    assert_eq!(
        story,
        Story::new(
            "测试",
            vec![StoryPart::new(1, "甲", "乙"), StoryPart::new(2, "丙", "丁")]
        )
    );
    assert_eq!(report.attempts, 3);
    assert!(matches!(
        report.discarded[0].failure,
        AttemptFailure::Transport(_)
    ));
    assert_eq!(report.discarded[1].failure, AttemptFailure::Unparseable);
    assert_eq!(gateway.calls(ModelPurpose::Generation).await, 3);
    assert_eq!(gateway.calls(ModelPurpose::SafetyCheck).await, 2);
}

#[tokio::test]
async fn rejection_reason_is_fed_into_the_next_attempt() {
    let gateway = ScriptedGateway::new(
        vec![tool_story("一"), tool_story("二")],
        vec![verdict(true, "ok"), verdict(false, "有打斗场面"), verdict(true, "ok")],
    );
    let dir = TempDir::new().expect("temp dir");
    let store = StoryStore::new(dir.path());

    let outcome = StoryGenerator::new(&gateway, &store, policy(3))
        .generate("写一个故事")
        .await
        .expect("generation should succeed");

    assert_eq!(outcome.story().map(|story| story.title.as_str()), Some("二"));
    let prompts = gateway.generation_prompts().await;
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0], "写一个故事");
    assert!(prompts[1].starts_with("写一个故事"));
    assert!(prompts[1].contains("有打斗场面"));
}

#[tokio::test]
async fn retry_feedback_can_be_disabled() {
    let gateway = ScriptedGateway::new(
        vec![tool_story("一"), tool_story("二")],
        vec![verdict(true, "ok"), verdict(false, "有打斗场面"), verdict(true, "ok")],
    );
    let dir = TempDir::new().expect("temp dir");
    let store = StoryStore::new(dir.path());
    let policy = GenerationPolicy {
        max_attempts: 3,
        retry_feedback: false,
    };

    StoryGenerator::new(&gateway, &store, policy)
        .generate("写一个故事")
        .await
        .expect("generation should succeed");

    assert_eq!(
        gateway.generation_prompts().await,
        vec!["写一个故事".to_string(), "写一个故事".to_string()]
    );
}

#[tokio::test]
async fn safety_gate_fails_closed_on_transport_error_and_malformed_output() {
    let gateway = ScriptedGateway::new(
        Vec::new(),
        vec![
            Err(LlmGatewayError::ProviderFailure("status=500".to_string())),
            Ok(AssistantMessage::text("这段内容很安全")),
            Ok(AssistantMessage::default()),
        ],
    );
    let gate = SafetyGate::new(&gateway);

    let transport = gate.check_prompt("写一个故事").await;
    assert!(!transport.is_safe);
    assert!(transport.reason.contains("status=500"));

    let malformed = gate.check_prompt("写一个故事").await;
    assert!(!malformed.is_safe);

    let story = Story::new("t", vec![StoryPart::new(1, "a", "")]);
    let empty = gate.check_content(&story).await;
    assert!(!empty.is_safe);

    let requests = gateway.seen.lock().await;
    assert_eq!(requests.len(), 3);
    assert!(
        requests
            .iter()
            .all(|request| request.purpose == ModelPurpose::SafetyCheck)
    );
    assert_eq!(requests[2].user_prompt(), Some("t\na\n"));
}
