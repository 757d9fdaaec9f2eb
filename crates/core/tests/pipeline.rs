use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{json, Value};

use lesson_core::validate;
use lesson_core::{
    BlockGenerator, BlockStore, CefrLevel, FailureReason, GenerationRequest, LanguageModel,
    LanguageModelError, LearnerProfile, LessonKind, LogLevel, MemoryBlockStore, ProgressSummary,
    PromptRegistry, VecLogSink,
};

#[derive(Clone)]
enum Reply {
    Text(String),
    Fail(&'static str),
}

/// Routes each call on a marker phrase in the rendered prompt. The three
/// lesson calls run on separate threads, so a FIFO script would be racy.
struct ScriptedModel {
    replies: HashMap<&'static str, Reply>,
    calls: Mutex<Vec<&'static str>>,
}

impl ScriptedModel {
    fn new(replies: HashMap<&'static str, Reply>) -> Self {
        Self {
            replies,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().expect("calls mutex").clone()
    }
}

impl LanguageModel for ScriptedModel {
    fn generate(&self, prompt: &str, _max_tokens: u32) -> Result<String, LanguageModelError> {
        let route = if prompt.contains("Create the metadata") {
            "metadata"
        } else if prompt.contains("Create a grammar lesson") {
            "grammar"
        } else if prompt.contains("Create a vocabulary lesson") {
            "vocabulary"
        } else if prompt.contains("Create a reading lesson") {
            "reading"
        } else {
            return Err(LanguageModelError::message("unroutable prompt in test"));
        };
        self.calls.lock().expect("calls mutex").push(route);

        match self.replies.get(route) {
            Some(Reply::Text(text)) => Ok(text.clone()),
            Some(Reply::Fail(message)) => Err(LanguageModelError::message(*message)),
            None => Err(LanguageModelError::message("no scripted reply")),
        }
    }
}

fn exercises() -> Value {
    json!([
        {"id": "ex1", "type": "fill_blank", "question": "She ___ (work) in a bank.",
         "correct_answer": "worked", "explanation": "Regular verb + ed"},
        {"id": "ex2", "type": "multiple_choice", "question": "They ___ to school.",
         "options": ["go", "went", "goes", "going"], "correct_answer": 1,
         "explanation": "Past form"},
        {"id": "ex3", "type": "correct_mistake", "question": "He don't liked it.",
         "correct_answer": "didn't like", "explanation": "Past negative"},
        {"id": "ex4", "type": "true_false", "question": "Past simple uses -ed for regular verbs.",
         "correct_answer": "true", "explanation": "Regular verbs take -ed"},
        {"id": "ex5", "type": "fill_blank", "question": "We ___ (play) football.",
         "correct_answer": "played", "explanation": "Regular verb"}
    ])
}

fn metadata_reply() -> String {
    json!({
        "title": "Past Simple",
        "description": "Talking about finished actions",
        "level": "B1",
        "difficulty_level": 3,
        "grammar_topic": "past_simple"
    })
    .to_string()
}

fn grammar_reply() -> String {
    json!({
        "lesson_type": "grammar",
        "title": "Past Simple Rules",
        "content": {
            "rule": {
                "title": "Past Simple",
                "explanation": "Use the past simple for finished actions.",
                "examples": ["I worked yesterday", "She didn't call", "Did they arrive?"]
            },
            "exercises": exercises()
        }
    })
    .to_string()
}

fn vocabulary_reply() -> String {
    json!({
        "lesson_type": "vocabulary",
        "title": "Vocabulary: Past Simple",
        "content": {
            "words": [
                {"word": "yesterday", "translation": "вчера", "example": "I saw him yesterday."},
                {"word": "ago", "translation": "назад", "example": "Two years ago we moved."}
            ],
            "exercises": exercises()
        }
    })
    .to_string()
}

fn reading_reply() -> String {
    json!({
        "lesson_type": "reading",
        "title": "Reading: Past Simple in Context",
        "content": {
            "text": "Last summer, Anna travelled to Spain. She visited museums and tried new food.",
            "glossary": [
                {"word": "travelled", "translation": "путешествовала"},
                {"word": "visited", "translation": "посетила"}
            ],
            "exercises": exercises()
        }
    })
    .to_string()
}

fn happy_replies() -> HashMap<&'static str, Reply> {
    HashMap::from([
        ("metadata", Reply::Text(metadata_reply())),
        ("grammar", Reply::Text(grammar_reply())),
        ("vocabulary", Reply::Text(vocabulary_reply())),
        ("reading", Reply::Text(reading_reply())),
    ])
}

fn request() -> GenerationRequest {
    GenerationRequest::new("u1", CefrLevel::B1, "past_simple")
}

fn progress() -> ProgressSummary {
    ProgressSummary {
        difficulty: 3,
        ..ProgressSummary::default()
    }
}

#[test]
fn full_pipeline_persists_one_block_with_three_lessons() {
    let prompts = PromptRegistry::new().expect("registry");
    let sink = VecLogSink::new();
    let store = MemoryBlockStore::new();
    let model = ScriptedModel::new(happy_replies());

    let generator = BlockGenerator::new(&prompts, &sink);
    let block_id = generator
        .generate(&model, &store, &request(), &LearnerProfile::default(), &progress())
        .expect("pipeline succeeds");

    assert_eq!(store.block_count().expect("count"), 1);
    assert_eq!(store.lesson_count().expect("count"), 3);

    let block = store.block(block_id).expect("read").expect("present");
    assert_eq!(block.metadata.title, "Past Simple");
    assert_eq!(block.metadata.level, CefrLevel::B1);
    assert_eq!(block.metadata.difficulty, 3);

    let kinds: Vec<LessonKind> = block.lessons.iter().map(|l| l.draft.kind).collect();
    assert_eq!(
        kinds,
        vec![LessonKind::Grammar, LessonKind::Vocabulary, LessonKind::Reading]
    );

    // One metadata call plus exactly one call per lesson kind.
    let mut calls = model.calls();
    assert_eq!(calls.remove(0), "metadata");
    calls.sort();
    assert_eq!(calls, vec!["grammar", "reading", "vocabulary"]);

    assert!(sink
        .records()
        .iter()
        .any(|r| r.level == LogLevel::Info && r.message.contains("lessons ok")));
}

#[test]
fn invalid_metadata_persists_nothing_and_skips_lessons() {
    let prompts = PromptRegistry::new().expect("registry");
    let sink = VecLogSink::new();
    let store = MemoryBlockStore::new();

    let mut replies = happy_replies();
    replies.insert("metadata", Reply::Text("Sorry, I cannot help with that.".into()));
    let model = ScriptedModel::new(replies);

    let generator = BlockGenerator::new(&prompts, &sink);
    let error = generator
        .generate(&model, &store, &request(), &LearnerProfile::default(), &progress())
        .expect_err("metadata is garbage");

    assert_eq!(error.reason(), FailureReason::MetadataInvalid);
    assert_eq!(store.block_count().expect("count"), 0);
    assert_eq!(store.lesson_count().expect("count"), 0);
    assert_eq!(model.calls(), vec!["metadata"]);
}

#[test]
fn one_invalid_lesson_persists_nothing() {
    let prompts = PromptRegistry::new().expect("registry");
    let sink = VecLogSink::new();
    let store = MemoryBlockStore::new();

    // Vocabulary comes back without its word list.
    let broken = json!({
        "lesson_type": "vocabulary",
        "title": "Vocabulary: Past Simple",
        "content": {"exercises": exercises()}
    })
    .to_string();
    let mut replies = happy_replies();
    replies.insert("vocabulary", Reply::Text(broken));
    let model = ScriptedModel::new(replies);

    let generator = BlockGenerator::new(&prompts, &sink);
    let error = generator
        .generate(&model, &store, &request(), &LearnerProfile::default(), &progress())
        .expect_err("one lesson invalid");

    assert_eq!(error.reason(), FailureReason::LessonsInvalid);
    assert_eq!(store.block_count().expect("count"), 0);
    assert_eq!(store.lesson_count().expect("count"), 0, "no orphaned lessons");
}

#[test]
fn reading_transport_failure_lets_siblings_finish_but_persists_nothing() {
    let prompts = PromptRegistry::new().expect("registry");
    let sink = VecLogSink::new();
    let store = MemoryBlockStore::new();

    let mut replies = happy_replies();
    replies.insert("reading", Reply::Fail("connection timed out after 60s"));
    let model = ScriptedModel::new(replies);

    let generator = BlockGenerator::new(&prompts, &sink);
    let error = generator
        .generate(&model, &store, &request(), &LearnerProfile::default(), &progress())
        .expect_err("reading call fails");

    assert_eq!(error.reason(), FailureReason::GenerationError);
    assert_eq!(store.block_count().expect("count"), 0);
    assert_eq!(store.lesson_count().expect("count"), 0);

    // All three lesson calls ran to completion; the failure aborted the
    // barrier outcome, not the sibling calls.
    let mut lesson_calls = model.calls();
    lesson_calls.retain(|route| *route != "metadata");
    lesson_calls.sort();
    assert_eq!(lesson_calls, vec!["grammar", "reading", "vocabulary"]);
}

#[test]
fn persisted_lesson_content_revalidates_against_write_time_schema() {
    let prompts = PromptRegistry::new().expect("registry");
    let sink = VecLogSink::new();
    let store = MemoryBlockStore::new();
    let model = ScriptedModel::new(happy_replies());

    let generator = BlockGenerator::new(&prompts, &sink);
    let block_id = generator
        .generate(&model, &store, &request(), &LearnerProfile::default(), &progress())
        .expect("pipeline succeeds");

    let block = store.block(block_id).expect("read").expect("present");
    for lesson in &block.lessons {
        let raw = json!({
            "lesson_type": lesson.draft.kind,
            "title": lesson.draft.title,
            "content": lesson.draft.content,
            "duration_minutes": lesson.draft.duration_minutes
        })
        .to_string();
        let revalidated = validate::lesson(&raw, lesson.draft.kind).expect("round-trip validates");
        assert_eq!(revalidated.content, lesson.draft.content);
    }
}

#[test]
fn repeated_requests_create_distinct_blocks() {
    let prompts = PromptRegistry::new().expect("registry");
    let sink = VecLogSink::new();
    let store = MemoryBlockStore::new();
    let model = ScriptedModel::new(happy_replies());

    let generator = BlockGenerator::new(&prompts, &sink);
    let first = generator
        .generate(&model, &store, &request(), &LearnerProfile::default(), &progress())
        .expect("first run");
    let second = generator
        .generate(&model, &store, &request(), &LearnerProfile::default(), &progress())
        .expect("second run");

    // Generation is non-deterministic by nature; only structure is asserted.
    assert_ne!(first, second);
    assert_eq!(store.block_count().expect("count"), 2);
    assert_eq!(store.lesson_count().expect("count"), 6);

    let orders: Vec<u32> = store
        .blocks_for_user("u1")
        .expect("read")
        .iter()
        .map(|b| b.order)
        .collect();
    assert_eq!(orders, vec![1, 2]);
}

#[test]
fn fenced_lesson_responses_are_accepted() {
    let prompts = PromptRegistry::new().expect("registry");
    let sink = VecLogSink::new();
    let store = MemoryBlockStore::new();

    let mut replies = happy_replies();
    replies.insert(
        "grammar",
        Reply::Text(format!("```json\n{}\n```", grammar_reply())),
    );
    let model = ScriptedModel::new(replies);

    let generator = BlockGenerator::new(&prompts, &sink);
    generator
        .generate(&model, &store, &request(), &LearnerProfile::default(), &progress())
        .expect("fenced JSON still validates");
    assert_eq!(store.block_count().expect("count"), 1);
}
