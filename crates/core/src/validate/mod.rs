//! Validation of raw model responses against the per-kind lesson schemas.
//!
//! Models wrap JSON in code fences or prose often enough that extraction
//! has to tolerate both. Everything after extraction is strict: a missing
//! or malformed field is a classified error, never a silent default.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::block::{BlockMetadata, CefrLevel, LessonDraft, LessonKind};

/// Every lesson carries exactly this many exercises.
pub const EXERCISES_PER_LESSON: usize = 5;

/// Applied only when the response omits `duration_minutes` entirely.
pub const DEFAULT_LESSON_MINUTES: u32 = 15;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("response contains no JSON object")]
    NoJson,
    #[error("response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("`{field}` is missing")]
    MissingField { field: String },
    #[error("`{field}` must be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
    #[error("`{field}` must not be empty")]
    Empty { field: String },
    #[error("unknown CEFR level `{value}`")]
    UnknownLevel { value: String },
    #[error("difficulty_level {value} is outside 1..=5")]
    DifficultyRange { value: i64 },
    #[error("expected lesson_type `{expected}`, got `{actual}`")]
    KindMismatch {
        expected: LessonKind,
        actual: String,
    },
    #[error("expected exactly {expected} exercises, got {actual}")]
    ExerciseCount { expected: usize, actual: usize },
    #[error("exercise `{id}`: {problem}")]
    Exercise { id: String, problem: String },
}

/// Pulls a JSON object out of a raw model response. Strips markdown code
/// fences, then falls back to the outermost `{`..`}` span for responses
/// wrapped in prose.
pub fn extract_json(raw: &str) -> Result<Value, ValidationError> {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    let text = text.trim();

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }

    let start = text.find('{').ok_or(ValidationError::NoJson)?;
    let end = text.rfind('}').ok_or(ValidationError::NoJson)?;
    if end <= start {
        return Err(ValidationError::NoJson);
    }
    Ok(serde_json::from_str(&text[start..=end])?)
}

/// Validates the metadata response from the first pipeline call.
pub fn block_metadata(raw: &str) -> Result<BlockMetadata, ValidationError> {
    let value = extract_json(raw)?;
    let object = as_object(&value, "block metadata")?;

    let title = require_string(object, "title")?;
    let description = require_string(object, "description")?;
    let grammar_topic = require_string(object, "grammar_topic")?;

    let level_raw = require_string(object, "level")?;
    let level: CefrLevel = level_raw
        .parse()
        .map_err(|_| ValidationError::UnknownLevel { value: level_raw })?;

    let difficulty_raw = object
        .get("difficulty_level")
        .ok_or_else(|| missing("difficulty_level"))?;
    let difficulty = difficulty_raw
        .as_i64()
        .ok_or_else(|| wrong_type("difficulty_level", "an integer"))?;
    if !(1..=5).contains(&difficulty) {
        return Err(ValidationError::DifficultyRange { value: difficulty });
    }

    Ok(BlockMetadata {
        title,
        description,
        level,
        difficulty: difficulty as u8,
        grammar_topic,
    })
}

/// Validates one lesson response against the schema for `expected` and
/// returns a draft ready for persistence.
pub fn lesson(raw: &str, expected: LessonKind) -> Result<LessonDraft, ValidationError> {
    let value = extract_json(raw)?;
    let object = as_object(&value, "lesson")?;

    let declared = require_string(object, "lesson_type")?;
    if declared != expected.as_str() {
        return Err(ValidationError::KindMismatch {
            expected,
            actual: declared,
        });
    }

    let title = require_string(object, "title")?;

    let content = object
        .get("content")
        .ok_or_else(|| missing("content"))?
        .as_object()
        .ok_or_else(|| wrong_type("content", "an object"))?;

    match expected {
        LessonKind::Grammar => check_grammar_content(content)?,
        LessonKind::Vocabulary => check_vocabulary_content(content)?,
        LessonKind::Reading => check_reading_content(content)?,
    }
    check_exercises(content)?;

    let duration_minutes = match object.get("duration_minutes") {
        None => DEFAULT_LESSON_MINUTES,
        Some(value) => value
            .as_u64()
            .filter(|minutes| *minutes > 0)
            .map(|minutes| minutes as u32)
            .ok_or_else(|| wrong_type("duration_minutes", "a positive integer"))?,
    };

    Ok(LessonDraft {
        kind: expected,
        title,
        content: Value::Object(content.clone()),
        duration_minutes,
    })
}

fn check_grammar_content(content: &Map<String, Value>) -> Result<(), ValidationError> {
    let rule = content
        .get("rule")
        .ok_or_else(|| missing("content.rule"))?
        .as_object()
        .ok_or_else(|| wrong_type("content.rule", "an object"))?;

    require_string(rule, "title").map_err(|e| prefix(e, "content.rule"))?;
    require_string(rule, "explanation").map_err(|e| prefix(e, "content.rule"))?;

    let examples = require_array(rule, "examples").map_err(|e| prefix(e, "content.rule"))?;
    if examples.is_empty() {
        return Err(ValidationError::Empty {
            field: "content.rule.examples".into(),
        });
    }
    for example in examples {
        if example.as_str().map_or(true, |s| s.trim().is_empty()) {
            return Err(wrong_type(
                "content.rule.examples",
                "an array of non-empty strings",
            ));
        }
    }
    Ok(())
}

fn check_vocabulary_content(content: &Map<String, Value>) -> Result<(), ValidationError> {
    let words = require_array(content, "words").map_err(|e| prefix(e, "content"))?;
    if words.is_empty() {
        return Err(ValidationError::Empty {
            field: "content.words".into(),
        });
    }
    for word in words {
        let entry = word
            .as_object()
            .ok_or_else(|| wrong_type("content.words", "an array of objects"))?;
        for field in ["word", "translation", "example"] {
            require_string(entry, field).map_err(|e| prefix(e, "content.words"))?;
        }
    }
    Ok(())
}

fn check_reading_content(content: &Map<String, Value>) -> Result<(), ValidationError> {
    require_string(content, "text").map_err(|e| prefix(e, "content"))?;

    let glossary = require_array(content, "glossary").map_err(|e| prefix(e, "content"))?;
    if glossary.is_empty() {
        return Err(ValidationError::Empty {
            field: "content.glossary".into(),
        });
    }
    for item in glossary {
        let entry = item
            .as_object()
            .ok_or_else(|| wrong_type("content.glossary", "an array of objects"))?;
        for field in ["word", "translation"] {
            require_string(entry, field).map_err(|e| prefix(e, "content.glossary"))?;
        }
    }
    Ok(())
}

fn check_exercises(content: &Map<String, Value>) -> Result<(), ValidationError> {
    let exercises = require_array(content, "exercises").map_err(|e| prefix(e, "content"))?;
    if exercises.len() != EXERCISES_PER_LESSON {
        return Err(ValidationError::ExerciseCount {
            expected: EXERCISES_PER_LESSON,
            actual: exercises.len(),
        });
    }

    for (index, exercise) in exercises.iter().enumerate() {
        let entry = exercise
            .as_object()
            .ok_or_else(|| wrong_type("content.exercises", "an array of objects"))?;
        let id = entry
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("#{}", index + 1));

        check_exercise(entry, &id)?;
    }
    Ok(())
}

fn check_exercise(entry: &Map<String, Value>, id: &str) -> Result<(), ValidationError> {
    let kind = exercise_field(entry, id, "type")?;
    exercise_field(entry, id, "question")?;
    exercise_field(entry, id, "explanation")?;

    let answer = entry
        .get("correct_answer")
        .ok_or_else(|| exercise_error(id, "missing correct_answer"))?;

    match kind.as_str() {
        "multiple_choice" => {
            let options = entry
                .get("options")
                .and_then(Value::as_array)
                .ok_or_else(|| exercise_error(id, "multiple_choice requires an options array"))?;
            if options.len() < 2 {
                return Err(exercise_error(id, "needs at least 2 options"));
            }
            if options.iter().any(|o| !o.is_string()) {
                return Err(exercise_error(id, "options must all be strings"));
            }
            let index = answer
                .as_u64()
                .ok_or_else(|| exercise_error(id, "correct_answer must be an option index"))?;
            if index as usize >= options.len() {
                return Err(exercise_error(id, "correct_answer index out of range"));
            }
        }
        "true_false" => {
            let truthy = match answer {
                Value::Bool(_) => true,
                Value::String(s) => {
                    matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "false")
                }
                _ => false,
            };
            if !truthy {
                return Err(exercise_error(id, "correct_answer must be true or false"));
            }
        }
        _ => {
            // fill_blank, translate, correct_mistake, short_answer, matching
            if answer.as_str().map_or(true, |s| s.trim().is_empty()) {
                return Err(exercise_error(id, "correct_answer must be a non-empty string"));
            }
        }
    }
    Ok(())
}

fn exercise_field(
    entry: &Map<String, Value>,
    id: &str,
    field: &str,
) -> Result<String, ValidationError> {
    entry
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| exercise_error(id, &format!("missing or empty `{field}`")))
}

fn exercise_error(id: &str, problem: &str) -> ValidationError {
    ValidationError::Exercise {
        id: id.to_string(),
        problem: problem.to_string(),
    }
}

fn as_object<'a>(
    value: &'a Value,
    what: &'static str,
) -> Result<&'a Map<String, Value>, ValidationError> {
    value.as_object().ok_or(ValidationError::WrongType {
        field: what.to_string(),
        expected: "a JSON object",
    })
}

fn require_string(object: &Map<String, Value>, field: &str) -> Result<String, ValidationError> {
    let value = object.get(field).ok_or_else(|| missing(field))?;
    let text = value
        .as_str()
        .ok_or_else(|| wrong_type(field, "a string"))?;
    if text.trim().is_empty() {
        return Err(ValidationError::Empty {
            field: field.to_string(),
        });
    }
    Ok(text.to_string())
}

fn require_array<'a>(
    object: &'a Map<String, Value>,
    field: &str,
) -> Result<&'a Vec<Value>, ValidationError> {
    object
        .get(field)
        .ok_or_else(|| missing(field))?
        .as_array()
        .ok_or_else(|| wrong_type(field, "an array"))
}

fn missing(field: &str) -> ValidationError {
    ValidationError::MissingField {
        field: field.to_string(),
    }
}

fn wrong_type(field: &str, expected: &'static str) -> ValidationError {
    ValidationError::WrongType {
        field: field.to_string(),
        expected,
    }
}

fn prefix(error: ValidationError, parent: &str) -> ValidationError {
    match error {
        ValidationError::MissingField { field } => ValidationError::MissingField {
            field: format!("{parent}.{field}"),
        },
        ValidationError::WrongType { field, expected } => ValidationError::WrongType {
            field: format!("{parent}.{field}"),
            expected,
        },
        ValidationError::Empty { field } => ValidationError::Empty {
            field: format!("{parent}.{field}"),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata_json() -> String {
        json!({
            "title": "Past Simple",
            "description": "Finished actions in the past",
            "level": "B1",
            "difficulty_level": 3,
            "grammar_topic": "past_simple"
        })
        .to_string()
    }

    fn exercises() -> Value {
        json!([
            {"id": "ex1", "type": "fill_blank", "question": "She ___ (work).",
             "correct_answer": "worked", "explanation": "Regular verb"},
            {"id": "ex2", "type": "multiple_choice", "question": "Pick one.",
             "options": ["go", "went"], "correct_answer": 1, "explanation": "Past form"},
            {"id": "ex3", "type": "correct_mistake", "question": "He don't like it.",
             "correct_answer": "doesn't", "explanation": "Third person"},
            {"id": "ex4", "type": "true_false", "question": "Past simple uses -ed.",
             "correct_answer": "true", "explanation": "For regular verbs"},
            {"id": "ex5", "type": "fill_blank", "question": "We ___ (play).",
             "correct_answer": "played", "explanation": "Regular verb"}
        ])
    }

    fn grammar_lesson_json() -> String {
        json!({
            "lesson_type": "grammar",
            "title": "Past Simple Basics",
            "content": {
                "rule": {
                    "title": "Past Simple",
                    "explanation": "Use for finished actions.",
                    "examples": ["I worked yesterday", "She didn't call"]
                },
                "exercises": exercises()
            }
        })
        .to_string()
    }

    #[test]
    fn accepts_plain_metadata_json() {
        let metadata = block_metadata(&metadata_json()).expect("valid");
        assert_eq!(metadata.title, "Past Simple");
        assert_eq!(metadata.level, CefrLevel::B1);
        assert_eq!(metadata.difficulty, 3);
    }

    #[test]
    fn accepts_fenced_metadata_json() {
        let fenced = format!("```json\n{}\n```", metadata_json());
        assert!(block_metadata(&fenced).is_ok());
    }

    #[test]
    fn accepts_prose_wrapped_json() {
        let wrapped = format!("Here is the block you asked for:\n{}\nHope it helps!", metadata_json());
        assert!(block_metadata(&wrapped).is_ok());
    }

    #[test]
    fn rejects_missing_grammar_topic() {
        let raw = json!({
            "title": "t", "description": "d", "level": "A1", "difficulty_level": 1
        })
        .to_string();
        let error = block_metadata(&raw).expect_err("invalid");
        assert!(matches!(error, ValidationError::MissingField { field } if field == "grammar_topic"));
    }

    #[test]
    fn rejects_unknown_level_and_bad_difficulty() {
        let raw = json!({
            "title": "t", "description": "d", "level": "Z9",
            "difficulty_level": 3, "grammar_topic": "x"
        })
        .to_string();
        assert!(matches!(block_metadata(&raw), Err(ValidationError::UnknownLevel { .. })));

        let raw = json!({
            "title": "t", "description": "d", "level": "A2",
            "difficulty_level": 7, "grammar_topic": "x"
        })
        .to_string();
        assert!(matches!(block_metadata(&raw), Err(ValidationError::DifficultyRange { value: 7 })));
    }

    #[test]
    fn accepts_valid_grammar_lesson() {
        let draft = lesson(&grammar_lesson_json(), LessonKind::Grammar).expect("valid");
        assert_eq!(draft.kind, LessonKind::Grammar);
        assert_eq!(draft.duration_minutes, DEFAULT_LESSON_MINUTES);
        assert!(draft.content.get("rule").is_some());
    }

    #[test]
    fn rejects_kind_mismatch() {
        let error = lesson(&grammar_lesson_json(), LessonKind::Reading).expect_err("mismatch");
        assert!(matches!(
            error,
            ValidationError::KindMismatch { expected: LessonKind::Reading, .. }
        ));
    }

    #[test]
    fn rejects_wrong_exercise_count() {
        let raw = json!({
            "lesson_type": "grammar",
            "title": "t",
            "content": {
                "rule": {"title": "r", "explanation": "e", "examples": ["x"]},
                "exercises": [
                    {"id": "ex1", "type": "fill_blank", "question": "q",
                     "correct_answer": "a", "explanation": "e"}
                ]
            }
        })
        .to_string();
        let error = lesson(&raw, LessonKind::Grammar).expect_err("too few");
        assert!(matches!(error, ValidationError::ExerciseCount { expected: 5, actual: 1 }));
    }

    #[test]
    fn rejects_out_of_range_choice_index() {
        let mut bad = exercises();
        bad[1]["correct_answer"] = json!(9);
        let raw = json!({
            "lesson_type": "grammar",
            "title": "t",
            "content": {
                "rule": {"title": "r", "explanation": "e", "examples": ["x"]},
                "exercises": bad
            }
        })
        .to_string();
        let error = lesson(&raw, LessonKind::Grammar).expect_err("bad index");
        assert!(matches!(error, ValidationError::Exercise { .. }));
    }

    #[test]
    fn rejects_vocabulary_without_words() {
        let raw = json!({
            "lesson_type": "vocabulary",
            "title": "t",
            "content": {"words": [], "exercises": exercises()}
        })
        .to_string();
        let error = lesson(&raw, LessonKind::Vocabulary).expect_err("empty words");
        assert!(matches!(error, ValidationError::Empty { field } if field == "content.words"));
    }

    #[test]
    fn reading_requires_text_and_glossary() {
        let raw = json!({
            "lesson_type": "reading",
            "title": "t",
            "content": {"glossary": [{"word": "w", "translation": "t"}], "exercises": exercises()}
        })
        .to_string();
        let error = lesson(&raw, LessonKind::Reading).expect_err("no text");
        assert!(matches!(error, ValidationError::MissingField { field } if field == "content.text"));
    }

    #[test]
    fn malformed_duration_is_rejected_but_absent_defaults() {
        let mut value: Value = serde_json::from_str(&grammar_lesson_json()).expect("json");
        value["duration_minutes"] = json!("soon");
        let error = lesson(&value.to_string(), LessonKind::Grammar).expect_err("bad duration");
        assert!(matches!(error, ValidationError::WrongType { field, .. } if field == "duration_minutes"));

        value["duration_minutes"] = json!(20);
        let draft = lesson(&value.to_string(), LessonKind::Grammar).expect("valid");
        assert_eq!(draft.duration_minutes, 20);
    }

    #[test]
    fn garbage_has_no_json() {
        assert!(matches!(extract_json("no braces here"), Err(ValidationError::NoJson)));
    }
}
