//! Pure assembly of prompt arguments from request, profile, and progress.
//!
//! The difficulty tables come straight from the product: harder blocks get
//! more vocabulary words, longer reading texts, and trickier exercises.

use crate::block::{BlockMetadata, GenerationRequest, LearnerProfile, LessonKind, ProgressSummary};
use crate::prompts::PromptArguments;

const UNSPECIFIED: &str = "not specified";

pub fn exercise_difficulty(difficulty: u8) -> &'static str {
    match difficulty {
        1 => "simple, with obvious answers",
        2 => "simple",
        3 => "medium",
        4 => "medium, with non-obvious answers",
        _ => "hard, requiring real thought",
    }
}

pub fn vocabulary_word_count(difficulty: u8) -> u32 {
    match difficulty {
        1 => 10,
        2 => 12,
        3 => 13,
        4 => 15,
        _ => 18,
    }
}

pub fn reading_text_length(difficulty: u8) -> u32 {
    match difficulty {
        1 => 200,
        2 => 250,
        3 => 300,
        4 => 350,
        _ => 400,
    }
}

fn or_unspecified(value: &str) -> &str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        UNSPECIFIED
    } else {
        trimmed
    }
}

fn covered_topics_line(progress: &ProgressSummary) -> String {
    if progress.covered_topics.is_empty() {
        "none".to_string()
    } else {
        progress.covered_topics.join(", ")
    }
}

pub fn block_info_arguments(
    request: &GenerationRequest,
    profile: &LearnerProfile,
    progress: &ProgressSummary,
) -> PromptArguments {
    PromptArguments::from([
        ("level".to_string(), request.level.to_string()),
        ("difficulty".to_string(), progress.difficulty.to_string()),
        (
            "passed_blocks".to_string(),
            progress.passed_blocks.to_string(),
        ),
        ("about".to_string(), or_unspecified(&profile.about).to_string()),
        (
            "interests".to_string(),
            or_unspecified(&profile.interests).to_string(),
        ),
        (
            "learning_goals".to_string(),
            or_unspecified(&profile.learning_goals).to_string(),
        ),
        (
            "grammar_score".to_string(),
            progress.grammar_score.to_string(),
        ),
        (
            "vocabulary_score".to_string(),
            progress.vocabulary_score.to_string(),
        ),
        (
            "reading_score".to_string(),
            progress.reading_score.to_string(),
        ),
        ("covered_topics".to_string(), covered_topics_line(progress)),
        ("topic".to_string(), or_unspecified(&request.topic).to_string()),
        (
            "guidance".to_string(),
            or_unspecified(&request.guidance).to_string(),
        ),
    ])
}

pub fn lesson_arguments(
    kind: LessonKind,
    metadata: &BlockMetadata,
    profile: &LearnerProfile,
    progress: &ProgressSummary,
) -> PromptArguments {
    let mut args = PromptArguments::from([
        ("title".to_string(), metadata.title.clone()),
        ("level".to_string(), metadata.level.to_string()),
    ]);

    match kind {
        LessonKind::Grammar => {
            args.insert("grammar_topic".to_string(), metadata.grammar_topic.clone());
            args.insert(
                "exercise_difficulty".to_string(),
                exercise_difficulty(progress.difficulty).to_string(),
            );
        }
        LessonKind::Vocabulary => {
            args.insert(
                "interests".to_string(),
                or_unspecified(&profile.interests).to_string(),
            );
            args.insert(
                "word_count".to_string(),
                vocabulary_word_count(progress.difficulty).to_string(),
            );
        }
        LessonKind::Reading => {
            args.insert("grammar_topic".to_string(), metadata.grammar_topic.clone());
            args.insert(
                "interests".to_string(),
                or_unspecified(&profile.interests).to_string(),
            );
            args.insert(
                "learning_goals".to_string(),
                or_unspecified(&profile.learning_goals).to_string(),
            );
            args.insert(
                "text_length".to_string(),
                reading_text_length(progress.difficulty).to_string(),
            );
        }
    }

    args
}
