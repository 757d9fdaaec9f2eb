//! Lesson-block generation: domain types and the pipeline coordinator.
//!
//! A block is four model calls: one for metadata, then one per lesson kind
//! (grammar, vocabulary, reading) issued in parallel. All three lessons
//! must validate before anything is persisted.

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;
use std::thread;

use crate::config::TokenBudgets;
use crate::logging::{LogLevel, LogRecord, LogSink};
use crate::prompts::{PromptError, PromptRegistry};
use crate::store::{BlockId, BlockStore, StoreError};
use crate::validate::{self, ValidationError};

pub mod prompt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CefrLevel {
    A1,
    A2,
    B1,
    B2,
    C1,
    C2,
}

impl CefrLevel {
    pub const ALL: [CefrLevel; 6] = [
        CefrLevel::A1,
        CefrLevel::A2,
        CefrLevel::B1,
        CefrLevel::B2,
        CefrLevel::C1,
        CefrLevel::C2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CefrLevel::A1 => "A1",
            CefrLevel::A2 => "A2",
            CefrLevel::B1 => "B1",
            CefrLevel::B2 => "B2",
            CefrLevel::C1 => "C1",
            CefrLevel::C2 => "C2",
        }
    }
}

impl fmt::Display for CefrLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseLevelError(pub String);

impl fmt::Display for ParseLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown CEFR level `{}`, expected one of A1..C2", self.0)
    }
}

impl StdError for ParseLevelError {}

impl FromStr for CefrLevel {
    type Err = ParseLevelError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_uppercase().as_str() {
            "A1" => Ok(CefrLevel::A1),
            "A2" => Ok(CefrLevel::A2),
            "B1" => Ok(CefrLevel::B1),
            "B2" => Ok(CefrLevel::B2),
            "C1" => Ok(CefrLevel::C1),
            "C2" => Ok(CefrLevel::C2),
            other => Err(ParseLevelError(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonKind {
    Grammar,
    Vocabulary,
    Reading,
}

impl LessonKind {
    /// Fixed block order: grammar first, then vocabulary, then reading.
    pub const ALL: [LessonKind; 3] = [
        LessonKind::Grammar,
        LessonKind::Vocabulary,
        LessonKind::Reading,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LessonKind::Grammar => "grammar",
            LessonKind::Vocabulary => "vocabulary",
            LessonKind::Reading => "reading",
        }
    }

    pub fn prompt_key(&self) -> &'static str {
        match self {
            LessonKind::Grammar => "grammar_lesson",
            LessonKind::Vocabulary => "vocabulary_lesson",
            LessonKind::Reading => "reading_lesson",
        }
    }

    /// 1-based position inside the block.
    pub fn order(&self) -> u32 {
        match self {
            LessonKind::Grammar => 1,
            LessonKind::Vocabulary => 2,
            LessonKind::Reading => 3,
        }
    }
}

impl fmt::Display for LessonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct LanguageModelError {
    inner: Box<dyn StdError + Send + Sync>,
}

impl LanguageModelError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Box::new(error),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            inner: message.into().into(),
        }
    }

    pub fn as_inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.inner.as_ref()
    }
}

impl fmt::Display for LanguageModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for LanguageModelError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.inner.as_ref())
    }
}

/// One outbound call to a text-generation endpoint. Implementations do not
/// retry; a failed call is reported as-is and the caller decides.
pub trait LanguageModel: Send + Sync {
    fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, LanguageModelError>;
}

/// Input for one block generation. Created per invocation, never persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationRequest {
    pub user_id: String,
    pub level: CefrLevel,
    pub topic: String,
    /// Optional free-text steering for the metadata prompt.
    pub guidance: String,
}

impl GenerationRequest {
    pub fn new(user_id: impl Into<String>, level: CefrLevel, topic: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            level,
            topic: topic.into(),
            guidance: String::new(),
        }
    }
}

/// Free-text learner profile used to personalize prompts.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnerProfile {
    #[serde(default)]
    pub about: String,
    #[serde(default)]
    pub interests: String,
    #[serde(default)]
    pub learning_goals: String,
}

fn default_difficulty() -> u8 {
    1
}

/// Snapshot of the learner's progress, supplied by the surrounding
/// application. Drives difficulty-dependent prompt parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSummary {
    /// Block difficulty within the level, 1..=5.
    #[serde(default = "default_difficulty")]
    pub difficulty: u8,
    /// Grammar topics of earlier blocks, excluded from new metadata.
    #[serde(default)]
    pub covered_topics: Vec<String>,
    #[serde(default)]
    pub passed_blocks: u32,
    #[serde(default)]
    pub grammar_score: u8,
    #[serde(default)]
    pub vocabulary_score: u8,
    #[serde(default)]
    pub reading_score: u8,
}

impl Default for ProgressSummary {
    fn default() -> Self {
        Self {
            difficulty: default_difficulty(),
            covered_topics: Vec::new(),
            passed_blocks: 0,
            grammar_score: 0,
            vocabulary_score: 0,
            reading_score: 0,
        }
    }
}

/// Output of the first model call, validated before any lesson prompt is
/// built from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub title: String,
    pub description: String,
    pub level: CefrLevel,
    #[serde(rename = "difficulty_level")]
    pub difficulty: u8,
    pub grammar_topic: String,
}

/// One validated lesson, ready for persistence inside a block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LessonDraft {
    #[serde(rename = "lesson_type")]
    pub kind: LessonKind,
    pub title: String,
    pub content: serde_json::Value,
    pub duration_minutes: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockStage {
    Metadata,
    Lesson(LessonKind),
    Persist,
}

impl fmt::Display for BlockStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockStage::Metadata => f.write_str("block metadata"),
            BlockStage::Lesson(kind) => write!(f, "{kind} lesson"),
            BlockStage::Persist => f.write_str("block persistence"),
        }
    }
}

/// Terminal verdict of a failed pipeline run, one per failure class.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureReason {
    MetadataInvalid,
    LessonsInvalid,
    GenerationError,
    PersistError,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureReason::MetadataInvalid => "metadata_invalid",
            FailureReason::LessonsInvalid => "lessons_invalid",
            FailureReason::GenerationError => "generation_error",
            FailureReason::PersistError => "persist_error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error("failed to render prompt for {stage}: {source}")]
    Prompt {
        stage: BlockStage,
        #[source]
        source: PromptError,
    },
    #[error("language model invocation failed for {stage}: {source}")]
    Model {
        stage: BlockStage,
        #[source]
        source: LanguageModelError,
    },
    #[error("{stage} response failed validation: {source}")]
    Validation {
        stage: BlockStage,
        #[source]
        source: ValidationError,
    },
    #[error("failed to persist lesson block: {0}")]
    Persist(#[from] StoreError),
}

impl BlockError {
    pub fn reason(&self) -> FailureReason {
        match self {
            BlockError::Validation {
                stage: BlockStage::Metadata,
                ..
            } => FailureReason::MetadataInvalid,
            BlockError::Validation { .. } => FailureReason::LessonsInvalid,
            BlockError::Prompt { .. } | BlockError::Model { .. } => FailureReason::GenerationError,
            BlockError::Persist(_) => FailureReason::PersistError,
        }
    }
}

struct LessonJob {
    kind: LessonKind,
    prompt: String,
    max_tokens: u32,
}

/// Coordinates the whole pipeline. Holds no mutable state; every
/// invocation is independent and may run concurrently with others.
pub struct BlockGenerator<'a> {
    prompts: &'a PromptRegistry,
    sink: &'a dyn LogSink,
    budgets: TokenBudgets,
}

impl<'a> BlockGenerator<'a> {
    pub fn new(prompts: &'a PromptRegistry, sink: &'a dyn LogSink) -> Self {
        Self {
            prompts,
            sink,
            budgets: TokenBudgets::default(),
        }
    }

    pub fn with_budgets(mut self, budgets: TokenBudgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// Runs one request through metadata generation, the parallel lesson
    /// calls, validation, and the single atomic store write. Exactly
    /// 1 + 3 model calls, no retries.
    pub fn generate<M>(
        &self,
        model: &M,
        store: &dyn BlockStore,
        request: &GenerationRequest,
        profile: &LearnerProfile,
        progress: &ProgressSummary,
    ) -> Result<BlockId, BlockError>
    where
        M: LanguageModel + ?Sized,
    {
        self.log(
            LogLevel::Info,
            format!(
                "block generation started for user `{}` (level {}, topic `{}`)",
                request.user_id, request.level, request.topic
            ),
        );

        let metadata = self.generate_metadata(model, request, profile, progress)?;
        let drafts = self.generate_lessons(model, &metadata, profile, progress)?;

        let block_id = store
            .create_block_with_lessons(&request.user_id, &metadata, &drafts)
            .map_err(|source| self.fail(BlockError::Persist(source)))?;

        self.log(
            LogLevel::Info,
            format!(
                "persisted block {} (`{}`) for user `{}`",
                block_id, metadata.title, request.user_id
            ),
        );
        Ok(block_id)
    }

    fn generate_metadata<M>(
        &self,
        model: &M,
        request: &GenerationRequest,
        profile: &LearnerProfile,
        progress: &ProgressSummary,
    ) -> Result<BlockMetadata, BlockError>
    where
        M: LanguageModel + ?Sized,
    {
        self.log(LogLevel::Info, "metadata pending: requesting block metadata");

        let args = prompt::block_info_arguments(request, profile, progress);
        let rendered = self
            .prompts
            .format("block_info", &args)
            .map_err(|source| {
                self.fail(BlockError::Prompt {
                    stage: BlockStage::Metadata,
                    source,
                })
            })?;

        let raw = model
            .generate(&rendered, self.budgets.metadata)
            .map_err(|source| {
                self.fail(BlockError::Model {
                    stage: BlockStage::Metadata,
                    source,
                })
            })?;

        let metadata = validate::block_metadata(&raw).map_err(|source| {
            self.fail(BlockError::Validation {
                stage: BlockStage::Metadata,
                source,
            })
        })?;

        self.log(
            LogLevel::Info,
            format!(
                "metadata ok: `{}` ({}, difficulty {})",
                metadata.title, metadata.grammar_topic, metadata.difficulty
            ),
        );
        Ok(metadata)
    }

    fn generate_lessons<M>(
        &self,
        model: &M,
        metadata: &BlockMetadata,
        profile: &LearnerProfile,
        progress: &ProgressSummary,
    ) -> Result<Vec<LessonDraft>, BlockError>
    where
        M: LanguageModel + ?Sized,
    {
        let mut jobs = Vec::with_capacity(LessonKind::ALL.len());
        for kind in LessonKind::ALL {
            let args = prompt::lesson_arguments(kind, metadata, profile, progress);
            let rendered = self.prompts.format(kind.prompt_key(), &args).map_err(|source| {
                self.fail(BlockError::Prompt {
                    stage: BlockStage::Lesson(kind),
                    source,
                })
            })?;
            jobs.push(LessonJob {
                kind,
                prompt: rendered,
                max_tokens: self.budgets.for_lesson(kind),
            });
        }

        self.log(
            LogLevel::Info,
            "lessons pending: dispatching 3 lesson calls in parallel",
        );

        // Fan-out/fan-in barrier. Each thread owns its prompt and writes
        // only its own result slot; a failing call never cancels its
        // siblings, their results are joined and then discarded.
        let results: Vec<Result<String, LanguageModelError>> = thread::scope(|scope| {
            let handles: Vec<_> = jobs
                .iter()
                .map(|job| scope.spawn(move || model.generate(&job.prompt, job.max_tokens)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(LanguageModelError::message("lesson generation thread panicked"))
                    })
                })
                .collect()
        });

        let mut drafts = Vec::with_capacity(jobs.len());
        for (job, result) in jobs.iter().zip(results) {
            let raw = result.map_err(|source| {
                self.fail(BlockError::Model {
                    stage: BlockStage::Lesson(job.kind),
                    source,
                })
            })?;
            let draft = validate::lesson(&raw, job.kind).map_err(|source| {
                self.fail(BlockError::Validation {
                    stage: BlockStage::Lesson(job.kind),
                    source,
                })
            })?;
            self.log(
                LogLevel::Info,
                format!("{} lesson validated: `{}`", draft.kind, draft.title),
            );
            drafts.push(draft);
        }

        self.log(LogLevel::Info, "lessons ok: all 3 lessons validated");
        Ok(drafts)
    }

    fn fail(&self, error: BlockError) -> BlockError {
        self.log(
            LogLevel::Warn,
            format!("block generation failed ({}): {}", error.reason(), error),
        );
        error
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(LogRecord::new(level, message));
    }
}
