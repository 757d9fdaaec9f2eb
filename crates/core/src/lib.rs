pub mod block;
pub mod config;
pub mod logging;
pub mod prompts;
pub mod store;
pub mod validate;

pub use block::{
    BlockError, BlockGenerator, BlockMetadata, BlockStage, CefrLevel, FailureReason,
    GenerationRequest, LanguageModel, LanguageModelError, LearnerProfile, LessonDraft, LessonKind,
    ParseLevelError, ProgressSummary,
};
pub use config::{
    Config, ConfigError, ConfigStore, LlmConfig, PromptConfig, RecentUsage, TokenBudgets,
};
pub use logging::{
    LogLevel, LogRecord, LogSink, NullLogSink, SharedLogSink, StdoutLogSink, VecLogSink,
};
pub use prompts::{PromptArguments, PromptError, PromptRegistry, PromptTemplate};
pub use store::{
    check_draft_set, BlockId, BlockStore, MemoryBlockStore, StoreError, StoredBlock, StoredLesson,
};
pub use validate::{ValidationError, DEFAULT_LESSON_MINUTES, EXERCISES_PER_LESSON};
