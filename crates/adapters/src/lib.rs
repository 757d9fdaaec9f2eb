mod base_url;
mod error;
mod llm;
mod store;

pub use base_url::normalize_base_url;
pub use error::AdapterError;
pub use llm::{create_llm_adapter, create_llm_adapter_from_profile, ChatCompletionAdapter};
pub use store::JsonFileStore;

pub use lesson_core::block::{LanguageModel, LanguageModelError};
pub use lesson_core::config::{Config, ConfigStore, LlmConfig};
