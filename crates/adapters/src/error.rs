use lesson_core::LanguageModelError;
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to parse response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
    #[error("rate limited by the generation endpoint: {body}")]
    RateLimited { body: String },
    #[error("unexpected http status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },
    #[error("API returned an empty response")]
    EmptyResponse,
}

impl From<AdapterError> for LanguageModelError {
    fn from(error: AdapterError) -> Self {
        LanguageModelError::new(error)
    }
}
