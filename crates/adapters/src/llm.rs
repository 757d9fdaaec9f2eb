use std::time::Duration;

use log::warn;
use reqwest::blocking::Client;
use reqwest::header::{self, HeaderValue};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use lesson_core::config::{Config, LlmConfig};
use lesson_core::{LanguageModel, LanguageModelError};

use crate::base_url::normalize_base_url;
use crate::error::AdapterError;

/// Builds a model client from a named profile in the config.
pub fn create_llm_adapter(
    config: &Config,
    profile_name: &str,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let profile = config.get_llm_profile(profile_name).ok_or_else(|| {
        AdapterError::InvalidConfig(format!("unknown LLM profile `{profile_name}`"))
    })?;
    create_llm_adapter_from_profile(profile)
}

/// Dispatches on `interface_format`. Everything here speaks the OpenAI
/// chat-completions wire format; only the default base URL differs.
pub fn create_llm_adapter_from_profile(
    profile: &LlmConfig,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let format = profile.interface_format.trim().to_lowercase();

    let default_url = match format.as_str() {
        "openai" => "https://api.openai.com/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "ollama" => "http://localhost:11434/v1",
        "" | "custom" => "",
        other => {
            return Err(AdapterError::InvalidConfig(format!(
                "unknown interface_format: {other}"
            )))
        }
    };

    let base_url = if profile.base_url.trim().is_empty() {
        default_url.to_string()
    } else {
        normalize_base_url(&profile.base_url)
    };

    Ok(Box::new(ChatCompletionAdapter::new(
        base_url,
        optional_string(&profile.api_key),
        profile.model_name.clone(),
        profile.temperature,
        profile.timeout.max(1),
    )?))
}

fn optional_string(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Blocking client for OpenAI-compatible `/chat/completions` endpoints.
/// Exactly one outbound call per `generate`; retries are the caller's
/// decision, never the transport's.
#[derive(Debug)]
pub struct ChatCompletionAdapter {
    client: Client,
    url: String,
    api_key: Option<String>,
    model_name: String,
    temperature: f32,
}

impl ChatCompletionAdapter {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        model_name: String,
        temperature: f32,
        timeout_secs: u64,
    ) -> Result<Self, AdapterError> {
        if base_url.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "base_url must not be empty".to_string(),
            ));
        }
        if model_name.trim().is_empty() {
            return Err(AdapterError::InvalidConfig(
                "model_name must not be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
            model_name,
            temperature,
        })
    }

    fn call(&self, prompt: &str, max_tokens: u32) -> Result<String, AdapterError> {
        let body = ChatCompletionRequest {
            model: &self.model_name,
            messages: vec![ChatMessageRequest {
                role: "user",
                content: prompt,
            }],
            max_tokens: if max_tokens == 0 { None } else { Some(max_tokens) },
            temperature: self.temperature,
        };

        let mut request = self.client.post(&self.url).header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.json(&body).send()?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().unwrap_or_default();
            warn!("generation endpoint rate limited the request");
            return Err(AdapterError::RateLimited { body });
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(AdapterError::HttpStatus { status, body });
        }

        let parsed: ChatCompletionResponse = response.json()?;
        extract_choice_content(parsed).ok_or(AdapterError::EmptyResponse)
    }
}

impl LanguageModel for ChatCompletionAdapter {
    fn generate(&self, prompt: &str, max_tokens: u32) -> Result<String, LanguageModelError> {
        self.call(prompt, max_tokens).map_err(LanguageModelError::from)
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessageRequest<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessageRequest<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn extract_choice_content(response: ChatCompletionResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .filter_map(|choice| choice.message.and_then(|message| message.content))
        .find(|content| !content.trim().is_empty())
}
