//! EcoBot: a stateless question/answer client plus the per-category recycling tips.

use std::collections::HashMap;

use lazy_static::lazy_static;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::AssistantConfig;

pub const SYSTEM_PROMPT: &str =
    "You are EcoBot, an assistant who is an expert in recycling, ecology and waste sorting.";

const DEFAULT_TIP: &str = "Keep sorting smartly to protect the planet.";

lazy_static! {
    static ref ECO_TIPS: HashMap<&'static str, &'static str> = {
        let mut tips = HashMap::new();
        tips.insert("plastic", "Rinse plastic bottles and tubs before throwing them away.");
        tips.insert("paper", "Remove staples and tape so the paper recycles better.");
        tips.insert("metal", "Crush cans to save space and make sorting easier.");
        tips.insert("glass", "Throw glass away without caps or lids, and keep tableware out.");
        tips.insert("cardboard", "Flatten boxes before throwing them away; it makes transport cheaper.");
        tips.insert("trash", "This waste is not recyclable. Try to use less of it.");
        tips
    };
}

/// Recycling advice for a predicted category, or a generic tip for unknown ones.
pub fn eco_tip(label: &str) -> &'static str {
    ECO_TIPS.get(label).copied().unwrap_or(DEFAULT_TIP)
}

#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("Question cannot be empty")]
    EmptyQuestion,
    #[error("Request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Assistant returned status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("Assistant returned no answer")]
    EmptyResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self { role: role.to_string(), content: content.into() }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatAssistant {
    config: AssistantConfig,
    client: reqwest::Client,
}

impl ChatAssistant {
    pub fn new(config: AssistantConfig) -> Self {
        Self { config, client: reqwest::Client::new() }
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    /// System persona followed by the single user question. Nothing is remembered
    /// between calls.
    pub fn build_messages(question: &str) -> Result<Vec<ChatMessage>, AssistantError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AssistantError::EmptyQuestion);
        }
        Ok(vec![
            ChatMessage::new("system", SYSTEM_PROMPT),
            ChatMessage::new("user", question),
        ])
    }

    pub async fn ask(&self, question: &str) -> Result<String, AssistantError> {
        let messages = Self::build_messages(question)?;
        let body = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        debug!("Sending question to {}", self.config.endpoint);
        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::HttpStatus { status: status.as_u16(), body });
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .filter(|answer| !answer.is_empty())
            .ok_or(AssistantError::EmptyResponse)
    }
}
