use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;

use crate::config::CompletionSettings;
use crate::types::ChatMessage;

/// Remote text completion: role-tagged messages in, one text out.
pub trait CompletionService: Send + Sync {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiClient {
    pub fn new(settings: &CompletionSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("building completion http client")?;
        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
        })
    }
}

impl CompletionService for OpenAiClient {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let payload = json!({
            "model": self.model,
            "messages": messages,
        });

        let res = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()?;
        let status = res.status();
        if !status.is_success() {
            let err_text = res.text().unwrap_or_default();
            return Err(anyhow!("completion API error: {} - {}", status, err_text));
        }

        let body: CompletionResponse = res.json()?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("completion API returned no choices"))
    }
}
