//! Generation service client.
//!
//! The [`Generator`] trait decouples the controller from the completion
//! backend. The concrete adapter speaks the OpenAI-style chat-completions
//! shape over HTTP with bounded retry, so the controller only ever sees a
//! final completion or a final infrastructure error.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::state::ChatMessage;

/// Abstraction over text-completion backends.
pub trait Generator {
    /// Return a completion for the given conversation.
    fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// HTTP chat-completions client.
pub struct HttpGenerator {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    max_retries: u32,
    retry_delay: Duration,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: &'a [ChatMessage],
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
    content: String,
}

impl HttpGenerator {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        temperature: f64,
        max_retries: u32,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            temperature,
            max_retries,
            retry_delay: Duration::from_secs(1),
        })
    }

    fn request_once(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = CompletionRequest {
            model: &self.model,
            temperature: self.temperature,
            messages,
        };
        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().context("send completion request")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(anyhow!("completion endpoint returned {status}: {text}"));
        }
        let parsed: CompletionResponse =
            response.json().context("parse completion response")?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("completion response contained no choices"))?;
        Ok(choice.message.content)
    }
}

impl Generator for HttpGenerator {
    #[instrument(skip_all, fields(model = %self.model, turns = messages.len()))]
    fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let attempts = self.max_retries.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.request_once(messages) {
                Ok(content) => {
                    debug!(attempt, chars = content.len(), "completion received");
                    return Ok(content);
                }
                Err(err) => {
                    warn!(attempt, %err, "completion request failed");
                    last_err = Some(err);
                    if attempt < attempts {
                        thread::sleep(self.retry_delay);
                    }
                }
            }
        }
        Err(last_err.expect("at least one attempt ran"))
            .context("completion endpoint unreachable after retries")
    }
}
