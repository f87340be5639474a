//! Summarization: condenses raw agent output into one or two spoken sentences.
//!
//! `OllamaSummarizer` calls a local Ollama model. Callers fall back to
//! `fallback_truncate` when the summarizer errors or times out.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info};

const SUMMARIZE_PROMPT: &str = r#"You are {personality}, narrating a coding agent's work out loud.
Summarize the text below in 1-2 short sentences suitable for text-to-speech. Be concise and conversational.
If nothing in it is worth saying out loud, reply with exactly SKIP.
Output ONLY the summary, nothing else.

Text: {text}

Summary:"#;

const SKIP_MARKER: &str = "SKIP";
const MAX_INPUT_CHARS: usize = 4000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Summary {
    Speak(String),
    /// Nothing worth saying.
    Nothing,
}

#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("summarizer request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("summarizer returned status {0}")]
    Status(u16),

    #[error("summarizer returned an empty response")]
    Empty,

    #[error("summarizer unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, text: &str, personality: &str) -> Result<Summary, SummarizeError>;
}

pub struct OllamaSummarizer {
    model: String,
    host: String,
    client: Client,
}

impl OllamaSummarizer {
    pub fn new(model: &str, host: &str, timeout: Duration) -> Result<Self, SummarizeError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            model: model.to_string(),
            host: host.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn summarize(&self, text: &str, personality: &str) -> Result<Summary, SummarizeError> {
        let t_start = Instant::now();

        let input: String = text.chars().take(MAX_INPUT_CHARS).collect();
        let prompt = SUMMARIZE_PROMPT
            .replace("{personality}", personality)
            .replace("{text}", &input);

        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": 0.3,
                "num_predict": 200
            }
        });

        let url = format!("{}/api/generate", self.host);
        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(SummarizeError::Status(resp.status().as_u16()));
        }

        let data: serde_json::Value = resp.json().await?;
        let latency_ms = t_start.elapsed().as_secs_f64() * 1000.0;
        let summary = interpret_response(data["response"].as_str().unwrap_or(""))?;
        match &summary {
            Summary::Speak(result) => info!(
                "Summarized {} chars → {} chars ({latency_ms:.0}ms)",
                text.chars().count(),
                result.chars().count()
            ),
            Summary::Nothing => debug!("Summarizer found nothing to say ({latency_ms:.0}ms)"),
        }
        Ok(summary)
    }
}

fn interpret_response(raw: &str) -> Result<Summary, SummarizeError> {
    let result = raw.trim().trim_matches('"').trim();
    if result.is_empty() {
        return Err(SummarizeError::Empty);
    }
    if result.trim_end_matches('.').eq_ignore_ascii_case(SKIP_MARKER) {
        return Ok(Summary::Nothing);
    }
    Ok(Summary::Speak(result.to_string()))
}

/// Local fallback: first two sentences, capped at `max_chars`.
pub fn fallback_truncate(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let mut count = 0;
    let mut end = text.len();
    for (i, b) in text.bytes().enumerate() {
        if b == b'.' || b == b'!' || b == b'?' {
            count += 1;
            if count >= 2 {
                end = i + 1;
                break;
            }
        }
    }
    text[..end].chars().take(max_chars).collect()
}
