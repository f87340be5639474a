//! Agent activity-log parsing.
//!
//! Understands Claude Code JSONL transcripts and a generic
//! `{"role": "assistant", "content": ...}` line shape. Only assistant
//! (generated) text is kept; user turns and tool blocks are ignored.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::warn;

/// Assistant text extracted from one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedActivity {
    pub text: String,
    /// Working directory recorded on the line, if any.
    pub cwd: Option<String>,
}

/// Parse one log line. Returns `None` for malformed JSON and non-assistant entries.
pub fn parse_activity_line(line: &str, max_chars: usize) -> Option<ParsedActivity> {
    let entry: Value = serde_json::from_str(line).ok()?;
    let text = assistant_text(&entry)?;
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(ParsedActivity {
        text: text.chars().take(max_chars).collect(),
        cwd: entry.get("cwd").and_then(Value::as_str).map(str::to_string),
    })
}

fn assistant_text(entry: &Value) -> Option<String> {
    let is_assistant = entry.get("type").and_then(Value::as_str) == Some("assistant")
        || entry.get("role").and_then(Value::as_str) == Some("assistant");
    if !is_assistant {
        return None;
    }

    let content = entry
        .get("message")
        .and_then(|m| m.get("content"))
        .or_else(|| entry.get("content"))?;

    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(blocks) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            if texts.is_empty() {
                None
            } else {
                Some(texts.join("\n"))
            }
        }
        _ => None,
    }
}

/// Extract the last assistant text message from a transcript file.
///
/// Walks the file backwards to find the most recent assistant message
/// with text content, truncated to `max_chars`.
pub fn extract_last_assistant_text(transcript_path: &Path, max_chars: usize) -> Option<String> {
    let contents = match fs::read_to_string(transcript_path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read transcript {}: {e}", transcript_path.display());
            return None;
        }
    };

    contents
        .lines()
        .rev()
        .find_map(|line| parse_activity_line(line, max_chars))
        .map(|parsed| parsed.text)
}
