//! Message model and ingress validation.
//!
//! Incoming push records are validated here, before they can reach the
//! admission queue. A validated `Message` carries everything the scheduler
//! needs; its sequence number is assigned at admission.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

pub const MAX_SOURCE_CHARS: usize = 100;
pub const MAX_TARGET_CHARS: usize = 100;
pub const MAX_CONTEXT_CHARS: usize = 10_000;
pub const MAX_SUMMARY_CHARS: usize = 1_000;

pub const DEFAULT_PROJECT: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// Numeric rank used for ordering: lower is served first.
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "high" => Some(Self::High),
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Stop,
    Error,
    Narration,
    Info,
}

impl MessageKind {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "stop" => Some(Self::Stop),
            "error" => Some(Self::Error),
            "narration" => Some(Self::Narration),
            "info" => Some(Self::Info),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Error => "error",
            Self::Narration => "narration",
            Self::Info => "info",
        }
    }
}

/// Shared monotonically increasing sequence source.
///
/// Push messages and narration requests draw from the same counter so
/// sequence numbers order the whole pipeline.
#[derive(Debug, Clone, Default)]
pub struct Sequencer(Arc<AtomicU64>);

impl Sequencer {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// A unit of spoken content.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sequence: u64,
    pub source: String,
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree: Option<String>,
    pub session_id: String,
    pub priority: Priority,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spoken_text: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    /// Monotonic admission instant; drives the dedup window.
    #[serde(skip)]
    pub admitted: Instant,
}

impl Message {
    /// Build a message with defaults for everything but the identity fields.
    pub fn new(source: impl Into<String>, project: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            source: source.into(),
            project: project.into(),
            branch: None,
            worktree: None,
            session_id: session_id.into(),
            priority: Priority::Normal,
            kind: MessageKind::Info,
            context: None,
            summary: None,
            spoken_text: None,
            enqueued_at: Utc::now(),
            admitted: Instant::now(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Text handed to the summarizer: raw context first, then the summary.
    pub fn raw_text(&self) -> &str {
        self.context
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .or(self.summary.as_deref())
            .unwrap_or("")
    }

    /// Whether `target` names this message's source or project.
    pub fn matches_target(&self, target: &str) -> bool {
        self.source == target || self.project == target
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("source is required")]
    MissingSource,

    #[error("{field} exceeds {max} characters")]
    TooLong { field: &'static str, max: usize },

    #[error("either context or summary is required")]
    MissingContent,

    #[error("invalid priority: {0}")]
    InvalidPriority(String),

    #[error("invalid type: {0}")]
    InvalidKind(String),

    #[error("target is required")]
    MissingTarget,
}

/// Push-path record as received over HTTP.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingMessage {
    pub source: Option<String>,
    pub project: Option<String>,
    pub branch: Option<String>,
    pub worktree: Option<String>,
    pub session_id: Option<String>,
    pub priority: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub context: Option<String>,
    pub summary: Option<String>,
}

impl IncomingMessage {
    /// Check field presence, lengths and enums, producing an unadmitted `Message`.
    pub fn validate(self) -> Result<Message, ValidationError> {
        let source = self
            .source
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(ValidationError::MissingSource)?;
        check_len("source", &source, MAX_SOURCE_CHARS)?;

        let context = non_empty(self.context);
        let summary = non_empty(self.summary);
        if let Some(context) = &context {
            check_len("context", context, MAX_CONTEXT_CHARS)?;
        }
        if let Some(summary) = &summary {
            check_len("summary", summary, MAX_SUMMARY_CHARS)?;
        }
        if context.is_none() && summary.is_none() {
            return Err(ValidationError::MissingContent);
        }

        let priority = match self.priority.as_deref() {
            None => Priority::Normal,
            Some(p) => Priority::parse(p).ok_or_else(|| ValidationError::InvalidPriority(p.into()))?,
        };
        let kind = match self.kind.as_deref() {
            None => MessageKind::Info,
            Some(k) => MessageKind::parse(k).ok_or_else(|| ValidationError::InvalidKind(k.into()))?,
        };

        let project = non_empty(self.project).unwrap_or_else(|| DEFAULT_PROJECT.into());
        let enqueued_at = Utc::now();
        let session_id = non_empty(self.session_id)
            .unwrap_or_else(|| format!("{source}-{}", enqueued_at.timestamp_millis()));

        Ok(Message {
            sequence: 0,
            source,
            project,
            branch: non_empty(self.branch),
            worktree: non_empty(self.worktree),
            session_id,
            priority,
            kind,
            context,
            summary,
            spoken_text: None,
            enqueued_at,
            admitted: Instant::now(),
        })
    }
}

/// Validate a mute/history target: `"all"` or a name of at most 100 chars.
pub fn validate_target(target: &str) -> Result<String, ValidationError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(ValidationError::MissingTarget);
    }
    check_len("target", target, MAX_TARGET_CHARS)?;
    Ok(target.to_string())
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        Err(ValidationError::TooLong { field, max })
    } else {
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(source: &str) -> IncomingMessage {
        IncomingMessage {
            source: Some(source.into()),
            context: Some("Refactored the parser.".into()),
            ..IncomingMessage::default()
        }
    }

    #[test]
    fn defaults_are_filled_in() {
        let msg = incoming("claude").validate().unwrap();
        assert_eq!(msg.project, DEFAULT_PROJECT);
        assert_eq!(msg.priority, Priority::Normal);
        assert_eq!(msg.kind, MessageKind::Info);
        assert!(msg.session_id.starts_with("claude-"));
    }

    #[test]
    fn missing_source_rejected() {
        let err = incoming("   ").validate().unwrap_err();
        assert_eq!(err, ValidationError::MissingSource);
    }

    #[test]
    fn source_length_counts_chars() {
        assert!(incoming(&"é".repeat(100)).validate().is_ok());
        let err = incoming(&"a".repeat(101)).validate().unwrap_err();
        assert_eq!(err, ValidationError::TooLong { field: "source", max: 100 });
    }

    #[test]
    fn needs_context_or_summary() {
        let msg = IncomingMessage {
            source: Some("codex".into()),
            context: Some("  ".into()),
            ..IncomingMessage::default()
        };
        assert_eq!(msg.validate().unwrap_err(), ValidationError::MissingContent);

        let msg = IncomingMessage {
            source: Some("codex".into()),
            summary: Some("Tests pass.".into()),
            ..IncomingMessage::default()
        };
        assert_eq!(msg.validate().unwrap().raw_text(), "Tests pass.");
    }

    #[test]
    fn oversized_summary_rejected() {
        let msg = IncomingMessage {
            source: Some("codex".into()),
            summary: Some("x".repeat(MAX_SUMMARY_CHARS + 1)),
            ..IncomingMessage::default()
        };
        assert!(matches!(
            msg.validate(),
            Err(ValidationError::TooLong { field: "summary", .. })
        ));
    }

    #[test]
    fn enums_are_checked() {
        let mut msg = incoming("claude");
        msg.priority = Some("urgent".into());
        assert_eq!(
            msg.validate().unwrap_err(),
            ValidationError::InvalidPriority("urgent".into())
        );

        let mut msg = incoming("claude");
        msg.kind = Some("stop".into());
        msg.priority = Some("high".into());
        let msg = msg.validate().unwrap();
        assert_eq!(msg.kind, MessageKind::Stop);
        assert_eq!(msg.priority, Priority::High);
    }

    #[test]
    fn target_validation() {
        assert_eq!(validate_target(" all ").unwrap(), "all");
        assert_eq!(validate_target("").unwrap_err(), ValidationError::MissingTarget);
        assert!(validate_target(&"t".repeat(101)).is_err());
    }

    #[test]
    fn sequencer_is_shared_between_clones() {
        let seq = Sequencer::default();
        let other = seq.clone();
        assert_eq!(seq.next(), 1);
        assert_eq!(other.next(), 2);
    }
}
