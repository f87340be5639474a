//! Narration aggregator: buffers observed activity and drains it into at
//! most one narration request per project.

use std::collections::HashMap;
use std::mem;

use chrono::Utc;
use tracing::debug;

use super::message::{Message, MessageKind, Priority, Sequencer};
use super::observer::ActivityRecord;

pub const NARRATION_SOURCE: &str = "observer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrationRequest {
    pub project: String,
    pub text: String,
}

impl NarrationRequest {
    pub fn into_message(self, sequencer: &Sequencer) -> Message {
        let session_id = format!("{NARRATION_SOURCE}-{}-{}", self.project, Utc::now().timestamp_millis());
        let mut msg = Message::new(NARRATION_SOURCE, self.project, session_id)
            .with_priority(Priority::Normal)
            .with_kind(MessageKind::Narration)
            .with_context(self.text);
        msg.sequence = sequencer.next();
        msg
    }
}

pub struct NarrationAggregator {
    buffer: Vec<ActivityRecord>,
    max_chars: usize,
    max_buffer: usize,
}

impl NarrationAggregator {
    pub fn new(max_chars: usize, max_buffer: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_chars,
            max_buffer: max_buffer.max(1),
        }
    }

    pub fn push(&mut self, record: ActivityRecord) {
        if self.buffer.len() >= self.max_buffer {
            debug!("Activity buffer full, dropping oldest record");
            self.buffer.remove(0);
        }
        self.buffer.push(record);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Take the whole buffer and produce one request per project, in the
    /// order projects first appeared.
    pub fn drain(&mut self) -> Vec<NarrationRequest> {
        let drained = mem::take(&mut self.buffer);
        if drained.is_empty() {
            return Vec::new();
        }

        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
        for record in drained {
            if !grouped.contains_key(&record.project) {
                order.push(record.project.clone());
            }
            grouped.entry(record.project).or_default().push(record.text);
        }

        order
            .into_iter()
            .filter_map(|project| {
                let texts = grouped.remove(&project)?;
                let text = keep_tail(&texts.join("\n"), self.max_chars);
                Some(NarrationRequest { project, text })
            })
            .collect()
    }
}

/// Keep the last `max_chars` characters (most recent activity wins).
fn keep_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(project: &str, text: &str) -> ActivityRecord {
        ActivityRecord {
            project: project.into(),
            text: text.into(),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn empty_buffer_drains_to_nothing() {
        let mut agg = NarrationAggregator::new(3000, 100);
        assert!(agg.drain().is_empty());
    }

    #[test]
    fn one_request_per_project() {
        let mut agg = NarrationAggregator::new(3000, 100);
        agg.push(record("api", "added route"));
        agg.push(record("web", "styled page"));
        agg.push(record("api", "wrote test"));

        let requests = agg.drain();
        assert_eq!(
            requests,
            vec![
                NarrationRequest {
                    project: "api".into(),
                    text: "added route\nwrote test".into()
                },
                NarrationRequest {
                    project: "web".into(),
                    text: "styled page".into()
                },
            ]
        );
        assert!(agg.is_empty());
        assert!(agg.drain().is_empty(), "nothing is narrated twice");
    }

    #[test]
    fn text_is_capped_keeping_most_recent() {
        let mut agg = NarrationAggregator::new(10, 100);
        agg.push(record("api", "old old old"));
        agg.push(record("api", "new"));
        let requests = agg.drain();
        assert_eq!(requests[0].text, "ld old\nnew");
    }

    #[test]
    fn buffer_is_bounded() {
        let mut agg = NarrationAggregator::new(3000, 2);
        agg.push(record("a", "1"));
        agg.push(record("a", "2"));
        agg.push(record("a", "3"));
        assert_eq!(agg.len(), 2);
        assert_eq!(agg.drain()[0].text, "2\n3");
    }

    #[test]
    fn request_becomes_normal_narration_message() {
        let sequencer = Sequencer::default();
        let msg = NarrationRequest {
            project: "api".into(),
            text: "did things".into(),
        }
        .into_message(&sequencer);
        assert_eq!(msg.source, NARRATION_SOURCE);
        assert_eq!(msg.priority, Priority::Normal);
        assert_eq!(msg.kind, MessageKind::Narration);
        assert_eq!(msg.sequence, 1);
        assert_eq!(msg.raw_text(), "did things");
    }
}
