//! Lifecycle event fan-out to a bounded set of sinks.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use super::message::Message;
use super::state::MuteSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Muted,
    MutedInFlight,
    NothingToSay,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum HubEvent {
    #[serde(rename = "message:new")]
    MessageNew { message: Message, updated: bool },
    #[serde(rename = "message:dequeued")]
    MessageDequeued { message: Message },
    #[serde(rename = "message:skipped")]
    MessageSkipped { message: Message, reason: SkipReason },
    #[serde(rename = "speaking:start")]
    SpeakingStart { message: Message },
    #[serde(rename = "speaking:done")]
    SpeakingDone { message: Message, ok: bool },
    #[serde(rename = "mute:update")]
    MuteUpdate(MuteSnapshot),
    #[serde(rename = "queue:cleared")]
    QueueCleared { removed: usize },
    #[serde(rename = "history:cleared")]
    HistoryCleared { target: String, removed: usize },
    #[serde(rename = "omni:update")]
    OmniUpdate { active: bool },
}

impl HubEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageNew { .. } => "message:new",
            Self::MessageDequeued { .. } => "message:dequeued",
            Self::MessageSkipped { .. } => "message:skipped",
            Self::SpeakingStart { .. } => "speaking:start",
            Self::SpeakingDone { .. } => "speaking:done",
            Self::MuteUpdate(_) => "mute:update",
            Self::QueueCleared { .. } => "queue:cleared",
            Self::HistoryCleared { .. } => "history:cleared",
            Self::OmniUpdate { .. } => "omni:update",
        }
    }
}

/// Receiver of lifecycle events. Delivery must not block.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &HubEvent);
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("sink limit of {0} reached")]
    TooManySinks(usize),
}

pub struct Broadcaster {
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    max_sinks: usize,
}

impl Broadcaster {
    pub fn new(max_sinks: usize) -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
            max_sinks,
        }
    }

    pub fn register(&self, sink: Arc<dyn EventSink>) -> Result<(), BroadcastError> {
        let mut sinks = self.sinks.write();
        if sinks.len() >= self.max_sinks {
            return Err(BroadcastError::TooManySinks(self.max_sinks));
        }
        sinks.push(sink);
        Ok(())
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn publish(&self, event: HubEvent) {
        for sink in self.sinks.read().iter() {
            sink.deliver(&event);
        }
    }
}

/// Logs every event at debug level.
pub struct LogSink;

impl EventSink for LogSink {
    fn deliver(&self, event: &HubEvent) {
        debug!(event = event.name(), "hub event");
    }
}

/// Forwards events to a tokio broadcast channel (feeds the SSE stream).
pub struct ChannelSink {
    tx: broadcast::Sender<HubEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: &HubEvent) {
        // No subscribers is not an error.
        let _ = self.tx.send(event.clone());
    }
}
