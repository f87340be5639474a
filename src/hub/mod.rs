//! The voice hub: admission, serialization and passive narration.
//!
//! Components:
//! - `queue`: admission-controlled priority queue with session dedup
//! - `scheduler`: single worker that summarizes and speaks one message at a time
//! - `observer` / `narrator` / `omni`: passive log tailing and periodic narration
//! - `state`, `broadcast`, `voices`: shared mute/history state, event fan-out, voice cascade
//! - `summarizer`, `tts`: external collaborators behind traits
//! - `api`: axum HTTP surface

pub mod api;
pub mod broadcast;
pub mod journal;
pub mod message;
pub mod narrator;
pub mod observer;
pub mod omni;
pub mod queue;
pub mod scheduler;
pub mod state;
pub mod summarizer;
pub mod transcript;
pub mod tts;
pub mod voices;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast as channel;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use broadcast::{Broadcaster, ChannelSink, EventSink, HubEvent, LogSink};
use journal::SpeechJournal;
use message::{validate_target, IncomingMessage, Message, Sequencer, ValidationError};
use omni::ObserverManager;
use queue::{Admission, AdmissionQueue};
use scheduler::{SchedulerSettings, SpeechScheduler, SpeechWorker, Ticket};
use state::{HistoryEntry, HubState, MuteSnapshot, ALL_TARGETS};
use summarizer::Summarizer;
use tts::{SpeechEngine, Utterance};
use voices::VoiceCascade;

const DEFAULT_PREVIEW_TEXT: &str = "This is how I will sound.";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStatus {
    pub queue_size: usize,
    pub queue_capacity: usize,
    pub pending: Vec<Message>,
    pub speaking: bool,
    pub muted: MuteSnapshot,
    pub observer_active: bool,
    pub watched_files: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserverStatus {
    pub active: bool,
    pub watched_files: usize,
}

/// Handle to every hub component. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    pub state: Arc<HubState>,
    pub queue: Arc<AdmissionQueue>,
    pub scheduler: SpeechScheduler,
    pub broadcaster: Arc<Broadcaster>,
    pub engine: Arc<dyn SpeechEngine>,
    pub observer: Arc<ObserverManager>,
    events: Arc<ChannelSink>,
    voices: VoiceCascade,
}

impl Hub {
    /// Build the hub and spawn the speech scheduler worker.
    /// Must be called inside a tokio runtime.
    pub fn new(config: &Config, summarizer: Arc<dyn Summarizer>, engine: Arc<dyn SpeechEngine>) -> Self {
        let state = Arc::new(HubState::new(config.history.max_entries));
        let sequencer = Sequencer::default();
        let queue = Arc::new(AdmissionQueue::new(
            config.queue.max_size,
            Duration::from_secs(config.queue.dedup_window_secs),
            sequencer.clone(),
        ));

        let broadcaster = Arc::new(Broadcaster::new(config.broadcast.max_sinks));
        let events = Arc::new(ChannelSink::new(config.broadcast.channel_capacity));
        let sinks: [Arc<dyn EventSink>; 2] = [events.clone(), Arc::new(LogSink)];
        for sink in sinks {
            if let Err(e) = broadcaster.register(sink) {
                warn!("Failed to register event sink: {e}");
            }
        }

        let journal = config.history.resolved_journal_dir().map(SpeechJournal::new);
        if let Some(journal) = &journal {
            debug!("Speech journal at {}", journal.dir().display());
        }

        let (scheduler, _worker) = SpeechScheduler::spawn(SpeechWorker {
            state: state.clone(),
            broadcaster: broadcaster.clone(),
            summarizer,
            engine: engine.clone(),
            voices: config.voices.clone(),
            settings: SchedulerSettings {
                summarize_timeout: Duration::from_secs(config.scheduler.summarize_timeout_secs),
                speak_timeout: Duration::from_secs(config.scheduler.speak_timeout_secs),
                fallback_max_chars: config.scheduler.fallback_max_chars,
            },
            journal,
        });

        let observer = Arc::new(ObserverManager::new(
            config.observer.clone(),
            scheduler.clone(),
            sequencer,
        ));

        Self {
            state,
            queue,
            scheduler,
            broadcaster,
            engine,
            observer,
            events,
            voices: config.voices.clone(),
        }
    }

    /// Push-path consumer: dequeue one message, wait for its full turn, repeat.
    ///
    /// Waiting on each ticket keeps later arrivals in the queue, where
    /// priority decides what is spoken next.
    pub fn start_queue_consumer(&self) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let scheduler = self.scheduler.clone();
        let broadcaster = self.broadcaster.clone();
        tokio::spawn(async move {
            loop {
                let msg = queue.next().await;
                let sequence = msg.sequence;
                broadcaster.publish(HubEvent::MessageDequeued { message: msg.clone() });
                if let Some(outcome) = scheduler.schedule(msg).wait().await {
                    debug!("Message #{sequence} finished: {outcome:?}");
                }
            }
        })
    }

    /// Validate and admit a pushed message.
    pub fn submit(&self, incoming: IncomingMessage) -> Result<Admission, ValidationError> {
        let msg = incoming.validate()?;
        let mut message = msg.clone();
        let admission = self.queue.enqueue(msg);
        if let Admission::Enqueued { evicted: Some(evicted), .. } = &admission {
            debug!("Evicted #{} to admit #{}", evicted.sequence, admission.sequence());
        }
        message.sequence = admission.sequence();
        self.broadcaster.publish(HubEvent::MessageNew {
            message,
            updated: admission.is_update(),
        });
        Ok(admission)
    }

    pub fn set_mute(&self, target: &str, muted: bool) -> Result<MuteSnapshot, ValidationError> {
        let target = validate_target(target)?;
        let snapshot = self.state.set_mute(&target, muted);
        if muted && target == ALL_TARGETS {
            self.engine.stop();
        }
        info!("Mute {target}: {muted}");
        self.broadcaster.publish(HubEvent::MuteUpdate(snapshot.clone()));
        Ok(snapshot)
    }

    pub fn clear_queue(&self) -> usize {
        let removed = self.queue.clear();
        info!("Queue cleared ({removed} removed)");
        self.broadcaster.publish(HubEvent::QueueCleared { removed });
        removed
    }

    pub fn remove_pending(&self, sequence: u64) -> Option<Message> {
        self.queue.remove(sequence)
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.history()
    }

    pub fn clear_history(&self, target: &str) -> Result<usize, ValidationError> {
        let target = validate_target(target)?;
        let removed = self.state.clear_history(&target);
        self.broadcaster.publish(HubEvent::HistoryCleared { target, removed });
        Ok(removed)
    }

    pub fn status(&self) -> HubStatus {
        HubStatus {
            queue_size: self.queue.len(),
            queue_capacity: self.queue.max_size(),
            pending: self.queue.pending(),
            speaking: self.state.is_speaking(),
            muted: self.state.mute_snapshot(),
            observer_active: self.observer.is_active(),
            watched_files: self.observer.watched_count(),
        }
    }

    pub fn set_observer(&self, enabled: bool) -> ObserverStatus {
        let changed = if enabled {
            self.observer.start()
        } else {
            self.observer.stop()
        };
        if changed {
            self.broadcaster.publish(HubEvent::OmniUpdate {
                active: self.observer.is_active(),
            });
        }
        self.observer_status()
    }

    pub fn observer_status(&self) -> ObserverStatus {
        ObserverStatus {
            active: self.observer.is_active(),
            watched_files: self.observer.watched_count(),
        }
    }

    /// Preview a voice through the scheduler so it never overlaps other speech.
    pub fn preview(&self, voice: Option<String>, speed: Option<f32>, text: Option<String>) -> Ticket {
        let profile = self.voices.default.clone();
        self.scheduler.preview(Utterance {
            text: text
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PREVIEW_TEXT.into()),
            voice: voice.unwrap_or(profile.voice),
            speed: speed.unwrap_or(profile.speed),
            volume: profile.volume,
        })
    }

    pub fn subscribe(&self) -> channel::Receiver<HubEvent> {
        self.events.subscribe()
    }
}
