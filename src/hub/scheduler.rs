//! Speech scheduler: the single serialization point in front of the speech engine.
//!
//! Every producer hands work to `SpeechScheduler::schedule`, which returns at
//! once. One worker task drains the job channel and runs each job
//! (summarize → re-check mute → speak) to completion before taking the next,
//! so at most one utterance is ever in flight and jobs finish in send order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::broadcast::{Broadcaster, HubEvent, SkipReason};
use super::journal::{SpeechJournal, SpeechRecord};
use super::message::Message;
use super::state::{HistoryEntry, HubState};
use super::summarizer::{fallback_truncate, Summarizer, Summary};
use super::tts::{SpeechEngine, Utterance};
use super::voices::{VoiceCascade, VoiceProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Spoken,
    Skipped(SkipReason),
    /// The speech engine failed or timed out.
    Failed,
}

enum Job {
    Message(Message, oneshot::Sender<Outcome>),
    Preview(Utterance, oneshot::Sender<Outcome>),
}

/// Completion handle for a scheduled job.
pub struct Ticket(oneshot::Receiver<Outcome>);

impl Ticket {
    /// Wait for the job to finish. `None` if the worker shut down first.
    pub async fn wait(self) -> Option<Outcome> {
        self.0.await.ok()
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub summarize_timeout: Duration,
    pub speak_timeout: Duration,
    pub fallback_max_chars: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            summarize_timeout: Duration::from_secs(30),
            speak_timeout: Duration::from_secs(120),
            fallback_max_chars: 300,
        }
    }
}

/// Everything the worker needs, injected by the hub.
pub struct SpeechWorker {
    pub state: Arc<HubState>,
    pub broadcaster: Arc<Broadcaster>,
    pub summarizer: Arc<dyn Summarizer>,
    pub engine: Arc<dyn SpeechEngine>,
    pub voices: VoiceCascade,
    pub settings: SchedulerSettings,
    pub journal: Option<SpeechJournal>,
}

#[derive(Clone)]
pub struct SpeechScheduler {
    tx: mpsc::UnboundedSender<Job>,
}

impl SpeechScheduler {
    /// Spawn the worker task. It exits once every scheduler handle is dropped.
    pub fn spawn(worker: SpeechWorker) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    Job::Message(msg, done) => {
                        let outcome = worker.process(msg).await;
                        let _ = done.send(outcome);
                    }
                    Job::Preview(utterance, done) => {
                        let outcome = worker.preview(&utterance).await;
                        let _ = done.send(outcome);
                    }
                }
            }
            debug!("Speech scheduler stopped");
        });
        (Self { tx }, handle)
    }

    /// Queue a message for summarize-and-speak. Never blocks.
    pub fn schedule(&self, msg: Message) -> Ticket {
        let (done, ticket) = oneshot::channel();
        debug!("Scheduling #{} from {}", msg.sequence, msg.source);
        if self.tx.send(Job::Message(msg, done)).is_err() {
            warn!("Speech scheduler is not running, message dropped");
        }
        Ticket(ticket)
    }

    /// Queue a voice preview; it shares the same serialization point.
    pub fn preview(&self, utterance: Utterance) -> Ticket {
        let (done, ticket) = oneshot::channel();
        if self.tx.send(Job::Preview(utterance, done)).is_err() {
            warn!("Speech scheduler is not running, preview dropped");
        }
        Ticket(ticket)
    }
}

impl SpeechWorker {
    async fn process(&self, mut msg: Message) -> Outcome {
        let t_total = Instant::now();

        if self.state.is_muted(&msg.source, &msg.project) {
            return self.skip(msg, SkipReason::Muted);
        }

        let profile = self.voices.resolve(&msg.source, &msg.project);
        let raw = msg.raw_text().to_string();

        let t_summarize = Instant::now();
        let (spoken, summarized) = match timeout(
            self.settings.summarize_timeout,
            self.summarizer.summarize(&raw, &profile.personality),
        )
        .await
        {
            Ok(Ok(Summary::Speak(text))) => (text, true),
            Ok(Ok(Summary::Nothing)) => return self.skip(msg, SkipReason::NothingToSay),
            Ok(Err(e)) => {
                warn!("Summarizer failed for #{}: {e}, using truncation", msg.sequence);
                (fallback_truncate(&raw, self.settings.fallback_max_chars), false)
            }
            Err(_) => {
                warn!(
                    "Summarizer timed out after {:?} for #{}, using truncation",
                    self.settings.summarize_timeout, msg.sequence
                );
                (fallback_truncate(&raw, self.settings.fallback_max_chars), false)
            }
        };
        let summarize_ms = t_summarize.elapsed().as_millis();

        // Mute may have been toggled while the summarizer was running. A mute
        // that lands after this check is caught through the stop epoch.
        let stop_epoch = self.engine.stop_epoch();
        if self.state.is_muted(&msg.source, &msg.project) {
            return self.skip(msg, SkipReason::MutedInFlight);
        }
        if spoken.trim().is_empty() {
            return self.skip(msg, SkipReason::NothingToSay);
        }

        msg.spoken_text = Some(spoken.clone());
        let utterance = Utterance {
            text: spoken,
            voice: profile.voice.clone(),
            speed: profile.speed,
            volume: profile.volume,
        };

        let t_speak = Instant::now();
        let ok = self.speak(&msg, &utterance, stop_epoch).await;
        let speak_ms = t_speak.elapsed().as_millis();

        info!(
            "Turn #{} [{}/{}]: summarize={summarize_ms}ms speak={speak_ms}ms total={}ms ok={ok}",
            msg.sequence,
            msg.source,
            msg.project,
            t_total.elapsed().as_millis()
        );

        self.record(&msg, &profile, raw.chars().count(), summarized, summarize_ms, speak_ms, ok);
        if ok {
            Outcome::Spoken
        } else {
            Outcome::Failed
        }
    }

    async fn preview(&self, utterance: &Utterance) -> Outcome {
        let stop_epoch = self.engine.stop_epoch();
        if self.state.is_all_muted() {
            debug!("Preview skipped: muted");
            return Outcome::Skipped(SkipReason::Muted);
        }
        self.state.set_speaking(true);
        let ok = self.run_engine(utterance, stop_epoch).await;
        self.state.set_speaking(false);
        if ok {
            Outcome::Spoken
        } else {
            Outcome::Failed
        }
    }

    async fn speak(&self, msg: &Message, utterance: &Utterance, stop_epoch: u64) -> bool {
        self.state.set_speaking(true);
        self.broadcaster.publish(HubEvent::SpeakingStart { message: msg.clone() });

        let ok = self.run_engine(utterance, stop_epoch).await;

        self.state.set_speaking(false);
        self.broadcaster.publish(HubEvent::SpeakingDone {
            message: msg.clone(),
            ok,
        });
        ok
    }

    /// Run the engine under the speak timeout. Failures never escape.
    async fn run_engine(&self, utterance: &Utterance, stop_epoch: u64) -> bool {
        match timeout(self.settings.speak_timeout, self.engine.speak(utterance, stop_epoch)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Speech engine failed: {e}");
                false
            }
            Err(_) => {
                warn!("Speech engine timed out after {:?}, stopping", self.settings.speak_timeout);
                self.engine.stop();
                false
            }
        }
    }

    fn skip(&self, msg: Message, reason: SkipReason) -> Outcome {
        info!("Skipped #{} from {}: {reason:?}", msg.sequence, msg.source);
        self.broadcaster.publish(HubEvent::MessageSkipped { message: msg, reason });
        Outcome::Skipped(reason)
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        msg: &Message,
        profile: &VoiceProfile,
        input_chars: usize,
        summarized: bool,
        summarize_ms: u128,
        speak_ms: u128,
        ok: bool,
    ) {
        self.state
            .push_history(HistoryEntry::from_message(msg, &profile.voice, ok));

        let Some(journal) = &self.journal else {
            return;
        };
        journal.save(&SpeechRecord {
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            sequence: msg.sequence,
            source: msg.source.clone(),
            project: msg.project.clone(),
            kind: msg.kind.as_str().to_string(),
            input_text_chars: input_chars,
            summarized,
            spoken_text: msg.spoken_text.clone().unwrap_or_default(),
            summarize_latency_ms: i64::try_from(summarize_ms).unwrap_or(i64::MAX),
            speak_latency_ms: i64::try_from(speak_ms).unwrap_or(i64::MAX),
            voice: profile.voice.clone(),
            ok,
        });
    }
}
