//! Speech scheduler behavior with in-process fakes for the summarizer and
//! the speech engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use agentvox::hub::broadcast::{Broadcaster, SkipReason};
use agentvox::hub::journal::SpeechJournal;
use agentvox::hub::message::Message;
use agentvox::hub::scheduler::{Outcome, SchedulerSettings, SpeechScheduler, SpeechWorker};
use agentvox::hub::state::{HubState, ALL_TARGETS};
use agentvox::hub::summarizer::{fallback_truncate, SummarizeError, Summarizer, Summary};
use agentvox::hub::tts::{SpeechEngine, SpeechError, Utterance};
use agentvox::hub::voices::VoiceCascade;

type Log = Arc<Mutex<Vec<String>>>;

/// Summarizer that echoes its input, after a per-text delay.
struct EchoSummarizer {
    log: Log,
    delays: HashMap<String, Duration>,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    fail: bool,
    nothing: bool,
}

impl EchoSummarizer {
    fn new(log: &Log) -> Self {
        Self {
            log: log.clone(),
            delays: HashMap::new(),
            gate: None,
            fail: false,
            nothing: false,
        }
    }
}

#[async_trait]
impl Summarizer for EchoSummarizer {
    async fn summarize(&self, text: &str, _personality: &str) -> Result<Summary, SummarizeError> {
        self.log.lock().push(format!("summarize {text}"));
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        if let Some(delay) = self.delays.get(text) {
            tokio::time::sleep(*delay).await;
        }
        if self.fail {
            return Err(SummarizeError::Unavailable("model not loaded".into()));
        }
        if self.nothing {
            return Ok(Summary::Nothing);
        }
        Ok(Summary::Speak(format!("said {text}")))
    }
}

/// Engine that records utterances and tracks how many overlap.
/// `fail_on` errors out and `hang_on` never finishes for a matching text.
struct RecordingEngine {
    log: Log,
    active: AtomicUsize,
    max_active: AtomicUsize,
    stops: AtomicUsize,
    duration: Duration,
    fail_on: Option<String>,
    hang_on: Option<String>,
}

impl RecordingEngine {
    fn new(log: &Log) -> Self {
        Self {
            log: log.clone(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            duration: Duration::from_millis(50),
            fail_on: None,
            hang_on: None,
        }
    }
}

/// Decrements the overlap counter even when the speak future is dropped.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SpeechEngine for RecordingEngine {
    async fn speak(&self, utterance: &Utterance, _since: u64) -> Result<(), SpeechError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _active = ActiveGuard(&self.active);
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.log.lock().push(format!("speak {}", utterance.text));
        if self.fail_on.as_deref() == Some(utterance.text.as_str()) {
            return Err(SpeechError::Exit(Some(1)));
        }
        if self.hang_on.as_deref() == Some(utterance.text.as_str()) {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.duration).await;
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn stop_epoch(&self) -> u64 {
        self.stops.load(Ordering::SeqCst) as u64
    }
}

struct Harness {
    scheduler: SpeechScheduler,
    state: Arc<HubState>,
}

fn spawn_scheduler(summarizer: EchoSummarizer, engine: Arc<RecordingEngine>) -> Harness {
    spawn_with_journal(summarizer, engine, None)
}

fn spawn_with_journal(
    summarizer: EchoSummarizer,
    engine: Arc<RecordingEngine>,
    journal: Option<SpeechJournal>,
) -> Harness {
    let state = Arc::new(HubState::new(50));
    let (scheduler, _worker) = SpeechScheduler::spawn(SpeechWorker {
        state: state.clone(),
        broadcaster: Arc::new(Broadcaster::new(4)),
        summarizer: Arc::new(summarizer),
        engine,
        voices: VoiceCascade::default(),
        settings: SchedulerSettings::default(),
        journal,
    });
    Harness { scheduler, state }
}

fn message(sequence: u64, source: &str, context: &str) -> Message {
    let mut msg = Message::new(source, "webapp", format!("{source}-session")).with_context(context);
    msg.sequence = sequence;
    msg
}

#[tokio::test(start_paused = true)]
async fn slow_summary_still_speaks_first() {
    let log = Log::default();
    let mut summarizer = EchoSummarizer::new(&log);
    summarizer.delays.insert("A".into(), Duration::from_secs(5));
    summarizer.delays.insert("B".into(), Duration::from_millis(10));
    let engine = Arc::new(RecordingEngine::new(&log));
    let hub = spawn_scheduler(summarizer, engine.clone());

    let a = hub.scheduler.schedule(message(1, "claude", "A"));
    let b = hub.scheduler.schedule(message(2, "codex", "B"));

    assert_eq!(a.wait().await, Some(Outcome::Spoken));
    assert_eq!(b.wait().await, Some(Outcome::Spoken));
    assert_eq!(
        *log.lock(),
        vec!["summarize A", "speak said A", "summarize B", "speak said B"]
    );
    assert_eq!(engine.max_active.load(Ordering::SeqCst), 1);

    let history: Vec<u64> = hub.state.history().iter().map(|h| h.sequence).collect();
    assert_eq!(history, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn many_producers_never_overlap() {
    let log = Log::default();
    let engine = Arc::new(RecordingEngine::new(&log));
    let hub = spawn_scheduler(EchoSummarizer::new(&log), engine.clone());

    let tickets: Vec<_> = (1..=10)
        .map(|i| hub.scheduler.schedule(message(i, &format!("agent{i}"), &format!("m{i}"))))
        .collect();
    for ticket in tickets {
        assert_eq!(ticket.wait().await, Some(Outcome::Spoken));
    }

    assert_eq!(engine.max_active.load(Ordering::SeqCst), 1);
    let spoken: Vec<String> = log
        .lock()
        .iter()
        .filter_map(|l| l.strip_prefix("speak said ").map(String::from))
        .collect();
    let expected: Vec<String> = (1..=10).map(|i| format!("m{i}")).collect();
    assert_eq!(spoken, expected);
}

#[tokio::test]
async fn mute_during_summarization_skips_speech() {
    let log = Log::default();
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut summarizer = EchoSummarizer::new(&log);
    summarizer.gate = Some((entered.clone(), release.clone()));
    let engine = Arc::new(RecordingEngine::new(&log));
    let hub = spawn_scheduler(summarizer, engine);

    let ticket = hub.scheduler.schedule(message(1, "claude", "long output"));
    entered.notified().await;
    hub.state.set_mute(ALL_TARGETS, true);
    release.notify_one();

    assert_eq!(ticket.wait().await, Some(Outcome::Skipped(SkipReason::MutedInFlight)));
    assert!(log.lock().iter().all(|l| !l.starts_with("speak")));
    assert!(hub.state.history().is_empty());
}

#[tokio::test]
async fn muted_source_is_skipped_before_summarizing() {
    let log = Log::default();
    let engine = Arc::new(RecordingEngine::new(&log));
    let hub = spawn_scheduler(EchoSummarizer::new(&log), engine);
    hub.state.set_mute("codex", true);

    let muted = hub.scheduler.schedule(message(1, "codex", "ignored"));
    let spoken = hub.scheduler.schedule(message(2, "claude", "heard"));

    assert_eq!(muted.wait().await, Some(Outcome::Skipped(SkipReason::Muted)));
    assert_eq!(spoken.wait().await, Some(Outcome::Spoken));
    assert_eq!(*log.lock(), vec!["summarize heard", "speak said heard"]);
}

#[tokio::test]
async fn summarizer_failure_falls_back_to_truncation() {
    let log = Log::default();
    let mut summarizer = EchoSummarizer::new(&log);
    summarizer.fail = true;
    let engine = Arc::new(RecordingEngine::new(&log));
    let hub = spawn_scheduler(summarizer, engine);

    let text = "Refactored the parser. All tests pass. Next up is the CLI.";
    let ticket = hub.scheduler.schedule(message(1, "claude", text));

    assert_eq!(ticket.wait().await, Some(Outcome::Spoken));
    assert_eq!(
        log.lock().last().map(String::as_str),
        Some("speak Refactored the parser. All tests pass.")
    );
}

#[tokio::test]
async fn nothing_to_say_is_skipped() {
    let log = Log::default();
    let mut summarizer = EchoSummarizer::new(&log);
    summarizer.nothing = true;
    let engine = Arc::new(RecordingEngine::new(&log));
    let hub = spawn_scheduler(summarizer, engine);

    let ticket = hub.scheduler.schedule(message(1, "claude", "ok"));
    assert_eq!(ticket.wait().await, Some(Outcome::Skipped(SkipReason::NothingToSay)));
    assert_eq!(*log.lock(), vec!["summarize ok"]);
}

#[tokio::test(start_paused = true)]
async fn preview_waits_behind_scheduled_speech() {
    let log = Log::default();
    let mut summarizer = EchoSummarizer::new(&log);
    summarizer.delays.insert("A".into(), Duration::from_secs(2));
    let engine = Arc::new(RecordingEngine::new(&log));
    let hub = spawn_scheduler(summarizer, engine.clone());

    let first = hub.scheduler.schedule(message(1, "claude", "A"));
    let preview = hub.scheduler.preview(Utterance {
        text: "preview".into(),
        voice: "Alex".into(),
        speed: 1.2,
        volume: 1.0,
    });

    assert_eq!(first.wait().await, Some(Outcome::Spoken));
    assert_eq!(preview.wait().await, Some(Outcome::Spoken));
    assert_eq!(*log.lock(), vec!["summarize A", "speak said A", "speak preview"]);
    assert_eq!(engine.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn engine_failure_does_not_block_the_next_job() {
    let log = Log::default();
    let mut engine = RecordingEngine::new(&log);
    engine.fail_on = Some("said A".into());
    let engine = Arc::new(engine);
    let hub = spawn_scheduler(EchoSummarizer::new(&log), engine);

    let a = hub.scheduler.schedule(message(1, "claude", "A"));
    let b = hub.scheduler.schedule(message(2, "claude", "B"));

    assert_eq!(a.wait().await, Some(Outcome::Failed));
    assert_eq!(b.wait().await, Some(Outcome::Spoken));
    let history: Vec<(u64, bool)> = hub.state.history().iter().map(|h| (h.sequence, h.ok)).collect();
    assert_eq!(history, vec![(1, false), (2, true)]);
}

#[tokio::test(start_paused = true)]
async fn summarizer_timeout_falls_back_to_truncation() {
    let log = Log::default();
    let text = "Migrated the schema. Backfilled old rows. Dropped the legacy table.";
    let mut summarizer = EchoSummarizer::new(&log);
    summarizer
        .delays
        .insert(text.into(), SchedulerSettings::default().summarize_timeout * 2);
    let engine = Arc::new(RecordingEngine::new(&log));
    let hub = spawn_scheduler(summarizer, engine);

    let ticket = hub.scheduler.schedule(message(1, "claude", text));

    assert_eq!(ticket.wait().await, Some(Outcome::Spoken));
    let expected = format!("speak {}", fallback_truncate(text, 300));
    assert_eq!(log.lock().last(), Some(&expected));
}

#[tokio::test(start_paused = true)]
async fn hung_engine_is_stopped_after_speak_timeout() {
    let log = Log::default();
    let mut engine = RecordingEngine::new(&log);
    engine.hang_on = Some("said A".into());
    let engine = Arc::new(engine);
    let hub = spawn_scheduler(EchoSummarizer::new(&log), engine.clone());

    let a = hub.scheduler.schedule(message(1, "claude", "A"));
    let b = hub.scheduler.schedule(message(2, "claude", "B"));

    assert_eq!(a.wait().await, Some(Outcome::Failed));
    assert_eq!(engine.stops.load(Ordering::SeqCst), 1);
    assert_eq!(b.wait().await, Some(Outcome::Spoken));
    assert_eq!(log.lock().last().map(String::as_str), Some("speak said B"));
    assert_eq!(engine.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn journal_counts_input_in_characters() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = SpeechJournal::new(dir.path());
    let log = Log::default();
    let engine = Arc::new(RecordingEngine::new(&log));
    let hub = spawn_with_journal(EchoSummarizer::new(&log), engine, Some(journal.clone()));

    let context = "Überprüfung läuft.";
    let ticket = hub.scheduler.schedule(message(1, "claude", context));
    assert_eq!(ticket.wait().await, Some(Outcome::Spoken));

    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let records = journal.load_records(&today);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].input_text_chars, context.chars().count());
    assert!(records[0].input_text_chars < context.len());
}
