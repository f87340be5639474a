//! Speech engine: the single exclusive audio output sink.
//!
//! `CommandSpeechEngine` runs a system TTS program (`say`, `espeak`, ...)
//! once per utterance and waits for it to exit. `stop()` kills the
//! in-flight process.
//!
//! Every `stop()` advances a stop epoch. Callers read the epoch before their
//! last mute check and pass it to `speak`, so a stop that lands between that
//! check and the start of playback still cancels the utterance.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{debug, info};

use crate::config::TtsConfig;

/// Spoken-ready text plus the resolved voice parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub voice: String,
    pub speed: f32,
    pub volume: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("failed to start speech command: {0}")]
    Spawn(std::io::Error),

    #[error("speech command failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("speech command exited with status {0:?}")]
    Exit(Option<i32>),
}

#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Speak and wait until playback finishes or `stop()` is called.
    /// Returns at once without playing if `stop()` ran after epoch `since`.
    async fn speak(&self, utterance: &Utterance, since: u64) -> Result<(), SpeechError>;

    /// Cut off in-flight audio immediately.
    fn stop(&self);

    /// Number of `stop()` calls so far.
    fn stop_epoch(&self) -> u64 {
        0
    }
}

pub struct CommandSpeechEngine {
    command: String,
    args: Vec<String>,
    base_rate_wpm: f32,
    stop_signal: Notify,
    stop_epoch: AtomicU64,
    speaking: AtomicBool,
    speak_lock: AsyncMutex<()>,
}

impl CommandSpeechEngine {
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            base_rate_wpm: config.base_rate_wpm,
            stop_signal: Notify::new(),
            stop_epoch: AtomicU64::new(0),
            speaking: AtomicBool::new(false),
            speak_lock: AsyncMutex::new(()),
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Relaxed)
    }

    fn render_args(&self, utterance: &Utterance) -> Vec<String> {
        let rate = format!("{:.0}", self.base_rate_wpm * utterance.speed);
        let volume = format!("{:.2}", utterance.volume);
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{voice}", &utterance.voice)
                    .replace("{rate}", &rate)
                    .replace("{volume}", &volume)
                    .replace("{text}", &utterance.text)
            })
            .collect()
    }
}

#[async_trait]
impl SpeechEngine for CommandSpeechEngine {
    async fn speak(&self, utterance: &Utterance, since: u64) -> Result<(), SpeechError> {
        let _guard = self.speak_lock.lock().await;
        let t0 = Instant::now();

        let stopped = self.stop_signal.notified();
        tokio::pin!(stopped);
        stopped.as_mut().enable();
        if self.stop_epoch.load(Ordering::SeqCst) != since {
            info!("Speech stopped before playback started");
            return Ok(());
        }

        let mut child = Command::new(&self.command)
            .args(self.render_args(utterance))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(SpeechError::Spawn)?;

        self.speaking.store(true, Ordering::Relaxed);
        let result = tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => Err(SpeechError::Exit(status.code())),
                Err(e) => Err(SpeechError::Io(e)),
            },
            () = &mut stopped => {
                info!("Speech stopped after {}ms", t0.elapsed().as_millis());
                child.kill().await.map_err(SpeechError::Io)
            }
        };
        self.speaking.store(false, Ordering::Relaxed);

        debug!(
            "Spoke {} chars with voice {} in {}ms",
            utterance.text.chars().count(),
            utterance.voice,
            t0.elapsed().as_millis()
        );
        result
    }

    fn stop(&self) {
        self.stop_epoch.fetch_add(1, Ordering::SeqCst);
        self.stop_signal.notify_waiters();
    }

    fn stop_epoch(&self) -> u64 {
        self.stop_epoch.load(Ordering::SeqCst)
    }
}
