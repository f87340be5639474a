//! Passive observation ("omni" mode) lifecycle.
//!
//! One task owns the `ActivityObserver` and the `NarrationAggregator` and
//! multiplexes discovery, polling and draining with `tokio::select!`. Buffer
//! appends and drains therefore run sequentially, without locks.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::message::Sequencer;
use super::narrator::NarrationAggregator;
use super::observer::{discover_active_logs, ActivityObserver};
use super::scheduler::SpeechScheduler;
use crate::config::ObserverConfig;

pub struct ObserverManager {
    config: ObserverConfig,
    scheduler: SpeechScheduler,
    sequencer: Sequencer,
    task: Mutex<Option<JoinHandle<()>>>,
    active: Arc<AtomicBool>,
    watched: Arc<AtomicUsize>,
}

impl ObserverManager {
    pub fn new(config: ObserverConfig, scheduler: SpeechScheduler, sequencer: Sequencer) -> Self {
        Self {
            config,
            scheduler,
            sequencer,
            task: Mutex::new(None),
            active: Arc::new(AtomicBool::new(false)),
            watched: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn watched_count(&self) -> usize {
        self.watched.load(Ordering::Relaxed)
    }

    /// Start observing. Returns false if already running.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.is_some() {
            return false;
        }
        self.active.store(true, Ordering::Relaxed);

        let config = self.config.clone();
        let scheduler = self.scheduler.clone();
        let sequencer = self.sequencer.clone();
        let watched = self.watched.clone();
        *task = Some(tokio::spawn(async move {
            run_observer(config, scheduler, sequencer, watched).await;
        }));
        info!("Activity observer started ({} roots)", self.config.roots.len());
        true
    }

    /// Stop observing; buffered activity is discarded. Returns false if not running.
    pub fn stop(&self) -> bool {
        let Some(handle) = self.task.lock().take() else {
            return false;
        };
        handle.abort();
        self.active.store(false, Ordering::Relaxed);
        self.watched.store(0, Ordering::Relaxed);
        info!("Activity observer stopped");
        true
    }
}

async fn run_observer(
    config: ObserverConfig,
    scheduler: SpeechScheduler,
    sequencer: Sequencer,
    watched: Arc<AtomicUsize>,
) {
    let mut observer = ActivityObserver::new(config.max_entry_chars);
    let mut aggregator = NarrationAggregator::new(config.max_narration_chars, config.max_buffer);

    let mut discover = interval(Duration::from_secs(config.discovery_interval_secs.max(1)));
    let mut poll = interval(Duration::from_millis(config.poll_interval_ms.max(50)));
    let drain_every = Duration::from_secs(config.drain_interval_secs.max(1));
    let mut drain = interval_at(Instant::now() + drain_every, drain_every);
    for ticker in [&mut discover, &mut poll, &mut drain] {
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    }

    loop {
        tokio::select! {
            _ = discover.tick() => {
                let roots = config.roots.clone();
                let active_within = Duration::from_secs(config.active_within_secs);
                let found: Vec<PathBuf> = match tokio::task::spawn_blocking(move || {
                    discover_active_logs(&roots, active_within)
                })
                .await
                {
                    Ok(found) => found,
                    Err(e) => {
                        warn!("Activity log discovery failed: {e}");
                        continue;
                    }
                };
                for path in observer.prune_idle(active_within).await {
                    info!("Activity log idle, unwatching {}", path.display());
                }
                for path in found {
                    if observer.watch(&path).await {
                        info!("Watching activity log {}", path.display());
                    }
                }
                watched.store(observer.len(), Ordering::Relaxed);
            }
            _ = poll.tick() => {
                if observer.is_empty() {
                    continue;
                }
                let delivered = observer
                    .poll(&mut |path, record| {
                        debug!("Activity from {} [{}]", path.display(), record.project);
                        aggregator.push(record);
                    })
                    .await;
                if delivered > 0 {
                    debug!("Buffered {delivered} activity records");
                }
                watched.store(observer.len(), Ordering::Relaxed);
            }
            _ = drain.tick() => {
                for request in aggregator.drain() {
                    info!("Narrating {} ({} chars)", request.project, request.text.chars().count());
                    // Narration does not wait on its ticket.
                    let _ = scheduler.schedule(request.into_message(&sequencer));
                }
            }
        }
    }
}
