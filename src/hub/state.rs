//! Shared hub state: mute targets, speaking flag and spoken history.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::message::Message;

pub const ALL_TARGETS: &str = "all";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MuteSnapshot {
    pub all: bool,
    pub targets: Vec<String>,
}

#[derive(Debug, Default)]
struct MuteState {
    all: bool,
    targets: BTreeSet<String>,
}

/// One finished scheduler turn.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub sequence: u64,
    pub source: String,
    pub project: String,
    pub text: String,
    pub voice: String,
    pub spoken_at: DateTime<Utc>,
    pub ok: bool,
}

impl HistoryEntry {
    pub fn from_message(msg: &Message, voice: &str, ok: bool) -> Self {
        Self {
            sequence: msg.sequence,
            source: msg.source.clone(),
            project: msg.project.clone(),
            text: msg.spoken_text.clone().unwrap_or_default(),
            voice: voice.to_string(),
            spoken_at: Utc::now(),
            ok,
        }
    }
}

pub struct HubState {
    mute: RwLock<MuteState>,
    speaking: AtomicBool,
    history: Mutex<VecDeque<HistoryEntry>>,
    history_cap: usize,
}

impl HubState {
    pub fn new(history_cap: usize) -> Self {
        Self {
            mute: RwLock::new(MuteState::default()),
            speaking: AtomicBool::new(false),
            history: Mutex::new(VecDeque::new()),
            history_cap: history_cap.max(1),
        }
    }

    /// Muted globally, or by source, or by project.
    pub fn is_muted(&self, source: &str, project: &str) -> bool {
        let mute = self.mute.read();
        mute.all || mute.targets.contains(source) || mute.targets.contains(project)
    }

    pub fn is_all_muted(&self) -> bool {
        self.mute.read().all
    }

    /// Mute or unmute `target`. Unmuting `"all"` also clears named targets.
    pub fn set_mute(&self, target: &str, muted: bool) -> MuteSnapshot {
        {
            let mut mute = self.mute.write();
            match (target == ALL_TARGETS, muted) {
                (true, true) => mute.all = true,
                (true, false) => {
                    mute.all = false;
                    mute.targets.clear();
                }
                (false, true) => {
                    mute.targets.insert(target.to_string());
                }
                (false, false) => {
                    mute.targets.remove(target);
                }
            }
        }
        self.mute_snapshot()
    }

    pub fn mute_snapshot(&self) -> MuteSnapshot {
        let mute = self.mute.read();
        MuteSnapshot {
            all: mute.all,
            targets: mute.targets.iter().cloned().collect(),
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Relaxed)
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::Relaxed);
    }

    pub fn push_history(&self, entry: HistoryEntry) {
        let mut history = self.history.lock();
        if history.len() >= self.history_cap {
            history.pop_front();
        }
        history.push_back(entry);
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().iter().cloned().collect()
    }

    /// Clear history for `target` (`"all"`, a source or a project). Returns entries removed.
    pub fn clear_history(&self, target: &str) -> usize {
        let mut history = self.history.lock();
        let before = history.len();
        if target == ALL_TARGETS {
            history.clear();
        } else {
            history.retain(|e| e.source != target && e.project != target);
        }
        before - history.len()
    }
}
