//! Speech journal.
//!
//! Appends one JSONL record per finished utterance to
//! `{dir}/{date}-speech.jsonl`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechRecord {
    pub timestamp: String,
    pub sequence: u64,
    pub source: String,
    pub project: String,
    pub kind: String,
    pub input_text_chars: usize,
    pub summarized: bool,
    pub spoken_text: String,
    pub summarize_latency_ms: i64,
    pub speak_latency_ms: i64,
    pub voice: String,
    pub ok: bool,
}

#[derive(Debug, Clone)]
pub struct SpeechJournal {
    dir: PathBuf,
}

impl SpeechJournal {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, date: &str) -> PathBuf {
        self.dir.join(format!("{date}-speech.jsonl"))
    }

    pub fn save(&self, record: &SpeechRecord) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("Failed to create speech journal dir: {e}");
            return;
        }

        let date = Local::now().format("%Y-%m-%d").to_string();
        let path = self.file_for(&date);

        let mut file = match fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to open speech journal: {e}");
                return;
            }
        };

        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(e) = writeln!(file, "{line}") {
                    warn!("Failed to write speech record: {e}");
                }
            }
            Err(e) => warn!("Failed to serialize speech record: {e}"),
        }
    }

    pub fn load_records(&self, date: &str) -> Vec<SpeechRecord> {
        let Ok(contents) = fs::read_to_string(self.file_for(date)) else {
            return Vec::new();
        };

        contents
            .lines()
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!("Skipping malformed journal line: {e}");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sequence: u64) -> SpeechRecord {
        SpeechRecord {
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            sequence,
            source: "claude".into(),
            project: "agentvox".into(),
            kind: "stop".into(),
            input_text_chars: 120,
            summarized: true,
            spoken_text: "Done.".into(),
            summarize_latency_ms: 40,
            speak_latency_ms: 900,
            voice: "Samantha".into(),
            ok: true,
        }
    }

    #[test]
    fn saved_records_load_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let journal = SpeechJournal::new(dir.path().join("nested"));
        journal.save(&record(1));
        journal.save(&record(2));

        let today = Local::now().format("%Y-%m-%d").to_string();
        let records = journal.load_records(&today);
        assert_eq!(records.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![1, 2]);
        assert!(journal.load_records("1999-01-01").is_empty());
    }
}
