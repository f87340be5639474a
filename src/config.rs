//! Configuration management for agentvox.
//!
//! Loads config from YAML files in standard locations. Every section
//! falls back to its defaults, so an empty or partial file is valid.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::hub::voices::VoiceCascade;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9876,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_size: usize,
    pub dedup_window_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 50,
            dedup_window_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub summarize_timeout_secs: u64,
    pub speak_timeout_secs: u64,
    pub fallback_max_chars: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            summarize_timeout_secs: 30,
            speak_timeout_secs: 120,
            fallback_max_chars: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub enabled: bool,
    /// Directories scanned for active `*.jsonl` activity logs.
    pub roots: Vec<PathBuf>,
    pub poll_interval_ms: u64,
    pub drain_interval_secs: u64,
    pub discovery_interval_secs: u64,
    pub active_within_secs: u64,
    pub max_entry_chars: usize,
    pub max_narration_chars: usize,
    pub max_buffer: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            roots: dirs::home_dir()
                .map(|h| vec![h.join(".claude/projects")])
                .unwrap_or_default(),
            poll_interval_ms: 2000,
            drain_interval_secs: 30,
            discovery_interval_secs: 30,
            active_within_secs: 600,
            max_entry_chars: 300,
            max_narration_chars: 3000,
            max_buffer: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub model: String,
    pub host: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            model: "llama3.2:3b".into(),
            host: "http://localhost:11434".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Program invoked once per utterance.
    pub command: String,
    /// Arguments; `{text}`, `{voice}`, `{rate}` and `{volume}` are substituted.
    pub args: Vec<String>,
    /// Words per minute at speed 1.0.
    pub base_rate_wpm: f32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            command: "say".into(),
            args: vec![
                "-v".into(),
                "{voice}".into(),
                "-r".into(),
                "{rate}".into(),
                "{text}".into(),
            ],
            base_rate_wpm: 175.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_entries: usize,
    pub journal: bool,
    pub journal_dir: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 200,
            journal: true,
            journal_dir: None,
        }
    }
}

impl HistoryConfig {
    /// Journal directory, or `None` when journaling is off or no home exists.
    pub fn resolved_journal_dir(&self) -> Option<PathBuf> {
        if !self.journal {
            return None;
        }
        self.journal_dir
            .clone()
            .or_else(|| dirs::home_dir().map(|h| h.join(".agentvox-history")))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub max_sinks: usize,
    pub channel_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_sinks: 8,
            channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
    pub observer: ObserverConfig,
    pub ollama: OllamaConfig,
    pub tts: TtsConfig,
    pub voices: VoiceCascade,
    pub history: HistoryConfig,
    pub broadcast: BroadcastConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/agentvox/config.yaml
    /// 3. /etc/agentvox/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/agentvox/config.yaml")),
                Some(PathBuf::from("/etc/agentvox/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::from_yaml(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config = Config::from_yaml(
            "queue:\n  max_size: 5\nvoices:\n  projects:\n    agentvox:\n      voice: Samantha\n",
        )
        .unwrap();
        assert_eq!(config.queue.max_size, 5);
        assert_eq!(config.queue.dedup_window_secs, 10);
        assert_eq!(config.server.port, 9876);
        let profile = config.voices.resolve("claude", "agentvox");
        assert_eq!(profile.voice, "Samantha");
    }

    #[test]
    fn journal_disabled_resolves_to_none() {
        let history = HistoryConfig {
            journal: false,
            ..HistoryConfig::default()
        };
        assert!(history.resolved_journal_dir().is_none());
    }
}
