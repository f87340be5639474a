//! Voice and personality cascade: project > source > default.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceProfile {
    pub voice: String,
    pub speed: f32,
    pub volume: f32,
    /// Persona handed to the summarizer.
    pub personality: String,
}

impl Default for VoiceProfile {
    fn default() -> Self {
        Self {
            voice: "Samantha".into(),
            speed: 1.0,
            volume: 1.0,
            personality: "a calm, concise pair-programming partner".into(),
        }
    }
}

/// Partial profile; unset fields fall through to the next level.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VoiceOverride {
    pub voice: Option<String>,
    pub speed: Option<f32>,
    pub volume: Option<f32>,
    pub personality: Option<String>,
}

impl VoiceOverride {
    fn apply(&self, profile: &mut VoiceProfile) {
        if let Some(voice) = &self.voice {
            profile.voice.clone_from(voice);
        }
        if let Some(speed) = self.speed {
            profile.speed = speed;
        }
        if let Some(volume) = self.volume {
            profile.volume = volume;
        }
        if let Some(personality) = &self.personality {
            profile.personality.clone_from(personality);
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VoiceCascade {
    pub default: VoiceProfile,
    pub sources: HashMap<String, VoiceOverride>,
    pub projects: HashMap<String, VoiceOverride>,
}

impl VoiceCascade {
    pub fn resolve(&self, source: &str, project: &str) -> VoiceProfile {
        let mut profile = self.default.clone();
        if let Some(by_source) = self.sources.get(source) {
            by_source.apply(&mut profile);
        }
        if let Some(by_project) = self.projects.get(project) {
            by_project.apply(&mut profile);
        }
        profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cascade() -> VoiceCascade {
        let mut sources = HashMap::new();
        sources.insert(
            "codex".to_string(),
            VoiceOverride {
                voice: Some("Daniel".into()),
                speed: Some(1.2),
                ..VoiceOverride::default()
            },
        );
        let mut projects = HashMap::new();
        projects.insert(
            "agentvox".to_string(),
            VoiceOverride {
                voice: Some("Karen".into()),
                ..VoiceOverride::default()
            },
        );
        VoiceCascade {
            default: VoiceProfile::default(),
            sources,
            projects,
        }
    }

    #[test]
    fn unknown_source_and_project_use_default() {
        assert_eq!(cascade().resolve("claude", "other"), VoiceProfile::default());
    }

    #[test]
    fn project_beats_source_field_by_field() {
        let profile = cascade().resolve("codex", "agentvox");
        assert_eq!(profile.voice, "Karen");
        assert!((profile.speed - 1.2).abs() < f32::EPSILON);
        assert_eq!(profile.personality, VoiceProfile::default().personality);
    }
}
