use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeditationSegment {
    pub paragraph: String,
}

/// Script produced by the generation collaborator. Immutable once
/// produced; embedded verbatim in a history item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeditationScript {
    pub title: String,
    pub main_visual_prompt: String,
    pub segments: Vec<MeditationSegment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    English,
    Urdu,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Urdu => "urdu",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "english" => Some(Language::English),
            "urdu" => Some(Language::Urdu),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub prompt: String,
    pub language: Language,
    pub duration_minutes: u32,
}

/// One stage of the generation pipeline, reported before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    CraftingScript,
    RenderingVisual,
    SynthesizingVoice { segment: usize, total: usize },
    Assembling,
    Saving,
    Starting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::CraftingScript => f.write_str("Crafting a unique script..."),
            Stage::RenderingVisual => f.write_str("Visualizing a serene scene..."),
            Stage::SynthesizingVoice { segment, total } => write!(
                f,
                "Synthesizing a calming voice... ({segment} of {total})"
            ),
            Stage::Assembling => f.write_str("Weaving the narration together..."),
            Stage::Saving => f.write_str("Saving your session..."),
            Stage::Starting => f.write_str("Starting playback..."),
        }
    }
}

/// MM:SS display for countdown and history listings.
pub fn format_time(seconds: f64) -> String {
    let whole = seconds.max(0.0).floor() as u64;
    format!("{:02}:{:02}", whole / 60, whole % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_round_trips_through_serde() {
        let json = serde_json::to_string(&Language::Urdu).unwrap();
        assert_eq!(json, "\"urdu\"");
        let back: Language = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Language::Urdu);
    }

    #[test]
    fn language_parse_is_case_insensitive() {
        assert_eq!(Language::parse("English"), Some(Language::English));
        assert_eq!(Language::parse("URDU"), Some(Language::Urdu));
        assert_eq!(Language::parse("french"), None);
    }

    #[test]
    fn format_time_pads_and_clamps() {
        assert_eq!(format_time(0.0), "00:00");
        assert_eq!(format_time(-3.0), "00:00");
        assert_eq!(format_time(65.4), "01:05");
        assert_eq!(format_time(600.0), "10:00");
    }
}
