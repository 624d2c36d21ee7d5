//! Voice selection by difficulty level.

use std::collections::BTreeMap;

use crate::config::{NarrationConfig, VoiceSettings};

/// Voice settings keyed by level number.
///
/// A level without its own entry uses the closest configured level below
/// it, then the lowest configured level, then [`VoiceSettings::default`].
#[derive(Debug, Clone, Default)]
pub struct VoiceTable {
    voices: BTreeMap<u32, VoiceSettings>,
}

impl VoiceTable {
    pub fn from_config(config: &NarrationConfig) -> Self {
        let voices = config
            .voices
            .iter()
            .filter_map(|(key, voice)| match key.trim().parse::<u32>() {
                Ok(level) => Some((level, voice.clone())),
                Err(_) => {
                    log::warn!("narration: ignoring voice entry with non-numeric level '{key}'");
                    None
                }
            })
            .collect();
        Self { voices }
    }

    pub fn insert(&mut self, level: u32, voice: VoiceSettings) {
        self.voices.insert(level, voice);
    }

    pub fn for_level(&self, level: u32) -> VoiceSettings {
        self.voices
            .range(..=level)
            .next_back()
            .or_else(|| self.voices.iter().next())
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }
}
