//! Hardware voice table and the voice stealing heuristic

use crate::opl::instruments::is_percussion;
use crate::opl::VOICE_COUNT;

/// Back-reference from a voice to the note it plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceOwner {
    pub channel: u8,
    /// Slot in the owner channel's active-note list
    pub slot: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Voice {
    pub on: bool,
    /// Patch last loaded into the voice
    pub instrument: usize,
    /// Play units since the voice was last allocated
    pub age: f64,
    pub owner: Option<VoiceOwner>,
}

impl Voice {
    /// Suitability of this voice for a new note using `instrument`
    pub fn score(&self, instrument: usize) -> f64 {
        let mut s = self.age;
        if !self.on {
            s += 3000.0;
        }
        if self.instrument == instrument {
            s += 0.2;
        }
        if !is_percussion(instrument) && is_percussion(self.instrument) {
            s = s * 2.0 + 9.0;
        }
        s
    }
}

#[derive(Debug, Clone, Default)]
pub struct VoiceTable {
    voices: [Voice; VOICE_COUNT],
}

impl VoiceTable {
    pub fn get(&self, voice: usize) -> &Voice {
        &self.voices[voice]
    }

    pub fn get_mut(&mut self, voice: usize) -> &mut Voice {
        &mut self.voices[voice]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter()
    }

    /// Best voice for a new note; ties go to the lowest index
    pub fn choose(&self, instrument: usize) -> usize {
        let mut best = -9.0;
        let mut chosen = 0;
        for (index, voice) in self.voices.iter().enumerate() {
            let s = voice.score(instrument);
            if s > best {
                best = s;
                chosen = index;
            }
        }
        chosen
    }

    pub fn age_all(&mut self, units: f64) {
        for voice in &mut self.voices {
            voice.age += units;
        }
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.on).count()
    }

    /// Free every voice, keeping loaded patches
    pub fn release_all(&mut self) {
        for voice in &mut self.voices {
            voice.on = false;
            voice.owner = None;
        }
    }
}
