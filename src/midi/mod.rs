//! Standard MIDI File parsing

pub mod event;
pub mod loader;
pub mod reader;
pub mod writer;

pub use event::{decode_event, DecodedEvent, MetaEvent, MidiEvent};
pub use loader::MidiFile;
pub use reader::MidiReader;
pub use writer::{encode_var_len, SmfBuilder, TrackBuilder};

/// Maximum number of tracks accepted in a file
pub const MAX_TRACKS: usize = 100;

/// MIDI channel reserved for percussion (channel 10, zero-based)
pub const PERCUSSION_CHANNEL: u8 = 9;

/// Status byte groups
pub mod status {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_PRESSURE: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_PRESSURE: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;
    pub const SYSTEM: u8 = 0xF0;
    pub const META: u8 = 0xFF;
}

/// Meta event types
pub mod meta {
    pub const TEXT: u8 = 0x01;
    pub const END_OF_TRACK: u8 = 0x2F;
    pub const TEMPO: u8 = 0x51;
}

/// Whether a track still has events to play
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    /// Active; holds the last status byte for running status
    Running(u8),
    /// End-of-track seen (or the track data ran out)
    Ended,
}

/// Playback position within one track chunk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackCursor {
    /// Offset of the next event in the file data
    pub position: usize,
    /// Ticks until the next event is due
    pub pending_delay: f64,
    pub status: TrackStatus,
}

impl TrackCursor {
    pub fn is_active(&self) -> bool {
        matches!(self.status, TrackStatus::Running(_))
    }

    /// Whether the next event is due in the current tick
    pub fn is_due(&self) -> bool {
        self.is_active() && self.pending_delay <= 0.0
    }
}
