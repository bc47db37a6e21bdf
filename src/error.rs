use std::io;

/// Reasons a byte stream is rejected as a Standard MIDI File
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("Not a MIDI file (missing MThd header)")]
    NotMidi,

    #[error("Invalid MIDI header length: {0} (expected 6)")]
    BadHeaderLength(u32),

    #[error("Too many tracks in MIDI file: {count} (maximum {max})")]
    TooManyTracks { count: usize, max: usize },

    #[error("Invalid header for track {track} (expected MTrk)")]
    BadTrackHeader { track: usize },

    #[error("MIDI header is truncated")]
    TruncatedHeader,

    #[error("MIDI time division is zero")]
    ZeroTimeDivision,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("MIDI format error: {0}")]
    Format(#[from] FormatError),

    #[error("VGM parse error: {0}")]
    VgmParse(String),

    #[error("Output device error: {0}")]
    Device(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
