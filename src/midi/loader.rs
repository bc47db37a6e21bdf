//! MIDI file loading and header validation

use super::reader::MidiReader;
use super::{TrackCursor, TrackStatus, MAX_TRACKS};
use crate::error::{FormatError, Result};
use std::path::Path;

/// A loaded Standard MIDI File
///
/// Only the header and the first delta time of every track are parsed up
/// front; the remaining events are decoded lazily from `data` at the offsets
/// held in each [`TrackCursor`].
#[derive(Debug, Clone)]
pub struct MidiFile {
    data: Vec<u8>,
    format: u16,
    division: u16,
    tracks: Vec<TrackCursor>,
}

impl MidiFile {
    /// Read and validate a MIDI file from disk
    pub fn open(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let midi = Self::parse(data)?;
        log::info!(
            "MIDI file loaded: {} (format {}, {} tracks, division {})",
            path.display(),
            midi.format,
            midi.track_count(),
            midi.division
        );
        Ok(midi)
    }

    /// Validate the header chunk and seed one cursor per track chunk
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let mut reader = MidiReader::new(&data);

        if reader.read_bytes(4) != b"MThd" {
            return Err(FormatError::NotMidi.into());
        }

        let header_len = reader
            .read_exact_be(4)
            .ok_or(FormatError::TruncatedHeader)? as u32;
        if header_len != 6 {
            return Err(FormatError::BadHeaderLength(header_len).into());
        }

        let format = reader.read_exact_be(2).ok_or(FormatError::TruncatedHeader)? as u16;
        let track_count = reader.read_exact_be(2).ok_or(FormatError::TruncatedHeader)? as usize;
        if track_count > MAX_TRACKS {
            return Err(FormatError::TooManyTracks {
                count: track_count,
                max: MAX_TRACKS,
            }
            .into());
        }
        let division = reader.read_exact_be(2).ok_or(FormatError::TruncatedHeader)? as u16;
        if division == 0 {
            return Err(FormatError::ZeroTimeDivision.into());
        }

        let mut tracks = Vec::with_capacity(track_count);
        for track in 0..track_count {
            if reader.read_bytes(4) != b"MTrk" {
                return Err(FormatError::BadTrackHeader { track }.into());
            }
            let length = reader
                .read_exact_be(4)
                .ok_or(FormatError::BadTrackHeader { track })?;
            let start = reader.position();

            let first_delay = reader.read_var_len();
            tracks.push(TrackCursor {
                position: reader.position(),
                pending_delay: first_delay as f64,
                status: TrackStatus::Running(0),
            });

            reader.seek(start);
            reader.skip(length);
        }

        Ok(Self {
            data,
            format,
            division,
            tracks,
        })
    }

    /// Raw file bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// SMF format (0, 1 or 2); informational only
    pub fn format(&self) -> u16 {
        self.format
    }

    /// Delta ticks per quarter note
    pub fn division(&self) -> u16 {
        self.division
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Cursors as seeded at load time
    pub fn initial_cursors(&self) -> &[TrackCursor] {
        &self.tracks
    }
}
