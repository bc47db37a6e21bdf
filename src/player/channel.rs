//! Per-channel controller state and active-note bookkeeping

use crate::opl::Panning;

/// Number of MIDI channels
pub const CHANNEL_COUNT: usize = 16;

const NOTE_COUNT: usize = 128;

/// A sounding note
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteRecord {
    /// Pitch actually played (fixed for drums)
    pub tone: u8,
    /// Voice the note sounds on
    pub voice: usize,
    pub velocity: u8,
    /// Position in the channel's dense note list
    pub slot: usize,
}

/// A note that moved to a new slot during removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovedNote {
    pub note: u8,
    pub slot: usize,
}

/// Dense list of sounding notes plus a note-number index into it
///
/// Removal swaps the last entry into the freed slot, so the slot of at most
/// one other note changes per removal.
#[derive(Debug, Clone)]
pub struct ActiveNotes {
    order: Vec<u8>,
    records: [Option<NoteRecord>; NOTE_COUNT],
}

impl Default for ActiveNotes {
    fn default() -> Self {
        Self {
            order: Vec::new(),
            records: [None; NOTE_COUNT],
        }
    }
}

impl ActiveNotes {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, note: u8) -> bool {
        self.get(note).is_some()
    }

    pub fn get(&self, note: u8) -> Option<&NoteRecord> {
        self.records.get(note as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, note: u8) -> Option<&mut NoteRecord> {
        self.records.get_mut(note as usize)?.as_mut()
    }

    /// Note number stored at `slot`
    pub fn note_at(&self, slot: usize) -> Option<u8> {
        self.order.get(slot).copied()
    }

    /// Note numbers in slot order
    pub fn notes(&self) -> Vec<u8> {
        self.order.clone()
    }

    pub fn records(&self) -> impl Iterator<Item = (u8, &NoteRecord)> + '_ {
        self.order
            .iter()
            .filter_map(|&note| self.get(note).map(|record| (note, record)))
    }

    /// Append a note and return its slot
    pub fn insert(&mut self, note: u8, tone: u8, voice: usize, velocity: u8) -> usize {
        let slot = self.order.len();
        self.order.push(note);
        self.records[note as usize & 0x7F] = Some(NoteRecord {
            tone,
            voice,
            velocity,
            slot,
        });
        slot
    }

    /// Remove a note, returning its record and the note moved into its slot
    pub fn remove(&mut self, note: u8) -> Option<(NoteRecord, Option<MovedNote>)> {
        let record = self.records.get_mut(note as usize)?.take()?;
        self.order.swap_remove(record.slot);

        let moved = self.order.get(record.slot).copied().map(|moved_note| {
            if let Some(moved_record) = self.records[moved_note as usize].as_mut() {
                moved_record.slot = record.slot;
            }
            MovedNote {
                note: moved_note,
                slot: record.slot,
            }
        });
        Some((record, moved))
    }
}

/// Controller state of one MIDI channel
#[derive(Debug, Clone)]
pub struct ChannelState {
    /// Program for melodic notes
    pub patch: u8,
    /// Pitch bend in semitones
    pub bend: f64,
    pub volume: u8,
    pub panning: Panning,
    pub vibrato: u8,
    pub active: ActiveNotes,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            patch: 0,
            bend: 0.0,
            volume: 127,
            panning: Panning::Center,
            vibrato: 0,
            active: ActiveNotes::default(),
        }
    }
}
