//! Per-track event dispatch and channel message handling

use super::channel::CHANNEL_COUNT;
use super::voice::VoiceOwner;
use super::{NoteOffReason, PlaybackEvent, PlaybackSession};
use crate::midi::{decode_event, MetaEvent, MidiEvent, TrackStatus, PERCUSSION_CHANNEL};
use crate::opl::instruments::{instrument, percussion_instrument};
use crate::opl::RegisterSink;

/// Controller numbers acted upon
mod controller {
    pub const MODULATION: u8 = 1;
    pub const DATA_ENTRY: u8 = 6;
    pub const VOLUME: u8 = 7;
    pub const PAN: u8 = 10;
    pub const RESET_ALL: u8 = 121;
    pub const ALL_NOTES_OFF: u8 = 123;
}

/// Frequency in Hz of a (possibly bent) tone
pub fn tone_frequency(tone: f64) -> f64 {
    172.00093 * (0.057762265 * tone).exp()
}

impl<S: RegisterSink> PlaybackSession<S> {
    /// Decode and apply the next event of `track`
    pub(crate) fn dispatch_track(&mut self, track: usize) {
        let cursor = self.tracks[track];
        let TrackStatus::Running(running_status) = cursor.status else {
            return;
        };

        let Some(decoded) = decode_event(self.midi.data(), cursor.position, running_status) else {
            self.tracks[track].status = TrackStatus::Ended;
            self.emit(PlaybackEvent::TrackEnded { track });
            return;
        };

        self.tracks[track].status = TrackStatus::Running(decoded.status);
        self.apply(track, decoded.event);

        let cursor = &mut self.tracks[track];
        cursor.pending_delay += decoded.next_delta as f64;
        cursor.position = decoded.next_position;
    }

    fn apply(&mut self, track: usize, event: MidiEvent) {
        match event {
            MidiEvent::NoteOff { channel, note } => self.note_off(channel, note),
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            } => {
                if velocity == 0 {
                    self.note_off(channel, note);
                } else {
                    self.note_on(channel, note, velocity);
                }
            }
            MidiEvent::PolyPressure {
                channel,
                note,
                pressure,
            } => self.poly_pressure(channel, note, pressure),
            MidiEvent::ControlChange {
                channel,
                controller,
                value,
            } => self.control_change(channel, controller, value),
            MidiEvent::ProgramChange { channel, program } => {
                self.channels[channel as usize].patch = program;
            }
            MidiEvent::ChannelPressure { channel, pressure } => {
                self.channel_pressure(channel, pressure)
            }
            MidiEvent::PitchBend { channel, value } => {
                self.channels[channel as usize].bend = value as f64 * self.bend_sensitivity;
                self.retune_channel(channel);
            }
            MidiEvent::Meta(meta) => self.meta_event(track, meta),
            MidiEvent::System { status, length } => {
                log::trace!("Skipped system message {status:#04x} ({length} bytes)");
            }
        }
    }

    fn meta_event(&mut self, track: usize, meta: MetaEvent) {
        if meta.is_loop_start() {
            self.loop_start_pending = true;
            self.emit(PlaybackEvent::LoopStart { track });
        } else if meta.is_loop_end() {
            self.loop_end_pending = true;
            self.emit(PlaybackEvent::LoopEnd { track });
        }

        match meta {
            MetaEvent::EndOfTrack => {
                self.tracks[track].status = TrackStatus::Ended;
                self.emit(PlaybackEvent::TrackEnded { track });
            }
            MetaEvent::Tempo { micros_per_quarter } => {
                self.tempo.set_tempo(micros_per_quarter);
                log::debug!("Tempo {micros_per_quarter} us per quarter note");
                self.emit(PlaybackEvent::Tempo {
                    track,
                    micros_per_quarter,
                });
            }
            MetaEvent::Text(text) => self.emit(PlaybackEvent::MetaText { track, text }),
            MetaEvent::Other { .. } => {}
        }
    }

    fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        let ch = channel as usize;
        if self.channels[ch].active.contains(note) {
            log::trace!("Ignored repeated note on: channel {channel} note {note}");
            return;
        }

        let (instrument_id, tone) = if channel == PERCUSSION_CHANNEL {
            match percussion_instrument(note) {
                Some(id) => (id, instrument(id).percussion_note),
                None => {
                    log::warn!("No percussion patch for note {note}, ignored");
                    return;
                }
            }
        } else {
            (self.channels[ch].patch as usize, note)
        };

        let voice = self.voices.choose(instrument_id);
        if self.voices.get(voice).on {
            log::debug!("Voice {voice} stolen for channel {channel} note {note}");
            self.release_voice(voice, NoteOffReason::Stolen);
        }

        let slot = self.channels[ch].active.insert(note, tone, voice, velocity);
        let v = self.voices.get_mut(voice);
        v.on = true;
        v.instrument = instrument_id;
        v.age = 0.0;
        v.owner = Some(VoiceOwner { channel, slot });
        self.began = true;

        let state = &self.channels[ch];
        let patch = instrument(instrument_id);
        let product = velocity as u32 * state.volume as u32;
        let panning = state.panning;
        let hz = tone_frequency(tone as f64 + state.bend);

        self.driver.patch(voice, patch);
        self.driver.pan(voice, patch, panning);
        self.driver.touch(voice, patch, product);
        self.driver.note_on(voice, hz);

        self.emit(PlaybackEvent::NoteOn {
            channel,
            note,
            tone,
            voice,
            instrument: instrument_id,
            velocity,
        });
    }

    fn note_off(&mut self, channel: u8, note: u8) {
        self.release_note(channel, note, NoteOffReason::Released);
        self.channels[channel as usize].bend = 0.0;
    }

    /// Remove a sounding note and key off its voice
    fn release_note(&mut self, channel: u8, note: u8, reason: NoteOffReason) -> bool {
        let ch = channel as usize;
        let Some((record, moved)) = self.channels[ch].active.remove(note) else {
            return false;
        };

        if let Some(moved) = moved {
            if let Some(moved_record) = self.channels[ch].active.get(moved.note) {
                self.voices.get_mut(moved_record.voice).owner = Some(VoiceOwner {
                    channel,
                    slot: moved.slot,
                });
            }
        }

        let voice = self.voices.get_mut(record.voice);
        voice.on = false;
        voice.age = 0.0;
        voice.owner = None;
        self.driver.note_off(record.voice);

        self.emit(PlaybackEvent::NoteOff {
            channel,
            note,
            voice: record.voice,
            reason,
        });
        true
    }

    /// Evict whatever note currently owns `voice`
    fn release_voice(&mut self, voice: usize, reason: NoteOffReason) {
        let Some(owner) = self.voices.get(voice).owner else {
            return;
        };
        if let Some(note) = self.channels[owner.channel as usize].active.note_at(owner.slot) {
            self.release_note(owner.channel, note, reason);
        }
    }

    pub(crate) fn all_notes_off(&mut self, channel: u8, reason: NoteOffReason) {
        let ch = channel as usize;
        for slot in (0..self.channels[ch].active.len()).rev() {
            if let Some(note) = self.channels[ch].active.note_at(slot) {
                self.release_note(channel, note, reason);
            }
        }
    }

    fn poly_pressure(&mut self, channel: u8, note: u8, pressure: u8) {
        let ch = channel as usize;
        let Some(record) = self.channels[ch].active.get_mut(note) else {
            return;
        };
        record.velocity = pressure;
        let voice = record.voice;
        self.touch_note(channel, voice, pressure);
        self.emit(PlaybackEvent::Pressure {
            channel,
            note,
            voice,
            velocity: pressure,
        });
    }

    fn channel_pressure(&mut self, channel: u8, pressure: u8) {
        let ch = channel as usize;
        for note in self.channels[ch].active.notes() {
            let Some(record) = self.channels[ch].active.get_mut(note) else {
                continue;
            };
            record.velocity = pressure;
            let voice = record.voice;
            self.touch_note(channel, voice, pressure);
            self.emit(PlaybackEvent::Pressure {
                channel,
                note,
                voice,
                velocity: pressure,
            });
        }
    }

    fn control_change(&mut self, channel: u8, controller: u8, value: u8) {
        let ch = channel as usize;
        match controller {
            controller::MODULATION => self.channels[ch].vibrato = value,
            controller::DATA_ENTRY => self.bend_sensitivity = value as f64 / 8192.0,
            controller::VOLUME => {
                self.channels[ch].volume = value;
                self.retouch_channel(channel);
            }
            controller::PAN => {
                self.channels[ch].panning = crate::opl::Panning::from_controller(value);
                self.repan_channel(channel);
            }
            controller::RESET_ALL => {
                let state = &mut self.channels[ch];
                state.bend = 0.0;
                state.vibrato = 0;
                state.panning = crate::opl::Panning::Center;
                self.retune_channel(channel);
                self.retouch_channel(channel);
                self.repan_channel(channel);
            }
            controller::ALL_NOTES_OFF => self.all_notes_off(channel, NoteOffReason::AllNotesOff),
            _ => {}
        }
    }

    fn touch_note(&mut self, channel: u8, voice: usize, velocity: u8) {
        let volume = self.channels[channel as usize].volume;
        let patch = instrument(self.voices.get(voice).instrument);
        self.driver
            .touch(voice, patch, velocity as u32 * volume as u32);
    }

    /// Re-apply velocity x volume to every note on a channel
    pub(crate) fn retouch_channel(&mut self, channel: u8) {
        let ch = channel as usize % CHANNEL_COUNT;
        let notes: Vec<_> = self.channels[ch]
            .active
            .records()
            .map(|(_, r)| (r.voice, r.velocity))
            .collect();
        for (voice, velocity) in notes {
            self.touch_note(channel, voice, velocity);
        }
    }

    fn repan_channel(&mut self, channel: u8) {
        let state = &self.channels[channel as usize];
        let panning = state.panning;
        let voices: Vec<_> = state.active.records().map(|(_, r)| r.voice).collect();
        for voice in voices {
            let patch = instrument(self.voices.get(voice).instrument);
            self.driver.pan(voice, patch, panning);
        }
    }

    fn retune_channel(&mut self, channel: u8) {
        let state = &self.channels[channel as usize];
        let bend = state.bend;
        let tones: Vec<_> = state.active.records().map(|(_, r)| (r.voice, r.tone)).collect();
        for (voice, tone) in tones {
            self.driver.note_on(voice, tone_frequency(tone as f64 + bend));
        }
    }
}
