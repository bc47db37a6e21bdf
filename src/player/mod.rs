//! MIDI playback engine
//!
//! A [`PlaybackSession`] owns every piece of mutable playback state: track
//! cursors, channel controllers, the voice table, tempo and the loop anchor.
//! It drives an [`FmDriver`] over whatever [`RegisterSink`] it is given.

pub mod channel;
pub mod dispatch;
pub mod scheduler;
pub mod tempo;
pub mod voice;

pub use channel::{ActiveNotes, ChannelState, NoteRecord, CHANNEL_COUNT};
pub use scheduler::{LoopAnchor, LoopState, TickOutcome};
pub use tempo::{TempoState, PLAY_UNITS_PER_SECOND};
pub use voice::{Voice, VoiceOwner, VoiceTable};

use crate::midi::{MidiFile, TrackCursor};
use crate::opl::{FmDriver, OutputLevel, RegisterSink, DEFAULT_BASE_PORT};
use serde::Serialize;

/// Default pitch bend range: two semitones over the full bend
pub const DEFAULT_BEND_SENSITIVITY: f64 = 2.0 / 8192.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Register-select port of the first bank
    pub base_port: u16,
    pub output: OutputLevel,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            output: OutputLevel::default(),
        }
    }
}

/// Why a note stopped sounding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteOffReason {
    Released,
    Stolen,
    AllNotesOff,
    Silenced,
}

/// Observable playback activity, for displays and dumps
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlaybackEvent {
    NoteOn {
        channel: u8,
        note: u8,
        tone: u8,
        voice: usize,
        instrument: usize,
        velocity: u8,
    },
    NoteOff {
        channel: u8,
        note: u8,
        voice: usize,
        reason: NoteOffReason,
    },
    Pressure {
        channel: u8,
        note: u8,
        voice: usize,
        velocity: u8,
    },
    MetaText {
        track: usize,
        text: String,
    },
    Tempo {
        track: usize,
        micros_per_quarter: u32,
    },
    LoopStart {
        track: usize,
    },
    LoopEnd {
        track: usize,
    },
    TrackEnded {
        track: usize,
    },
}

/// All state of one playing MIDI file
pub struct PlaybackSession<S: RegisterSink> {
    midi: MidiFile,
    driver: FmDriver<S>,
    tracks: Vec<TrackCursor>,
    channels: [ChannelState; CHANNEL_COUNT],
    voices: VoiceTable,
    tempo: TempoState,
    bend_sensitivity: f64,
    loop_state: LoopState,
    anchor: LoopAnchor,
    loop_start_pending: bool,
    loop_end_pending: bool,
    /// Play units owed to the transport before the next tick
    play_wait: f64,
    began: bool,
    /// Play units of music elapsed, loops included
    clock: f64,
    events: Vec<PlaybackEvent>,
}

impl<S: RegisterSink> PlaybackSession<S> {
    /// Start a session and reset the chip
    pub fn new(midi: MidiFile, sink: S, config: SessionConfig) -> Self {
        let mut driver = FmDriver::new(sink, config.base_port);
        driver.set_output_level(config.output);
        driver.reset();

        let tracks = midi.initial_cursors().to_vec();
        let tempo = TempoState::new(midi.division());
        Self {
            anchor: LoopAnchor {
                tracks: tracks.clone(),
                play_wait: 0.0,
            },
            midi,
            driver,
            tracks,
            channels: Default::default(),
            voices: VoiceTable::default(),
            tempo,
            bend_sensitivity: DEFAULT_BEND_SENSITIVITY,
            loop_state: LoopState::AwaitingLoopStart,
            loop_start_pending: true,
            loop_end_pending: false,
            play_wait: 0.0,
            began: false,
            clock: 0.0,
            events: Vec::new(),
        }
    }

    pub fn midi(&self) -> &MidiFile {
        &self.midi
    }

    pub fn tracks(&self) -> &[TrackCursor] {
        &self.tracks
    }

    pub fn channel(&self, channel: u8) -> &ChannelState {
        &self.channels[channel as usize & 0x0F]
    }

    pub fn voices(&self) -> &VoiceTable {
        &self.voices
    }

    pub fn tempo(&self) -> &TempoState {
        &self.tempo
    }

    pub fn bend_sensitivity(&self) -> f64 {
        self.bend_sensitivity
    }

    pub fn loop_state(&self) -> LoopState {
        self.loop_state
    }

    pub fn loop_anchor(&self) -> &LoopAnchor {
        &self.anchor
    }

    pub fn driver(&self) -> &FmDriver<S> {
        &self.driver
    }

    pub fn sink(&self) -> &S {
        self.driver.sink()
    }

    pub fn sink_mut(&mut self) -> &mut S {
        self.driver.sink_mut()
    }

    pub fn into_sink(self) -> S {
        self.driver.into_sink()
    }

    /// Whether any note has sounded yet
    pub fn has_begun(&self) -> bool {
        self.began
    }

    /// Elapsed music in play units
    pub fn clock(&self) -> f64 {
        self.clock
    }

    pub fn play_wait(&self) -> f64 {
        self.play_wait
    }

    /// Count elapsed wall time against the pending wait
    pub fn consume_wait(&mut self, units: f64) {
        self.play_wait -= units;
    }

    /// True once every track has ended
    pub fn is_finished(&self) -> bool {
        self.tracks.iter().all(|t| !t.is_active())
    }

    pub fn output_level(&self) -> OutputLevel {
        self.driver.output_level()
    }

    /// Change the master level and re-apply it to sounding notes
    pub fn set_output_level(&mut self, output: OutputLevel) {
        self.driver.set_output_level(output);
        for channel in 0..CHANNEL_COUNT as u8 {
            self.retouch_channel(channel);
        }
    }

    /// Take the activity recorded since the last call
    pub fn drain_events(&mut self) -> Vec<PlaybackEvent> {
        std::mem::take(&mut self.events)
    }

    /// Key off every note and mute every voice
    pub fn silence(&mut self) {
        for channel in 0..CHANNEL_COUNT as u8 {
            self.all_notes_off(channel, NoteOffReason::Silenced);
        }
        let patches = std::array::from_fn(|voice| self.voices.get(voice).instrument);
        self.voices.release_all();
        self.driver.silence(&patches);
    }

    fn emit(&mut self, event: PlaybackEvent) {
        log::trace!("{event:?}");
        self.events.push(event);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::midi::writer::{SmfBuilder, TrackBuilder};
    use crate::opl::RecordingSink;

    pub(crate) fn session(smf: SmfBuilder) -> PlaybackSession<RecordingSink> {
        let midi = MidiFile::parse(smf.build()).unwrap();
        PlaybackSession::new(midi, RecordingSink::new(), SessionConfig::default())
    }

    /// Every voice that is on is owned by exactly one active note pointing back at it
    pub(crate) fn assert_consistent<S: RegisterSink>(session: &PlaybackSession<S>) {
        let voices = session.voices();
        assert!(voices.active_count() <= crate::opl::VOICE_COUNT);

        for (index, voice) in voices.iter().enumerate() {
            let owners: Vec<_> = (0..CHANNEL_COUNT as u8)
                .flat_map(|ch| {
                    session
                        .channel(ch)
                        .active
                        .records()
                        .filter(|(_, r)| r.voice == index)
                        .map(move |(note, r)| (ch, note, r.slot))
                        .collect::<Vec<_>>()
                })
                .collect();
            if voice.on {
                assert_eq!(owners.len(), 1, "voice {index} owners {owners:?}");
                let (ch, _, slot) = owners[0];
                assert_eq!(voice.owner, Some(VoiceOwner { channel: ch, slot }));
            } else {
                assert!(owners.is_empty(), "idle voice {index} owned by {owners:?}");
                assert_eq!(voice.owner, None);
            }
        }
    }

    #[test]
    fn test_new_session_resets_chip() {
        let s = session(SmfBuilder::new(96).track(TrackBuilder::new().end_of_track(0)));
        let writes = &s.sink().writes;
        assert_eq!(writes.len(), 9 + 18 * 3);
        assert!(!s.has_begun());
        assert_eq!(s.loop_state(), LoopState::AwaitingLoopStart);
        assert_eq!(s.bend_sensitivity(), DEFAULT_BEND_SENSITIVITY);
        for ch in 0..16 {
            assert_eq!(s.channel(ch).volume, 127);
        }
    }

    #[test]
    fn test_output_level_retouches_notes() {
        let mut s = session(
            SmfBuilder::new(96).track(
                TrackBuilder::new()
                    .note_on(0, 0, 60, 100)
                    .end_of_track(96),
            ),
        );
        s.tick();
        s.tick();
        s.sink_mut().clear();

        s.set_output_level(OutputLevel::with_gain(50));
        assert_eq!(s.output_level().gain_percent, 50);
        let writes = &s.sink().writes;
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].register, 0x40);
        assert_eq!(writes[1].register, 0x43);
    }

    #[test]
    fn test_silence_releases_everything() {
        let mut s = session(
            SmfBuilder::new(96).track(
                TrackBuilder::new()
                    .program(0, 1, 40)
                    .note_on(0, 0, 60, 100)
                    .note_on(0, 1, 62, 100)
                    .end_of_track(96),
            ),
        );
        for _ in 0..4 {
            s.tick();
        }
        assert_eq!(s.voices().active_count(), 2);
        assert_eq!(s.voices().get(1).instrument, 40);
        s.drain_events();

        s.sink_mut().clear();
        s.silence();
        let violin = crate::opl::instruments::instrument(40);
        assert_eq!(s.sink().last_value(0x388, 0x41), Some(violin.modulator.level | 63));
        assert_eq!(s.voices().active_count(), 0);
        assert!(s.channel(0).active.is_empty());
        let offs = s
            .drain_events()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    PlaybackEvent::NoteOff {
                        reason: NoteOffReason::Silenced,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(offs, 2);
        assert_consistent(&s);
    }
}
