//! Offline rendering of a MIDI file to a VGM register log or WAV audio

use crate::error::Result;
use crate::midi::MidiFile;
use crate::opl::{NullSink, OutputLevel, Synth, DEFAULT_BASE_PORT};
use crate::player::tempo::units_to_seconds;
use crate::player::{PlaybackEvent, PlaybackSession, SessionConfig, TickOutcome};
use crate::vgm::{Gd3Metadata, SampleClock, VgmWriter, VGM_SAMPLE_RATE};
use serde::Serialize;
use std::io::{Seek, Write};

/// Sample rate of rendered WAV audio
pub const WAV_SAMPLE_RATE: u32 = 44_100;

/// Frames synthesized per write to the WAV stream
const WAV_CHUNK_FRAMES: u64 = 4096;

#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Loop a song that ends without a `loopEnd` marker back to its anchor
    pub loop_song: bool,
    /// Upper bound on the rendered length
    pub max_seconds: f64,
    pub metadata: Gd3Metadata,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            loop_song: false,
            max_seconds: 1200.0,
            metadata: Gd3Metadata::for_midi(""),
        }
    }
}

/// Why rendering stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStop {
    /// Every track ended
    Finished,
    /// A `loopEnd` marker sent playback back to the anchor
    LoopEnd,
    /// The song ended and was looped to its anchor
    Looped,
    /// The length limit was reached
    TimeLimit,
}

#[derive(Debug, Clone)]
pub struct RenderedVgm {
    /// Complete VGM file contents
    pub data: Vec<u8>,
    pub total_samples: u64,
    /// Length of the looped section, if the file loops
    pub loop_samples: Option<u64>,
    pub stop: RenderStop,
}

impl RenderedVgm {
    pub fn seconds(&self) -> f64 {
        self.total_samples as f64 / VGM_SAMPLE_RATE as f64
    }
}

/// Play `midi` into a VGM writer as fast as possible
pub fn render_vgm(midi: MidiFile, options: &RenderOptions) -> Result<RenderedVgm> {
    let config = SessionConfig::default();
    let mut session =
        PlaybackSession::new(midi, VgmWriter::new(DEFAULT_BASE_PORT), config);
    let mut clock = SampleClock::new(VGM_SAMPLE_RATE);
    let max_samples = (options.max_seconds.max(0.0) * VGM_SAMPLE_RATE as f64) as u64;

    // Writer position and sample count where the current anchor's tick began
    let mut anchor_mark = (session.sink().position(), 0u64);
    let mut loop_mark = None;

    let stop = loop {
        let mark = (session.sink().position(), session.sink().total_samples());
        let outcome = session.tick();
        session.drain_events();

        match outcome {
            TickOutcome::Finished => {
                if options.loop_song && session.has_begun() {
                    loop_mark = Some(anchor_mark);
                    break RenderStop::Looped;
                }
                break RenderStop::Finished;
            }
            TickOutcome::Advanced {
                delay,
                anchored,
                looped,
            } => {
                if anchored {
                    anchor_mark = mark;
                }
                if looped {
                    loop_mark = Some(anchor_mark);
                    break RenderStop::LoopEnd;
                }
                if session.has_begun() {
                    let samples = clock.advance(delay);
                    session.sink_mut().write_delay(samples);
                }
                if session.sink().total_samples() >= max_samples {
                    log::warn!(
                        "Render stopped at the {:.0} second limit",
                        options.max_seconds
                    );
                    break RenderStop::TimeLimit;
                }
            }
        }
    };

    if loop_mark.is_none() {
        session.silence();
        session.drain_events();
    }

    let mut writer = session.into_sink();
    let total_samples = writer.total_samples();
    let loop_samples = match loop_mark {
        // A loop covering no time would never advance a player
        Some((position, samples)) if samples < total_samples => {
            writer.set_loop_point(position, samples);
            Some(total_samples - samples)
        }
        _ => None,
    };
    let data = writer.finalize(&options.metadata);

    log::info!(
        "Rendered {:.1}s of VGM ({} samples, {:?}, loop {})",
        total_samples as f64 / VGM_SAMPLE_RATE as f64,
        total_samples,
        stop,
        loop_samples.map_or("none".to_string(), |s| format!("{s} samples"))
    );

    Ok(RenderedVgm {
        data,
        total_samples,
        loop_samples,
        stop,
    })
}

#[derive(Debug, Clone, Copy)]
pub struct WavOptions {
    pub sample_rate: u32,
    /// Upper bound on the rendered length, excluding the tail
    pub max_seconds: f64,
    /// Audio kept after the final note-offs so releases can ring out
    pub tail_seconds: f64,
    pub output: OutputLevel,
}

impl Default for WavOptions {
    fn default() -> Self {
        Self {
            sample_rate: WAV_SAMPLE_RATE,
            max_seconds: 1200.0,
            tail_seconds: 1.0,
            output: OutputLevel::default(),
        }
    }
}

/// Summary of a finished WAV render
#[derive(Debug, Clone, Copy)]
pub struct RenderedWav {
    /// Stereo frames written, tail included
    pub frames: u64,
    pub sample_rate: u32,
    /// Largest absolute sample value
    pub peak: u16,
    pub stop: RenderStop,
}

impl RenderedWav {
    pub fn seconds(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }
}

/// Synthesizes frames from a session's emulated chip into a WAV stream
struct WavSink<W: Write + Seek> {
    wav: hound::WavWriter<W>,
    buffer: Vec<i16>,
    frames: u64,
    peak: u16,
}

impl<W: Write + Seek> WavSink<W> {
    fn render(&mut self, synth: &mut Synth, frames: u64) -> Result<()> {
        let mut remaining = frames;
        while remaining > 0 {
            let chunk = remaining.min(WAV_CHUNK_FRAMES);
            self.buffer.clear();
            synth.generate(chunk as usize, &mut self.buffer);
            for &sample in &self.buffer {
                self.peak = self.peak.max(sample.unsigned_abs());
                self.wav.write_sample(sample)?;
            }
            self.frames += chunk;
            remaining -= chunk;
        }
        Ok(())
    }
}

/// Play `midi` through the software OPL3 and write 16-bit stereo PCM to `out`
///
/// Leading silence is skipped as for VGM. Rendering stops at the first
/// `loopEnd` marker, the end of the song or the length limit, after which
/// every voice is released and `tail_seconds` more audio is written.
pub fn render_wav<W: Write + Seek>(
    midi: MidiFile,
    options: &WavOptions,
    out: W,
) -> Result<RenderedWav> {
    let config = SessionConfig {
        output: options.output,
        ..SessionConfig::default()
    };
    let synth = Synth::new(options.sample_rate, config.base_port);
    let sample_rate = synth.sample_rate();
    let mut session = PlaybackSession::new(midi, synth, config);

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut sink = WavSink {
        wav: hound::WavWriter::new(out, spec)?,
        buffer: Vec::new(),
        frames: 0,
        peak: 0,
    };
    let mut clock = SampleClock::new(sample_rate);
    let max_frames = (options.max_seconds.max(0.0) * sample_rate as f64) as u64;

    let stop = loop {
        let outcome = session.tick();
        session.drain_events();

        match outcome {
            TickOutcome::Finished => break RenderStop::Finished,
            TickOutcome::Advanced { looped: true, .. } => break RenderStop::LoopEnd,
            TickOutcome::Advanced { delay, .. } => {
                if session.has_begun() {
                    let frames = clock.advance(delay).min(max_frames - sink.frames);
                    sink.render(session.sink_mut(), frames)?;
                }
                if sink.frames >= max_frames {
                    log::warn!(
                        "Render stopped at the {:.0} second limit",
                        options.max_seconds
                    );
                    break RenderStop::TimeLimit;
                }
            }
        }
    };

    session.silence();
    session.drain_events();
    let tail = (options.tail_seconds.max(0.0) * sample_rate as f64) as u64;
    sink.render(session.sink_mut(), tail)?;
    sink.wav.finalize()?;

    let rendered = RenderedWav {
        frames: sink.frames,
        sample_rate,
        peak: sink.peak,
        stop,
    };
    log::info!(
        "Rendered {:.1}s of audio at {} Hz ({:?}, peak {})",
        rendered.seconds(),
        sample_rate,
        stop,
        rendered.peak
    );
    Ok(rendered)
}

/// A playback event stamped with its position in the song
#[derive(Debug, Clone, Serialize)]
pub struct TimedEvent {
    pub seconds: f64,
    #[serde(flatten)]
    pub event: PlaybackEvent,
}

/// Everything a file does when played once, for `oplmidi dump`
#[derive(Debug, Clone, Serialize)]
pub struct EventDump {
    pub format: u16,
    pub division: u16,
    pub tracks: usize,
    pub duration_seconds: f64,
    pub stop: RenderStop,
    pub events: Vec<TimedEvent>,
}

/// Play `midi` against a silent chip and collect the event stream
pub fn dump_events(midi: MidiFile, max_seconds: f64) -> EventDump {
    let format = midi.format();
    let division = midi.division();
    let tracks = midi.track_count();
    let mut session = PlaybackSession::new(midi, NullSink, SessionConfig::default());
    let mut events = Vec::new();

    let stop = loop {
        let seconds = units_to_seconds(session.clock());
        let outcome = session.tick();
        events.extend(
            session
                .drain_events()
                .into_iter()
                .map(|event| TimedEvent { seconds, event }),
        );

        match outcome {
            TickOutcome::Finished => break RenderStop::Finished,
            TickOutcome::Advanced { looped: true, .. } => break RenderStop::LoopEnd,
            TickOutcome::Advanced { .. } => {
                if units_to_seconds(session.clock()) >= max_seconds {
                    break RenderStop::TimeLimit;
                }
            }
        }
    };

    EventDump {
        format,
        division,
        tracks,
        duration_seconds: units_to_seconds(session.clock()),
        stop,
        events,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::writer::{SmfBuilder, TrackBuilder};
    use crate::vgm::{VgmCommand, VgmReader};
    use std::io::Cursor;

    fn midi(smf: SmfBuilder) -> MidiFile {
        MidiFile::parse(smf.build()).unwrap()
    }

    fn melody() -> MidiFile {
        midi(
            SmfBuilder::new(96).track(
                TrackBuilder::new()
                    .note_on(0, 0, 60, 100)
                    .note_off(96, 0, 60)
                    .note_on(0, 0, 64, 100)
                    .note_off(96, 0, 64)
                    .end_of_track(0),
            ),
        )
    }

    fn waits(data: &[u8]) -> u64 {
        let mut reader = VgmReader::new(data);
        let header = reader.parse_header().unwrap();
        reader
            .parse_commands(&header)
            .unwrap()
            .iter()
            .filter_map(VgmCommand::wait_samples)
            .map(u64::from)
            .sum()
    }

    #[test]
    fn test_melody_renders_two_seconds() {
        let out = render_vgm(melody(), &RenderOptions::default()).unwrap();
        assert_eq!(out.stop, RenderStop::Finished);
        assert_eq!(out.loop_samples, None);
        assert!((88_199..=88_200).contains(&out.total_samples), "{}", out.total_samples);
        assert_eq!(waits(&out.data), out.total_samples);
        assert!((out.seconds() - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_leading_silence_skipped() {
        let out = render_vgm(
            midi(
                SmfBuilder::new(96).track(
                    TrackBuilder::new()
                        .control(0, 0, 7, 100)
                        .note_on(192, 0, 60, 100)
                        .note_off(96, 0, 60)
                        .end_of_track(0),
                ),
            ),
            &RenderOptions::default(),
        )
        .unwrap();
        assert!((44_099..=44_100).contains(&out.total_samples));
    }

    #[test]
    fn test_loop_markers_set_vgm_loop() {
        let out = render_vgm(
            midi(
                SmfBuilder::new(96).track(
                    TrackBuilder::new()
                        .note_on(0, 0, 60, 100)
                        .note_off(96, 0, 60)
                        .text(0, "loopStart")
                        .note_on(0, 0, 64, 100)
                        .note_off(96, 0, 64)
                        .text(0, "loopEnd")
                        .end_of_track(0),
                ),
            ),
            &RenderOptions::default(),
        )
        .unwrap();
        assert_eq!(out.stop, RenderStop::LoopEnd);
        let loop_samples = out.loop_samples.unwrap();
        assert!((44_099..=44_100).contains(&loop_samples));

        let mut reader = VgmReader::new(&out.data);
        let header = reader.parse_header().unwrap();
        assert_eq!(header.loop_samples as u64, loop_samples);
        assert_ne!(header.loop_offset, 0);
    }

    #[test]
    fn test_loop_song_wraps_whole_file() {
        let options = RenderOptions {
            loop_song: true,
            ..Default::default()
        };
        let out = render_vgm(melody(), &options).unwrap();
        assert_eq!(out.stop, RenderStop::Looped);
        assert_eq!(out.loop_samples, Some(out.total_samples));
    }

    #[test]
    fn test_time_limit() {
        let mut track = TrackBuilder::new();
        for _ in 0..20 {
            track = track.note_on(0, 0, 60, 100).note_off(96, 0, 60);
        }
        let options = RenderOptions {
            max_seconds: 2.5,
            ..Default::default()
        };
        let out = render_vgm(
            midi(SmfBuilder::new(96).track(track.end_of_track(0))),
            &options,
        )
        .unwrap();
        assert_eq!(out.stop, RenderStop::TimeLimit);
        // Three one-second notes pass the limit
        assert!((132_297..=132_300).contains(&out.total_samples));
    }

    fn wav(midi: MidiFile, options: &WavOptions) -> (RenderedWav, Vec<i16>) {
        let mut cursor = Cursor::new(Vec::new());
        let out = render_wav(midi, options, &mut cursor).unwrap();
        let mut reader = hound::WavReader::new(Cursor::new(cursor.into_inner())).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, out.sample_rate);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.duration() as u64, out.frames);
        let samples = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        (out, samples)
    }

    #[test]
    fn test_wav_melody_with_tail() {
        let (out, samples) = wav(melody(), &WavOptions::default());
        assert_eq!(out.stop, RenderStop::Finished);
        // Two seconds of song plus one of tail
        assert!((132_299..=132_300).contains(&out.frames), "{}", out.frames);
        assert!(out.peak > 500);
        assert_eq!(samples.len() as u64, out.frames * 2);
        let loudest = samples.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert_eq!(loudest, out.peak);
        // Released notes have died away by the end of the tail
        assert!(samples[samples.len() - 200..].iter().all(|&s| s == 0));
    }

    #[test]
    fn test_wav_without_notes_is_silent_tail() {
        let options = WavOptions {
            tail_seconds: 0.5,
            ..Default::default()
        };
        let (out, samples) = wav(
            midi(
                SmfBuilder::new(96)
                    .track(TrackBuilder::new().control(0, 0, 7, 100).end_of_track(96)),
            ),
            &options,
        );
        assert_eq!(out.frames, 22_050);
        assert_eq!(out.peak, 0);
        assert!(samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_wav_stops_at_loop_end() {
        let options = WavOptions {
            tail_seconds: 0.0,
            ..Default::default()
        };
        let (out, _) = wav(
            midi(
                SmfBuilder::new(96).track(
                    TrackBuilder::new()
                        .note_on(0, 0, 60, 100)
                        .note_off(96, 0, 60)
                        .text(0, "loopStart")
                        .note_on(0, 0, 64, 100)
                        .note_off(96, 0, 64)
                        .text(0, "loopEnd")
                        .note_on(0, 0, 67, 100)
                        .note_off(96, 0, 67)
                        .end_of_track(0),
                ),
            ),
            &options,
        );
        assert_eq!(out.stop, RenderStop::LoopEnd);
        assert!((88_199..=88_200).contains(&out.frames), "{}", out.frames);
    }

    #[test]
    fn test_wav_time_limit() {
        let options = WavOptions {
            max_seconds: 0.5,
            tail_seconds: 0.25,
            ..Default::default()
        };
        let (out, _) = wav(melody(), &options);
        assert_eq!(out.stop, RenderStop::TimeLimit);
        assert_eq!(out.frames, 22_050 + 11_025);
    }

    #[test]
    fn test_wav_gain_scales_output() {
        let quiet = WavOptions {
            output: OutputLevel::with_gain(30),
            ..Default::default()
        };
        let (loud, _) = wav(melody(), &WavOptions::default());
        let (soft, _) = wav(melody(), &quiet);
        assert!(soft.peak < loud.peak, "{} vs {}", soft.peak, loud.peak);
    }

    #[test]
    fn test_dump_stamps_events() {
        let dump = dump_events(melody(), 60.0);
        assert_eq!(dump.division, 96);
        assert_eq!(dump.tracks, 1);
        assert_eq!(dump.stop, RenderStop::Finished);

        let on_times: Vec<f64> = dump
            .events
            .iter()
            .filter(|e| matches!(e.event, PlaybackEvent::NoteOn { .. }))
            .map(|e| e.seconds)
            .collect();
        assert_eq!(on_times.len(), 2);
        assert_eq!(on_times[0], 0.0);
        assert!((on_times[1] - 1.0).abs() < 1e-9);
        assert!((dump.duration_seconds - 2.0).abs() < 1e-9);

        let json = serde_json::to_value(&dump.events[0]).unwrap();
        assert_eq!(json["type"], "note_on");
        assert_eq!(json["seconds"], 0.0);
    }
}
