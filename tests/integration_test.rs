//! Integration tests for MIDI loading, VGM/WAV rendering and parsing
//!
//! These tests write MIDI fixtures to disk, render them to VGM or WAV and
//! verify the output using the VgmReader/VgmJson models and hound

use oplmidi::error::FormatError;
use oplmidi::midi::{SmfBuilder, TrackBuilder};
use oplmidi::opl::instruments::{instrument, PERCUSSION_BASE};
use oplmidi::player::{NoteOffReason, PlaybackEvent};
use oplmidi::render::{EventDump, RenderStop, RenderedVgm};
use oplmidi::vgm::{self, Gd3Metadata, VgmCommand, VgmJson, VgmReader};
use oplmidi::{dump_events, render_vgm, render_wav, Error, MidiFile, RenderOptions, WavOptions};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tempfile::tempdir;

/// Helper to write a MIDI fixture and load it back through the file loader
fn load(dir: &Path, smf: SmfBuilder) -> MidiFile {
    let path = dir.join("test.mid");
    std::fs::write(&path, smf.build()).expect("Failed to write MIDI fixture");
    MidiFile::open(&path).expect("Failed to load MIDI fixture")
}

/// Helper to parse rendered VGM bytes into the JSON model
fn parse(data: &[u8]) -> VgmJson {
    let mut reader = VgmReader::new(data);
    let header = reader.parse_header().expect("Failed to parse header");
    let gd3 = reader.parse_gd3(&header).expect("Failed to parse GD3");
    let commands = reader.parse_commands(&header).expect("Failed to parse commands");

    VgmJson::new(&header, gd3.as_ref(), commands)
}

/// Helper to render a fixture, write it as a file and parse the file again
fn render_and_parse(smf: SmfBuilder, options: &RenderOptions, name: &str) -> (RenderedVgm, VgmJson) {
    let dir = tempdir().unwrap();
    let midi = load(dir.path(), smf);
    let rendered = render_vgm(midi, options).expect("Render failed");

    let output_path = dir.path().join(name);
    vgm::write_vgm_file(&output_path, &rendered.data).expect("Failed to write VGM");
    let data = vgm::read_vgm_file(&output_path).expect("Failed to read output VGM");
    assert_eq!(data, rendered.data);

    let parsed = parse(&data);
    (rendered, parsed)
}

fn dump(smf: SmfBuilder) -> EventDump {
    let dir = tempdir().unwrap();
    dump_events(load(dir.path(), smf), 600.0)
}

/// Count specific command types in VGM
fn count_commands<F>(vgm: &VgmJson, predicate: F) -> usize
where
    F: Fn(&VgmCommand) -> bool,
{
    vgm.commands.iter().filter(|c| predicate(c)).count()
}

/// Check if VGM contains a command matching predicate
fn has_command<F>(vgm: &VgmJson, predicate: F) -> bool
where
    F: Fn(&VgmCommand) -> bool,
{
    vgm.commands.iter().any(|c| predicate(c))
}

fn is_key_on(c: &VgmCommand) -> bool {
    matches!(c, VgmCommand::Ymf262Write { reg: 0xB0..=0xB8, data, .. } if data & 0x20 != 0)
}

fn melody() -> SmfBuilder {
    SmfBuilder::new(96).track(
        TrackBuilder::new()
            .note_on(0, 0, 60, 100)
            .note_off(96, 0, 60)
            .note_on(0, 0, 64, 100)
            .note_off(96, 0, 64)
            .end_of_track(0),
    )
}

// =============================================================================
// Rendering
// =============================================================================

#[test]
fn test_melody_renders_opl3_stream() {
    let (rendered, vgm) = render_and_parse(melody(), &RenderOptions::default(), "melody.vgm");

    assert_eq!(vgm.version, "1.61");
    assert_eq!(vgm.header.chips.get("ymf262"), Some(&14_318_180));
    assert!(!vgm.header.chips.contains_key("ym3812"));
    assert_eq!(vgm.header.total_samples as u64, rendered.total_samples);
    assert_eq!(vgm.header.loop_offset, None);

    assert_eq!(count_commands(&vgm, is_key_on), 2);
    assert!(
        has_command(&vgm, |c| matches!(c, VgmCommand::Ymf262Write { port: 1, reg: 0x05, data: 0x01 })),
        "OPL3 mode should be enabled on the second bank"
    );
    assert!(
        matches!(vgm.commands.last(), Some(VgmCommand::End)),
        "Should end with End command"
    );

    let (_, samples) = vgm.summary();
    assert_eq!(samples, rendered.total_samples);
    assert!((88_199..=88_200).contains(&samples));
}

#[test]
fn test_key_on_precedes_first_wait() {
    let (_, vgm) = render_and_parse(melody(), &RenderOptions::default(), "order.vgm");

    let first_key_on = vgm.commands.iter().position(is_key_on).unwrap();
    let first_wait = vgm.commands.iter().position(VgmCommand::is_wait).unwrap();
    assert!(first_key_on < first_wait, "leading silence should not be rendered");
}

#[test]
fn test_vgz_output_is_compressed() {
    let dir = tempdir().unwrap();
    let midi = load(dir.path(), melody());
    let rendered = render_vgm(midi, &RenderOptions::default()).unwrap();

    let path = dir.path().join("melody.vgz");
    vgm::write_vgm_file(&path, &rendered.data).unwrap();
    let raw = std::fs::read(&path).unwrap();
    assert_eq!(&raw[..2], &[0x1f, 0x8b]);
    assert_eq!(vgm::read_vgm_file(&path).unwrap(), rendered.data);
}

#[test]
fn test_gd3_metadata() {
    let options = RenderOptions {
        metadata: Gd3Metadata::for_midi("Test Song"),
        ..Default::default()
    };
    let (_, vgm) = render_and_parse(melody(), &options, "tagged.vgm");

    let gd3 = vgm.gd3.expect("GD3 tag should be present");
    assert_eq!(gd3.title, "Test Song");
    assert_eq!(gd3.system, "OPL3 (YMF262)");
    assert!(gd3.converter.starts_with("oplmidi "));
}

#[test]
fn test_loop_markers_loop_the_vgm() {
    let smf = SmfBuilder::new(96).track(
        TrackBuilder::new()
            .note_on(0, 0, 60, 100)
            .note_off(96, 0, 60)
            .text(0, "loopStart")
            .note_on(0, 0, 67, 100)
            .note_off(48, 0, 67)
            .note_on(0, 0, 64, 100)
            .note_off(48, 0, 64)
            .text(0, "loopEnd")
            .note_on(0, 0, 72, 100)
            .note_off(96, 0, 72)
            .end_of_track(0),
    );
    let (rendered, vgm) = render_and_parse(smf, &RenderOptions::default(), "loop.vgm");

    assert_eq!(rendered.stop, RenderStop::LoopEnd);
    assert!(vgm.header.loop_offset.is_some());
    let loop_samples = vgm.header.loop_samples.unwrap() as u64;
    assert_eq!(Some(loop_samples), rendered.loop_samples);
    assert!((44_099..=44_101).contains(&loop_samples));

    // Nothing after the loop end is rendered
    assert_eq!(count_commands(&vgm, is_key_on), 3);
}

#[test]
fn test_whole_song_loop() {
    let options = RenderOptions {
        loop_song: true,
        ..Default::default()
    };
    let (rendered, vgm) = render_and_parse(melody(), &options, "song.vgm");
    assert_eq!(rendered.stop, RenderStop::Looped);
    assert_eq!(vgm.header.loop_samples, Some(vgm.header.total_samples));
}

#[test]
fn test_multitrack_tempo() {
    let smf = SmfBuilder::new(480)
        .format(1)
        .track(TrackBuilder::new().tempo(0, 500_000).end_of_track(0))
        .track(
            TrackBuilder::new()
                .note_on(0, 0, 60, 100)
                .note_off(480, 0, 60)
                .end_of_track(0),
        )
        .track(
            TrackBuilder::new()
                .note_on(240, 1, 48, 90)
                .note_off(240, 1, 48)
                .end_of_track(0),
        );
    let (rendered, vgm) = render_and_parse(smf, &RenderOptions::default(), "tempo.vgm");

    assert_eq!(count_commands(&vgm, is_key_on), 2);
    // One quarter note at 120 bpm
    assert!((rendered.seconds() - 0.5).abs() < 1e-3, "{}", rendered.seconds());
}

// =============================================================================
// Event dump
// =============================================================================

#[test]
fn test_percussion_uses_drum_patch() {
    let events = dump(
        SmfBuilder::new(96).track(
            TrackBuilder::new()
                .note_on(0, 9, 36, 120)
                .note_on(0, 9, 20, 120)
                .note_off(96, 9, 36)
                .end_of_track(0),
        ),
    )
    .events;

    let ons: Vec<_> = events
        .iter()
        .filter_map(|e| match e.event {
            PlaybackEvent::NoteOn {
                tone, instrument: id, ..
            } => Some((tone, id)),
            _ => None,
        })
        .collect();
    // Note 20 has no drum patch
    assert_eq!(ons.len(), 1);
    let (tone, id) = ons[0];
    assert!(id >= PERCUSSION_BASE);
    assert_eq!(tone, instrument(id).percussion_note);
}

#[test]
fn test_voice_limit_steals_oldest() {
    let mut track = TrackBuilder::new().program(0, 0, 0);
    for note in 40..60 {
        track = track.note_on(0, 0, note, 100);
    }
    let dump = dump(SmfBuilder::new(96).track(track.end_of_track(96)));

    let ons = dump
        .events
        .iter()
        .filter(|e| matches!(e.event, PlaybackEvent::NoteOn { .. }))
        .count();
    let stolen = dump
        .events
        .iter()
        .filter(|e| {
            matches!(
                e.event,
                PlaybackEvent::NoteOff {
                    reason: NoteOffReason::Stolen,
                    ..
                }
            )
        })
        .count();
    assert_eq!(ons, 20);
    assert_eq!(stolen, 2);
}

#[test]
fn test_dump_serializes() {
    let dump = dump(melody());
    let json = serde_json::to_value(&dump).unwrap();
    assert_eq!(json["division"], 96);
    assert_eq!(json["stop"], "finished");
    assert_eq!(json["events"][0]["type"], "note_on");
    assert_eq!(json["events"][0]["note"], 60);
}

// =============================================================================
// Audio
// =============================================================================

/// Helper to render a fixture to a WAV file and read its samples back
fn render_wav_file(smf: SmfBuilder, options: &WavOptions) -> (hound::WavSpec, Vec<i16>) {
    let dir = tempdir().unwrap();
    let midi = load(dir.path(), smf);
    let path = dir.path().join("out.wav");
    let file = BufWriter::new(File::create(&path).unwrap());
    let rendered = render_wav(midi, options, file).expect("Render failed");

    let mut reader = hound::WavReader::open(&path).expect("Failed to read WAV");
    assert_eq!(reader.duration() as u64, rendered.frames);
    let spec = reader.spec();
    let samples = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    (spec, samples)
}

#[test]
fn test_melody_renders_audio() {
    let (spec, samples) = render_wav_file(melody(), &WavOptions::default());
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, 44_100);
    assert_eq!(spec.bits_per_sample, 16);
    assert_eq!(spec.sample_format, hound::SampleFormat::Int);
    assert!((264_598..=264_600).contains(&samples.len()), "{}", samples.len());

    // Sound starts on the first frame and the note is centered
    let first: Vec<i16> = samples[..4410].to_vec();
    assert!(first.iter().any(|&s| s.unsigned_abs() > 500));
    assert!(first.chunks(2).all(|frame| frame[0] == frame[1]));
}

#[test]
fn test_panned_percussion_renders_audio() {
    let smf = SmfBuilder::new(96).track(
        TrackBuilder::new()
            .control(0, 9, 10, 0)
            .note_on(0, 9, 38, 127)
            .note_off(48, 9, 38)
            .end_of_track(0),
    );
    let options = WavOptions {
        tail_seconds: 0.0,
        ..Default::default()
    };
    let (_, samples) = render_wav_file(smf, &options);
    let left = samples.iter().step_by(2).map(|s| s.unsigned_abs()).max().unwrap();
    let right = samples.iter().skip(1).step_by(2).map(|s| s.unsigned_abs()).max().unwrap();
    assert!(left > 0);
    assert_eq!(right, 0);
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_rejects_non_midi() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("junk.mid");
    std::fs::write(&path, b"RIFF....WAVEfmt ").unwrap();
    assert!(matches!(
        MidiFile::open(&path),
        Err(Error::Format(FormatError::NotMidi))
    ));

    assert!(matches!(
        MidiFile::open(&dir.path().join("missing.mid")),
        Err(Error::Io(_))
    ));
}

#[test]
fn test_rejects_non_vgm() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.mid");
    std::fs::write(&path, melody().build()).unwrap();
    let data = vgm::read_vgm_file(&path).unwrap();
    assert!(matches!(
        VgmReader::new(&data).parse_header(),
        Err(Error::VgmParse(_))
    ));
}
