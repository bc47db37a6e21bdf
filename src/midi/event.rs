//! Decoding of a single track event at a stored file offset

use super::reader::MidiReader;
use super::{meta, status};

/// Channel and meta messages understood by the player
#[derive(Debug, Clone, PartialEq)]
pub enum MidiEvent {
    NoteOff { channel: u8, note: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    PolyPressure { channel: u8, note: u8, pressure: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, pressure: u8 },
    /// Signed 14-bit bend, centred on zero
    PitchBend { channel: u8, value: i32 },
    Meta(MetaEvent),
    /// System exclusive and other 0xF0..=0xFE messages (skipped)
    System { status: u8, length: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetaEvent {
    EndOfTrack,
    Tempo { micros_per_quarter: u32 },
    /// Text event, cut at the first NUL byte
    Text(String),
    Other { kind: u8, length: u64 },
}

impl MetaEvent {
    pub fn is_loop_start(&self) -> bool {
        matches!(self, MetaEvent::Text(text) if text == "loopStart")
    }

    pub fn is_loop_end(&self) -> bool {
        matches!(self, MetaEvent::Text(text) if text == "loopEnd")
    }
}

/// One decoded event together with where the track continues
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEvent {
    pub event: MidiEvent,
    /// Status byte to remember for running status
    pub status: u8,
    /// Delta time that follows the event
    pub next_delta: u64,
    /// Offset of the next event's status byte
    pub next_position: usize,
}

/// Decode the event at `position`
///
/// `running_status` is the status byte remembered from the track's previous
/// event. Returns `None` when no status byte can be read, which ends the track.
pub fn decode_event(data: &[u8], position: usize, running_status: u8) -> Option<DecodedEvent> {
    let mut reader = MidiReader::at(data, position);

    let mut status_byte = reader.read_u8()?;
    if status_byte < 0x80 {
        reader.seek(reader.position() - 1);
        status_byte = running_status | 0x80;
    }

    let channel = status_byte & 0x0F;

    let event = match status_byte & 0xF0 {
        status::NOTE_OFF => {
            let note = data_byte(&mut reader) & 0x7F;
            let _velocity = data_byte(&mut reader);
            MidiEvent::NoteOff { channel, note }
        }
        status::NOTE_ON => {
            let note = data_byte(&mut reader) & 0x7F;
            let velocity = data_byte(&mut reader);
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            }
        }
        status::POLY_PRESSURE => {
            let note = data_byte(&mut reader) & 0x7F;
            let pressure = data_byte(&mut reader);
            MidiEvent::PolyPressure {
                channel,
                note,
                pressure,
            }
        }
        status::CONTROL_CHANGE => {
            let controller = data_byte(&mut reader);
            let value = data_byte(&mut reader);
            MidiEvent::ControlChange {
                channel,
                controller,
                value,
            }
        }
        status::PROGRAM_CHANGE => MidiEvent::ProgramChange {
            channel,
            program: data_byte(&mut reader) & 0x7F,
        },
        status::CHANNEL_PRESSURE => MidiEvent::ChannelPressure {
            channel,
            pressure: data_byte(&mut reader),
        },
        status::PITCH_BEND => {
            let lsb = data_byte(&mut reader) as i32;
            let msb = data_byte(&mut reader) as i32;
            MidiEvent::PitchBend {
                channel,
                value: lsb + msb * 128 - 8192,
            }
        }
        _ if status_byte == status::META => MidiEvent::Meta(decode_meta(&mut reader)),
        _ => {
            let length = reader.read_var_len();
            reader.skip(length);
            MidiEvent::System {
                status: status_byte,
                length,
            }
        }
    };

    let next_delta = reader.read_var_len();
    Some(DecodedEvent {
        event,
        status: status_byte,
        next_delta,
        next_position: reader.position(),
    })
}

/// Missing data bytes read as zero
fn data_byte(reader: &mut MidiReader<'_>) -> u8 {
    reader.read_u8().unwrap_or(0)
}

fn decode_meta(reader: &mut MidiReader<'_>) -> MetaEvent {
    let kind = reader.read_u8().unwrap_or(0);
    let length = reader.read_var_len();

    match kind {
        meta::END_OF_TRACK => {
            reader.skip(length);
            MetaEvent::EndOfTrack
        }
        meta::TEMPO => {
            let value_len = length.min(4);
            let micros = reader.read_fixed_be(value_len as usize) as u32;
            reader.skip(length - value_len);
            MetaEvent::Tempo {
                micros_per_quarter: micros,
            }
        }
        meta::TEXT => {
            let bytes = reader.read_bytes(length);
            let text = bytes.split(|&b| b == 0).next().unwrap_or_default();
            MetaEvent::Text(String::from_utf8_lossy(text).into_owned())
        }
        _ => {
            reader.skip(length);
            MetaEvent::Other { kind, length }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8], running: u8) -> DecodedEvent {
        decode_event(bytes, 0, running).unwrap()
    }

    #[test]
    fn test_channel_messages() {
        let ev = decode(&[0x93, 60, 100, 0x10], 0);
        assert_eq!(
            ev.event,
            MidiEvent::NoteOn {
                channel: 3,
                note: 60,
                velocity: 100
            }
        );
        assert_eq!(ev.status, 0x93);
        assert_eq!(ev.next_delta, 0x10);
        assert_eq!(ev.next_position, 4);

        let ev = decode(&[0xC5, 0x85, 0x00], 0);
        assert_eq!(
            ev.event,
            MidiEvent::ProgramChange {
                channel: 5,
                program: 5
            }
        );
        assert_eq!(ev.next_position, 3);

        let ev = decode(&[0xE0, 0x00, 0x40, 0x00], 0);
        assert_eq!(ev.event, MidiEvent::PitchBend { channel: 0, value: 0 });
        let ev = decode(&[0xE0, 0x7F, 0x7F, 0x00], 0);
        assert_eq!(
            ev.event,
            MidiEvent::PitchBend {
                channel: 0,
                value: 8191
            }
        );
    }

    #[test]
    fn test_running_status() {
        // Data byte first: reuse the remembered status
        let ev = decode(&[64, 0, 0x00], 0x91);
        assert_eq!(ev.event, MidiEvent::NoteOn { channel: 1, note: 64, velocity: 0 });
        assert_eq!(ev.status, 0x91);
        assert_eq!(ev.next_position, 3);

        // Remembered status is forced into the status range
        let ev = decode(&[60, 1, 0x00], 0x12);
        assert_eq!(ev.event, MidiEvent::NoteOn { channel: 2, note: 60, velocity: 1 });
    }

    #[test]
    fn test_truncated_event_reads_zero() {
        let ev = decode(&[0x90, 60], 0);
        assert_eq!(
            ev.event,
            MidiEvent::NoteOn {
                channel: 0,
                note: 60,
                velocity: 0
            }
        );
        assert_eq!(ev.next_delta, 0);
        assert_eq!(ev.next_position, 2);

        assert_eq!(decode_event(&[0x90, 60], 2, 0x90), None);
        assert_eq!(decode_event(&[], 0, 0), None);
    }

    #[test]
    fn test_meta_events() {
        let ev = decode(&[0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20, 0x60], 0);
        assert_eq!(
            ev.event,
            MidiEvent::Meta(MetaEvent::Tempo {
                micros_per_quarter: 500_000
            })
        );
        assert_eq!(ev.next_delta, 0x60);

        // Oversized tempo body: first four bytes used, rest skipped
        let ev = decode(&[0xFF, 0x51, 0x05, 0, 0x07, 0xA1, 0x20, 0xEE, 0x00], 0);
        assert_eq!(
            ev.event,
            MidiEvent::Meta(MetaEvent::Tempo {
                micros_per_quarter: 500_000
            })
        );
        assert_eq!(ev.next_position, 9);

        let ev = decode(&[0xFF, 0x2F, 0x00], 0);
        assert_eq!(ev.event, MidiEvent::Meta(MetaEvent::EndOfTrack));
        assert_eq!(ev.status, 0xFF);

        let ev = decode(&[0xFF, 0x03, 0x02, b'h', b'i', 0x00], 0);
        assert_eq!(ev.event, MidiEvent::Meta(MetaEvent::Other { kind: 3, length: 2 }));
        assert_eq!(ev.next_position, 6);
    }

    #[test]
    fn test_loop_markers() {
        let mut bytes = vec![0xFF, 0x01, 0x0A];
        bytes.extend_from_slice(b"loopStart\0");
        bytes.push(0);
        let ev = decode(&bytes, 0);
        match &ev.event {
            MidiEvent::Meta(m) => {
                assert!(m.is_loop_start());
                assert!(!m.is_loop_end());
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut bytes = vec![0xFF, 0x01, 0x07];
        bytes.extend_from_slice(b"loopEnd");
        bytes.push(0);
        let MidiEvent::Meta(m) = decode(&bytes, 0).event else {
            panic!("expected meta");
        };
        assert!(m.is_loop_end());

        let mut bytes = vec![0xFF, 0x01, 0x07];
        bytes.extend_from_slice(b"LoopEnd");
        bytes.push(0);
        let MidiEvent::Meta(m) = decode(&bytes, 0).event else {
            panic!("expected meta");
        };
        assert!(!m.is_loop_end());
    }

    #[test]
    fn test_sysex_skipped() {
        let ev = decode(&[0xF0, 0x03, 0x7E, 0x7F, 0xF7, 0x05], 0);
        assert_eq!(
            ev.event,
            MidiEvent::System {
                status: 0xF0,
                length: 3
            }
        );
        assert_eq!(ev.next_delta, 5);
        assert_eq!(ev.next_position, 6);
    }
}
