//! Standard MIDI File encoding
//!
//! Only what is needed to assemble files in memory: variable-length
//! quantities and a small builder for header and track chunks.

/// Encode a value as a MIDI variable-length quantity
pub fn encode_var_len(value: u32) -> Vec<u8> {
    let mut groups = vec![(value & 0x7F) as u8];
    let mut rest = value >> 7;
    while rest > 0 {
        groups.push(0x80 | (rest & 0x7F) as u8);
        rest >>= 7;
    }
    groups.reverse();
    groups
}

/// Event stream of a single `MTrk` chunk
#[derive(Debug, Clone, Default)]
pub struct TrackBuilder {
    data: Vec<u8>,
}

impl TrackBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta time followed by raw event bytes
    pub fn event(mut self, delta: u32, bytes: &[u8]) -> Self {
        self.data.extend(encode_var_len(delta));
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn note_on(self, delta: u32, channel: u8, note: u8, velocity: u8) -> Self {
        self.event(delta, &[0x90 | (channel & 0x0F), note, velocity])
    }

    pub fn note_off(self, delta: u32, channel: u8, note: u8) -> Self {
        self.event(delta, &[0x80 | (channel & 0x0F), note, 0])
    }

    pub fn control(self, delta: u32, channel: u8, controller: u8, value: u8) -> Self {
        self.event(delta, &[0xB0 | (channel & 0x0F), controller, value])
    }

    pub fn program(self, delta: u32, channel: u8, program: u8) -> Self {
        self.event(delta, &[0xC0 | (channel & 0x0F), program])
    }

    pub fn pitch_bend(self, delta: u32, channel: u8, value: u16) -> Self {
        let value = value.min(0x3FFF);
        self.event(
            delta,
            &[0xE0 | (channel & 0x0F), (value & 0x7F) as u8, (value >> 7) as u8],
        )
    }

    /// Meta event with a length-prefixed body
    pub fn meta(mut self, delta: u32, kind: u8, body: &[u8]) -> Self {
        self.data.extend(encode_var_len(delta));
        self.data.push(0xFF);
        self.data.push(kind);
        self.data.extend(encode_var_len(body.len() as u32));
        self.data.extend_from_slice(body);
        self
    }

    pub fn text(self, delta: u32, text: &str) -> Self {
        self.meta(delta, 0x01, text.as_bytes())
    }

    pub fn tempo(self, delta: u32, micros_per_quarter: u32) -> Self {
        let b = micros_per_quarter.to_be_bytes();
        self.meta(delta, 0x51, &b[1..])
    }

    pub fn end_of_track(self, delta: u32) -> Self {
        self.meta(delta, 0x2F, &[])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Whole-file builder producing `MThd` followed by `MTrk` chunks
#[derive(Debug, Clone)]
pub struct SmfBuilder {
    format: u16,
    division: u16,
    tracks: Vec<TrackBuilder>,
}

impl SmfBuilder {
    pub fn new(division: u16) -> Self {
        Self {
            format: 1,
            division,
            tracks: Vec::new(),
        }
    }

    pub fn format(mut self, format: u16) -> Self {
        self.format = format;
        self
    }

    pub fn track(mut self, track: TrackBuilder) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"MThd");
        out.extend_from_slice(&6u32.to_be_bytes());
        out.extend_from_slice(&self.format.to_be_bytes());
        out.extend_from_slice(&(self.tracks.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.division.to_be_bytes());
        for track in &self.tracks {
            out.extend_from_slice(b"MTrk");
            out.extend_from_slice(&(track.data.len() as u32).to_be_bytes());
            out.extend_from_slice(&track.data);
        }
        out
    }
}
