//! FM voice driver
//!
//! Translates voice-level parameters (frequency, loudness, stereo position,
//! patch) into OPL3 register writes. Voices 0..9 live on the first register
//! bank, voices 9..18 on the second bank two ports higher.

use super::instruments::{Instrument, Operator};
use super::{RegisterSink, VOICE_COUNT};

/// Operator register offsets of the nine channels in a bank
const OPERATOR_OFFSET: [u8; 9] = [0, 1, 2, 8, 9, 10, 16, 17, 18];

/// Key-on bit in the 0xB0 register
const KEY_ON: u8 = 0x20;

/// Full-scale velocity x volume product
pub const FULL_SCALE: u32 = 127 * 127;

/// Stereo position of a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum Panning {
    Left,
    Right,
    #[default]
    Center,
}

impl Panning {
    /// Bucket a MIDI pan controller value
    pub fn from_controller(value: u8) -> Self {
        if value < 48 {
            Panning::Left
        } else if value > 79 {
            Panning::Right
        } else {
            Panning::Center
        }
    }

    /// Output-enable bits removed from the 0xC0 register
    fn mask(self) -> u8 {
        match self {
            Panning::Left => 0x20,
            Panning::Right => 0x10,
            Panning::Center => 0x00,
        }
    }
}

/// Master loudness applied to every velocity x volume product
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLevel {
    /// Gain in percent (10..=300)
    pub gain_percent: u16,
    /// Scale by the gain and limit to full scale; off plays raw file levels
    pub normalize: bool,
}

impl OutputLevel {
    pub const MIN_GAIN: u16 = 10;
    pub const MAX_GAIN: u16 = 300;
    pub const GAIN_STEP: u16 = 10;

    pub fn with_gain(gain_percent: u16) -> Self {
        Self {
            gain_percent: gain_percent.clamp(Self::MIN_GAIN, Self::MAX_GAIN),
            ..Self::default()
        }
    }

    pub fn louder(self) -> Self {
        Self::with_gain(self.gain_percent.saturating_add(Self::GAIN_STEP)).normalized(self.normalize)
    }

    pub fn quieter(self) -> Self {
        Self::with_gain(self.gain_percent.saturating_sub(Self::GAIN_STEP)).normalized(self.normalize)
    }

    pub fn toggle_normalize(self) -> Self {
        self.normalized(!self.normalize)
    }

    fn normalized(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Scale a velocity x volume product
    pub fn apply(&self, product: u32) -> u32 {
        if self.normalize {
            (product * self.gain_percent as u32 / 100).min(FULL_SCALE)
        } else {
            product
        }
    }
}

impl Default for OutputLevel {
    fn default() -> Self {
        Self {
            gain_percent: 100,
            normalize: true,
        }
    }
}

/// Map a velocity x volume product onto the 0..=63 level scale
pub fn level_from_product(product: u32) -> u8 {
    if product < 72 {
        return 0;
    }
    let level = ((product as f64).ln() * 11.541561 - 48.818955).round();
    level.clamp(0.0, 63.0) as u8
}

/// Blend an operator's level register with a 0..=63 level
///
/// Operators whose total level is 0 follow the level fully; larger stored
/// levels make the operator less sensitive.
fn scaled_level(op: &Operator, level: u8) -> u8 {
    let reg = op.level as i32;
    let level = level as i32;
    ((reg | 63) - level + (reg & 63) * level / 63) as u8
}

/// Register-level driver for the 18 OPL3 voices
pub struct FmDriver<S: RegisterSink> {
    sink: S,
    base_port: u16,
    /// High byte of the last frequency written per voice
    pitch: [u8; VOICE_COUNT],
    output: OutputLevel,
}

impl<S: RegisterSink> FmDriver<S> {
    pub fn new(sink: S, base_port: u16) -> Self {
        Self {
            sink,
            base_port,
            pitch: [0; VOICE_COUNT],
            output: OutputLevel::default(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    pub fn output_level(&self) -> OutputLevel {
        self.output
    }

    pub fn set_output_level(&mut self, output: OutputLevel) {
        self.output = output;
    }

    /// Register-select port, channel slot and operator offset of a voice
    pub fn voice_location(&self, voice: usize) -> (u16, u8, u8) {
        let port = self.base_port.saturating_add(2 * (voice / 9) as u16);
        let slot = voice % 9;
        (port, slot as u8, OPERATOR_OFFSET[slot])
    }

    fn poke(&mut self, port: u16, register: u8, value: u8) {
        self.sink.write(port, register, value);
    }

    /// Release the key while keeping the frequency bits
    pub fn note_off(&mut self, voice: usize) {
        let (port, slot, _) = self.voice_location(voice);
        let value = self.pitch[voice] & !KEY_ON;
        self.poke(port, 0xB0 + slot, value);
    }

    /// Key on at `hz`
    pub fn note_on(&mut self, voice: usize, hz: f64) {
        let (port, slot, _) = self.voice_location(voice);

        let mut hz = hz;
        let mut x: u32 = 0x2000;
        while hz >= 1023.5 {
            hz /= 2.0;
            x += 0x400;
        }
        x += hz.max(0.0) as u32;

        let high = (x >> 8) as u8;
        self.poke(port, 0xA0 + slot, (x & 0xFF) as u8);
        self.poke(port, 0xB0 + slot, high);
        self.pitch[voice] = high;
    }

    /// Set loudness from a velocity x volume product
    pub fn touch(&mut self, voice: usize, instrument: &Instrument, product: u32) {
        let level = level_from_product(self.output.apply(product));
        self.touch_real(voice, instrument, level);
    }

    /// Set loudness from a 0..=63 level
    pub fn touch_real(&mut self, voice: usize, instrument: &Instrument, level: u8) {
        let (port, _, op) = self.voice_location(voice);
        let level = level.min(63);
        self.poke(port, 0x40 + op, scaled_level(&instrument.modulator, level));
        self.poke(port, 0x43 + op, scaled_level(&instrument.carrier, level));
    }

    /// Load both operators of a patch
    pub fn patch(&mut self, voice: usize, instrument: &Instrument) {
        let (port, _, op) = self.voice_location(voice);
        let m = &instrument.modulator;
        let c = &instrument.carrier;

        self.poke(port, 0x20 + op, m.characteristic);
        self.poke(port, 0x60 + op, m.attack_decay);
        self.poke(port, 0x80 + op, m.sustain_release);
        self.poke(port, 0xE0 + op, m.waveform);

        self.poke(port, 0x23 + op, c.characteristic);
        self.poke(port, 0x63 + op, c.attack_decay);
        self.poke(port, 0x83 + op, c.sustain_release);
        self.poke(port, 0xE3 + op, c.waveform);
    }

    /// Write feedback/connection with the stereo output bits
    pub fn pan(&mut self, voice: usize, instrument: &Instrument, panning: Panning) {
        let (port, slot, _) = self.voice_location(voice);
        self.poke(port, 0xC0 + slot, instrument.feedback_connection & !panning.mask());
    }

    /// Enable OPL3 mode and silence every voice
    pub fn reset(&mut self) {
        let low = self.base_port;
        let high = self.base_port.saturating_add(2);

        self.poke(low, 0x04, 0x60);
        self.poke(low, 0x04, 0x80);
        self.poke(high, 0x05, 0x00);
        self.poke(high, 0x05, 0x01);
        self.poke(high, 0x05, 0x00);
        self.poke(low, 0x01, 0x20);
        self.poke(low, 0xBD, 0x00);
        self.poke(high, 0x05, 0x01);
        self.poke(high, 0x04, 0x00);

        self.pitch = [0; VOICE_COUNT];
        self.silence(&[0; VOICE_COUNT]);
    }

    /// Key off and mute all voices, scaling each by the patch it holds
    pub fn silence(&mut self, patches: &[usize; VOICE_COUNT]) {
        for (voice, &id) in patches.iter().enumerate() {
            self.note_off(voice);
            self.touch_real(voice, super::instruments::instrument(id), 0);
        }
    }
}
