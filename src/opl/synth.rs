//! Software OPL3 synthesis
//!
//! A fixed-point FM core laid out like the DOSBox OPL emulator: phase
//! accumulators indexing a shared wave table, log-domain envelopes and one
//! vibrato/tremolo LFO for the whole chip. All 18 two-operator channels are
//! emulated with their stereo output enables. Four-operator pairing and the
//! rhythm section are not; the voice driver never enables either.

use super::{RegisterSink, VOICE_COUNT};
use std::f64::consts::PI;

/// Native sample rate of an OPL3 clocked at 14.31818 MHz
pub const OPL_RATE: f64 = 14_318_180.0 / 288.0;

const WAVE_BITS: u32 = 10;
const WAVE_SH: u32 = 32 - WAVE_BITS;
const LFO_SH: u32 = WAVE_SH - 10;
const LFO_MAX: u32 = 256 << LFO_SH;

const ENV_MAX: i32 = 511;
const ENV_LIMIT: i32 = (12 * 256) >> 3;

const RATE_SH: u32 = 24;
const RATE_MASK: u32 = (1 << RATE_SH) - 1;
const MUL_SH: u32 = 16;

const TREMOLO_TABLE_SIZE: usize = 52;

/// Frames mixed per pass
const BLOCK: usize = 512;

const KSL_CREATE: [u8; 16] = [64, 32, 24, 19, 16, 12, 11, 10, 8, 6, 5, 4, 3, 2, 1, 0];
const FREQ_CREATE: [u8; 16] = [1, 2, 4, 6, 8, 10, 12, 14, 16, 18, 20, 20, 24, 24, 30, 30];
const ATTACK_SAMPLES: [u8; 13] = [69, 55, 46, 40, 35, 29, 23, 20, 19, 15, 11, 10, 9];
const ENVELOPE_INCREASE: [u8; 13] = [4, 5, 6, 7, 8, 10, 12, 14, 16, 20, 24, 28, 32];

// Where each waveform lives in the wave table, its index mask and key-on phase
const WAVE_BASE: [usize; 8] = [0x000, 0x200, 0x200, 0x800, 0xA00, 0xC00, 0x100, 0x400];
const WAVE_MASK: [u32; 8] = [1023, 1023, 511, 511, 1023, 1023, 512, 1023];
const WAVE_START: [u32; 8] = [512, 0, 0, 0, 0, 512, 512, 256];

/// Vibrato steps: the low bits are a shift, the sign bit negates
const VIBRATO: [i8; 8] = [1, 0, 1, 30, -127, -128, -127, -98];
const KSL_SHIFT: [u8; 4] = [31, 1, 2, 0];

const SHIFT_KSLBASE: u32 = 16;
const SHIFT_KEYCODE: u32 = 24;

const MASK_KSR: u8 = 0x10;
const MASK_SUSTAIN: u8 = 0x20;
const MASK_VIBRATO: u8 = 0x40;

fn env_silent(level: i32) -> bool {
    level >= ENV_LIMIT
}

/// Envelope rate table row and shift for a 0..76 rate value
fn envelope_select(rate: u8) -> (usize, u32) {
    if rate < 13 * 4 {
        ((rate & 3) as usize, 12 - (rate >> 2) as u32)
    } else if rate < 15 * 4 {
        ((rate - 12 * 4) as usize, 0)
    } else {
        (12, 0)
    }
}

/// Lookup tables scaled for one output rate
struct Tables {
    freq_mul: [u32; 16],
    linear_rates: [u32; 76],
    attack_rates: [u32; 76],
    /// Eight waveforms packed into overlapping 512-entry pieces
    wave: Vec<i16>,
    /// Attenuation to linear multiplier
    mul: Vec<u16>,
    ksl: [u8; 128],
    tremolo: [u8; TREMOLO_TABLE_SIZE],
}

impl Tables {
    fn new(scale: f64) -> Self {
        let mul = (0..384)
            .map(|i| {
                let s = (i * 8) as f64;
                let p = 2f64.powf(-1.0 + (255.0 - s) / 256.0);
                (0.5 + p * (1u32 << MUL_SH) as f64) as u16
            })
            .collect();

        let mut wave = vec![0i16; 8 * 512];
        for i in 0..512 {
            wave[0x200 + i] = (((i as f64 + 0.5) * (PI / 512.0)).sin() * 4084.0) as i16;
            wave[i] = -wave[0x200 + i];
        }
        for i in 0..256 {
            wave[0x700 + i] =
                (0.5 + 2f64.powf(-1.0 + (255.0 - i as f64 * 8.0) / 256.0) * 4085.0) as i16;
            wave[0x6FF - i] = -wave[0x700 + i];
        }
        for i in 0..256 {
            wave[0x400 + i] = wave[0];
            wave[0x500 + i] = wave[0];
            wave[0x900 + i] = wave[0];
            wave[0xC00 + i] = wave[0];
            wave[0xD00 + i] = wave[0];
            wave[0x800 + i] = wave[0x200 + i];
            wave[0xA00 + i] = wave[0x200 + i * 2];
            wave[0xB00 + i] = wave[i * 2];
            wave[0xE00 + i] = wave[0x200 + i * 2];
            wave[0xF00 + i] = wave[0x200 + i * 2];
        }

        let mut ksl = [0u8; 128];
        for octave in 0..8 {
            for (i, &create) in KSL_CREATE.iter().enumerate() {
                let value = (octave as i32 * 8 - create as i32).max(0);
                ksl[octave * 16 + i] = (value * 4) as u8;
            }
        }

        let freq_scale = (0.5 + scale * (1u32 << (WAVE_SH - 1 - 10)) as f64) as u32;
        let freq_mul = FREQ_CREATE.map(|f| freq_scale * f as u32);

        let mut linear_rates = [0u32; 76];
        for (rate, slot) in linear_rates.iter_mut().enumerate() {
            let (index, shift) = envelope_select(rate as u8);
            let increase = (ENVELOPE_INCREASE[index] as u32) << (RATE_SH - shift - 3);
            *slot = (scale * increase as f64) as u32;
        }

        let mut attack_rates = [8u32 << RATE_SH; 76];
        for (rate, slot) in attack_rates.iter_mut().enumerate().take(62) {
            *slot = best_attack_add(rate as u8, scale);
        }

        let mut tremolo = [0u8; TREMOLO_TABLE_SIZE];
        for i in 0..TREMOLO_TABLE_SIZE / 2 {
            tremolo[i] = i as u8;
            tremolo[TREMOLO_TABLE_SIZE - 1 - i] = i as u8;
        }

        Self {
            freq_mul,
            linear_rates,
            attack_rates,
            wave,
            mul,
            ksl,
            tremolo,
        }
    }
}

/// Search for the attack increment whose curve lasts as long as the chip's
fn best_attack_add(rate: u8, scale: f64) -> u32 {
    let (index, shift) = envelope_select(rate);
    let original = ((((ATTACK_SAMPLES[index] as u32) << shift) as f64 / scale) as u32).max(1);
    let mut guess =
        (scale * ((ENVELOPE_INCREASE[index] as u32) << (RATE_SH - shift - 3)) as f64) as u32;
    let mut best_add = guess;
    let mut best_diff = u32::MAX;

    for _ in 0..16 {
        let mut volume = ENV_MAX;
        let mut samples = 0u32;
        let mut count = 0u32;
        while volume > 0 && samples < original * 2 {
            count = count.wrapping_add(guess);
            let change = (count >> RATE_SH) as i32;
            count &= RATE_MASK;
            if change != 0 {
                volume += (!volume * change) >> 3;
            }
            samples += 1;
        }

        let diff = original as i64 - samples as i64;
        if (diff.unsigned_abs() as u32) < best_diff {
            best_diff = diff.unsigned_abs() as u32;
            best_add = guess;
            if best_diff == 0 {
                break;
            }
        }
        if diff != 0 {
            let mul = (samples as i64) * 4096 / original as i64;
            guess = ((guess as i64 * mul) >> 12) as u32;
            guess = if diff < 0 {
                guess.saturating_add(1)
            } else {
                guess.saturating_sub(1)
            };
        }
    }
    best_add
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Envelope {
    Off,
    Release,
    Sustain,
    Decay,
    Attack,
}

/// LFO outputs shared by every operator during one block
#[derive(Debug, Clone, Copy, Default)]
struct Lfo {
    tremolo: u8,
    vibrato_shift: u32,
    vibrato_sign: i32,
}

#[derive(Debug, Clone)]
struct Operator {
    wave_base: usize,
    wave_mask: u32,
    wave_start: u32,
    wave_index: u32,
    wave_add: u32,
    wave_current: u32,

    chan_data: u32,
    freq_mul: u32,
    vibrato: u32,
    sustain_level: i32,
    total_level: i32,
    current_level: i32,
    volume: i32,

    attack_add: u32,
    decay_add: u32,
    release_add: u32,
    rate_index: u32,

    keyed: bool,
    reg_20: u8,
    reg_40: u8,
    reg_60: u8,
    reg_80: u8,
    reg_e0: u8,
    state: Envelope,
    tremolo_mask: u8,
    vib_strength: u8,
    ksr: u8,
}

impl Default for Operator {
    fn default() -> Self {
        Self {
            wave_base: WAVE_BASE[0],
            wave_mask: WAVE_MASK[0],
            wave_start: WAVE_START[0] << WAVE_SH,
            wave_index: 0,
            wave_add: 0,
            wave_current: 0,
            chan_data: 0,
            freq_mul: 0,
            vibrato: 0,
            sustain_level: ENV_MAX,
            total_level: ENV_MAX,
            current_level: ENV_MAX,
            volume: ENV_MAX,
            attack_add: 0,
            decay_add: 0,
            release_add: 0,
            rate_index: 0,
            keyed: false,
            reg_20: 0,
            reg_40: 0,
            reg_60: 0,
            reg_80: 0,
            reg_e0: 0,
            state: Envelope::Off,
            tremolo_mask: 0,
            vib_strength: 0,
            ksr: 0,
        }
    }
}

impl Operator {
    fn write_20(&mut self, tables: &Tables, value: u8) {
        let change = self.reg_20 ^ value;
        if change == 0 {
            return;
        }
        self.reg_20 = value;
        self.tremolo_mask = if value & 0x80 != 0 { 0xFF } else { 0 };
        if change & MASK_KSR != 0 {
            self.update_rates(tables);
        }
        if change & (0x0F | MASK_VIBRATO) != 0 {
            self.freq_mul = tables.freq_mul[(value & 0x0F) as usize];
            self.update_frequency();
        }
    }

    fn write_40(&mut self, value: u8) {
        if self.reg_40 == value {
            return;
        }
        self.reg_40 = value;
        self.update_attenuation();
    }

    fn write_60(&mut self, tables: &Tables, value: u8) {
        let change = self.reg_60 ^ value;
        self.reg_60 = value;
        if change & 0x0F != 0 {
            self.update_decay(tables);
        }
        if change & 0xF0 != 0 {
            self.update_attack(tables);
        }
    }

    fn write_80(&mut self, tables: &Tables, value: u8) {
        let change = self.reg_80 ^ value;
        if change == 0 {
            return;
        }
        self.reg_80 = value;
        let mut sustain = value >> 4;
        sustain |= (sustain + 1) & 0x10;
        self.sustain_level = (sustain as i32) << 4;
        if change & 0x0F != 0 {
            self.update_release(tables);
        }
    }

    fn write_e0(&mut self, value: u8, waveform_mask: u8) {
        if self.reg_e0 == value {
            return;
        }
        self.reg_e0 = value;
        let waveform = (value & waveform_mask) as usize;
        self.wave_base = WAVE_BASE[waveform];
        self.wave_start = WAVE_START[waveform] << WAVE_SH;
        self.wave_mask = WAVE_MASK[waveform];
    }

    fn update_rates(&mut self, tables: &Tables) {
        let mut ksr = ((self.chan_data >> SHIFT_KEYCODE) & 0xFF) as u8;
        if self.reg_20 & MASK_KSR == 0 {
            ksr >>= 2;
        }
        if self.ksr == ksr {
            return;
        }
        self.ksr = ksr;
        self.update_attack(tables);
        self.update_decay(tables);
        self.update_release(tables);
    }

    fn rate_slot(&self, rate: u8) -> usize {
        ((rate << 2) + self.ksr) as usize
    }

    fn update_attack(&mut self, tables: &Tables) {
        let rate = self.reg_60 >> 4;
        self.attack_add = match rate {
            0 => 0,
            _ => tables.attack_rates[self.rate_slot(rate)],
        };
    }

    fn update_decay(&mut self, tables: &Tables) {
        let rate = self.reg_60 & 0x0F;
        self.decay_add = match rate {
            0 => 0,
            _ => tables.linear_rates[self.rate_slot(rate)],
        };
    }

    fn update_release(&mut self, tables: &Tables) {
        let rate = self.reg_80 & 0x0F;
        self.release_add = match rate {
            0 => 0,
            _ => tables.linear_rates[self.rate_slot(rate)],
        };
    }

    fn update_frequency(&mut self) {
        let freq = self.chan_data & 0x3FF;
        let block = (self.chan_data >> 10) & 7;
        self.wave_add = (freq << block).wrapping_mul(self.freq_mul);
        if self.reg_20 & MASK_VIBRATO != 0 {
            self.vib_strength = (freq >> 7) as u8;
            self.vibrato = ((self.vib_strength as u32) << block).wrapping_mul(self.freq_mul);
        } else {
            self.vib_strength = 0;
            self.vibrato = 0;
        }
    }

    fn update_attenuation(&mut self) {
        let ksl_base = ((self.chan_data >> SHIFT_KSLBASE) & 0xFF) as i32;
        let level = (self.reg_40 & 0x3F) as i32;
        let shift = KSL_SHIFT[(self.reg_40 >> 6) as usize];
        self.total_level = (level << 2) + (ksl_base >> shift);
    }

    fn key_on(&mut self) {
        if !self.keyed {
            self.wave_index = self.wave_start;
            self.rate_index = 0;
            self.state = Envelope::Attack;
        }
        self.keyed = true;
    }

    fn key_off(&mut self) {
        self.keyed = false;
        if self.state != Envelope::Off {
            self.state = Envelope::Release;
        }
    }

    /// The envelope cannot move from where it is
    fn frozen(&self) -> bool {
        match self.state {
            Envelope::Off => true,
            Envelope::Attack => self.attack_add == 0,
            Envelope::Decay => self.decay_add == 0,
            Envelope::Sustain => self.reg_20 & MASK_SUSTAIN != 0 || self.release_add == 0,
            Envelope::Release => self.release_add == 0,
        }
    }

    fn is_silent(&self) -> bool {
        env_silent(self.total_level + self.volume) && self.frozen()
    }

    fn prepare(&mut self, lfo: Lfo) {
        self.current_level = self.total_level + (lfo.tremolo & self.tremolo_mask) as i32;
        self.wave_current = self.wave_add;
        if (self.vib_strength as u32) >> lfo.vibrato_shift != 0 {
            let add = (self.vibrato >> lfo.vibrato_shift) as i32;
            let add = (add ^ lfo.vibrato_sign) - lfo.vibrato_sign;
            self.wave_current = self.wave_current.wrapping_add_signed(add);
        }
    }

    fn rate_forward(&mut self, add: u32) -> i32 {
        self.rate_index += add;
        let steps = self.rate_index >> RATE_SH;
        self.rate_index &= RATE_MASK;
        steps as i32
    }

    /// Advance the envelope one sample and return its attenuation
    fn envelope(&mut self) -> i32 {
        let mut volume = self.volume;
        match self.state {
            Envelope::Off => return ENV_MAX,
            Envelope::Attack => {
                let change = self.rate_forward(self.attack_add);
                if change == 0 {
                    return volume;
                }
                volume += (!volume * change) >> 3;
                if volume < 0 {
                    self.volume = 0;
                    self.rate_index = 0;
                    self.state = Envelope::Decay;
                    return 0;
                }
            }
            Envelope::Decay => {
                volume += self.rate_forward(self.decay_add);
                if volume >= self.sustain_level {
                    if volume >= ENV_MAX {
                        self.volume = ENV_MAX;
                        self.state = Envelope::Off;
                        return ENV_MAX;
                    }
                    self.rate_index = 0;
                    self.state = Envelope::Sustain;
                }
            }
            Envelope::Sustain | Envelope::Release => {
                if self.state == Envelope::Sustain && self.reg_20 & MASK_SUSTAIN != 0 {
                    return volume;
                }
                volume += self.rate_forward(self.release_add);
                if volume >= ENV_MAX {
                    self.volume = ENV_MAX;
                    self.state = Envelope::Off;
                    return ENV_MAX;
                }
            }
        }
        self.volume = volume;
        volume
    }

    fn sample(&mut self, tables: &Tables, modulation: i32) -> i32 {
        let level = self.current_level + self.envelope();
        self.wave_index = self.wave_index.wrapping_add(self.wave_current);
        if env_silent(level) {
            return 0;
        }
        let index = (self.wave_index >> WAVE_SH) as i32 + modulation;
        let wave = tables.wave[self.wave_base + (index & self.wave_mask as i32) as usize] as i32;
        let mul = tables.mul[level as usize] as i32;
        (wave * mul) >> MUL_SH
    }
}

#[derive(Debug, Clone)]
struct Channel {
    ops: [Operator; 2],
    /// F-number, block, key code and KSL base
    chan_data: u32,
    /// Last two modulator outputs, for feedback
    old: [i32; 2],
    feedback: u32,
    reg_b0: u8,
    reg_c0: u8,
    mask_left: i32,
    mask_right: i32,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            ops: Default::default(),
            chan_data: 0,
            old: [0; 2],
            feedback: 31,
            reg_b0: 0,
            reg_c0: 0,
            mask_left: -1,
            mask_right: -1,
        }
    }
}

impl Channel {
    fn set_chan_data(&mut self, tables: &Tables, data: u32) {
        let change = self.chan_data ^ data;
        self.chan_data = data;
        for op in &mut self.ops {
            op.chan_data = data;
            op.update_frequency();
            if change & (0xFF << SHIFT_KSLBASE) != 0 {
                op.update_attenuation();
            }
            if change & (0xFF << SHIFT_KEYCODE) != 0 {
                op.update_rates(tables);
            }
        }
    }

    fn update_frequency(&mut self, tables: &Tables, reg_08: u8) {
        let data = self.chan_data & 0xFFFF;
        let ksl_base = tables.ksl[(data >> 6) as usize] as u32;
        let mut key_code = (data & 0x1C00) >> 9;
        key_code |= if reg_08 & 0x40 != 0 {
            (data & 0x100) >> 8
        } else {
            (data & 0x200) >> 9
        };
        self.set_chan_data(
            tables,
            data | (key_code << SHIFT_KEYCODE) | (ksl_base << SHIFT_KSLBASE),
        );
    }

    fn write_a0(&mut self, tables: &Tables, reg_08: u8, value: u8) {
        let change = (self.chan_data ^ value as u32) & 0xFF;
        if change != 0 {
            self.chan_data ^= change;
            self.update_frequency(tables, reg_08);
        }
    }

    fn write_b0(&mut self, tables: &Tables, reg_08: u8, value: u8) {
        let change = (self.chan_data ^ ((value as u32) << 8)) & 0x1F00;
        if change != 0 {
            self.chan_data ^= change;
            self.update_frequency(tables, reg_08);
        }
        if (value ^ self.reg_b0) & 0x20 == 0 {
            return;
        }
        self.reg_b0 = value;
        for op in &mut self.ops {
            if value & 0x20 != 0 {
                op.key_on();
            } else {
                op.key_off();
            }
        }
    }

    fn write_c0(&mut self, value: u8, opl3: bool) {
        if self.reg_c0 == value {
            return;
        }
        self.reg_c0 = value;
        self.feedback = match (value >> 1) & 7 {
            0 => 31,
            fb => 9 - fb as u32,
        };
        (self.mask_left, self.mask_right) = if opl3 {
            (
                if value & 0x10 != 0 { -1 } else { 0 },
                if value & 0x20 != 0 { -1 } else { 0 },
            )
        } else {
            (-1, -1)
        };
    }

    /// Re-derive the output routing after an OPL2/OPL3 mode switch
    fn reset_c0(&mut self, opl3: bool) {
        let value = self.reg_c0;
        self.reg_c0 ^= 0xFF;
        self.write_c0(value, opl3);
    }

    /// Add this channel into interleaved stereo `out`
    fn generate(&mut self, tables: &Tables, lfo: Lfo, out: &mut [i32]) {
        let additive = self.reg_c0 & 1 != 0;
        let silent = if additive {
            self.ops[0].is_silent() && self.ops[1].is_silent()
        } else {
            self.ops[1].is_silent()
        };
        if silent {
            self.old = [0; 2];
            return;
        }

        self.ops[0].prepare(lfo);
        self.ops[1].prepare(lfo);
        for frame in out.chunks_exact_mut(2) {
            let modulation = ((self.old[0] + self.old[1]) as u32 >> self.feedback) as i32;
            self.old[0] = self.old[1];
            self.old[1] = self.ops[0].sample(tables, modulation);
            let modulator = self.old[0];
            let sample = if additive {
                modulator + self.ops[1].sample(tables, 0)
            } else {
                self.ops[1].sample(tables, modulator)
            };
            frame[0] += sample & self.mask_left;
            frame[1] += sample & self.mask_right;
        }
    }
}

/// Register-accurate OPL3 emulation producing 16-bit stereo frames
///
/// Doubles as a [`RegisterSink`]: writes to `base_port` address the first
/// register bank, writes to `base_port + 2` and above the second.
pub struct Synth {
    tables: Tables,
    channels: [Channel; VOICE_COUNT],
    sample_rate: u32,
    base_port: u16,

    lfo_counter: u32,
    lfo_add: u32,
    vibrato_index: usize,
    tremolo_index: usize,
    vibrato_strength: u32,
    tremolo_strength: u32,
    lfo: Lfo,

    reg_08: u8,
    opl3: bool,
    waveform_select: bool,
    mix: Vec<i32>,
}

impl Synth {
    pub fn new(sample_rate: u32, base_port: u16) -> Self {
        let sample_rate = sample_rate.max(1);
        let scale = OPL_RATE / sample_rate as f64;
        let mut synth = Self {
            tables: Tables::new(scale),
            channels: Default::default(),
            sample_rate,
            base_port,
            lfo_counter: 0,
            lfo_add: (0.5 + scale * (1u32 << LFO_SH) as f64) as u32,
            vibrato_index: 0,
            tremolo_index: 0,
            vibrato_strength: 1,
            tremolo_strength: 2,
            lfo: Lfo::default(),
            reg_08: 0,
            opl3: false,
            waveform_select: false,
            mix: Vec::with_capacity(BLOCK * 2),
        };

        // Cycle every register so derived operator state matches a zeroed chip
        synth.set_opl3(true);
        for bank in 0..2 {
            for register in 0x20..=0xFF {
                synth.write_register(bank, register, 0xFF);
                synth.write_register(bank, register, 0x00);
            }
        }
        synth.set_opl3(false);
        synth
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Apply a register write to bank 0 or 1
    pub fn write_register(&mut self, bank: usize, register: u8, value: u8) {
        let offset = bank * 9;
        match register {
            0x01 if bank == 0 => self.waveform_select = value & 0x20 != 0,
            0x05 if bank == 1 => self.set_opl3(value & 1 != 0),
            0x08 if bank == 0 => self.reg_08 = value,
            0xBD if bank == 0 => {
                self.vibrato_strength = if value & 0x40 != 0 { 0 } else { 1 };
                self.tremolo_strength = if value & 0x80 != 0 { 0 } else { 2 };
            }
            0x20..=0x35 | 0x40..=0x55 | 0x60..=0x75 | 0x80..=0x95 | 0xE0..=0xF5 => {
                let Some((channel, op)) = operator_slot(register) else {
                    return;
                };
                let waveform_mask = if self.opl3 {
                    7
                } else if self.waveform_select {
                    3
                } else {
                    0
                };
                let tables = &self.tables;
                let op = &mut self.channels[offset + channel].ops[op];
                match register & 0xE0 {
                    0x20 => op.write_20(tables, value),
                    0x40 => op.write_40(value),
                    0x60 => op.write_60(tables, value),
                    0x80 => op.write_80(tables, value),
                    _ => op.write_e0(value, waveform_mask),
                }
            }
            0xA0..=0xA8 => {
                let channel = &mut self.channels[offset + (register & 0x0F) as usize];
                channel.write_a0(&self.tables, self.reg_08, value);
            }
            0xB0..=0xB8 => {
                let channel = &mut self.channels[offset + (register & 0x0F) as usize];
                channel.write_b0(&self.tables, self.reg_08, value);
            }
            0xC0..=0xC8 => {
                let opl3 = self.opl3;
                self.channels[offset + (register & 0x0F) as usize].write_c0(value, opl3);
            }
            _ => {}
        }
    }

    fn set_opl3(&mut self, on: bool) {
        if self.opl3 == on {
            return;
        }
        self.opl3 = on;
        for channel in &mut self.channels {
            channel.reset_c0(on);
        }
    }

    /// Step the LFO and return how many frames share its current output
    fn forward_lfo(&mut self, frames: u32) -> u32 {
        let step = VIBRATO[self.vibrato_index >> 2];
        self.lfo = Lfo {
            tremolo: self.tables.tremolo[self.tremolo_index] >> self.tremolo_strength,
            vibrato_shift: (step & 7) as u32 + self.vibrato_strength,
            vibrato_sign: (step >> 7) as i32,
        };

        let todo = LFO_MAX - self.lfo_counter;
        let count = todo.div_ceil(self.lfo_add);
        if count > frames {
            self.lfo_counter += frames * self.lfo_add;
            return frames;
        }
        self.lfo_counter = (self.lfo_counter + count * self.lfo_add) & (LFO_MAX - 1);
        self.vibrato_index = (self.vibrato_index + 1) & 31;
        self.tremolo_index = (self.tremolo_index + 1) % TREMOLO_TABLE_SIZE;
        count
    }

    /// Append `frames` interleaved stereo frames to `out`
    pub fn generate(&mut self, frames: usize, out: &mut Vec<i16>) {
        out.reserve(frames * 2);
        let mut remaining = frames;
        while remaining > 0 {
            let block = remaining.min(BLOCK);
            self.mix.clear();
            self.mix.resize(block * 2, 0);

            let mut done = 0;
            while done < block {
                let count = self.forward_lfo((block - done) as u32) as usize;
                let lfo = self.lfo;
                let slice = &mut self.mix[done * 2..(done + count) * 2];
                for channel in &mut self.channels {
                    channel.generate(&self.tables, lfo, slice);
                }
                done += count;
            }

            out.extend(
                self.mix
                    .iter()
                    .map(|&s| s.clamp(i16::MIN as i32, i16::MAX as i32) as i16),
            );
            remaining -= block;
        }
    }
}

/// Channel and operator addressed by an operator register
fn operator_slot(register: u8) -> Option<(usize, usize)> {
    let slot = (register & 0x1F) as usize;
    let (row, column) = (slot / 8, slot % 8);
    if row > 2 || column > 5 {
        return None;
    }
    Some((row * 3 + column % 3, column / 3))
}

impl RegisterSink for Synth {
    fn write(&mut self, port: u16, register: u8, value: u8) {
        let bank = if port >= self.base_port.saturating_add(2) { 1 } else { 0 };
        self.write_register(bank, register, value);
    }
}
