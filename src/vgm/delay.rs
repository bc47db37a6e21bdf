//! Wait command generation and play-unit to sample conversion

use crate::player::PLAY_UNITS_PER_SECOND;

/// VGM wait and end commands
pub mod cmd {
    /// Wait n samples (16-bit)
    pub const WAIT_NNNN: u8 = 0x61;
    /// Wait 735 samples (1/60 second at 44100Hz)
    pub const WAIT_60TH: u8 = 0x62;
    /// Wait 882 samples (1/50 second at 44100Hz)
    pub const WAIT_50TH: u8 = 0x63;
    /// End of sound data
    pub const END: u8 = 0x66;
    /// Wait n+1 samples (n = 0-15, command 0x70-0x7F)
    pub const WAIT_N_BASE: u8 = 0x70;
}

/// VGM streams are always timed in 44.1 kHz samples
pub const VGM_SAMPLE_RATE: u32 = 44_100;

/// Shortest command sequence waiting `duration` samples
pub fn generate_delay(mut duration: u64) -> Vec<u8> {
    let mut commands = Vec::new();

    while duration > 0 {
        if (735..=751).contains(&duration)
            || duration == 1470
            || duration == 1617
            || (65536..=67152).contains(&duration)
        {
            commands.push(cmd::WAIT_60TH);
            duration -= 735;
        } else if (882..=898).contains(&duration)
            || duration == 1764
            || (67153..=67299).contains(&duration)
        {
            commands.push(cmd::WAIT_50TH);
            duration -= 882;
        } else if duration <= 16 {
            commands.push(cmd::WAIT_N_BASE + (duration as u8) - 1);
            break;
        } else if duration <= 32 {
            commands.push(cmd::WAIT_N_BASE + 15);
            duration -= 16;
        } else if duration <= 65535 {
            commands.push(cmd::WAIT_NNNN);
            commands.extend_from_slice(&(duration as u16).to_le_bytes());
            break;
        } else {
            commands.extend_from_slice(&[cmd::WAIT_NNNN, 0xFF, 0xFF]);
            duration -= 65535;
        }
    }

    commands
}

/// Converts play units to whole samples, carrying the remainder
#[derive(Debug, Clone)]
pub struct SampleClock {
    samples_per_unit: f64,
    carry: f64,
}

impl SampleClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            samples_per_unit: sample_rate as f64 / PLAY_UNITS_PER_SECOND,
            carry: 0.0,
        }
    }

    /// Whole samples covering `units`; negative spans yield nothing
    pub fn advance(&mut self, units: f64) -> u64 {
        if units <= 0.0 {
            return 0;
        }
        let exact = units * self.samples_per_unit + self.carry;
        let whole = exact.floor();
        self.carry = exact - whole;
        whole as u64
    }
}
