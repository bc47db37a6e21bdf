//! Parsed VGM command model

use serde::Serialize;

/// Opcodes decoded individually; all others are skipped by size
pub mod opcode {
    pub const YM3812: u8 = 0x5A;
    pub const YM3526: u8 = 0x5B;
    pub const Y8950: u8 = 0x5C;
    pub const YMF262_PORT0: u8 = 0x5E;
    pub const YMF262_PORT1: u8 = 0x5F;
    pub const WAIT_NNNN: u8 = 0x61;
    pub const WAIT_60TH: u8 = 0x62;
    pub const WAIT_50TH: u8 = 0x63;
    pub const END: u8 = 0x66;
    pub const DATA_BLOCK: u8 = 0x67;
}

/// A parsed VGM command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum VgmCommand {
    /// YMF262 (OPL3) write
    Ymf262Write { port: u8, reg: u8, data: u8 },
    /// YM3812 / YM3526 / Y8950 (OPL2-family) write
    OplWrite { chip: u8, reg: u8, data: u8 },
    /// Wait N samples
    Wait { samples: u32 },
    /// End of sound data
    End,
    /// Data block, skipped
    DataBlock { block_type: u8, size: u32 },
    /// Any other command, kept as raw operand bytes
    Unknown { opcode: u8, bytes: Vec<u8> },
}

impl VgmCommand {
    pub fn is_wait(&self) -> bool {
        matches!(self, VgmCommand::Wait { .. })
    }

    pub fn wait_samples(&self) -> Option<u32> {
        match self {
            VgmCommand::Wait { samples } => Some(*samples),
            _ => None,
        }
    }
}

/// Number of operand bytes following an opcode
pub fn command_size(opcode: u8) -> usize {
    match opcode {
        0x62 | 0x63 | 0x66 | 0x70..=0x7F | 0x80..=0x8F => 0,
        0x30..=0x3F | 0x4F | 0x50 | 0x94 => 1,
        0x40..=0x4E | 0x51..=0x5F | 0x61 | 0xA0..=0xBF => 2,
        0xC0..=0xDF => 3,
        0xE0..=0xFF | 0x90 | 0x91 | 0x95 => 4,
        0x92 => 5,
        0x93 => 10,
        0x68 => 11,
        _ => 0,
    }
}
