//! VGM file reader and parser

use super::commands::{command_size, opcode, VgmCommand};
use super::header::offset;
use crate::error::{Error, Result};

/// Parsed VGM header information
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VgmHeader {
    pub version: u32,
    pub eof_offset: u32,
    pub total_samples: u32,
    pub loop_offset: u32,
    pub loop_samples: u32,
    pub rate: u32,
    pub data_offset: u32,
    pub gd3_offset: u32,
    pub ym3812_clock: u32,
    pub ymf262_clock: u32,
}

/// Parsed GD3 metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gd3Info {
    pub title: String,
    pub title_jp: String,
    pub game: String,
    pub game_jp: String,
    pub system: String,
    pub system_jp: String,
    pub composer: String,
    pub composer_jp: String,
    pub date: String,
    pub converter: String,
    pub notes: String,
}

/// VGM file reader
pub struct VgmReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> VgmReader<'a> {
    /// Create a new reader from raw VGM data
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::VgmParse("Unexpected end of data".into()))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        let lo = self.read_u8()? as u16;
        let hi = self.read_u8()? as u16;
        Ok(lo | (hi << 8))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        let lo = self.read_u16_le()? as u32;
        let hi = self.read_u16_le()? as u32;
        Ok(lo | (hi << 16))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let end = self.pos.saturating_add(len);
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| Error::VgmParse("Unexpected end of data".into()))?
            .to_vec();
        self.pos = end;
        Ok(bytes)
    }

    /// Read a u32 at a specific offset without advancing position
    fn peek_u32_at(&self, offset: usize) -> Result<u32> {
        let bytes = self
            .data
            .get(offset..offset + 4)
            .ok_or_else(|| Error::VgmParse("Offset out of bounds".into()))?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Clock field, or 0 when the header is too short to hold it
    fn chip_clock(&self, clock_offset: usize) -> u32 {
        self.peek_u32_at(clock_offset).map_or(0, |clock| clock & 0x3FFF_FFFF)
    }

    /// Validate VGM magic and parse header
    pub fn parse_header(&mut self) -> Result<VgmHeader> {
        if self.data.len() < 64 {
            return Err(Error::VgmParse("File too small for VGM header".into()));
        }
        if &self.data[0..4] != b"Vgm " {
            return Err(Error::VgmParse("Invalid VGM magic".into()));
        }

        let version = self.peek_u32_at(offset::VERSION)?;

        // Data offset is relative to 0x34; older files start data at 0x40
        let data_offset = match self.peek_u32_at(offset::DATA_OFFSET)? {
            rel if version >= 0x150 && rel != 0 => rel,
            _ => 0x0C,
        };

        let (ym3812_clock, ymf262_clock) = if version >= 0x151 {
            (
                self.chip_clock(offset::YM3812_CLOCK),
                self.chip_clock(offset::YMF262_CLOCK),
            )
        } else {
            (0, 0)
        };

        Ok(VgmHeader {
            version,
            eof_offset: self.peek_u32_at(offset::EOF_OFFSET)?,
            total_samples: self.peek_u32_at(offset::TOTAL_SAMPLES)?,
            loop_offset: self.peek_u32_at(offset::LOOP_OFFSET)?,
            loop_samples: self.peek_u32_at(offset::LOOP_SAMPLES)?,
            rate: self.peek_u32_at(offset::RATE)?,
            data_offset,
            gd3_offset: self.peek_u32_at(offset::GD3_OFFSET)?,
            ym3812_clock,
            ymf262_clock,
        })
    }

    /// Parse GD3 metadata
    pub fn parse_gd3(&mut self, header: &VgmHeader) -> Result<Option<Gd3Info>> {
        if header.gd3_offset == 0 {
            return Ok(None);
        }

        let gd3_pos = header.gd3_offset as usize + offset::GD3_OFFSET;
        if gd3_pos + 12 > self.data.len() {
            return Ok(None);
        }

        self.seek(gd3_pos);
        if self.read_bytes(4)? != b"Gd3 " {
            return Ok(None);
        }
        let _version = self.read_u32_le()?;
        let _size = self.read_u32_le()?;

        Ok(Some(Gd3Info {
            title: self.read_utf16_string()?,
            title_jp: self.read_utf16_string()?,
            game: self.read_utf16_string()?,
            game_jp: self.read_utf16_string()?,
            system: self.read_utf16_string()?,
            system_jp: self.read_utf16_string()?,
            composer: self.read_utf16_string()?,
            composer_jp: self.read_utf16_string()?,
            date: self.read_utf16_string()?,
            converter: self.read_utf16_string()?,
            notes: self.read_utf16_string()?,
        }))
    }

    /// Read a null-terminated UTF-16LE string
    fn read_utf16_string(&mut self) -> Result<String> {
        let mut units = Vec::new();
        while self.pos + 2 <= self.data.len() {
            let unit = self.read_u16_le()?;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        Ok(String::from_utf16_lossy(&units))
    }

    /// Parse all VGM commands from the data section
    pub fn parse_commands(&mut self, header: &VgmHeader) -> Result<Vec<VgmCommand>> {
        self.seek(header.data_offset as usize + offset::DATA_OFFSET);

        let mut commands = Vec::new();
        while !self.is_eof() {
            let cmd = self.parse_command()?;
            let is_end = cmd == VgmCommand::End;
            commands.push(cmd);
            if is_end {
                break;
            }
        }

        Ok(commands)
    }

    /// Parse a single VGM command
    fn parse_command(&mut self) -> Result<VgmCommand> {
        let op = self.read_u8()?;

        let cmd = match op {
            opcode::YMF262_PORT0 | opcode::YMF262_PORT1 => {
                let reg = self.read_u8()?;
                let data = self.read_u8()?;
                VgmCommand::Ymf262Write {
                    port: op - opcode::YMF262_PORT0,
                    reg,
                    data,
                }
            }
            opcode::YM3812 | opcode::YM3526 | opcode::Y8950 => {
                let reg = self.read_u8()?;
                let data = self.read_u8()?;
                VgmCommand::OplWrite {
                    chip: op,
                    reg,
                    data,
                }
            }
            opcode::WAIT_NNNN => VgmCommand::Wait {
                samples: self.read_u16_le()? as u32,
            },
            opcode::WAIT_60TH => VgmCommand::Wait { samples: 735 },
            opcode::WAIT_50TH => VgmCommand::Wait { samples: 882 },
            0x70..=0x7F => VgmCommand::Wait {
                samples: (op & 0x0F) as u32 + 1,
            },
            opcode::END => VgmCommand::End,
            opcode::DATA_BLOCK => {
                let _compat = self.read_u8()?;
                let block_type = self.read_u8()?;
                let size = self.read_u32_le()?;
                self.read_bytes((size & 0x7FFF_FFFF) as usize)?;
                VgmCommand::DataBlock { block_type, size }
            }
            _ => VgmCommand::Unknown {
                opcode: op,
                bytes: self.read_bytes(command_size(op))?,
            },
        };

        Ok(cmd)
    }
}
