//! VGM header layout

/// VGM file version
pub const VGM_VERSION: u32 = 0x161;

/// Header size in bytes
pub const VGM_HEADER_SIZE: usize = 0x100;

/// YMF262 master clock (NTSC colour burst x 4)
pub const YMF262_CLOCK: u32 = 14_318_180;

/// Header field offsets (in bytes)
pub mod offset {
    /// "Vgm " identifier
    pub const IDENT: usize = 0x00;
    /// End of file offset (relative to 0x04)
    pub const EOF_OFFSET: usize = 0x04;
    pub const VERSION: usize = 0x08;
    /// GD3 offset (relative to 0x14)
    pub const GD3_OFFSET: usize = 0x14;
    pub const TOTAL_SAMPLES: usize = 0x18;
    /// Loop offset (relative to 0x1C)
    pub const LOOP_OFFSET: usize = 0x1C;
    pub const LOOP_SAMPLES: usize = 0x20;
    /// Recording rate
    pub const RATE: usize = 0x24;
    /// VGM data offset (relative to 0x34)
    pub const DATA_OFFSET: usize = 0x34;
    pub const YM3812_CLOCK: usize = 0x50;
    pub const YMF262_CLOCK: usize = 0x5C;
}

/// VGM header block
#[derive(Debug, Clone)]
pub struct VgmHeader {
    data: [u8; VGM_HEADER_SIZE],
}

impl VgmHeader {
    pub fn new() -> Self {
        let mut header = Self {
            data: [0; VGM_HEADER_SIZE],
        };

        header.data[offset::IDENT..offset::IDENT + 4].copy_from_slice(b"Vgm ");
        header.write_u32(offset::VERSION, VGM_VERSION);
        header.write_u32(offset::DATA_OFFSET, (VGM_HEADER_SIZE - offset::DATA_OFFSET) as u32);

        header
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        if offset + 3 < VGM_HEADER_SIZE {
            self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Default for VgmHeader {
    fn default() -> Self {
        Self::new()
    }
}
