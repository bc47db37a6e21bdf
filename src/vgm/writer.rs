//! VGM stream writer

use super::delay;
use super::gd3::{self, Gd3Metadata};
use super::header::{offset, VgmHeader, VGM_HEADER_SIZE, YMF262_CLOCK};
use crate::opl::RegisterSink;

/// VGM command bytes for YMF262 writes
pub mod cmd {
    /// Write to register bank 0
    pub const YMF262_PORT0: u8 = 0x5E;
    /// Write to register bank 1
    pub const YMF262_PORT1: u8 = 0x5F;
}

/// In-memory VGM writer for a single YMF262
///
/// Doubles as a [`RegisterSink`]: writes to the first register bank become
/// port-0 commands, writes to `base_port + 2` and above port-1 commands.
pub struct VgmWriter {
    header: VgmHeader,
    data: Vec<u8>,
    base_port: u16,
    total_samples: u64,
    /// Data offset and sample count at the loop point
    loop_point: Option<(usize, u64)>,
}

impl VgmWriter {
    pub fn new(base_port: u16) -> Self {
        let mut header = VgmHeader::new();
        header.write_u32(offset::YMF262_CLOCK, YMF262_CLOCK);
        Self {
            header,
            data: Vec::new(),
            base_port,
            total_samples: 0,
            loop_point: None,
        }
    }

    /// Place the loop start at an earlier position
    pub fn set_loop_point(&mut self, position: usize, samples: u64) {
        self.loop_point = Some((position.min(self.data.len()), samples.min(self.total_samples)));
    }

    /// Write raw bytes to data section
    pub fn write_data(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Write a YMF262 register write command
    pub fn write_register(&mut self, bank: u8, register: u8, value: u8) {
        let command = if bank == 0 {
            cmd::YMF262_PORT0
        } else {
            cmd::YMF262_PORT1
        };
        self.write_data(&[command, register, value]);
    }

    /// Write a delay
    pub fn write_delay(&mut self, samples: u64) {
        if samples == 0 {
            return;
        }
        let commands = delay::generate_delay(samples);
        self.write_data(&commands);
        self.total_samples += samples;
    }

    /// Samples written so far
    pub fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Current offset within the command data
    pub fn position(&self) -> usize {
        self.data.len()
    }

    /// Terminate the stream, append the GD3 tag and return the file bytes
    pub fn finalize(mut self, metadata: &Gd3Metadata) -> Vec<u8> {
        self.data.push(delay::cmd::END);

        self.header
            .write_u32(offset::TOTAL_SAMPLES, self.total_samples as u32);
        if let Some((position, samples)) = self.loop_point {
            let loop_offset = VGM_HEADER_SIZE + position;
            self.header
                .write_u32(offset::LOOP_OFFSET, (loop_offset - offset::LOOP_OFFSET) as u32);
            self.header.write_u32(
                offset::LOOP_SAMPLES,
                (self.total_samples - samples) as u32,
            );
        }

        let gd3_offset = VGM_HEADER_SIZE + self.data.len();
        let gd3_data = gd3::generate_gd3(metadata);
        self.header
            .write_u32(offset::GD3_OFFSET, (gd3_offset - offset::GD3_OFFSET) as u32);

        let total_len = gd3_offset + gd3_data.len();
        self.header
            .write_u32(offset::EOF_OFFSET, (total_len - offset::EOF_OFFSET) as u32);

        let mut out = Vec::with_capacity(total_len);
        out.extend_from_slice(self.header.as_bytes());
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&gd3_data);
        out
    }
}

impl RegisterSink for VgmWriter {
    fn write(&mut self, port: u16, register: u8, value: u8) {
        let bank = if port >= self.base_port.saturating_add(2) { 1 } else { 0 };
        self.write_register(bank, register, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    }

    #[test]
    fn test_register_banks() {
        let mut writer = VgmWriter::new(0x388);
        writer.write(0x388, 0xB0, 0x21);
        writer.write(0x38A, 0x05, 0x01);
        let bytes = writer.finalize(&Gd3Metadata::default());
        assert_eq!(
            &bytes[VGM_HEADER_SIZE..VGM_HEADER_SIZE + 7],
            &[0x5E, 0xB0, 0x21, 0x5F, 0x05, 0x01, 0x66]
        );
    }

    #[test]
    fn test_header_fields() {
        let mut writer = VgmWriter::new(0x388);
        writer.write_delay(100);
        let (position, samples) = (writer.position(), writer.total_samples());
        writer.write(0x388, 0x20, 0x01);
        writer.write_delay(735);
        writer.set_loop_point(position, samples);
        let bytes = writer.finalize(&Gd3Metadata::default());

        assert_eq!(&bytes[0..4], b"Vgm ");
        assert_eq!(read_u32(&bytes, offset::YMF262_CLOCK), YMF262_CLOCK);
        assert_eq!(read_u32(&bytes, offset::RATE), 0);
        assert_eq!(read_u32(&bytes, offset::TOTAL_SAMPLES), 835);
        assert_eq!(read_u32(&bytes, offset::LOOP_SAMPLES), 735);
        // 100 samples is one 0x61 wait of three bytes
        let loop_abs = read_u32(&bytes, offset::LOOP_OFFSET) as usize + offset::LOOP_OFFSET;
        assert_eq!(loop_abs, VGM_HEADER_SIZE + 3);
        assert_eq!(bytes[loop_abs], 0x5E);

        let eof = read_u32(&bytes, offset::EOF_OFFSET) as usize + offset::EOF_OFFSET;
        assert_eq!(eof, bytes.len());
        let gd3 = read_u32(&bytes, offset::GD3_OFFSET) as usize + offset::GD3_OFFSET;
        assert_eq!(&bytes[gd3..gd3 + 4], b"Gd3 ");
    }

    #[test]
    fn test_loop_point_clamped_to_written_data() {
        let mut writer = VgmWriter::new(0x388);
        writer.write_delay(10);
        writer.set_loop_point(1000, 500);
        let bytes = writer.finalize(&Gd3Metadata::default());
        assert_eq!(read_u32(&bytes, offset::LOOP_SAMPLES), 0);
        let loop_abs = read_u32(&bytes, offset::LOOP_OFFSET) as usize + offset::LOOP_OFFSET;
        // Loop lands on the end-of-data command
        assert_eq!(bytes[loop_abs], 0x66);
    }

    #[test]
    fn test_no_loop() {
        let writer = VgmWriter::new(0x388);
        let bytes = writer.finalize(&Gd3Metadata::default());
        assert_eq!(read_u32(&bytes, offset::LOOP_OFFSET), 0);
        assert_eq!(read_u32(&bytes, offset::LOOP_SAMPLES), 0);
    }
}
