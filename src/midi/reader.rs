//! Byte-level reader for Standard MIDI File data

/// Cursor over in-memory MIDI data
///
/// Reads never fail hard: running off the end yields whatever was gathered
/// so far, which is how malformed files in the wild are tolerated.
pub struct MidiReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> MidiReader<'a> {
    /// Create a new reader positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Create a reader positioned at `pos`
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        let mut reader = Self::new(data);
        reader.seek(pos);
        reader
    }

    /// Check if we've reached the end of data
    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get current position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Seek to a position (clamped to the end of data)
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    /// Skip `len` bytes (clamped to the end of data)
    pub fn skip(&mut self, len: u64) {
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        self.seek(self.pos.saturating_add(len));
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    /// Read `len` bytes, or fewer if the data ends first
    pub fn read_bytes(&mut self, len: u64) -> &'a [u8] {
        let start = self.pos;
        self.skip(len);
        &self.data[start..self.pos]
    }

    /// Read a big-endian integer of `byte_count` bytes
    ///
    /// Stops at end of data and returns the value accumulated so far.
    pub fn read_fixed_be(&mut self, byte_count: usize) -> u64 {
        let mut value = 0u64;
        for _ in 0..byte_count {
            match self.read_u8() {
                Some(b) => value = (value << 8) | b as u64,
                None => break,
            }
        }
        value
    }

    /// Read a big-endian integer, failing if the data is too short
    pub fn read_exact_be(&mut self, byte_count: usize) -> Option<u64> {
        if self.data.len() - self.pos < byte_count {
            return None;
        }
        Some(self.read_fixed_be(byte_count))
    }

    /// Read a MIDI variable-length quantity
    ///
    /// Returns 0 on immediate end of data and the partial value if the data
    /// ends inside the quantity. Overlong quantities shift bits out instead of
    /// failing.
    pub fn read_var_len(&mut self) -> u64 {
        let mut value = 0u64;
        while let Some(b) = self.read_u8() {
            value = (value << 7) | (b & 0x7F) as u64;
            if b & 0x80 == 0 {
                break;
            }
        }
        value
    }
}
