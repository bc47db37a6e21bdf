//! GD3 (Game Description 3) tag handling

/// GD3 tag magic
const GD3_MAGIC: &[u8; 4] = b"Gd3 ";

/// GD3 version (1.0)
const GD3_VERSION: u32 = 0x00000100;

/// Text written into the GD3 tag
///
/// Only the English fields are filled; the Japanese variants are written empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Gd3Metadata {
    pub title: String,
    pub game: String,
    pub system: String,
    pub composer: String,
    pub date: String,
    pub converter: String,
    pub notes: String,
}

impl Gd3Metadata {
    /// Tag for a file converted from MIDI
    pub fn for_midi(title: &str) -> Self {
        Self {
            title: title.to_string(),
            system: "OPL3 (YMF262)".to_string(),
            converter: format!("oplmidi {}", env!("CARGO_PKG_VERSION")),
            ..Self::default()
        }
    }
}

/// Generate GD3 tag data
pub fn generate_gd3(metadata: &Gd3Metadata) -> Vec<u8> {
    let mut data = Vec::new();

    data.extend_from_slice(GD3_MAGIC);
    data.extend_from_slice(&GD3_VERSION.to_le_bytes());

    // Size is filled in once the strings are written
    let size_offset = data.len();
    data.extend_from_slice(&0u32.to_le_bytes());

    let strings_start = data.len();

    // Track, game, system and author each come as an English/Japanese pair
    for english in [
        &metadata.title,
        &metadata.game,
        &metadata.system,
        &metadata.composer,
    ] {
        write_utf16_string(&mut data, english);
        write_utf16_string(&mut data, "");
    }
    write_utf16_string(&mut data, &metadata.date);
    write_utf16_string(&mut data, &metadata.converter);
    write_utf16_string(&mut data, &metadata.notes);

    let strings_size = (data.len() - strings_start) as u32;
    data[size_offset..size_offset + 4].copy_from_slice(&strings_size.to_le_bytes());

    data
}

/// Write a UTF-16LE null-terminated string
fn write_utf16_string(data: &mut Vec<u8>, s: &str) {
    for unit in s.encode_utf16() {
        data.extend_from_slice(&unit.to_le_bytes());
    }
    data.extend_from_slice(&[0, 0]);
}
