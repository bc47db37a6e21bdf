//! VGM output and inspection

pub mod commands;
pub mod delay;
pub mod gd3;
pub mod header;
pub mod json;
pub mod reader;
pub mod writer;

pub use commands::VgmCommand;
pub use delay::{SampleClock, VGM_SAMPLE_RATE};
pub use gd3::Gd3Metadata;
pub use json::VgmJson;
pub use reader::{Gd3Info, VgmHeader, VgmReader};
pub use writer::VgmWriter;

use crate::error::Result;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;

fn has_gzip_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("vgz") || ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}

/// Read a VGM or VGZ file, decompressing if necessary
pub fn read_vgm_file(path: &Path) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;

    // Gzip magic counts even when the extension says otherwise
    if has_gzip_extension(path) || data.starts_with(&[0x1f, 0x8b]) {
        let mut decoder = GzDecoder::new(Cursor::new(data));
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        return Ok(decompressed);
    }
    Ok(data)
}

/// Write VGM bytes, gzip-compressed when the path ends in `.vgz`
pub fn write_vgm_file(path: &Path, data: &[u8]) -> Result<()> {
    let file = File::create(path)?;
    if has_gzip_extension(path) {
        let mut encoder = GzEncoder::new(file, Compression::best());
        encoder.write_all(data)?;
        encoder.finish()?;
    } else {
        let mut file = file;
        file.write_all(data)?;
    }
    log::info!("Wrote {} ({} bytes)", path.display(), data.len());
    Ok(())
}
