//! JSON serialization types for VGM data

use super::commands::VgmCommand;
use super::reader::{Gd3Info, VgmHeader};
use serde::Serialize;
use std::collections::BTreeMap;

/// Top-level JSON structure for a VGM file
#[derive(Debug, Clone, Serialize)]
pub struct VgmJson {
    /// VGM version as a string (e.g., "1.61")
    pub version: String,
    pub header: VgmHeaderJson,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gd3: Option<Gd3Json>,
    pub commands: Vec<VgmCommand>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VgmHeaderJson {
    pub total_samples: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_samples: Option<u32>,
    /// Playback rate (Hz)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<u32>,
    /// Clock of each FM chip present, by name
    pub chips: BTreeMap<&'static str, u32>,
}

/// JSON representation of GD3 metadata
#[derive(Debug, Clone, Serialize)]
pub struct Gd3Json {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title_jp: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub game: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub game_jp: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub system: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub system_jp: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub composer: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub composer_jp: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub date: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub converter: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

impl VgmJson {
    /// Create a VgmJson from parsed VGM data
    pub fn new(header: &VgmHeader, gd3: Option<&Gd3Info>, commands: Vec<VgmCommand>) -> Self {
        Self {
            version: format_version(header.version),
            header: VgmHeaderJson::from(header),
            gd3: gd3.map(Gd3Json::from),
            commands,
        }
    }

    /// Count of register writes and total wait in samples
    pub fn summary(&self) -> (usize, u64) {
        self.commands.iter().fold((0, 0), |(writes, samples), cmd| match cmd {
            VgmCommand::Ymf262Write { .. } | VgmCommand::OplWrite { .. } => (writes + 1, samples),
            VgmCommand::Wait { samples: n } => (writes, samples + *n as u64),
            _ => (writes, samples),
        })
    }
}

fn non_zero(value: u32) -> Option<u32> {
    (value != 0).then_some(value)
}

impl From<&VgmHeader> for VgmHeaderJson {
    fn from(header: &VgmHeader) -> Self {
        let mut chips = BTreeMap::new();
        if header.ymf262_clock != 0 {
            chips.insert("ymf262", header.ymf262_clock);
        }
        if header.ym3812_clock != 0 {
            chips.insert("ym3812", header.ym3812_clock);
        }

        Self {
            total_samples: header.total_samples,
            loop_offset: non_zero(header.loop_offset),
            loop_samples: non_zero(header.loop_samples),
            rate: non_zero(header.rate),
            chips,
        }
    }
}

impl From<&Gd3Info> for Gd3Json {
    fn from(gd3: &Gd3Info) -> Self {
        Self {
            title: gd3.title.clone(),
            title_jp: gd3.title_jp.clone(),
            game: gd3.game.clone(),
            game_jp: gd3.game_jp.clone(),
            system: gd3.system.clone(),
            system_jp: gd3.system_jp.clone(),
            composer: gd3.composer.clone(),
            composer_jp: gd3.composer_jp.clone(),
            date: gd3.date.clone(),
            converter: gd3.converter.clone(),
            notes: gd3.notes.clone(),
        }
    }
}

/// Format a BCD version number as a string
fn format_version(version: u32) -> String {
    let major = (version >> 8) & 0xFF;
    let minor = version & 0xFF;
    format!("{}.{:02x}", major, minor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_version() {
        assert_eq!(format_version(0x161), "1.61");
        assert_eq!(format_version(0x150), "1.50");
        assert_eq!(format_version(0x100), "1.00");
    }

    #[test]
    fn test_header_json_omits_empty_fields() {
        let header = VgmHeader {
            version: 0x161,
            total_samples: 100,
            ymf262_clock: 14_318_180,
            ..Default::default()
        };
        let json = VgmJson::new(
            &header,
            None,
            vec![
                VgmCommand::Ymf262Write {
                    port: 0,
                    reg: 0xB0,
                    data: 0x20,
                },
                VgmCommand::Wait { samples: 100 },
                VgmCommand::End,
            ],
        );
        assert_eq!(json.summary(), (1, 100));

        let value = serde_json::to_value(&json).unwrap();
        assert_eq!(value["version"], "1.61");
        assert_eq!(value["header"]["chips"]["ymf262"], 14_318_180);
        assert!(value["header"].get("loop_offset").is_none());
        assert!(value.get("gd3").is_none());
    }
}
