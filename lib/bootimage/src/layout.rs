// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The platform memory map.
//!
//! A `LayoutConfig` is a normalized `config/<name>.toml` file that has been
//! deserialized, but not checked. A [`PlatformLayout`] is what we get once
//! that file has been validated: regions are aligned, in range for the
//! platform word size, and do not overlap. It is never modified afterwards,
//! and is passed by reference to everything that needs it.

use std::fmt;
use std::ops::Range;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::block;
use crate::error::{Error, Result};
use crate::mac::{MacAlgorithm, MacScheme};

/// Which region an image (or a metadata record) belongs to.
///
/// The derived ordering puts the bootloader first and then applications by
/// ascending slot id, which is the order records appear in the metadata
/// block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImageRole {
    Bootloader,
    Application(u32),
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRole::Bootloader => write!(f, "bootloader"),
            ImageRole::Application(slot) => {
                write!(f, "application slot {}", slot)
            }
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct LayoutConfig {
    pub name: String,
    pub byte_order: ByteOrder,
    pub word_size: u8,
    pub alignment: u64,
    #[serde(default)]
    pub pad_byte: u8,
    #[serde(default)]
    pub mac: MacAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_size: Option<usize>,
    pub metadata: MetadataConfig,
    pub bootloader: BootloaderConfig,
    #[serde(default)]
    pub slots: Vec<SlotConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MetadataConfig {
    pub address: u64,
    pub size: u64,
    pub max_entries: u32,
    #[serde(default)]
    pub key_slots: u32,
    #[serde(default)]
    pub key_size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BootloaderConfig {
    pub address: u64,
    pub max_size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SlotConfig {
    pub id: u32,
    pub address: u64,
    pub max_size: u64,
}

/// A half-open address range `[address, address + size)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub address: u64,
    pub size: u64,
}

impl Region {
    pub fn end(&self) -> u64 {
        self.address + self.size
    }

    pub fn range(&self) -> Range<u64> {
        self.address..self.end()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MetadataRegion {
    pub region: Region,
    pub max_entries: u32,
    pub key_slots: u32,
    pub key_size: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    pub id: u32,
    pub region: Region,
}

#[derive(Clone, Debug)]
pub struct PlatformLayout {
    name: String,
    byte_order: ByteOrder,
    word_size: u8,
    alignment: u64,
    pad_byte: u8,
    mac: MacAlgorithm,
    tag_size: usize,
    metadata: MetadataRegion,
    bootloader: Region,
    slots: Vec<Slot>,
}

impl PlatformLayout {
    /// Loads `<dir>/<name>.toml`.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(format!("{}.toml", name));
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ConfigNotFound {
                    name: name.to_string(),
                    dir: dir.to_path_buf(),
                    suggestion: config_name_suggestion(dir, name),
                });
            }
            Err(e) => {
                return Err(Error::invalid_layout(
                    name,
                    format!("reading {}: {}", path.display(), e),
                ))
            }
        };

        let layout = Self::parse(name, &text)?;
        if layout.name != name {
            return Err(Error::invalid_layout(
                name,
                format!(
                    "{} declares name '{}'",
                    path.display(),
                    layout.name
                ),
            ));
        }
        log::debug!("loaded layout '{}' from {}", name, path.display());
        Ok(layout)
    }

    /// Parses and validates configuration text. `label` is only used in
    /// error messages.
    pub fn parse(label: &str, text: &str) -> Result<Self> {
        let raw: LayoutConfig = toml::from_str(text)
            .map_err(|e| Error::invalid_layout(label, e.to_string()))?;
        Self::from_config(raw)
    }

    pub fn from_config(raw: LayoutConfig) -> Result<Self> {
        let name = raw.name.as_str();
        let bad = |reason: String| Error::invalid_layout(name, reason);

        if raw.word_size != 4 && raw.word_size != 8 {
            return Err(bad(format!(
                "word-size must be 4 or 8, not {}",
                raw.word_size
            )));
        }
        if !raw.alignment.is_power_of_two() {
            return Err(bad(format!(
                "alignment {} is not a power of two",
                raw.alignment
            )));
        }

        let scheme = raw.mac.scheme();
        let tag_size = raw.tag_size.unwrap_or_else(|| scheme.output_len());
        if tag_size == 0 || tag_size > scheme.output_len() {
            return Err(bad(format!(
                "tag-size {} must be between 1 and {} for {}",
                tag_size,
                scheme.output_len(),
                scheme.name()
            )));
        }

        if raw.metadata.max_entries == 0
            || raw.metadata.max_entries > u32::from(u16::MAX)
        {
            return Err(bad(format!(
                "metadata max-entries {} must be between 1 and {}",
                raw.metadata.max_entries,
                u16::MAX
            )));
        }
        if raw.metadata.key_slots > 0 && raw.metadata.key_size == 0 {
            return Err(bad("key-slots is set but key-size is zero".into()));
        }

        // Everything the bootloader reads is a word, so every address we
        // emit has to fit in one.
        let addr_limit = if raw.word_size == 4 {
            1u64 << 32
        } else {
            u64::MAX
        };
        let check = |what: String, address: u64, size: u64| -> Result<Region> {
            if address % raw.alignment != 0 {
                return Err(bad(format!(
                    "{} address {:#x} is not aligned to {:#x}",
                    what, address, raw.alignment
                )));
            }
            if size % raw.alignment != 0 {
                return Err(bad(format!(
                    "{} size {:#x} is not aligned to {:#x}",
                    what, size, raw.alignment
                )));
            }
            match address.checked_add(size) {
                Some(end) if end <= addr_limit => Ok(Region { address, size }),
                _ => Err(bad(format!(
                    "{}: address {:#x} size {:#x} overflows a {}-byte word",
                    what, address, size, raw.word_size
                ))),
            }
        };

        let metadata = MetadataRegion {
            region: check(
                "metadata".into(),
                raw.metadata.address,
                raw.metadata.size,
            )?,
            max_entries: raw.metadata.max_entries,
            key_slots: raw.metadata.key_slots,
            key_size: raw.metadata.key_size,
        };
        let needed = block::header_len(
            raw.word_size,
            metadata.key_slots,
            metadata.key_size,
        ) + u64::from(metadata.max_entries)
            * block::record_len(raw.word_size, tag_size);
        if needed > metadata.region.size {
            return Err(bad(format!(
                "metadata region of {:#x} bytes cannot hold {} entries \
                 ({:#x} bytes needed)",
                metadata.region.size, metadata.max_entries, needed
            )));
        }

        let bootloader = check(
            "bootloader".into(),
            raw.bootloader.address,
            raw.bootloader.max_size,
        )?;
        if bootloader.size > u64::from(u32::MAX) {
            return Err(bad("bootloader max-size exceeds 32 bits".into()));
        }

        let mut slots = Vec::with_capacity(raw.slots.len());
        for s in &raw.slots {
            if s.id >= u32::from(block::BOOTLOADER_SLOT_ID) {
                return Err(bad(format!("slot id {} is reserved", s.id)));
            }
            if slots.iter().any(|o: &Slot| o.id == s.id) {
                return Err(bad(format!("slot id {} appears twice", s.id)));
            }
            let region =
                check(format!("slot {}", s.id), s.address, s.max_size)?;
            if region.size > u64::from(u32::MAX) {
                return Err(bad(format!(
                    "slot {} max-size exceeds 32 bits",
                    s.id
                )));
            }
            slots.push(Slot { id: s.id, region });
        }

        let layout = PlatformLayout {
            name: raw.name.clone(),
            byte_order: raw.byte_order,
            word_size: raw.word_size,
            alignment: raw.alignment,
            pad_byte: raw.pad_byte,
            mac: raw.mac,
            tag_size,
            metadata,
            bootloader,
            slots,
        };
        layout.check_overlap()?;
        Ok(layout)
    }

    fn check_overlap(&self) -> Result<()> {
        let regions = self.regions();
        for pair in regions.windows(2) {
            let (a_name, a) = &pair[0];
            let (b_name, b) = &pair[1];
            if a.end() > b.address {
                return Err(Error::invalid_layout(
                    &self.name,
                    format!(
                        "{} {:#x?} overlaps {} {:#x?}",
                        a_name,
                        a.range(),
                        b_name,
                        b.range()
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Every non-empty region, sorted by address.
    pub fn regions(&self) -> Vec<(String, Region)> {
        let mut out = vec![
            ("metadata".to_string(), self.metadata.region),
            ("bootloader".to_string(), self.bootloader),
        ];
        for s in &self.slots {
            out.push((format!("slot {}", s.id), s.region));
        }
        out.retain(|(_, r)| r.size > 0);
        out.sort_by_key(|(_, r)| r.address);
        out
    }

    /// The address range covered by the output image: from the lowest region
    /// base to the highest region end.
    pub fn span(&self) -> Range<u64> {
        let regions = self.regions();
        let start = regions.iter().map(|(_, r)| r.address).min().unwrap_or(0);
        let end = regions.iter().map(|(_, r)| r.end()).max().unwrap_or(start);
        start..end
    }

    /// The region an image with this role is placed into.
    pub fn region_of(&self, role: ImageRole) -> Result<Region> {
        match role {
            ImageRole::Bootloader => Ok(self.bootloader),
            ImageRole::Application(id) => self
                .slot(id)
                .map(|s| s.region)
                .ok_or_else(|| Error::UnknownSlot {
                    slot: id,
                    available: self.slots.iter().map(|s| s.id).collect(),
                }),
        }
    }

    pub fn slot(&self, id: u32) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id == id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn word_size(&self) -> u8 {
        self.word_size
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    pub fn pad_byte(&self) -> u8 {
        self.pad_byte
    }

    pub fn mac_algorithm(&self) -> MacAlgorithm {
        self.mac
    }

    pub fn mac(&self) -> &'static dyn MacScheme {
        self.mac.scheme()
    }

    pub fn tag_size(&self) -> usize {
        self.tag_size
    }

    pub fn metadata(&self) -> &MetadataRegion {
        &self.metadata
    }

    pub fn bootloader(&self) -> Region {
        self.bootloader
    }

    /// Application slots, in configuration order.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }
}

fn config_name_suggestion(dir: &Path, name: &str) -> Option<String> {
    // Suggest only for very small differences
    const MAX_DISTANCE: usize = 3;

    let entries = std::fs::read_dir(dir).ok()?;
    let mut scored: Vec<_> = entries
        .filter_map(|e| {
            let path = e.ok()?.path();
            if path.extension()? != "toml" {
                return None;
            }
            let stem = path.file_stem()?.to_str()?.to_string();
            let distance = strsim::damerau_levenshtein(name, &stem);
            (distance <= MAX_DISTANCE).then_some((distance, stem))
        })
        .collect();
    scored.sort();
    scored.into_iter().next().map(|(_, s)| s)
}
