// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Generates normalized layout configurations from platform descriptions.
//!
//! A platform description is what a person writes down about a board: how
//! big the bootloader is, how big each image may be, how many images there
//! are. Slots are packed one after another, starting directly behind
//! whichever of the bootloader and metadata regions ends last.

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::layout::{
    BootloaderConfig, ByteOrder, LayoutConfig, MetadataConfig, PlatformLayout,
    SlotConfig,
};
use crate::mac::MacAlgorithm;

/// First line of every generated configuration file.
pub const GENERATED_HEADER: &str =
    "# Automatically generated. Don't edit manually\n";

/// Description files with this stem are examples, not platforms.
pub const TEMPLATE_NAME: &str = "template";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PlatformDescription {
    pub name: String,
    pub byte_order: ByteOrder,
    pub pointer_size: u8,
    #[serde(default = "default_alignment")]
    pub alignment: u64,
    pub hmac_key_size: u32,
    pub hmac_signature_size: usize,
    pub metadata_address: u64,
    pub metadata_size: u64,
    #[serde(default)]
    pub bootloader_address: u64,
    pub bootloader_size: u64,
    pub max_image_size: u64,
    pub number_of_images: u32,
    #[serde(default = "default_key_slots")]
    pub key_slots: u32,
    #[serde(default)]
    pub mac: MacAlgorithm,
    #[serde(default)]
    pub pad_byte: u8,
}

fn default_alignment() -> u64 {
    4
}

fn default_key_slots() -> u32 {
    3
}

impl PlatformDescription {
    pub fn parse(label: &str, text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| Error::invalid_layout(label, e.to_string()))
    }

    /// Produces the layout configuration for this platform, checked with the
    /// same rules [`PlatformLayout`] applies when it is loaded.
    pub fn normalize(&self) -> Result<LayoutConfig> {
        let overflow = || {
            Error::invalid_layout(
                &self.name,
                format!(
                    "{} images of {:#x} bytes do not fit in the address space",
                    self.number_of_images, self.max_image_size
                ),
            )
        };

        let bootloader_end = self
            .bootloader_address
            .checked_add(self.bootloader_size)
            .ok_or_else(overflow)?;
        let metadata_end = self
            .metadata_address
            .checked_add(self.metadata_size)
            .ok_or_else(overflow)?;
        let first_slot = bootloader_end.max(metadata_end);
        let slots = (0..self.number_of_images)
            .map(|i| {
                let offset = u64::from(i)
                    .checked_mul(self.max_image_size)
                    .ok_or_else(overflow)?;
                Ok(SlotConfig {
                    id: i,
                    address: first_slot
                        .checked_add(offset)
                        .ok_or_else(overflow)?,
                    max_size: self.max_image_size,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let cfg = LayoutConfig {
            name: self.name.clone(),
            byte_order: self.byte_order,
            word_size: self.pointer_size,
            alignment: self.alignment,
            pad_byte: self.pad_byte,
            mac: self.mac,
            tag_size: Some(self.hmac_signature_size),
            metadata: MetadataConfig {
                address: self.metadata_address,
                size: self.metadata_size,
                max_entries: 1 + self.number_of_images,
                key_slots: self.key_slots,
                key_size: self.hmac_key_size,
            },
            bootloader: BootloaderConfig {
                address: self.bootloader_address,
                max_size: self.bootloader_size,
            },
            slots,
        };

        PlatformLayout::from_config(cfg.clone())?;
        Ok(cfg)
    }
}

/// Renders a configuration file, header included.
pub fn render_config(cfg: &LayoutConfig) -> Result<String> {
    let body = toml::to_string(cfg)
        .map_err(|e| Error::invalid_layout(&cfg.name, e.to_string()))?;
    Ok(format!("{}{}", GENERATED_HEADER, body))
}

/// Parses a description and renders its configuration in one go. Returns
/// the platform name alongside the file contents.
pub fn generate_config(label: &str, text: &str) -> Result<(String, String)> {
    let cfg = PlatformDescription::parse(label, text)?.normalize()?;
    let rendered = render_config(&cfg)?;
    Ok((cfg.name, rendered))
}

/// Generates a configuration for every `*.toml` description in `dir`, in
/// file name order, skipping the template. The map is keyed by platform name.
pub fn generate_dir(dir: &Path) -> Result<IndexMap<String, String>> {
    let read_err = |e: std::io::Error| {
        Error::invalid_layout(&dir.display().to_string(), e.to_string())
    };

    let mut paths = vec![];
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.extension().map_or(false, |e| e == "toml")
            && path.file_stem().map_or(false, |s| s != TEMPLATE_NAME)
        {
            paths.push(path);
        }
    }
    paths.sort();

    let mut out = IndexMap::new();
    for path in paths {
        let label = path.display().to_string();
        let text = std::fs::read_to_string(&path).map_err(read_err)?;
        let (name, rendered) = generate_config(&label, &text)?;
        if out.contains_key(&name) {
            return Err(Error::invalid_layout(
                &label,
                format!("platform '{}' is described more than once", name),
            ));
        }
        log::debug!("{}: generated configuration for '{}'", label, name);
        out.insert(name, rendered);
    }
    Ok(out)
}
