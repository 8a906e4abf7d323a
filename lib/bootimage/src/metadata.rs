// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-image metadata: size, placement and authentication tag.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crc::{Crc, CRC_32_ISCSI};

use crate::error::{Error, Result};
use crate::layout::{ImageRole, PlatformLayout};
use crate::mac::MacScheme;

/// CRC-32C (Castagnoli), which is what the bootloader checks images with.
pub const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// An image to be placed in the output, as read from disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub role: ImageRole,
    pub bytes: Vec<u8>,
    /// Where the bytes came from, if anywhere. Only used in diagnostics.
    pub source: Option<PathBuf>,
}

impl ImageDescriptor {
    pub fn new(role: ImageRole, bytes: Vec<u8>) -> Self {
        Self {
            role,
            bytes,
            source: None,
        }
    }

    pub fn bootloader(bytes: Vec<u8>) -> Self {
        Self::new(ImageRole::Bootloader, bytes)
    }

    pub fn application(slot: u32, bytes: Vec<u8>) -> Self {
        Self::new(ImageRole::Application(slot), bytes)
    }

    pub fn from_file(role: ImageRole, path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).map_err(|source| Error::MissingInputFile {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            role,
            bytes,
            source: Some(path.to_path_buf()),
        })
    }
}

/// Reads a key file as raw bytes. An empty file is as useless as a missing
/// one.
pub fn read_key(path: &Path) -> Result<Vec<u8>> {
    let fail = |reason: String| Error::KeyReadFailure {
        path: Some(path.to_path_buf()),
        reason,
    };
    let key = std::fs::read(path).map_err(|e| fail(e.to_string()))?;
    if key.is_empty() {
        return Err(fail("file is empty".to_string()));
    }
    Ok(key)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataEntry {
    pub role: ImageRole,
    pub image_size: u32,
    pub load_address: u64,
    pub crc: u32,
    /// Keyed MAC over the image bytes, truncated to the layout's tag size.
    pub tag: Vec<u8>,
}

/// Computes the metadata entry for one image using the layout's configured
/// MAC scheme.
pub fn compute_entry(
    image: &ImageDescriptor,
    layout: &PlatformLayout,
    key: &[u8],
) -> Result<MetadataEntry> {
    compute_entry_with(layout.mac(), image, layout, key)
}

/// Like [`compute_entry`], but with an explicit MAC scheme.
pub fn compute_entry_with(
    mac: &dyn MacScheme,
    image: &ImageDescriptor,
    layout: &PlatformLayout,
    key: &[u8],
) -> Result<MetadataEntry> {
    let region = layout.region_of(image.role)?;
    let len = image.bytes.len() as u64;
    if len > region.size {
        return Err(Error::ImageTooLarge {
            role: image.role,
            len,
            max: region.size,
        });
    }
    if key.is_empty() {
        return Err(Error::KeyReadFailure {
            path: None,
            reason: "key is empty".to_string(),
        });
    }

    let mut tag = mac.compute(key, &image.bytes)?;
    if tag.len() < layout.tag_size() {
        return Err(Error::invalid_layout(
            layout.name(),
            format!(
                "{} produces {}-byte tags, tag-size is {}",
                mac.name(),
                tag.len(),
                layout.tag_size()
            ),
        ));
    }
    tag.truncate(layout.tag_size());

    Ok(MetadataEntry {
        role: image.role,
        // Region sizes are capped at 32 bits when the layout is loaded.
        image_size: len as u32,
        load_address: region.address,
        crc: CASTAGNOLI.checksum(&image.bytes),
        tag,
    })
}

/// Computes entries for the bootloader and every application image, stopping
/// at the first error. Empty images get no entry. The result is in role
/// order (bootloader, then ascending slot id) regardless of input order.
pub fn compute_all(
    images: &[ImageDescriptor],
    bootloader: &ImageDescriptor,
    layout: &PlatformLayout,
    key: &[u8],
) -> Result<Vec<MetadataEntry>> {
    if bootloader.role != ImageRole::Bootloader {
        return Err(Error::InvalidMetadata(format!(
            "{} was passed as the bootloader image",
            bootloader.role
        )));
    }

    let mut seen = BTreeSet::new();
    let mut entries = vec![];
    for image in std::iter::once(bootloader).chain(images) {
        if !seen.insert(image.role) {
            // Two images for one region; nothing sensible to do but refuse.
            let region = layout.region_of(image.role)?;
            return Err(Error::RegionOverflow {
                region: image.role.to_string(),
                offset: 0,
                len: image.bytes.len() as u64,
                bound: region.size,
            });
        }
        if image.bytes.is_empty() {
            // Still reject references to slots that don't exist.
            layout.region_of(image.role)?;
            log::warn!("{} is empty, skipping", image.role);
            continue;
        }
        let entry = compute_entry(image, layout, key)?;
        log::debug!(
            "{}: {} bytes at {:#x}, crc {:#010x}",
            entry.role,
            entry.image_size,
            entry.load_address,
            entry.crc
        );
        entries.push(entry);
    }

    entries.sort_by_key(|e| e.role);
    Ok(entries)
}
