// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::block;
use crate::error::{Error, Result};
use crate::layout::{ImageRole, PlatformLayout, Region};
use crate::metadata::MetadataEntry;

/// A flashable image covering the whole span of a layout, starting at
/// `base_address`. Bytes no region was written to hold the layout's pad
/// byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputImage {
    base: u64,
    bytes: Vec<u8>,
}

impl OutputImage {
    /// Wraps bytes read back from a previously written image.
    pub fn from_bytes(base: u64, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    pub fn base_address(&self) -> u64 {
        self.base
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The bytes at absolute addresses `range`, if the image covers them.
    pub fn get(&self, range: Range<u64>) -> Option<&[u8]> {
        let start = usize::try_from(range.start.checked_sub(self.base)?).ok()?;
        let end = usize::try_from(range.end.checked_sub(self.base)?).ok()?;
        self.bytes.get(start..end)
    }

    pub fn region(&self, region: Region) -> Option<&[u8]> {
        self.get(region.range())
    }
}

/// Lays out the metadata block and images into a single [`OutputImage`].
pub struct Composer<'a> {
    layout: &'a PlatformLayout,
    key: Option<&'a [u8]>,
}

impl<'a> Composer<'a> {
    pub fn new(layout: &'a PlatformLayout) -> Self {
        Self { layout, key: None }
    }

    /// Stores `key` in the metadata block's first key slot. Has no effect on
    /// layouts without key slots.
    pub fn embed_key(mut self, key: &'a [u8]) -> Self {
        self.key = Some(key);
        self
    }

    /// Builds the image. `entries` must be in role order and `images` must
    /// hold the bytes each entry was computed from; empty images are
    /// skipped. Nothing is returned unless every write succeeds.
    pub fn compose(
        &self,
        entries: &[MetadataEntry],
        images: &BTreeMap<ImageRole, &[u8]>,
    ) -> Result<OutputImage> {
        let layout = self.layout;
        let span = layout.span();
        let len = usize::try_from(span.end - span.start).map_err(|_| {
            Error::invalid_layout(
                layout.name(),
                format!("span {:#x?} is too large to hold in memory", span),
            )
        })?;

        let block = block::serialize(layout, entries, self.key)?;

        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len).map_err(|e| {
            Error::invalid_layout(
                layout.name(),
                format!("span {:#x?} cannot be allocated: {}", span, e),
            )
        })?;
        bytes.resize(len, layout.pad_byte());
        let mut out = OutputImage {
            base: span.start,
            bytes,
        };

        out.write("metadata", layout.metadata().region, &block)?;

        for (&role, &data) in images {
            let region = layout.region_of(role)?;
            if data.is_empty() {
                continue;
            }
            out.write(&role.to_string(), region, data)?;
        }

        // Make sure what we wrote is what the metadata describes.
        for e in entries {
            let data = images.get(&e.role).copied().unwrap_or_default();
            let region = layout.region_of(e.role)?;
            if data.len() as u64 != u64::from(e.image_size)
                || e.load_address != region.address
            {
                return Err(Error::InvalidMetadata(format!(
                    "entry for {} ({} bytes at {:#x}) does not match image \
                     ({} bytes at {:#x})",
                    e.role,
                    e.image_size,
                    e.load_address,
                    data.len(),
                    region.address
                )));
            }
        }
        for (role, data) in images {
            if !data.is_empty() && !entries.iter().any(|e| e.role == *role) {
                return Err(Error::InvalidMetadata(format!(
                    "{} has no metadata entry",
                    role
                )));
            }
        }

        log::debug!(
            "composed {:#x} bytes at {:#x} for '{}'",
            out.bytes.len(),
            out.base,
            layout.name()
        );
        Ok(out)
    }
}

impl OutputImage {
    fn write(&mut self, name: &str, region: Region, data: &[u8]) -> Result<()> {
        let overflow = || Error::RegionOverflow {
            region: name.to_string(),
            offset: region.address,
            len: data.len() as u64,
            bound: region.end(),
        };
        if data.len() as u64 > region.size {
            return Err(overflow());
        }
        let start = region
            .address
            .checked_sub(self.base)
            .and_then(|o| usize::try_from(o).ok())
            .ok_or_else(overflow)?;
        let dest = self
            .bytes
            .get_mut(start..start + data.len())
            .ok_or_else(overflow)?;
        dest.copy_from_slice(data);
        Ok(())
    }
}

/// Composes without embedding a key. See [`Composer::compose`].
pub fn compose(
    layout: &PlatformLayout,
    entries: &[MetadataEntry],
    images: &BTreeMap<ImageRole, &[u8]>,
) -> Result<OutputImage> {
    Composer::new(layout).compose(entries, images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::metadata::{compute_all, ImageDescriptor};
    use indoc::indoc;

    const LAYOUT: &str = indoc! {r#"
        name = "compose"
        byte-order = "little"
        word-size = 4
        alignment = 0x100
        pad-byte = 0xff

        [metadata]
        address = 0x0
        size = 0x400
        max-entries = 3
        key-slots = 1
        key-size = 4

        [bootloader]
        address = 0x1000
        max-size = 0x2000

        [[slots]]
        id = 0
        address = 0x4000
        max-size = 0x1000

        [[slots]]
        id = 1
        address = 0x6000
        max-size = 0x100
    "#};

    const KEY: &[u8] = b"k3y!";

    fn layout() -> PlatformLayout {
        PlatformLayout::parse("compose", LAYOUT).unwrap()
    }

    fn build(
        l: &PlatformLayout,
        boot: &[u8],
        apps: &[(u32, &[u8])],
    ) -> Result<OutputImage> {
        let bootloader = ImageDescriptor::bootloader(boot.to_vec());
        let apps: Vec<_> = apps
            .iter()
            .map(|(s, b)| ImageDescriptor::application(*s, b.to_vec()))
            .collect();
        let entries = compute_all(&apps, &bootloader, l, KEY)?;
        let mut images = BTreeMap::new();
        images.insert(bootloader.role, bootloader.bytes.as_slice());
        for a in &apps {
            images.insert(a.role, a.bytes.as_slice());
        }
        Composer::new(l).embed_key(KEY).compose(&entries, &images)
    }

    #[test]
    fn placement() {
        let l = layout();
        let boot = [0x11u8; 10];
        let app = [0x22u8; 5];
        let out = build(&l, &boot, &[(0, &app[..])]).unwrap();

        assert_eq!(out.base_address(), 0);
        assert_eq!(out.bytes().len(), 0x6100);
        assert_eq!(out.get(0x1000..0x100a).unwrap(), &boot);
        assert_eq!(out.get(0x4000..0x4005).unwrap(), &app);

        let md = l.metadata().region;
        let block_len = (block::header_len(4, 1, 4)
            + 2 * block::record_len(4, 32)) as usize;
        for (i, b) in out.bytes().iter().enumerate() {
            let addr = i as u64;
            let written = (0x1000..0x100a).contains(&addr)
                || (0x4000..0x4005).contains(&addr)
                || (md.address..md.address + block_len as u64)
                    .contains(&addr);
            if !written {
                assert_eq!(*b, 0xff, "byte at {:#x}", addr);
            }
        }
    }

    #[test]
    fn metadata_round_trip() {
        let l = layout();
        let apps = [(1, &b"one"[..]), (0, &b"zero"[..])];
        let out = build(&l, b"bootloader", &apps).unwrap();
        let block =
            block::parse(&l, out.region(l.metadata().region).unwrap()).unwrap();
        assert_eq!(block.keys, vec![KEY.to_vec()]);
        let got: Vec<_> = block
            .records
            .iter()
            .map(|r| (r.role, r.length, r.load_address))
            .collect();
        assert_eq!(
            got,
            vec![
                (ImageRole::Bootloader, 10, 0x1000),
                (ImageRole::Application(0), 4, 0x4000),
                (ImageRole::Application(1), 3, 0x6000),
            ]
        );
    }

    #[test]
    fn deterministic() {
        let l = layout();
        let a = build(&l, b"boot", &[(0, &b"app"[..])]).unwrap();
        let b = build(&l, b"boot", &[(0, &b"app"[..])]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn region_overflow_rechecked() {
        let l = layout();
        let small = ImageDescriptor::application(1, vec![1; 0x10]);
        let boot = ImageDescriptor::bootloader(b"boot".to_vec());
        let entries = compute_all(&[small], &boot, &l, KEY).unwrap();

        // Hand the composer bytes that don't fit, as if the calculator had
        // been bypassed.
        let big = vec![1u8; 0x101];
        let mut images = BTreeMap::new();
        images.insert(ImageRole::Bootloader, &b"boot"[..]);
        images.insert(ImageRole::Application(1), big.as_slice());
        let err = compose(&l, &entries, &images).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RegionOverflow);
    }

    #[test]
    fn metadata_overflow() {
        let text = LAYOUT.replace("max-entries = 3", "max-entries = 1");
        let l = PlatformLayout::parse("compose", &text).unwrap();
        let err = build(&l, b"boot", &[(0, &b"app"[..])]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MetadataOverflow);
    }

    #[test]
    fn mismatched_entries_rejected() {
        let l = layout();
        let boot = ImageDescriptor::bootloader(b"boot".to_vec());
        let entries = compute_all(&[], &boot, &l, KEY).unwrap();
        let mut images = BTreeMap::new();
        images.insert(ImageRole::Bootloader, &b"BOOT!"[..]);
        let err = compose(&l, &entries, &images).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMetadata);

        images.insert(ImageRole::Bootloader, &b"boot"[..]);
        images.insert(ImageRole::Application(0), &b"extra"[..]);
        let err = compose(&l, &entries, &images).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidMetadata);
    }

    #[test]
    fn empty_image_writes_nothing() {
        let l = layout();
        let out = build(&l, b"boot", &[(0, &b""[..])]).unwrap();
        assert!(out.get(0x4000..0x5000).unwrap().iter().all(|&b| b == 0xff));
    }

    #[test]
    fn unallocatable_span_is_an_error() {
        let mut raw: crate::layout::LayoutConfig = toml::from_str(
            &LAYOUT.replace("word-size = 4", "word-size = 8"),
        )
        .unwrap();
        raw.slots[1].address = 0xf000_0000_0000_0000;
        let l = PlatformLayout::from_config(raw).unwrap();

        let err = build(&l, b"boot", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidLayout);
        assert!(err.to_string().contains("span"), "{}", err);
    }

    #[test]
    fn span_starts_at_lowest_region() {
        let text = LAYOUT
            .replace("address = 0x0\n", "address = 0x7000\n");
        let l = PlatformLayout::parse("compose", &text).unwrap();
        let out = build(&l, b"boot", &[]).unwrap();
        assert_eq!(out.base_address(), 0x1000);
        assert_eq!(out.bytes().len(), 0x7400 - 0x1000);
        assert_eq!(out.get(0x1000..0x1004).unwrap(), b"boot");
        assert!(out.get(0x0..0x4).is_none());
    }
}
