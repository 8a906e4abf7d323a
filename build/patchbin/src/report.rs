// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Human-readable tables printed by the subcommands.

use std::fmt::Write;

use bootimage::block::{MetadataBlock, COMPLETION_STATUS_COMPLETE};
use bootimage::verify::RecordCheck;
use bootimage::{Composed, PlatformLayout};

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn layout_table(layout: &PlatformLayout) -> String {
    let mut s = String::new();
    writeln!(
        s,
        "layout '{}': {:?}-endian, {}-byte words, {} tags of {} bytes",
        layout.name(),
        layout.byte_order(),
        layout.word_size(),
        layout.mac().name(),
        layout.tag_size()
    )
    .ok();
    writeln!(s, "{:>12} {:>12} {:>10}  REGION", "ADDRESS", "END", "SIZE")
        .ok();
    for (name, r) in layout.regions() {
        writeln!(
            s,
            "{:>#12x} {:>#12x} {:>#10x}  {}",
            r.address,
            r.end(),
            r.size,
            name
        )
        .ok();
    }
    s
}

/// One line per input image, in the order they were given.
pub fn summary(composed: &Composed) -> String {
    let mut s = String::new();
    for image in &composed.images {
        let name = image
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| image.role.to_string());
        match composed.entries.iter().find(|e| e.role == image.role) {
            Some(e) => writeln!(
                s,
                "{}: {} bytes at {:#x}, crc {:#010x}, completion status {}, \
                 tag {}",
                name,
                e.image_size,
                e.load_address,
                e.crc,
                COMPLETION_STATUS_COMPLETE,
                hex(&e.tag)
            ),
            None => writeln!(s, "{}: empty, skipped", name),
        }
        .ok();
    }
    s
}

pub fn inspection(
    block: &MetadataBlock,
    checks: &[RecordCheck],
    keyed: bool,
) -> String {
    let mut s = String::new();
    writeln!(
        s,
        "metadata v{}: {} records, preferred image {}, current image {}",
        block.version,
        block.records.len(),
        block.preferred_image,
        block.current_image
    )
    .ok();
    if !keyed {
        writeln!(s, "no key given; tags not checked").ok();
    }
    for c in checks {
        let r = &c.record;
        writeln!(
            s,
            "{:<22} {:>8} bytes at {:#010x}  crc {:#010x}  tag {}  {}",
            r.role.to_string(),
            r.length,
            r.load_address,
            r.crc,
            hex(&r.tag),
            c.verdict
        )
        .ok();
    }
    s
}
