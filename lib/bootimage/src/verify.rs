// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Checking a composed image against its own metadata block.

use std::fmt;

use crate::block::{self, MetadataBlock, MetadataRecord};
use crate::compose::OutputImage;
use crate::error::{Error, Result};
use crate::layout::PlatformLayout;
use crate::metadata::CASTAGNOLI;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    /// The bytes don't match the recorded CRC.
    Corrupt,
    /// The CRC matches but the tag doesn't, so the bytes were produced with
    /// a different key, or deliberately altered.
    Unauthentic,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Ok => "ok",
            Verdict::Corrupt => "CORRUPT",
            Verdict::Unauthentic => "UNAUTHENTIC",
        })
    }
}

#[derive(Clone, Debug)]
pub struct RecordCheck {
    pub record: MetadataRecord,
    pub verdict: Verdict,
}

/// Parses the metadata block in `image` and checks every record against the
/// bytes at its load address. Without a key only the CRC is checked.
pub fn verify(
    layout: &PlatformLayout,
    image: &OutputImage,
    key: Option<&[u8]>,
) -> Result<(MetadataBlock, Vec<RecordCheck>)> {
    let md = layout.metadata().region;
    let bytes = image.region(md).ok_or_else(|| {
        Error::InvalidMetadata(format!(
            "image does not cover the metadata region {:#x?}",
            md.range()
        ))
    })?;
    let parsed = block::parse(layout, bytes)?;

    let mut checks = Vec::with_capacity(parsed.records.len());
    for record in &parsed.records {
        let start = record.load_address;
        let data = start
            .checked_add(u64::from(record.length))
            .and_then(|end| image.get(start..end))
            .ok_or_else(|| {
                Error::InvalidMetadata(format!(
                    "{} claims {} bytes at {:#x}, outside the image",
                    record.role, record.length, start
                ))
            })?;

        let verdict = if CASTAGNOLI.checksum(data) != record.crc {
            Verdict::Corrupt
        } else if let Some(key) = key {
            let mut tag = layout.mac().compute(key, data)?;
            tag.truncate(layout.tag_size());
            if tag == record.tag {
                Verdict::Ok
            } else {
                Verdict::Unauthentic
            }
        } else {
            Verdict::Ok
        };
        log::debug!("{}: {}", record.role, verdict);
        checks.push(RecordCheck {
            record: record.clone(),
            verdict,
        });
    }
    Ok((parsed, checks))
}
