// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::Write;
use std::path::Path;

use anyhow::{bail, Result};
use clap::ArgEnum;

use bootimage::OutputImage;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ArgEnum)]
pub enum OutputFormat {
    /// Raw bytes, starting at the lowest address in the layout.
    Bin,
    /// Motorola S-records.
    Srec,
}

pub fn write(
    out: &Path,
    format: OutputFormat,
    image: &OutputImage,
    entry: u64,
) -> Result<()> {
    match format {
        OutputFormat::Bin => write_atomic(out, image.bytes()),
        OutputFormat::Srec => {
            write_atomic(out, srec_image(image, entry)?.as_bytes())
        }
    }
}

/// Writes `contents` to a temporary file next to `out` and renames it into
/// place, so `out` either has the old contents or all of the new ones.
pub fn write_atomic(out: &Path, contents: &[u8]) -> Result<()> {
    let dir = match out.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(out)?;
    Ok(())
}

fn srec_image(image: &OutputImage, entry: u64) -> Result<String> {
    let Ok(entry) = u32::try_from(entry) else {
        bail!("entry point {:#x} does not fit in an S-record", entry);
    };
    let mut records = vec![srec::Record::S0("patchbin".to_string())];

    // SREC record size limit is 255 (0xFF). 32-bit addressed records
    // additionally contain a four-byte address and one-byte checksum, for a
    // payload limit of 255 - 5.
    let mut addr = image.base_address();
    for chunk in image.bytes().chunks(255 - 5) {
        let Ok(a) = u32::try_from(addr) else {
            bail!("address {:#x} does not fit in an S-record", addr);
        };
        records.push(srec::Record::S3(srec::Data {
            address: srec::Address32(a),
            data: chunk.to_vec(),
        }));
        addr += chunk.len() as u64;
    }

    let count = records.len() - 1; // header
    if count < 0x1_00_00 {
        records.push(srec::Record::S5(srec::Count16(count as u16)));
    } else if count < 0x1_00_00_00 {
        records.push(srec::Record::S6(srec::Count24(count as u32)));
    } else {
        bail!("SREC limit of 2^24 data records exceeded");
    }
    records.push(srec::Record::S7(srec::Address32(entry)));

    Ok(srec::writer::generate_srec_file(&records))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srec_records() {
        let image = OutputImage::from_bytes(0x1000, vec![0xab; 300]);
        let text = srec_image(&image, 0x1000).unwrap();
        let lines: Vec<_> =
            text.lines().map(|l| l.to_ascii_uppercase()).collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("S0"));
        // 250 data bytes, then the remaining 50 at 0x10fa.
        assert!(lines[1].starts_with("S3FF00001000"));
        assert!(lines[2].starts_with("S337000010FA"));
        assert!(lines[3].starts_with("S5030002"));
        assert!(lines[4].starts_with("S70500001000"));
    }

    #[test]
    fn srec_rejects_wide_addresses() {
        let image = OutputImage::from_bytes(0x1_0000_0000, vec![0; 4]);
        assert!(srec_image(&image, 0).is_err());
    }

    #[test]
    fn atomic_write_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("firmware.bin");
        std::fs::write(&out, b"old").unwrap();
        write_atomic(&out, b"new contents").unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"new contents");

        // No temporaries left behind.
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["firmware.bin"]);
    }
}
