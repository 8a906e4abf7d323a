// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Serialization of the metadata block read by the bootloader at boot.
//!
//! The layout of the block is:
//!
//! - A header: magic, format version, entry count, the global boot counter,
//!   the preferred and current image words, and `key-slots` key copies.
//! - One fixed-size record per [`MetadataEntry`], in role order.
//!
//! Every field uses the platform byte order, and addresses and image
//! indices use the platform word size.

use std::io::{self, Cursor, Read, Write};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::layout::{ByteOrder, ImageRole, PlatformLayout};
use crate::metadata::MetadataEntry;

pub const MAGIC: u32 = 0xB007_DA7A;
pub const FORMAT_VERSION: u16 = 1;

pub const ROLE_BOOTLOADER: u16 = 0;
pub const ROLE_APPLICATION: u16 = 1;

/// Slot id written into bootloader records. Application slot ids must be
/// smaller than this.
pub const BOOTLOADER_SLOT_ID: u16 = 0xFFFF;

/// Completion status of an image that was written in full.
pub const COMPLETION_STATUS_COMPLETE: u16 = 1;

pub fn header_len(word_size: u8, key_slots: u32, key_size: u32) -> u64 {
    4 + 2 + 2 + 4 + 2 * u64::from(word_size)
        + u64::from(key_slots) * u64::from(key_size)
}

pub fn record_len(word_size: u8, tag_size: usize) -> u64 {
    2 + 2 + 4 + 4 + 4 + 4 + u64::from(word_size) + 4 + 2 + 2 + tag_size as u64
}

/// A metadata block as the bootloader sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataBlock {
    pub version: u16,
    pub boot_counter: u32,
    pub preferred_image: u64,
    pub current_image: u64,
    pub keys: Vec<Vec<u8>>,
    pub records: Vec<MetadataRecord>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataRecord {
    pub role: ImageRole,
    pub version: u32,
    pub crc: u32,
    pub boot_counter: u32,
    pub last_success_status: u32,
    pub load_address: u64,
    pub length: u32,
    pub completion_status: u16,
    pub protection_status: u16,
    pub tag: Vec<u8>,
}

impl MetadataRecord {
    /// Whether this record describes `entry` exactly.
    pub fn describes(&self, entry: &MetadataEntry) -> bool {
        self.role == entry.role
            && self.length == entry.image_size
            && self.load_address == entry.load_address
            && self.crc == entry.crc
            && self.tag == entry.tag
    }
}

/// Serializes `entries` for `layout`. `entries` must already be in role
/// order, as produced by [`crate::metadata::compute_all`]. If the layout
/// reserves key slots, `key` is stored in the first one.
pub fn serialize(
    layout: &PlatformLayout,
    entries: &[MetadataEntry],
    key: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let md = layout.metadata();
    let needed = header_len(layout.word_size(), md.key_slots, md.key_size)
        + entries.len() as u64
            * record_len(layout.word_size(), layout.tag_size());
    if entries.len() > md.max_entries as usize || needed > md.region.size {
        return Err(Error::MetadataOverflow {
            entries: entries.len(),
            max_entries: md.max_entries as usize,
            needed,
            available: md.region.size,
        });
    }
    if entries.windows(2).any(|w| w[0].role >= w[1].role) {
        return Err(Error::InvalidMetadata(
            "entries are not in role order".to_string(),
        ));
    }

    match layout.byte_order() {
        ByteOrder::Little => write_block::<LittleEndian>(layout, entries, key),
        ByteOrder::Big => write_block::<BigEndian>(layout, entries, key),
    }
}

struct Writer<B> {
    buf: Vec<u8>,
    word_size: u8,
    _order: std::marker::PhantomData<B>,
}

impl<B: byteorder::ByteOrder> Writer<B> {
    fn put(
        &mut self,
        write: impl FnOnce(&mut Vec<u8>) -> io::Result<()>,
    ) -> Result<()> {
        write(&mut self.buf).map_err(|e| {
            Error::InvalidMetadata(format!("writing block: {}", e))
        })
    }

    fn u16(&mut self, v: u16) -> Result<()> {
        self.put(|b| b.write_u16::<B>(v))
    }

    fn u32(&mut self, v: u32) -> Result<()> {
        self.put(|b| b.write_u32::<B>(v))
    }

    fn word(&mut self, v: u64) -> Result<()> {
        let word_size = self.word_size;
        self.put(|b| {
            if word_size == 4 {
                // Layout validation keeps every address below 2^32 here.
                b.write_u32::<B>(v as u32)
            } else {
                b.write_u64::<B>(v)
            }
        })
    }

    fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.put(|b| b.write_all(v))
    }
}

fn write_block<B: byteorder::ByteOrder>(
    layout: &PlatformLayout,
    entries: &[MetadataEntry],
    key: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let md = layout.metadata();
    let mut w = Writer::<B> {
        buf: Vec::new(),
        word_size: layout.word_size(),
        _order: std::marker::PhantomData,
    };

    let preferred = entries
        .iter()
        .find_map(|e| match e.role {
            ImageRole::Application(slot) => Some(u64::from(slot)),
            ImageRole::Bootloader => None,
        })
        .unwrap_or(0);

    w.u32(MAGIC)?;
    w.u16(FORMAT_VERSION)?;
    w.u16(entries.len() as u16)?;
    w.u32(0)?; // global boot counter
    w.word(preferred)?;
    w.word(preferred)?;

    let empty_slot = vec![0; md.key_size as usize];
    for i in 0..md.key_slots {
        match key {
            Some(k) if i == 0 => {
                if k.len() != md.key_size as usize {
                    return Err(Error::KeyReadFailure {
                        path: None,
                        reason: format!(
                            "key is {} bytes, layout '{}' stores {}-byte keys",
                            k.len(),
                            layout.name(),
                            md.key_size
                        ),
                    });
                }
                w.bytes(k)?;
            }
            _ => w.bytes(&empty_slot)?,
        }
    }

    for e in entries {
        if e.tag.len() != layout.tag_size() {
            return Err(Error::InvalidMetadata(format!(
                "{} has a {}-byte tag, layout expects {}",
                e.role,
                e.tag.len(),
                layout.tag_size()
            )));
        }
        let (role, slot) = match e.role {
            ImageRole::Bootloader => (ROLE_BOOTLOADER, BOOTLOADER_SLOT_ID),
            ImageRole::Application(id) => (ROLE_APPLICATION, id as u16),
        };
        w.u16(role)?;
        w.u16(slot)?;
        w.u32(0)?; // version
        w.u32(e.crc)?;
        w.u32(0)?; // boot counter
        w.u32(0)?; // last success status
        w.word(e.load_address)?;
        w.u32(e.image_size)?;
        w.u16(COMPLETION_STATUS_COMPLETE)?;
        w.u16(0)?; // protection status
        w.bytes(&e.tag)?;
    }

    Ok(w.buf)
}

/// Parses a metadata block from the start of `bytes`, which is normally the
/// whole metadata region of a composed image.
pub fn parse(layout: &PlatformLayout, bytes: &[u8]) -> Result<MetadataBlock> {
    match layout.byte_order() {
        ByteOrder::Little => read_block::<LittleEndian>(layout, bytes),
        ByteOrder::Big => read_block::<BigEndian>(layout, bytes),
    }
}

struct Reader<'a, B> {
    cur: Cursor<&'a [u8]>,
    word_size: u8,
    _order: std::marker::PhantomData<B>,
}

impl<'a, B: byteorder::ByteOrder> Reader<'a, B> {
    /// Runs one read, reporting a short block as truncated at the offset
    /// where the field starts.
    fn field<T>(
        &mut self,
        read: impl FnOnce(&mut Cursor<&'a [u8]>) -> io::Result<T>,
    ) -> Result<T> {
        let at = self.cur.position();
        read(&mut self.cur).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::InvalidMetadata(format!(
                "block truncated at offset {:#x}",
                at
            )),
            _ => Error::InvalidMetadata(format!(
                "reading block at offset {:#x}: {}",
                at, e
            )),
        })
    }

    fn u16(&mut self) -> Result<u16> {
        self.field(|c| c.read_u16::<B>())
    }

    fn u32(&mut self) -> Result<u32> {
        self.field(|c| c.read_u32::<B>())
    }

    fn word(&mut self) -> Result<u64> {
        let word_size = self.word_size;
        self.field(|c| {
            if word_size == 4 {
                c.read_u32::<B>().map(u64::from)
            } else {
                c.read_u64::<B>()
            }
        })
    }

    fn bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.field(|c| {
            let mut out = vec![0; n];
            c.read_exact(&mut out)?;
            Ok(out)
        })
    }

    fn position(&self) -> u64 {
        self.cur.position()
    }
}

fn read_block<B: byteorder::ByteOrder>(
    layout: &PlatformLayout,
    bytes: &[u8],
) -> Result<MetadataBlock> {
    let md = layout.metadata();
    let mut r = Reader::<B> {
        cur: Cursor::new(bytes),
        word_size: layout.word_size(),
        _order: std::marker::PhantomData,
    };

    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(Error::InvalidMetadata(format!(
            "bad magic {:#010x}, expected {:#010x}",
            magic, MAGIC
        )));
    }
    let version = r.u16()?;
    if version != FORMAT_VERSION {
        return Err(Error::InvalidMetadata(format!(
            "unsupported format version {}",
            version
        )));
    }
    let count = r.u16()?;
    if u32::from(count) > md.max_entries {
        return Err(Error::InvalidMetadata(format!(
            "{} entries declared, layout allows {}",
            count, md.max_entries
        )));
    }
    let boot_counter = r.u32()?;
    let preferred_image = r.word()?;
    let current_image = r.word()?;

    let mut keys = Vec::with_capacity(md.key_slots as usize);
    for _ in 0..md.key_slots {
        keys.push(r.bytes(md.key_size as usize)?);
    }

    let mut records = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let role = r.u16()?;
        let slot = r.u16()?;
        let role = match (role, slot) {
            (ROLE_BOOTLOADER, _) => ImageRole::Bootloader,
            (ROLE_APPLICATION, s) if s != BOOTLOADER_SLOT_ID => {
                ImageRole::Application(u32::from(s))
            }
            _ => {
                return Err(Error::InvalidMetadata(format!(
                    "bad role {} / slot {:#x} at offset {:#x}",
                    role,
                    slot,
                    r.position() - 4
                )))
            }
        };
        records.push(MetadataRecord {
            role,
            version: r.u32()?,
            crc: r.u32()?,
            boot_counter: r.u32()?,
            last_success_status: r.u32()?,
            load_address: r.word()?,
            length: r.u32()?,
            completion_status: r.u16()?,
            protection_status: r.u16()?,
            tag: r.bytes(layout.tag_size())?,
        });
    }

    Ok(MetadataBlock {
        version,
        boot_counter,
        preferred_image,
        current_image,
        keys,
        records,
    })
}
