// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Composition of flashable bootloader images.
//!
//! Given a [`PlatformLayout`], a bootloader, some application images and a
//! key, this crate computes a metadata record per image (size, placement,
//! CRC and keyed MAC) and lays everything out into one [`OutputImage`] at
//! the addresses the bootloader expects.

pub mod block;
pub mod build;
pub mod compose;
pub mod error;
pub mod layout;
pub mod mac;
pub mod metadata;
pub mod platform;
pub mod verify;

pub use build::{build_image, Composed};
pub use compose::{compose, Composer, OutputImage};
pub use error::{Error, ErrorKind, Result};
pub use layout::{ByteOrder, ImageRole, PlatformLayout, Region};
pub use mac::{MacAlgorithm, MacScheme};
pub use metadata::{
    compute_all, compute_entry, read_key, ImageDescriptor, MetadataEntry,
};
pub use verify::{verify, Verdict};
