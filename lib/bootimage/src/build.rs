// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A build runs in three stages, each consuming the one before it:
//!
//! ```text
//! Loaded(layout) -> MetadataComputed(entries) -> Composed(output)
//! ```
//!
//! Any error ends the build; there is no way back to an earlier stage and
//! nothing is produced.

use std::collections::BTreeMap;

use crate::compose::{Composer, OutputImage};
use crate::error::Result;
use crate::layout::PlatformLayout;
use crate::metadata::{compute_all, ImageDescriptor, MetadataEntry};

pub struct Loaded<'a> {
    layout: &'a PlatformLayout,
}

impl<'a> Loaded<'a> {
    pub fn new(layout: &'a PlatformLayout) -> Self {
        log::info!("using layout '{}'", layout.name());
        Self { layout }
    }

    pub fn compute_metadata(
        self,
        bootloader: ImageDescriptor,
        applications: Vec<ImageDescriptor>,
        key: &'a [u8],
    ) -> Result<MetadataComputed<'a>> {
        let entries =
            compute_all(&applications, &bootloader, self.layout, key)?;
        log::info!("computed {} metadata entries", entries.len());

        let mut images = Vec::with_capacity(1 + applications.len());
        images.push(bootloader);
        images.extend(applications);
        Ok(MetadataComputed {
            layout: self.layout,
            key,
            images,
            entries,
        })
    }
}

pub struct MetadataComputed<'a> {
    layout: &'a PlatformLayout,
    key: &'a [u8],
    images: Vec<ImageDescriptor>,
    entries: Vec<MetadataEntry>,
}

impl<'a> MetadataComputed<'a> {
    pub fn entries(&self) -> &[MetadataEntry] {
        &self.entries
    }

    pub fn compose(self) -> Result<Composed> {
        let images: BTreeMap<_, _> = self
            .images
            .iter()
            .map(|i| (i.role, i.bytes.as_slice()))
            .collect();
        let output = Composer::new(self.layout)
            .embed_key(self.key)
            .compose(&self.entries, &images)?;
        log::info!(
            "composed {} bytes starting at {:#x}",
            output.bytes().len(),
            output.base_address()
        );
        Ok(Composed {
            images: self.images,
            entries: self.entries,
            output,
        })
    }
}

/// A finished build.
pub struct Composed {
    /// Input images, bootloader first, in argument order.
    pub images: Vec<ImageDescriptor>,
    pub entries: Vec<MetadataEntry>,
    pub output: OutputImage,
}

/// Runs every stage in order.
pub fn build_image(
    layout: &PlatformLayout,
    bootloader: ImageDescriptor,
    applications: Vec<ImageDescriptor>,
    key: &[u8],
) -> Result<Composed> {
    Loaded::new(layout)
        .compute_metadata(bootloader, applications, key)?
        .compose()
}
