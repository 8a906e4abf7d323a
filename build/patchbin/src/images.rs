// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Result};

use bootimage::{ImageRole, PlatformLayout};

/// An application image named on the command line, with or without an
/// explicit slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageArg {
    pub slot: Option<u32>,
    pub path: PathBuf,
}

impl FromStr for ImageArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            bail!("empty image argument");
        }
        // A leading number followed by '=' selects the slot; anything else
        // is a plain path, even if it happens to contain '='.
        if let Some((slot, path)) = s.split_once('=') {
            if let Ok(slot) = slot.parse::<u32>() {
                if path.is_empty() {
                    bail!("no path given for slot {}", slot);
                }
                return Ok(Self {
                    slot: Some(slot),
                    path: PathBuf::from(path),
                });
            }
        }
        Ok(Self {
            slot: None,
            path: PathBuf::from(s),
        })
    }
}

/// Assigns every argument a role. Arguments without a slot take the layout's
/// slots in order, counting only other arguments without a slot, so
/// `2=a.bin b.bin` puts `b.bin` in the first slot listed.
pub fn resolve(
    layout: &PlatformLayout,
    args: &[ImageArg],
) -> Result<Vec<(ImageRole, PathBuf)>> {
    let slots = layout.slots();
    let mut positional = slots.iter();
    let mut n = 0;
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        let slot = match arg.slot {
            Some(s) => s,
            None => {
                n += 1;
                match positional.next() {
                    Some(s) => s.id,
                    None => bail!(
                        "{} is positional image #{} but '{}' only has {} \
                         slots; name one with SLOT=PATH",
                        arg.path.display(),
                        n,
                        layout.name(),
                        slots.len()
                    ),
                }
            }
        };
        out.push((ImageRole::Application(slot), arg.path.clone()));
    }
    Ok(out)
}
