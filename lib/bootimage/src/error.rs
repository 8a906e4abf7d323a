// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use std::path::PathBuf;

use crate::layout::ImageRole;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], for callers that need to branch on
/// what went wrong without caring about the context.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigNotFound,
    InvalidLayout,
    MissingInputFile,
    ImageTooLarge,
    UnknownSlot,
    MetadataOverflow,
    RegionOverflow,
    KeyReadFailure,
    InvalidMetadata,
}

#[derive(Debug)]
pub enum Error {
    /// No configuration with this name exists in the searched directory.
    ConfigNotFound {
        name: String,
        dir: PathBuf,
        suggestion: Option<String>,
    },
    /// The configuration parsed, or failed to parse, into something that is
    /// not a usable memory map.
    InvalidLayout { config: String, reason: String },
    MissingInputFile {
        path: PathBuf,
        source: std::io::Error,
    },
    ImageTooLarge { role: ImageRole, len: u64, max: u64 },
    UnknownSlot { slot: u32, available: Vec<u32> },
    MetadataOverflow {
        entries: usize,
        max_entries: usize,
        needed: u64,
        available: u64,
    },
    /// A write would land outside its region, or two images claim the same
    /// region.
    RegionOverflow {
        region: String,
        offset: u64,
        len: u64,
        bound: u64,
    },
    KeyReadFailure { path: Option<PathBuf>, reason: String },
    InvalidMetadata(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConfigNotFound { .. } => ErrorKind::ConfigNotFound,
            Error::InvalidLayout { .. } => ErrorKind::InvalidLayout,
            Error::MissingInputFile { .. } => ErrorKind::MissingInputFile,
            Error::ImageTooLarge { .. } => ErrorKind::ImageTooLarge,
            Error::UnknownSlot { .. } => ErrorKind::UnknownSlot,
            Error::MetadataOverflow { .. } => ErrorKind::MetadataOverflow,
            Error::RegionOverflow { .. } => ErrorKind::RegionOverflow,
            Error::KeyReadFailure { .. } => ErrorKind::KeyReadFailure,
            Error::InvalidMetadata(_) => ErrorKind::InvalidMetadata,
        }
    }

    pub(crate) fn invalid_layout(
        config: &str,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidLayout {
            config: config.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigNotFound {
                name,
                dir,
                suggestion,
            } => {
                write!(
                    f,
                    "no configuration named '{}' in {}",
                    name,
                    dir.display()
                )?;
                if let Some(s) = suggestion {
                    write!(f, ". Did you mean '{}'?", s)?;
                }
                Ok(())
            }
            Error::InvalidLayout { config, reason } => {
                write!(f, "configuration '{}' is invalid: {}", config, reason)
            }
            Error::MissingInputFile { path, source } => {
                write!(f, "could not read {}: {}", path.display(), source)
            }
            Error::ImageTooLarge { role, len, max } => write!(
                f,
                "{} is too big: has {} bytes but only {} fit in its region",
                role, len, max
            ),
            Error::UnknownSlot { slot, available } => write!(
                f,
                "application slot {} does not exist (slots: {:?})",
                slot, available
            ),
            Error::MetadataOverflow {
                entries,
                max_entries,
                needed,
                available,
            } => write!(
                f,
                "metadata block does not fit: {} entries (max {}) need {} \
                 bytes, region holds {}",
                entries, max_entries, needed, available
            ),
            Error::RegionOverflow {
                region,
                offset,
                len,
                bound,
            } => write!(
                f,
                "write of {} bytes at offset {:#x} overflows {} \
                 (bound {:#x})",
                len, offset, region, bound
            ),
            Error::KeyReadFailure { path, reason } => match path {
                Some(p) => write!(f, "key file {}: {}", p.display(), reason),
                None => write!(f, "bad key: {}", reason),
            },
            Error::InvalidMetadata(reason) => {
                write!(f, "malformed metadata block: {}", reason)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::MissingInputFile { source, .. } => Some(source),
            _ => None,
        }
    }
}
