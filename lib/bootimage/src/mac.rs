// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Keyed message authentication for image tags.
//!
//! The calculator and composer only ever see a `&dyn MacScheme`, so a new
//! scheme is added by implementing the trait and giving it a name in
//! [`MacAlgorithm`].

use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sha3::Sha3_256;

use crate::error::{Error, Result};

pub trait MacScheme {
    /// Name used in configuration files and diagnostics.
    fn name(&self) -> &'static str;

    /// Length in bytes of an untruncated tag.
    fn output_len(&self) -> usize;

    /// Computes the full tag of `data` under `key`. This must be a pure
    /// function of its inputs.
    fn compute(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>>;
}

#[derive(Copy, Clone, Debug, Default)]
pub struct HmacSha256;

#[derive(Copy, Clone, Debug, Default)]
pub struct HmacSha3_256;

impl MacScheme for HmacSha256 {
    fn name(&self) -> &'static str {
        "hmac-sha256"
    }

    fn output_len(&self) -> usize {
        32
    }

    fn compute(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        keyed_digest::<Hmac<Sha256>>(key, data)
    }
}

impl MacScheme for HmacSha3_256 {
    fn name(&self) -> &'static str {
        "hmac-sha3-256"
    }

    fn output_len(&self) -> usize {
        32
    }

    fn compute(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        keyed_digest::<Hmac<Sha3_256>>(key, data)
    }
}

fn keyed_digest<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <M as Mac>::new_from_slice(key).map_err(|e| {
        Error::KeyReadFailure {
            path: None,
            reason: e.to_string(),
        }
    })?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Selects a [`MacScheme`] by name in a layout configuration.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MacAlgorithm {
    #[default]
    HmacSha256,
    #[serde(rename = "hmac-sha3-256")]
    HmacSha3_256,
}

impl MacAlgorithm {
    pub fn scheme(self) -> &'static dyn MacScheme {
        match self {
            MacAlgorithm::HmacSha256 => &HmacSha256,
            MacAlgorithm::HmacSha3_256 => &HmacSha3_256,
        }
    }
}
