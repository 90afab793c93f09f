// This file is part of Astarte.
//
// Copyright 2025, 2026 SECO Mind Srl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Hello Device, Type 60
//!
//! From Device ROE to Owner Onboarding Service
//!
//! ```cddl
//! TO2.HelloDevice = [
//!     Guid,
//!     NonceTO2ProveOV,
//!     kexSuiteName,
//!     cipherSuiteName,
//!     eASigInfo  ;; Device attestation signature info
//! ]
//! kexSuiteName = tstr
//! cipherSuiteName = tstr
//! ```
//!
//! First message in the TO2.
//!
//! Sets up new owner for proof of ownership. The Device proposes the key exchange and cipher
//! suite for the session, and challenges the Owner with NonceTO2ProveOV, which must be echoed in
//! the signed TO2.ProveOVHdr payload.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::v100::cipher::CipherSuiteNames;
use crate::v100::key_exchange::KexSuitNames;
use crate::v100::sign_info::EASigInfo;
use crate::v100::{ClientMessage, Guid, InitialMessage, Message, Msgtype, NonceTo2ProveOv};
use crate::Error;

use super::prove_ov_hdr::ProveOvHdr;

/// ```cddl
/// TO2.HelloDevice = [
///     Guid,
///     NonceTO2ProveOV,
///     kexSuiteName,
///     cipherSuiteName,
///     eASigInfo  ;; Device attestation signature info
/// ]
/// kexSuiteName = tstr
/// cipherSuiteName = tstr
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloDevice<'a> {
    pub(crate) guid: Guid,
    pub(crate) nonce: NonceTo2ProveOv,
    pub(crate) kex_suite_name: KexSuitNames,
    pub(crate) cipher_suite_name: CipherSuiteNames,
    pub(crate) e_a_sig_info: EASigInfo<'a>,
}

impl<'a> HelloDevice<'a> {
    /// Creates the HelloDevice message.
    pub fn new(
        guid: Guid,
        nonce: NonceTo2ProveOv,
        kex_suite_name: KexSuitNames,
        cipher_suite_name: CipherSuiteNames,
        e_a_sig_info: EASigInfo<'a>,
    ) -> Self {
        Self {
            guid,
            nonce,
            kex_suite_name,
            cipher_suite_name,
            e_a_sig_info,
        }
    }

    /// Returns the device GUID.
    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// Returns the nonce the Owner must echo in TO2.ProveOVHdr.
    pub fn nonce(&self) -> NonceTo2ProveOv {
        self.nonce
    }

    /// Returns the proposed key exchange suite.
    pub fn kex_suite_name(&self) -> KexSuitNames {
        self.kex_suite_name
    }

    /// Returns the proposed cipher suite.
    pub fn cipher_suite_name(&self) -> CipherSuiteNames {
        self.cipher_suite_name
    }

    /// Returns the device attestation signature info.
    pub fn e_a_sig_info(&self) -> &EASigInfo<'a> {
        &self.e_a_sig_info
    }
}

impl Serialize for HelloDevice<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            guid,
            nonce,
            kex_suite_name,
            cipher_suite_name,
            e_a_sig_info,
        } = self;

        (guid, nonce, kex_suite_name, cipher_suite_name, e_a_sig_info).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HelloDevice<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (guid, nonce, kex_suite_name, cipher_suite_name, e_a_sig_info) =
            Deserialize::deserialize(deserializer)?;

        Ok(Self {
            guid,
            nonce,
            kex_suite_name,
            cipher_suite_name,
            e_a_sig_info,
        })
    }
}

impl Message for HelloDevice<'_> {
    const MSG_TYPE: Msgtype = 60;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        ciborium::from_reader(buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode TO2.HelloDevice");

            Error::new(ErrorKind::Decode, "the TO2.HelloDevice")
        })
    }

    fn encode<W>(&self, write: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        ciborium::into_writer(self, write).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode TO2.HelloDevice");

            Error::new(ErrorKind::Encode, "the TO2.HelloDevice")
        })
    }
}

impl ClientMessage for HelloDevice<'_> {
    type Response<'a> = ProveOvHdr;
}

impl InitialMessage for HelloDevice<'_> {}
