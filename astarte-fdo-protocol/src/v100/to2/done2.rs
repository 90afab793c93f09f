// This file is part of Astarte.
//
// Copyright 2026 SECO Mind Srl
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

//! Done 2, Type 71
//!
//! From Owner Onboarding Service to Device ROE
//!
//! Message Format - after decryption and verification:
//!
//! ```cddl
//! TO2.Done2 = [
//!     NonceTO2SetupDv
//! ]
//! ```
//!
//! Final message of the protocol. Acknowledges TO2.Done and proves to the Device that the Owner
//! received TO2.ProveDevice, by echoing NonceTO2SetupDv from the EAT EUPHNonce header. After this
//! message both sides close the connection and discard the session keys.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::v100::{Message, Msgtype, NonceTo2SetupDv};
use crate::Error;

/// ```cddl
/// TO2.Done2 = [
///     NonceTO2SetupDv
/// ]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done2 {
    pub(crate) nonce_to2_setup_dv: NonceTo2SetupDv,
}

impl Done2 {
    /// Creates the message echoing the TO2.ProveDevice EUPHNonce.
    pub fn new(nonce_to2_setup_dv: NonceTo2SetupDv) -> Self {
        Self { nonce_to2_setup_dv }
    }

    /// Returns the echoed nonce.
    pub fn nonce(&self) -> NonceTo2SetupDv {
        self.nonce_to2_setup_dv
    }
}

impl Serialize for Done2 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { nonce_to2_setup_dv } = self;

        (nonce_to2_setup_dv,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Done2 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (nonce_to2_setup_dv,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { nonce_to2_setup_dv })
    }
}

impl Message for Done2 {
    const MSG_TYPE: Msgtype = 71;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        ciborium::from_reader(buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode TO2.Done2");

            Error::new(ErrorKind::Decode, "the TO2.Done2")
        })
    }

    fn encode<W>(&self, write: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        ciborium::into_writer(self, write).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode TO2.Done2");

            Error::new(ErrorKind::Encode, "the TO2.Done2")
        })
    }
}
