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

//! Done, Type 70
//!
//! From Device ROE to Owner Onboarding Service
//!
//! Message Format - after decryption and verification:
//!
//! ```cddl
//! TO2.Done = [
//!     NonceTO2ProveDv ;; Nonce generated by Owner Onboarding Service
//! ]                   ;; ...and sent to Device ROE in Msg TO2.ProveOVHdr
//! ```
//!
//! Indicates successful completion of the Transfer Ownership Protocol 2 on the Device side. The
//! Device has stored its replacement credentials, and echoes NonceTO2ProveDv to bind this message
//! to the session.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::v100::{ClientMessage, Message, Msgtype, NonceTo2ProveDv};
use crate::Error;

use super::done2::Done2;

/// ```cddl
/// TO2.Done = [
///     NonceTO2ProveDv ;; Nonce generated by Owner Onboarding Service
/// ]                   ;; ...and sent to Device ROE in Msg TO2.ProveOVHdr
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Done {
    pub(crate) nonce_to2_prove_dv: NonceTo2ProveDv,
}

impl Done {
    /// Creates the message echoing the TO2.ProveOVHdr nonce.
    pub fn new(nonce_to2_prove_dv: NonceTo2ProveDv) -> Self {
        Self { nonce_to2_prove_dv }
    }

    /// Returns the echoed nonce.
    pub fn nonce(&self) -> NonceTo2ProveDv {
        self.nonce_to2_prove_dv
    }
}

impl Serialize for Done {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { nonce_to2_prove_dv } = self;

        (nonce_to2_prove_dv,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Done {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (nonce_to2_prove_dv,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { nonce_to2_prove_dv })
    }
}

impl Message for Done {
    const MSG_TYPE: Msgtype = 70;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        ciborium::from_reader(buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode TO2.Done");

            Error::new(ErrorKind::Decode, "the TO2.Done")
        })
    }

    fn encode<W>(&self, write: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        ciborium::into_writer(self, write).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode TO2.Done");

            Error::new(ErrorKind::Encode, "the TO2.Done")
        })
    }
}

impl ClientMessage for Done {
    type Response<'a> = Done2;
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::utils::Hex;
    use crate::v100::tests::create_nonce;

    use super::*;

    #[test]
    fn done_roundtrip() {
        let done = Done::new(NonceTo2ProveDv(create_nonce()));

        let mut buf = Vec::new();

        done.encode(&mut buf).unwrap();

        let res = Done::decode(&buf).unwrap();

        assert_eq!(res, done);
        assert_eq!(res.nonce(), NonceTo2ProveDv(create_nonce()));

        insta::assert_snapshot!(
            Hex::new(&buf),
            @"8150000102030405060708090a0b0c0d0e0f"
        );
    }
}
