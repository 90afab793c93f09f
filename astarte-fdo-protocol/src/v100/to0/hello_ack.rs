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

//! Indicates that the Rendezvous Server is ready to accept an Owner registration.
//!
//! The NonceTO0Sign variable contains a nonce the Owner must include in the to0d blob of
//! TO0.OwnerSign, to guarantee the freshness of the signature.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::v100::{Message, Msgtype, NonceTo0Sign};
use crate::Error;

/// ```cddl
/// TO0.HelloAck = [
///     NonceTO0Sign
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct HelloAck {
    pub(crate) nonce_to0_sign: NonceTo0Sign,
}

impl HelloAck {
    /// Create the ack with the nonce to sign.
    pub fn new(nonce_to0_sign: NonceTo0Sign) -> Self {
        Self { nonce_to0_sign }
    }

    /// Returns the nonce to include in the to0d blob.
    pub fn nonce_to0_sign(&self) -> NonceTo0Sign {
        self.nonce_to0_sign
    }
}

impl Serialize for HelloAck {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { nonce_to0_sign } = self;

        (nonce_to0_sign,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HelloAck {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (nonce_to0_sign,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { nonce_to0_sign })
    }
}

impl Message for HelloAck {
    const MSG_TYPE: Msgtype = 21;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        ciborium::from_reader(buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode TO0.HelloAck");

            Error::new(ErrorKind::Decode, "the TO0.HelloAck")
        })
    }

    fn encode<W>(&self, write: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        ciborium::into_writer(self, write).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode TO0.HelloAck");

            Error::new(ErrorKind::Encode, "the TO0.HelloAck")
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::utils::Hex;
    use crate::v100::tests::create_nonce;

    use super::*;

    #[test]
    fn hello_ack_roundtrip() {
        let hello_ack = HelloAck::new(create_nonce());

        let mut buf = Vec::new();

        hello_ack.encode(&mut buf).unwrap();

        let res = HelloAck::decode(&buf).unwrap();

        assert_eq!(res, hello_ack);
        assert_eq!(res.nonce_to0_sign(), create_nonce());

        insta::assert_snapshot!(Hex::new(&buf), @"8150000102030405060708090a0b0c0d0e0f");
    }
}
