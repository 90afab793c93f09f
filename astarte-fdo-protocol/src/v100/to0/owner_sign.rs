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

//! Proves the possession of the Ownership Voucher to the Rendezvous Server.
//!
//! The message contains the to0d blob, with the Ownership Voucher and the requested registration
//! interval, and the to1d blob, a COSE Sign1 over the addresses where the Owner waits for the
//! Device to run TO2. The to1d signature must verify against the Owner public key in the last
//! voucher entry, and its payload binds the two blobs together with the hash of the to0d bytes.

use std::io::Write;

use coset::{AsCborValue, CoseSign1};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::utils::CborBstr;
use crate::v100::ownership_voucher::OwnershipVoucher;
use crate::v100::rv_to2_addr::To1dPayload;
use crate::v100::{ClientMessage, Message, Msgtype, NonceTo0Sign};
use crate::Error;

use super::accept_owner::AcceptOwner;

const SIGN_TAG: u64 = coset::iana::CborTag::CoseSign1 as u64;

/// ```cddl
/// TO0.OwnerSign = [
///     to0d: bstr .cbor TO0d,
///     to1d: TO1dBlob
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerSign<'a> {
    pub(crate) to0d: CborBstr<'a, To0d<'a>>,
    pub(crate) to1d: CoseSign1,
}

impl<'a> OwnerSign<'a> {
    /// Create the message from the two blobs.
    pub fn new(to0d: CborBstr<'a, To0d<'a>>, to1d: CoseSign1) -> Self {
        Self { to0d, to1d }
    }

    /// Returns the to0d blob.
    ///
    /// The Rendezvous Server hashes the encoded bytes to check the to1d payload.
    pub fn to0d(&self) -> &CborBstr<'a, To0d<'a>> {
        &self.to0d
    }

    /// Returns the to1d signed blob.
    pub fn to1d(&self) -> &CoseSign1 {
        &self.to1d
    }

    /// Parses the rendezvous blob payload.
    pub fn to1d_payload(&self) -> Result<To1dPayload<'_>, Error> {
        let payload = self.to1d.payload.as_deref().ok_or(Error::new(
            ErrorKind::Invalid,
            "OwnerSign to1d payload is missing",
        ))?;

        ciborium::from_reader(payload).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode OwnerSign to1d payload");

            Error::new(ErrorKind::Decode, "the OwnerSign to1d payload")
        })
    }
}

impl Serialize for OwnerSign<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { to0d, to1d } = self;

        let to1d = to1d
            .clone()
            .to_cbor_value()
            .map_err(serde::ser::Error::custom)?;

        (to0d, ciborium::tag::Required::<_, SIGN_TAG>(to1d)).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OwnerSign<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (to0d, to1d): (
            CborBstr<To0d>,
            ciborium::tag::Accepted<ciborium::Value, SIGN_TAG>,
        ) = Deserialize::deserialize(deserializer)?;

        let to1d = CoseSign1::from_cbor_value(to1d.0).map_err(serde::de::Error::custom)?;

        Ok(Self { to0d, to1d })
    }
}

impl Message for OwnerSign<'_> {
    const MSG_TYPE: Msgtype = 22;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        ciborium::from_reader(buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode TO0.OwnerSign");

            Error::new(ErrorKind::Decode, "the TO0.OwnerSign")
        })
    }

    fn encode<W>(&self, write: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        ciborium::into_writer(self, write).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode TO0.OwnerSign");

            Error::new(ErrorKind::Encode, "the TO0.OwnerSign")
        })
    }
}

impl ClientMessage for OwnerSign<'_> {
    type Response<'b> = AcceptOwner;
}

/// ```cddl
/// TO0d = [
///     OwnershipVoucher,
///     WaitSeconds: uint32,
///     NonceTO0Sign
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct To0d<'a> {
    pub(crate) voucher: OwnershipVoucher<'a>,
    pub(crate) wait_seconds: u32,
    pub(crate) nonce_to0_sign: NonceTo0Sign,
}

impl<'a> To0d<'a> {
    /// Create the blob for the registration.
    pub fn new(
        voucher: OwnershipVoucher<'a>,
        wait_seconds: u32,
        nonce_to0_sign: NonceTo0Sign,
    ) -> Self {
        Self {
            voucher,
            wait_seconds,
            nonce_to0_sign,
        }
    }

    /// Returns the Ownership Voucher.
    pub fn voucher(&self) -> &OwnershipVoucher<'a> {
        &self.voucher
    }

    /// Returns the registration interval requested by the Owner, in seconds.
    pub fn wait_seconds(&self) -> u32 {
        self.wait_seconds
    }

    /// Returns the nonce received in TO0.HelloAck.
    pub fn nonce_to0_sign(&self) -> NonceTo0Sign {
        self.nonce_to0_sign
    }
}

impl Serialize for To0d<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            voucher,
            wait_seconds,
            nonce_to0_sign,
        } = self;

        (voucher, wait_seconds, nonce_to0_sign).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for To0d<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (voucher, wait_seconds, nonce_to0_sign) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            voucher,
            wait_seconds,
            nonce_to0_sign,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use coset::{CoseSign1Builder, HeaderBuilder};
    use pretty_assertions::assert_eq;

    use crate::v100::ownership_voucher::tests::{create_voucher, ecc_signature};
    use crate::v100::rv_to2_addr::tests::create_to1d_payload;
    use crate::v100::tests::create_nonce;

    use super::*;

    pub(crate) fn create_to1d() -> CoseSign1 {
        let mut buf = Vec::new();

        ciborium::into_writer(&create_to1d_payload(), &mut buf).unwrap();

        CoseSign1Builder::new()
            .protected(
                HeaderBuilder::new()
                    .algorithm(coset::iana::Algorithm::ES256)
                    .build(),
            )
            .payload(buf)
            .signature(ecc_signature())
            .build()
    }

    pub(crate) fn create_to0d() -> To0d<'static> {
        To0d {
            voucher: create_voucher(),
            wait_seconds: 3600,
            nonce_to0_sign: create_nonce(),
        }
    }

    #[test]
    fn owner_sign_roundtrip() {
        let owner_sign = OwnerSign::new(CborBstr::new(create_to0d()), create_to1d());

        let mut buf = Vec::new();

        owner_sign.encode(&mut buf).unwrap();

        let OwnerSign { to0d, mut to1d } = OwnerSign::decode(&buf).unwrap();

        // For the diff
        to1d.protected.original_data = None;

        let mut to0d = to0d.into_value();
        to0d.voucher.ov_entry_array[0].entry.protected.original_data = None;

        assert_eq!(to0d, *owner_sign.to0d);
        assert_eq!(to1d, owner_sign.to1d);
    }

    #[test]
    fn owner_sign_to1d_payload() {
        let owner_sign = OwnerSign::new(CborBstr::new(create_to0d()), create_to1d());

        let res = owner_sign.to1d_payload().unwrap();

        assert_eq!(res, create_to1d_payload());
    }

    #[test]
    fn owner_sign_to1d_payload_missing() {
        let to1d = CoseSign1Builder::new().signature(ecc_signature()).build();

        let owner_sign = OwnerSign::new(CborBstr::new(create_to0d()), to1d);

        let err = owner_sign.to1d_payload().unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn to0d_roundtrip() {
        let to0d = create_to0d();

        let mut buf = Vec::new();
        ciborium::into_writer(&to0d, &mut buf).unwrap();

        let mut res: To0d = ciborium::from_reader(buf.as_slice()).unwrap();

        res.voucher.ov_entry_array[0].entry.protected.original_data = None;

        assert_eq!(res, to0d);
    }

    #[test]
    fn to0d_getters() {
        let to0d = create_to0d();

        assert_eq!(*to0d.voucher(), create_voucher());
        assert_eq!(to0d.wait_seconds(), 3600);
        assert_eq!(to0d.nonce_to0_sign(), create_nonce());
    }
}
