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

//! Proves validity of device identity to the Rendezvous Server.
//!
//! The EAT token attests the NonceTO1Proof from TO1.HelloRVAck and carries the Device GUID in the
//! EAT-UEID claim, for the Device seeking its owner.

use std::io::Write;

use coset::TaggedCborSerializable;

use crate::error::ErrorKind;
use crate::v100::eat_signature::{EaToken, EatPayload};
use crate::v100::{ClientMessage, Message, Msgtype};
use crate::Error;

use super::rv_redirect::RvRedirect;

/// ```cddl
/// TO1.ProveToRV = EAToken
/// $$EATPayloadBase //= (
///     EAT-NONCE: NonceTO1Proof
/// )
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProveToRv {
    pub(crate) ea_token: EaToken,
}

impl ProveToRv {
    /// Create a ProveToRv from an EAT
    pub fn new(ea_token: EaToken) -> Self {
        Self { ea_token }
    }

    /// Returns the signed EAT.
    pub fn ea_token(&self) -> &EaToken {
        &self.ea_token
    }

    /// Parses the claim set in the EAT payload.
    pub fn payload(&self) -> Result<EatPayload<'_>, Error> {
        let payload = self.ea_token.payload.as_deref().ok_or(Error::new(
            ErrorKind::Invalid,
            "ProveToRv payload is missing",
        ))?;

        ciborium::from_reader(payload).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode ProveToRv payload");

            Error::new(ErrorKind::Decode, "the ProveToRv payload")
        })
    }
}

impl Message for ProveToRv {
    const MSG_TYPE: Msgtype = 32;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        let ea_token = EaToken::from_tagged_slice(buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode TO1.ProveToRv");

            Error::new(ErrorKind::Decode, "the TO1.ProveToRv")
        })?;

        if ea_token.payload.is_none() {
            return Err(Error::new(
                ErrorKind::Invalid,
                "the TO1.ProveToRv payload is missing",
            ));
        }

        Ok(Self { ea_token })
    }

    fn encode<W>(&self, write: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        // TODO: coset requires allocations
        self.ea_token
            .clone()
            .to_tagged_vec()
            .map_err(|err| {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %err, "couldn't encode TO1.ProveToRv");

                Error::new(ErrorKind::Encode, "the TO1.ProveToRv")
            })
            .and_then(|buf| {
                write.write_all(&buf).map_err(|err| {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %err, "couldn't write TO1.ProveToRv");

                    Error::new(ErrorKind::Write, "the TO1.ProveToRv")
                })
            })
    }
}

impl ClientMessage for ProveToRv {
    type Response<'a> = RvRedirect;
}

#[cfg(test)]
pub(crate) mod tests {
    use coset::{CoseSign1Builder, HeaderBuilder};
    use pretty_assertions::assert_eq;

    use crate::v100::eat_signature::tests::create_eat_payload;
    use crate::v100::ownership_voucher::tests::ecc_signature;

    use super::*;

    pub(crate) fn create_ea_token() -> EaToken {
        let mut buf = Vec::new();

        ciborium::into_writer(&create_eat_payload(), &mut buf).unwrap();

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

    #[test]
    fn prove_to_rv_roundtrip() {
        let prove_to_rv = ProveToRv::new(create_ea_token());

        let mut buf = Vec::new();

        prove_to_rv.encode(&mut buf).unwrap();

        let mut res = ProveToRv::decode(&buf).unwrap();

        res.ea_token.protected.original_data.take();

        assert_eq!(res, prove_to_rv);
    }

    #[test]
    fn prove_to_rv_payload() {
        let prove_to_rv = ProveToRv::new(create_ea_token());

        let res = prove_to_rv.payload().unwrap();

        assert_eq!(res, create_eat_payload());
    }

    #[test]
    fn prove_to_rv_missing_payload() {
        let ea_token = CoseSign1Builder::new().signature(ecc_signature()).build();

        let mut buf = Vec::new();

        ProveToRv::new(ea_token).encode(&mut buf).unwrap();

        let err = ProveToRv::decode(&buf).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }
}
