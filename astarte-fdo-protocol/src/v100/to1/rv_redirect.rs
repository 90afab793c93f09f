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

//! Completes the TO1 protocol.
//!
//! Indicates to the Device ROE that a new Owner is indeed waiting for it, and may be found by
//! connecting to any of the entries in TO1dataPayload.RVTO2Addr containing network address
//! information.

use std::io::Write;

use coset::{CoseSign1, TaggedCborSerializable};

use crate::error::ErrorKind;
use crate::v100::rv_to2_addr::To1dPayload;
use crate::v100::{Message, Msgtype};
use crate::Error;

/// ```cddl
/// TO1.RVRedirect = to1d
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RvRedirect {
    pub(crate) to1d: CoseSign1,
}

impl RvRedirect {
    /// Create the redirect from the blob stored during TO0.
    pub fn new(to1d: CoseSign1) -> Self {
        Self { to1d }
    }

    /// Returns the to1d signed blob
    pub fn to1d(&self) -> &CoseSign1 {
        &self.to1d
    }

    /// Parses the Rendezvous blob
    pub fn to1d_payload(&self) -> Result<To1dPayload<'_>, Error> {
        let payload = self.to1d.payload.as_deref().ok_or(Error::new(
            ErrorKind::Invalid,
            "RvRedirect payload is missing",
        ))?;

        let rv_addr = ciborium::from_reader(payload).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode RvRedirect payload");

            Error::new(ErrorKind::Decode, "the RvRedirect payload")
        })?;

        Ok(rv_addr)
    }
}

impl Message for RvRedirect {
    const MSG_TYPE: Msgtype = 33;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        let to1d = CoseSign1::from_tagged_slice(buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode RvRedirect");

            Error::new(ErrorKind::Decode, "the RvRedirect")
        })?;

        if to1d.payload.is_none() {
            return Err(Error::new(
                ErrorKind::Invalid,
                "the RvRedirect payload is missing",
            ));
        }

        Ok(Self { to1d })
    }

    fn encode<W>(&self, write: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        self.to1d
            .clone()
            .to_tagged_vec()
            .map_err(|err| {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %err, "couldn't encode RvRedirect");

                Error::new(ErrorKind::Encode, "the RvRedirect")
            })
            .and_then(|buf| {
                write.write_all(&buf).map_err(|err| {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %err, "couldn't write RvRedirect");

                    Error::new(ErrorKind::Write, "the RvRedirect")
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::v100::rv_to2_addr::tests::{create_rv_to2_addr, create_to1d_payload};
    use crate::v100::to0::owner_sign::tests::create_to1d;

    use super::*;

    #[test]
    fn rv_redirect_roundtrip() {
        let rv_redirect = RvRedirect::new(create_to1d());

        let mut buf = Vec::new();

        rv_redirect.encode(&mut buf).unwrap();

        let mut res = RvRedirect::decode(&buf).unwrap();

        res.to1d.protected.original_data.take();

        assert_eq!(res, rv_redirect);
    }

    #[test]
    fn rv_redirect_to1d() {
        let to1d = create_to1d();

        let rv_redirect = RvRedirect::new(to1d.clone());

        let res = rv_redirect.to1d();

        assert_eq!(*res, to1d);

        let res = rv_redirect.to1d_payload().unwrap();

        assert_eq!(res, create_to1d_payload());

        let res = res.take_addrs();

        assert_eq!(res, create_rv_to2_addr());
    }
}
