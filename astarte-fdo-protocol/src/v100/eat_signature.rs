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

//! EAT signatures are used for entity attestation of Devices.

use std::borrow::Cow;
use std::fmt;

use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize};
use serde_bytes::{ByteBuf, Bytes};

use crate::error::ErrorKind;
use crate::Error;

use super::{Guid, Nonce};

/// ```cddl
/// ;; This is a COSE_Sign1 object:
/// EAToken = #6.18(EATokenBase)
///
/// EATokenBase  = [
///    protected:   bytes .cbor $EATProtectedHeaders,
///    unprotected: $EATUnprotectedHeaders
///    payload:     bytes .cbor EATPayloadBaseMap
///    signature:   bstr
/// ]
/// EATPayloadBaseMap = { EATPayloadBase }
/// $$EATPayloadBase //= (
///     EAT-FDO => $EATPayloads,
///     EAT-NONCE => Nonce,
///     EAT-UEID  => EAT-GUID,
///     EATOtherClaims
/// )
/// ;; EAT claim tags, defined in EAT spec or IANA, see appendix
/// ;; EAT-NONCE
/// ;; EAT-UEID
///
/// ;; FIDO Device Onboard specific EAT claim tag, see appendix
/// ;;EAT-FDO
/// ;;EATMAROEPrefix
/// ;;EUPHNonce
///
/// ;; EAT GUID is a EAT-UEID with the first byte
/// ;; as EAT-RAND and subsequent bytes containing
/// ;; the FIDO Device Onboard GUID
/// EAT-GUID = bstr .size 17
/// EAT-RAND = 1
///
/// ;; Use the socket/plug feature of CBOR here.
/// $$EATProtectedHeaders //= ()
/// $$EATUnprotectedHeaders //= (
///     EATMAROEPrefix: MAROEPrefix
/// )
/// $EATPayloads /= ()
/// ```
pub type EaToken = coset::CoseSign1;

/// ```cddl
/// EAT-NONCE      = 10 ;; iana assignment
/// ```
pub const EAT_NONCE: i64 = 10;

/// ```cddl
/// EAT-UEID       = 256 ;; iana assignment
/// ```
pub const EAT_UEID: i64 = 256;

/// ```cddl
/// EAT-FDO        = -257 ;; iana assignment
/// ```
pub const EAT_FDO: i64 = -257;

/// ```cddl
/// EATMAROEPrefix = -258 ;; iana assignment
/// ```
pub const EATMAROE_PREFIX: i64 = -258;

/// ```cddl
/// EUPHNonce      = -259 ;; iana assignment
/// ```
pub const EUPH_NONCE: i64 = -259;

/// ```cddl
/// EAT-RAND = 1
/// ```
pub const EAT_RAND: u8 = 1;

/// Claim set carried in the payload of an [`EaToken`].
///
/// The Device signs it in TO1.ProveToRV and TO2.ProveDevice to attest the challenge nonce and its
/// GUID. Claims outside the base set are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct EatPayload<'a> {
    pub(crate) nonce: Nonce,
    pub(crate) ueid: Cow<'a, Bytes>,
    pub(crate) fdo: Option<ciborium::Value>,
}

impl EatPayload<'_> {
    /// Create the base claim set for a Device.
    pub fn new(nonce: Nonce, guid: &Guid) -> Self {
        let mut ueid = Vec::with_capacity(17);
        ueid.push(EAT_RAND);
        ueid.extend_from_slice(guid.as_slice());

        Self {
            nonce,
            ueid: Cow::Owned(ueid.into()),
            fdo: None,
        }
    }

    /// Attach the protocol specific EAT-FDO claim.
    pub fn with_fdo(mut self, fdo: ciborium::Value) -> Self {
        self.fdo = Some(fdo);

        self
    }

    /// Return the attested nonce.
    pub fn nonce(&self) -> Nonce {
        self.nonce
    }

    /// Return the GUID packed in the EAT-UEID claim.
    pub fn guid(&self) -> Result<Guid, Error> {
        let (rand, guid) = self
            .ueid
            .split_first()
            .ok_or(Error::new(ErrorKind::Invalid, "for EAT-UEID"))?;

        if *rand != EAT_RAND {
            return Err(Error::new(ErrorKind::Invalid, "for EAT-UEID"));
        }

        let bytes: [u8; 16] = guid
            .try_into()
            .map_err(|_| Error::new(ErrorKind::Invalid, "for EAT-UEID"))?;

        Ok(Guid::new(bytes))
    }

    /// Return the protocol specific EAT-FDO claim.
    pub fn fdo(&self) -> Option<&ciborium::Value> {
        self.fdo.as_ref()
    }
}

impl Serialize for EatPayload<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { nonce, ueid, fdo } = self;

        let len = 2 + usize::from(fdo.is_some());

        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry(&EAT_NONCE, nonce)?;
        map.serialize_entry(&EAT_UEID, ueid)?;
        if let Some(fdo) = fdo {
            map.serialize_entry(&EAT_FDO, fdo)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for EatPayload<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct PayloadVisitor;

        impl<'de> Visitor<'de> for PayloadVisitor {
            type Value = EatPayload<'static>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "an EAT claim map")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut nonce = None;
                let mut ueid = None;
                let mut fdo = None;

                while let Some(key) = map.next_key::<i64>()? {
                    match key {
                        EAT_NONCE => nonce = Some(map.next_value()?),
                        EAT_UEID => ueid = Some(map.next_value::<ByteBuf>()?),
                        EAT_FDO => fdo = Some(map.next_value()?),
                        _ => {
                            map.next_value::<IgnoredAny>()?;
                        }
                    }
                }

                let nonce = nonce.ok_or_else(|| serde::de::Error::missing_field("EAT-NONCE"))?;
                let ueid = ueid.ok_or_else(|| serde::de::Error::missing_field("EAT-UEID"))?;

                Ok(EatPayload {
                    nonce,
                    ueid: Cow::Owned(ueid),
                    fdo,
                })
            }
        }

        deserializer.deserialize_map(PayloadVisitor)
    }
}
