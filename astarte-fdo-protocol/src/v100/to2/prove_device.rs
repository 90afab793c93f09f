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

//! Prove Device, Type 64
//!
//! From Device to Owner Onboarding Service
//!
//! Message Format:
//!
//! ```cddl
//! TO2.ProveDevice = EAToken
//! $$EATPayloadBase //= (
//!     EAT-NONCE: NonceTO2ProveDv
//! )
//! TO2ProveDevicePayload = [
//!     xBKeyExchange
//! ]
//! $EATUnprotectedHeaders /= (
//!     EUPHNonce: NonceTO2SetupDv ;; NonceTO2SetupDv is used in TO2.SetupDevice and TO2.Done2
//! )
//! $EATPayloads /= (
//!     TO2ProveDevicePayload
//! )
//! ```
//!
//! Proves the provenance of the Device to the new owner, using the entity attestation token based
//! on the challenge NonceTO2ProveDv sent as TO2.ProveOVHdr.UnprotectedHeaders.CUPHNonce. The
//! signature is verified using the device certificate chain contained in the Ownership Voucher. If
//! the signature cannot be verified, or fails to verify, the connection is terminated with an error
//! message.
//!
//! Subsequent message bodies are protected for confidentiality and integrity.

use std::io::Write;

use coset::{Label, TaggedCborSerializable};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::v100::eat_signature::{EaToken, EatPayload, EUPH_NONCE};
use crate::v100::key_exchange::XBKeyExchange;
use crate::v100::{ClientMessage, Message, Msgtype, NonceTo2SetupDv};
use crate::Error;

use super::setup_device::SetupDevice;

/// ```cddl
/// TO2.ProveDevice = EAToken
/// $$EATPayloadBase //= (
///     EAT-NONCE: NonceTO2ProveDv
/// )
/// $EATUnprotectedHeaders /= (
///     EUPHNonce: NonceTO2SetupDv ;; NonceTO2SetupDv is used in TO2.SetupDevice and TO2.Done2
/// )
/// $EATPayloads /= (
///     TO2ProveDevicePayload
/// )
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProveDevice {
    pub(crate) sign: EaToken,
}

impl ProveDevice {
    /// Create the prove device with the EAT
    pub fn new(sign: EaToken) -> Self {
        Self { sign }
    }

    /// Returns the signed EAT
    pub fn sign(&self) -> &EaToken {
        &self.sign
    }

    /// Returns the decoded EAT claim set
    pub fn payload(&self) -> Result<EatPayload<'static>, Error> {
        let payload = self.sign.payload.as_deref().ok_or(Error::new(
            ErrorKind::Invalid,
            "the TO2.ProveDevice payload is missing",
        ))?;

        ciborium::from_reader(payload).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode TO2.ProveDevice payload");

            Error::new(ErrorKind::Decode, "the TO2.ProveDevice payload")
        })
    }

    /// Returns the EUPHNonce from the unprotected header
    pub fn euph_nonce(&self) -> Result<NonceTo2SetupDv, Error> {
        let nonce_param = Label::Int(EUPH_NONCE);

        let nonce = self
            .sign
            .unprotected
            .rest
            .iter()
            .find_map(|(label, value)| (*label == nonce_param).then_some(value))
            .ok_or(Error::new(
                ErrorKind::Invalid,
                "the TO2.ProveDevice EUPHNonce is missing",
            ))?;

        nonce.deserialized().map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode TO2.ProveDevice EUPHNonce header");

            Error::new(ErrorKind::Decode, "the TO2.ProveDevice EUPHNonce header")
        })
    }
}

impl Message for ProveDevice {
    const MSG_TYPE: Msgtype = 64;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        let sign = EaToken::from_tagged_slice(buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode TO2.ProveDevice");

            Error::new(ErrorKind::Decode, "the TO2.ProveDevice")
        })?;

        if sign.payload.is_none() {
            return Err(Error::new(
                ErrorKind::Invalid,
                "the TO2.ProveDevice payload is missing",
            ));
        }

        Ok(Self { sign })
    }

    fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        self.sign
            .clone()
            .to_tagged_vec()
            .map_err(|err| {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %err, "couldn't encode TO2.ProveDevice");

                Error::new(ErrorKind::Encode, "the TO2.ProveDevice")
            })
            .and_then(|buf| {
                writer.write_all(&buf).map_err(|err| {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %err, "couldn't write TO2.ProveDevice");

                    Error::new(ErrorKind::Write, "the TO2.ProveDevice")
                })
            })
    }
}

impl ClientMessage for ProveDevice {
    type Response<'a> = SetupDevice;
}

/// ```cddl
/// TO2ProveDevicePayload = [
///     xBKeyExchange
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProveDevicePayload<'a> {
    pub(crate) xb_key_exchange: XBKeyExchange<'a>,
}

impl<'a> ProveDevicePayload<'a> {
    /// Creates the payload with the key exchange second step.
    pub fn new(xb_key_exchange: XBKeyExchange<'a>) -> Self {
        Self { xb_key_exchange }
    }

    /// Returns the key exchange second step.
    pub fn xb_key_exchange(&self) -> &XBKeyExchange<'a> {
        &self.xb_key_exchange
    }

    /// Extracts the payload from the EAT-FDO claim.
    pub fn from_eat(payload: &EatPayload) -> Result<ProveDevicePayload<'static>, Error> {
        let fdo = payload.fdo().ok_or(Error::new(
            ErrorKind::Invalid,
            "the EAT-FDO claim is missing",
        ))?;

        fdo.deserialized().map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode the EAT-FDO claim");

            Error::new(ErrorKind::Decode, "the EAT-FDO claim")
        })
    }

    /// Encodes the payload as the EAT-FDO claim value.
    pub fn to_eat_value(&self) -> Result<ciborium::Value, Error> {
        ciborium::Value::serialized(self).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode the EAT-FDO claim");

            Error::new(ErrorKind::Encode, "the EAT-FDO claim")
        })
    }
}

impl Serialize for ProveDevicePayload<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { xb_key_exchange } = self;

        (xb_key_exchange,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ProveDevicePayload<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (xb_key_exchange,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { xb_key_exchange })
    }
}
