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

//! Prove Ownership Voucher Header, Type 61
//!
//! From Owner Onboarding Service to Device:
//!
//! Message Format:
//!
//! ```cddl
//! TO2.ProveOVHdr = CoseSignature
//! TO2ProveOVHdrPayload = [
//!     bstr .cbor OVHeader,     ;; Ownership Voucher header
//!     NumOVEntries, ;; number of ownership voucher entries
//!     HMac,         ;; Ownership Voucher "hmac" of hdr
//!     NonceTO2ProveOV, ;; nonce from TO2.HelloDevice
//!     eBSigInfo,    ;; Device attestation signature info
//!     xAKeyExchange ;; Key exchange first step
//! ]
//! NumOVEntries = uint8
//! TO2ProveOVHdrUnprotectedHeaders = (
//!     CUPHNonce:       NonceTO2ProveDv, ;; nonce is used below in TO2.ProveDevice and TO2.Done
//!     CUPHOwnerPubKey: PublicKey ;; Owner key, as convenience to Device
//! )
//! $COSEPayloads /= (
//!     TO2ProveOVHdrPayload
//! )
//! $$COSEUnprotectedHeaders /= (
//!     TO2ProveOVHdrUnprotectedHeaders
//! )
//! ```
//!
//! This message serves several purposes:
//!
//! - The Owner begins sending the Ownership Voucher to the device (only the header is in this
//!   message).
//! - The Owner signs the message with the Owner key (the last key in the Ownership Voucher),
//!   allowing the Device to verify (later on) that the Owner controls this private key.
//! - The Owner starts the key exchange protocol by sending the initial key exchange parameter
//!   xAKeyExchange (e.g., in Diffie Hellman, the parameter ‘A’) to the Device.

use std::io::Write;

use coset::iana::{EnumI64, HeaderParameter};
use coset::{CoseSign1, HeaderBuilder, Label, TaggedCborSerializable};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::utils::CborBstr;
use crate::v100::hash_hmac::HMac;
use crate::v100::key_exchange::XAKeyExchange;
use crate::v100::ownership_voucher::OvHeader;
use crate::v100::public_key::PublicKey;
use crate::v100::sign_info::EBSigInfo;
use crate::v100::{Message, Msgtype, NonceTo2ProveDv, NonceTo2ProveOv};
use crate::Error;

/// ```cddl
/// TO2.ProveOVHdr = CoseSignature
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ProveOvHdr {
    pub(crate) sign: CoseSign1,
}

impl ProveOvHdr {
    /// Creates the message from the signed Cose.
    pub fn new(sign: CoseSign1) -> Self {
        Self { sign }
    }

    /// Returns the signed Cose
    pub fn sign(&self) -> &CoseSign1 {
        &self.sign
    }

    /// Returns the decoded Cose payload
    pub fn payload(&self) -> Result<PvOvHdrPayload<'static>, Error> {
        let payload = self.sign.payload.as_deref().ok_or(Error::new(
            ErrorKind::Invalid,
            "the TO2.ProveOvHdr payload is missing",
        ))?;

        ciborium::from_reader(payload).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode TO2.ProveOvHdr payload");

            Error::new(ErrorKind::Decode, "the TO2.ProveOvHdr payload")
        })
    }

    /// Returns the decoded Cose header
    pub fn header(&self) -> Result<PvOvHdrUnprotected<'static>, Error> {
        let pubkey_param = Label::Int(HeaderParameter::CuphOwnerPubKey.to_i64());

        let pubkey = self
            .sign
            .unprotected
            .rest
            .iter()
            .find_map(|(label, value)| (*label == pubkey_param).then_some(value))
            .ok_or(Error::new(
                ErrorKind::Invalid,
                "the TO2.ProveOvHdr owner public key is missing",
            ))?;

        let pubkey = pubkey.deserialized().map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode TO2.ProveOvHdr owner public key header");

            Error::new(
                ErrorKind::Decode,
                "the TO2.ProveOvHdr header owner public key",
            )
        })?;

        let nonce_param = Label::Int(HeaderParameter::CuphNonce.to_i64());

        let nonce = self
            .sign
            .unprotected
            .rest
            .iter()
            .find_map(|(label, value)| (*label == nonce_param).then_some(value))
            .ok_or(Error::new(
                ErrorKind::Invalid,
                "the TO2.ProveOvHdr nonce is missing",
            ))?;

        let nonce = nonce.deserialized().map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode TO2.ProveOvHdr nonce header");

            Error::new(ErrorKind::Decode, "the TO2.ProveOvHdr nonce header")
        })?;

        Ok(PvOvHdrUnprotected {
            cuph_nonce: nonce,
            cuph_owner_pubkey: pubkey,
        })
    }
}

impl Message for ProveOvHdr {
    const MSG_TYPE: Msgtype = 61;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        let sign = CoseSign1::from_tagged_slice(buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode TO2.ProveOvHdr");

            Error::new(ErrorKind::Decode, "the TO2.ProveOvHdr")
        })?;

        if sign.payload.is_none() {
            return Err(Error::new(
                ErrorKind::Invalid,
                "the TO2.ProveOvHdr payload is missing",
            ));
        }

        Ok(Self { sign })
    }

    fn encode<W>(&self, write: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        self.sign
            .clone()
            .to_tagged_vec()
            .map_err(|err| {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %err, "couldn't encode TO2.ProveOvHdr");

                Error::new(ErrorKind::Encode, "the TO2.ProveOvHdr")
            })
            .and_then(|buf| {
                write.write_all(&buf).map_err(|err| {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %err, "couldn't write TO2.ProveOvHdr");

                    Error::new(ErrorKind::Write, "the TO2.ProveOvHdr")
                })
            })
    }
}

/// ```cddl
/// TO2ProveOVHdrPayload = [
///     bstr .cbor OVHeader,     ;; Ownership Voucher header
///     NumOVEntries, ;; number of ownership voucher entries
///     HMac,         ;; Ownership Voucher "hmac" of hdr
///     NonceTO2ProveOV, ;; nonce from TO2.HelloDevice
///     eBSigInfo,    ;; Device attestation signature info
///     xAKeyExchange ;; Key exchange first step
/// ]
/// NumOVEntries = uint8
/// $COSEPayloads /= (
///     TO2ProveOVHdrPayload
/// )
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PvOvHdrPayload<'a> {
    /// Ownership Voucher header
    pub ov_header: CborBstr<'a, OvHeader<'a>>,
    /// Number of ownership voucher entries
    pub num_ov_entries: u8,
    /// Ownership Voucher "hmac" of hdr
    pub hmac: HMac<'a>,
    /// nonce from TO2.HelloDevice
    pub nonce_to2_prove_ov: NonceTo2ProveOv,
    /// Device attestation signature info
    pub e_b_sig_info: EBSigInfo<'a>,
    /// Key exchange first step
    pub x_a_key_exchange: XAKeyExchange<'a>,
}

impl Serialize for PvOvHdrPayload<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            ov_header,
            num_ov_entries,
            hmac,
            nonce_to2_prove_ov,
            e_b_sig_info,
            x_a_key_exchange,
        } = self;

        (
            ov_header,
            num_ov_entries,
            hmac,
            nonce_to2_prove_ov,
            e_b_sig_info,
            x_a_key_exchange,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PvOvHdrPayload<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (ov_header, num_ov_entries, hmac, nonce_to2_prove_ov, e_b_sig_info, x_a_key_exchange) =
            Deserialize::deserialize(deserializer)?;

        Ok(Self {
            ov_header,
            num_ov_entries,
            hmac,
            nonce_to2_prove_ov,
            e_b_sig_info,
            x_a_key_exchange,
        })
    }
}

/// ```cddl
/// TO2ProveOVHdrUnprotectedHeaders = (
///     CUPHNonce:       NonceTO2ProveDv, ;; nonce is used below in TO2.ProveDevice and TO2.Done
///     CUPHOwnerPubKey: PublicKey ;; Owner key, as convenience to Device
/// )
/// $$COSEUnprotectedHeaders /= (
///     TO2ProveOVHdrUnprotectedHeaders
/// )
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PvOvHdrUnprotected<'a> {
    pub(crate) cuph_nonce: NonceTo2ProveDv,
    pub(crate) cuph_owner_pubkey: PublicKey<'a>,
}

impl<'a> PvOvHdrUnprotected<'a> {
    /// Creates the unprotected header values.
    pub fn new(cuph_nonce: NonceTo2ProveDv, cuph_owner_pubkey: PublicKey<'a>) -> Self {
        Self {
            cuph_nonce,
            cuph_owner_pubkey,
        }
    }

    /// Public key
    pub fn pubkey(&self) -> &PublicKey<'a> {
        &self.cuph_owner_pubkey
    }

    /// Nonce
    pub fn nonce(&self) -> NonceTo2ProveDv {
        self.cuph_nonce
    }

    /// Builds the Cose unprotected header carrying the CUPH values.
    pub fn to_header(&self) -> Result<coset::Header, Error> {
        let pubkey = ciborium::Value::serialized(&self.cuph_owner_pubkey).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode TO2.ProveOvHdr owner public key header");

            Error::new(
                ErrorKind::Encode,
                "the TO2.ProveOvHdr header owner public key",
            )
        })?;

        let nonce = ciborium::Value::serialized(&self.cuph_nonce).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode TO2.ProveOvHdr nonce header");

            Error::new(ErrorKind::Encode, "the TO2.ProveOvHdr nonce header")
        })?;

        Ok(HeaderBuilder::new()
            .value(HeaderParameter::CuphOwnerPubKey.to_i64(), pubkey)
            .value(HeaderParameter::CuphNonce.to_i64(), nonce)
            .build())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use coset::CoseSign1Builder;
    use pretty_assertions::assert_eq;

    use crate::v100::hash_hmac::tests::create_hmac;
    use crate::v100::key_exchange::{EcdhParams, XBKeyExchange};
    use crate::v100::ownership_voucher::tests::{create_ov_header, ecc_signature};
    use crate::v100::public_key::tests::{create_pub_key, ecc_p256_params};
    use crate::v100::sign_info::{DeviceSgType, SigInfo};
    use crate::v100::tests::create_nonce;

    use super::*;

    pub(crate) fn create_prove_ov_hdr(
        hdr: &PvOvHdrUnprotected,
        payload: &PvOvHdrPayload,
    ) -> ProveOvHdr {
        let mut buf = Vec::new();

        ciborium::into_writer(payload, &mut buf).unwrap();

        let sign = CoseSign1Builder::new()
            .unprotected(hdr.to_header().unwrap())
            .protected(
                HeaderBuilder::new()
                    .algorithm(coset::iana::Algorithm::ES256)
                    .build(),
            )
            .payload(buf)
            .signature(ecc_signature())
            .build();

        ProveOvHdr { sign }
    }

    pub(crate) fn create_pv_ov_hdr_payload() -> PvOvHdrPayload<'static> {
        let (x, y) = ecc_p256_params();

        let params = EcdhParams::with_p256(&x, &y, &[0xde, 0xad, 0xbe, 0xef]);

        let value = XBKeyExchange::create(params).unwrap();
        let value = XAKeyExchange(value.0);

        PvOvHdrPayload {
            ov_header: CborBstr::new(create_ov_header()),
            num_ov_entries: 2,
            hmac: create_hmac(),
            nonce_to2_prove_ov: NonceTo2ProveOv(create_nonce()),
            e_b_sig_info: EBSigInfo(SigInfo::new(DeviceSgType::StSecP256R1)),
            x_a_key_exchange: value,
        }
    }

    pub(crate) fn create_pv_ov_hdr_unprotected() -> PvOvHdrUnprotected<'static> {
        PvOvHdrUnprotected::new(NonceTo2ProveDv(create_nonce()), create_pub_key())
    }

    #[test]
    fn prove_ov_hdr_roundtrip() {
        let hdr = create_pv_ov_hdr_unprotected();
        let payload = create_pv_ov_hdr_payload();
        let info = create_prove_ov_hdr(&hdr, &payload);

        let mut buf = Vec::new();

        info.encode(&mut buf).unwrap();

        let mut res = ProveOvHdr::decode(&buf).unwrap();
        res.sign.protected.original_data.take();

        assert_eq!(res, info);
    }

    #[test]
    fn prove_ov_hdr_methods() {
        let hdr = create_pv_ov_hdr_unprotected();
        let payload = create_pv_ov_hdr_payload();
        let info = create_prove_ov_hdr(&hdr, &payload);

        assert_eq!(*info.sign(), info.sign);

        let res = info.payload().unwrap();

        payload.ov_header.bytes().unwrap();
        assert_eq!(res, payload);

        let res = info.header().unwrap();

        assert_eq!(res, hdr);
    }

    #[test]
    fn prove_ov_hdr_missing_payload() {
        let hdr = create_pv_ov_hdr_unprotected();

        let sign = CoseSign1Builder::new()
            .unprotected(hdr.to_header().unwrap())
            .signature(ecc_signature())
            .build();

        let info = ProveOvHdr { sign };

        let mut buf = Vec::new();
        info.encode(&mut buf).unwrap();

        let err = ProveOvHdr::decode(&buf).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);

        let err = info.payload().unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn prove_ov_hdr_missing_header() {
        let payload = create_pv_ov_hdr_payload();

        let mut buf = Vec::new();
        ciborium::into_writer(&payload, &mut buf).unwrap();

        let sign = CoseSign1Builder::new()
            .payload(buf)
            .signature(ecc_signature())
            .build();

        let info = ProveOvHdr { sign };

        let err = info.header().unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn prove_ov_hdr_unprotected_methods() {
        let hdr = create_pv_ov_hdr_unprotected();

        assert_eq!(*hdr.pubkey(), hdr.cuph_owner_pubkey);
        assert_eq!(hdr.nonce(), hdr.cuph_nonce);
    }
}
