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

//! The Ownership Voucher is a structured digital document that links the Manufacturer with the
//! Owner.
//!
//! It is formed as a chain of signed public keys, each signature of a public key authorizing the
//! possessor of the corresponding private key to take ownership of the Device or pass ownership
//! through another link in the chain.

use std::borrow::Cow;

use coset::{AsCborValue, CoseSign1};
use serde::{Deserialize, Serialize};
use serde_bytes::Bytes;

use crate::error::ErrorKind;
use crate::utils::CborBstr;
use crate::Error;

use super::hash_hmac::{HMac, Hash};
use super::public_key::PublicKey;
use super::rendezvous_info::RendezvousInfo;
use super::x509::CoseX509;
use super::{Guid, Protver};

/// Ownership Voucher top level structure
///
/// ```cddl
/// OwnershipVoucher = [
///     OVHeaderTag:    bstr .cbor OVHeader,
///     OVHeaderHMac:   HMac,              ;; hmac[DCHmacSecret, OVHeader]
///     OVDevCertChain: OVDevCertChainOrNull,
///     OVEntryArray:   OVEntries
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OwnershipVoucher<'a> {
    ov_header_tag: CborBstr<'a, OvHeader<'a>>,
    ov_header_hmac: HMac<'a>,
    ov_dev_cert_chain: OvDevCertChainOrNull<'a>,
    pub(crate) ov_entry_array: OvEntries,
}

impl<'a> OwnershipVoucher<'a> {
    /// Create a voucher without entries, as the Manufacturer emits it.
    pub fn new(
        ov_header_tag: CborBstr<'a, OvHeader<'a>>,
        ov_header_hmac: HMac<'a>,
        ov_dev_cert_chain: OvDevCertChainOrNull<'a>,
    ) -> Self {
        Self {
            ov_header_tag,
            ov_header_hmac,
            ov_dev_cert_chain,
            ov_entry_array: Vec::new(),
        }
    }

    /// Return the voucher header.
    pub fn header(&self) -> &OvHeader<'a> {
        &self.ov_header_tag
    }

    /// Return the header along with the bytes it was decoded from.
    pub fn header_tag(&self) -> &CborBstr<'a, OvHeader<'a>> {
        &self.ov_header_tag
    }

    /// Return the HMAC the Device calculated over the header.
    pub fn header_hmac(&self) -> &HMac<'a> {
        &self.ov_header_hmac
    }

    /// Return the Device certificate chain.
    pub fn dev_cert_chain(&self) -> Option<&CoseX509<'a>> {
        self.ov_dev_cert_chain.as_ref()
    }

    /// Return the entries extending the voucher to the current owner.
    pub fn entries(&self) -> &[OvEntry] {
        &self.ov_entry_array
    }

    /// Return the number of entries.
    pub fn num_entries(&self) -> usize {
        self.ov_entry_array.len()
    }

    /// Append an entry signed over the previous one.
    pub fn push_entry(&mut self, entry: OvEntry) {
        self.ov_entry_array.push(entry);
    }
}

impl Serialize for OwnershipVoucher<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            ov_header_tag,
            ov_header_hmac,
            ov_dev_cert_chain,
            ov_entry_array,
        } = self;

        (
            ov_header_tag,
            ov_header_hmac,
            ov_dev_cert_chain,
            ov_entry_array,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OwnershipVoucher<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (ov_header_tag, ov_header_hmac, ov_dev_cert_chain, ov_entry_array) =
            Deserialize::deserialize(deserializer)?;

        Ok(Self {
            ov_header_tag,
            ov_header_hmac,
            ov_dev_cert_chain,
            ov_entry_array,
        })
    }
}

/// ```cddl
/// ;; Ownership Voucher header, also used in TO1 protocol
/// OVHeader = [
///     OVHProtVer:        protver,        ;; protocol version
///     OVGuid:            Guid,           ;; guid
///     OVRVInfo:          RendezvousInfo, ;; rendezvous instructions
///     OVDeviceInfo:      tstr,           ;; DeviceInfo
///     OVPubKey:          PublicKey,      ;; mfg public key
///     OVDevCertChainHash:OVDevCertChainHashOrNull
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OvHeader<'a> {
    /// Protocol version
    pub ovh_prot_ver: Protver,
    /// Device GUID
    pub ov_guid: Guid,
    /// RendezvousInfo for the RVServer
    pub ov_rv_info: RendezvousInfo<'a>,
    /// Device info
    pub ov_device_info: Cow<'a, str>,
    /// Manufacturing public key
    pub ov_pub_key: PublicKey<'a>,
    /// Device certificate chain
    pub ov_dev_cert_chain_hash: OvDevCertChainHashOrNull<'a>,
}

impl Serialize for OvHeader<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            ovh_prot_ver,
            ov_guid,
            ov_rv_info,
            ov_device_info,
            ov_pub_key,
            ov_dev_cert_chain_hash,
        } = self;

        (
            ovh_prot_ver,
            ov_guid,
            ov_rv_info,
            ov_device_info,
            ov_pub_key,
            ov_dev_cert_chain_hash,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OvHeader<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (ovh_prot_ver, ov_guid, ov_rv_info, ov_device_info, ov_pub_key, ov_dev_cert_chain_hash) =
            Deserialize::deserialize(deserializer)?;

        Ok(Self {
            ovh_prot_ver,
            ov_guid,
            ov_rv_info,
            ov_device_info,
            ov_pub_key,
            ov_dev_cert_chain_hash,
        })
    }
}

/// ```cddl
/// ;; Hash of Device certificate chain
/// ;; use null for Intel® EPID
/// OVDevCertChainHashOrNull = Hash / null       ;; CBOR null for Intel® EPID device key
/// ```
pub type OvDevCertChainHashOrNull<'a> = Option<Hash<'a>>;

/// ```cddl
/// ;; Device certificate chain
/// ;; use null for Intel® EPID.
/// OVDevCertChainOrNull     = X5CHAIN / null  ;; CBOR null for Intel® EPID device key
/// ```
pub type OvDevCertChainOrNull<'a> = Option<CoseX509<'a>>;

/// ```cddl
/// ;; Ownership voucher entries array
/// OVEntries = [ * OVEntry ]
/// ```
pub type OvEntries = Vec<OvEntry>;

/// ```cddl
/// ;; ...each entry is a COSE Sign1 object with a payload
/// OVEntry = CoseSignature
/// $COSEProtectedHeaders //= (
///     1: OVSignType
/// )
/// $COSEPayloads /= (
///    OVEntryPayload
/// )
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OvEntry {
    pub(crate) entry: CoseSign1,
}

const SIGN_TAG: u64 = coset::iana::CborTag::CoseSign1 as u64;

impl OvEntry {
    /// Create the entry from a signed COSE object.
    pub fn new(entry: CoseSign1) -> Self {
        Self { entry }
    }

    /// Returns the Cose sign
    pub fn sign(&self) -> &CoseSign1 {
        &self.entry
    }

    /// Return the [CoseSign1] payload decode for this entry.
    pub fn payload(self) -> Result<(Vec<u8>, OvEntryPayload<'static>), Error> {
        let payload = self
            .entry
            .payload
            .ok_or(Error::new(ErrorKind::Invalid, "OVEntry payload is missing"))?;

        let value: OvEntryPayload<'static> =
            ciborium::from_reader(payload.as_slice()).map_err(|err| {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %err, "couldn't decode OvEntryPayload");

                Error::new(ErrorKind::Decode, "the OVEntry payload")
            })?;

        Ok((payload, value))
    }
}

impl Serialize for OvEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let value = self
            .entry
            .clone()
            .to_cbor_value()
            .map_err(serde::ser::Error::custom)?;

        ciborium::tag::Required::<_, SIGN_TAG>(value).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OvEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value =
            ciborium::tag::Accepted::<ciborium::Value, SIGN_TAG>::deserialize(deserializer)?;

        CoseSign1::from_cbor_value(value.0)
            .map(|entry| Self { entry })
            .map_err(serde::de::Error::custom)
    }
}

/// ```cddl
/// ;; ... each payload contains the hash of the previous entry
/// ;; and the signature of the public key to verify the next signature
/// ;; (or the Owner, in the last entry).
/// OVEntryPayload = [
///     OVEHashPrevEntry: Hash,
///     OVEHashHdrInfo:   Hash,  ;; hash[GUID||DeviceInfo] in header
///     OVEExtra:         null / bstr .cbor OVEExtraInfo
///     OVEPubKey:        PublicKey
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct OvEntryPayload<'a> {
    pub(crate) ov_e_hash_prev_entry: Hash<'a>,
    pub(crate) ov_e_hash_hdr_info: Hash<'a>,
    pub(crate) ov_e_extra: Option<CborBstr<'a, OvExtraInfo<'a>>>,
    pub(crate) ov_e_pubkey: PublicKey<'a>,
}

impl<'a> OvEntryPayload<'a> {
    /// Create a payload without extra info, linking the previous entry to the next key.
    pub fn new(prev: Hash<'a>, hdr: Hash<'a>, pubkey: PublicKey<'a>) -> Self {
        Self {
            ov_e_hash_prev_entry: prev,
            ov_e_hash_hdr_info: hdr,
            ov_e_extra: None,
            ov_e_pubkey: pubkey,
        }
    }

    /// Returns the previous entry hash
    pub fn prev(&self) -> &Hash<'a> {
        &self.ov_e_hash_prev_entry
    }

    /// Returns the hrd entry hash.
    ///
    /// hash[GUID||DeviceInfo] in header
    pub fn hdr(&self) -> &Hash<'a> {
        &self.ov_e_hash_hdr_info
    }

    /// Returns the ov entry public key
    pub fn pubkey(&self) -> &PublicKey<'a> {
        &self.ov_e_pubkey
    }

    /// Returns the ov entry public key
    pub fn take_pubkey(self) -> PublicKey<'a> {
        self.ov_e_pubkey
    }
}

impl Serialize for OvEntryPayload<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            ov_e_hash_prev_entry,
            ov_e_hash_hdr_info,
            ov_e_extra,
            ov_e_pubkey,
        } = self;

        (
            ov_e_hash_prev_entry,
            ov_e_hash_hdr_info,
            ov_e_extra,
            ov_e_pubkey,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OvEntryPayload<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (ov_e_hash_prev_entry, ov_e_hash_hdr_info, ov_e_extra, ov_e_pubkey) =
            Deserialize::deserialize(deserializer)?;

        Ok(Self {
            ov_e_hash_prev_entry,
            ov_e_hash_hdr_info,
            ov_e_extra,
            ov_e_pubkey,
        })
    }
}

/// ```cddl
/// OVEExtraInfo = { * OVEExtraInfoType: bstr }
/// OVEExtraInfoType = int
///
/// ;;OVSignType = Supporting COSE signature type
/// ```
pub type OvExtraInfo<'a> = rustc_hash::FxHashMap<i64, Cow<'a, Bytes>>;

#[cfg(test)]
pub(crate) mod tests {
    use coset::{CoseSign1Builder, HeaderBuilder};
    use pretty_assertions::assert_eq;

    use crate::utils::Hex;
    use crate::v100::hash_hmac::tests::{create_hash, create_hmac};
    use crate::v100::public_key::tests::create_pub_key;
    use crate::v100::rendezvous_info::tests::create_rv_info;
    use crate::v100::tests::{create_guid, from_hex};
    use crate::v100::x509::tests::create_cose_x509;
    use crate::v100::PROTOCOL_VERSION;

    use super::*;

    pub(crate) fn ecc_signature() -> Vec<u8> {
        // Not a valid signature
        from_hex(
            "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f202122232425262728292a2b2c2d2e2f303132333435363738393a3b3c3d3e3f",
        )
    }

    pub(crate) fn create_ov_header() -> OvHeader<'static> {
        OvHeader {
            ovh_prot_ver: PROTOCOL_VERSION,
            ov_guid: create_guid(),
            ov_rv_info: create_rv_info(),
            ov_device_info: "fdo-astarte".into(),
            ov_pub_key: create_pub_key(),
            ov_dev_cert_chain_hash: Some(create_hash()),
        }
    }

    pub(crate) fn create_ov_entry(payload: &OvEntryPayload) -> OvEntry {
        let mut buf = Vec::new();
        ciborium::into_writer(&payload, &mut buf).unwrap();

        let entry = CoseSign1Builder::new()
            .protected(
                HeaderBuilder::new()
                    .algorithm(coset::iana::Algorithm::ES256)
                    .build(),
            )
            .payload(buf)
            .signature(ecc_signature())
            .build();

        OvEntry { entry }
    }

    pub(crate) fn create_ov_entry_payload() -> OvEntryPayload<'static> {
        OvEntryPayload {
            ov_e_hash_prev_entry: Hash::with_sha256(Cow::Owned(
                from_hex("9be58b34344cfaab4b798288b7adedbbe451a2cf7cacf9b0d2aecef26cc0e1d1").into(),
            ))
            .unwrap(),
            ov_e_hash_hdr_info: Hash::with_sha256(Cow::Owned(
                from_hex("3443c6b88aeb31f50eceb9d8acf0591fb757dcf6e50b23b75d0fb9c00fba2d65").into(),
            ))
            .unwrap(),
            ov_e_extra: Some(CborBstr::new(Default::default())),
            ov_e_pubkey: create_pub_key(),
        }
    }

    pub(crate) fn create_voucher() -> OwnershipVoucher<'static> {
        let mut voucher = OwnershipVoucher::new(
            CborBstr::new(create_ov_header()),
            create_hmac(),
            Some(create_cose_x509()),
        );

        voucher.push_entry(create_ov_entry(&create_ov_entry_payload()));

        voucher
    }

    #[test]
    fn ownership_voucher_roundtrip() {
        let case = create_voucher();

        let mut buf = Vec::new();
        ciborium::into_writer(&case, &mut buf).unwrap();

        let mut res: OwnershipVoucher = ciborium::from_reader(buf.as_slice()).unwrap();

        // For the diff
        res.ov_entry_array[0].entry.protected.original_data = None;

        assert_eq!(res, case);
    }

    #[test]
    fn ownership_voucher_getters() {
        let case = create_voucher();

        assert_eq!(*case.header(), create_ov_header());
        assert_eq!(*case.header_tag(), CborBstr::new(create_ov_header()));
        assert_eq!(*case.header_hmac(), create_hmac());
        assert_eq!(case.dev_cert_chain(), Some(&create_cose_x509()));
        assert_eq!(case.num_entries(), 1);
        assert_eq!(
            case.entries(),
            &[create_ov_entry(&create_ov_entry_payload())]
        );
    }

    #[test]
    fn ov_header_roundtrip() {
        let case = create_ov_header();

        let mut buf = Vec::new();
        ciborium::into_writer(&case, &mut buf).unwrap();

        let res: OvHeader = ciborium::from_reader(buf.as_slice()).unwrap();

        assert_eq!(res, case);

        insta::assert_snapshot!(
            Hex::new(&buf),
            @"8618645043bc9e0f731a4e7f947c5d03b0c1e4838181820245447f0000016b66646f2d61737461727465830d01585b3059301306072a8648ce3d020106082a8648ce3d030107034200046b17d1f2e12c4247f8bce6e563a440f277037d812deb33a0f4a13945d898c2964fe342e2fe1a7f9b8ee7eb4a7c0f9e162bce33576b315ececbb6406837bf51f5820858207424985ee56213b1b0f3699408ac88eae810e6e25596213fc62f1301f96b7d80"
        );
    }

    #[test]
    fn ov_entry_roundtrip() {
        let payload = create_ov_entry_payload();
        let case = create_ov_entry(&payload);

        let mut buf = Vec::new();
        ciborium::into_writer(&case, &mut buf).unwrap();

        let mut res: OvEntry = ciborium::from_reader(buf.as_slice()).unwrap();

        // For the diff
        res.entry.protected.original_data = None;

        assert_eq!(res, case);
    }

    #[test]
    fn ov_entry_payload() {
        let payload = create_ov_entry_payload();
        let case = create_ov_entry(&payload);

        let (_, value) = case.payload().unwrap();

        assert_eq!(value, payload);
    }

    #[test]
    fn ov_entry_sign() {
        let payload = create_ov_entry_payload();
        let case = create_ov_entry(&payload);

        let value = case.sign();

        assert_eq!(*value, case.entry);
    }

    #[test]
    fn ov_entry_payload_roundtrip() {
        let case = create_ov_entry_payload();

        let mut buf = Vec::new();
        ciborium::into_writer(&case, &mut buf).unwrap();

        let res: OvEntryPayload = ciborium::from_reader(buf.as_slice()).unwrap();

        assert_eq!(res, case);

        insta::assert_snapshot!(
            Hex::new(&buf),
            @"84820858209be58b34344cfaab4b798288b7adedbbe451a2cf7cacf9b0d2aecef26cc0e1d1820858203443c6b88aeb31f50eceb9d8acf0591fb757dcf6e50b23b75d0fb9c00fba2d6541a0830d01585b3059301306072a8648ce3d020106082a8648ce3d030107034200046b17d1f2e12c4247f8bce6e563a440f277037d812deb33a0f4a13945d898c2964fe342e2fe1a7f9b8ee7eb4a7c0f9e162bce33576b315ececbb6406837bf51f5"
        );
    }

    #[test]
    fn ov_entry_payload_getters() {
        let case = create_ov_entry_payload();

        assert_eq!(*case.prev(), case.ov_e_hash_prev_entry);
        assert_eq!(*case.hdr(), case.ov_e_hash_hdr_info);
        assert_eq!(*case.pubkey(), case.ov_e_pubkey);
        assert_eq!(case.clone().take_pubkey(), case.ov_e_pubkey);
    }
}
