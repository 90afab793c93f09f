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

//! Ownership voucher hash chain.
//!
//! Each entry extends the chain of ownership with a signature by the current
//! owner over the hash of the previous entry, the hash of the header identity
//! and the next owner public key. [`ChainWalk`] re-checks the chain one entry
//! at a time, so TO0 can verify a whole voucher and the TO2 device can verify
//! entries as they arrive.

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::utils::CborBstr;
use astarte_fdo_protocol::v100::hash_hmac::HMac;
use astarte_fdo_protocol::v100::ownership_voucher::{
    OvEntry, OvEntryPayload, OvHeader, OwnershipVoucher,
};
use astarte_fdo_protocol::v100::public_key::PublicKey;
use astarte_fdo_protocol::Error;
use coset::{CoseSign1Builder, HeaderBuilder};
use tracing::{error, warn};

use crate::crypto::{hash_for_key, same_subject_key, verify_cose_signature, Crypto, KeyPair};

/// Entries past this count still verify, the chain is only unusually long.
pub(crate) const ENTRIES_SOFT_CAP: usize = 10;

/// Extends the voucher with a new entry handing ownership to `next_owner`.
///
/// The entry is signed by `owner`, the key the last entry (or the header)
/// hands ownership to. The hashes use the algorithm matching the next owner
/// key size.
pub fn extend<C>(
    crypto: &C,
    voucher: &mut OwnershipVoucher<'_>,
    owner: &KeyPair,
    next_owner: &PublicKey<'_>,
) -> Result<(), Error>
where
    C: Crypto,
{
    if voucher.num_entries() >= ENTRIES_SOFT_CAP {
        warn!(
            entries = voucher.num_entries(),
            "ownership voucher chain is unusually long"
        );
    }

    let hdr_info = hdr_info_bytes(voucher.header());
    let prev_bytes = prev_entry_bytes(voucher)?;

    let hashtype = hash_for_key(next_owner);

    let prev = crypto.hash(hashtype, &prev_bytes)?;
    let hdr = crypto.hash(hashtype, &hdr_info)?;

    let payload = OvEntryPayload::new(prev, hdr, next_owner.clone().into_owned());

    let mut payload_buf = Vec::new();
    ciborium::into_writer(&payload, &mut payload_buf).map_err(|err| {
        error!(error = %err, "couldn't encode ov entry payload");

        Error::new(ErrorKind::Encode, "ov entry payload")
    })?;

    let protected = HeaderBuilder::new()
        .algorithm(owner.cose_algorithm())
        .build();

    let sign = CoseSign1Builder::new()
        .protected(protected)
        .payload(payload_buf)
        .try_create_signature(&[], |bytes| owner.sign(bytes))?
        .build();

    voucher.push_entry(OvEntry::new(sign));

    Ok(())
}

/// Verifies the whole chain of a voucher.
///
/// Checks the device certificate chain hash when both are present, then walks
/// every entry. Returns the key of the current owner.
pub fn verify<C>(
    crypto: &C,
    voucher: &OwnershipVoucher<'_>,
) -> Result<PublicKey<'static>, Error>
where
    C: Crypto,
{
    if let (Some(chain), Some(expected)) = (
        voucher.dev_cert_chain(),
        voucher.header().ov_dev_cert_chain_hash.as_ref(),
    ) {
        let mut buf = Vec::new();
        ciborium::into_writer(chain, &mut buf).map_err(|err| {
            error!(error = %err, "couldn't encode device cert chain");

            Error::new(ErrorKind::Encode, "device cert chain")
        })?;

        crypto.verify_hash(expected, &buf)?;
    }

    let mut walk = ChainWalk::begin(voucher.header_tag(), voucher.header_hmac())?;

    for entry in voucher.entries() {
        walk.step(crypto, entry)?;
    }

    Ok(walk.into_owner_key())
}

/// Incremental verification of a voucher chain.
///
/// Starts from the header and consumes one entry per [`ChainWalk::step`],
/// tracking the owner key each entry hands ownership to.
#[derive(Debug)]
pub(crate) struct ChainWalk {
    hdr_info: Vec<u8>,
    prev: Vec<u8>,
    key: PublicKey<'static>,
}

impl ChainWalk {
    /// Starts a walk from the voucher header and its HMAC.
    pub(crate) fn begin(
        header_tag: &CborBstr<'_, OvHeader<'_>>,
        hmac: &HMac<'_>,
    ) -> Result<Self, Error> {
        let header: &OvHeader<'_> = header_tag;

        let hdr_info = hdr_info_bytes(header);

        // the first entry hashes the header bytes followed by the hmac
        let mut prev = header_tag.bytes()?.to_vec();
        ciborium::into_writer(hmac, &mut prev).map_err(|err| {
            error!(error = %err, "couldn't encode header hmac");

            Error::new(ErrorKind::Encode, "ov header hmac")
        })?;

        let key = header.ov_pub_key.clone().into_owned();

        Ok(Self {
            hdr_info,
            prev,
            key,
        })
    }

    /// Checks one entry and advances the walk to the owner it names.
    pub(crate) fn step<C>(&mut self, crypto: &C, entry: &OvEntry) -> Result<(), Error>
    where
        C: Crypto,
    {
        verify_cose_signature(&self.key, entry.sign())?;

        let (_, payload) = entry.clone().payload()?;

        crypto.verify_hash(payload.hdr(), &self.hdr_info)?;
        crypto.verify_hash(payload.prev(), &self.prev)?;

        // the whole entry encoding seeds the next prev hash
        self.prev = encode_entry(entry)?;
        self.key = payload.take_pubkey().into_owned();

        Ok(())
    }

    /// Key of the owner the walk has reached.
    pub(crate) fn owner_key(&self) -> &PublicKey<'static> {
        &self.key
    }

    /// Ends the walk, checking the final owner is the key that proved the
    /// header.
    ///
    /// The keys are compared by their decoded key material.
    pub(crate) fn finish(self, prover: &PublicKey<'_>) -> Result<PublicKey<'static>, Error> {
        let own = self.key.key().ok_or(Error::new(
            ErrorKind::Unsupported,
            "public key encoding without key bytes",
        ))?;

        let other = prover.key().ok_or(Error::new(
            ErrorKind::Unsupported,
            "public key encoding without key bytes",
        ))?;

        if !same_subject_key(own, other)? {
            return Err(Error::new(
                ErrorKind::Invalid,
                "owner key doesn't match the prover",
            ));
        }

        Ok(self.key)
    }

    pub(crate) fn into_owner_key(self) -> PublicKey<'static> {
        self.key
    }
}

/// Identity of the header, guid followed by the device info.
fn hdr_info_bytes(header: &OvHeader<'_>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + header.ov_device_info.len());

    buf.extend_from_slice(header.ov_guid.as_slice());
    buf.extend_from_slice(header.ov_device_info.as_bytes());

    buf
}

/// Bytes hashed into the `prev` of the next entry.
fn prev_entry_bytes(voucher: &OwnershipVoucher<'_>) -> Result<Vec<u8>, Error> {
    match voucher.entries().last() {
        Some(entry) => encode_entry(entry),
        None => {
            let mut buf = voucher.header_tag().bytes()?.to_vec();

            ciborium::into_writer(voucher.header_hmac(), &mut buf).map_err(|err| {
                error!(error = %err, "couldn't encode header hmac");

                Error::new(ErrorKind::Encode, "ov header hmac")
            })?;

            Ok(buf)
        }
    }
}

fn encode_entry(entry: &OvEntry) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();

    ciborium::into_writer(entry, &mut buf).map_err(|err| {
        error!(error = %err, "couldn't encode ov entry");

        Error::new(ErrorKind::Encode, "ov entry")
    })?;

    Ok(buf)
}

#[cfg(test)]
pub(crate) mod test {
    use std::borrow::Cow;
    use std::net::{IpAddr, Ipv4Addr};

    use astarte_fdo_protocol::utils::Repetition;
    use astarte_fdo_protocol::v100::hash_hmac::Hashtype;
    use astarte_fdo_protocol::v100::public_key::PkType;
    use astarte_fdo_protocol::v100::rendezvous_info::{RendezvousInfo, RendezvousInstr};
    use astarte_fdo_protocol::v100::{Guid, PROTOCOL_VERSION};
    use pretty_assertions::assert_eq;

    use crate::crypto::SoftwareCrypto;

    use super::*;

    pub(crate) fn rv_info() -> RendezvousInfo<'static> {
        let instr = RendezvousInstr::ip_address(IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();
        let directive = Repetition::new(vec![instr]).unwrap();

        Repetition::new(vec![directive]).unwrap()
    }

    pub(crate) fn build_voucher(
        crypto: &SoftwareCrypto,
        manufacturer: &KeyPair,
        secret: &[u8],
    ) -> OwnershipVoucher<'static> {
        let header = OvHeader {
            ovh_prot_ver: PROTOCOL_VERSION,
            ov_guid: Guid::new([7u8; 16]),
            ov_rv_info: rv_info(),
            ov_device_info: Cow::Borrowed("voucher-test-device"),
            ov_pub_key: manufacturer.public_key().unwrap(),
            ov_dev_cert_chain_hash: None,
        };

        let tag = CborBstr::new(header);

        let hmac = crypto
            .hmac(Hashtype::HmacSha256, secret, tag.bytes().unwrap())
            .unwrap();

        OwnershipVoucher::new(tag, hmac, None)
    }

    /// Voucher carrying a certificate chain for the device key, as DI
    /// creates them.
    pub(crate) fn chained_voucher(
        crypto: &SoftwareCrypto,
        manufacturer: &KeyPair,
        device: &KeyPair,
        secret: &[u8],
    ) -> OwnershipVoucher<'static> {
        let ca = crate::crypto::DeviceCa::new("voucher-test ca").unwrap();

        let csr = crypto.csr(device, "voucher-test-device").unwrap();
        let chain = ca.issue(&csr, "voucher-test-serial").unwrap();

        let mut buf = Vec::new();
        ciborium::into_writer(&chain, &mut buf).unwrap();
        let chain_hash = crypto.hash(Hashtype::Sha256, &buf).unwrap();

        let header = OvHeader {
            ovh_prot_ver: PROTOCOL_VERSION,
            ov_guid: Guid::new([7u8; 16]),
            ov_rv_info: rv_info(),
            ov_device_info: Cow::Borrowed("voucher-test-device"),
            ov_pub_key: manufacturer.public_key().unwrap(),
            ov_dev_cert_chain_hash: Some(chain_hash),
        };

        let tag = CborBstr::new(header);

        let hmac = crypto
            .hmac(Hashtype::HmacSha256, secret, tag.bytes().unwrap())
            .unwrap();

        OwnershipVoucher::new(tag, hmac, Some(chain))
    }

    #[test]
    fn verify_voucher_without_entries() {
        let crypto = SoftwareCrypto::new();
        let manufacturer = KeyPair::generate(PkType::Secp256R1).unwrap();

        let voucher = build_voucher(&crypto, &manufacturer, &[1u8; 32]);

        let owner = verify(&crypto, &voucher).unwrap();

        assert_eq!(owner, manufacturer.public_key().unwrap());
    }

    #[test]
    fn extend_and_verify_up_to_three_entries() {
        let crypto = SoftwareCrypto::new();
        let manufacturer = KeyPair::generate(PkType::Secp256R1).unwrap();

        let mut voucher = build_voucher(&crypto, &manufacturer, &[1u8; 32]);

        let owners = [
            KeyPair::generate(PkType::Secp256R1).unwrap(),
            KeyPair::generate(PkType::Secp256R1).unwrap(),
            KeyPair::generate(PkType::Secp256R1).unwrap(),
        ];

        let mut current = &manufacturer;

        for (i, next) in owners.iter().enumerate() {
            extend(
                &crypto,
                &mut voucher,
                current,
                &next.public_key().unwrap(),
            )
            .unwrap();

            assert_eq!(voucher.num_entries(), i + 1);

            let owner = verify(&crypto, &voucher).unwrap();
            assert_eq!(owner, next.public_key().unwrap());

            current = next;
        }
    }

    #[test]
    fn extend_to_a_p384_owner() {
        let crypto = SoftwareCrypto::new();
        let manufacturer = KeyPair::generate(PkType::Secp256R1).unwrap();
        let owner = KeyPair::generate(PkType::Secp384R1).unwrap();

        let mut voucher = build_voucher(&crypto, &manufacturer, &[1u8; 32]);

        extend(
            &crypto,
            &mut voucher,
            &manufacturer,
            &owner.public_key().unwrap(),
        )
        .unwrap();

        // hash follows the next owner key size
        let (_, payload) = voucher.entries()[0].clone().payload().unwrap();
        assert_eq!(payload.prev().hash_type(), Hashtype::Sha384);

        verify(&crypto, &voucher).unwrap();
    }

    #[test]
    fn tampered_entry_fails_verification() {
        let crypto = SoftwareCrypto::new();
        let manufacturer = KeyPair::generate(PkType::Secp256R1).unwrap();
        let owner = KeyPair::generate(PkType::Secp256R1).unwrap();

        let mut voucher = build_voucher(&crypto, &manufacturer, &[1u8; 32]);

        extend(
            &crypto,
            &mut voucher,
            &manufacturer,
            &owner.public_key().unwrap(),
        )
        .unwrap();

        let mut bytes = Vec::new();
        ciborium::into_writer(&voucher, &mut bytes).unwrap();

        // the buffer ends with the signature of the last entry
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;

        let tampered: OwnershipVoucher = ciborium::from_reader(bytes.as_slice()).unwrap();

        verify(&crypto, &tampered).unwrap_err();
    }

    #[test]
    fn wrong_signer_fails_verification() {
        let crypto = SoftwareCrypto::new();
        let manufacturer = KeyPair::generate(PkType::Secp256R1).unwrap();
        let owner = KeyPair::generate(PkType::Secp256R1).unwrap();
        let impostor = KeyPair::generate(PkType::Secp256R1).unwrap();

        let mut voucher = build_voucher(&crypto, &manufacturer, &[1u8; 32]);

        // signed by a key the header never handed ownership to
        extend(
            &crypto,
            &mut voucher,
            &impostor,
            &owner.public_key().unwrap(),
        )
        .unwrap();

        verify(&crypto, &voucher).unwrap_err();
    }

    #[test]
    fn mutated_header_fails_the_hmac() {
        let crypto = SoftwareCrypto::new();
        let manufacturer = KeyPair::generate(PkType::Secp256R1).unwrap();
        let secret = [1u8; 32];

        let voucher = build_voucher(&crypto, &manufacturer, &secret);

        crypto
            .verify_hmac(
                voucher.header_hmac(),
                &secret,
                voucher.header_tag().bytes().unwrap(),
            )
            .unwrap();

        let mutated = OvHeader {
            ov_device_info: Cow::Borrowed("another-device"),
            ..voucher.header().clone()
        };
        let mutated = CborBstr::new(mutated);

        crypto
            .verify_hmac(voucher.header_hmac(), &secret, mutated.bytes().unwrap())
            .unwrap_err();
    }

    #[test]
    fn finish_compares_with_the_prover_key() {
        let crypto = SoftwareCrypto::new();
        let manufacturer = KeyPair::generate(PkType::Secp256R1).unwrap();
        let owner = KeyPair::generate(PkType::Secp256R1).unwrap();

        let mut voucher = build_voucher(&crypto, &manufacturer, &[1u8; 32]);

        extend(
            &crypto,
            &mut voucher,
            &manufacturer,
            &owner.public_key().unwrap(),
        )
        .unwrap();

        let mut walk = ChainWalk::begin(voucher.header_tag(), voucher.header_hmac()).unwrap();
        for entry in voucher.entries() {
            walk.step(&crypto, entry).unwrap();
        }

        let err = walk.finish(&manufacturer.public_key().unwrap()).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Invalid);

        let mut walk = ChainWalk::begin(voucher.header_tag(), voucher.header_hmac()).unwrap();
        for entry in voucher.entries() {
            walk.step(&crypto, entry).unwrap();
        }

        walk.finish(&owner.public_key().unwrap()).unwrap();
    }
}
