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

//! Cryptographic operations for the protocols.
//!
//! The [`Crypto`] trait gathers everything an engine needs from the platform:
//! randomness, digests, signatures, the TO2 key exchange and the session key
//! derivation. [`SoftwareCrypto`] implements it on top of [`aws_lc_rs`].

use std::borrow::Cow;

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::v100::cipher::CipherSuiteNames;
use astarte_fdo_protocol::v100::eat_signature::{EaToken, EatPayload};
use astarte_fdo_protocol::v100::hash_hmac::{HMac, Hash, Hashtype};
use astarte_fdo_protocol::v100::key_exchange::{
    EcdhParams, KexSuitNames, XAKeyExchange, XBKeyExchange,
};
use astarte_fdo_protocol::v100::public_key::{PkEnc, PkType, PublicKey};
use astarte_fdo_protocol::v100::sign_info::DeviceSgType;
use astarte_fdo_protocol::v100::Nonce;
use astarte_fdo_protocol::Error;
use aws_lc_rs::encoding::AsDer;
use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::KeyPair as _;
use aws_lc_rs::{agreement, signature};
use coset::{CoseSign1, CoseSign1Builder, HeaderBuilder};
use serde_bytes::ByteBuf;
use tracing::error;
use zeroize::Zeroizing;

mod cipher;
mod kdf;
mod software;
mod x5chain;

pub use self::cipher::EncryptionState;
pub use self::software::SoftwareCrypto;
pub(crate) use self::x5chain::{device_public_key, same_subject_key, DeviceCa};

/// Cryptographic provider for the protocol engines.
pub trait Crypto {
    /// Encoding of the public keys produced by this provider.
    const PK_ENC: PkEnc;

    /// Creates a random 16 bytes nonce.
    fn nonce16(&self) -> Result<Nonce, Error>;

    /// Fills the buffer with random bytes.
    fn random(&self, buf: &mut [u8]) -> Result<(), Error>;

    /// Computes a digest of the data.
    ///
    /// Errors with [`ErrorKind::Unsupported`] for the HMAC types.
    fn hash(&self, hashtype: Hashtype, data: &[u8]) -> Result<Hash<'static>, Error>;

    /// Computes the keyed HMAC of the data.
    ///
    /// Errors with [`ErrorKind::Unsupported`] for the plain hash types.
    fn hmac(&self, hashtype: Hashtype, secret: &[u8], data: &[u8]) -> Result<HMac<'static>, Error>;

    /// Re-computes the digest of the data and compares it in constant time.
    fn verify_hash(&self, hash: &Hash<'_>, data: &[u8]) -> Result<(), Error>;

    /// Re-computes the HMAC of the data and compares it in constant time.
    fn verify_hmac(&self, hmac: &HMac<'_>, secret: &[u8], data: &[u8]) -> Result<(), Error>;

    /// Signs the data with the key pair.
    ///
    /// ECDSA in the fixed `r || s` format, the algorithm follows the key size.
    fn sign(&self, key_pair: &KeyPair, data: &[u8]) -> Result<Vec<u8>, Error>;

    /// Verifies a raw signature over the data.
    ///
    /// Returns false on any failure, the caller cannot distinguish a bad key
    /// from a bad signature.
    fn verify(&self, key: &PublicKey<'_>, data: &[u8], signature: &[u8]) -> bool;

    /// Starts a key exchange for the given suite.
    fn kex_begin(&self, suite: KexSuitNames, party: KexParty) -> Result<KexState, Error>;

    /// Completes the key exchange with the peer parameters.
    ///
    /// Returns the shared secret `ShSe`, input of
    /// [`Crypto::derive_session_keys`].
    fn kex_finish(&self, state: KexState, peer: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error>;

    /// Derives the session keys and a fresh IV seed from the shared secret.
    fn derive_session_keys(
        &self,
        suite: CipherSuiteNames,
        sh_se: &[u8],
    ) -> Result<EncryptionState, Error>;

    /// Creates a PKCS#10 certification request for the key pair.
    ///
    /// The common name is set to the device info.
    fn csr(&self, key_pair: &KeyPair, device_info: &str) -> Result<Vec<u8>, Error>;
}

/// Party of the TO2 key exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KexParty {
    /// The Owner, sending `xAKeyExchange`.
    Owner,
    /// The Device, sending `xBKeyExchange`.
    Device,
}

/// In-flight key exchange, created by [`Crypto::kex_begin`].
///
/// The ephemeral secret is consumed by [`Crypto::kex_finish`], so a state
/// cannot complete the exchange twice.
pub struct KexState {
    suite: KexSuitNames,
    party: KexParty,
    secret: agreement::EphemeralPrivateKey,
    // SEC.1 uncompressed point of the ephemeral public key
    pub_point: Vec<u8>,
    random: Zeroizing<Vec<u8>>,
}

impl KexState {
    pub(crate) fn new(
        suite: KexSuitNames,
        party: KexParty,
        secret: agreement::EphemeralPrivateKey,
        pub_point: Vec<u8>,
        random: Zeroizing<Vec<u8>>,
    ) -> Self {
        Self {
            suite,
            party,
            secret,
            pub_point,
            random,
        }
    }

    /// Returns the suite the exchange was started with.
    pub fn suite(&self) -> KexSuitNames {
        self.suite
    }

    pub(crate) fn party(&self) -> KexParty {
        self.party
    }

    pub(crate) fn into_secret(self) -> (agreement::EphemeralPrivateKey, Zeroizing<Vec<u8>>) {
        (self.secret, self.random)
    }

    /// Returns the Owner parameters to send to the Device.
    pub fn xa(&self) -> Result<XAKeyExchange<'static>, Error> {
        debug_assert_eq!(self.party, KexParty::Owner);

        match self.suite {
            KexSuitNames::ECDH256 => {
                let (x, y) = parse_ecc_point::<32>(&self.pub_point)?;

                XAKeyExchange::create(EcdhParams::with_p256(x, y, &self.random))
            }
            KexSuitNames::ECDH384 => {
                let (x, y) = parse_ecc_point::<48>(&self.pub_point)?;

                XAKeyExchange::create(EcdhParams::with_p384(x, y, &self.random))
            }
            _ => Err(Error::new(ErrorKind::Unsupported, "key exchange suite")),
        }
    }

    /// Returns the Device parameters to send to the Owner.
    pub fn xb(&self) -> Result<XBKeyExchange<'static>, Error> {
        debug_assert_eq!(self.party, KexParty::Device);

        match self.suite {
            KexSuitNames::ECDH256 => {
                let (x, y) = parse_ecc_point::<32>(&self.pub_point)?;

                XBKeyExchange::create(EcdhParams::with_p256(x, y, &self.random))
            }
            KexSuitNames::ECDH384 => {
                let (x, y) = parse_ecc_point::<48>(&self.pub_point)?;

                XBKeyExchange::create(EcdhParams::with_p384(x, y, &self.random))
            }
            _ => Err(Error::new(ErrorKind::Unsupported, "key exchange suite")),
        }
    }
}

impl std::fmt::Debug for KexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KexState")
            .field("suite", &self.suite)
            .field("party", &self.party)
            .finish_non_exhaustive()
    }
}

/// Splits a SEC.1 uncompressed point into its coordinates.
pub(crate) fn parse_ecc_point<const N: usize>(point: &[u8]) -> Result<(&[u8; N], &[u8; N]), Error> {
    if point.len() != 1 + N + N || point[0] != 0x04 {
        return Err(Error::new(ErrorKind::Invalid, "uncompressed ecc point"));
    }

    let (x, y) = point[1..].split_at(N);

    let x = x
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Invalid, "ecc point x coordinate"))?;
    let y = y
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Invalid, "ecc point y coordinate"))?;

    Ok((x, y))
}

/// An ECDSA key pair, with the randomness its signatures need.
pub struct KeyPair {
    keys: signature::EcdsaKeyPair,
    pkcs8: Zeroizing<Vec<u8>>,
    pk_type: PkType,
    rand: SystemRandom,
}

impl KeyPair {
    /// Generates a fresh key pair of the given type.
    pub fn generate(pk_type: PkType) -> Result<Self, Error> {
        let alg = signing_alg(pk_type)?;
        let rand = SystemRandom::new();

        let document = signature::EcdsaKeyPair::generate_pkcs8(alg, &rand)
            .map_err(|_| Error::new(ErrorKind::Crypto, "to generate the key pair"))?;

        let keys = signature::EcdsaKeyPair::from_pkcs8(alg, document.as_ref())
            .map_err(|_| Error::new(ErrorKind::Crypto, "to parse the generated key pair"))?;

        Ok(Self {
            keys,
            pkcs8: Zeroizing::new(document.as_ref().to_vec()),
            pk_type,
            rand,
        })
    }

    /// Loads a key pair from a PKCS#8 document.
    pub fn from_pkcs8(pk_type: PkType, pkcs8: &[u8]) -> Result<Self, Error> {
        let alg = signing_alg(pk_type)?;

        let keys = signature::EcdsaKeyPair::from_pkcs8(alg, pkcs8)
            .map_err(|_| Error::new(ErrorKind::Crypto, "to parse the key pair"))?;

        Ok(Self {
            keys,
            pkcs8: Zeroizing::new(pkcs8.to_vec()),
            pk_type,
            rand: SystemRandom::new(),
        })
    }

    /// PKCS#8 document of the key pair, for persisting it.
    pub fn to_pkcs8(&self) -> &[u8] {
        &self.pkcs8
    }

    /// Returns the type of the key.
    pub fn pk_type(&self) -> PkType {
        self.pk_type
    }

    /// Returns the public key as a DER encoded SubjectPublicKeyInfo.
    pub fn public_key_der(&self) -> Result<Vec<u8>, Error> {
        self.keys
            .public_key()
            .as_der()
            .map(|der| der.as_ref().to_vec())
            .map_err(|_| Error::new(ErrorKind::Crypto, "to encode the public key"))
    }

    /// Returns the public key in the X509 encoding used on the wire.
    pub fn public_key(&self) -> Result<PublicKey<'static>, Error> {
        let der = self.public_key_der()?;

        Ok(PublicKey::with_x509(
            self.pk_type,
            Cow::Owned(ByteBuf::from(der)),
        ))
    }

    /// Signs the data with the key.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.keys
            .sign(&self.rand, data)
            .map(|signature| signature.as_ref().to_vec())
            .map_err(|_| Error::new(ErrorKind::Crypto, "to sign the data"))
    }

    /// COSE algorithm matching the key type.
    ///
    /// Only the EC types reach this, the constructors reject RSA.
    pub(crate) fn cose_algorithm(&self) -> coset::iana::Algorithm {
        match self.pk_type {
            PkType::Secp384R1 => coset::iana::Algorithm::ES384,
            _ => coset::iana::Algorithm::ES256,
        }
    }

    /// `SgType` advertised in the device sign info.
    pub fn sg_type(&self) -> DeviceSgType {
        match self.pk_type {
            PkType::Secp384R1 => DeviceSgType::StSecP384R1,
            _ => DeviceSgType::StSecP256R1,
        }
    }

    pub(crate) fn rcgen_signer(&self) -> software::RcgenKeyCompat<'_> {
        software::RcgenKeyCompat {
            keys: &self.keys,
            rand: &self.rand,
            alg: match self.pk_type {
                PkType::Secp384R1 => &rcgen::PKCS_ECDSA_P384_SHA384,
                _ => &rcgen::PKCS_ECDSA_P256_SHA256,
            },
        }
    }
}

// the PKCS#8 document must stay out of the output
impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("pk_type", &self.pk_type)
            .finish_non_exhaustive()
    }
}

fn signing_alg(pk_type: PkType) -> Result<&'static signature::EcdsaSigningAlgorithm, Error> {
    match pk_type {
        PkType::Secp256R1 => Ok(&signature::ECDSA_P256_SHA256_FIXED_SIGNING),
        PkType::Secp384R1 => Ok(&signature::ECDSA_P384_SHA384_FIXED_SIGNING),
        PkType::Rsa2048Restr | PkType::RsaPkcs => {
            Err(Error::new(ErrorKind::Unsupported, "rsa key pairs"))
        }
    }
}

pub(crate) fn verification_alg(
    pk_type: PkType,
) -> Result<&'static dyn signature::VerificationAlgorithm, Error> {
    match pk_type {
        PkType::Secp256R1 => Ok(&signature::ECDSA_P256_SHA256_FIXED),
        PkType::Secp384R1 => Ok(&signature::ECDSA_P384_SHA384_FIXED),
        PkType::Rsa2048Restr | PkType::RsaPkcs => {
            Err(Error::new(ErrorKind::Unsupported, "rsa public keys"))
        }
    }
}

/// Signs an entity attestation token with the device key.
///
/// The unprotected header carries the claims outside the signature, an empty
/// one is fine.
pub(crate) fn sign_eat(
    key_pair: &KeyPair,
    payload: &EatPayload<'_>,
    unprotected: coset::Header,
) -> Result<EaToken, Error> {
    let mut buf = Vec::new();

    ciborium::into_writer(payload, &mut buf).map_err(|err| {
        error!(error = %err, "couldn't encode eat payload");

        Error::new(ErrorKind::Encode, "eat payload")
    })?;

    let protected = HeaderBuilder::new()
        .algorithm(key_pair.cose_algorithm())
        .build();

    let sign = CoseSign1Builder::new()
        .protected(protected)
        .unprotected(unprotected)
        .payload(buf)
        .try_create_signature(&[], |bytes| key_pair.sign(bytes))?
        .build();

    Ok(sign)
}

/// Verifies a COSE_Sign1 with the given public key.
///
/// The key bytes are a DER encoded SubjectPublicKeyInfo, passed to
/// [`aws_lc_rs`] unchanged.
pub(crate) fn verify_cose_signature(key: &PublicKey<'_>, sign: &CoseSign1) -> Result<(), Error> {
    let bytes = key.key().ok_or(Error::new(
        ErrorKind::Unsupported,
        "public key encoding without key bytes",
    ))?;

    let alg = verification_alg(key.pk_type())?;
    let key = signature::UnparsedPublicKey::new(alg, bytes);

    sign.verify_signature(&[], |signature, message| key.verify(message, signature))
        .map_err(|_| Error::new(ErrorKind::Crypto, "to verify the cose signature"))
}

/// Hash algorithm paired with a key, following the key size.
pub(crate) fn hash_for_key(key: &PublicKey<'_>) -> Hashtype {
    match key.pk_type() {
        PkType::Secp384R1 | PkType::RsaPkcs => Hashtype::Sha384,
        PkType::Secp256R1 | PkType::Rsa2048Restr => Hashtype::Sha256,
    }
}

/// HMAC algorithm paired with a key, following the key size.
pub(crate) fn hmac_for_key(key: &PublicKey<'_>) -> Hashtype {
    match key.pk_type() {
        PkType::Secp384R1 | PkType::RsaPkcs => Hashtype::HmacSha384,
        PkType::Secp256R1 | PkType::Rsa2048Restr => Hashtype::HmacSha256,
    }
}
