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

//! Software based crypto operations.

use std::borrow::Cow;

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::v100::cipher::CipherSuiteNames;
use astarte_fdo_protocol::v100::hash_hmac::{HMac, Hash, Hashtype};
use astarte_fdo_protocol::v100::key_exchange::{AsEccKey, EcdhParams, KexSuitNames};
use astarte_fdo_protocol::v100::public_key::{PkEnc, PublicKey};
use astarte_fdo_protocol::v100::Nonce;
use astarte_fdo_protocol::Error;
use aws_lc_rs::rand::{SecureRandom, SystemRandom};
use aws_lc_rs::signature::EcdsaKeyPair;
use aws_lc_rs::{agreement, constant_time, digest, hmac, signature};
use rcgen::{CertificateParams, DistinguishedName, DnType};
use serde_bytes::ByteBuf;
use tracing::error;
use zeroize::Zeroizing;

use crate::crypto::cipher::IV_SEED_LEN;
use crate::crypto::kdf;

use super::{verification_alg, Crypto, EncryptionState, KexParty, KexState, KeyPair};

// 128 bit randoms for ECDH256, 384 bit for ECDH384
const ECDH256_RAND_LEN: usize = 16;
const ECDH384_RAND_LEN: usize = 48;

/// [`Crypto`] provider backed by [`aws_lc_rs`], with all key material in
/// memory.
#[derive(Debug, Clone)]
pub struct SoftwareCrypto {
    rng: SystemRandom,
}

impl SoftwareCrypto {
    /// Creates a provider using the system randomness.
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl Default for SoftwareCrypto {
    fn default() -> Self {
        Self::new()
    }
}

impl Crypto for SoftwareCrypto {
    const PK_ENC: PkEnc = PkEnc::X509;

    fn nonce16(&self) -> Result<Nonce, Error> {
        let mut nonce = [0u8; 16];

        self.rng
            .fill(&mut nonce)
            .map_err(|_| Error::new(ErrorKind::Crypto, "to create nonce"))?;

        Ok(Nonce::from(nonce))
    }

    fn random(&self, buf: &mut [u8]) -> Result<(), Error> {
        self.rng
            .fill(buf)
            .map_err(|_| Error::new(ErrorKind::Crypto, "to generate random bytes"))
    }

    fn hash(&self, hashtype: Hashtype, data: &[u8]) -> Result<Hash<'static>, Error> {
        let alg = match hashtype {
            Hashtype::Sha256 => &digest::SHA256,
            Hashtype::Sha384 => &digest::SHA384,
            Hashtype::HmacSha256 | Hashtype::HmacSha384 => {
                return Err(Error::new(ErrorKind::Unsupported, "hmac type for a digest"));
            }
        };

        let digest = digest::digest(alg, data);
        let bytes = Cow::Owned(ByteBuf::from(digest.as_ref()));

        let hash = match hashtype {
            Hashtype::Sha256 => Hash::with_sha256(bytes),
            _ => Hash::with_sha384(bytes),
        };

        hash.ok_or(Error::new(ErrorKind::Invalid, "digest length"))
    }

    fn hmac(&self, hashtype: Hashtype, secret: &[u8], data: &[u8]) -> Result<HMac<'static>, Error> {
        let alg = match hashtype {
            Hashtype::HmacSha256 => hmac::HMAC_SHA256,
            Hashtype::HmacSha384 => hmac::HMAC_SHA384,
            Hashtype::Sha256 | Hashtype::Sha384 => {
                return Err(Error::new(ErrorKind::Unsupported, "hash type for an hmac"));
            }
        };

        let key = hmac::Key::new(alg, secret);
        let tag = hmac::sign(&key, data);
        let bytes = Cow::Owned(ByteBuf::from(tag.as_ref()));

        let hmac = match hashtype {
            Hashtype::HmacSha256 => HMac::with_sha256(bytes),
            _ => HMac::with_sha384(bytes),
        };

        hmac.ok_or(Error::new(ErrorKind::Invalid, "hmac tag length"))
    }

    fn verify_hash(&self, hash: &Hash<'_>, data: &[u8]) -> Result<(), Error> {
        let alg = match hash.hash_type() {
            Hashtype::Sha256 => &digest::SHA256,
            Hashtype::Sha384 => &digest::SHA384,
            Hashtype::HmacSha256 | Hashtype::HmacSha384 => {
                return Err(Error::new(ErrorKind::Invalid, "hmac type instead of hash"));
            }
        };

        let digest = digest::digest(alg, data);

        constant_time::verify_slices_are_equal(hash.as_ref(), digest.as_ref())
            .map_err(|_| Error::new(ErrorKind::Invalid, "hash mismatch"))
    }

    fn verify_hmac(&self, hmac: &HMac<'_>, secret: &[u8], data: &[u8]) -> Result<(), Error> {
        let alg = match hmac.hash_type() {
            Hashtype::HmacSha256 => hmac::HMAC_SHA256,
            Hashtype::HmacSha384 => hmac::HMAC_SHA384,
            Hashtype::Sha256 | Hashtype::Sha384 => {
                return Err(Error::new(ErrorKind::Invalid, "hash type instead of hmac"));
            }
        };

        let key = hmac::Key::new(alg, secret);

        hmac::verify(&key, data, hmac.as_ref())
            .map_err(|_| Error::new(ErrorKind::Invalid, "hmac mismatch"))
    }

    fn sign(&self, key_pair: &KeyPair, data: &[u8]) -> Result<Vec<u8>, Error> {
        key_pair.sign(data)
    }

    fn verify(&self, key: &PublicKey<'_>, data: &[u8], signature: &[u8]) -> bool {
        let Some(bytes) = key.key() else {
            return false;
        };

        let Ok(alg) = verification_alg(key.pk_type()) else {
            return false;
        };

        signature::UnparsedPublicKey::new(alg, bytes)
            .verify(data, signature)
            .is_ok()
    }

    fn kex_begin(&self, suite: KexSuitNames, party: KexParty) -> Result<KexState, Error> {
        let (alg, rand_len) = match suite {
            KexSuitNames::ECDH256 => (&agreement::ECDH_P256, ECDH256_RAND_LEN),
            KexSuitNames::ECDH384 => (&agreement::ECDH_P384, ECDH384_RAND_LEN),
            KexSuitNames::DHKEXid14
            | KexSuitNames::DHKEXid15
            | KexSuitNames::ASYMKEX2048
            | KexSuitNames::ASYMKEX3072 => {
                return Err(Error::new(ErrorKind::Unsupported, "key exchange suite"));
            }
        };

        let secret = agreement::EphemeralPrivateKey::generate(alg, &self.rng)
            .map_err(|_| Error::new(ErrorKind::Crypto, "to create agreement key"))?;

        let pub_point = secret
            .compute_public_key()
            .map_err(|_| Error::new(ErrorKind::Crypto, "to compute the public key"))?
            .as_ref()
            .to_vec();

        let mut random = Zeroizing::new(vec![0u8; rand_len]);
        self.random(&mut random)?;

        Ok(KexState::new(suite, party, secret, pub_point, random))
    }

    fn kex_finish(&self, state: KexState, peer: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
        let party = state.party();

        match state.suite() {
            KexSuitNames::ECDH256 => {
                let params = EcdhParams::<32>::try_from(peer)?;

                if params.rand().len() != ECDH256_RAND_LEN {
                    return Err(Error::new(ErrorKind::Invalid, "peer random length"));
                }

                let peer_key =
                    agreement::UnparsedPublicKey::new(&agreement::ECDH_P256, params.as_key());

                let (secret, own_random) = state.into_secret();

                agreement::agree_ephemeral(
                    secret,
                    peer_key,
                    Error::new(ErrorKind::Crypto, "failed key agreement"),
                    |sh_x: &[u8]| Ok(shared_secret(sh_x, party, &own_random, params.rand())),
                )
            }
            KexSuitNames::ECDH384 => {
                let params = EcdhParams::<48>::try_from(peer)?;

                if params.rand().len() != ECDH384_RAND_LEN {
                    return Err(Error::new(ErrorKind::Invalid, "peer random length"));
                }

                let peer_key =
                    agreement::UnparsedPublicKey::new(&agreement::ECDH_P384, params.as_key());

                let (secret, own_random) = state.into_secret();

                agreement::agree_ephemeral(
                    secret,
                    peer_key,
                    Error::new(ErrorKind::Crypto, "failed key agreement"),
                    |sh_x: &[u8]| Ok(shared_secret(sh_x, party, &own_random, params.rand())),
                )
            }
            _ => Err(Error::new(ErrorKind::Unsupported, "key exchange suite")),
        }
    }

    fn derive_session_keys(
        &self,
        suite: CipherSuiteNames,
        sh_se: &[u8],
    ) -> Result<EncryptionState, Error> {
        let mut sek = Zeroizing::new(vec![0u8; suite.sek_len()]);
        kdf::derive(sh_se, kdf::SEK_LABEL, &mut sek)?;

        let mut svk = Zeroizing::new(vec![0u8; suite.svk_len()]);
        kdf::derive(sh_se, kdf::SVK_LABEL, &mut svk)?;

        let mut seed = [0u8; IV_SEED_LEN];
        self.random(&mut seed)?;

        Ok(EncryptionState::new(suite, sek, svk, seed))
    }

    fn csr(&self, key_pair: &KeyPair, device_info: &str) -> Result<Vec<u8>, Error> {
        // The device info for the certificate
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, device_info);

        let mut csr_param = CertificateParams::new([]).map_err(|err| {
            error!(error = %err, "couldn't create csr parameters");

            Error::new(ErrorKind::Crypto, "to create csr parameters")
        })?;
        csr_param.distinguished_name = dn;

        let compat = key_pair.rcgen_signer();

        let csr = csr_param.serialize_request(&compat).map_err(|err| {
            error!(error = %err, "couldn't serialize csr");

            Error::new(ErrorKind::Crypto, "to serialize csr")
        })?;

        Ok(csr.der().to_vec())
    }
}

/// Builds `ShSe` as `sh_x || device random || owner random`.
fn shared_secret(sh_x: &[u8], party: KexParty, own: &[u8], peer: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut sh_se = Zeroizing::new(Vec::with_capacity(sh_x.len() + own.len() + peer.len()));

    sh_se.extend_from_slice(sh_x);

    match party {
        KexParty::Device => {
            sh_se.extend_from_slice(own);
            sh_se.extend_from_slice(peer);
        }
        KexParty::Owner => {
            sh_se.extend_from_slice(peer);
            sh_se.extend_from_slice(own);
        }
    }

    sh_se
}

pub(crate) struct RcgenKeyCompat<'a> {
    pub(crate) keys: &'a EcdsaKeyPair,
    pub(crate) rand: &'a SystemRandom,
    pub(crate) alg: &'static rcgen::SignatureAlgorithm,
}

impl rcgen::PublicKeyData for RcgenKeyCompat<'_> {
    fn der_bytes(&self) -> &[u8] {
        use aws_lc_rs::signature::KeyPair;

        self.keys.public_key().as_ref()
    }

    fn algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        self.alg
    }
}

impl rcgen::SigningKey for RcgenKeyCompat<'_> {
    fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, rcgen::Error> {
        self.keys
            .sign(self.rand, msg)
            .map(|signature| signature.as_ref().to_vec())
            .map_err(|_| rcgen::Error::RingUnspecified)
    }
}
