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

//! Encryption of the TO2 messages after the key exchange.
//!
//! Messages are sealed with encrypt-then-mac: the inner block carries the AES
//! ciphertext and IV, the outer block authenticates the whole encoded inner
//! block with the session verification key. The tag is checked before any
//! decryption happens.

use std::borrow::Cow;

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::utils::CborBstr;
use astarte_fdo_protocol::v100::cipher::{
    CipherSuiteNames, Encrypted, EtmInnerBlock, EtmOuterBlock, MacType,
};
use astarte_fdo_protocol::v100::Message;
use astarte_fdo_protocol::Error;
use aws_lc_rs::cipher::{
    DecryptingKey, DecryptionContext, EncryptingKey, EncryptionContext, PaddedBlockDecryptingKey,
    PaddedBlockEncryptingKey, UnboundCipherKey, AES_128, AES_256,
};
use aws_lc_rs::iv::FixedLength;
use aws_lc_rs::rand::{SecureRandom, SystemRandom};
use aws_lc_rs::{cipher, hmac};
use serde_bytes::ByteBuf;
use zeroize::Zeroizing;

/// Length of the per session IV seed, the first bytes of every IV.
pub(crate) const IV_SEED_LEN: usize = 12;

const AES_BLOCK_LEN: usize = 16;

/// Keys and IV state of one TO2 session.
///
/// The state belongs to a single session and a single sender: the counter and
/// the seed only drive the IVs of the messages this side seals, received
/// messages carry their own IV.
pub struct EncryptionState {
    suite: CipherSuiteNames,
    sek: Zeroizing<Vec<u8>>,
    svk: Zeroizing<Vec<u8>>,
    seed: [u8; IV_SEED_LEN],
    ctr: u32,
    rand: SystemRandom,
}

impl EncryptionState {
    pub(crate) fn new(
        suite: CipherSuiteNames,
        sek: Zeroizing<Vec<u8>>,
        svk: Zeroizing<Vec<u8>>,
        seed: [u8; IV_SEED_LEN],
    ) -> Self {
        debug_assert_eq!(sek.len(), suite.sek_len());
        debug_assert_eq!(svk.len(), suite.svk_len());

        Self {
            suite,
            sek,
            svk,
            seed,
            ctr: 0,
            rand: SystemRandom::new(),
        }
    }

    /// Returns the suite the session keys were derived for.
    pub fn suite(&self) -> CipherSuiteNames {
        self.suite
    }

    /// Encrypts and authenticates a message.
    pub fn seal<M>(&mut self, msg: &M) -> Result<Encrypted<'static, M>, Error>
    where
        M: Message,
    {
        let mut plain = Vec::new();
        msg.encode(&mut plain)?;

        let blocks = u32::try_from(plain.len().div_ceil(AES_BLOCK_LEN))
            .map_err(|_| Error::new(ErrorKind::OutOfRange, "cipher counter"))?;

        let iv = self.next_iv()?;

        self.encrypt(&iv, &mut plain)?;

        if self.suite.is_ctr() {
            self.ctr = self
                .ctr
                .checked_add(blocks)
                .ok_or(Error::new(ErrorKind::OutOfRange, "cipher counter"))?;
        }

        let inner = EtmInnerBlock {
            aes_type: self.suite.aes_type(),
            iv: Cow::Owned(ByteBuf::from(iv.to_vec())),
            ciphertext: Cow::Owned(ByteBuf::from(plain)),
        };

        let payload = CborBstr::new(inner);

        let key = hmac::Key::new(self.hmac_alg(), &self.svk);
        let tag = hmac::sign(&key, payload.bytes()?);

        let block = EtmOuterBlock {
            mac_type: self.suite.mac_type(),
            payload,
            tag: Cow::Owned(ByteBuf::from(tag.as_ref())),
        };

        Ok(Encrypted::new(block))
    }

    /// Checks the authentication tag and decrypts a message.
    ///
    /// The tag is verified first, nothing is decrypted when it doesn't match.
    pub fn open<M>(&self, msg: Encrypted<'_, M>) -> Result<M, Error>
    where
        M: Message,
    {
        let block = msg.into_block();

        if block.mac_type != self.suite.mac_type() {
            return Err(Error::new(ErrorKind::Invalid, "cipher suite mac type"));
        }

        let key = hmac::Key::new(self.hmac_alg(), &self.svk);

        hmac::verify(&key, block.payload_bytes()?, &block.tag)
            .map_err(|_| Error::new(ErrorKind::Invalid, "message authentication tag"))?;

        let inner = &*block.payload;

        if inner.aes_type != self.suite.aes_type() {
            return Err(Error::new(ErrorKind::Invalid, "cipher suite aes type"));
        }

        let mut ciphertext = inner.ciphertext.to_vec();

        let len = self.decrypt(&inner.iv, &mut ciphertext)?;
        ciphertext.truncate(len);

        M::decode(&ciphertext)
    }

    /// IV for the next sealed message, seed plus a 4 bytes suffix.
    ///
    /// Counter mode uses the running block counter as suffix, CBC a fresh
    /// random one.
    fn next_iv(&mut self) -> Result<[u8; AES_BLOCK_LEN], Error> {
        let mut iv = [0u8; AES_BLOCK_LEN];
        iv[..IV_SEED_LEN].copy_from_slice(&self.seed);

        if self.suite.is_ctr() {
            iv[IV_SEED_LEN..].copy_from_slice(&self.ctr.to_be_bytes());
        } else {
            self.rand
                .fill(&mut iv[IV_SEED_LEN..])
                .map_err(|_| Error::new(ErrorKind::Crypto, "to generate the iv"))?;
        }

        Ok(iv)
    }

    fn hmac_alg(&self) -> hmac::Algorithm {
        match self.suite.mac_type() {
            MacType::HmacSha256 => hmac::HMAC_SHA256,
            MacType::HmacSha384 => hmac::HMAC_SHA384,
        }
    }

    fn aes_alg(&self) -> &'static cipher::Algorithm {
        match self.suite {
            CipherSuiteNames::Aes128CtrHmacSha256 | CipherSuiteNames::Aes128CbcHmacSha256 => {
                &AES_128
            }
            CipherSuiteNames::Aes256CtrHmacSha384 | CipherSuiteNames::Aes256CbcHmacSha384 => {
                &AES_256
            }
        }
    }

    fn encrypt(&self, iv: &[u8; AES_BLOCK_LEN], in_out: &mut Vec<u8>) -> Result<(), Error> {
        let key = UnboundCipherKey::new(self.aes_alg(), &self.sek)
            .map_err(|_| Error::new(ErrorKind::Crypto, "to create the cipher key"))?;

        let context = EncryptionContext::Iv128(
            FixedLength::try_from(iv.as_slice())
                .map_err(|_| Error::new(ErrorKind::Invalid, "iv length"))?,
        );

        if self.suite.is_ctr() {
            let key = EncryptingKey::ctr(key)
                .map_err(|_| Error::new(ErrorKind::Crypto, "to create the ctr key"))?;

            key.less_safe_encrypt(in_out.as_mut_slice(), context)
                .map_err(|_| Error::new(ErrorKind::Crypto, "to encrypt the message"))?;
        } else {
            let key = PaddedBlockEncryptingKey::cbc_pkcs7(key)
                .map_err(|_| Error::new(ErrorKind::Crypto, "to create the cbc key"))?;

            key.less_safe_encrypt(in_out, context)
                .map_err(|_| Error::new(ErrorKind::Crypto, "to encrypt the message"))?;
        }

        Ok(())
    }

    fn decrypt(&self, iv: &[u8], in_out: &mut [u8]) -> Result<usize, Error> {
        let key = UnboundCipherKey::new(self.aes_alg(), &self.sek)
            .map_err(|_| Error::new(ErrorKind::Crypto, "to create the cipher key"))?;

        let context = DecryptionContext::Iv128(
            FixedLength::try_from(iv)
                .map_err(|_| Error::new(ErrorKind::Invalid, "iv length"))?,
        );

        let plain = if self.suite.is_ctr() {
            let key = DecryptingKey::ctr(key)
                .map_err(|_| Error::new(ErrorKind::Crypto, "to create the ctr key"))?;

            key.decrypt(in_out, context)
                .map_err(|_| Error::new(ErrorKind::Crypto, "to decrypt the message"))?
        } else {
            let key = PaddedBlockDecryptingKey::cbc_pkcs7(key)
                .map_err(|_| Error::new(ErrorKind::Crypto, "to create the cbc key"))?;

            key.decrypt(in_out, context)
                .map_err(|_| Error::new(ErrorKind::Crypto, "to decrypt the message"))?
        };

        Ok(plain.len())
    }
}

impl std::fmt::Debug for EncryptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionState")
            .field("suite", &self.suite)
            .field("ctr", &self.ctr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use astarte_fdo_protocol::v100::to2::get_ov_next_entry::GetOvNextEntry;
    use pretty_assertions::assert_eq;

    use super::*;

    fn state(suite: CipherSuiteNames) -> EncryptionState {
        EncryptionState::new(
            suite,
            Zeroizing::new(vec![1u8; suite.sek_len()]),
            Zeroizing::new(vec![2u8; suite.svk_len()]),
            [3u8; IV_SEED_LEN],
        )
    }

    #[test]
    fn seal_open_roundtrip_ctr() {
        let mut sender = state(CipherSuiteNames::Aes128CtrHmacSha256);
        let receiver = state(CipherSuiteNames::Aes128CtrHmacSha256);

        let msg = GetOvNextEntry::new(2);

        let sealed = sender.seal(&msg).unwrap();
        let opened = receiver.open(sealed).unwrap();

        assert_eq!(opened.num(), 2);
    }

    #[test]
    fn seal_open_roundtrip_cbc() {
        let mut sender = state(CipherSuiteNames::Aes256CbcHmacSha384);
        let receiver = state(CipherSuiteNames::Aes256CbcHmacSha384);

        let msg = GetOvNextEntry::new(7);

        let sealed = sender.seal(&msg).unwrap();
        let opened = receiver.open(sealed).unwrap();

        assert_eq!(opened.num(), 7);
    }

    #[test]
    fn ctr_ivs_follow_the_block_counter() {
        let mut sender = state(CipherSuiteNames::Aes128CtrHmacSha256);

        let first = sender.seal(&GetOvNextEntry::new(0)).unwrap();
        let second = sender.seal(&GetOvNextEntry::new(1)).unwrap();

        let first_iv = first.block().payload.iv.to_vec();
        let second_iv = second.block().payload.iv.to_vec();

        assert_eq!(first_iv[..IV_SEED_LEN], [3u8; IV_SEED_LEN]);
        assert_eq!(first_iv[IV_SEED_LEN..], [0, 0, 0, 0]);
        // one block of plaintext was consumed
        assert_eq!(second_iv[IV_SEED_LEN..], [0, 0, 0, 1]);
    }

    #[test]
    fn cbc_ivs_are_random() {
        let mut sender = state(CipherSuiteNames::Aes128CbcHmacSha256);

        let first = sender.seal(&GetOvNextEntry::new(0)).unwrap();
        let second = sender.seal(&GetOvNextEntry::new(0)).unwrap();

        let first_iv = first.block().payload.iv.to_vec();
        let second_iv = second.block().payload.iv.to_vec();

        assert_eq!(first_iv[..IV_SEED_LEN], second_iv[..IV_SEED_LEN]);
        assert_ne!(first_iv[IV_SEED_LEN..], second_iv[IV_SEED_LEN..]);
    }

    #[test]
    fn tampered_tag_is_rejected() {
        let mut sender = state(CipherSuiteNames::Aes128CtrHmacSha256);
        let receiver = state(CipherSuiteNames::Aes128CtrHmacSha256);

        let sealed = sender.seal(&GetOvNextEntry::new(2)).unwrap();

        let mut block = sealed.into_block();
        let mut tag = block.tag.to_vec();
        tag[0] ^= 0xff;
        block.tag = Cow::Owned(ByteBuf::from(tag));

        let err = receiver
            .open(Encrypted::<GetOvNextEntry>::new(block))
            .unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let mut sender = state(CipherSuiteNames::Aes128CtrHmacSha256);
        let receiver = state(CipherSuiteNames::Aes128CtrHmacSha256);

        let sealed = sender.seal(&GetOvNextEntry::new(2)).unwrap();

        let mut block = sealed.into_block();
        let mut inner = block.payload.into_value();
        let mut ciphertext = inner.ciphertext.to_vec();
        ciphertext[0] ^= 0xff;
        inner.ciphertext = Cow::Owned(ByteBuf::from(ciphertext));
        block.payload = CborBstr::new(inner);

        let err = receiver
            .open(Encrypted::<GetOvNextEntry>::new(block))
            .unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn mac_type_must_match_the_suite() {
        let mut sender = state(CipherSuiteNames::Aes128CtrHmacSha256);
        let receiver = state(CipherSuiteNames::Aes128CtrHmacSha256);

        let sealed = sender.seal(&GetOvNextEntry::new(2)).unwrap();

        let mut block = sealed.into_block();
        block.mac_type = MacType::HmacSha384;

        let err = receiver
            .open(Encrypted::<GetOvNextEntry>::new(block))
            .unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn keys_from_another_session_fail() {
        let mut sender = state(CipherSuiteNames::Aes128CtrHmacSha256);
        let other = EncryptionState::new(
            CipherSuiteNames::Aes128CtrHmacSha256,
            Zeroizing::new(vec![9u8; 16]),
            Zeroizing::new(vec![8u8; 32]),
            [3u8; IV_SEED_LEN],
        );

        let sealed = sender.seal(&GetOvNextEntry::new(2)).unwrap();

        other.open(sealed).unwrap_err();
    }
}
