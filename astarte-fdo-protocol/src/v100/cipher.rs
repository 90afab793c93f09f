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

//! Encrypted message bodies exchanged after the TO2 key exchange.
//!
//! From TO2.SetupDevice onwards every message body is encrypted then MAC'd: the AES
//! ciphertext travels in an [`EtmInnerBlock`] and the whole encoded inner block is
//! authenticated by the [`EtmOuterBlock`] HMAC. The MAC is verified before the
//! cipher is invoked.

use std::borrow::Cow;
use std::fmt::{Debug, Display};
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use serde_bytes::{ByteBuf, Bytes};

use crate::error::ErrorKind;
use crate::utils::CborBstr;
use crate::v100::hash_hmac::Hashtype;
use crate::v100::key_exchange::IvData;
use crate::v100::{ClientMessage, Message, Msgtype};
use crate::Error;

/// COSE header parameter holding the algorithm identifier.
const ALG_PARAM: i64 = coset::iana::HeaderParameter::Alg as i64;
/// COSE header parameter holding the initialization vector.
const IV_PARAM: i64 = coset::iana::HeaderParameter::Iv as i64;

/// Session encryption algorithms, negotiated in TO2.HelloDevice.
///
/// ```cddl
/// CipherSuiteNames /= (
///     "AES128/CTR/HMAC-SHA256",
///     "AES128/CBC/HMAC-SHA256",
///     "AES256/CTR/HMAC-SHA384",
///     "AES256/CBC/HMAC-SHA384"
/// )
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherSuiteNames {
    /// AES-128 in counter mode, HMAC-SHA256 integrity protection.
    #[serde(rename = "AES128/CTR/HMAC-SHA256")]
    Aes128CtrHmacSha256,
    /// AES-128 in cipher block chaining mode, HMAC-SHA256 integrity protection.
    #[serde(rename = "AES128/CBC/HMAC-SHA256")]
    Aes128CbcHmacSha256,
    /// AES-256 in counter mode, HMAC-SHA384 integrity protection.
    #[serde(rename = "AES256/CTR/HMAC-SHA384")]
    Aes256CtrHmacSha384,
    /// AES-256 in cipher block chaining mode, HMAC-SHA384 integrity protection.
    #[serde(rename = "AES256/CBC/HMAC-SHA384")]
    Aes256CbcHmacSha384,
}

impl CipherSuiteNames {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            CipherSuiteNames::Aes128CtrHmacSha256 => "AES128/CTR/HMAC-SHA256",
            CipherSuiteNames::Aes128CbcHmacSha256 => "AES128/CBC/HMAC-SHA256",
            CipherSuiteNames::Aes256CtrHmacSha384 => "AES256/CTR/HMAC-SHA384",
            CipherSuiteNames::Aes256CbcHmacSha384 => "AES256/CBC/HMAC-SHA384",
        }
    }

    /// Identifier of the AES variant in the inner protected header.
    pub fn aes_type(&self) -> AesPlainType {
        match self {
            CipherSuiteNames::Aes128CtrHmacSha256 => AesPlainType::Aes128Ctr,
            CipherSuiteNames::Aes128CbcHmacSha256 => AesPlainType::Aes128Cbc,
            CipherSuiteNames::Aes256CtrHmacSha384 => AesPlainType::Aes256Ctr,
            CipherSuiteNames::Aes256CbcHmacSha384 => AesPlainType::Aes256Cbc,
        }
    }

    /// Identifier of the HMAC in the outer protected header.
    pub fn mac_type(&self) -> MacType {
        match self {
            CipherSuiteNames::Aes128CtrHmacSha256 | CipherSuiteNames::Aes128CbcHmacSha256 => {
                MacType::HmacSha256
            }
            CipherSuiteNames::Aes256CtrHmacSha384 | CipherSuiteNames::Aes256CbcHmacSha384 => {
                MacType::HmacSha384
            }
        }
    }

    /// Length in bytes of the session encryption key (SEK).
    pub fn sek_len(&self) -> usize {
        match self {
            CipherSuiteNames::Aes128CtrHmacSha256 | CipherSuiteNames::Aes128CbcHmacSha256 => 16,
            CipherSuiteNames::Aes256CtrHmacSha384 | CipherSuiteNames::Aes256CbcHmacSha384 => 32,
        }
    }

    /// Length in bytes of the session verification key (SVK).
    pub fn svk_len(&self) -> usize {
        match self {
            CipherSuiteNames::Aes128CtrHmacSha256 | CipherSuiteNames::Aes128CbcHmacSha256 => 32,
            CipherSuiteNames::Aes256CtrHmacSha384 | CipherSuiteNames::Aes256CbcHmacSha384 => 48,
        }
    }

    /// Returns true for the counter mode suites.
    pub fn is_ctr(&self) -> bool {
        matches!(
            self,
            CipherSuiteNames::Aes128CtrHmacSha256 | CipherSuiteNames::Aes256CtrHmacSha384
        )
    }
}

impl Display for CipherSuiteNames {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// AES algorithm identifier carried in the inner protected header.
///
/// Values from the COSE AES-CTR and AES-CBC registrations (RFC 9459).
///
/// ```cddl
/// ETMAesPlainType /= (
///     A128CTR: -65534,
///     A256CTR: -65532,
///     A128CBC: -65531,
///     A256CBC: -65529
/// )
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
#[repr(i64)]
pub enum AesPlainType {
    /// AES-CTR with a 128-bit key
    Aes128Ctr = -65534,
    /// AES-CTR with a 256-bit key
    Aes256Ctr = -65532,
    /// AES-CBC with a 128-bit key
    Aes128Cbc = -65531,
    /// AES-CBC with a 256-bit key
    Aes256Cbc = -65529,
}

impl TryFrom<i64> for AesPlainType {
    type Error = Error;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        let value = match value {
            -65534 => AesPlainType::Aes128Ctr,
            -65532 => AesPlainType::Aes256Ctr,
            -65531 => AesPlainType::Aes128Cbc,
            -65529 => AesPlainType::Aes256Cbc,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for AesPlainType")),
        };

        Ok(value)
    }
}

impl From<AesPlainType> for i64 {
    fn from(value: AesPlainType) -> Self {
        value as i64
    }
}

/// HMAC identifier carried in the outer protected header.
///
/// ```cddl
/// ETMMacType /= (
///     HMAC-SHA256: 5,
///     HMAC-SHA384: 6
/// )
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum MacType {
    /// COSE HMAC 256/256
    HmacSha256 = coset::iana::Algorithm::HMAC_256_256 as u8,
    /// COSE HMAC 384/384
    HmacSha384 = coset::iana::Algorithm::HMAC_384_384 as u8,
}

impl MacType {
    /// Hash type of the HMAC producing the integrity tag.
    pub fn hash_type(&self) -> Hashtype {
        match self {
            MacType::HmacSha256 => Hashtype::HmacSha256,
            MacType::HmacSha384 => Hashtype::HmacSha384,
        }
    }
}

impl TryFrom<u8> for MacType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let value = match value {
            5 => MacType::HmacSha256,
            6 => MacType::HmacSha384,
            _ => return Err(Error::new(ErrorKind::OutOfRange, "for MacType")),
        };

        Ok(value)
    }
}

impl From<MacType> for u8 {
    fn from(value: MacType) -> Self {
        value as u8
    }
}

fn encode_alg_header(alg: i64) -> Result<ByteBuf, Error> {
    let map = ciborium::Value::Map(vec![(
        ciborium::Value::Integer(ALG_PARAM.into()),
        ciborium::Value::Integer(alg.into()),
    )]);

    let mut buf = Vec::new();
    ciborium::into_writer(&map, &mut buf).map_err(|err| {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %err, "couldn't encode the protected header");

        Error::new(ErrorKind::Encode, "the protected header")
    })?;

    Ok(ByteBuf::from(buf))
}

fn decode_alg_header(bytes: &[u8]) -> Result<i64, Error> {
    let value: ciborium::Value = ciborium::from_reader(bytes).map_err(|err| {
        #[cfg(feature = "tracing")]
        tracing::error!(error = %err, "couldn't decode the protected header");

        Error::new(ErrorKind::Decode, "the protected header")
    })?;

    let map = value
        .as_map()
        .ok_or(Error::new(ErrorKind::Shape, "a protected header map"))?;

    let alg_key = ciborium::value::Integer::from(ALG_PARAM);

    map.iter()
        .find_map(|(key, value)| {
            (key.as_integer() == Some(alg_key))
                .then(|| value.as_integer())
                .flatten()
        })
        .and_then(|alg| i64::try_from(alg).ok())
        .ok_or(Error::new(ErrorKind::Shape, "a protected alg header"))
}

fn header_iv(unprotected: &ciborium::Value) -> Result<IvData<'static>, Error> {
    let map = unprotected
        .as_map()
        .ok_or(Error::new(ErrorKind::Shape, "an unprotected header map"))?;

    let iv_key = ciborium::value::Integer::from(IV_PARAM);

    map.iter()
        .find_map(|(key, value)| {
            (key.as_integer() == Some(iv_key))
                .then(|| value.as_bytes())
                .flatten()
        })
        .map(|bytes| Cow::Owned(ByteBuf::from(bytes.clone())))
        .ok_or(Error::new(ErrorKind::Shape, "an unprotected IV header"))
}

/// Ciphertext of one message body with its AES parameters.
///
/// ```cddl
/// ETMInnerBlock = [
///     protected:   bstr .cbor ETMAesPlainType,
///     unprotected: { 5: AESIV },
///     payload:     bstr
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EtmInnerBlock<'a> {
    /// AES variant that produced the ciphertext.
    pub aes_type: AesPlainType,
    /// Initialization vector for this encryption.
    pub iv: IvData<'a>,
    /// The encrypted message body.
    pub ciphertext: Cow<'a, Bytes>,
}

impl Serialize for EtmInnerBlock<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            aes_type,
            iv,
            ciphertext,
        } = self;

        let protected =
            encode_alg_header(i64::from(*aes_type)).map_err(serde::ser::Error::custom)?;

        let unprotected = ciborium::Value::Map(vec![(
            ciborium::Value::Integer(IV_PARAM.into()),
            ciborium::Value::Bytes(iv.to_vec()),
        )]);

        (protected, unprotected, ciphertext).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EtmInnerBlock<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (protected, unprotected, ciphertext): (ByteBuf, ciborium::Value, ByteBuf) =
            Deserialize::deserialize(deserializer)?;

        let alg = decode_alg_header(&protected).map_err(serde::de::Error::custom)?;
        let aes_type = AesPlainType::try_from(alg).map_err(serde::de::Error::custom)?;

        let iv = header_iv(&unprotected).map_err(serde::de::Error::custom)?;

        Ok(Self {
            aes_type,
            iv,
            ciphertext: Cow::Owned(ciphertext),
        })
    }
}

/// Encrypt-then-MAC wrapper around an [`EtmInnerBlock`].
///
/// The `hmac` is computed with the session verification key over the encoded inner
/// block, exactly as carried in the payload `bstr`.
///
/// ```cddl
/// ETMOuterBlock = [
///     protected:   bstr .cbor ETMMacType,
///     unprotected: {},
///     payload:     bstr .cbor ETMInnerBlock,
///     hmac:        bstr
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EtmOuterBlock<'a> {
    /// HMAC variant that produced the tag.
    pub mac_type: MacType,
    /// The encoded inner block.
    pub payload: CborBstr<'a, EtmInnerBlock<'a>>,
    /// Integrity tag over the payload bytes.
    pub tag: Cow<'a, Bytes>,
}

impl<'a> EtmOuterBlock<'a> {
    /// Bytes of the encoded inner block, the input of the integrity tag.
    pub fn payload_bytes(&self) -> Result<&Cow<'a, Bytes>, Error> {
        self.payload.bytes()
    }
}

impl Serialize for EtmOuterBlock<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            mac_type,
            payload,
            tag,
        } = self;

        let protected =
            encode_alg_header(i64::from(u8::from(*mac_type))).map_err(serde::ser::Error::custom)?;

        let unprotected = ciborium::Value::Map(Vec::new());

        (protected, unprotected, payload, tag).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EtmOuterBlock<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (protected, _unprotected, payload, tag): (
            ByteBuf,
            ciborium::Value,
            CborBstr<EtmInnerBlock>,
            ByteBuf,
        ) = Deserialize::deserialize(deserializer)?;

        let alg = decode_alg_header(&protected).map_err(serde::de::Error::custom)?;
        let mac_type = u8::try_from(alg)
            .map_err(serde::de::Error::custom)
            .and_then(|alg| MacType::try_from(alg).map_err(serde::de::Error::custom))?;

        Ok(Self {
            mac_type,
            payload,
            tag: Cow::Owned(tag),
        })
    }
}

/// Encrypted message body standing in for `M`.
///
/// The wrapper keeps the inner message type, so the envelope of an encrypted
/// message still carries `M`'s message type id.
pub struct Encrypted<'a, M> {
    block: EtmOuterBlock<'a>,
    _marker: PhantomData<M>,
}

impl<'a, M> Encrypted<'a, M> {
    /// Wrap the sealed block for the message `M`.
    pub fn new(block: EtmOuterBlock<'a>) -> Self {
        Self {
            block,
            _marker: PhantomData,
        }
    }

    /// Returns the sealed block.
    pub fn block(&self) -> &EtmOuterBlock<'a> {
        &self.block
    }

    /// Unwraps the sealed block.
    pub fn into_block(self) -> EtmOuterBlock<'a> {
        self.block
    }
}

impl<M> Debug for Encrypted<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encrypted")
            .field("block", &self.block)
            .finish()
    }
}

impl<M> Clone for Encrypted<'_, M> {
    fn clone(&self) -> Self {
        Self {
            block: self.block.clone(),
            _marker: PhantomData,
        }
    }
}

impl<M> PartialEq for Encrypted<'_, M> {
    fn eq(&self, other: &Self) -> bool {
        self.block == other.block
    }
}

impl<M> Serialize for Encrypted<'_, M> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.block.serialize(serializer)
    }
}

impl<'de, M> Deserialize<'de> for Encrypted<'_, M> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let block = EtmOuterBlock::deserialize(deserializer)?;

        Ok(Self {
            block,
            _marker: PhantomData,
        })
    }
}

impl<M> Message for Encrypted<'_, M>
where
    M: Message,
{
    const MSG_TYPE: Msgtype = M::MSG_TYPE;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        ciborium::from_reader(buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode the encrypted message");

            Error::new(ErrorKind::Decode, "the encrypted message")
        })
    }

    fn encode<W>(&self, write: &mut W) -> Result<(), Error>
    where
        W: std::io::Write,
    {
        ciborium::into_writer(self, write).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode the encrypted message");

            Error::new(ErrorKind::Encode, "the encrypted message")
        })
    }
}

impl<M> ClientMessage for Encrypted<'_, M>
where
    M: ClientMessage,
{
    type Response<'a> = Encrypted<'a, M::Response<'a>>;
}
