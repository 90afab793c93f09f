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

//! Structures for a X509 cert chain following the COSE X5CHAIN encoding.
//!
//! The ownership voucher carries the device certificate chain in this encoding, leaf
//! certificate first.

use std::borrow::Cow;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_bytes::Bytes;

use crate::error::ErrorKind;
use crate::utils::{Hex, Repetition};
use crate::Error;

/// X509 Certificate
///
/// From COSE RFC
///
/// ```cddl
/// COSE_X509 = bstr / [ 2*certs: bstr ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CoseX509<'a> {
    /// List of certificates
    ///
    /// This is more lenient than the spec, it should require a minimum of 2.
    Certs(Repetition<1, X509<'a>>),
    /// A single
    One(X509<'a>),
}

impl<'a> CoseX509<'a> {
    /// Returns `true` if the cose x509 is [`One`].
    ///
    /// [`One`]: CoseX509::One
    #[must_use]
    pub fn is_one(&self) -> bool {
        matches!(self, Self::One(..))
    }

    /// Return the first certificate public key.
    pub fn cert_pub_key(&self) -> &[u8] {
        self.leaf().key()
    }

    /// Returns the first certificate of the chain.
    pub fn leaf(&self) -> &X509<'a> {
        match self {
            CoseX509::Certs(repetition) => repetition.first(),
            CoseX509::One(cert) => cert,
        }
    }

    /// Certificates of the chain, leaf first.
    pub fn certs(&self) -> &[X509<'a>] {
        match self {
            CoseX509::Certs(repetition) => repetition,
            CoseX509::One(cert) => std::slice::from_ref(cert),
        }
    }

    /// Return an owned instance of the chain.
    pub fn into_owned(self) -> CoseX509<'static> {
        match self {
            CoseX509::Certs(repetition) => {
                let certs = repetition
                    .iter()
                    .cloned()
                    .map(X509::into_owned)
                    .collect::<Vec<_>>();

                // the repetition had at least one element before the map
                match Repetition::new(certs) {
                    Some(certs) => CoseX509::Certs(certs),
                    None => unreachable!("mapping preserves the length"),
                }
            }
            CoseX509::One(cert) => CoseX509::One(cert.into_owned()),
        }
    }
}

/// DER-encoded X.509 Certificate
#[derive(Clone, Eq)]
pub struct X509<'a> {
    cert: Cow<'a, Bytes>,
    key: Vec<u8>,
}

impl<'a> X509<'a> {
    /// Parses a DER encoded certificate from a slice.
    pub fn parse(cert: &'a [u8]) -> Result<Self, Error> {
        let (rest, parsed) = x509_parser::parse_x509_certificate(cert).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't parse x509 certificate");

            Error::new(ErrorKind::Invalid, "x509 certificate")
        })?;

        debug_assert!(rest.is_empty());

        Ok(Self {
            key: parsed.subject_pki.raw.to_vec(),
            cert: Cow::Borrowed(Bytes::new(cert)),
        })
    }

    /// The subject public key info of the certificate, DER encoded.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// The whole certificate, DER encoded.
    pub fn der(&self) -> &[u8] {
        &self.cert
    }

    /// Return an owned instance of the certificate.
    pub fn into_owned(self) -> X509<'static> {
        X509 {
            cert: Cow::Owned(self.cert.into_owned()),
            key: self.key,
        }
    }
}

impl Serialize for X509<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.cert.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for X509<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let cert: Cow<'_, Bytes> = Deserialize::deserialize(deserializer)?;

        let (rest, parsed) =
            x509_parser::parse_x509_certificate(&cert).map_err(serde::de::Error::custom)?;

        debug_assert!(rest.is_empty());

        Ok(Self {
            key: parsed.subject_pki.raw.to_vec(),
            cert,
        })
    }
}

impl Debug for X509<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Self { cert, key } = self;

        f.debug_struct("X509")
            .field("cert", &Hex::new(cert))
            .field("key", &Hex::new(key))
            .finish()
    }
}

impl PartialEq for X509<'_> {
    fn eq(&self, other: &Self) -> bool {
        let Self { cert, key: _ } = self;

        *cert == other.cert
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use crate::v100::public_key::tests::{pub_key_ecc, PUB_KEY_ECC_HEX};
    use crate::v100::tests::from_hex;

    use super::*;

    /// Minimal DER certificate over the P-256 test key, empty issuer and subject.
    pub(crate) const CERT_ECC_HEX: &str = concat!(
        // Certificate
        "3081eb",
        // TBSCertificate, version v3, serial 1
        "308193",
        "a003020102",
        "020101",
        // ecdsa-with-SHA256
        "300a06082a8648ce3d040302",
        // empty issuer
        "3000",
        // validity 2025-01-01 to 2035-01-01
        "301e",
        "170d3235303130313030303030305a",
        "170d3335303130313030303030305a",
        // empty subject
        "3000",
        // subjectPublicKeyInfo
        "3059301306072a8648ce3d020106082a8648ce3d03010703420004",
        "6b17d1f2e12c4247f8bce6e563a440f277037d812deb33a0f4a13945d898c296",
        "4fe342e2fe1a7f9b8ee7eb4a7c0f9e162bce33576b315ececbb6406837bf51f5",
        // signature algorithm and value
        "300a06082a8648ce3d040302",
        "034700",
        "3044",
        "02201234567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef",
        "022034567890abcdef1234567890abcdef1234567890abcdef1234567890abcdef12",
    );

    pub(crate) fn cert_ecc() -> Vec<u8> {
        from_hex(CERT_ECC_HEX)
    }

    pub(crate) fn create_cose_x509() -> CoseX509<'static> {
        let buf = cert_ecc();

        let ecc = X509::parse(&buf).unwrap();

        CoseX509::One(ecc.into_owned())
    }

    #[test]
    fn cose_x509_roundtrip() {
        let buf = cert_ecc();

        let ecc = X509::parse(&buf).unwrap();

        let cases = [
            CoseX509::One(ecc.clone()),
            CoseX509::Certs(Repetition::new(vec![ecc.clone(), ecc]).unwrap()),
        ];

        for case in cases {
            let mut buf = Vec::new();
            ciborium::into_writer(&case, &mut buf).unwrap();

            let res: CoseX509 = ciborium::from_reader(buf.as_slice()).unwrap();

            assert_eq!(res, case);
        }
    }

    #[test]
    fn cose_x509_cert_pub_key() {
        let buf = cert_ecc();

        let ecc = X509::parse(&buf).unwrap();

        let cases = [
            CoseX509::One(ecc.clone()),
            CoseX509::Certs(Repetition::new(vec![ecc.clone(), ecc]).unwrap()),
        ];

        for case in cases {
            assert_eq!(case.cert_pub_key(), pub_key_ecc());
        }
    }

    #[test]
    fn cose_x509_is_one() {
        let buf = cert_ecc();

        let ecc = X509::parse(&buf).unwrap();

        let cases = [
            (CoseX509::One(ecc.clone()), true, 1),
            (
                CoseX509::Certs(Repetition::new(vec![ecc.clone(), ecc]).unwrap()),
                false,
                2,
            ),
        ];

        for (case, exp, certs) in cases {
            assert_eq!(case.is_one(), exp);
            assert_eq!(case.certs().len(), certs);
        }
    }

    #[test]
    fn x509_cert_der() {
        let buf = cert_ecc();

        let ecc = X509::parse(&buf).unwrap();

        assert_eq!(ecc.der(), buf);
    }

    #[test]
    fn x509_parse_err() {
        // a bare public key isn't a certificate
        let spki = from_hex(PUB_KEY_ECC_HEX);

        let err = X509::parse(&spki).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }
}
