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

//! Device certificate chains.
//!
//! The manufacturer issues the device certificate from the CSR sent in
//! `DI.AppStart` and stores the chain in the ownership voucher. Later
//! protocols validate the chain and compare the leaf key with the key proving
//! the device identity.

use std::borrow::Cow;

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::utils::Repetition;
use astarte_fdo_protocol::v100::public_key::{PkType, PublicKey as WirePublicKey};
use astarte_fdo_protocol::v100::x509::{CoseX509, X509};
use astarte_fdo_protocol::Error;
use aws_lc_rs::signature;
use serde_bytes::ByteBuf;
use rcgen::{BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer};
use tracing::error;
use x509_parser::certificate::X509Certificate;
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::oid_registry::{OID_SIG_ECDSA_WITH_SHA256, OID_SIG_ECDSA_WITH_SHA384};
use x509_parser::prelude::FromDer;
use x509_parser::public_key::PublicKey;
use x509_parser::x509::SubjectPublicKeyInfo;

use super::KeyPair;

/// Validates a device certificate chain, leaf first.
///
/// Every certificate must be inside its validity window and carry a signature
/// by the next certificate in the chain. The last certificate is the trust
/// anchor of the chain, revocation isn't checked.
///
/// Returns the leaf subject public key info, DER encoded.
pub(crate) fn validate_cert_chain(chain: &CoseX509<'_>) -> Result<Vec<u8>, Error> {
    let parsed = chain
        .certs()
        .iter()
        .map(|cert| {
            x509_parser::parse_x509_certificate(cert.der())
                .map(|(_, parsed)| parsed)
                .map_err(|err| {
                    error!(error = %err, "couldn't parse chain certificate");

                    Error::new(ErrorKind::Invalid, "x509 certificate in chain")
                })
        })
        .collect::<Result<Vec<_>, Error>>()?;

    for (i, cert) in parsed.iter().enumerate() {
        if !cert.validity().is_valid() {
            return Err(Error::new(
                ErrorKind::Invalid,
                "certificate validity window",
            ));
        }

        let Some(issuer) = parsed.get(i + 1) else {
            // trust anchor of the chain
            break;
        };

        verify_cert_signature(cert, issuer)?;
    }

    Ok(chain.cert_pub_key().to_vec())
}

/// Validates the chain and returns the leaf key in the wire encoding.
///
/// The key type follows the curve of the leaf key.
pub(crate) fn device_public_key(chain: &CoseX509<'_>) -> Result<WirePublicKey<'static>, Error> {
    let leaf_der = validate_cert_chain(chain)?;

    let (_, spki) = SubjectPublicKeyInfo::from_der(&leaf_der).map_err(|err| {
        error!(error = %err, "couldn't parse the leaf public key");

        Error::new(ErrorKind::Invalid, "leaf subject public key info")
    })?;

    let point_len = match spki.parsed() {
        Ok(PublicKey::EC(point)) => point.data().len(),
        _ => return Err(Error::new(ErrorKind::Unsupported, "leaf public key type")),
    };

    // SEC.1 uncompressed, 1 + 2 * 32 or 1 + 2 * 48 bytes
    let pk_type = match point_len {
        65 => PkType::Secp256R1,
        97 => PkType::Secp384R1,
        _ => return Err(Error::new(ErrorKind::Unsupported, "leaf public key curve")),
    };

    Ok(WirePublicKey::with_x509(
        pk_type,
        Cow::Owned(ByteBuf::from(leaf_der)),
    ))
}

fn verify_cert_signature(
    cert: &X509Certificate<'_>,
    issuer: &X509Certificate<'_>,
) -> Result<(), Error> {
    let alg = ecdsa_asn1_alg(cert)?;

    let key = signature::UnparsedPublicKey::new(alg, issuer.subject_pki.raw);

    let sig: &[u8] = &cert.signature_value.data;

    key.verify(cert.tbs_certificate.as_ref(), sig)
        .map_err(|_| Error::new(ErrorKind::Invalid, "certificate signature"))
}

fn ecdsa_asn1_alg(
    cert: &X509Certificate<'_>,
) -> Result<&'static dyn signature::VerificationAlgorithm, Error> {
    let oid = &cert.signature_algorithm.algorithm;

    if *oid == OID_SIG_ECDSA_WITH_SHA256 {
        Ok(&signature::ECDSA_P256_SHA256_ASN1)
    } else if *oid == OID_SIG_ECDSA_WITH_SHA384 {
        Ok(&signature::ECDSA_P384_SHA384_ASN1)
    } else {
        Err(Error::new(
            ErrorKind::Unsupported,
            "certificate signature algorithm",
        ))
    }
}

/// Compares two DER encoded subject public keys by their decoded key
/// material, so different encodings of the same key still match.
pub(crate) fn same_subject_key(a: &[u8], b: &[u8]) -> Result<bool, Error> {
    let (_, spki_a) = SubjectPublicKeyInfo::from_der(a).map_err(|err| {
        error!(error = %err, "couldn't parse subject public key");

        Error::new(ErrorKind::Invalid, "subject public key info")
    })?;

    let (_, spki_b) = SubjectPublicKeyInfo::from_der(b).map_err(|err| {
        error!(error = %err, "couldn't parse subject public key");

        Error::new(ErrorKind::Invalid, "subject public key info")
    })?;

    match (spki_a.parsed(), spki_b.parsed()) {
        (Ok(PublicKey::EC(point_a)), Ok(PublicKey::EC(point_b))) => {
            Ok(point_a.data() == point_b.data())
        }
        _ => Ok(spki_a.subject_public_key.data == spki_b.subject_public_key.data),
    }
}

/// Certificate authority for the device certificates of one manufacturer.
pub(crate) struct DeviceCa {
    key: KeyPair,
    params: CertificateParams,
    cert: Vec<u8>,
}

impl std::fmt::Debug for DeviceCa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCa")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl DeviceCa {
    /// Creates a self signed CA with the given common name.
    pub(crate) fn new(common_name: &str) -> Result<Self, Error> {
        let key = KeyPair::generate(PkType::Secp256R1)?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);

        let mut params = CertificateParams::new([]).map_err(|err| {
            error!(error = %err, "couldn't create ca parameters");

            Error::new(ErrorKind::Crypto, "to create ca parameters")
        })?;
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

        let cert = params
            .clone()
            .self_signed(&key.rcgen_signer())
            .map_err(|err| {
                error!(error = %err, "couldn't self sign the ca certificate");

                Error::new(ErrorKind::Crypto, "to self sign the ca certificate")
            })?;

        Ok(Self {
            key,
            params,
            cert: cert.der().to_vec(),
        })
    }

    /// Issues the device certificate from a CSR and returns the chain.
    ///
    /// The CSR signature is checked before issuing, the certificate subject is
    /// the device serial number.
    pub(crate) fn issue(&self, csr_der: &[u8], serial_no: &str) -> Result<CoseX509<'static>, Error> {
        let subject_key = verify_csr(csr_der)?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, serial_no);

        let mut params = CertificateParams::new([]).map_err(|err| {
            error!(error = %err, "couldn't create certificate parameters");

            Error::new(ErrorKind::Crypto, "to create certificate parameters")
        })?;
        params.distinguished_name = dn;

        let issuer = Issuer::new(self.params.clone(), self.key.rcgen_signer());

        let leaf = params.signed_by(&subject_key, &issuer).map_err(|err| {
            error!(error = %err, "couldn't sign the device certificate");

            Error::new(ErrorKind::Crypto, "to sign the device certificate")
        })?;

        let leaf_der = leaf.der().to_vec();

        let leaf = X509::parse(&leaf_der)?.into_owned();
        let ca = X509::parse(&self.cert)?.into_owned();

        let certs = Repetition::new(vec![leaf, ca])
            .ok_or(Error::new(ErrorKind::Invalid, "empty certificate chain"))?;

        Ok(CoseX509::Certs(certs))
    }
}

/// Subject key of a verified CSR, ready for [`CertificateParams::signed_by`].
struct CsrSubjectKey {
    point: Vec<u8>,
    alg: &'static rcgen::SignatureAlgorithm,
}

impl rcgen::PublicKeyData for CsrSubjectKey {
    fn der_bytes(&self) -> &[u8] {
        &self.point
    }

    fn algorithm(&self) -> &'static rcgen::SignatureAlgorithm {
        self.alg
    }
}

/// Parses a CSR, checks its self signature and returns the subject key.
fn verify_csr(csr_der: &[u8]) -> Result<CsrSubjectKey, Error> {
    let (_, csr) = X509CertificationRequest::from_der(csr_der).map_err(|err| {
        error!(error = %err, "couldn't parse the csr");

        Error::new(ErrorKind::Invalid, "certification request")
    })?;

    let info = &csr.certification_request_info;

    let oid = &csr.signature_algorithm.algorithm;

    let alg: &'static dyn signature::VerificationAlgorithm = if *oid == OID_SIG_ECDSA_WITH_SHA256 {
        &signature::ECDSA_P256_SHA256_ASN1
    } else if *oid == OID_SIG_ECDSA_WITH_SHA384 {
        &signature::ECDSA_P384_SHA384_ASN1
    } else {
        return Err(Error::new(
            ErrorKind::Unsupported,
            "csr signature algorithm",
        ));
    };

    let key = signature::UnparsedPublicKey::new(alg, info.subject_pki.raw);

    let sig: &[u8] = &csr.signature_value.data;

    key.verify(info.raw, sig)
        .map_err(|_| Error::new(ErrorKind::Invalid, "certification request signature"))?;

    let point = match info.subject_pki.parsed() {
        Ok(PublicKey::EC(point)) => point.data().to_vec(),
        _ => {
            return Err(Error::new(ErrorKind::Unsupported, "csr public key type"));
        }
    };

    // SEC.1 uncompressed, 1 + 2 * 32 or 1 + 2 * 48 bytes
    let alg = match point.len() {
        65 => &rcgen::PKCS_ECDSA_P256_SHA256,
        97 => &rcgen::PKCS_ECDSA_P384_SHA384,
        _ => {
            return Err(Error::new(ErrorKind::Unsupported, "csr public key curve"));
        }
    };

    Ok(CsrSubjectKey { point, alg })
}
