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

//! The Device Credential type indicates those values which must be persisted in the Device (e.g.,
//! during manufacturing) to prepare it for FIDO Device Onboard onboarding.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_bytes::Bytes;

use super::hash_hmac::Hash;
use super::rendezvous_info::RendezvousInfo;
use super::{Guid, Protver};

/// Persisted device credentials after DI.
///
/// The stored DCGuid, DCRVInfo and DCPubKeyHash fields are updated during the TO2 protocol. See
/// TO2.SetupDevice for details. These fields must be stored in a non-volatile, mutable storage
/// medium.
///
/// ```cddl
/// DeviceCredential = [
///     DCActive:     bool,
///     DCProtVer:    protver,
///     DCHmacSecret: bstr,           ;; confidentiality required
///     DCDeviceInfo: tstr,
///     DCGuid:       Guid,           ;; modified in TO2
///     DCRVInfo:     RendezvousInfo, ;; modified in TO2
///     DCPubKeyHash: Hash            ;; modified in TO2
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCredential<'a> {
    /// Indicates whether FIDO Device Onboard is active.
    ///
    /// When a device is manufactured, this field is initialized to True, indicating that FIDO
    /// Device Onboard must start when the device is powered on. When the TO2 protocol is
    /// successful, this field is set to False, indicating that FIDO Device Onboard should remain
    /// dormant.
    pub dc_active: bool,
    /// Specifies the protocol version.
    pub dc_prot_ver: Protver,
    /// Contains a secret.
    ///
    /// Initialized with a random value by the Device during the DI protocol or equivalent Device
    /// initialization.
    ///
    /// Requires confidentiality.
    pub dc_hmac_secret: Cow<'a, Bytes>,
    /// Device information.
    ///
    /// Is a text string that is used by the manufacturer to indicate the device type, sufficient to
    /// allow an onboarding procedure or script to be selected by the Owner.
    pub dc_device_info: Cow<'a, str>,
    /// Current device’s GUID.
    ///
    /// To be used for the next ownership transfer.
    ///
    /// Modified in TO2
    pub dc_guid: Guid,
    /// Contains instructions on how to find the Secure Device Onboard Rendezvous Server.
    ///
    /// Modified in TO2
    pub dc_rv_info: RendezvousInfo<'a>,
    /// Is a hash of the manufacturer’s public key, which must match the hash of OwnershipVoucher.OVHeader.OVPubKey
    ///
    /// Modified in TO2
    pub dc_pub_key_hash: Hash<'a>,
}

impl Serialize for DeviceCredential<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            dc_active,
            dc_prot_ver,
            dc_hmac_secret,
            dc_device_info,
            dc_guid,
            dc_rv_info,
            dc_pub_key_hash,
        } = self;

        (
            dc_active,
            dc_prot_ver,
            dc_hmac_secret,
            dc_device_info,
            dc_guid,
            dc_rv_info,
            dc_pub_key_hash,
        )
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DeviceCredential<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (
            dc_active,
            dc_prot_ver,
            dc_hmac_secret,
            dc_device_info,
            dc_guid,
            dc_rv_info,
            dc_pub_key_hash,
        ) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            dc_active,
            dc_prot_ver,
            dc_hmac_secret,
            dc_device_info,
            dc_guid,
            dc_rv_info,
            dc_pub_key_hash,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;

    use crate::utils::Hex;
    use crate::v100::hash_hmac::tests::create_hash;
    use crate::v100::rendezvous_info::tests::create_rv_info;
    use crate::v100::tests::{create_guid, from_hex};
    use crate::v100::PROTOCOL_VERSION;

    use super::*;

    pub(crate) fn create_device_credential() -> DeviceCredential<'static> {
        DeviceCredential {
            dc_active: true,
            dc_prot_ver: PROTOCOL_VERSION,
            // Not a valid secret
            dc_hmac_secret: Cow::Owned(
                from_hex("101112131415161718191a1b1c1d1e1f202122232425262728292a2b2c2d2e2f").into(),
            ),
            dc_device_info: "fdo-astarte".into(),
            dc_guid: create_guid(),
            dc_rv_info: create_rv_info(),
            dc_pub_key_hash: create_hash(),
        }
    }

    #[test]
    fn device_credential_roundtrip() {
        let case = create_device_credential();

        let mut buf = Vec::new();
        ciborium::into_writer(&case, &mut buf).unwrap();

        let res: DeviceCredential = ciborium::from_reader(buf.as_slice()).unwrap();

        assert_eq!(res, case);

        insta::assert_snapshot!(
            Hex::new(&buf),
            @"87f518645820101112131415161718191a1b1c1d1e1f202122232425262728292a2b2c2d2e2f6b66646f2d617374617274655043bc9e0f731a4e7f947c5d03b0c1e4838181820245447f000001820858207424985ee56213b1b0f3699408ac88eae810e6e25596213fc62f1301f96b7d80"
        );
    }
}
