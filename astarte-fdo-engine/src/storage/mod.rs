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

//! Traits to store the state each protocol role keeps between sessions.
//!
//! Every role owns its store: the device its credential and key, the
//! manufacturer the vouchers it created, the rendezvous server the redirects
//! registered by owners and the owner the vouchers it will onboard. The
//! [`memory`] module implements them all in memory.

pub mod memory;

use std::time::{Duration, SystemTime};

use astarte_fdo_protocol::v100::device_credentials::DeviceCredential;
use astarte_fdo_protocol::v100::di::custom::MfgInfo;
use astarte_fdo_protocol::v100::envelope::Envelope;
use astarte_fdo_protocol::v100::ownership_voucher::OwnershipVoucher;
use astarte_fdo_protocol::v100::public_key::PublicKey;
use astarte_fdo_protocol::v100::rendezvous_info::RendezvousInfo;
use astarte_fdo_protocol::v100::rv_to2_addr::RvTo2Addr;
use astarte_fdo_protocol::v100::service_info::ServiceInfoKv;
use astarte_fdo_protocol::v100::x509::CoseX509;
use astarte_fdo_protocol::v100::Guid;
use astarte_fdo_protocol::Error;
use coset::CoseSign1;

use crate::crypto::KeyPair;

/// Lifecycle of a server session, seen from its storage.
///
/// All the events default to doing nothing. The in memory servers issue a
/// bearer token in [`StorageEvents::started`] and check its echo in
/// [`StorageEvents::continuing`].
pub trait StorageEvents {
    /// The first message of a session was received.
    fn starting(&mut self, _req: &Envelope) -> Result<(), Error> {
        Ok(())
    }

    /// The reply to the first message is about to be sent.
    fn started(&mut self, _req: &Envelope, _reply: &mut Envelope) -> Result<(), Error> {
        Ok(())
    }

    /// A later message of the session was received.
    fn continuing(&mut self, _req: &Envelope) -> Result<(), Error> {
        Ok(())
    }

    /// The reply to a later message is about to be sent.
    fn continued(&mut self, _req: &Envelope, _reply: &mut Envelope) -> Result<(), Error> {
        Ok(())
    }

    /// The session reached its final message.
    fn completed(&mut self) {}

    /// The session failed.
    fn failed(&mut self) {}
}

/// Device side storage of the device key and credential.
pub trait DeviceStore {
    /// Key pair the device proves its identity with.
    fn key_pair(&self) -> &KeyPair;

    /// Stored credential, when the device was initialized.
    fn credential(&self) -> Result<Option<&DeviceCredential<'static>>, Error>;

    /// Persists the credential, replacing any previous one.
    fn store_credential(&mut self, credential: DeviceCredential<'static>) -> Result<(), Error>;
}

/// Manufacturer side storage used while initializing devices.
pub trait ManufacturerStore {
    /// Key pair owning freshly initialized devices.
    fn manufacturer_key(&self) -> &KeyPair;

    /// Rendezvous instructions stamped into new voucher headers.
    fn rendezvous_info(&self) -> &RendezvousInfo<'static>;

    /// Device info recorded in the voucher header for a device.
    fn device_info(&self, mfg_info: &MfgInfo<'_>) -> String;

    /// Issues the certificate chain for the device CSR.
    fn issue_device_certs(&self, csr: &[u8], serial_no: &str)
        -> Result<CoseX509<'static>, Error>;

    /// Persists the voucher of an initialized device.
    fn store_voucher(
        &mut self,
        serial_no: &str,
        voucher: OwnershipVoucher<'static>,
    ) -> Result<(), Error>;

    /// Voucher of an initialized device.
    fn voucher_by_serial(
        &self,
        serial_no: &str,
    ) -> Result<Option<&OwnershipVoucher<'static>>, Error>;
}

/// Rendezvous server storage of the redirects registered by owners.
pub trait RendezvousStore {
    /// Longest wait an owner registration may ask for.
    fn max_wait_seconds(&self) -> u32;

    /// Stores the redirect for a device, replacing any previous one.
    fn store_redirect(&mut self, guid: Guid, redirect: RedirectEntry) -> Result<(), Error>;

    /// Redirect stored for the device, when present and not expired.
    fn redirect(&self, guid: &Guid) -> Result<Option<&RedirectEntry>, Error>;
}

/// Owner onboarding service storage.
pub trait OwnerStore {
    /// Key pair of the current owner.
    fn owner_key(&self) -> &KeyPair;

    /// Key pair owning the device after onboarding.
    ///
    /// The current one when the policy doesn't rotate the owner key.
    fn owner2_key(&self) -> &KeyPair;

    /// Addresses the device should contact for the transfer of ownership.
    fn to2_addresses(&self) -> &RvTo2Addr<'static>;

    /// Wait seconds asked for when registering with the rendezvous server.
    fn wait_seconds(&self) -> u32;

    /// Maximum service info message size granted to devices.
    fn max_message_size(&self) -> Option<u16>;

    /// Devices waiting to be onboarded.
    fn guids(&self) -> Vec<Guid>;

    /// Voucher of a device.
    fn voucher(&self, guid: &Guid) -> Result<Option<&OwnershipVoucher<'static>>, Error>;

    /// Replaces the voucher of an onboarded device.
    ///
    /// The replacement is stored under the guid of its own header.
    fn replace_voucher(
        &mut self,
        guid: &Guid,
        voucher: OwnershipVoucher<'static>,
    ) -> Result<(), Error>;

    /// Replacement values for the device credential.
    fn replacement(&self, guid: &Guid) -> Result<Replacement, Error>;

    /// Service info payloads pushed to the device.
    fn service_info(&self, guid: &Guid) -> Result<Vec<ServiceInfoKv<'static>>, Error>;
}

/// Values replacing parts of the device credential during onboarding.
///
/// An absent value leaves the current one in place.
#[derive(Debug, Clone, Default)]
pub struct Replacement {
    /// New guid for the device.
    pub guid: Option<Guid>,
    /// New rendezvous instructions.
    pub rendezvous: Option<RendezvousInfo<'static>>,
}

/// Redirect registered by an owner, waiting for its device.
#[derive(Debug, Clone)]
pub struct RedirectEntry {
    to1d: CoseSign1,
    device_key: PublicKey<'static>,
    expires_at: SystemTime,
}

impl RedirectEntry {
    /// Creates a redirect valid for `wait` seconds.
    pub fn new(to1d: CoseSign1, device_key: PublicKey<'static>, wait: u32) -> Self {
        let expires_at = SystemTime::now() + Duration::from_secs(u64::from(wait));

        Self {
            to1d,
            device_key,
            expires_at,
        }
    }

    /// Signed redirect blob returned to the device.
    pub fn to1d(&self) -> &CoseSign1 {
        &self.to1d
    }

    /// Key of the device the redirect was registered for.
    pub fn device_key(&self) -> &PublicKey<'static> {
        &self.device_key
    }

    /// Whether the granted wait has passed.
    pub fn is_expired(&self) -> bool {
        SystemTime::now() > self.expires_at
    }
}
