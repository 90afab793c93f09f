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

//! In memory implementations of the storage traits.
//!
//! The server stores also implement [`StorageEvents`] to issue a bearer token
//! on the first reply of a session and require its echo on every later
//! message.

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::utils::Hex;
use astarte_fdo_protocol::v100::device_credentials::DeviceCredential;
use astarte_fdo_protocol::v100::di::custom::MfgInfo;
use astarte_fdo_protocol::v100::envelope::{Envelope, ProtocolInfo};
use astarte_fdo_protocol::v100::ownership_voucher::OwnershipVoucher;
use astarte_fdo_protocol::v100::public_key::PkType;
use astarte_fdo_protocol::v100::rendezvous_info::RendezvousInfo;
use astarte_fdo_protocol::v100::rv_to2_addr::RvTo2Addr;
use astarte_fdo_protocol::v100::service_info::ServiceInfoKv;
use astarte_fdo_protocol::v100::x509::CoseX509;
use astarte_fdo_protocol::v100::Guid;
use astarte_fdo_protocol::Error;
use aws_lc_rs::rand::{SecureRandom, SystemRandom};
use rustc_hash::FxHashMap;
use tracing::error;

use crate::crypto::{DeviceCa, KeyPair};

use super::{
    DeviceStore, ManufacturerStore, OwnerStore, RedirectEntry, RendezvousStore, Replacement,
    StorageEvents,
};

/// Bearer token of the session in progress.
#[derive(Debug)]
struct BearerTokens {
    token: Option<String>,
    rand: SystemRandom,
}

impl BearerTokens {
    fn issue(&mut self, reply: &mut Envelope) -> Result<(), Error> {
        let mut bytes = [0u8; 16];

        self.rand.fill(&mut bytes).map_err(|_| {
            error!("couldn't generate a bearer token");

            Error::new(ErrorKind::Crypto, "to generate a bearer token")
        })?;

        let token = Hex::new(&bytes).to_string();

        let mut info = ProtocolInfo::new();
        info.set_token(token.clone());

        reply.set_protocol_info(info);

        self.token = Some(token);

        Ok(())
    }

    fn check(&self, req: &Envelope) -> Result<(), Error> {
        let expected = self.token.as_deref().ok_or(Error::new(
            ErrorKind::Invalid,
            "session without a bearer token",
        ))?;

        if req.protocol_info().token() != Some(expected) {
            return Err(Error::new(ErrorKind::Invalid, "bearer token mismatch"));
        }

        Ok(())
    }

    fn clear(&mut self) {
        self.token = None;
    }
}

impl Default for BearerTokens {
    fn default() -> Self {
        Self {
            token: None,
            rand: SystemRandom::new(),
        }
    }
}

/// Device key and credential kept in memory.
#[derive(Debug)]
pub struct MemoryDeviceStore {
    key: KeyPair,
    credential: Option<DeviceCredential<'static>>,
}

impl MemoryDeviceStore {
    /// Creates the store with a fresh device key.
    pub fn new(pk_type: PkType) -> Result<Self, Error> {
        let key = KeyPair::generate(pk_type)?;

        Ok(Self {
            key,
            credential: None,
        })
    }
}

impl DeviceStore for MemoryDeviceStore {
    fn key_pair(&self) -> &KeyPair {
        &self.key
    }

    fn credential(&self) -> Result<Option<&DeviceCredential<'static>>, Error> {
        Ok(self.credential.as_ref())
    }

    fn store_credential(&mut self, credential: DeviceCredential<'static>) -> Result<(), Error> {
        self.credential = Some(credential);

        Ok(())
    }
}

/// Manufacturer state kept in memory.
#[derive(Debug)]
pub struct MemoryManufacturerStore {
    key: KeyPair,
    ca: DeviceCa,
    rv_info: RendezvousInfo<'static>,
    vouchers: FxHashMap<Guid, OwnershipVoucher<'static>>,
    serials: FxHashMap<String, Guid>,
    tokens: BearerTokens,
}

impl MemoryManufacturerStore {
    /// Creates the store with a fresh manufacturer key and device CA.
    pub fn new(pk_type: PkType, rv_info: RendezvousInfo<'static>) -> Result<Self, Error> {
        Self::with_key(KeyPair::generate(pk_type)?, rv_info)
    }

    /// Creates the store around an existing manufacturer key.
    pub fn with_key(key: KeyPair, rv_info: RendezvousInfo<'static>) -> Result<Self, Error> {
        let ca = DeviceCa::new("astarte-fdo device ca")?;

        Ok(Self {
            key,
            ca,
            rv_info,
            vouchers: FxHashMap::default(),
            serials: FxHashMap::default(),
            tokens: BearerTokens::default(),
        })
    }
}

impl ManufacturerStore for MemoryManufacturerStore {
    fn manufacturer_key(&self) -> &KeyPair {
        &self.key
    }

    fn rendezvous_info(&self) -> &RendezvousInfo<'static> {
        &self.rv_info
    }

    fn device_info(&self, mfg_info: &MfgInfo<'_>) -> String {
        format!("{} {}", mfg_info.model_no(), mfg_info.serial_no())
    }

    fn issue_device_certs(
        &self,
        csr: &[u8],
        serial_no: &str,
    ) -> Result<CoseX509<'static>, Error> {
        self.ca.issue(csr, serial_no)
    }

    fn store_voucher(
        &mut self,
        serial_no: &str,
        voucher: OwnershipVoucher<'static>,
    ) -> Result<(), Error> {
        let guid = voucher.header().ov_guid;

        self.serials.insert(serial_no.to_string(), guid);
        self.vouchers.insert(guid, voucher);

        Ok(())
    }

    fn voucher_by_serial(
        &self,
        serial_no: &str,
    ) -> Result<Option<&OwnershipVoucher<'static>>, Error> {
        let voucher = self
            .serials
            .get(serial_no)
            .and_then(|guid| self.vouchers.get(guid));

        Ok(voucher)
    }
}

impl StorageEvents for MemoryManufacturerStore {
    fn started(&mut self, _req: &Envelope, reply: &mut Envelope) -> Result<(), Error> {
        self.tokens.issue(reply)
    }

    fn continuing(&mut self, req: &Envelope) -> Result<(), Error> {
        self.tokens.check(req)
    }

    fn completed(&mut self) {
        self.tokens.clear();
    }

    fn failed(&mut self) {
        self.tokens.clear();
    }
}

/// Redirects registered with the rendezvous server, kept in memory.
#[derive(Debug)]
pub struct MemoryRendezvousStore {
    max_wait: u32,
    redirects: FxHashMap<Guid, RedirectEntry>,
    tokens: BearerTokens,
}

impl MemoryRendezvousStore {
    /// Creates the store granting waits up to `max_wait` seconds.
    pub fn new(max_wait: u32) -> Self {
        Self {
            max_wait,
            redirects: FxHashMap::default(),
            tokens: BearerTokens::default(),
        }
    }
}

impl RendezvousStore for MemoryRendezvousStore {
    fn max_wait_seconds(&self) -> u32 {
        self.max_wait
    }

    fn store_redirect(&mut self, guid: Guid, redirect: RedirectEntry) -> Result<(), Error> {
        self.redirects.insert(guid, redirect);

        Ok(())
    }

    fn redirect(&self, guid: &Guid) -> Result<Option<&RedirectEntry>, Error> {
        let redirect = self
            .redirects
            .get(guid)
            .filter(|redirect| !redirect.is_expired());

        Ok(redirect)
    }
}

impl StorageEvents for MemoryRendezvousStore {
    fn started(&mut self, _req: &Envelope, reply: &mut Envelope) -> Result<(), Error> {
        self.tokens.issue(reply)
    }

    fn continuing(&mut self, req: &Envelope) -> Result<(), Error> {
        self.tokens.check(req)
    }

    fn completed(&mut self) {
        self.tokens.clear();
    }

    fn failed(&mut self) {
        self.tokens.clear();
    }
}

/// Owner state kept in memory.
#[derive(Debug)]
pub struct MemoryOwnerStore {
    key: KeyPair,
    owner2: Option<KeyPair>,
    to2_addrs: RvTo2Addr<'static>,
    wait_seconds: u32,
    mtu: Option<u16>,
    rotate_guid: bool,
    replacement_rv: Option<RendezvousInfo<'static>>,
    service_info: Vec<ServiceInfoKv<'static>>,
    vouchers: FxHashMap<Guid, OwnershipVoucher<'static>>,
    rand: SystemRandom,
    tokens: BearerTokens,
}

impl MemoryOwnerStore {
    /// Creates the store with a fresh owner key.
    pub fn new(pk_type: PkType, to2_addrs: RvTo2Addr<'static>) -> Result<Self, Error> {
        Ok(Self::with_key(KeyPair::generate(pk_type)?, to2_addrs))
    }

    /// Creates the store around an existing owner key.
    pub fn with_key(key: KeyPair, to2_addrs: RvTo2Addr<'static>) -> Self {
        Self {
            key,
            owner2: None,
            to2_addrs,
            wait_seconds: 600,
            mtu: None,
            rotate_guid: false,
            replacement_rv: None,
            service_info: Vec::new(),
            vouchers: FxHashMap::default(),
            rand: SystemRandom::new(),
            tokens: BearerTokens::default(),
        }
    }

    /// Adds a voucher handed over by the previous owner.
    pub fn insert_voucher(&mut self, voucher: OwnershipVoucher<'static>) {
        self.vouchers.insert(voucher.header().ov_guid, voucher);
    }

    /// Sets the wait seconds asked for at rendezvous registration.
    pub fn set_wait_seconds(&mut self, secs: u32) {
        self.wait_seconds = secs;
    }

    /// Grants devices a maximum service info message size.
    pub fn set_max_message_size(&mut self, mtu: u16) {
        self.mtu = Some(mtu);
    }

    /// Onboarded devices receive a fresh guid.
    pub fn rotate_guid(&mut self) {
        self.rotate_guid = true;
    }

    /// Onboarded devices are handed over to `key`.
    pub fn rotate_owner(&mut self, key: KeyPair) {
        self.owner2 = Some(key);
    }

    /// Onboarded devices receive new rendezvous instructions.
    pub fn set_replacement_rendezvous(&mut self, rv_info: RendezvousInfo<'static>) {
        self.replacement_rv = Some(rv_info);
    }

    /// Queues a service info payload pushed to every device.
    pub fn push_service_info(&mut self, kv: ServiceInfoKv<'static>) {
        self.service_info.push(kv);
    }
}

impl OwnerStore for MemoryOwnerStore {
    fn owner_key(&self) -> &KeyPair {
        &self.key
    }

    fn owner2_key(&self) -> &KeyPair {
        self.owner2.as_ref().unwrap_or(&self.key)
    }

    fn to2_addresses(&self) -> &RvTo2Addr<'static> {
        &self.to2_addrs
    }

    fn wait_seconds(&self) -> u32 {
        self.wait_seconds
    }

    fn max_message_size(&self) -> Option<u16> {
        self.mtu
    }

    fn guids(&self) -> Vec<Guid> {
        self.vouchers.keys().copied().collect()
    }

    fn voucher(&self, guid: &Guid) -> Result<Option<&OwnershipVoucher<'static>>, Error> {
        Ok(self.vouchers.get(guid))
    }

    fn replace_voucher(
        &mut self,
        guid: &Guid,
        voucher: OwnershipVoucher<'static>,
    ) -> Result<(), Error> {
        self.vouchers.remove(guid);
        self.vouchers.insert(voucher.header().ov_guid, voucher);

        Ok(())
    }

    fn replacement(&self, _guid: &Guid) -> Result<Replacement, Error> {
        let guid = if self.rotate_guid {
            let mut bytes = [0u8; 16];

            self.rand.fill(&mut bytes).map_err(|_| {
                error!("couldn't generate a replacement guid");

                Error::new(ErrorKind::Crypto, "to generate a replacement guid")
            })?;

            Some(Guid::new(bytes))
        } else {
            None
        };

        Ok(Replacement {
            guid,
            rendezvous: self.replacement_rv.clone(),
        })
    }

    fn service_info(&self, _guid: &Guid) -> Result<Vec<ServiceInfoKv<'static>>, Error> {
        Ok(self.service_info.clone())
    }
}

impl StorageEvents for MemoryOwnerStore {
    fn started(&mut self, _req: &Envelope, reply: &mut Envelope) -> Result<(), Error> {
        self.tokens.issue(reply)
    }

    fn continuing(&mut self, req: &Envelope) -> Result<(), Error> {
        self.tokens.check(req)
    }

    fn completed(&mut self) {
        self.tokens.clear();
    }

    fn failed(&mut self) {
        self.tokens.clear();
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use astarte_fdo_protocol::utils::Repetition;
    use astarte_fdo_protocol::v100::di::done::Done;
    use astarte_fdo_protocol::v100::rv_to2_addr::RvTo2AddrEntry;
    use astarte_fdo_protocol::v100::{IpAddress, TransportProtocol};
    use coset::CoseSign1;
    use pretty_assertions::assert_eq;

    use super::*;

    fn to2_addrs() -> RvTo2Addr<'static> {
        let entry = RvTo2AddrEntry::new(
            Some(IpAddress::Ipv4([127, 0, 0, 1].into())),
            None,
            8043,
            TransportProtocol::Tcp,
        );

        Repetition::new(vec![entry]).unwrap()
    }

    #[test]
    fn bearer_token_roundtrip() {
        let mut tokens = BearerTokens::default();

        let mut reply = Envelope::new(&Done, ProtocolInfo::new()).unwrap();
        tokens.issue(&mut reply).unwrap();

        let token = reply.protocol_info().token().unwrap().to_string();

        let mut info = ProtocolInfo::new();
        info.set_token(token);
        let mut req = Envelope::new(&Done, ProtocolInfo::new()).unwrap();
        req.set_protocol_info(info);

        tokens.check(&req).unwrap();

        let other = Envelope::new(&Done, ProtocolInfo::new()).unwrap();
        let err = tokens.check(&other).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Invalid);

        tokens.clear();
        tokens.check(&req).unwrap_err();
    }

    #[test]
    fn redirect_expires_after_the_wait() {
        let mut store = MemoryRendezvousStore::new(600);

        let key = KeyPair::generate(PkType::Secp256R1).unwrap();
        let guid = Guid::new([1u8; 16]);

        let redirect = RedirectEntry::new(CoseSign1::default(), key.public_key().unwrap(), 0);
        store.store_redirect(guid, redirect).unwrap();

        std::thread::sleep(Duration::from_millis(10));

        assert!(store.redirect(&guid).unwrap().is_none());

        let redirect = RedirectEntry::new(CoseSign1::default(), key.public_key().unwrap(), 600);
        store.store_redirect(guid, redirect).unwrap();

        assert!(store.redirect(&guid).unwrap().is_some());
    }

    #[test]
    fn replacement_rotates_the_guid() {
        let mut store = MemoryOwnerStore::new(PkType::Secp256R1, to2_addrs()).unwrap();

        let guid = Guid::new([1u8; 16]);

        let replacement = store.replacement(&guid).unwrap();
        assert_eq!(replacement.guid, None);

        store.rotate_guid();

        let first = store.replacement(&guid).unwrap().guid.unwrap();
        let second = store.replacement(&guid).unwrap().guid.unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn owner2_defaults_to_the_owner_key() {
        let mut store = MemoryOwnerStore::new(PkType::Secp256R1, to2_addrs()).unwrap();

        assert_eq!(
            store.owner_key().public_key().unwrap(),
            store.owner2_key().public_key().unwrap()
        );

        let owner2 = KeyPair::generate(PkType::Secp256R1).unwrap();
        let owner2_pub = owner2.public_key().unwrap();

        store.rotate_owner(owner2);

        assert_eq!(store.owner2_key().public_key().unwrap(), owner2_pub);
    }
}
