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

//! Transfer Ownership Protocol 2 (TO2)
//!
//! The device contacts the owner at the addresses learned during TO1. The
//! owner proves possession of the ownership voucher entry by entry, the
//! device proves its identity with an attestation token, and a key exchange
//! rides on the first messages so the rest of the session travels encrypted.
//! The exchange ends with the device holding a replacement credential and the
//! owner holding a voucher resealed by the device HMAC, unless both sides
//! agree to reuse the credential as it stands.

use astarte_fdo_protocol::v100::envelope::{Envelope, ProtocolInfo};
use astarte_fdo_protocol::v100::Message;
use astarte_fdo_protocol::Error;

use crate::crypto::EncryptionState;

mod client;
mod server;

pub use self::client::To2Client;
pub use self::server::To2Server;

/// Service info message size until the peer grants a larger one.
const DEFAULT_MTU: u16 = 1300;

/// Encrypts a message body for the established session.
fn seal<M>(encryption: &mut EncryptionState, msg: &M) -> Result<Envelope, Error>
where
    M: Message,
{
    let encrypted = encryption.seal(msg)?;

    Envelope::new(&encrypted, ProtocolInfo::new())
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::{Arc, Mutex};

    use astarte_fdo_protocol::error::ErrorKind;
    use astarte_fdo_protocol::utils::Repetition;
    use astarte_fdo_protocol::v100::device_credentials::DeviceCredential;
    use astarte_fdo_protocol::v100::hash_hmac::Hash;
    use astarte_fdo_protocol::v100::public_key::PkType;
    use astarte_fdo_protocol::v100::rendezvous_info::{RendezvousInfo, RendezvousInstr};
    use astarte_fdo_protocol::v100::rv_to2_addr::{RvTo2Addr, RvTo2AddrEntry};
    use astarte_fdo_protocol::v100::service_info::{Devmod, ServiceInfoKv};
    use astarte_fdo_protocol::v100::to1::rv_redirect::RvRedirect;
    use astarte_fdo_protocol::v100::to2::get_ov_next_entry::GetOvNextEntry;
    use astarte_fdo_protocol::v100::{Guid, IpAddress, TransportProtocol, PROTOCOL_VERSION};
    use coset::{CoseSign1Builder, HeaderBuilder};
    use pretty_assertions::assert_eq;
    use serde_bytes::ByteBuf;

    use crate::crypto::{hash_for_key, Crypto, KeyPair, SoftwareCrypto};
    use crate::dispatch::{ClientService, MessagingService, Reply};
    use crate::srv_info::ServiceInfoModule;
    use crate::storage::memory::{MemoryDeviceStore, MemoryOwnerStore};
    use crate::storage::{DeviceStore, OwnerStore};
    use crate::voucher;
    use crate::voucher::test::{chained_voucher, rv_info};

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

    fn devmod() -> Vec<Devmod<'static>> {
        vec![
            Devmod::Active,
            Devmod::Os(Cow::Borrowed("linux")),
            Devmod::Arch(Cow::Borrowed("x86_64")),
            Devmod::Version(Cow::Borrowed("6.1.0")),
            Devmod::Device(Cow::Borrowed("to2-test-device")),
            Devmod::Sep(Cow::Borrowed(":")),
            Devmod::Bin(Cow::Borrowed("x86_64")),
            Devmod::Nummodules(1),
            Devmod::Modules(vec![Cow::Borrowed("wget")]),
        ]
    }

    /// Hash of a key as the device records it in the credential.
    fn key_hash(crypto: &SoftwareCrypto, key: &KeyPair) -> Hash<'static> {
        let pub_key = key.public_key().unwrap();

        let mut buf = Vec::new();
        ciborium::into_writer(&pub_key, &mut buf).unwrap();

        crypto.hash(hash_for_key(&pub_key), &buf).unwrap()
    }

    fn credential_for(
        crypto: &SoftwareCrypto,
        guid: Guid,
        anchor: &KeyPair,
        secret: Vec<u8>,
    ) -> DeviceCredential<'static> {
        DeviceCredential {
            dc_active: true,
            dc_prot_ver: PROTOCOL_VERSION,
            dc_hmac_secret: Cow::Owned(ByteBuf::from(secret)),
            dc_device_info: Cow::Borrowed("voucher-test-device"),
            dc_guid: guid,
            dc_rv_info: rv_info(),
            dc_pub_key_hash: key_hash(crypto, anchor),
        }
    }

    /// Device and owner pair as DI, the voucher extensions and TO0 leave
    /// them, with two intermediate owners in the chain.
    fn onboarded_pair(crypto: &SoftwareCrypto) -> (MemoryDeviceStore, MemoryOwnerStore, Guid) {
        let manufacturer = KeyPair::generate(PkType::Secp256R1).unwrap();
        let intermediate = KeyPair::generate(PkType::Secp256R1).unwrap();

        let mut device = MemoryDeviceStore::new(PkType::Secp256R1).unwrap();
        let mut owner = MemoryOwnerStore::new(PkType::Secp256R1, to2_addrs()).unwrap();

        let secret = vec![9u8; 32];
        let mut voucher = chained_voucher(crypto, &manufacturer, device.key_pair(), &secret);

        voucher::extend(
            crypto,
            &mut voucher,
            &manufacturer,
            &intermediate.public_key().unwrap(),
        )
        .unwrap();
        voucher::extend(
            crypto,
            &mut voucher,
            &intermediate,
            &owner.owner_key().public_key().unwrap(),
        )
        .unwrap();

        let guid = voucher.header().ov_guid;

        device
            .store_credential(credential_for(crypto, guid, &manufacturer, secret))
            .unwrap();
        owner.insert_voucher(voucher);

        (device, owner, guid)
    }

    /// Pair where the owner key is the voucher anchor itself, so the voucher
    /// has no entries and the setup payload matches the stored credential.
    fn reusable_pair(crypto: &SoftwareCrypto) -> (MemoryDeviceStore, MemoryOwnerStore, Guid) {
        let mut device = MemoryDeviceStore::new(PkType::Secp256R1).unwrap();
        let mut owner = MemoryOwnerStore::new(PkType::Secp256R1, to2_addrs()).unwrap();

        let secret = vec![9u8; 32];
        let voucher = chained_voucher(crypto, owner.owner_key(), device.key_pair(), &secret);

        let guid = voucher.header().ov_guid;

        let credential = credential_for(crypto, guid, owner.owner_key(), secret);

        device.store_credential(credential).unwrap();
        owner.insert_voucher(voucher);

        (device, owner, guid)
    }

    /// Redirect blob signed by `key`, as TO0 leaves it with the rendezvous.
    fn signed_redirect(key: &KeyPair) -> RvRedirect {
        let to1d = CoseSign1Builder::new()
            .protected(HeaderBuilder::new().algorithm(key.cose_algorithm()).build())
            .payload(vec![1, 2, 3])
            .try_create_signature(&[], |bytes| key.sign(bytes))
            .unwrap()
            .build();

        RvRedirect::new(to1d)
    }

    /// Runs a session to completion, echoing the bearer token like the
    /// transport does.
    fn onboard(
        client: &mut To2Client<'_, SoftwareCrypto, MemoryDeviceStore>,
        server: &mut To2Server<'_, SoftwareCrypto, MemoryOwnerStore>,
    ) -> Result<(), Error> {
        let mut msg = client.hello()?;
        let mut token: Option<String> = None;

        loop {
            let reply = match server.dispatch(&msg)? {
                Reply::Message(reply) | Reply::Final(reply) => reply,
                Reply::Done => panic!("the server always answers"),
            };

            if let Some(value) = reply.protocol_info().token() {
                token = Some(value.to_string());
            }

            match client.dispatch(&reply)? {
                Reply::Message(mut next) => {
                    if let Some(value) = &token {
                        let mut info = ProtocolInfo::new();
                        info.set_token(value.clone());

                        next.set_protocol_info(info);
                    }

                    msg = next;
                }
                Reply::Done => return Ok(()),
                Reply::Final(_) => panic!("the client never sends a final reply"),
            }
        }
    }

    #[derive(Debug, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl ServiceInfoModule for Recorder {
        fn name(&self) -> &str {
            "wget"
        }

        fn receive(&mut self, info: &ServiceInfoKv<'_>) -> Result<(), Error> {
            self.seen.lock().unwrap().push(info.key().to_string());

            Ok(())
        }
    }

    #[test]
    fn onboard_end_to_end() {
        let crypto = SoftwareCrypto::new();
        let (mut device, mut owner, guid) = onboarded_pair(&crypto);

        let redirect = signed_redirect(owner.owner_key());

        let mut client = To2Client::new(&crypto, &mut device, &devmod());
        client.set_redirect(redirect);

        let mut server = To2Server::new(&crypto, &mut owner);

        onboard(&mut client, &mut server).unwrap();

        drop(client);
        drop(server);

        let credential = device.credential().unwrap().expect("credential stored");

        assert!(!credential.dc_active);
        assert_eq!(credential.dc_guid, guid);

        let voucher = owner.voucher(&guid).unwrap().expect("replacement voucher");

        assert_eq!(voucher.num_entries(), 0);
        assert_eq!(
            voucher.header().ov_pub_key,
            owner.owner_key().public_key().unwrap()
        );

        // the replacement voucher is sealed by the secret the device kept
        crypto
            .verify_hmac(
                voucher.header_hmac(),
                &credential.dc_hmac_secret,
                voucher.header_tag().bytes().unwrap(),
            )
            .unwrap();
    }

    #[test]
    fn zero_entry_voucher_onboards() {
        let crypto = SoftwareCrypto::new();
        let (mut device, mut owner, guid) = reusable_pair(&crypto);

        owner.rotate_guid();

        let mut client = To2Client::new(&crypto, &mut device, &devmod());
        let mut server = To2Server::new(&crypto, &mut owner);

        onboard(&mut client, &mut server).unwrap();

        drop(client);
        drop(server);

        let credential = device.credential().unwrap().expect("credential stored");

        assert!(!credential.dc_active);
        assert_ne!(credential.dc_guid, guid);

        assert!(owner.voucher(&guid).unwrap().is_none());

        let voucher = owner
            .voucher(&credential.dc_guid)
            .unwrap()
            .expect("voucher under the new guid");

        assert_eq!(voucher.header().ov_guid, credential.dc_guid);
    }

    #[test]
    fn credential_reuse_keeps_the_credential() {
        let crypto = SoftwareCrypto::new();
        let (mut device, mut owner, guid) = reusable_pair(&crypto);

        let original = device.credential().unwrap().unwrap().clone();

        let mut client = To2Client::new(&crypto, &mut device, &devmod());
        let mut server = To2Server::new(&crypto, &mut owner);

        onboard(&mut client, &mut server).unwrap();

        drop(client);
        drop(server);

        let credential = device.credential().unwrap().expect("credential kept");

        assert!(credential.dc_active);
        assert_eq!(*credential, original);

        let voucher = owner.voucher(&guid).unwrap().expect("voucher kept");

        assert_eq!(voucher.num_entries(), 0);
    }

    #[test]
    fn rotated_owner_key_lands_in_the_credential() {
        let crypto = SoftwareCrypto::new();
        let (mut device, mut owner, guid) = onboarded_pair(&crypto);

        let owner2 = KeyPair::generate(PkType::Secp256R1).unwrap();
        owner.rotate_owner(owner2);

        let mut client = To2Client::new(&crypto, &mut device, &devmod());
        let mut server = To2Server::new(&crypto, &mut owner);

        onboard(&mut client, &mut server).unwrap();

        drop(client);
        drop(server);

        let credential = device.credential().unwrap().expect("credential stored");

        let owner2 = owner.owner2_key().public_key().unwrap();

        let mut buf = Vec::new();
        ciborium::into_writer(&owner2, &mut buf).unwrap();

        crypto
            .verify_hash(&credential.dc_pub_key_hash, &buf)
            .unwrap();

        let voucher = owner.voucher(&guid).unwrap().expect("replacement voucher");

        assert_eq!(voucher.header().ov_pub_key, owner2);
    }

    #[test]
    fn replacement_rendezvous_reaches_the_device() {
        let crypto = SoftwareCrypto::new();
        let (mut device, mut owner, _guid) = onboarded_pair(&crypto);

        let instr = RendezvousInstr::ip_address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))).unwrap();
        let directive = Repetition::new(vec![instr]).unwrap();
        let replacement: RendezvousInfo<'static> = Repetition::new(vec![directive]).unwrap();

        owner.set_replacement_rendezvous(replacement.clone());

        let mut client = To2Client::new(&crypto, &mut device, &devmod());
        let mut server = To2Server::new(&crypto, &mut owner);

        onboard(&mut client, &mut server).unwrap();

        drop(client);
        drop(server);

        let credential = device.credential().unwrap().expect("credential stored");

        assert_eq!(credential.dc_rv_info, replacement);
    }

    #[test]
    fn service_info_reaches_both_sides() {
        let crypto = SoftwareCrypto::new();
        let (mut device, mut owner, _guid) = onboarded_pair(&crypto);

        owner.push_service_info(ServiceInfoKv::with_value("wget:active", &true).unwrap());
        owner.push_service_info(
            ServiceInfoKv::with_value("wget:url", &"http://localhost/setup.sh").unwrap(),
        );

        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut client = To2Client::new(&crypto, &mut device, &devmod());
        client.register_module(Box::new(Recorder {
            seen: Arc::clone(&seen),
        }));

        let mut server = To2Server::new(&crypto, &mut owner);

        onboard(&mut client, &mut server).unwrap();

        let devmod = server.devmod();

        assert_eq!(devmod.os(), Some("linux"));
        assert_eq!(devmod.device(), Some("to2-test-device"));
        assert_eq!(devmod.modules(), ["wget"]);

        assert_eq!(*seen.lock().unwrap(), ["wget:active", "wget:url"]);
    }

    #[test]
    fn owner_service_info_is_batched() {
        let crypto = SoftwareCrypto::new();
        let (mut device, mut owner, _guid) = onboarded_pair(&crypto);

        // over the default message size, forcing more than one round
        let long = "a".repeat(900);

        owner.push_service_info(ServiceInfoKv::with_value("wget:active", &true).unwrap());
        owner.push_service_info(ServiceInfoKv::with_value("wget:one", &long).unwrap());
        owner.push_service_info(ServiceInfoKv::with_value("wget:two", &long).unwrap());

        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut client = To2Client::new(&crypto, &mut device, &devmod());
        client.register_module(Box::new(Recorder {
            seen: Arc::clone(&seen),
        }));

        let mut server = To2Server::new(&crypto, &mut owner);

        onboard(&mut client, &mut server).unwrap();

        assert_eq!(*seen.lock().unwrap(), ["wget:active", "wget:one", "wget:two"]);
    }

    #[test]
    fn unknown_voucher_is_not_found() {
        let crypto = SoftwareCrypto::new();
        let (mut device, _owner, _guid) = onboarded_pair(&crypto);

        // an owner that was never handed the voucher
        let mut other = MemoryOwnerStore::new(PkType::Secp256R1, to2_addrs()).unwrap();

        let mut client = To2Client::new(&crypto, &mut device, &devmod());
        let mut server = To2Server::new(&crypto, &mut other);

        let hello = client.hello().unwrap();
        let err = server.dispatch(&hello).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn wrong_device_key_is_rejected() {
        let crypto = SoftwareCrypto::new();

        let manufacturer = KeyPair::generate(PkType::Secp256R1).unwrap();
        let impostor = KeyPair::generate(PkType::Secp256R1).unwrap();

        let mut device = MemoryDeviceStore::new(PkType::Secp256R1).unwrap();
        let mut owner = MemoryOwnerStore::new(PkType::Secp256R1, to2_addrs()).unwrap();

        let secret = vec![9u8; 32];

        // the voucher certifies another device key
        let mut voucher = chained_voucher(&crypto, &manufacturer, &impostor, &secret);

        voucher::extend(
            &crypto,
            &mut voucher,
            &manufacturer,
            &owner.owner_key().public_key().unwrap(),
        )
        .unwrap();

        let guid = voucher.header().ov_guid;

        device
            .store_credential(credential_for(&crypto, guid, &manufacturer, secret))
            .unwrap();
        owner.insert_voucher(voucher);

        let mut client = To2Client::new(&crypto, &mut device, &devmod());
        let mut server = To2Server::new(&crypto, &mut owner);

        onboard(&mut client, &mut server).unwrap_err();
    }

    #[test]
    fn tampered_credential_secret_is_rejected() {
        let crypto = SoftwareCrypto::new();
        let (mut device, mut owner, _guid) = onboarded_pair(&crypto);

        let mut credential = device.credential().unwrap().unwrap().clone();
        credential.dc_hmac_secret = Cow::Owned(ByteBuf::from(vec![0xAA; 32]));
        device.store_credential(credential).unwrap();

        let mut client = To2Client::new(&crypto, &mut device, &devmod());
        let mut server = To2Server::new(&crypto, &mut owner);

        let err = onboard(&mut client, &mut server).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn redirect_by_another_key_is_rejected() {
        let crypto = SoftwareCrypto::new();
        let (mut device, mut owner, _guid) = onboarded_pair(&crypto);

        let impostor = KeyPair::generate(PkType::Secp256R1).unwrap();

        let mut client = To2Client::new(&crypto, &mut device, &devmod());
        client.set_redirect(signed_redirect(&impostor));

        let mut server = To2Server::new(&crypto, &mut owner);

        onboard(&mut client, &mut server).unwrap_err();
    }

    #[test]
    fn stale_proof_nonce_is_rejected() {
        let crypto = SoftwareCrypto::new();
        let (mut device, mut owner, _guid) = onboarded_pair(&crypto);

        let mut client = To2Client::new(&crypto, &mut device, &devmod());
        let mut server = To2Server::new(&crypto, &mut owner);

        let hello = client.hello().unwrap();

        let proof = match server.dispatch(&hello).unwrap() {
            Reply::Message(reply) => reply,
            _ => panic!("the proof continues the session"),
        };

        // a second hello draws a fresh nonce, the old proof echoes the first
        client.hello().unwrap();

        let err = client.dispatch(&proof).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn out_of_order_message_is_rejected() {
        let crypto = SoftwareCrypto::new();
        let (_device, mut owner, _guid) = onboarded_pair(&crypto);

        let mut server = To2Server::new(&crypto, &mut owner);

        let req = Envelope::new(&GetOvNextEntry::new(0), ProtocolInfo::new()).unwrap();
        let err = server.dispatch(&req).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn inactive_credential_refuses_to_start() {
        let crypto = SoftwareCrypto::new();
        let (mut device, _owner, _guid) = onboarded_pair(&crypto);

        let mut credential = device.credential().unwrap().unwrap().clone();
        credential.dc_active = false;
        device.store_credential(credential).unwrap();

        let mut client = To2Client::new(&crypto, &mut device, &devmod());

        let err = client.hello().unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }
}
