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

//! Device side of the TO2 protocol.

use std::borrow::Cow;

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::utils::CborBstr;
use astarte_fdo_protocol::v100::cipher::{CipherSuiteNames, Encrypted};
use astarte_fdo_protocol::v100::device_credentials::DeviceCredential;
use astarte_fdo_protocol::v100::eat_signature::{EatPayload, EUPH_NONCE};
use astarte_fdo_protocol::v100::envelope::{Envelope, ProtocolInfo};
use astarte_fdo_protocol::v100::error::ErrorMessage;
use astarte_fdo_protocol::v100::hash_hmac::HMac;
use astarte_fdo_protocol::v100::key_exchange::{KexSuitNames, XAKeyExchange};
use astarte_fdo_protocol::v100::ownership_voucher::OvHeader;
use astarte_fdo_protocol::v100::public_key::PublicKey;
use astarte_fdo_protocol::v100::service_info::{Devmod, ServiceInfoKv};
use astarte_fdo_protocol::v100::sign_info::{EASigInfo, SigInfo};
use astarte_fdo_protocol::v100::to1::rv_redirect::RvRedirect;
use astarte_fdo_protocol::v100::to2::device_service_info::DeviceServiceInfo;
use astarte_fdo_protocol::v100::to2::device_service_info_ready::DeviceServiceInfoReady;
use astarte_fdo_protocol::v100::to2::done::Done;
use astarte_fdo_protocol::v100::to2::done2::Done2;
use astarte_fdo_protocol::v100::to2::get_ov_next_entry::GetOvNextEntry;
use astarte_fdo_protocol::v100::to2::hello_device::HelloDevice;
use astarte_fdo_protocol::v100::to2::ov_next_entry::OvNextEntry;
use astarte_fdo_protocol::v100::to2::owner_service_info::OwnerServiceInfo;
use astarte_fdo_protocol::v100::to2::owner_service_info_ready::OwnerServiceInfoReady;
use astarte_fdo_protocol::v100::to2::prove_device::{ProveDevice, ProveDevicePayload};
use astarte_fdo_protocol::v100::to2::prove_ov_hdr::ProveOvHdr;
use astarte_fdo_protocol::v100::to2::setup_device::{SetupDevice, SetupDevicePayload};
use astarte_fdo_protocol::v100::{
    Message, Msgtype, NonceTo2ProveDv, NonceTo2ProveOv, NonceTo2SetupDv, PROTOCOL_VERSION,
};
use astarte_fdo_protocol::Error;
use coset::HeaderBuilder;
use serde_bytes::ByteBuf;
use tracing::{error, info};

use crate::crypto::{
    hash_for_key, hmac_for_key, sign_eat, verify_cose_signature, Crypto, EncryptionState, KexParty,
};
use crate::di::HMAC_SECRET_LEN;
use crate::dispatch::{ClientService, MessagingService, Reply};
use crate::srv_info::{devmod_info, ModuleRegistry, ServiceInfoModule, ServiceInfoQueue};
use crate::storage::DeviceStore;
use crate::voucher::ChainWalk;

use super::{seal, DEFAULT_MTU};

/// Device side of the TO2 protocol.
///
/// Walks the voucher chain the owner sends entry by entry, proves the device
/// identity with an attestation token that completes the key exchange, and
/// stores the replacement credential once the owner confirms with
/// TO2.Done2.
pub struct To2Client<'a, C, S> {
    crypto: &'a C,
    store: &'a mut S,
    redirect: Option<RvRedirect>,
    kex_suite: KexSuitNames,
    cipher_suite: CipherSuiteNames,
    queue: ServiceInfoQueue,
    registry: ModuleRegistry,
    state: ClientState,
}

/// Values from TO2.ProveOVHdr that outlive the entry walk.
struct OwnerProof {
    nonce_to2_prove_dv: NonceTo2ProveDv,
    owner_key: PublicKey<'static>,
    xa_key_exchange: XAKeyExchange<'static>,
    header: CborBstr<'static, OvHeader<'static>>,
}

/// Session keys and nonces once the device proved itself.
struct ClientSession {
    encryption: EncryptionState,
    nonce_to2_prove_dv: NonceTo2ProveDv,
    nonce_to2_setup_dv: NonceTo2SetupDv,
    pending: Option<DeviceCredential<'static>>,
}

enum ClientState {
    Start,
    Hello {
        nonce_to2_prove_ov: NonceTo2ProveOv,
    },
    Entries {
        walk: ChainWalk,
        next: u8,
        num: u8,
        proof: OwnerProof,
    },
    Setup {
        encryption: EncryptionState,
        nonce_to2_prove_dv: NonceTo2ProveDv,
        nonce_to2_setup_dv: NonceTo2SetupDv,
        header: CborBstr<'static, OvHeader<'static>>,
    },
    InfoReady {
        session: ClientSession,
    },
    Info {
        session: ClientSession,
    },
    Done {
        session: ClientSession,
    },
    Complete,
    Failed,
}

impl<'a, C, S> To2Client<'a, C, S>
where
    C: Crypto,
    S: DeviceStore,
{
    /// Creates the TO2 client advertising the given devmod values.
    pub fn new(crypto: &'a C, store: &'a mut S, devmod: &[Devmod<'_>]) -> Self {
        let mut queue = ServiceInfoQueue::new(DEFAULT_MTU);

        for kv in devmod_info(devmod) {
            queue.push(kv);
        }

        Self {
            crypto,
            store,
            redirect: None,
            kex_suite: KexSuitNames::ECDH256,
            cipher_suite: CipherSuiteNames::Aes128CtrHmacSha256,
            queue,
            registry: ModuleRegistry::new(),
            state: ClientState::Start,
        }
    }

    /// Pins the owner to the redirect obtained from the rendezvous.
    ///
    /// The owner must prove it signed the blob with the same key that closes
    /// the voucher chain, on top of owning the voucher itself.
    pub fn set_redirect(&mut self, redirect: RvRedirect) {
        self.redirect = Some(redirect);
    }

    /// Selects the key exchange and cipher suites offered in the hello.
    pub fn set_suites(&mut self, kex_suite: KexSuitNames, cipher_suite: CipherSuiteNames) {
        self.kex_suite = kex_suite;
        self.cipher_suite = cipher_suite;
    }

    /// Registers a module receiving the owner service info.
    pub fn register_module(&mut self, module: Box<dyn ServiceInfoModule + Send>) {
        self.registry.register(module);
    }

    /// Queues a pair to send during the service info exchange.
    pub fn push_service_info(&mut self, kv: ServiceInfoKv<'static>) {
        self.queue.push(kv);
    }

    fn credential(&self) -> Result<&DeviceCredential<'static>, Error> {
        let credential = self
            .store
            .credential()?
            .ok_or(Error::new(ErrorKind::NotFound, "device credential"))?;

        if !credential.dc_active {
            return Err(Error::new(ErrorKind::Invalid, "device credential inactive"));
        }

        Ok(credential)
    }

    fn process(&mut self, req: &Envelope) -> Result<Reply, Error> {
        if req.msg_type() == ErrorMessage::MSG_TYPE {
            return Err(Error::new(ErrorKind::Message, "onboarding failed"));
        }

        let state = std::mem::replace(&mut self.state, ClientState::Failed);

        match (state, req.msg_type()) {
            (ClientState::Hello { nonce_to2_prove_ov }, ProveOvHdr::MSG_TYPE) => {
                let prove = req.decode_body::<ProveOvHdr>()?;

                let reply = self.prove_ov_hdr(&prove, nonce_to2_prove_ov)?;

                Ok(Reply::Message(reply))
            }
            (
                ClientState::Entries {
                    mut walk,
                    next,
                    num,
                    proof,
                },
                OvNextEntry::MSG_TYPE,
            ) => {
                let entry = req.decode_body::<OvNextEntry>()?;
                let received = entry.num();

                if received != next {
                    return Err(Error::new(
                        ErrorKind::Invalid,
                        format!("voucher entry {received} out of order, expected {next}"),
                    ));
                }

                walk.step(self.crypto, entry.ov_entry())?;

                let sent = next + 1;

                if sent < num {
                    let request = GetOvNextEntry::new(sent);
                    let reply = Envelope::new(&request, ProtocolInfo::new())?;

                    self.state = ClientState::Entries {
                        walk,
                        next: sent,
                        num,
                        proof,
                    };

                    return Ok(Reply::Message(reply));
                }

                // the last entry must land on the key that signed the proof
                walk.finish(&proof.owner_key)?;

                let reply = self.prove_device(proof)?;

                Ok(Reply::Message(reply))
            }
            (
                ClientState::Setup {
                    mut encryption,
                    nonce_to2_prove_dv,
                    nonce_to2_setup_dv,
                    header,
                },
                SetupDevice::MSG_TYPE,
            ) => {
                let setup = encryption.open(req.decode_body::<Encrypted<SetupDevice>>()?)?;

                let payload = setup.payload()?;

                verify_cose_signature(payload.ow_pubkey(), setup.sign())?;

                if *payload.nonce() != nonce_to2_setup_dv {
                    return Err(Error::new(ErrorKind::Invalid, "nonce echo in the setup"));
                }

                let (hmac, pending) = self.replacement_credential(&header, &payload)?;

                let ready = DeviceServiceInfoReady::new(hmac, None);
                let reply = seal(&mut encryption, &ready)?;

                self.state = ClientState::InfoReady {
                    session: ClientSession {
                        encryption,
                        nonce_to2_prove_dv,
                        nonce_to2_setup_dv,
                        pending,
                    },
                };

                Ok(Reply::Message(reply))
            }
            (ClientState::InfoReady { mut session }, OwnerServiceInfoReady::MSG_TYPE) => {
                let ready = session
                    .encryption
                    .open(req.decode_body::<Encrypted<OwnerServiceInfoReady>>()?)?;

                if let Some(max) = ready.max_size() {
                    self.queue.set_mtu(max);
                }

                let (service_info, is_more) = self.queue.drain()?;

                let info = DeviceServiceInfo::new(is_more, service_info);
                let reply = seal(&mut session.encryption, &info)?;

                self.state = ClientState::Info { session };

                Ok(Reply::Message(reply))
            }
            (ClientState::Info { mut session }, OwnerServiceInfo::MSG_TYPE) => {
                let owner_info = session
                    .encryption
                    .open(req.decode_body::<Encrypted<OwnerServiceInfo<'static>>>()?)?;

                self.registry.receive_all(&owner_info.service_info)?;

                if owner_info.is_done {
                    let done = Done::new(session.nonce_to2_prove_dv);
                    let reply = seal(&mut session.encryption, &done)?;

                    info!("TO2.Done");

                    self.state = ClientState::Done { session };

                    return Ok(Reply::Message(reply));
                }

                let (service_info, is_more) = self.queue.drain()?;

                let info = DeviceServiceInfo::new(is_more, service_info);
                let reply = seal(&mut session.encryption, &info)?;

                self.state = ClientState::Info { session };

                Ok(Reply::Message(reply))
            }
            (ClientState::Done { session }, Done2::MSG_TYPE) => {
                let done2 = session
                    .encryption
                    .open(req.decode_body::<Encrypted<Done2>>()?)?;

                if done2.nonce() != session.nonce_to2_setup_dv {
                    return Err(Error::new(ErrorKind::Invalid, "nonce echo in the done"));
                }

                match session.pending {
                    Some(pending) => {
                        info!(guid = %pending.dc_guid, "TO2.Done2, new credential stored");

                        self.store.store_credential(pending)?;
                    }
                    None => info!("TO2.Done2, credential reused"),
                }

                self.state = ClientState::Complete;

                Ok(Reply::Done)
            }
            (_, msg_type) => Err(Error::new(
                ErrorKind::Invalid,
                format!("out of order message {msg_type}"),
            )),
        }
    }

    /// Checks the voucher header against the stored credential.
    fn prove_ov_hdr(
        &mut self,
        prove: &ProveOvHdr,
        nonce_to2_prove_ov: NonceTo2ProveOv,
    ) -> Result<Envelope, Error> {
        let unprotected = prove.header()?;

        verify_cose_signature(unprotected.pubkey(), prove.sign())?;

        let payload = prove.payload()?;

        if payload.nonce_to2_prove_ov != nonce_to2_prove_ov {
            return Err(Error::new(ErrorKind::Invalid, "nonce echo in the proof"));
        }

        if payload.ov_header.ovh_prot_ver != PROTOCOL_VERSION {
            return Err(Error::new(ErrorKind::Unsupported, "protocol version"));
        }

        {
            let credential = self.credential()?;

            if payload.ov_header.ov_guid != credential.dc_guid {
                error!(guid = %payload.ov_header.ov_guid, "voucher for another device");

                return Err(Error::new(ErrorKind::Guid, "in the voucher header"));
            }

            self.crypto.verify_hmac(
                &payload.hmac,
                &credential.dc_hmac_secret,
                payload.ov_header.bytes()?,
            )?;

            let mut buf = Vec::new();
            ciborium::into_writer(&payload.ov_header.ov_pub_key, &mut buf).map_err(|err| {
                error!(error = %err, "couldn't encode the manufacturer public key");

                Error::new(ErrorKind::Encode, "ov public key")
            })?;

            // the header must anchor to the manufacturer recorded during DI
            self.crypto.verify_hash(&credential.dc_pub_key_hash, &buf)?;
        }

        if let Some(redirect) = &self.redirect {
            verify_cose_signature(unprotected.pubkey(), redirect.to1d())?;
        }

        let walk = ChainWalk::begin(&payload.ov_header, &payload.hmac)?;

        let num = payload.num_ov_entries;

        let proof = OwnerProof {
            nonce_to2_prove_dv: unprotected.nonce(),
            owner_key: unprotected.pubkey().clone(),
            xa_key_exchange: payload.x_a_key_exchange,
            header: payload.ov_header,
        };

        info!(guid = %proof.header.ov_guid, entries = num, "TO2.ProveOvHdr");

        if num == 0 {
            walk.finish(&proof.owner_key)?;

            return self.prove_device(proof);
        }

        let request = GetOvNextEntry::new(0);
        let reply = Envelope::new(&request, ProtocolInfo::new())?;

        self.state = ClientState::Entries {
            walk,
            next: 0,
            num,
            proof,
        };

        Ok(reply)
    }

    /// Builds the device attestation completing the key exchange.
    fn prove_device(&mut self, proof: OwnerProof) -> Result<Envelope, Error> {
        let OwnerProof {
            nonce_to2_prove_dv,
            xa_key_exchange,
            header,
            ..
        } = proof;

        let kex = self.crypto.kex_begin(self.kex_suite, KexParty::Device)?;
        let xb = kex.xb()?;

        let sh_se = self.crypto.kex_finish(kex, xa_key_exchange.as_ref())?;
        let encryption = self.crypto.derive_session_keys(self.cipher_suite, &sh_se)?;

        let nonce_to2_setup_dv = NonceTo2SetupDv(self.crypto.nonce16()?);

        let guid = header.ov_guid;

        let fdo = ProveDevicePayload::new(xb).to_eat_value()?;
        let payload = EatPayload::new(nonce_to2_prove_dv.0, &guid).with_fdo(fdo);

        let euph = ciborium::Value::serialized(&nonce_to2_setup_dv).map_err(|err| {
            error!(error = %err, "couldn't encode the EUPH nonce");

            Error::new(ErrorKind::Encode, "the EUPHNonce header")
        })?;

        let unprotected = HeaderBuilder::new().value(EUPH_NONCE, euph).build();
        let token = sign_eat(self.store.key_pair(), &payload, unprotected)?;

        let prove = ProveDevice::new(token);
        let reply = Envelope::new(&prove, ProtocolInfo::new())?;

        info!(%guid, "TO2.ProveDevice");

        self.state = ClientState::Setup {
            encryption,
            nonce_to2_prove_dv,
            nonce_to2_setup_dv,
            header,
        };

        Ok(reply)
    }

    /// Derives the replacement credential from the setup payload.
    ///
    /// Returns no HMAC when the owner re-sent the credential the device
    /// already holds, which selects the Credential Reuse protocol.
    fn replacement_credential(
        &self,
        header: &OvHeader<'static>,
        payload: &SetupDevicePayload<'static>,
    ) -> Result<(Option<HMac<'static>>, Option<DeviceCredential<'static>>), Error> {
        let credential = self.credential()?;

        let mut buf = Vec::new();
        ciborium::into_writer(payload.ow_pubkey(), &mut buf).map_err(|err| {
            error!(error = %err, "couldn't encode the owner2 public key");

            Error::new(ErrorKind::Encode, "owner2 public key")
        })?;

        let reused = payload.guid() == credential.dc_guid
            && *payload.rendezvous_info() == credential.dc_rv_info
            && self
                .crypto
                .verify_hash(&credential.dc_pub_key_hash, &buf)
                .is_ok();

        if reused {
            info!(guid = %credential.dc_guid, "TO2.SetupDevice credential reuse");

            return Ok((None, None));
        }

        let mut secret = vec![0u8; HMAC_SECRET_LEN];
        self.crypto.random(&mut secret)?;

        // the owner rebuilds the same header, so the bytes must match
        let replacement = OvHeader {
            ovh_prot_ver: PROTOCOL_VERSION,
            ov_guid: payload.guid(),
            ov_rv_info: payload.rendezvous_info().clone(),
            ov_device_info: header.ov_device_info.clone(),
            ov_pub_key: payload.ow_pubkey().clone(),
            ov_dev_cert_chain_hash: header.ov_dev_cert_chain_hash.clone(),
        };

        let tag = CborBstr::new(replacement);
        let hmac = self
            .crypto
            .hmac(hmac_for_key(payload.ow_pubkey()), &secret, tag.bytes()?)?;

        let pending = DeviceCredential {
            dc_active: false,
            dc_prot_ver: PROTOCOL_VERSION,
            dc_hmac_secret: Cow::Owned(ByteBuf::from(secret)),
            dc_device_info: header.ov_device_info.clone(),
            dc_guid: payload.guid(),
            dc_rv_info: payload.rendezvous_info().clone(),
            dc_pub_key_hash: self.crypto.hash(hash_for_key(payload.ow_pubkey()), &buf)?,
        };

        info!(guid = %pending.dc_guid, "TO2.SetupDevice replacement credential");

        Ok((Some(hmac), Some(pending)))
    }
}

impl<C, S> ClientService for To2Client<'_, C, S>
where
    C: Crypto,
    S: DeviceStore,
{
    fn hello(&mut self) -> Result<Envelope, Error> {
        let credential = self.credential()?;
        let guid = credential.dc_guid;

        let nonce_to2_prove_ov = NonceTo2ProveOv(self.crypto.nonce16()?);

        let hello = HelloDevice::new(
            guid,
            nonce_to2_prove_ov,
            self.kex_suite,
            self.cipher_suite,
            EASigInfo(SigInfo::new(self.store.key_pair().sg_type())),
        );

        let reply = Envelope::new(&hello, ProtocolInfo::new())?;

        info!(%guid, "TO2.HelloDevice");

        self.state = ClientState::Hello { nonce_to2_prove_ov };

        Ok(reply)
    }
}

impl<C, S> MessagingService for To2Client<'_, C, S>
where
    C: Crypto,
    S: DeviceStore,
{
    fn accepts(&self, msg_type: Msgtype) -> bool {
        msg_type == ProveOvHdr::MSG_TYPE
            || msg_type == OvNextEntry::MSG_TYPE
            || msg_type == SetupDevice::MSG_TYPE
            || msg_type == OwnerServiceInfoReady::MSG_TYPE
            || msg_type == OwnerServiceInfo::MSG_TYPE
            || msg_type == Done2::MSG_TYPE
            || msg_type == ErrorMessage::MSG_TYPE
    }

    fn dispatch(&mut self, req: &Envelope) -> Result<Reply, Error> {
        self.process(req).inspect_err(|_| {
            self.state = ClientState::Failed;
        })
    }
}

impl<C, S> std::fmt::Debug for To2Client<'_, C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            ClientState::Start => "Start",
            ClientState::Hello { .. } => "Hello",
            ClientState::Entries { .. } => "Entries",
            ClientState::Setup { .. } => "Setup",
            ClientState::InfoReady { .. } => "InfoReady",
            ClientState::Info { .. } => "Info",
            ClientState::Done { .. } => "Done",
            ClientState::Complete => "Complete",
            ClientState::Failed => "Failed",
        };

        f.debug_struct("To2Client")
            .field("kex_suite", &self.kex_suite)
            .field("cipher_suite", &self.cipher_suite)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}
