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

//! Owner side of the TO2 protocol.

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::utils::CborBstr;
use astarte_fdo_protocol::v100::cipher::{CipherSuiteNames, Encrypted};
use astarte_fdo_protocol::v100::envelope::{Envelope, ProtocolInfo};
use astarte_fdo_protocol::v100::error::ErrorMessage;
use astarte_fdo_protocol::v100::hash_hmac::HMac;
use astarte_fdo_protocol::v100::ownership_voucher::{OvHeader, OwnershipVoucher};
use astarte_fdo_protocol::v100::public_key::PublicKey;
use astarte_fdo_protocol::v100::service_info::ServiceInfoKv;
use astarte_fdo_protocol::v100::sign_info::{DeviceSgType, EBSigInfo, SigInfo};
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
use astarte_fdo_protocol::v100::to2::prove_ov_hdr::{
    ProveOvHdr, PvOvHdrPayload, PvOvHdrUnprotected,
};
use astarte_fdo_protocol::v100::to2::setup_device::{SetupDevice, SetupDevicePayload};
use astarte_fdo_protocol::v100::{
    Guid, Message, Msgtype, NonceTo2ProveDv, NonceTo2SetupDv, PROTOCOL_VERSION,
};
use astarte_fdo_protocol::Error;
use coset::{CoseSign1Builder, HeaderBuilder};
use tracing::{debug, error, info};

use crate::crypto::{
    device_public_key, same_subject_key, verify_cose_signature, Crypto, EncryptionState, KexParty,
    KexState,
};
use crate::dispatch::{MessagingService, Reply};
use crate::srv_info::{DevmodRecords, ModuleRegistry, ServiceInfoModule, ServiceInfoQueue};
use crate::storage::{OwnerStore, StorageEvents};
use crate::voucher;

use super::{seal, DEFAULT_MTU};

/// Owner side of the TO2 protocol.
///
/// Proves possession of the ownership voucher by streaming its entries to the
/// device, checks the device attestation against the certificate chain, and
/// replaces the voucher with one sealed by the new device HMAC.
pub struct To2Server<'a, C, S> {
    crypto: &'a C,
    store: &'a mut S,
    registry: ModuleRegistry,
    devmod: DevmodRecords,
    state: ServerState,
}

/// Device identity pinned while the voucher entries stream out.
struct DeviceProof {
    guid: Guid,
    device_key: PublicKey<'static>,
    kex: KexState,
    cipher_suite: CipherSuiteNames,
    nonce_to2_prove_dv: NonceTo2ProveDv,
}

/// Session keys and the replacement header after the device proved itself.
struct OwnerSession {
    guid: Guid,
    encryption: EncryptionState,
    nonce_to2_prove_dv: NonceTo2ProveDv,
    nonce_to2_setup_dv: NonceTo2SetupDv,
    replacement: CborBstr<'static, OvHeader<'static>>,
}

enum ServerState {
    Hello,
    Entries {
        next: u8,
        num: u8,
        proof: DeviceProof,
    },
    Prove {
        proof: DeviceProof,
    },
    InfoReady {
        session: OwnerSession,
    },
    Info {
        session: OwnerSession,
        hmac: Option<HMac<'static>>,
        queue: ServiceInfoQueue,
    },
    Done {
        session: OwnerSession,
        hmac: Option<HMac<'static>>,
    },
    Complete,
    Failed,
}

impl<'a, C, S> To2Server<'a, C, S>
where
    C: Crypto,
    S: OwnerStore + StorageEvents,
{
    /// Creates the TO2 server for the owner.
    pub fn new(crypto: &'a C, store: &'a mut S) -> Self {
        Self {
            crypto,
            store,
            registry: ModuleRegistry::new(),
            devmod: DevmodRecords::new(),
            state: ServerState::Hello,
        }
    }

    /// Registers a module receiving the device service info.
    pub fn register_module(&mut self, module: Box<dyn ServiceInfoModule + Send>) {
        self.registry.register(module);
    }

    /// Device description reported during the service info exchange.
    pub fn devmod(&self) -> &DevmodRecords {
        &self.devmod
    }

    fn receive_info(&mut self, service_info: &[ServiceInfoKv<'_>]) -> Result<(), Error> {
        for kv in service_info {
            match kv.key().split_once(':') {
                Some(("devmod", _)) => self.devmod.receive(kv)?,
                _ => self.registry.receive(kv)?,
            }
        }

        Ok(())
    }

    fn process(&mut self, req: &Envelope) -> Result<Reply, Error> {
        if req.msg_type() == ErrorMessage::MSG_TYPE {
            return Err(Error::new(ErrorKind::Message, "onboarding failed"));
        }

        let state = std::mem::replace(&mut self.state, ServerState::Failed);

        match (state, req.msg_type()) {
            (ServerState::Hello, HelloDevice::MSG_TYPE) => {
                self.store.starting(req)?;

                let hello = req.decode_body::<HelloDevice>()?;

                let mut reply = self.hello_device(&hello)?;

                self.store.started(req, &mut reply)?;

                Ok(Reply::Message(reply))
            }
            (ServerState::Entries { next, num, proof }, GetOvNextEntry::MSG_TYPE) => {
                self.store.continuing(req)?;

                let request = req.decode_body::<GetOvNextEntry>()?;
                let received = request.num();

                if received != next {
                    return Err(Error::new(
                        ErrorKind::Invalid,
                        format!("voucher entry {received} requested out of order, expected {next}"),
                    ));
                }

                let voucher = self.store.voucher(&proof.guid)?.ok_or(Error::new(
                    ErrorKind::NotFound,
                    "ownership voucher for the device",
                ))?;

                let entry = voucher
                    .entries()
                    .get(usize::from(next))
                    .cloned()
                    .ok_or(Error::new(ErrorKind::NotFound, "the voucher entry"))?;

                let body = OvNextEntry::new(next, entry);
                let mut reply = Envelope::new(&body, ProtocolInfo::new())?;

                self.store.continued(req, &mut reply)?;

                let sent = next + 1;

                self.state = if sent < num {
                    ServerState::Entries {
                        next: sent,
                        num,
                        proof,
                    }
                } else {
                    ServerState::Prove { proof }
                };

                Ok(Reply::Message(reply))
            }
            (ServerState::Prove { proof }, ProveDevice::MSG_TYPE) => {
                self.store.continuing(req)?;

                let prove = req.decode_body::<ProveDevice>()?;

                let mut reply = self.prove_device(proof, &prove)?;

                self.store.continued(req, &mut reply)?;

                Ok(Reply::Message(reply))
            }
            (ServerState::InfoReady { mut session }, DeviceServiceInfoReady::MSG_TYPE) => {
                self.store.continuing(req)?;

                let ready = session
                    .encryption
                    .open(req.decode_body::<Encrypted<DeviceServiceInfoReady<'static>>>()?)?;

                let hmac = ready.replacement_hmac().cloned();

                if hmac.is_none() {
                    info!(guid = %session.guid, "TO2.DeviceServiceInfoReady credential reuse");
                }

                let mut queue = ServiceInfoQueue::new(DEFAULT_MTU);

                if let Some(max) = ready.max_size() {
                    queue.set_mtu(max);
                }

                for kv in self.store.service_info(&session.guid)? {
                    queue.push(kv);
                }

                let owner_ready = OwnerServiceInfoReady::new(self.store.max_message_size());
                let mut reply = seal(&mut session.encryption, &owner_ready)?;

                self.store.continued(req, &mut reply)?;

                self.state = ServerState::Info {
                    session,
                    hmac,
                    queue,
                };

                Ok(Reply::Message(reply))
            }
            (
                ServerState::Info {
                    mut session,
                    hmac,
                    mut queue,
                },
                DeviceServiceInfo::MSG_TYPE,
            ) => {
                self.store.continuing(req)?;

                let device_info = session
                    .encryption
                    .open(req.decode_body::<Encrypted<DeviceServiceInfo<'static>>>()?)?;

                self.receive_info(device_info.service_info())?;

                // wait with empty messages until the device sent everything
                let (mut reply, state) = if device_info.is_more() {
                    let wait = OwnerServiceInfo {
                        is_more_service_info: false,
                        is_done: false,
                        service_info: Vec::new(),
                    };

                    let reply = seal(&mut session.encryption, &wait)?;

                    (
                        reply,
                        ServerState::Info {
                            session,
                            hmac,
                            queue,
                        },
                    )
                } else {
                    let (service_info, is_more) = queue.drain()?;

                    let info = OwnerServiceInfo {
                        is_more_service_info: is_more,
                        is_done: !is_more,
                        service_info,
                    };

                    let reply = seal(&mut session.encryption, &info)?;

                    if is_more {
                        (
                            reply,
                            ServerState::Info {
                                session,
                                hmac,
                                queue,
                            },
                        )
                    } else {
                        info!(guid = %session.guid, "TO2.OwnerServiceInfo done");

                        (reply, ServerState::Done { session, hmac })
                    }
                };

                self.store.continued(req, &mut reply)?;

                self.state = state;

                Ok(Reply::Message(reply))
            }
            (ServerState::Done { mut session, hmac }, Done::MSG_TYPE) => {
                self.store.continuing(req)?;

                let done = session
                    .encryption
                    .open(req.decode_body::<Encrypted<Done>>()?)?;

                if done.nonce() != session.nonce_to2_prove_dv {
                    return Err(Error::new(ErrorKind::Invalid, "nonce echo in the done"));
                }

                match hmac {
                    Some(hmac) => self.replace_voucher(&session, hmac)?,
                    None => info!(guid = %session.guid, "TO2.Done, credential reused"),
                }

                let done2 = Done2::new(session.nonce_to2_setup_dv);
                let mut reply = seal(&mut session.encryption, &done2)?;

                self.store.continued(req, &mut reply)?;
                self.store.completed();

                self.state = ServerState::Complete;

                Ok(Reply::Final(reply))
            }
            (_, msg_type) => Err(Error::new(
                ErrorKind::Invalid,
                format!("out of order message {msg_type}"),
            )),
        }
    }

    /// Builds the signed voucher header proof for the device.
    fn hello_device(&mut self, hello: &HelloDevice<'_>) -> Result<Envelope, Error> {
        let sg_type = hello.e_a_sig_info().0.sg_type();

        if !matches!(
            sg_type,
            DeviceSgType::StSecP256R1 | DeviceSgType::StSecP384R1
        ) {
            return Err(Error::new(ErrorKind::Unsupported, "device signature type"));
        }

        let guid = hello.guid();

        let voucher = self.store.voucher(&guid)?.ok_or_else(|| {
            debug!(%guid, "no voucher for the device");

            Error::new(ErrorKind::NotFound, "ownership voucher for the device")
        })?;

        let num = u8::try_from(voucher.num_entries())
            .map_err(|_| Error::new(ErrorKind::OutOfRange, "number of voucher entries"))?;

        let chain = voucher.dev_cert_chain().ok_or(Error::new(
            ErrorKind::Unsupported,
            "voucher without a device certificate chain",
        ))?;

        let device_key = device_public_key(chain)?;

        // the chain must end on the key this owner holds
        let chain_owner = voucher::verify(self.crypto, voucher)?;

        let owner_key = self.store.owner_key();
        let own_der = owner_key.public_key_der()?;

        let claimed = chain_owner.key().ok_or(Error::new(
            ErrorKind::Unsupported,
            "public key encoding without key bytes",
        ))?;

        if !same_subject_key(claimed, &own_der)? {
            return Err(Error::new(
                ErrorKind::Invalid,
                "voucher owned by another key",
            ));
        }

        let kex = self.crypto.kex_begin(hello.kex_suite_name(), KexParty::Owner)?;
        let nonce_to2_prove_dv = NonceTo2ProveDv(self.crypto.nonce16()?);

        let payload = PvOvHdrPayload {
            ov_header: voucher.header_tag().clone(),
            num_ov_entries: num,
            hmac: voucher.header_hmac().clone(),
            nonce_to2_prove_ov: hello.nonce(),
            e_b_sig_info: EBSigInfo(SigInfo::new(sg_type)),
            x_a_key_exchange: kex.xa()?,
        };

        let mut buf = Vec::new();
        ciborium::into_writer(&payload, &mut buf).map_err(|err| {
            error!(error = %err, "couldn't encode the proof payload");

            Error::new(ErrorKind::Encode, "TO2.ProveOvHdr payload")
        })?;

        let unprotected =
            PvOvHdrUnprotected::new(nonce_to2_prove_dv, owner_key.public_key()?).to_header()?;

        let protected = HeaderBuilder::new()
            .algorithm(owner_key.cose_algorithm())
            .build();

        let sign = CoseSign1Builder::new()
            .protected(protected)
            .unprotected(unprotected)
            .payload(buf)
            .try_create_signature(&[], |bytes| owner_key.sign(bytes))?
            .build();

        let prove = ProveOvHdr::new(sign);
        let reply = Envelope::new(&prove, ProtocolInfo::new())?;

        info!(%guid, entries = num, "TO2.ProveOvHdr");

        let proof = DeviceProof {
            guid,
            device_key,
            kex,
            cipher_suite: hello.cipher_suite_name(),
            nonce_to2_prove_dv,
        };

        self.state = if num > 0 {
            ServerState::Entries {
                next: 0,
                num,
                proof,
            }
        } else {
            ServerState::Prove { proof }
        };

        Ok(reply)
    }

    /// Checks the device attestation and builds the setup message.
    fn prove_device(&mut self, proof: DeviceProof, prove: &ProveDevice) -> Result<Envelope, Error> {
        let DeviceProof {
            guid,
            device_key,
            kex,
            cipher_suite,
            nonce_to2_prove_dv,
        } = proof;

        verify_cose_signature(&device_key, prove.sign())?;

        let payload = prove.payload()?;

        if payload.nonce() != nonce_to2_prove_dv.0 {
            return Err(Error::new(ErrorKind::Invalid, "nonce echo in the token"));
        }

        let eat_guid = payload.guid()?;

        if eat_guid != guid {
            error!(%guid, "token attests another device");

            return Err(Error::new(ErrorKind::Guid, "in the token"));
        }

        let nonce_to2_setup_dv = prove.euph_nonce()?;

        let device = ProveDevicePayload::from_eat(&payload)?;

        let sh_se = self
            .crypto
            .kex_finish(kex, device.xb_key_exchange().as_ref())?;
        let mut encryption = self.crypto.derive_session_keys(cipher_suite, &sh_se)?;

        let replacement = self.store.replacement(&guid)?;

        let owner2_key = self.store.owner2_key();
        let owner2 = owner2_key.public_key()?;

        let voucher = self.store.voucher(&guid)?.ok_or(Error::new(
            ErrorKind::NotFound,
            "ownership voucher for the device",
        ))?;

        let header = voucher.header();

        let new_guid = replacement.guid.unwrap_or(guid);
        let rendezvous = replacement
            .rendezvous
            .unwrap_or_else(|| header.ov_rv_info.clone());

        // the device derives its HMAC over these exact header bytes
        let replacement_header = OvHeader {
            ovh_prot_ver: PROTOCOL_VERSION,
            ov_guid: new_guid,
            ov_rv_info: rendezvous.clone(),
            ov_device_info: header.ov_device_info.clone(),
            ov_pub_key: owner2.clone(),
            ov_dev_cert_chain_hash: header.ov_dev_cert_chain_hash.clone(),
        };

        let payload = SetupDevicePayload::new(rendezvous, new_guid, nonce_to2_setup_dv, owner2);

        let mut buf = Vec::new();
        ciborium::into_writer(&payload, &mut buf).map_err(|err| {
            error!(error = %err, "couldn't encode the setup payload");

            Error::new(ErrorKind::Encode, "TO2.SetupDevice payload")
        })?;

        let protected = HeaderBuilder::new()
            .algorithm(owner2_key.cose_algorithm())
            .build();

        let sign = CoseSign1Builder::new()
            .protected(protected)
            .payload(buf)
            .try_create_signature(&[], |bytes| owner2_key.sign(bytes))?
            .build();

        let setup = SetupDevice::new(sign);
        let reply = seal(&mut encryption, &setup)?;

        info!(%guid, %new_guid, "TO2.SetupDevice");

        self.state = ServerState::InfoReady {
            session: OwnerSession {
                guid,
                encryption,
                nonce_to2_prove_dv,
                nonce_to2_setup_dv,
                replacement: CborBstr::new(replacement_header),
            },
        };

        Ok(reply)
    }

    /// Stores the replacement voucher sealed by the device HMAC.
    ///
    /// The new voucher keeps the device certificate chain and starts with an
    /// empty entry list, ready to be extended for the next transfer.
    fn replace_voucher(&mut self, session: &OwnerSession, hmac: HMac<'static>) -> Result<(), Error> {
        let chain = self
            .store
            .voucher(&session.guid)?
            .and_then(|voucher| voucher.dev_cert_chain().cloned());

        let voucher = OwnershipVoucher::new(session.replacement.clone(), hmac, chain);
        let new_guid = voucher.header().ov_guid;

        self.store.replace_voucher(&session.guid, voucher)?;

        info!(guid = %session.guid, %new_guid, "TO2.Done, voucher replaced");

        Ok(())
    }
}

impl<C, S> MessagingService for To2Server<'_, C, S>
where
    C: Crypto,
    S: OwnerStore + StorageEvents,
{
    fn accepts(&self, msg_type: Msgtype) -> bool {
        msg_type == HelloDevice::MSG_TYPE
            || msg_type == GetOvNextEntry::MSG_TYPE
            || msg_type == ProveDevice::MSG_TYPE
            || msg_type == DeviceServiceInfoReady::MSG_TYPE
            || msg_type == DeviceServiceInfo::MSG_TYPE
            || msg_type == Done::MSG_TYPE
            || msg_type == ErrorMessage::MSG_TYPE
    }

    fn dispatch(&mut self, req: &Envelope) -> Result<Reply, Error> {
        self.process(req).inspect_err(|_| {
            self.state = ServerState::Failed;
            self.store.failed();
        })
    }
}

impl<C, S> std::fmt::Debug for To2Server<'_, C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            ServerState::Hello => "Hello",
            ServerState::Entries { .. } => "Entries",
            ServerState::Prove { .. } => "Prove",
            ServerState::InfoReady { .. } => "InfoReady",
            ServerState::Info { .. } => "Info",
            ServerState::Done { .. } => "Done",
            ServerState::Complete => "Complete",
            ServerState::Failed => "Failed",
        };

        f.debug_struct("To2Server")
            .field("devmod", &self.devmod)
            .field("state", &state)
            .finish_non_exhaustive()
    }
}
