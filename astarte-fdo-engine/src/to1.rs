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

//! Transfer Ownership Protocol 1 (TO1)
//!
//! The device proves its identity to the Rendezvous Server and obtains the
//! redirect blob (`to1d`) that the owner registered during TO0, pointing it
//! at the addresses to run TO2 against. The proof is an entity attestation
//! token over the server nonce, checked with the device key recorded at
//! registration time.

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::v100::eat_signature::EatPayload;
use astarte_fdo_protocol::v100::envelope::{Envelope, ProtocolInfo};
use astarte_fdo_protocol::v100::error::ErrorMessage;
use astarte_fdo_protocol::v100::public_key::PublicKey;
use astarte_fdo_protocol::v100::sign_info::{DeviceSgType, EASigInfo, EBSigInfo, SigInfo};
use astarte_fdo_protocol::v100::to1::hello_rv::HelloRv;
use astarte_fdo_protocol::v100::to1::hello_rv_ack::HelloRvAck;
use astarte_fdo_protocol::v100::to1::prove_to_rv::ProveToRv;
use astarte_fdo_protocol::v100::to1::rv_redirect::RvRedirect;
use astarte_fdo_protocol::v100::{Guid, Message, Msgtype, NonceTo1Proof};
use astarte_fdo_protocol::Error;
use coset::{CoseSign1, HeaderBuilder};
use tracing::{debug, error, info};

use crate::crypto::{sign_eat, verify_cose_signature, Crypto};
use crate::dispatch::{ClientService, MessagingService, Reply};
use crate::storage::{DeviceStore, RendezvousStore, StorageEvents};

/// Device side of the TO1 protocol.
///
/// Proves the device identity with an attestation token and keeps the
/// received redirect for the TO2 session that follows.
pub struct To1Client<'a, C, S> {
    crypto: &'a C,
    store: &'a S,
    redirect: Option<RvRedirect>,
    state: ClientState,
}

#[derive(Debug)]
enum ClientState {
    Start,
    Prove,
    Complete,
    Failed,
}

impl<'a, C, S> To1Client<'a, C, S>
where
    C: Crypto,
    S: DeviceStore,
{
    /// Creates the client for one redirect lookup.
    pub fn new(crypto: &'a C, store: &'a S) -> Self {
        Self {
            crypto,
            store,
            redirect: None,
            state: ClientState::Start,
        }
    }

    /// Redirect received from the rendezvous server, consuming it.
    pub fn take_redirect(&mut self) -> Option<RvRedirect> {
        self.redirect.take()
    }

    fn credential_guid(&self) -> Result<Guid, Error> {
        let credential = self
            .store
            .credential()?
            .ok_or(Error::new(ErrorKind::NotFound, "device credential"))?;

        if !credential.dc_active {
            return Err(Error::new(ErrorKind::Invalid, "device credential inactive"));
        }

        Ok(credential.dc_guid)
    }

    fn process(&mut self, req: &Envelope) -> Result<Reply, Error> {
        if req.msg_type() == ErrorMessage::MSG_TYPE {
            return Err(Error::new(ErrorKind::Message, "redirect lookup failed"));
        }

        let state = std::mem::replace(&mut self.state, ClientState::Failed);

        match (state, req.msg_type()) {
            (ClientState::Start, HelloRvAck::MSG_TYPE) => {
                let ack = req.decode_body::<HelloRvAck>()?;

                let reply = self.prove(ack.nonce_to1_proof())?;

                self.state = ClientState::Prove;

                Ok(Reply::Message(reply))
            }
            (ClientState::Prove, RvRedirect::MSG_TYPE) => {
                let redirect = req.decode_body::<RvRedirect>()?;

                // check the addresses parse, the signature is only verified
                // against the owner key during TO2
                let payload = redirect.to1d_payload()?;

                debug!(addrs = ?payload.addrs());

                info!("TO1.RvRedirect received");

                self.redirect = Some(redirect);
                self.state = ClientState::Complete;

                Ok(Reply::Done)
            }
            (_, msg_type) => Err(Error::new(
                ErrorKind::Invalid,
                format!("out of order message {msg_type}"),
            )),
        }
    }

    /// Builds `TO1.ProveToRv`, an attestation token over the server nonce.
    fn prove(&mut self, nonce_to1_proof: NonceTo1Proof) -> Result<Envelope, Error> {
        let guid = self.credential_guid()?;

        let payload = EatPayload::new(nonce_to1_proof.0, &guid);

        let token = sign_eat(self.store.key_pair(), &payload, HeaderBuilder::new().build())?;

        let prove = ProveToRv::new(token);

        info!(%guid, "TO1.ProveToRv");

        Envelope::new(&prove, ProtocolInfo::new())
    }
}

impl<C, S> MessagingService for To1Client<'_, C, S>
where
    C: Crypto,
    S: DeviceStore,
{
    fn accepts(&self, msg_type: Msgtype) -> bool {
        msg_type == HelloRvAck::MSG_TYPE
            || msg_type == RvRedirect::MSG_TYPE
            || msg_type == ErrorMessage::MSG_TYPE
    }

    fn dispatch(&mut self, req: &Envelope) -> Result<Reply, Error> {
        self.process(req).inspect_err(|_| {
            self.state = ClientState::Failed;
        })
    }
}

impl<C, S> ClientService for To1Client<'_, C, S>
where
    C: Crypto,
    S: DeviceStore,
{
    fn hello(&mut self) -> Result<Envelope, Error> {
        let guid = self.credential_guid()?;

        let sig_info = EASigInfo(SigInfo::new(self.store.key_pair().sg_type()));

        let hello = HelloRv::new(guid, sig_info);

        info!(%guid, "TO1.HelloRv");

        Envelope::new(&hello, ProtocolInfo::new())
    }
}

impl<C, S> std::fmt::Debug for To1Client<'_, C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("To1Client")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Rendezvous side of the TO1 protocol.
///
/// Looks up the redirect registered for the device, challenges it with a
/// nonce and hands out the redirect once the attestation token verifies
/// with the device key from the registration.
pub struct To1Server<'a, C, S> {
    crypto: &'a C,
    store: &'a mut S,
    state: ServerState,
}

enum ServerState {
    Hello,
    Prove {
        guid: Guid,
        nonce_to1_proof: NonceTo1Proof,
        to1d: CoseSign1,
        device_key: PublicKey<'static>,
    },
    Complete,
    Failed,
}

impl<'a, C, S> To1Server<'a, C, S>
where
    C: Crypto,
    S: RendezvousStore + StorageEvents,
{
    /// Creates the server for one lookup session.
    pub fn new(crypto: &'a C, store: &'a mut S) -> Self {
        Self {
            crypto,
            store,
            state: ServerState::Hello,
        }
    }

    fn process(&mut self, req: &Envelope) -> Result<Reply, Error> {
        if req.msg_type() == ErrorMessage::MSG_TYPE {
            return Err(Error::new(ErrorKind::Message, "redirect lookup failed"));
        }

        let state = std::mem::replace(&mut self.state, ServerState::Failed);

        match (state, req.msg_type()) {
            (ServerState::Hello, HelloRv::MSG_TYPE) => {
                self.store.starting(req)?;

                let hello = req.decode_body::<HelloRv>()?;

                let mut reply = self.hello_rv(&hello)?;

                self.store.started(req, &mut reply)?;

                Ok(Reply::Message(reply))
            }
            (
                ServerState::Prove {
                    guid,
                    nonce_to1_proof,
                    to1d,
                    device_key,
                },
                ProveToRv::MSG_TYPE,
            ) => {
                self.store.continuing(req)?;

                let prove = req.decode_body::<ProveToRv>()?;

                let mut reply =
                    self.prove_to_rv(guid, nonce_to1_proof, to1d, &device_key, &prove)?;

                self.store.continued(req, &mut reply)?;
                self.store.completed();

                Ok(Reply::Final(reply))
            }
            (_, msg_type) => Err(Error::new(
                ErrorKind::Invalid,
                format!("out of order message {msg_type}"),
            )),
        }
    }

    /// Challenges the device after finding its redirect.
    fn hello_rv(&mut self, hello: &HelloRv<'_>) -> Result<Envelope, Error> {
        let sg_type = hello.e_a_sig_info().0.sg_type();

        if !matches!(
            sg_type,
            DeviceSgType::StSecP256R1 | DeviceSgType::StSecP384R1
        ) {
            return Err(Error::new(ErrorKind::Unsupported, "device signature type"));
        }

        let guid = hello.guid();

        let redirect = self.store.redirect(&guid)?.ok_or_else(|| {
            debug!(%guid, "no redirect for the device");

            Error::new(ErrorKind::NotFound, "redirect for the device")
        })?;

        let to1d = redirect.to1d().clone();
        let device_key = redirect.device_key().clone();

        let nonce_to1_proof = NonceTo1Proof(self.crypto.nonce16()?);

        let ack = HelloRvAck::new(nonce_to1_proof, EBSigInfo(SigInfo::new(sg_type)));

        info!(%guid, "TO1.HelloRv accepted");

        let reply = Envelope::new(&ack, ProtocolInfo::new())?;

        self.state = ServerState::Prove {
            guid,
            nonce_to1_proof,
            to1d,
            device_key,
        };

        Ok(reply)
    }

    /// Verifies the attestation token and hands out the redirect.
    fn prove_to_rv(
        &mut self,
        guid: Guid,
        nonce_to1_proof: NonceTo1Proof,
        to1d: CoseSign1,
        device_key: &PublicKey<'static>,
        prove: &ProveToRv,
    ) -> Result<Envelope, Error> {
        verify_cose_signature(device_key, prove.ea_token())?;

        let payload = prove.payload()?;

        if payload.nonce() != nonce_to1_proof.0 {
            return Err(Error::new(ErrorKind::Invalid, "nonce echo in the token"));
        }

        if payload.guid()? != guid {
            error!(%guid, "token attests another device");

            return Err(Error::new(ErrorKind::Guid, "in the token"));
        }

        info!(%guid, "TO1.ProveToRv verified");

        let reply = Envelope::new(&RvRedirect::new(to1d), ProtocolInfo::new())?;

        self.state = ServerState::Complete;

        Ok(reply)
    }
}

impl<C, S> MessagingService for To1Server<'_, C, S>
where
    C: Crypto,
    S: RendezvousStore + StorageEvents,
{
    fn accepts(&self, msg_type: Msgtype) -> bool {
        msg_type == HelloRv::MSG_TYPE
            || msg_type == ProveToRv::MSG_TYPE
            || msg_type == ErrorMessage::MSG_TYPE
    }

    fn dispatch(&mut self, req: &Envelope) -> Result<Reply, Error> {
        self.process(req).inspect_err(|_| {
            self.state = ServerState::Failed;
            self.store.failed();
        })
    }
}

impl<C, S> std::fmt::Debug for To1Server<'_, C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            ServerState::Hello => "Hello",
            ServerState::Prove { .. } => "Prove",
            ServerState::Complete => "Complete",
            ServerState::Failed => "Failed",
        };

        f.debug_struct("To1Server")
            .field("state", &state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use astarte_fdo_protocol::v100::device_credentials::DeviceCredential;
    use astarte_fdo_protocol::v100::hash_hmac::Hashtype;
    use astarte_fdo_protocol::v100::public_key::PkType;
    use astarte_fdo_protocol::v100::PROTOCOL_VERSION;
    use coset::CoseSign1Builder;
    use pretty_assertions::assert_eq;
    use serde_bytes::ByteBuf;

    use crate::crypto::SoftwareCrypto;
    use crate::dispatch::echo_token;
    use crate::storage::memory::{MemoryDeviceStore, MemoryRendezvousStore};
    use crate::storage::RedirectEntry;
    use crate::voucher;

    use super::*;

    fn device_with_credential(crypto: &SoftwareCrypto) -> (MemoryDeviceStore, Guid) {
        let mut store = MemoryDeviceStore::new(PkType::Secp256R1).unwrap();
        let guid = Guid::new([7u8; 16]);

        let pub_key = store.key_pair().public_key().unwrap();
        let mut buf = Vec::new();
        ciborium::into_writer(&pub_key, &mut buf).unwrap();
        let hash = crypto.hash(Hashtype::Sha256, &buf).unwrap();

        let credential = DeviceCredential {
            dc_active: true,
            dc_prot_ver: PROTOCOL_VERSION,
            dc_hmac_secret: Cow::Owned(ByteBuf::from(vec![1u8; 32])),
            dc_device_info: Cow::Borrowed("to1-test-device"),
            dc_guid: guid,
            dc_rv_info: voucher::test::rv_info(),
            dc_pub_key_hash: hash,
        };

        store.store_credential(credential).unwrap();

        (store, guid)
    }

    fn fake_to1d() -> CoseSign1 {
        CoseSign1Builder::new().payload(vec![1, 2, 3]).build()
    }

    #[test]
    fn lookup_redirect_end_to_end() {
        let crypto = SoftwareCrypto::new();

        let (device, guid) = device_with_credential(&crypto);

        let mut rendezvous = MemoryRendezvousStore::new(3600);
        let to1d = fake_to1d();
        rendezvous
            .store_redirect(
                guid,
                RedirectEntry::new(to1d.clone(), device.key_pair().public_key().unwrap(), 600),
            )
            .unwrap();

        let mut client = To1Client::new(&crypto, &device);
        let mut server = To1Server::new(&crypto, &mut rendezvous);

        let hello = client.hello().unwrap();

        let Reply::Message(ack) = server.dispatch(&hello).unwrap() else {
            panic!("expected a reply to HelloRv");
        };

        let Reply::Message(mut prove) = client.dispatch(&ack).unwrap() else {
            panic!("expected a reply to HelloRvAck");
        };

        echo_token(&ack, &mut prove);

        let Reply::Final(redirect) = server.dispatch(&prove).unwrap() else {
            panic!("expected ProveToRv to end the session");
        };

        let Reply::Done = client.dispatch(&redirect).unwrap() else {
            panic!("expected RvRedirect to end the session");
        };

        let received = client.take_redirect().expect("redirect received");

        assert_eq!(*received.to1d(), to1d);
    }

    #[test]
    fn unknown_device_is_not_found() {
        let crypto = SoftwareCrypto::new();

        let (device, _guid) = device_with_credential(&crypto);

        let mut rendezvous = MemoryRendezvousStore::new(3600);

        let mut client = To1Client::new(&crypto, &device);
        let mut server = To1Server::new(&crypto, &mut rendezvous);

        let hello = client.hello().unwrap();

        let err = server.dispatch(&hello).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn token_by_another_key_is_rejected() {
        let crypto = SoftwareCrypto::new();

        let (device, guid) = device_with_credential(&crypto);

        // the redirect was registered for a different device key
        let other = MemoryDeviceStore::new(PkType::Secp256R1).unwrap();

        let mut rendezvous = MemoryRendezvousStore::new(3600);
        rendezvous
            .store_redirect(
                guid,
                RedirectEntry::new(fake_to1d(), other.key_pair().public_key().unwrap(), 600),
            )
            .unwrap();

        let mut client = To1Client::new(&crypto, &device);
        let mut server = To1Server::new(&crypto, &mut rendezvous);

        let hello = client.hello().unwrap();
        let Reply::Message(ack) = server.dispatch(&hello).unwrap() else {
            panic!("expected a reply to HelloRv");
        };
        let Reply::Message(mut prove) = client.dispatch(&ack).unwrap() else {
            panic!("expected a reply to HelloRvAck");
        };

        echo_token(&ack, &mut prove);

        server.dispatch(&prove).unwrap_err();
    }

    #[test]
    fn stale_nonce_is_rejected() {
        let crypto = SoftwareCrypto::new();

        let (device, guid) = device_with_credential(&crypto);

        let mut rendezvous = MemoryRendezvousStore::new(3600);
        rendezvous
            .store_redirect(
                guid,
                RedirectEntry::new(fake_to1d(), device.key_pair().public_key().unwrap(), 600),
            )
            .unwrap();

        let mut client = To1Client::new(&crypto, &device);

        let hello = client.hello().unwrap();

        // the first session issues the nonce, the proof goes to a second one
        let ack = {
            let mut first = To1Server::new(&crypto, &mut rendezvous);

            let Reply::Message(ack) = first.dispatch(&hello).unwrap() else {
                panic!("expected a reply to HelloRv");
            };

            ack
        };

        let mut second = To1Server::new(&crypto, &mut rendezvous);
        let Reply::Message(reissued) = second.dispatch(&hello).unwrap() else {
            panic!("expected a reply to HelloRv");
        };

        let Reply::Message(mut prove) = client.dispatch(&ack).unwrap() else {
            panic!("expected a reply to HelloRvAck");
        };

        echo_token(&reissued, &mut prove);

        let err = second.dispatch(&prove).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn inactive_credential_refuses_to_start() {
        let crypto = SoftwareCrypto::new();

        let (mut device, _guid) = device_with_credential(&crypto);

        let mut credential = device.credential().unwrap().unwrap().clone();
        credential.dc_active = false;
        device.store_credential(credential).unwrap();

        let mut client = To1Client::new(&crypto, &device);

        let err = client.hello().unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }
}
