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

//! Transfer Ownership Protocol 0 (TO0)
//!
//! The Owner registers its intention to onboard a device with the Rendezvous
//! Server. It proves possession of the ownership voucher and leaves behind a
//! signed redirect blob (`to1d`), which the Rendezvous Server hands to the
//! device during TO1 for as long as the granted wait lasts.

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::utils::CborBstr;
use astarte_fdo_protocol::v100::envelope::{Envelope, ProtocolInfo};
use astarte_fdo_protocol::v100::error::ErrorMessage;
use astarte_fdo_protocol::v100::rv_to2_addr::To1dPayload;
use astarte_fdo_protocol::v100::to0::accept_owner::AcceptOwner;
use astarte_fdo_protocol::v100::to0::hello::Hello;
use astarte_fdo_protocol::v100::to0::hello_ack::HelloAck;
use astarte_fdo_protocol::v100::to0::owner_sign::{OwnerSign, To0d};
use astarte_fdo_protocol::v100::{Guid, Message, Msgtype, NonceTo0Sign};
use astarte_fdo_protocol::Error;
use coset::{CoseSign1Builder, HeaderBuilder};
use tracing::{error, info};

use crate::crypto::{device_public_key, hash_for_key, verify_cose_signature, Crypto};
use crate::dispatch::{ClientService, MessagingService, Reply};
use crate::storage::{OwnerStore, RedirectEntry, RendezvousStore, StorageEvents};
use crate::voucher;

/// Owner side of the TO0 protocol, registering one device.
///
/// Builds the `to1d` redirect blob from the owner addresses, signs it with
/// the owner key and sends it along the full ownership voucher.
pub struct To0Client<'a, C, S> {
    crypto: &'a C,
    store: &'a S,
    guid: Guid,
    granted: Option<u32>,
    state: ClientState,
}

#[derive(Debug)]
enum ClientState {
    Start,
    Accept,
    Complete,
    Failed,
}

impl<'a, C, S> To0Client<'a, C, S>
where
    C: Crypto,
    S: OwnerStore,
{
    /// Creates the client registering the device with the given guid.
    pub fn new(crypto: &'a C, store: &'a S, guid: Guid) -> Self {
        Self {
            crypto,
            store,
            guid,
            granted: None,
            state: ClientState::Start,
        }
    }

    /// Wait granted by the rendezvous server, once the session completed.
    pub fn granted_wait(&self) -> Option<u32> {
        self.granted
    }

    fn process(&mut self, req: &Envelope) -> Result<Reply, Error> {
        if req.msg_type() == ErrorMessage::MSG_TYPE {
            return Err(Error::new(ErrorKind::Message, "owner registration failed"));
        }

        let state = std::mem::replace(&mut self.state, ClientState::Failed);

        match (state, req.msg_type()) {
            (ClientState::Start, HelloAck::MSG_TYPE) => {
                let ack = req.decode_body::<HelloAck>()?;

                let reply = self.owner_sign(ack.nonce_to0_sign())?;

                self.state = ClientState::Accept;

                Ok(Reply::Message(reply))
            }
            (ClientState::Accept, AcceptOwner::MSG_TYPE) => {
                let accept = req.decode_body::<AcceptOwner>()?;

                info!(
                    guid = %self.guid,
                    wait_seconds = accept.wait_seconds(),
                    "TO0.AcceptOwner"
                );

                self.granted = Some(accept.wait_seconds());
                self.state = ClientState::Complete;

                Ok(Reply::Done)
            }
            (_, msg_type) => Err(Error::new(
                ErrorKind::Invalid,
                format!("out of order message {msg_type}"),
            )),
        }
    }

    /// Builds `TO0.OwnerSign` answering the nonce with the signed redirect.
    fn owner_sign(&mut self, nonce_to0_sign: NonceTo0Sign) -> Result<Envelope, Error> {
        let voucher = self.store.voucher(&self.guid)?.ok_or_else(|| {
            error!(guid = %self.guid, "no voucher for the device");

            Error::new(ErrorKind::NotFound, "ownership voucher")
        })?;

        let to0d = To0d::new(voucher.clone(), self.store.wait_seconds(), nonce_to0_sign);
        let to0d = CborBstr::new(to0d);

        let owner_key = self.store.owner_key();
        let hashtype = hash_for_key(&owner_key.public_key()?);

        let to0d_hash = self.crypto.hash(hashtype, to0d.bytes()?)?;

        let payload = To1dPayload::new(self.store.to2_addresses().clone(), to0d_hash);

        let mut payload_buf = Vec::new();
        ciborium::into_writer(&payload, &mut payload_buf).map_err(|err| {
            error!(error = %err, "couldn't encode to1d payload");

            Error::new(ErrorKind::Encode, "to1d payload")
        })?;

        let protected = HeaderBuilder::new()
            .algorithm(owner_key.cose_algorithm())
            .build();

        let to1d = CoseSign1Builder::new()
            .protected(protected)
            .payload(payload_buf)
            .try_create_signature(&[], |bytes| owner_key.sign(bytes))?
            .build();

        let owner_sign = OwnerSign::new(to0d, to1d);

        info!(guid = %self.guid, "TO0.OwnerSign");

        Envelope::new(&owner_sign, ProtocolInfo::new())
    }
}

impl<C, S> MessagingService for To0Client<'_, C, S>
where
    C: Crypto,
    S: OwnerStore,
{
    fn accepts(&self, msg_type: Msgtype) -> bool {
        msg_type == HelloAck::MSG_TYPE
            || msg_type == AcceptOwner::MSG_TYPE
            || msg_type == ErrorMessage::MSG_TYPE
    }

    fn dispatch(&mut self, req: &Envelope) -> Result<Reply, Error> {
        self.process(req).inspect_err(|_| {
            self.state = ClientState::Failed;
        })
    }
}

impl<C, S> ClientService for To0Client<'_, C, S>
where
    C: Crypto,
    S: OwnerStore,
{
    fn hello(&mut self) -> Result<Envelope, Error> {
        info!(guid = %self.guid, "TO0.Hello");

        Envelope::new(&Hello, ProtocolInfo::new())
    }
}

impl<C, S> std::fmt::Debug for To0Client<'_, C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("To0Client")
            .field("guid", &self.guid)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Rendezvous side of the TO0 protocol.
///
/// Accepts a registration after verifying the voucher chain, the `to1d`
/// signature by the voucher owner and the `to0d` hash sealing the two
/// together. The granted wait is capped by the store.
pub struct To0Server<'a, C, S> {
    crypto: &'a C,
    store: &'a mut S,
    state: ServerState,
}

#[derive(Debug)]
enum ServerState {
    Hello,
    OwnerSign { nonce_to0_sign: NonceTo0Sign },
    Complete,
    Failed,
}

impl<'a, C, S> To0Server<'a, C, S>
where
    C: Crypto,
    S: RendezvousStore + StorageEvents,
{
    /// Creates the server for one registration session.
    pub fn new(crypto: &'a C, store: &'a mut S) -> Self {
        Self {
            crypto,
            store,
            state: ServerState::Hello,
        }
    }

    fn process(&mut self, req: &Envelope) -> Result<Reply, Error> {
        if req.msg_type() == ErrorMessage::MSG_TYPE {
            return Err(Error::new(ErrorKind::Message, "owner registration failed"));
        }

        let state = std::mem::replace(&mut self.state, ServerState::Failed);

        match (state, req.msg_type()) {
            (ServerState::Hello, Hello::MSG_TYPE) => {
                self.store.starting(req)?;

                let Hello = req.decode_body::<Hello>()?;

                let nonce_to0_sign = self.crypto.nonce16()?;

                let ack = HelloAck::new(nonce_to0_sign);
                let mut reply = Envelope::new(&ack, ProtocolInfo::new())?;

                self.store.started(req, &mut reply)?;

                self.state = ServerState::OwnerSign { nonce_to0_sign };

                Ok(Reply::Message(reply))
            }
            (ServerState::OwnerSign { nonce_to0_sign }, OwnerSign::MSG_TYPE) => {
                self.store.continuing(req)?;

                let owner_sign = req.decode_body::<OwnerSign>()?;

                let mut reply = self.owner_sign(nonce_to0_sign, &owner_sign)?;

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

    /// Verifies the registration and stores the redirect.
    fn owner_sign(
        &mut self,
        nonce_to0_sign: NonceTo0Sign,
        owner_sign: &OwnerSign<'_>,
    ) -> Result<Envelope, Error> {
        let to0d = owner_sign.to0d();

        if to0d.nonce_to0_sign() != nonce_to0_sign {
            return Err(Error::new(ErrorKind::Invalid, "nonce echo in to0d"));
        }

        let voucher = to0d.voucher();

        // the chain must end at the key that signed to1d
        let owner_key = voucher::verify(self.crypto, voucher)?;

        verify_cose_signature(&owner_key, owner_sign.to1d())?;

        let payload = owner_sign.to1d_payload()?;

        self.crypto.verify_hash(payload.to0d_hash(), to0d.bytes()?)?;

        // the device key proves TO1, vouchers without a chain can't be served
        let chain = voucher.dev_cert_chain().ok_or(Error::new(
            ErrorKind::Unsupported,
            "voucher without a device certificate chain",
        ))?;

        let device_key = device_public_key(chain)?;

        let wait_seconds = to0d.wait_seconds().min(self.store.max_wait_seconds());
        let guid = voucher.header().ov_guid;

        info!(
            %guid,
            wait_seconds,
            entries = voucher.num_entries(),
            "TO0.OwnerSign accepted"
        );

        let redirect = RedirectEntry::new(owner_sign.to1d().clone(), device_key, wait_seconds);

        self.store.store_redirect(guid, redirect)?;

        Envelope::new(&AcceptOwner::new(wait_seconds), ProtocolInfo::new())
    }
}

impl<C, S> MessagingService for To0Server<'_, C, S>
where
    C: Crypto,
    S: RendezvousStore + StorageEvents,
{
    fn accepts(&self, msg_type: Msgtype) -> bool {
        msg_type == Hello::MSG_TYPE
            || msg_type == OwnerSign::MSG_TYPE
            || msg_type == ErrorMessage::MSG_TYPE
    }

    fn dispatch(&mut self, req: &Envelope) -> Result<Reply, Error> {
        self.process(req).inspect_err(|_| {
            self.state = ServerState::Failed;
            self.store.failed();
        })
    }
}

impl<C, S> std::fmt::Debug for To0Server<'_, C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("To0Server")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
