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

//! Device Initialize Protocol (DI)
//!
//! The protocol’s function is to embed the ownership and manufacturing credentials into the newly
//! created device’s ROE. This prepares the device and establishes the first in a chain for creating
//! an Ownership Voucher with which to transfer ownership of the device.

use std::borrow::Cow;

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::utils::CborBstr;
use astarte_fdo_protocol::v100::device_credentials::DeviceCredential;
use astarte_fdo_protocol::v100::di::app_start::AppStart;
use astarte_fdo_protocol::v100::di::custom::MfgInfo;
use astarte_fdo_protocol::v100::di::done::Done;
use astarte_fdo_protocol::v100::di::set_credentials::SetCredentials;
use astarte_fdo_protocol::v100::di::set_hmac::SetHmac;
use astarte_fdo_protocol::v100::envelope::{Envelope, ProtocolInfo};
use astarte_fdo_protocol::v100::error::ErrorMessage;
use astarte_fdo_protocol::v100::hash_hmac::Hash;
use astarte_fdo_protocol::v100::ownership_voucher::{OvHeader, OwnershipVoucher};
use astarte_fdo_protocol::v100::public_key::PublicKey;
use astarte_fdo_protocol::v100::x509::CoseX509;
use astarte_fdo_protocol::v100::{Guid, Message, Msgtype, PROTOCOL_VERSION};
use astarte_fdo_protocol::Error;
use serde_bytes::ByteBuf;
use tracing::{debug, error, info};

use crate::crypto::{hash_for_key, hmac_for_key, Crypto};
use crate::dispatch::{ClientService, MessagingService, Reply};
use crate::storage::{DeviceStore, ManufacturerStore, StorageEvents};

/// Length of the HMAC secret created along the device credential.
pub(crate) const HMAC_SECRET_LEN: usize = 32;

/// Device side of the Device Initialize protocol.
///
/// Sends `DI.AppStart` with the manufacturing info and a CSR for the device
/// key, computes the HMAC sealing the ownership voucher header and persists
/// the resulting [`DeviceCredential`].
pub struct DiClient<'a, C, S> {
    crypto: &'a C,
    store: &'a mut S,
    model_no: String,
    serial_no: String,
    state: ClientState,
}

#[derive(Debug)]
enum ClientState {
    Start,
    Hmac { device_creds: DeviceCredential<'static> },
    Complete,
    Failed,
}

impl<'a, C, S> DiClient<'a, C, S>
where
    C: Crypto,
    S: DeviceStore,
{
    /// Creates the client for one initialization session.
    pub fn new(crypto: &'a C, store: &'a mut S, model_no: &str, serial_no: &str) -> Self {
        Self {
            crypto,
            store,
            model_no: model_no.to_string(),
            serial_no: serial_no.to_string(),
            state: ClientState::Start,
        }
    }

    fn process(&mut self, req: &Envelope) -> Result<Reply, Error> {
        if req.msg_type() == ErrorMessage::MSG_TYPE {
            return Err(Error::new(ErrorKind::Message, "device initialize failed"));
        }

        let state = std::mem::replace(&mut self.state, ClientState::Failed);

        match (state, req.msg_type()) {
            (ClientState::Start, SetCredentials::MSG_TYPE) => {
                let set_creds = req.decode_body::<SetCredentials<'static>>()?;

                let reply = self.set_credentials(set_creds)?;

                Ok(Reply::Message(reply))
            }
            (ClientState::Hmac { device_creds }, Done::MSG_TYPE) => {
                let Done {} = req.decode_body::<Done>()?;

                info!(guid = %device_creds.dc_guid, "DI.Done successful");

                self.store.store_credential(device_creds)?;

                self.state = ClientState::Complete;

                Ok(Reply::Done)
            }
            (_, msg_type) => Err(Error::new(
                ErrorKind::Invalid,
                format!("out of order message {msg_type}"),
            )),
        }
    }

    /// Seals the header with a fresh HMAC secret and keeps the credential
    /// until `DI.Done` confirms it.
    fn set_credentials(&mut self, set_creds: SetCredentials<'static>) -> Result<Envelope, Error> {
        let ov_header = &set_creds.ov_header;

        if ov_header.ovh_prot_ver != PROTOCOL_VERSION {
            return Err(Error::new(ErrorKind::Unsupported, "protocol version"));
        }

        let dc_pub_key_hash = self.owner_key_hash(ov_header)?;

        let mut secret = vec![0u8; HMAC_SECRET_LEN];
        self.crypto.random(&mut secret)?;

        let hmac = self.crypto.hmac(
            hmac_for_key(&ov_header.ov_pub_key),
            &secret,
            set_creds.ov_header.bytes()?,
        )?;

        info!(guid = %ov_header.ov_guid, "DI.SetCredentials successful");

        let device_creds = DeviceCredential {
            dc_active: true,
            dc_prot_ver: PROTOCOL_VERSION,
            dc_hmac_secret: Cow::Owned(ByteBuf::from(secret)),
            dc_device_info: ov_header.ov_device_info.clone(),
            dc_guid: ov_header.ov_guid,
            dc_rv_info: ov_header.ov_rv_info.clone(),
            dc_pub_key_hash,
        };

        let set_hmac = SetHmac { hmac };

        let reply = Envelope::new(&set_hmac, ProtocolInfo::new())?;

        self.state = ClientState::Hmac { device_creds };

        Ok(reply)
    }

    /// Hash of the manufacturer public key, checked against the voucher
    /// header in later protocols.
    fn owner_key_hash(&self, ov_header: &OvHeader<'_>) -> Result<Hash<'static>, Error> {
        let mut buf = Vec::new();

        ciborium::into_writer(&ov_header.ov_pub_key, &mut buf).map_err(|err| {
            error!(error = %err, "couldn't encode ov public key");

            Error::new(ErrorKind::Encode, "ov public key")
        })?;

        self.crypto.hash(hash_for_key(&ov_header.ov_pub_key), &buf)
    }
}

impl<C, S> MessagingService for DiClient<'_, C, S>
where
    C: Crypto,
    S: DeviceStore,
{
    fn accepts(&self, msg_type: Msgtype) -> bool {
        msg_type == SetCredentials::MSG_TYPE
            || msg_type == Done::MSG_TYPE
            || msg_type == ErrorMessage::MSG_TYPE
    }

    fn dispatch(&mut self, req: &Envelope) -> Result<Reply, Error> {
        self.process(req).inspect_err(|_| {
            self.state = ClientState::Failed;
        })
    }
}

impl<C, S> ClientService for DiClient<'_, C, S>
where
    C: Crypto,
    S: DeviceStore,
{
    fn hello(&mut self) -> Result<Envelope, Error> {
        let key_pair = self.store.key_pair();

        let csr = self.crypto.csr(key_pair, &self.model_no)?;

        let device_mfg_info = MfgInfo::new(
            key_pair.pk_type(),
            C::PK_ENC,
            Cow::Owned(ByteBuf::from(csr)),
            Cow::Owned(self.serial_no.clone()),
            Cow::Owned(self.model_no.clone()),
        );

        debug!(?device_mfg_info);

        let app_start = AppStart::new(device_mfg_info);

        info!("DI.AppStart");

        Envelope::new(&app_start, ProtocolInfo::new())
    }
}

impl<C, S> std::fmt::Debug for DiClient<'_, C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiClient")
            .field("model_no", &self.model_no)
            .field("serial_no", &self.serial_no)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Manufacturer side of the Device Initialize protocol.
///
/// Issues the device certificate chain from the CSR in `DI.AppStart`, creates
/// the ownership voucher header and stores the voucher once the device seals
/// it with `DI.SetHmac`.
pub struct DiServer<'a, C, S> {
    crypto: &'a C,
    store: &'a mut S,
    state: ServerState,
}

enum ServerState {
    Hello,
    Hmac {
        serial_no: String,
        header: CborBstr<'static, OvHeader<'static>>,
        dev_cert_chain: CoseX509<'static>,
    },
    Complete,
    Failed,
}

impl<'a, C, S> DiServer<'a, C, S>
where
    C: Crypto,
    S: ManufacturerStore + StorageEvents,
{
    /// Creates the server for one initialization session.
    pub fn new(crypto: &'a C, store: &'a mut S) -> Self {
        Self {
            crypto,
            store,
            state: ServerState::Hello,
        }
    }

    fn process(&mut self, req: &Envelope) -> Result<Reply, Error> {
        if req.msg_type() == ErrorMessage::MSG_TYPE {
            return Err(Error::new(ErrorKind::Message, "device initialize failed"));
        }

        let state = std::mem::replace(&mut self.state, ServerState::Failed);

        match (state, req.msg_type()) {
            (ServerState::Hello, AppStart::<MfgInfo>::MSG_TYPE) => {
                self.store.starting(req)?;

                let app_start = req.decode_body::<AppStart<MfgInfo>>()?;

                let mut reply = self.app_start(&app_start)?;

                self.store.started(req, &mut reply)?;

                Ok(Reply::Message(reply))
            }
            (
                ServerState::Hmac {
                    serial_no,
                    header,
                    dev_cert_chain,
                },
                SetHmac::MSG_TYPE,
            ) => {
                self.store.continuing(req)?;

                let set_hmac = req.decode_body::<SetHmac>()?;

                let mut reply =
                    self.set_hmac(&serial_no, header, dev_cert_chain, set_hmac)?;

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

    /// Builds the ownership voucher header for the device.
    fn app_start(&mut self, app_start: &AppStart<'_, MfgInfo<'_>>) -> Result<Envelope, Error> {
        let mfg_info = app_start.device_mfg_info();

        debug!(?mfg_info);

        if mfg_info.pk_enc() != C::PK_ENC {
            return Err(Error::new(ErrorKind::Unsupported, "public key encoding"));
        }

        let dev_cert_chain = self
            .store
            .issue_device_certs(mfg_info.cert_info(), mfg_info.serial_no())?;

        let mut guid = [0u8; 16];
        self.crypto.random(&mut guid)?;
        let guid = Guid::new(guid);

        let mfg_pub_key = self.store.manufacturer_key().public_key()?;

        let dev_cert_chain_hash = self.cert_chain_hash(&dev_cert_chain, &mfg_pub_key)?;

        let header = OvHeader {
            ovh_prot_ver: PROTOCOL_VERSION,
            ov_guid: guid,
            ov_rv_info: self.store.rendezvous_info().clone(),
            ov_device_info: Cow::Owned(self.store.device_info(mfg_info)),
            ov_pub_key: mfg_pub_key,
            ov_dev_cert_chain_hash: Some(dev_cert_chain_hash),
        };

        info!(%guid, serial_no = mfg_info.serial_no(), "DI.AppStart accepted");

        let header = CborBstr::new(header);

        let set_creds = SetCredentials {
            ov_header: header.clone(),
        };

        let reply = Envelope::new(&set_creds, ProtocolInfo::new())?;

        self.state = ServerState::Hmac {
            serial_no: mfg_info.serial_no().to_string(),
            header,
            dev_cert_chain,
        };

        Ok(reply)
    }

    /// Assembles the voucher with the device HMAC and stores it.
    fn set_hmac(
        &mut self,
        serial_no: &str,
        header: CborBstr<'static, OvHeader<'static>>,
        dev_cert_chain: CoseX509<'static>,
        set_hmac: SetHmac<'_>,
    ) -> Result<Envelope, Error> {
        let hmac = set_hmac.hmac.into_owned();

        let voucher = OwnershipVoucher::new(header, hmac, Some(dev_cert_chain));

        info!(guid = %voucher.header().ov_guid, serial_no, "DI.SetHmac accepted");

        self.store.store_voucher(serial_no, voucher)?;

        let reply = Envelope::new(&Done, ProtocolInfo::new())?;

        self.state = ServerState::Complete;

        Ok(reply)
    }

    fn cert_chain_hash(
        &self,
        chain: &CoseX509<'_>,
        mfg_pub_key: &PublicKey<'_>,
    ) -> Result<Hash<'static>, Error> {
        let mut buf = Vec::new();

        ciborium::into_writer(chain, &mut buf).map_err(|err| {
            error!(error = %err, "couldn't encode device cert chain");

            Error::new(ErrorKind::Encode, "device cert chain")
        })?;

        self.crypto.hash(hash_for_key(mfg_pub_key), &buf)
    }
}

impl<C, S> MessagingService for DiServer<'_, C, S>
where
    C: Crypto,
    S: ManufacturerStore + StorageEvents,
{
    fn accepts(&self, msg_type: Msgtype) -> bool {
        msg_type == AppStart::<MfgInfo>::MSG_TYPE
            || msg_type == SetHmac::MSG_TYPE
            || msg_type == ErrorMessage::MSG_TYPE
    }

    fn dispatch(&mut self, req: &Envelope) -> Result<Reply, Error> {
        self.process(req).inspect_err(|_| {
            self.state = ServerState::Failed;
            self.store.failed();
        })
    }
}

impl<C, S> std::fmt::Debug for DiServer<'_, C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            ServerState::Hello => "Hello",
            ServerState::Hmac { .. } => "Hmac",
            ServerState::Complete => "Complete",
            ServerState::Failed => "Failed",
        };

        f.debug_struct("DiServer")
            .field("state", &state)
            .finish_non_exhaustive()
    }
}
