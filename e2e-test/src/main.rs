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

use std::borrow::Cow;
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::mpsc;
use std::thread;

use astarte_fdo_engine::crypto::{KeyPair, SoftwareCrypto};
use astarte_fdo_engine::di::{DiClient, DiServer};
use astarte_fdo_engine::dispatch::{
    run_client, ClientService, MessageDispatcher, MessagingService,
};
use astarte_fdo_engine::srv_info::ServiceInfoModule;
use astarte_fdo_engine::storage::memory::{
    MemoryDeviceStore, MemoryManufacturerStore, MemoryOwnerStore, MemoryRendezvousStore,
};
use astarte_fdo_engine::storage::{DeviceStore, ManufacturerStore, OwnerStore};
use astarte_fdo_engine::to0::{To0Client, To0Server};
use astarte_fdo_engine::to1::{To1Client, To1Server};
use astarte_fdo_engine::to2::{To2Client, To2Server};
use astarte_fdo_engine::voucher;
use astarte_fdo_protocol::utils::Repetition;
use astarte_fdo_protocol::v100::public_key::PkType;
use astarte_fdo_protocol::v100::rendezvous_info::{
    RendezvousDirective, RendezvousInfo, RendezvousInstr,
};
use astarte_fdo_protocol::v100::rv_to2_addr::{RvTo2Addr, RvTo2AddrEntry};
use astarte_fdo_protocol::v100::service_info::{Devmod, ServiceInfoKv};
use astarte_fdo_protocol::v100::{IpAddress, TransportProtocol};
use astarte_fdo_protocol::Error;
use clap::Parser;
use eyre::{eyre, WrapErr};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SERIAL: &str = "e626207f-5fcc-456e-b1bc-250c9c8efb47";
const MODEL: &str = "fdo-astarte";

/// Runs the full onboarding flow in process.
///
/// The device is initialized against a manufacturer (DI), the voucher is
/// extended to an owner, the owner registers with a rendezvous server (TO0),
/// the device looks its owner up (TO1) and is onboarded (TO2). Every phase
/// goes through the message dispatch over an in process pipe, with the server
/// on its own thread.
#[derive(Debug, Parser)]
struct Cli {
    /// Serial number the device reports to the manufacturer.
    #[arg(long, default_value = SERIAL)]
    serial_no: String,

    /// Model number the device reports to the manufacturer.
    #[arg(long, default_value = MODEL)]
    model_no: String,

    /// Hands the device a fresh guid while onboarding.
    #[arg(long)]
    rotate_guid: bool,

    /// Hands the device over to a fresh owner key while onboarding.
    #[arg(long)]
    rotate_owner: bool,

    /// Wait seconds the owner asks of the rendezvous server.
    #[arg(long, default_value_t = 600)]
    wait_seconds: u32,
}

fn run(cli: Cli) -> eyre::Result<()> {
    let crypto = SoftwareCrypto::new();

    let mut device = MemoryDeviceStore::new(PkType::Secp256R1)?;
    let mut manufacturer = MemoryManufacturerStore::new(PkType::Secp256R1, rendezvous_info()?)?;
    let mut rendezvous = MemoryRendezvousStore::new(3600);
    let mut owner = MemoryOwnerStore::new(PkType::Secp256R1, to2_addresses()?)?;

    owner.set_wait_seconds(cli.wait_seconds);
    owner.push_service_info(ServiceInfoKv::new(
        "astarte:active",
        ciborium::Value::Bool(true),
    ));
    owner.push_service_info(ServiceInfoKv::new(
        "astarte:pairing_url",
        ciborium::Value::Text("https://api.astarte.localhost/pairing".to_string()),
    ));

    if cli.rotate_guid {
        owner.rotate_guid();
    }

    if cli.rotate_owner {
        owner.rotate_owner(KeyPair::generate(PkType::Secp256R1)?);
    }

    let mut di = DiClient::new(&crypto, &mut device, &cli.model_no, &cli.serial_no);
    session(&mut di, DiServer::new(&crypto, &mut manufacturer))
        .wrap_err("device initialization failed")?;

    let guid = device
        .credential()?
        .ok_or_else(|| eyre!("device credential missing after DI"))?
        .dc_guid;

    info!(%guid, serial_no = cli.serial_no, "device initialized");

    let mut voucher = manufacturer
        .voucher_by_serial(&cli.serial_no)?
        .ok_or_else(|| eyre!("no voucher for serial {}", cli.serial_no))?
        .clone();

    let next_owner = owner.owner_key().public_key()?;
    voucher::extend(
        &crypto,
        &mut voucher,
        manufacturer.manufacturer_key(),
        &next_owner,
    )?;

    info!(
        entries = voucher.num_entries(),
        "voucher extended to the owner"
    );

    owner.insert_voucher(voucher);

    let mut to0 = To0Client::new(&crypto, &owner, guid);
    session(&mut to0, To0Server::new(&crypto, &mut rendezvous))
        .wrap_err("owner registration failed")?;

    let wait = to0
        .granted_wait()
        .ok_or_else(|| eyre!("no wait granted by the rendezvous server"))?;

    info!(wait_seconds = wait, "owner registered with the rendezvous");

    let mut to1 = To1Client::new(&crypto, &device);
    session(&mut to1, To1Server::new(&crypto, &mut rendezvous))
        .wrap_err("redirect lookup failed")?;

    let redirect = to1
        .take_redirect()
        .ok_or_else(|| eyre!("no redirect received from the rendezvous server"))?;

    info!("redirect received from the rendezvous");

    let mut to2 = To2Client::new(&crypto, &mut device, &devmod(&cli.model_no));
    to2.set_redirect(redirect);
    to2.register_module(Box::new(Announcer));

    session(&mut to2, To2Server::new(&crypto, &mut owner)).wrap_err("onboarding failed")?;

    let credential = device
        .credential()?
        .ok_or_else(|| eyre!("device credential missing after TO2"))?;

    info!(
        guid = %credential.dc_guid,
        active = credential.dc_active,
        "device onboarded"
    );

    for guid in owner.guids() {
        info!(%guid, "owner holds the replacement voucher");
    }

    Ok(())
}

fn rendezvous_info() -> eyre::Result<RendezvousInfo<'static>> {
    let instr = RendezvousInstr::ip_address(IpAddr::V4(Ipv4Addr::LOCALHOST))?;
    let directive = RendezvousDirective::new(vec![instr])
        .ok_or_else(|| eyre!("empty rendezvous directive"))?;

    RendezvousInfo::new(vec![directive]).ok_or_else(|| eyre!("empty rendezvous info"))
}

fn to2_addresses() -> eyre::Result<RvTo2Addr<'static>> {
    let entry = RvTo2AddrEntry::new(
        Some(IpAddress::Ipv4([127, 0, 0, 1].into())),
        None,
        8043,
        TransportProtocol::Tcp,
    );

    Repetition::new(vec![entry]).ok_or_else(|| eyre!("empty owner address list"))
}

fn devmod(model_no: &str) -> Vec<Devmod<'_>> {
    vec![
        Devmod::Active,
        Devmod::Os(Cow::Borrowed(std::env::consts::OS)),
        Devmod::Arch(Cow::Borrowed(std::env::consts::ARCH)),
        Devmod::Version(Cow::Borrowed("1.0")),
        Devmod::Device(Cow::Borrowed(model_no)),
        Devmod::Sep(Cow::Borrowed(":")),
        Devmod::Bin(Cow::Borrowed(std::env::consts::ARCH)),
        Devmod::Nummodules(1),
        Devmod::Modules(vec![Cow::Borrowed("astarte")]),
    ]
}

/// Logs the service info pairs the owner pushes to the device.
#[derive(Debug)]
struct Announcer;

impl ServiceInfoModule for Announcer {
    fn name(&self) -> &str {
        "astarte"
    }

    fn receive(&mut self, info: &ServiceInfoKv<'_>) -> Result<(), Error> {
        info!(key = info.key(), "owner service info received");

        Ok(())
    }
}

/// Runs one protocol session, the server on its own thread.
fn session<C, S>(client: &mut C, server: S) -> eyre::Result<()>
where
    C: ClientService + ?Sized,
    S: MessagingService + Send,
{
    let (mut client_tx, mut server_rx) = pipe();
    let (mut server_tx, mut client_rx) = pipe();

    thread::scope(|scope| {
        let handle = scope.spawn(move || {
            let mut dispatcher = MessageDispatcher::new();
            dispatcher.register(Box::new(server));

            dispatcher.run_server(&mut server_rx, &mut server_tx)
        });

        run_client(&mut client_rx, &mut client_tx, client)?;

        handle
            .join()
            .map_err(|_| eyre!("server thread panicked"))?
            .wrap_err("server side of the session failed")
    })
}

/// Write side of an in process byte stream.
struct PipeWriter {
    tx: mpsc::Sender<Vec<u8>>,
}

/// Read side of an in process byte stream.
struct PipeReader {
    rx: mpsc::Receiver<Vec<u8>>,
    buf: Vec<u8>,
    pos: usize,
}

fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel();

    (
        PipeWriter { tx },
        PipeReader {
            rx,
            buf: Vec::new(),
            pos: 0,
        },
    )
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| std::io::Error::from(std::io::ErrorKind::BrokenPipe))?;

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.pos >= self.buf.len() {
            // a closed channel reads as end of stream
            match self.rx.recv() {
                Ok(chunk) => {
                    self.buf = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }

        let n = (self.buf.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;

        Ok(n)
    }
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive("info".parse()?)
                .from_env_lossy(),
        )
        .try_init()?;

    run(cli)
}
