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

//! Service info exchanged inside the transfer of ownership.
//!
//! The sending side queues key value pairs in a [`ServiceInfoQueue`] and
//! drains them in batches sized for the negotiated message size. The
//! receiving side routes every pair through a [`ModuleRegistry`] to the
//! module named by the key prefix.

use std::collections::VecDeque;
use std::fmt::Debug;

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::v100::service_info::{Devmod, MIN_MTU, ServiceInfo, ServiceInfoKv};
use astarte_fdo_protocol::Error;
use tracing::{error, trace, warn};

/// Bytes the envelope and the encryption wrapper add around a message.
const MESSAGE_OVERHEAD: usize = 128;

/// Pairs waiting to be sent, drained in batches under the message size.
#[derive(Debug)]
pub struct ServiceInfoQueue {
    queue: VecDeque<ServiceInfoKv<'static>>,
    mtu: u16,
}

impl ServiceInfoQueue {
    /// Creates the queue for the given message size.
    pub fn new(mtu: u16) -> Self {
        Self {
            queue: VecDeque::new(),
            mtu: mtu.max(MIN_MTU),
        }
    }

    /// Applies the message size granted by the peer.
    pub fn set_mtu(&mut self, mtu: u16) {
        self.mtu = mtu.max(MIN_MTU);
    }

    /// Queues a pair.
    pub fn push(&mut self, kv: ServiceInfoKv<'static>) {
        self.queue.push_back(kv);
    }

    /// Whether all the pairs were drained.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Next batch fitting the message size, and whether more pairs remain.
    ///
    /// A single pair longer than the message size is sent alone.
    pub fn drain(&mut self) -> Result<(ServiceInfo<'static>, bool), Error> {
        let budget = usize::from(self.mtu).saturating_sub(MESSAGE_OVERHEAD);

        let mut batch = ServiceInfo::new();
        let mut used = 0;

        loop {
            let len = match self.queue.front() {
                Some(kv) => kv.encoded_len()?,
                None => break,
            };

            if used + len > budget {
                if batch.is_empty() {
                    if let Some(kv) = self.queue.pop_front() {
                        warn!(
                            key = kv.key(),
                            len, "service info entry exceeds the message size"
                        );

                        batch.push(kv);
                    }
                }

                break;
            }

            if let Some(kv) = self.queue.pop_front() {
                used += len;

                batch.push(kv);
            }
        }

        Ok((batch, !self.queue.is_empty()))
    }
}

/// Receives the service info addressed to one module.
pub trait ServiceInfoModule {
    /// Name routing keys to this module, the part of the key before the colon.
    fn name(&self) -> &str;

    /// Receives one pair addressed to this module.
    fn receive(&mut self, info: &ServiceInfoKv<'_>) -> Result<(), Error>;
}

struct Registered {
    active: bool,
    module: Box<dyn ServiceInfoModule + Send>,
}

/// Routes received pairs to the module named by the key prefix.
///
/// A pair for an unknown module is acknowledged and discarded. Modules start
/// inactive and only see pairs once their `active` variable enabled them.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Registered>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module.
    pub fn register(&mut self, module: Box<dyn ServiceInfoModule + Send>) {
        self.modules.push(Registered {
            active: false,
            module,
        });
    }

    /// Routes every pair of a message.
    pub fn receive_all(&mut self, info: &[ServiceInfoKv<'_>]) -> Result<(), Error> {
        for kv in info {
            self.receive(kv)?;
        }

        Ok(())
    }

    /// Routes one pair by its module prefix.
    pub fn receive(&mut self, info: &ServiceInfoKv<'_>) -> Result<(), Error> {
        let Some((name, var)) = info.key().split_once(':') else {
            return Err(Error::new(
                ErrorKind::Invalid,
                "service info key without a module",
            ));
        };

        let Some(entry) = self
            .modules
            .iter_mut()
            .find(|entry| entry.module.name() == name)
        else {
            warn!(key = info.key(), "service info for an unknown module");

            return Ok(());
        };

        if var == "active" {
            entry.active = info.value::<bool>()?;

            return entry.module.receive(info);
        }

        if !entry.active {
            trace!(key = info.key(), "pair for an inactive module");

            return Ok(());
        }

        entry.module.receive(info)
    }
}

impl Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self
            .modules
            .iter()
            .map(|entry| entry.module.name())
            .collect();

        f.debug_struct("ModuleRegistry")
            .field("modules", &names)
            .finish()
    }
}

/// Builds the pairs for the devmod values, in their declaration order.
pub fn devmod_info(devmod: &[Devmod<'_>]) -> ServiceInfo<'static> {
    devmod.iter().filter_map(Devmod::to_kv).collect()
}

/// Device description collected from the devmod pairs.
///
/// Registered by the owner to record what the device reports about itself.
#[derive(Debug, Default)]
pub struct DevmodRecords {
    os: Option<String>,
    arch: Option<String>,
    version: Option<String>,
    device: Option<String>,
    modules: Vec<String>,
}

impl DevmodRecords {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reported operating system.
    pub fn os(&self) -> Option<&str> {
        self.os.as_deref()
    }

    /// Reported architecture.
    pub fn arch(&self) -> Option<&str> {
        self.arch.as_deref()
    }

    /// Reported operating system version.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Reported device model.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Service info modules the device declared.
    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    fn record(slot: &mut Option<String>, info: &ServiceInfoKv<'_>) -> Result<(), Error> {
        let value = info.value::<String>()?;

        if let Some(old) = slot.replace(value) {
            error!(key = info.key(), %old, "devmod value replaced");

            return Err(Error::new(ErrorKind::Invalid, "devmod value replaced"));
        }

        Ok(())
    }
}

impl ServiceInfoModule for DevmodRecords {
    fn name(&self) -> &str {
        "devmod"
    }

    fn receive(&mut self, info: &ServiceInfoKv<'_>) -> Result<(), Error> {
        match info.key() {
            "devmod:active" => {
                if !info.value::<bool>()? {
                    return Err(Error::new(ErrorKind::Invalid, "devmod must stay active"));
                }
            }
            "devmod:os" => Self::record(&mut self.os, info)?,
            "devmod:arch" => Self::record(&mut self.arch, info)?,
            "devmod:version" => Self::record(&mut self.version, info)?,
            "devmod:device" => Self::record(&mut self.device, info)?,
            "devmod:modules" => {
                let ciborium::Value::Array(items) = info.raw_value() else {
                    return Err(Error::new(ErrorKind::Decode, "devmod modules value"));
                };

                // [index, count, names...], possibly split over messages
                let names = items
                    .iter()
                    .skip(2)
                    .map(|item| {
                        item.as_text().map(str::to_string).ok_or(Error::new(
                            ErrorKind::Decode,
                            "devmod module name",
                        ))
                    })
                    .collect::<Result<Vec<_>, Error>>()?;

                self.modules.extend(names);
            }
            key => {
                trace!(key, "unhandled devmod key");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::borrow::Cow;

    use pretty_assertions::assert_eq;

    use super::*;

    fn kv(key: &'static str, value: &str) -> ServiceInfoKv<'static> {
        ServiceInfoKv::with_value(key, &value).unwrap()
    }

    #[test]
    fn drain_batches_under_the_message_size() {
        // budget of 128 bytes with the minimum message size
        let mut queue = ServiceInfoQueue::new(MIN_MTU);

        let value = "x".repeat(100);

        queue.push(kv("test:first", &value));
        queue.push(kv("test:second", &value));
        queue.push(kv("test:third", &value));

        let (batch, more) = queue.drain().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].key(), "test:first");
        assert!(more);

        let (batch, more) = queue.drain().unwrap();
        assert_eq!(batch.len(), 1);
        assert!(more);

        let (batch, more) = queue.drain().unwrap();
        assert_eq!(batch.len(), 1);
        assert!(!more);
        assert!(queue.is_empty());
    }

    #[test]
    fn small_pairs_share_a_batch() {
        let mut queue = ServiceInfoQueue::new(1300);

        for _ in 0..4 {
            queue.push(kv("test:small", "value"));
        }

        let (batch, more) = queue.drain().unwrap();
        assert_eq!(batch.len(), 4);
        assert!(!more);
    }

    #[test]
    fn oversized_pair_is_sent_alone() {
        let mut queue = ServiceInfoQueue::new(MIN_MTU);

        let value = "x".repeat(500);

        queue.push(kv("test:blob", &value));
        queue.push(kv("test:small", "value"));

        let (batch, more) = queue.drain().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].key(), "test:blob");
        assert!(more);

        let (batch, more) = queue.drain().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].key(), "test:small");
        assert!(!more);
    }

    #[derive(Debug, Default)]
    struct Sink {
        seen: Vec<String>,
    }

    impl ServiceInfoModule for Sink {
        fn name(&self) -> &str {
            "test"
        }

        fn receive(&mut self, info: &ServiceInfoKv<'_>) -> Result<(), Error> {
            self.seen.push(info.key().to_string());

            Ok(())
        }
    }

    #[test]
    fn registry_routes_by_module_prefix() {
        let mut registry = ModuleRegistry::new();
        registry.register(Box::new(Sink::default()));

        // inactive module, the pair is dropped
        registry.receive(&kv("test:data", "value")).unwrap();

        registry
            .receive(&ServiceInfoKv::with_value("test:active", &true).unwrap())
            .unwrap();
        registry.receive(&kv("test:data", "value")).unwrap();

        // unknown module, acknowledged and discarded
        registry.receive(&kv("other:data", "value")).unwrap();

        let err = registry.receive(&kv("nocolon", "value")).unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn devmod_records_the_device_description() {
        let devmod = [
            Devmod::Active,
            Devmod::Os(Cow::Borrowed("Linux")),
            Devmod::Arch(Cow::Borrowed("x86_64")),
            Devmod::Version(Cow::Borrowed("6.1")),
            Devmod::Device(Cow::Borrowed("astarte-device")),
            Devmod::Sep(Cow::Borrowed(";")),
            Devmod::Bin(Cow::Borrowed("x86_64")),
            Devmod::Nummodules(1),
            Devmod::Modules(vec![Cow::Borrowed("binaryeq")]),
        ];

        let mut registry = ModuleRegistry::new();
        registry.register(Box::new(DevmodRecords::new()));

        registry.receive_all(&devmod_info(&devmod)).unwrap();

        let err = registry
            .receive(&kv("devmod:os", "Linux"))
            .unwrap_err();
        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn devmod_records_accessors() {
        let mut records = DevmodRecords::new();

        records
            .receive(&ServiceInfoKv::with_value("devmod:active", &true).unwrap())
            .unwrap();
        records.receive(&kv("devmod:os", "Linux")).unwrap();
        records.receive(&kv("devmod:arch", "x86_64")).unwrap();

        let modules =
            ServiceInfoKv::with_value("devmod:modules", &(0, 1, "binaryeq")).unwrap();
        records.receive(&modules).unwrap();

        assert_eq!(records.os(), Some("Linux"));
        assert_eq!(records.arch(), Some("x86_64"));
        assert_eq!(records.modules(), ["binaryeq"]);
    }
}
