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

//! Type to manage [`ServiceInfo`].
//!
//! The ServiceInfo type is a collection of key-value pairs which allows an interaction between the
//! Management Service (on the cloud side) and Management Agent functions (on the Device side),
//! using the FIDO Device Onboard encrypted channel as a transport.
//!
//! See <https://fidoalliance.org/specs/FDO/FIDO-Device-Onboard-RD-v1.0-20201202.html#ServiceInfo>.

use std::borrow::Cow;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_bytes::Bytes;

use crate::error::ErrorKind;
use crate::Error;

/// Default maximum size of a ServiceInfo message when the peer doesn't negotiate one.
pub const DEFAULT_MTU: u16 = 1300;

/// Lower bound for a negotiated ServiceInfo message size.
pub const MIN_MTU: u16 = 256;

/// ```cddl
/// ServiceInfo = [
///     * ServiceInfoKV
/// ]
/// ```
pub type ServiceInfo<'a> = Vec<ServiceInfoKv<'a>>;

/// ```cddl
/// ServiceInfoKV = [
///     ServiceInfoKey: tstr,
///     ServiceInfoVal: any
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInfoKv<'a> {
    pub(crate) service_info_key: Cow<'a, str>,
    pub(crate) service_info_val: ciborium::Value,
}

impl<'a> ServiceInfoKv<'a> {
    /// Creates a service info key value.
    pub fn new(service_info_key: &'a str, service_info_val: ciborium::Value) -> Self {
        Self {
            service_info_key: Cow::Borrowed(service_info_key),
            service_info_val,
        }
    }

    /// Creates a service info key value, encoding the value.
    pub fn with_value(service_info_key: &'a str, value: &impl Serialize) -> Result<Self, Error> {
        let service_info_val = ciborium::Value::serialized(value).map_err(|error| {
            #[cfg(feature = "tracing")]
            tracing::error!(%error, "couldn't encode service info value");

            Error::new(ErrorKind::Encode, "service info value")
        })?;

        Ok(Self {
            service_info_key: Cow::Borrowed(service_info_key),
            service_info_val,
        })
    }

    /// Return the service info key
    pub fn key(&self) -> &str {
        &self.service_info_key
    }

    /// Return the service info value without decoding it
    pub fn raw_value(&self) -> &ciborium::Value {
        &self.service_info_val
    }

    /// Return the service info value
    pub fn value<T>(&self) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        self.service_info_val.deserialized().map_err(|error| {
            #[cfg(feature = "tracing")]
            tracing::error!(%error, "couldn't decode service info value");

            Error::new(ErrorKind::Decode, "service info value")
        })
    }

    /// Size in bytes of this entry once encoded.
    ///
    /// Used to pack entries into a ServiceInfo message without exceeding the negotiated MTU.
    pub fn encoded_len(&self) -> Result<usize, Error> {
        let mut buf = Vec::new();

        ciborium::into_writer(self, &mut buf).map_err(|error| {
            #[cfg(feature = "tracing")]
            tracing::error!(%error, "couldn't encode service info value");

            Error::new(ErrorKind::Encode, "service info value")
        })?;

        Ok(buf.len())
    }

    /// Return an owned instance of the entry.
    pub fn into_owned(self) -> ServiceInfoKv<'static> {
        ServiceInfoKv {
            service_info_key: Cow::Owned(self.service_info_key.into_owned()),
            service_info_val: self.service_info_val,
        }
    }
}

impl Serialize for ServiceInfoKv<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            service_info_key,
            service_info_val,
        } = self;

        (service_info_key, service_info_val).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ServiceInfoKv<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (service_info_key, service_info_val) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            service_info_key,
            service_info_val,
        })
    }
}

/// Device [`ServiceInfo`] devmod Module.
///
/// The “devmod” module implements a set of messages to the FIDO Device Onboard Owner that identify
/// the capabilities of the device.
///
/// All FIDO Device Onboard Owners must implement this module, and FIDO Device Onboard Owner
/// implementations must provide these messages to any module that asks for them. In addition all
/// “devmod” messages are sent by the Device in the first Device ServiceInfo.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Devmod<'a> {
    /// Indicates the module is active. Devmod is required on all devices
    ///
    /// - **Required**
    /// - **CBOR type**: `bool` with value `True`
    Active,
    /// OS name (e.g., Linux)
    ///
    /// - **Required**
    /// - **CBOR type**: `tstr`
    Os(Cow<'a, str>),
    /// Architecture name / instruction set (e.g., X86_64)
    ///
    /// - **Required**
    /// - **CBOR type**: `tstr`
    Arch(Cow<'a, str>),
    /// Version of OS (e.g., “Ubuntu* 16.0.4LTS”)
    ///
    /// - **Required**
    /// - **CBOR type**: `tstr`
    Version(Cow<'a, str>),
    /// Model specifier for this FIDO Device Onboard Device, manufacturer specific
    ///
    /// - **Required**
    /// - **CBOR type**: `tstr`
    Device(Cow<'a, str>),
    /// Serial number for this FIDO Device Onboard Device, manufacturer specific
    ///
    /// - **Optional**
    /// - **CBOR type**: `tstr` or `bstr`
    Sn(Option<StrOrBstr<'a>>),
    /// Filename path separator, between the directory and sub-directory (e.g., ‘/’ or ‘\’)
    ///
    /// - **Optional**
    /// - **CBOR type**: tstr
    Pathsep(Option<Cow<'a, str>>),
    /// Filename separator, that works to make lists of file names (e.g., ‘:’ or ‘;’)
    ///
    /// - **Required**
    /// - **CBOR type**: tstr
    Sep(Cow<'a, str>),
    /// Newline sequence (e.g., a tstr of length 1 containing U+000A; a tstr of length 2 containing
    /// U+000D followed by U+000A)
    ///
    /// - **Optional**
    /// - **CBOR type**: tstr
    Nl(Option<Cow<'a, str>>),
    /// Location of temporary directory, including terminating file separator (e.g., “/tmp”)
    ///
    /// - **Optional**
    /// - **CBOR type**: tstr
    Tmp(Option<Cow<'a, str>>),
    /// Location of suggested installation directory, including terminating file separator (e.g.,
    /// “.” or “/home/fdo” or “c:\Program Files\fdo”)
    ///
    /// - **Optional**
    /// - **CBOR type**: tstr
    Dir(Option<Cow<'a, str>>),
    /// Programming environment (e.g., “bin:java:py3:py2”)
    ///
    /// - **Optional**
    /// - **CBOR type**: tstr
    Progenv(Option<Cow<'a, str>>),
    /// Either the same value as “arch”, or a list of machine formats that can be interpreted by
    /// this device, in preference order, separated by the “sep” value (e.g., “x86:X86_64”)
    ///
    /// - **Required**
    /// - **CBOR type**: tstr
    Bin(Cow<'a, str>),
    /// URL for the Manufacturer Usage Description file that relates to this device
    ///
    /// - **Optional**
    /// - **CBOR type**: tstr
    Mudurl(Option<Cow<'a, str>>),
    /// Number of modules supported by this FIDO Device Onboard Device
    ///
    /// - **Required**
    /// - **CBOR type**: uint
    Nummodules(usize),
    /// Enumerates the modules supported by this FIDO Device Onboard Device.
    ///
    /// The first element is an integer from zero to [`devmod:nummodules`](Devmod::Nummodules). The
    /// second element is the number of module names to return The subsequent elements are module
    /// names. During the initial Device ServiceInfo, the device sends the complete list of modules
    /// to the Owner. If the list is long, it might require more than one ServiceInfo message.
    ///
    /// - **Required**
    /// - **CBOR type**: [uint, uint, tstr1, tstr2, ...]
    Modules(Vec<Cow<'a, str>>),
}

impl Devmod<'_> {
    /// Returns the ServiceInfoKey for the Devmod
    pub fn key(&self) -> &'static str {
        match self {
            Devmod::Active => "devmod:active",
            Devmod::Os(_) => "devmod:os",
            Devmod::Arch(_) => "devmod:arch",
            Devmod::Version(_) => "devmod:version",
            Devmod::Device(_) => "devmod:device",
            Devmod::Sn(_) => "devmod:sn",
            Devmod::Pathsep(_) => "devmod:pathsep",
            Devmod::Sep(_) => "devmod:sep",
            Devmod::Nl(_) => "devmod:nl",
            Devmod::Tmp(_) => "devmod:tmp",
            Devmod::Dir(_) => "devmod:dir",
            Devmod::Progenv(_) => "devmod:progenv",
            Devmod::Bin(_) => "devmod:bin",
            Devmod::Mudurl(_) => "devmod:mudurl",
            Devmod::Nummodules(_) => "devmod:nummodules",
            Devmod::Modules(_) => "devmod:modules",
        }
    }

    /// Returns the entry for this message, or [`None`] when an optional value is absent.
    pub fn to_kv(&self) -> Option<ServiceInfoKv<'static>> {
        let value = match self {
            Devmod::Active => ciborium::Value::Bool(true),
            Devmod::Os(s)
            | Devmod::Arch(s)
            | Devmod::Version(s)
            | Devmod::Device(s)
            | Devmod::Sep(s)
            | Devmod::Bin(s) => ciborium::Value::Text(s.to_string()),
            Devmod::Sn(sn) => match sn.as_ref()? {
                StrOrBstr::Str(s) => ciborium::Value::Text(s.to_string()),
                StrOrBstr::Bstr(b) => ciborium::Value::Bytes(b.to_vec()),
            },
            Devmod::Pathsep(s)
            | Devmod::Nl(s)
            | Devmod::Tmp(s)
            | Devmod::Dir(s)
            | Devmod::Progenv(s)
            | Devmod::Mudurl(s) => ciborium::Value::Text(s.as_ref()?.to_string()),
            Devmod::Nummodules(n) => ciborium::Value::from(*n as u64),
            Devmod::Modules(modules) => {
                let mut array = vec![
                    ciborium::Value::from(0u64),
                    ciborium::Value::from(modules.len() as u64),
                ];
                array.extend(modules.iter().map(|m| ciborium::Value::Text(m.to_string())));

                ciborium::Value::Array(array)
            }
        };

        Some(ServiceInfoKv {
            service_info_key: Cow::Borrowed(self.key()),
            service_info_val: value,
        })
    }
}

/// Either `tstr` or `bstr`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StrOrBstr<'a> {
    /// A `tstr`
    Str(Cow<'a, str>),
    /// A `bstr`
    Bstr(Cow<'a, Bytes>),
}
