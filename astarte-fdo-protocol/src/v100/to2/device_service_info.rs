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

//! Device Service info, Type 68
//!
//! From Device ROE to Owner Onboarding Service.
//!
//! Message Format - after decryption and verification:
//!
//! ```cddl
//! TO2.DeviceServiceInfo = [
//!     IsMoreServiceInfo,   ;; more ServiceInfo to come
//!     ServiceInfo          ;; service info entries
//! ]
//! IsMoreServiceInfo = bool
//! ```
//! Sends as many Device to Owner ServiceInfo entries as will conveniently fit into a message, based
//! on protocol and Device constraints. This message is part of a loop with TO2.OwnerServiceInfo.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::v100::service_info::ServiceInfo;
use crate::v100::{ClientMessage, Message, Msgtype};
use crate::Error;

use super::owner_service_info::OwnerServiceInfo;

/// ```cddl
/// TO2.DeviceServiceInfo = [
///     IsMoreServiceInfo,   ;; more ServiceInfo to come
///     ServiceInfo          ;; service info entries
/// ]
/// IsMoreServiceInfo = bool
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceServiceInfo<'a> {
    pub(crate) is_more_service_info: bool,
    pub(crate) service_info: ServiceInfo<'a>,
}

impl<'a> DeviceServiceInfo<'a> {
    /// Creates the message with the given entries.
    pub fn new(is_more_service_info: bool, service_info: ServiceInfo<'a>) -> Self {
        Self {
            is_more_service_info,
            service_info,
        }
    }

    /// Returns true when the Device has more entries to send.
    pub fn is_more(&self) -> bool {
        self.is_more_service_info
    }

    /// Returns the service info entries.
    pub fn service_info(&self) -> &ServiceInfo<'a> {
        &self.service_info
    }
}

impl Serialize for DeviceServiceInfo<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self {
            is_more_service_info,
            service_info,
        } = self;

        (is_more_service_info, service_info).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DeviceServiceInfo<'_> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (is_more_service_info, service_info) = Deserialize::deserialize(deserializer)?;

        Ok(Self {
            is_more_service_info,
            service_info,
        })
    }
}

impl Message for DeviceServiceInfo<'_> {
    const MSG_TYPE: Msgtype = 68;

    fn decode(buf: &[u8]) -> Result<Self, crate::Error> {
        ciborium::from_reader(buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode TO2.DeviceServiceInfo");

            Error::new(ErrorKind::Decode, "the TO2.DeviceServiceInfo")
        })
    }

    fn encode<W>(&self, write: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        ciborium::into_writer(self, write).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode TO2.DeviceServiceInfo");

            Error::new(ErrorKind::Encode, "the TO2.DeviceServiceInfo")
        })
    }
}

impl ClientMessage for DeviceServiceInfo<'_> {
    type Response<'a> = OwnerServiceInfo<'a>;
}
