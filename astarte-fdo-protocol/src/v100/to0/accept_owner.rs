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

//! Completes the TO0 protocol.
//!
//! The Rendezvous Server indicates to the Owner that the registration is accepted and for how
//! long it will be retained. The Owner must renew the registration before WaitSeconds elapses, or
//! the Device will no longer be able to find it.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::v100::{Message, Msgtype};
use crate::Error;

/// ```cddl
/// TO0.AcceptOwner = [
///     WaitSeconds
/// ]
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptOwner {
    pub(crate) wait_seconds: u32,
}

impl AcceptOwner {
    /// Create the accept message with the granted interval.
    pub fn new(wait_seconds: u32) -> Self {
        Self { wait_seconds }
    }

    /// Returns the granted registration interval, in seconds.
    ///
    /// The Rendezvous Server can grant fewer seconds than the Owner requested in the to0d blob.
    pub fn wait_seconds(&self) -> u32 {
        self.wait_seconds
    }
}

impl Serialize for AcceptOwner {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let Self { wait_seconds } = self;

        (wait_seconds,).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AcceptOwner {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let (wait_seconds,) = Deserialize::deserialize(deserializer)?;

        Ok(Self { wait_seconds })
    }
}

impl Message for AcceptOwner {
    const MSG_TYPE: Msgtype = 23;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        ciborium::from_reader(buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode TO0.AcceptOwner");

            Error::new(ErrorKind::Decode, "the TO0.AcceptOwner")
        })
    }

    fn encode<W>(&self, write: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        ciborium::into_writer(self, write).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode TO0.AcceptOwner");

            Error::new(ErrorKind::Encode, "the TO0.AcceptOwner")
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::utils::Hex;

    use super::*;

    #[test]
    fn accept_owner_roundtrip() {
        let accept_owner = AcceptOwner::new(3600);

        let mut buf = Vec::new();

        accept_owner.encode(&mut buf).unwrap();

        let res = AcceptOwner::decode(&buf).unwrap();

        assert_eq!(res, accept_owner);
        assert_eq!(res.wait_seconds(), 3600);

        insta::assert_snapshot!(Hex::new(&buf), @"81190e10");
    }
}
