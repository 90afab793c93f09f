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

//! Initiates the TO0 protocol.
//!
//! The Owner contacts the Rendezvous Server to start the registration. The message has no
//! contents; the Rendezvous Server answers with a nonce the Owner must sign in TO0.OwnerSign.

use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::v100::{ClientMessage, InitialMessage, Message, Msgtype};
use crate::Error;

use super::hello_ack::HelloAck;

/// ```cddl
/// TO0.Hello = []
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Hello;

const EMPTY: [ciborium::Value; 0] = [];

impl Serialize for Hello {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        EMPTY.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Hello {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let []: [ciborium::Value; 0] = Deserialize::deserialize(deserializer)?;

        Ok(Self)
    }
}

impl Message for Hello {
    const MSG_TYPE: Msgtype = 20;

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        ciborium::from_reader(buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode TO0.Hello");

            Error::new(ErrorKind::Decode, "the TO0.Hello")
        })
    }

    fn encode<W>(&self, write: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        ciborium::into_writer(self, write).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't encode TO0.Hello");

            Error::new(ErrorKind::Encode, "the TO0.Hello")
        })
    }
}

impl ClientMessage for Hello {
    type Response<'a> = HelloAck;
}

impl InitialMessage for Hello {}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::utils::Hex;

    use super::*;

    #[test]
    fn hello_roundtrip() {
        let hello = Hello;

        let mut buf = Vec::new();

        hello.encode(&mut buf).unwrap();

        let res = Hello::decode(&buf).unwrap();

        assert_eq!(res, hello);

        insta::assert_snapshot!(Hex::new(&buf), @"80");
    }
}
