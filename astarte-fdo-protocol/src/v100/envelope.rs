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

//! Message envelope framing messages on a stream.
//!
//! Every protocol message travels wrapped in a CBOR array of five elements:
//!
//! ```cddl
//! Msg = [
//!     length:   Msglen,        ;; length of the entire encoded envelope
//!     msgtype:  Msgtype,
//!     protver:  Protver,
//!     protocol_info: ProtocolInfo,
//!     body:     MsgBody,
//! ]
//! ProtocolInfo = { ? "token": tstr }
//! ```
//!
//! The length counts every byte of the envelope, its own encoding included. A reader can
//! therefore pull the first four bytes of a stream, learn the total length from them and
//! read the rest in one go.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::Error;

use super::value::Value;
use super::{Message, Msglen, Msgtype, Protver, PROTOCOL_VERSION};

/// Size of the stream prefix needed to learn the envelope length.
const HEADER_LEN: usize = 4;

/// Transport level metadata of an envelope.
///
/// Carries at most the authorization token a server issued for the session. Clients send
/// it back verbatim on every follow up message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProtocolInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

impl ProtocolInfo {
    /// Creates an empty protocol info.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the authorization token, when present.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Sets the authorization token.
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }
}

/// A framed protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    msg_type: Msgtype,
    protver: Protver,
    protocol_info: ProtocolInfo,
    body: Value,
}

impl Envelope {
    /// Wraps an encoded message into an envelope.
    pub fn new<M>(msg: &M, protocol_info: ProtocolInfo) -> Result<Self, Error>
    where
        M: Message,
    {
        let mut buf = Vec::new();

        msg.encode(&mut buf)?;

        let body = Value::from_cbor(&buf)?;

        Ok(Self {
            msg_type: M::MSG_TYPE,
            protver: PROTOCOL_VERSION,
            protocol_info,
            body,
        })
    }

    /// The type of the framed message.
    pub fn msg_type(&self) -> Msgtype {
        self.msg_type
    }

    /// The transport metadata of the envelope.
    pub fn protocol_info(&self) -> &ProtocolInfo {
        &self.protocol_info
    }

    /// Replaces the transport metadata of the envelope.
    pub fn set_protocol_info(&mut self, protocol_info: ProtocolInfo) {
        self.protocol_info = protocol_info;
    }

    /// The message body, still undecoded.
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Decodes the body into the typed message.
    pub fn decode_body<M>(&self) -> Result<M, Error>
    where
        M: Message,
    {
        if self.msg_type != M::MSG_TYPE {
            return Err(Error::new(ErrorKind::Invalid, "the message type"));
        }

        self.body.decode_into()
    }

    /// Encodes the envelope into the writer.
    ///
    /// The length field states the size of the entire encoded envelope, so the field's own
    /// encoding contributes to the value it states. The envelope is measured once with a
    /// zero length and the real value is then iterated until it is self consistent.
    pub fn encode<W>(&self, writer: &mut W) -> Result<(), Error>
    where
        W: Write,
    {
        let Self {
            msg_type,
            protver,
            protocol_info,
            body,
        } = self;

        let mut probe = Vec::new();

        ciborium::into_writer(&(0u8, msg_type, protver, protocol_info, body), &mut probe).map_err(
            |err| {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %err, "couldn't measure the envelope");

                Error::new(ErrorKind::Encode, "the message envelope")
            },
        )?;

        // the zero length occupies exactly one byte of the probe
        let base = probe.len() - 1;

        let mut length = base + 1;
        loop {
            let next = base + cbor_uint_len(length);

            if next == length {
                break;
            }

            length = next;
        }

        let length = Msglen::try_from(length)
            .map_err(|_| Error::new(ErrorKind::OutOfRange, "for the message length"))?;

        ciborium::into_writer(&(length, msg_type, protver, protocol_info, body), writer).map_err(
            |err| {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %err, "couldn't encode the envelope");

                Error::new(ErrorKind::Encode, "the message envelope")
            },
        )
    }

    /// Encodes the envelope into a new buffer.
    pub fn to_vec(&self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();

        self.encode(&mut buf)?;

        Ok(buf)
    }

    /// Decodes an envelope from a complete buffer.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let (length, msg_type, protver, protocol_info, body): (
            Msglen,
            Msgtype,
            Protver,
            ProtocolInfo,
            Value,
        ) = ciborium::from_reader(buf).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't decode the envelope");

            Error::new(ErrorKind::Decode, "the message envelope")
        })?;

        if usize::from(length) != buf.len() {
            return Err(Error::new(ErrorKind::Invalid, "the message length"));
        }

        if protver != PROTOCOL_VERSION {
            return Err(Error::new(ErrorKind::Unsupported, "protocol version"));
        }

        Ok(Self {
            msg_type,
            protver,
            protocol_info,
            body,
        })
    }

    /// Reads one envelope from the stream.
    ///
    /// Pulls the four byte prefix, learns the total length from it and then reads the rest
    /// of the envelope.
    pub fn read_from<R>(reader: &mut R) -> Result<Self, Error>
    where
        R: Read,
    {
        let mut head = [0u8; HEADER_LEN];

        reader.read_exact(&mut head).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't read the envelope header");

            Error::new(ErrorKind::Io, "the envelope header")
        })?;

        let length = header_length(&head)?;

        if length < HEADER_LEN {
            return Err(Error::new(ErrorKind::Invalid, "the message length"));
        }

        let mut buf = vec![0u8; length];
        buf[..HEADER_LEN].copy_from_slice(&head);

        reader.read_exact(&mut buf[HEADER_LEN..]).map_err(|err| {
            #[cfg(feature = "tracing")]
            tracing::error!(error = %err, "couldn't read the envelope body");

            Error::new(ErrorKind::Io, "the envelope body")
        })?;

        Self::decode(&buf)
    }
}

/// Parses the envelope length out of the four byte stream prefix.
fn header_length(head: &[u8; HEADER_LEN]) -> Result<usize, Error> {
    if head[0] != 0x85 {
        return Err(Error::new(ErrorKind::Shape, "a five element message array"));
    }

    match head[1] {
        // immediate unsigned integer
        n @ 0x00..=0x17 => Ok(usize::from(n)),
        0x18 => Ok(usize::from(head[2])),
        0x19 => Ok(usize::from(u16::from_be_bytes([head[2], head[3]]))),
        // wider unsigned integers can't fit in a Msglen
        0x1a..=0x1b => Err(Error::new(ErrorKind::OutOfRange, "for the message length")),
        _ => Err(Error::new(ErrorKind::Shape, "an unsigned message length")),
    }
}

/// Number of bytes a CBOR unsigned integer occupies once encoded.
fn cbor_uint_len(value: usize) -> usize {
    match value {
        0..=0x17 => 1,
        0x18..=0xff => 2,
        0x100..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::utils::Hex;
    use crate::v100::di::done::Done;
    use crate::v100::to2::get_ov_next_entry::GetOvNextEntry;

    use super::*;

    #[test]
    fn envelope_roundtrip() {
        let msg = GetOvNextEntry::new(2);

        let envelope = Envelope::new(&msg, ProtocolInfo::new()).unwrap();

        let buf = envelope.to_vec().unwrap();

        let res = Envelope::read_from(&mut buf.as_slice()).unwrap();

        assert_eq!(res, envelope);
        assert_eq!(res.msg_type(), GetOvNextEntry::MSG_TYPE);

        let body: GetOvNextEntry = res.decode_body().unwrap();

        assert_eq!(body, msg);
    }

    #[test]
    fn envelope_length_is_self_consistent() {
        let envelope = Envelope::new(&Done, ProtocolInfo::new()).unwrap();

        let buf = envelope.to_vec().unwrap();

        // [length, msgtype 13, protver 100, {}, []]
        insta::assert_snapshot!(Hex::new(&buf), @"85070d1864a080");
        assert_eq!(buf.len(), 7);
    }

    #[test]
    fn envelope_length_two_bytes() {
        let envelope = Envelope {
            msg_type: 13,
            protver: PROTOCOL_VERSION,
            protocol_info: ProtocolInfo::new(),
            body: Value::from(ciborium::Value::Bytes(vec![0u8; 25])),
        };

        let buf = envelope.to_vec().unwrap();

        assert_eq!(buf.len(), 34);
        assert_eq!(&buf[..2], &[0x85, 0x18]);
        assert_eq!(buf[2], 34);

        let res = Envelope::read_from(&mut buf.as_slice()).unwrap();

        assert_eq!(res, envelope);
    }

    #[test]
    fn envelope_token_roundtrip() {
        let mut protocol_info = ProtocolInfo::new();
        protocol_info.set_token("bearer-1".to_string());

        let envelope = Envelope::new(&Done, protocol_info).unwrap();

        let buf = envelope.to_vec().unwrap();

        let res = Envelope::read_from(&mut buf.as_slice()).unwrap();

        assert_eq!(res.protocol_info().token(), Some("bearer-1"));
    }

    #[test]
    fn envelope_wrong_array_header() {
        let buf = [0x84, 0x07, 0x0d, 0x18, 0x64, 0xa0];

        let err = Envelope::read_from(&mut buf.as_slice()).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn envelope_oversized_length() {
        let buf = [0x85, 0x1a, 0x00, 0x01, 0x00, 0x00];

        let err = Envelope::read_from(&mut buf.as_slice()).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn envelope_length_mismatch() {
        let envelope = Envelope::new(&Done, ProtocolInfo::new()).unwrap();

        let mut buf = envelope.to_vec().unwrap();

        // shrink the declared length without touching the rest
        buf[1] -= 1;

        let err = Envelope::decode(&buf).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn envelope_short_read() {
        let envelope = Envelope::new(&Done, ProtocolInfo::new()).unwrap();

        let buf = envelope.to_vec().unwrap();

        let err = Envelope::read_from(&mut &buf[..5]).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Io);
    }

    #[test]
    fn envelope_wrong_protocol_version() {
        let envelope = Envelope {
            msg_type: 13,
            protver: 101,
            protocol_info: ProtocolInfo::new(),
            body: Value::array(),
        };

        let buf = envelope.to_vec().unwrap();

        let err = Envelope::decode(&buf).unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn envelope_body_type_mismatch() {
        let envelope = Envelope::new(&Done, ProtocolInfo::new()).unwrap();

        let err = envelope.decode_body::<GetOvNextEntry>().unwrap_err();

        assert_eq!(*err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn uint_len_boundaries() {
        assert_eq!(cbor_uint_len(0x17), 1);
        assert_eq!(cbor_uint_len(0x18), 2);
        assert_eq!(cbor_uint_len(0xff), 2);
        assert_eq!(cbor_uint_len(0x100), 3);
        assert_eq!(cbor_uint_len(0xffff), 3);
    }
}
