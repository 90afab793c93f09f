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

//! Dispatch of protocol messages to the service handling them.
//!
//! A [`MessageDispatcher`] drives one server session over a stream, routing
//! each envelope to the service accepting its message type. [`run_client`]
//! drives the client side of a session. Service failures are reported to the
//! peer as an error message (type 255) before the session is closed, and an
//! error message is never answered.

use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::v100::envelope::{Envelope, ProtocolInfo};
use astarte_fdo_protocol::v100::error::{ErrorCode, ErrorMessage};
use astarte_fdo_protocol::v100::{Message, Msgtype};
use astarte_fdo_protocol::Error;
use aws_lc_rs::rand::{SecureRandom, SystemRandom};
use tracing::{debug, error, warn};

/// Longest error string sent to the peer, in bytes.
const MAX_ERROR_STR: usize = 512;

/// Outcome of dispatching one message to a service.
#[derive(Debug)]
pub enum Reply {
    /// Answer and keep the session open.
    Message(Envelope),
    /// Answer and end the session.
    Final(Envelope),
    /// End the session with nothing left to send.
    Done,
}

/// Service handling the messages of one protocol phase.
pub trait MessagingService {
    /// Whether the service handles this message type.
    fn accepts(&self, msg_type: Msgtype) -> bool;

    /// Handles one message of the session.
    fn dispatch(&mut self, req: &Envelope) -> Result<Reply, Error>;
}

/// Client side service, it also opens the session.
pub trait ClientService: MessagingService {
    /// First message of the session.
    fn hello(&mut self) -> Result<Envelope, Error>;
}

/// Routes the messages of one server session to its services.
#[derive(Default)]
pub struct MessageDispatcher<'a> {
    services: Vec<Box<dyn MessagingService + 'a>>,
}

impl<'a> MessageDispatcher<'a> {
    /// Creates a dispatcher without services.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service to dispatch to.
    pub fn register(&mut self, service: Box<dyn MessagingService + 'a>) {
        self.services.push(service);
    }

    /// Serves one session over the stream.
    ///
    /// Reads envelopes and dispatches them until a service ends the session
    /// or fails. A failure is answered with an error message, unless the
    /// session already ended with an inbound one.
    pub fn run_server<R, W>(&mut self, reader: &mut R, writer: &mut W) -> Result<(), Error>
    where
        R: Read,
        W: Write,
    {
        loop {
            let req = Envelope::read_from(reader)?;
            let msg_type = req.msg_type();

            if msg_type == ErrorMessage::MSG_TYPE {
                return Err(self.received_error(&req));
            }

            let Some(service) = self
                .services
                .iter_mut()
                .find(|service| service.accepts(msg_type))
            else {
                let err = Error::new(ErrorKind::Unsupported, "message type");

                write_error(writer, &err, msg_type);

                return Err(err);
            };

            match service.dispatch(&req) {
                Ok(Reply::Message(reply)) => write_envelope(writer, &reply)?,
                Ok(Reply::Final(reply)) => {
                    write_envelope(writer, &reply)?;

                    return Ok(());
                }
                Ok(Reply::Done) => return Ok(()),
                Err(err) => {
                    write_error(writer, &err, msg_type);

                    return Err(err);
                }
            }
        }
    }

    /// Hands an inbound error message to the accepting service.
    fn received_error(&mut self, req: &Envelope) -> Error {
        if let Ok(msg) = req.decode_body::<ErrorMessage>() {
            warn!(%msg, "received an error message");
        }

        let service = self
            .services
            .iter_mut()
            .find(|service| service.accepts(ErrorMessage::MSG_TYPE));

        match service {
            Some(service) => match service.dispatch(req) {
                Ok(_) => Error::new(ErrorKind::Message, "received an error message"),
                Err(err) => err,
            },
            None => Error::new(ErrorKind::Message, "received an error message"),
        }
    }
}

impl std::fmt::Debug for MessageDispatcher<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageDispatcher")
            .field("services", &self.services.len())
            .finish()
    }
}

/// Drives the client side of one session over the stream.
///
/// Sends the service hello, then reads and dispatches every answer until the
/// service ends the session. A bearer token received in the protocol info is
/// echoed on every following message.
pub fn run_client<R, W, S>(reader: &mut R, writer: &mut W, service: &mut S) -> Result<(), Error>
where
    R: Read,
    W: Write,
    S: ClientService + ?Sized,
{
    let hello = service.hello()?;

    write_envelope(writer, &hello)?;

    let mut token: Option<String> = None;

    loop {
        let reply = Envelope::read_from(reader)?;
        let msg_type = reply.msg_type();

        if let Some(value) = reply.protocol_info().token() {
            token = Some(value.to_string());
        }

        if msg_type == ErrorMessage::MSG_TYPE {
            if let Ok(msg) = reply.decode_body::<ErrorMessage>() {
                warn!(%msg, "received an error message");
            }

            return match service.dispatch(&reply) {
                Ok(_) => Err(Error::new(ErrorKind::Message, "received an error message")),
                Err(err) => Err(err),
            };
        }

        match service.dispatch(&reply) {
            Ok(Reply::Message(mut msg)) => {
                if let Some(value) = &token {
                    let mut info = ProtocolInfo::new();
                    info.set_token(value.clone());

                    msg.set_protocol_info(info);
                }

                write_envelope(writer, &msg)?;
            }
            Ok(Reply::Final(msg)) => {
                write_envelope(writer, &msg)?;

                return Ok(());
            }
            Ok(Reply::Done) => return Ok(()),
            Err(err) => {
                write_error(writer, &err, msg_type);

                return Err(err);
            }
        }
    }
}

fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<(), Error>
where
    W: Write,
{
    envelope.encode(writer)?;

    writer.flush().map_err(|err| {
        error!(error = %err, "couldn't flush the stream");

        Error::new(ErrorKind::Io, "to flush the stream")
    })
}

/// Best effort reply with an error message, the session is closed either way.
fn write_error<W>(writer: &mut W, err: &Error, prev: Msgtype)
where
    W: Write,
{
    let envelope = match error_envelope(err, prev) {
        Ok(envelope) => envelope,
        Err(err) => {
            error!(error = %err, "couldn't encode the error message");

            return;
        }
    };

    if let Err(err) = write_envelope(writer, &envelope) {
        debug!(error = %err, "couldn't send the error message");
    }
}

/// Builds the error message envelope reporting `err` to the peer.
pub(crate) fn error_envelope(err: &Error, prev: Msgtype) -> Result<Envelope, Error> {
    let code = error_code(err.kind());

    let mut description = err.to_string();
    if description.len() > MAX_ERROR_STR {
        let mut end = MAX_ERROR_STR;
        while !description.is_char_boundary(end) {
            end -= 1;
        }

        description.truncate(end);
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let correlation_id = correlation_id();

    error!(
        ?code,
        correlation_id,
        prev,
        error = %err,
        "replying with an error message"
    );

    let msg = ErrorMessage::new(
        code,
        u8::try_from(prev).unwrap_or_default(),
        description.into(),
        timestamp,
        correlation_id,
    );

    Envelope::new(&msg, ProtocolInfo::new())
}

fn error_code(kind: &ErrorKind) -> ErrorCode {
    match kind {
        ErrorKind::Decode | ErrorKind::Shape => ErrorCode::MessageBodyError,
        ErrorKind::Invalid | ErrorKind::Unsupported => ErrorCode::InvalidMessageError,
        ErrorKind::Guid => ErrorCode::InvalidGuid,
        ErrorKind::Address => ErrorCode::InvalidIpAddress,
        ErrorKind::NotFound => ErrorCode::ResourceNotFound,
        _ => ErrorCode::InternalServerError,
    }
}

fn correlation_id() -> u64 {
    let rng = SystemRandom::new();

    let mut bytes = [0u8; 8];
    if rng.fill(&mut bytes).is_err() {
        warn!("couldn't generate a correlation id");
    }

    u64::from_be_bytes(bytes)
}

/// Copies the bearer token of a reply onto the next message, like
/// [`run_client`] does on a live session.
#[cfg(test)]
pub(crate) fn echo_token(reply: &Envelope, msg: &mut Envelope) {
    if let Some(token) = reply.protocol_info().token() {
        let mut info = ProtocolInfo::new();
        info.set_token(token.to_string());

        msg.set_protocol_info(info);
    }
}
