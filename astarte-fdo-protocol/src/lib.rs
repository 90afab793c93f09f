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

#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

//! Wire model for the FIDO Device Onboard protocol, version 1.0.
//!
//! Every message of the DI, TO0, TO1 and TO2 protocols is a CBOR structure. This crate
//! implements the encoding and decoding of those structures, the message envelope used to
//! frame them on a stream, and the shared data model (ownership voucher, device
//! credentials, public keys, hashes, ...) they are built from.
//!
//! The protocol logic lives in the `astarte-fdo-engine` crate, this one only deals with
//! bytes on the wire.

pub mod error;
pub mod utils;
pub mod v100;

pub use self::error::Error;
