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

#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

//! FIDO Device Onboard protocol engine.
//!
//! Implements the protocols of FIDO Device Onboard 1.0 as message driven
//! services: Device Initialize ([`di`]), Transfer Ownership 0 ([`to0`]),
//! 1 ([`to1`]) and 2 ([`to2`]). Each service consumes one envelope at a
//! time and produces the next, so a session runs over any transport that
//! can frame messages, see [`dispatch`] for the session loop.
//!
//! The cryptography sits behind the [`Crypto`] trait and persistence behind
//! the per role traits in [`storage`], so devices can plug in hardware
//! keys and servers their own databases.

pub mod crypto;
pub mod di;
pub mod dispatch;
pub mod srv_info;
pub mod storage;
pub mod to0;
pub mod to1;
pub mod to2;
pub mod voucher;

pub use astarte_fdo_protocol;

pub use self::crypto::Crypto;
