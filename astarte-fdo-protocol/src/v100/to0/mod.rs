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

//! Transfer Ownership Protocol 0 (TO0).
//!
//! Transfer Ownership Protocol 0 (TO0) registers the new Owner with the Rendezvous Server. The
//! Owner proves its possession of the Ownership Voucher by signing the to1d blob with the Owner
//! key from the last voucher entry, and the Rendezvous Server retains the blob for a negotiated
//! amount of time, serving it to the Device during the TO1 protocol.

pub mod accept_owner;
pub mod hello;
pub mod hello_ack;
pub mod owner_sign;
