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

//! Transfer Ownership Protocol 2 (TO2).
//!
//! The Transfer Ownership Protocol 2 (TO2) is the heart of FIDO Device Onboard. In this protocol,
//! the Device ROE contacts the Owner Onboarding Service at the address obtained in the TO1, each
//! side proves itself to the other, and the Device receives its replacement credentials.
//!
//! The Owner proves possession of the Ownership Voucher by sending it, entry by entry, to the
//! Device, which verifies the hash chain back to the credentials stored during the DI protocol.
//! The Device proves itself with an entity attestation token. A key exchange runs piggybacked on
//! the first two messages, so that every message from TO2.SetupDevice onwards travels encrypted
//! inside an [`Encrypted`](crate::v100::cipher::Encrypted) body.

pub mod device_service_info;
pub mod device_service_info_ready;
pub mod done;
pub mod done2;
pub mod get_ov_next_entry;
pub mod hello_device;
pub mod ov_next_entry;
pub mod owner_service_info;
pub mod owner_service_info_ready;
pub mod prove_device;
pub mod prove_ov_hdr;
pub mod setup_device;
