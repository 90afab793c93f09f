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

//! Device Initialize Protocol (DI).
//!
//! The Device Initialize Protocol runs in the factory and provisions the Device with its
//! credentials. The protocol assumes that the Device and the manufacturing station communicate
//! over a trusted channel, since the HMAC secret that anchors all later ownership transfers is
//! established here. At the end of the protocol the manufacturing station holds the Ownership
//! Voucher header and the Device persists its Device Credential.

pub mod app_start;
pub mod custom;
pub mod done;
pub mod set_credentials;
pub mod set_hmac;
