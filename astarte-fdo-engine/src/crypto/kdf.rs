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

//! Key derivation for the TO2 session keys.
//!
//! Counter mode KDF over HMAC-SHA256, with a single byte counter starting from
//! 1. Both parties run it on the shared secret from the key exchange, once per
//! session key.

use astarte_fdo_protocol::error::ErrorKind;
use astarte_fdo_protocol::Error;

/// Label deriving the session encryption key (SEK).
pub(crate) const SEK_LABEL: &[u8] = b"cipher";
/// Label deriving the session verification key (SVK).
pub(crate) const SVK_LABEL: &[u8] = b"hmac";

/// Output of a single HMAC-SHA256 round.
const ROUND_LEN: usize = 32;

/// Fills `output` with key material derived from the secret.
///
/// Each round computes `HMAC-SHA256(secret, [i] || label)` and the rounds are
/// concatenated until `output` is full, truncating the last one.
pub(crate) fn derive(secret: &[u8], label: &[u8], output: &mut [u8]) -> Result<(), Error> {
    let key = aws_lc_rs::hmac::Key::new(aws_lc_rs::hmac::HMAC_SHA256, secret);

    let rounds = u8::try_from(output.len().div_ceil(ROUND_LEN)).map_err(|_| {
        Error::new(
            ErrorKind::OutOfRange,
            "kdf output cannot fit in the counter",
        )
    })?;

    let mut written = 0;
    for i in 1..=rounds {
        let mut prf = aws_lc_rs::hmac::Context::with_key(&key);
        prf.update(&[i]);
        prf.update(label);
        let round = prf.sign();

        let rem = output.len().saturating_sub(written);
        let take = rem.min(ROUND_LEN);
        output[written..written + take].copy_from_slice(&round.as_ref()[..take]);

        written += take;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let secret = [0xab; 32];

        let mut first = [0u8; 48];
        let mut second = [0u8; 48];

        derive(&secret, SVK_LABEL, &mut first).unwrap();
        derive(&secret, SVK_LABEL, &mut second).unwrap();

        assert_eq!(first, second);
        assert_ne!(first, [0u8; 48]);
    }

    #[test]
    fn shorter_output_is_a_prefix() {
        let secret = [0x42; 32];

        let mut short = [0u8; 16];
        let mut long = [0u8; 32];

        derive(&secret, SEK_LABEL, &mut short).unwrap();
        derive(&secret, SEK_LABEL, &mut long).unwrap();

        assert_eq!(short, long[..16]);
    }

    #[test]
    fn labels_separate_the_keys() {
        let secret = [0x42; 32];

        let mut sek = [0u8; 32];
        let mut svk = [0u8; 32];

        derive(&secret, SEK_LABEL, &mut sek).unwrap();
        derive(&secret, SVK_LABEL, &mut svk).unwrap();

        assert_ne!(sek, svk);
    }

    #[test]
    fn second_round_differs_from_the_first() {
        let secret = [0x42; 32];

        let mut svk = [0u8; 48];
        derive(&secret, SVK_LABEL, &mut svk).unwrap();

        assert_ne!(svk[..16], svk[32..]);
    }
}
