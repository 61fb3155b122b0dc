// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Compact message identifiers.
//!
//! Ids are six base-36 characters derived from the clock and 16 random bits.
//! They are cheap to transmit and good enough for matching ACKs within one
//! conversation; they are not globally unique.

use rand::Rng;

/// Width of a generated id.
pub const ID_LEN: usize = 6;

const ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Generate a fresh 6-character uppercase base-36 id.
pub fn generate_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis() as u64;
    let random: u64 = rand::thread_rng().gen::<u16>() as u64;
    id_from_parts(millis, random)
}

/// Mix a timestamp with random bits and keep the low six base-36 digits.
fn id_from_parts(millis: u64, random: u64) -> String {
    let combined = ((millis << 16) ^ random) & (i64::MAX as u64);
    let full = to_base36(combined);
    if full.len() <= ID_LEN {
        format!("{:0>width$}", full, width = ID_LEN)
    } else {
        full[full.len() - ID_LEN..].to_string()
    }
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::with_capacity(13);
    while value > 0 {
        digits.push(ALPHABET[(value % 36) as usize]);
        value /= 36;
    }
    digits.iter().rev().map(|&b| b as char).collect()
}

/// Whether an ACK id (possibly truncated) refers to `message_id`.
pub fn matches_prefix(message_id: &str, ack_id: &str) -> bool {
    message_id.starts_with(ack_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_valid(id: &str) -> bool {
        id.len() == ID_LEN
            && id
                .bytes()
                .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase())
    }

    #[test]
    fn test_generated_ids_are_six_base36_chars() {
        for _ in 0..1000 {
            let id = generate_id();
            assert!(is_valid(&id), "bad id: {}", id);
        }
    }

    #[test]
    fn test_small_values_are_left_padded() {
        assert_eq!(id_from_parts(0, 0), "000000");
        assert_eq!(id_from_parts(0, 35), "00000Z");
        assert_eq!(id_from_parts(0, 36), "000010");
    }

    #[test]
    fn test_large_values_keep_low_digits() {
        let id = id_from_parts(1_700_000_000_000, 0xBEEF);
        assert!(is_valid(&id));
        let full = to_base36(((1_700_000_000_000u64 << 16) ^ 0xBEEF) & (i64::MAX as u64));
        assert!(full.len() > ID_LEN);
        assert!(full.ends_with(&id));
    }

    #[test]
    fn test_random_bits_change_id() {
        assert_ne!(id_from_parts(1_700_000_000_000, 1), id_from_parts(1_700_000_000_000, 2));
    }

    #[test]
    fn test_prefix_matching() {
        assert!(matches_prefix("AB12CD", "AB12"));
        assert!(matches_prefix("AB12CD", "AB12CD"));
        assert!(!matches_prefix("AB12CD", "B12C"));
        assert!(!matches_prefix("AB12", "AB12CD"));
    }
}
