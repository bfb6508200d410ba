//! Time-sorted identifiers
//!
//! 64-bit ids rendered as 13 Crockford Base32 characters. Ids generated later
//! sort lexicographically after earlier ones (millisecond resolution).

use std::sync::atomic::{AtomicU16, Ordering};

use chrono::Utc;
use rand::Rng;

/// Crockford Base32 alphabet (excludes I, L, O, U)
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const ENCODED_LEN: usize = 13;

static COUNTER: AtomicU16 = AtomicU16::new(0);

pub struct TsidGenerator;

impl TsidGenerator {
    /// Layout: 42 bits millis since epoch | 10 bits random | 12 bits counter
    pub fn generate() -> String {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed) as u64;
        let random = rand::rng().random::<u16>() as u64 & 0x3FF;

        let value = ((millis & 0x3FF_FFFF_FFFF) << 22) | (random << 12) | (counter & 0xFFF);
        encode(value)
    }

    pub fn is_valid(id: &str) -> bool {
        decode(id).is_some()
    }
}

fn encode(mut value: u64) -> String {
    let mut out = [b'0'; ENCODED_LEN];
    for slot in out.iter_mut().rev() {
        *slot = ALPHABET[(value & 0x1F) as usize];
        value >>= 5;
    }
    out.iter().map(|&b| b as char).collect()
}

fn decode(s: &str) -> Option<u64> {
    if s.len() != ENCODED_LEN {
        return None;
    }
    s.chars().try_fold(0u64, |acc, c| {
        let c = c.to_ascii_uppercase();
        let digit = ALPHABET.iter().position(|&a| a as char == c)? as u64;
        Some((acc << 5) | digit)
    })
}
