//! Short, human-typeable session id generation.

use rand::seq::SliceRandom;
use shared::SessionId;
use std::sync::atomic::{AtomicU64, Ordering};

const ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MIN_LENGTH: usize = 2;

/// Encodes a monotonic process-local counter into short alphanumeric ids.
///
/// The alphabet is shuffled once per generator so consecutive ids are not
/// guessable, while the encoding stays reversible and collision-free within
/// the process. Generated ids are uppercase; lookup is case-insensitive.
pub struct SessionIdGenerator {
    alphabet: Vec<char>,
    next: AtomicU64,
}

impl SessionIdGenerator {
    pub fn new() -> Self {
        let mut alphabet: Vec<char> = ALPHABET.chars().collect();
        alphabet.shuffle(&mut rand::thread_rng());
        SessionIdGenerator {
            alphabet,
            next: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> SessionId {
        let value = self.next.fetch_add(1, Ordering::Relaxed);
        SessionId::new(self.encode(value))
    }

    fn encode(&self, mut value: u64) -> String {
        let base = self.alphabet.len() as u64;
        let mut digits = Vec::new();
        loop {
            digits.push(self.alphabet[(value % base) as usize]);
            value /= base;
            if value == 0 {
                break;
            }
        }
        // Leading "zero" digits pad to the minimum length without changing
        // the decoded value.
        while digits.len() < MIN_LENGTH {
            digits.push(self.alphabet[0]);
        }
        digits.reverse();
        digits.into_iter().collect()
    }

    /// Decodes an id back to its counter value. Case-insensitive. Returns
    /// `None` for characters outside the alphabet.
    pub fn decode(&self, id: &str) -> Option<u64> {
        let base = self.alphabet.len() as u64;
        let mut value: u64 = 0;
        for ch in id.chars() {
            let ch = ch.to_ascii_uppercase();
            let digit = self.alphabet.iter().position(|&a| a == ch)? as u64;
            value = value.checked_mul(base)?.checked_add(digit)?;
        }
        Some(value)
    }
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
