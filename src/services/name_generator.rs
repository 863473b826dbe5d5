//! Short random names for uploaded files.
//!
//! Names are `NAME_LEN` characters drawn uniformly from an alphabet without
//! visually ambiguous symbols, followed by the original extension. The
//! generator does not check uniqueness; the catalog's unique constraint on
//! `name` does.

use rand::{Rng, SeedableRng, rngs::StdRng};
use std::sync::Mutex;

/// Number of random characters in a generated name.
pub const NAME_LEN: usize = 5;

/// Uppercase without `I` and `O`, lowercase without `l`, digits without `0` and `1`.
pub const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789";

/// Owned random name source, seeded once at construction.
#[derive(Debug)]
pub struct NameGenerator {
    rng: Mutex<StdRng>,
}

impl NameGenerator {
    /// Seed from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic generator for tests and reproducible runs.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Return `<NAME_LEN random characters><extension>`.
    pub fn generate(&self, extension: &str) -> String {
        // A poisoned lock still holds a usable rng.
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut name = String::with_capacity(NAME_LEN + extension.len());
        for _ in 0..NAME_LEN {
            name.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
        }
        name.push_str(extension);
        name
    }
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self::from_entropy()
    }
}
