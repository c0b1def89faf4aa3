//! Deterministic request fingerprints used as cache keys.

use sha2::{Digest, Sha256};

/// Hex digest of a single input, truncated to 16 characters.
///
/// Collisions at 64 bits are irrelevant for caches holding at most a few
/// thousand entries, and short keys keep log lines readable.
pub fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// Fingerprint of a request made of several parameters.
///
/// Parts are length-prefixed before hashing so `["ab", "c"]` and
/// `["a", "bc"]` never collide.
pub fn of_parts(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(digest("hello"), digest("hello"));
        assert_ne!(digest("hello"), digest("hello "));
        assert_eq!(digest("hello").len(), 16);
    }

    #[test]
    fn parts_do_not_collide_across_boundaries() {
        assert_ne!(of_parts(&["ab", "c"]), of_parts(&["a", "bc"]));
        assert_eq!(of_parts(&["a", "b"]), of_parts(&["a", "b"]));
    }
}
