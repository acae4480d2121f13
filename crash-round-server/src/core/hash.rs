//! Seed Hashing
//!
//! SHA-256 helpers for the commit-reveal scheme. Outputs are lowercase hex
//! strings so any observer can recompute them with standard tooling
//! (`echo -n "$seed" | sha256sum`). No domain separator is mixed in for
//! the same reason.

use sha2::{Digest, Sha256};

/// Raw 32-byte digest.
pub type Digest32 = [u8; 32];

/// Incremental SHA-256 over string parts.
///
/// Order of updates is significant: `server_seed` then `client_seed`.
pub struct SeedHasher {
    hasher: Sha256,
}

impl Default for SeedHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl SeedHasher {
    /// Create an empty hasher.
    pub fn new() -> Self {
        Self { hasher: Sha256::new() }
    }

    /// Append a string (UTF-8 bytes, no length prefix).
    #[inline]
    pub fn update_str(&mut self, part: &str) -> &mut Self {
        self.hasher.update(part.as_bytes());
        self
    }

    /// Finalize to raw bytes.
    pub fn finalize(self) -> Digest32 {
        self.hasher.finalize().into()
    }

    /// Finalize to lowercase hex.
    pub fn finalize_hex(self) -> String {
        hex::encode(self.finalize())
    }
}

/// `hex(SHA-256(data))`
pub fn sha256_hex(data: &str) -> String {
    let mut hasher = SeedHasher::new();
    hasher.update_str(data);
    hasher.finalize_hex()
}

/// Read the first `hex_len` hex characters of `hash` as an integer.
///
/// Returns `None` if the hash is shorter than requested, contains non-hex
/// characters, or `hex_len` exceeds 16 (64 bits).
pub fn hex_prefix_value(hash: &str, hex_len: usize) -> Option<u64> {
    if hex_len == 0 || hex_len > 16 {
        return None;
    }
    let prefix = hash.get(..hex_len)?;
    u64::from_str_radix(prefix, 16).ok()
}
