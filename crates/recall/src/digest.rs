//! SHA-256 digest primitives used by fingerprinting
//!
//! Every component fed into a [`DigestBuilder`] is length-prefixed and every
//! builder starts from a domain tag, so concatenations of different component
//! lists cannot produce the same byte stream.

use std::fmt;

use sha2::{Digest as _, Sha256};

/// Width of a digest in bytes
pub const DIGEST_LEN: usize = 32;

/// A 256-bit digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Digest of a byte string under a domain tag
    #[must_use]
    pub fn of(domain: &str, bytes: &[u8]) -> Self {
        let mut builder = DigestBuilder::new(domain);
        builder.bytes(bytes);
        builder.finish()
    }

    /// Raw digest bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex form
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First eight hex characters, for log lines
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental, domain-separated digest composition
pub struct DigestBuilder {
    hasher: Sha256,
}

impl DigestBuilder {
    /// Start a new digest under `domain`
    #[must_use]
    pub fn new(domain: &str) -> Self {
        let mut builder = Self {
            hasher: Sha256::new(),
        };
        builder.bytes(domain.as_bytes());
        builder
    }

    /// Append a length-prefixed byte string
    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.hasher.update((bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
        self
    }

    /// Append a length-prefixed string
    pub fn str(&mut self, value: &str) -> &mut Self {
        self.bytes(value.as_bytes())
    }

    /// Append a fixed-width integer
    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(value.to_le_bytes());
        self
    }

    /// Append a previously computed digest
    pub fn digest(&mut self, digest: &Digest) -> &mut Self {
        self.hasher.update(digest.as_bytes());
        self
    }

    /// Finish and produce the digest
    #[must_use]
    pub fn finish(self) -> Digest {
        let output = self.hasher.finalize();
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&output);
        Digest(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_separates() {
        assert_ne!(Digest::of("a", b"x"), Digest::of("b", b"x"));
        assert_eq!(Digest::of("a", b"x"), Digest::of("a", b"x"));
    }

    #[test]
    fn test_length_prefix_prevents_concat_collision() {
        let mut left = DigestBuilder::new("t");
        left.str("ab").str("c");
        let mut right = DigestBuilder::new("t");
        right.str("a").str("bc");
        assert_ne!(left.finish(), right.finish());
    }

    #[test]
    fn test_hex_forms() {
        let digest = Digest::of("t", b"");
        assert_eq!(digest.to_hex().len(), 64);
        assert_eq!(digest.short().len(), 8);
        assert!(digest.to_hex().starts_with(&digest.short()));
    }
}
