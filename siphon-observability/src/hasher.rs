use sha1::Sha1;
use sha2::{Digest as _, Sha256};
use siphon_core::config::DigestAlgorithm;

/// One-way digest used to pseudonymise header names and values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Digest(DigestAlgorithm);

impl Digest {
    pub const SHA1: Digest = Digest(DigestAlgorithm::Sha1);
    pub const SHA256: Digest = Digest(DigestAlgorithm::Sha256);

    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self(algorithm)
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.0
    }

    /// Lower-case hex digest of `value`.
    pub fn hash(&self, value: &str) -> String {
        match self.0 {
            DigestAlgorithm::Sha1 => format!("{:x}", Sha1::digest(value.as_bytes())),
            DigestAlgorithm::Sha256 => format!("{:x}", Sha256::digest(value.as_bytes())),
        }
    }

    pub fn hash_all(&self, values: &[String]) -> Vec<String> {
        values.iter().map(|v| self.hash(v)).collect()
    }
}

impl From<DigestAlgorithm> for Digest {
    fn from(algorithm: DigestAlgorithm) -> Self {
        Self(algorithm)
    }
}
