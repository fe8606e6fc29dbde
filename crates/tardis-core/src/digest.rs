//! The dataset-selectable content hash (spec §6, §9 Open Question).
//!
//! `ChecksumAlgorithm` picks which of these runs; every crate that needs to
//! compute or verify a content checksum (`compression`'s running checksum,
//! `delta`'s strong per-block hash, `crypto`'s `authHasher`) goes through
//! this module instead of hard-coding MD5 or SHA-256 directly.

use md5::Md5;
use sha2::{Digest as _, Sha256};

use crate::model::ChecksumAlgorithm;

/// An in-progress hash computation over a stream of bytes.
#[derive(Clone)]
pub enum RunningDigest {
    /// MD5 (historical default).
    Md5(Md5),
    /// SHA-256.
    Sha256(Sha256),
}

impl RunningDigest {
    /// Start a new running hash for the given algorithm.
    #[must_use]
    pub fn new(algo: ChecksumAlgorithm) -> Self {
        match algo {
            ChecksumAlgorithm::Md5 => RunningDigest::Md5(Md5::new()),
            ChecksumAlgorithm::Sha256 => RunningDigest::Sha256(Sha256::new()),
        }
    }

    /// Feed more bytes into the hash.
    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            RunningDigest::Md5(h) => h.update(bytes),
            RunningDigest::Sha256(h) => h.update(bytes),
        }
    }

    /// Finish and return the lower-case hex digest, without consuming
    /// `self` (clones the underlying hasher state).
    #[must_use]
    pub fn finalize_hex(&self) -> String {
        match self.clone() {
            RunningDigest::Md5(h) => hex::encode(h.finalize()),
            RunningDigest::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// One-shot hash of a full byte slice, hex-encoded.
#[must_use]
pub fn hash_hex(algo: ChecksumAlgorithm, bytes: &[u8]) -> String {
    let mut d = RunningDigest::new(algo);
    d.update(bytes);
    d.finalize_hex()
}
