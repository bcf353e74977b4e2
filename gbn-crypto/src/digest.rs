//! Payload digests
//!
//! The sender digests the complete source payload and ships the result in
//! the trailer packet. The receiver digests its reassembly buffer on close
//! and compares the two with [`verify`].

use bytes::Bytes;
use ring::digest;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Width of the trailer digest when nothing else is configured (16 bytes)
pub const DEFAULT_DIGEST_LEN: usize = 16;

/// Digest configuration errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DigestError {
    #[error("Digest length {requested} exceeds {algorithm} output of {max} bytes")]
    TooLong {
        algorithm: DigestAlgorithm,
        requested: usize,
        max: usize,
    },

    #[error("Digest length must be non-zero")]
    Empty,

    #[error("Unknown digest algorithm: {0}")]
    UnknownAlgorithm(String),
}

/// A fixed-size fingerprint function over a byte sequence
///
/// Implementations must be deterministic and always return exactly
/// [`output_len`](PayloadDigest::output_len) bytes.
pub trait PayloadDigest: Send + Sync {
    /// Number of bytes produced by [`digest`](PayloadDigest::digest)
    fn output_len(&self) -> usize;

    /// Compute the digest of `data`
    fn digest(&self, data: &[u8]) -> Bytes;
}

/// Hash algorithms available from the Ring backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Full output length of the algorithm in bytes
    pub fn output_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    fn ring_algorithm(self) -> &'static digest::Algorithm {
        match self {
            DigestAlgorithm::Sha256 => &digest::SHA256,
            DigestAlgorithm::Sha384 => &digest::SHA384,
            DigestAlgorithm::Sha512 => &digest::SHA512,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestAlgorithm::Sha256 => write!(f, "SHA-256"),
            DigestAlgorithm::Sha384 => write!(f, "SHA-384"),
            DigestAlgorithm::Sha512 => write!(f, "SHA-512"),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha384" => Ok(DigestAlgorithm::Sha384),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            _ => Err(DigestError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Ring-backed digest, optionally truncated to a shorter width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingDigest {
    algorithm: DigestAlgorithm,
    len: usize,
}

impl RingDigest {
    /// Create a digest producing the first `len` bytes of `algorithm`'s output
    pub fn new(algorithm: DigestAlgorithm, len: usize) -> Result<Self, DigestError> {
        if len == 0 {
            return Err(DigestError::Empty);
        }
        let max = algorithm.output_len();
        if len > max {
            return Err(DigestError::TooLong {
                algorithm,
                requested: len,
                max,
            });
        }
        Ok(RingDigest { algorithm, len })
    }

    /// Create a digest using the full output of `algorithm`
    pub fn full(algorithm: DigestAlgorithm) -> Self {
        RingDigest {
            algorithm,
            len: algorithm.output_len(),
        }
    }

    /// Get the underlying algorithm
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }
}

impl Default for RingDigest {
    /// SHA-256 truncated to 16 bytes
    fn default() -> Self {
        RingDigest {
            algorithm: DigestAlgorithm::Sha256,
            len: DEFAULT_DIGEST_LEN,
        }
    }
}

impl PayloadDigest for RingDigest {
    fn output_len(&self) -> usize {
        self.len
    }

    fn digest(&self, data: &[u8]) -> Bytes {
        let full = digest::digest(self.algorithm.ring_algorithm(), data);
        Bytes::copy_from_slice(&full.as_ref()[..self.len])
    }
}

/// Compare a received digest against a locally computed one
///
/// Plain byte equality; there is no timing-side-channel requirement here.
pub fn verify(expected: &[u8], actual: &[u8]) -> bool {
    expected == actual
}
