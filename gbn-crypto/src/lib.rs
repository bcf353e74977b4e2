//! GBN Integrity
//!
//! This crate provides the whole-payload digest used by the transfer trailer
//! packet, using a pluggable backend. The bundled backend is built on the
//! Ring library.
//!
//! The digest only detects corruption or loss; it is not an authentication
//! mechanism.

pub mod digest;

pub use digest::{verify, DigestAlgorithm, DigestError, PayloadDigest, RingDigest, DEFAULT_DIGEST_LEN};
