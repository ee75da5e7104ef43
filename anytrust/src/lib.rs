//! Attest to data availability with aggregated committee signatures.
//!
//! A committee of `N` independent storage backends jointly attests that a message has been
//! stored until some timeout. Each member signs the message's content hash and timeout with its
//! BLS12-381 key; an [aggregator::Aggregator] collects at least `N + 1 - H` member signatures
//! (where `H` is the number of members assumed honest) and combines them into a single
//! [Certificate]. Anyone holding the committee's [Keyset] can verify the certificate without
//! contacting any backend.
//!
//! # Architecture
//!
//! * [certificate]: wire format of a [Certificate] and the exact bytes that get signed.
//! * [keyset]: wire format of a [Keyset], its content hash, and threshold verification.
//! * [signer]: a single committee member that persists a message and then signs it.
//! * [aggregator]: fans a store request out to every member and assembles a quorum certificate.
//! * [wrapper]: decorators over [Reader]/[Writer] (fallback reads, timeouts, fail-fast).
//! * [writer]: serializes certificates for a batch poster and signals when to fall back.
//! * [tree]: the content hash used to address messages and keysets.
//!
//! # Status
//!
//! `anytrust` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

use bytes::Bytes;
use std::{fmt::Display, future::Future, str::FromStr};
use thiserror::Error;

pub mod aggregator;
pub mod bls;
pub mod certificate;
pub mod keyset;
pub mod memory;
pub mod signer;
pub mod tree;
pub mod wrapper;
pub mod writer;

pub use certificate::Certificate;
pub use keyset::Keyset;

/// A 32-byte content hash.
pub type Digest = [u8; 32];

/// Errors that can occur when producing, verifying or serving certificates.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Codec Errors
    #[error("malformed certificate")]
    MalformedCertificate,
    #[error("unsupported certificate version: {0}")]
    UnsupportedVersion(u8),
    #[error("too many keys")]
    TooManyKeys,
    #[error("keyset too large: {0} bytes")]
    KeysetTooLarge(usize),
    #[error("malformed keyset")]
    MalformedKeyset,
    #[error("untrusted public key without proof of possession")]
    UntrustedUnvalidatedKey,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid proof of possession")]
    InvalidKeyProof,
    #[error("invalid signature encoding")]
    InvalidSignatureEncoding,

    // Verification Errors
    #[error("insufficient signers: {non_signers} non-signers with {assumed_honest} assumed honest")]
    InsufficientSigners {
        non_signers: u64,
        assumed_honest: u64,
    },
    #[error("bad signature")]
    BadSignature,
    #[error("result does not match expected hash")]
    HashMismatch,
    #[error("timeout mismatch: expected {expected}, got {actual}")]
    TimeoutMismatch { expected: u64, actual: u64 },
    #[error("aggregate signature verification failed")]
    AggregateVerificationFailed,
    #[error("certificate expires too soon: timeout {timeout} < {required}")]
    LifetimeTooShort { timeout: u64, required: u64 },

    // Quorum Errors
    /// Not enough committee members stored the message. Callers may fall back to another
    /// data availability provider.
    #[error("unable to batch to DAS: insufficient committee responses (required {required} of {total}, assumed honest {assumed_honest})")]
    InsufficientResponses {
        required: u64,
        total: u64,
        assumed_honest: u64,
    },
    #[error("fallback requested: {0}")]
    FallbackRequested(Box<Error>),
    #[error("message too large: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    // Backend Errors
    #[error("not found")]
    NotFound,
    #[error("timeout")]
    Timeout,
    #[error("canceled")]
    Canceled,
    #[error("storage: {0}")]
    Storage(String),

    // Configuration Errors
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid signers mask: {0:#x}")]
    InvalidSignersMask(u64),
}

impl Error {
    /// Returns true if the error indicates that the committee could not reach quorum.
    pub fn is_batch_failure(&self) -> bool {
        match self {
            Error::InsufficientResponses { .. } => true,
            Error::FallbackRequested(inner) => inner.is_batch_failure(),
            _ => false,
        }
    }
}

/// How long a [Reader] retains data it serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExpirationPolicy {
    KeepForever,
    DiscardAfterArchiveTimeout,
    DiscardAfterDataTimeout,
    MixedTimeout,
    DiscardImmediately,
}

impl ExpirationPolicy {
    fn as_str(&self) -> &'static str {
        match self {
            Self::KeepForever => "KeepForever",
            Self::DiscardAfterArchiveTimeout => "DiscardAfterArchiveTimeout",
            Self::DiscardAfterDataTimeout => "DiscardAfterDataTimeout",
            Self::MixedTimeout => "MixedTimeout",
            Self::DiscardImmediately => "DiscardImmediately",
        }
    }
}

impl Display for ExpirationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpirationPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "KeepForever" => Ok(Self::KeepForever),
            "DiscardAfterArchiveTimeout" => Ok(Self::DiscardAfterArchiveTimeout),
            "DiscardAfterDataTimeout" => Ok(Self::DiscardAfterDataTimeout),
            "MixedTimeout" => Ok(Self::MixedTimeout),
            "DiscardImmediately" => Ok(Self::DiscardImmediately),
            _ => Err(Error::InvalidConfig(format!(
                "unknown expiration policy: {s}"
            ))),
        }
    }
}

/// Retrieves messages by content hash.
///
/// The [Display] implementation is used as a label in logs.
pub trait Reader: Clone + Display + Send + Sync + 'static {
    /// Returns the message addressed by `hash` (see [tree::valid_hash]).
    fn get_by_hash(&self, hash: Digest) -> impl Future<Output = Result<Bytes, Error>> + Send;

    /// Returns how long this reader retains data.
    fn expiration_policy(&self) -> impl Future<Output = Result<ExpirationPolicy, Error>> + Send;
}

/// Stores messages and attests to their availability.
///
/// The [Display] implementation is used as a label in logs.
pub trait Writer: Clone + Display + Send + Sync + 'static {
    /// Requests that `message` be stored until `timeout` (unix seconds) and returns a
    /// [Certificate] attesting to it.
    fn store(
        &self,
        message: Bytes,
        timeout: u64,
    ) -> impl Future<Output = Result<Certificate, Error>> + Send;
}

/// A [Reader] that can also persist messages.
pub trait Storage: Reader {
    /// Persists `message` until at least `timeout` (unix seconds).
    fn put(&self, message: Bytes, timeout: u64) -> impl Future<Output = Result<(), Error>> + Send;

    /// Ensures all prior calls to [Storage::put] are durable.
    fn sync(&self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Retrieves serialized keysets by hash.
pub trait KeysetFetcher: Send + Sync {
    fn get_keyset_by_hash(&self, hash: Digest)
        -> impl Future<Output = Result<Bytes, Error>> + Send;
}
