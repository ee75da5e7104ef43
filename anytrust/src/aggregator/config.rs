use crate::{bls::PublicKey, Error, Writer};
use std::{fmt, time::Duration};

/// Configuration for the [super::Aggregator].
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of committee members assumed honest (`H`).
    ///
    /// With `N` members, a certificate requires `N + 1 - H` signatures, so up to `H - 1` members
    /// may fail before a store is abandoned. Must satisfy `0 < H <= N`.
    pub assumed_honest: u64,

    /// Maximum time to wait for any single member to store a message.
    pub request_timeout: Duration,
}

/// A committee member as seen by the [super::Aggregator].
#[derive(Clone)]
pub struct ServiceDetails<W: Writer> {
    /// Handle used to request that the member store a message.
    pub writer: W,

    /// Key the member signs with.
    pub public_key: PublicKey,

    /// The member's bit in a certificate's signers mask. Exactly one bit must be set.
    pub signers_mask: u64,

    /// Label used in logs.
    pub label: String,
}

impl<W: Writer> ServiceDetails<W> {
    /// Creates a new member, rejecting masks that do not have exactly one bit set.
    pub fn new(
        writer: W,
        public_key: PublicKey,
        signers_mask: u64,
        label: impl Into<String>,
    ) -> Result<Self, Error> {
        if signers_mask.count_ones() != 1 {
            return Err(Error::InvalidSignersMask(signers_mask));
        }
        Ok(Self {
            writer,
            public_key,
            signers_mask,
            label: label.into(),
        })
    }

    /// Index of the member's key in the committee keyset.
    pub fn index(&self) -> u32 {
        self.signers_mask.trailing_zeros()
    }
}

impl<W: Writer> fmt::Display for ServiceDetails<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ServiceDetails{{service: {}, signers_mask: {:#x}}}",
            self.writer, self.signers_mask
        )
    }
}
