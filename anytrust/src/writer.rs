//! Serialize certificates for a batch poster.
//!
//! [CertificateWriter] stores a batch with any [Writer] and returns the encoded [crate::Certificate]
//! that gets posted in its place. When the committee could not reach quorum, the error is wrapped
//! in [Error::FallbackRequested] so the poster can move on to another data availability provider.

use crate::{Error, Writer};
use bytes::Bytes;
use commonware_codec::Encode;
use std::fmt;
use tracing::{debug, warn};

/// Default limit on the size of a stored message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Configuration for [CertificateWriter].
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Largest message accepted (0 uses [DEFAULT_MAX_MESSAGE_SIZE]).
    pub max_message_size: usize,
}

/// Stores messages and returns their encoded certificate.
#[derive(Clone)]
pub struct CertificateWriter<W: Writer> {
    writer: W,
    max_message_size: usize,
}

impl<W: Writer> CertificateWriter<W> {
    pub fn new(writer: W, cfg: Config) -> Self {
        let max_message_size = match cfg.max_message_size {
            0 => DEFAULT_MAX_MESSAGE_SIZE,
            size => size,
        };
        Self {
            writer,
            max_message_size,
        }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Stores `message` until `timeout` and returns the encoded certificate.
    pub async fn store(&self, message: Bytes, timeout: u64) -> Result<Bytes, Error> {
        let size = message.len();
        if size > self.max_message_size {
            return Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        let certificate = match self.writer.store(message, timeout).await {
            Ok(certificate) => certificate,
            Err(err) if err.is_batch_failure() => {
                warn!(writer = %self.writer, ?err, "falling back to another provider");
                return Err(Error::FallbackRequested(Box::new(err)));
            }
            Err(err) => return Err(err),
        };
        debug!(
            data_hash = %hex::encode(certificate.data_hash),
            signers_mask = certificate.signers_mask,
            "stored batch"
        );
        Ok(certificate.encode().freeze())
    }
}

impl<W: Writer> fmt::Display for CertificateWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CertificateWriter{{{}}}", self.writer)
    }
}
