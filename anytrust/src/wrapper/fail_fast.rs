use crate::{Certificate, Digest, Error, ExpirationPolicy, Reader, Writer};
use bytes::Bytes;
use std::fmt;
use tracing::error;

/// Escalates any error from the inner [Reader] or [Writer] to a panic.
///
/// Intended for operators that would rather halt than continue without data availability. A read
/// that fails with [Error::Canceled] is logged and returned instead, as cancellation is expected
/// during shutdown.
#[derive(Clone)]
pub struct FailFast<T> {
    inner: T,
}

impl<T> FailFast<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: fmt::Display> fmt::Display for FailFast<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FailFast{{{}}}", self.inner)
    }
}

impl<T: Reader> Reader for FailFast<T> {
    async fn get_by_hash(&self, hash: Digest) -> Result<Bytes, Error> {
        match self.inner.get_by_hash(hash).await {
            Ok(data) => Ok(data),
            Err(Error::Canceled) => {
                error!(hash = %hex::encode(hash), reader = %self.inner, "read canceled");
                Err(Error::Canceled)
            }
            Err(err) => panic!("{} failed to get {}: {err}", self.inner, hex::encode(hash)),
        }
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy, Error> {
        match self.inner.expiration_policy().await {
            Ok(policy) => Ok(policy),
            Err(err) => panic!("{} failed to get expiration policy: {err}", self.inner),
        }
    }
}

impl<T: Writer> Writer for FailFast<T> {
    async fn store(&self, message: Bytes, timeout: u64) -> Result<Certificate, Error> {
        match self.inner.store(message, timeout).await {
            Ok(certificate) => Ok(certificate),
            Err(err) => panic!("{} failed to store: {err}", self.inner),
        }
    }
}
