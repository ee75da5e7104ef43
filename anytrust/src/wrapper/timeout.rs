use crate::{Certificate, Digest, Error, ExpirationPolicy, Reader, Storage, Writer};
use bytes::Bytes;
use commonware_macros::select;
use commonware_runtime::Clock;
use std::{fmt, future::Future, time::Duration};

/// Bounds every call to the inner [Reader], [Storage] or [Writer] by a fixed deadline.
///
/// The deadline starts when the call is made and is dropped as soon as the call returns. A call
/// that does not complete in time fails with [Error::Timeout].
#[derive(Clone)]
pub struct Timeout<E: Clock, T> {
    context: E,
    inner: T,
    timeout: Duration,
}

impl<E: Clock, T> Timeout<E, T> {
    pub fn new(context: E, inner: T, timeout: Duration) -> Self {
        Self {
            context,
            inner,
            timeout,
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    async fn bounded<R>(&self, f: impl Future<Output = Result<R, Error>>) -> Result<R, Error> {
        select! {
            result = f => {
                result
            },
            _ = self.context.sleep(self.timeout) => {
                Err(Error::Timeout)
            },
        }
    }
}

impl<E: Clock, T: fmt::Display> fmt::Display for Timeout<E, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timeout{{{}, {:?}}}", self.inner, self.timeout)
    }
}

impl<E: Clock, T: Reader> Reader for Timeout<E, T> {
    async fn get_by_hash(&self, hash: Digest) -> Result<Bytes, Error> {
        self.bounded(self.inner.get_by_hash(hash)).await
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy, Error> {
        self.bounded(self.inner.expiration_policy()).await
    }
}

impl<E: Clock, T: Storage> Storage for Timeout<E, T> {
    async fn put(&self, message: Bytes, timeout: u64) -> Result<(), Error> {
        self.bounded(self.inner.put(message, timeout)).await
    }

    async fn sync(&self) -> Result<(), Error> {
        self.bounded(self.inner.sync()).await
    }
}

impl<E: Clock, T: Writer> Writer for Timeout<E, T> {
    async fn store(&self, message: Bytes, timeout: u64) -> Result<Certificate, Error> {
        self.bounded(self.inner.store(message, timeout)).await
    }
}
