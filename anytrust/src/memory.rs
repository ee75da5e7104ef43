//! In-memory [crate::Storage] backend.

use crate::{tree, Digest, Error, ExpirationPolicy, KeysetFetcher, Reader};
use bytes::Bytes;
use std::{
    collections::HashMap,
    fmt::{self, Display},
    sync::{Arc, Mutex},
};
use tracing::trace;

struct Entry {
    message: Bytes,
    expiry: u64,
}

/// A content-addressed, in-memory store.
///
/// Messages are keyed by their [tree] hash and never discarded. Clones share the same
/// underlying map.
#[derive(Clone, Default)]
pub struct Storage {
    entries: Arc<Mutex<HashMap<Digest, Entry>>>,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the expiry recorded for `hash`, if stored.
    pub fn expiry(&self, hash: &Digest) -> Option<u64> {
        let entries = self.entries.lock().ok()?;
        entries.get(hash).map(|entry| entry.expiry)
    }

    /// Returns the number of stored messages.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, hash: &Digest) -> Result<Bytes, Error> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::Storage("poisoned".into()))?;
        entries
            .get(hash)
            .map(|entry| entry.message.clone())
            .ok_or(Error::NotFound)
    }
}

impl Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory::Storage")
    }
}

impl Reader for Storage {
    async fn get_by_hash(&self, hash: Digest) -> Result<Bytes, Error> {
        self.get(&hash)
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy, Error> {
        Ok(ExpirationPolicy::KeepForever)
    }
}

impl crate::Storage for Storage {
    async fn put(&self, message: Bytes, timeout: u64) -> Result<(), Error> {
        let hash = tree::hash(&message);
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Storage("poisoned".into()))?;
        let entry = entries.entry(hash).or_insert(Entry { message, expiry: 0 });
        entry.expiry = entry.expiry.max(timeout);
        trace!(hash = %hex::encode(hash), expiry = entry.expiry, "stored");
        Ok(())
    }

    async fn sync(&self) -> Result<(), Error> {
        Ok(())
    }
}

impl KeysetFetcher for Storage {
    async fn get_keyset_by_hash(&self, hash: Digest) -> Result<Bytes, Error> {
        self.get(&hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Storage as _;
    use commonware_runtime::{deterministic, Runner};

    #[test]
    fn test_put_get() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let storage = Storage::new();
            let message = Bytes::from_static(b"hello");
            let hash = tree::hash(&message);
            assert_eq!(storage.get_by_hash(hash).await, Err(Error::NotFound));

            storage.put(message.clone(), 10).await.unwrap();
            storage.sync().await.unwrap();
            assert_eq!(storage.get_by_hash(hash).await.unwrap(), message);
            assert_eq!(storage.expiry(&hash), Some(10));
            assert_eq!(storage.len(), 1);

            // Flat hashes are not indexed
            assert_eq!(
                storage.get_by_hash(tree::keccak(&message)).await,
                Err(Error::NotFound)
            );
        });
    }

    #[test]
    fn test_keeps_latest_expiry() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let storage = Storage::new();
            let message = Bytes::from_static(b"hello");
            let hash = tree::hash(&message);
            storage.put(message.clone(), 20).await.unwrap();
            storage.put(message.clone(), 10).await.unwrap();
            assert_eq!(storage.expiry(&hash), Some(20));
            storage.put(message, 30).await.unwrap();
            assert_eq!(storage.expiry(&hash), Some(30));
            assert_eq!(storage.len(), 1);
            assert_eq!(
                storage.expiration_policy().await,
                Ok(ExpirationPolicy::KeepForever)
            );
        });
    }
}
