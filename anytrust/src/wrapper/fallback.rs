use crate::{tree, Digest, Error, ExpirationPolicy, Reader, Storage};
use bytes::Bytes;
use commonware_runtime::Clock;
use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, UNIX_EPOCH},
};
use tracing::{debug, warn};

/// Configuration for [Fallback].
#[derive(Clone, Debug)]
pub struct Config {
    /// How long data copied from the backup is retained by the primary.
    pub backup_retention: Duration,

    /// If true, a failure to copy data from the backup into the primary is logged and the data
    /// is still returned.
    pub ignore_retention_write_errors: bool,

    /// If true, a lookup for a hash that is already being fetched from the backup returns
    /// [Error::NotFound] instead of querying the backup again.
    ///
    /// This breaks cycles where the backup (directly or indirectly) reads from this store.
    pub prevent_recursive_gets: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_retention: Duration::from_secs(u64::MAX),
            ignore_retention_write_errors: true,
            prevent_recursive_gets: true,
        }
    }
}

/// Removes a hash from the in-flight set when dropped.
struct InFlight {
    hashes: Arc<Mutex<HashSet<Digest>>>,
    hash: Digest,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.hashes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.hash);
    }
}

/// Reads from a primary [Storage], falling back to a backup [Reader] on a miss.
///
/// Data retrieved from the backup is checked against the requested hash and written back into the
/// primary, to be retained for [Config::backup_retention] from the current time of `E`.
#[derive(Clone)]
pub struct Fallback<E: Clock, P, B> {
    context: E,
    primary: P,
    backup: B,
    cfg: Config,
    in_flight: Arc<Mutex<HashSet<Digest>>>,
}

impl<E: Clock, P: Storage, B: Reader> Fallback<E, P, B> {
    pub fn new(context: E, primary: P, backup: B, cfg: Config) -> Self {
        Self {
            context,
            primary,
            backup,
            cfg,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    /// Marks `hash` as in flight, returning `None` if it already was.
    fn mark(&self, hash: Digest) -> Option<InFlight> {
        let mut hashes = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !hashes.insert(hash) {
            return None;
        }
        Some(InFlight {
            hashes: self.in_flight.clone(),
            hash,
        })
    }

    fn is_in_flight(&self, hash: &Digest) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(hash)
    }

    /// Unix seconds at which data copied from the backup may be discarded.
    fn retention_expiry(&self) -> u64 {
        let now = self
            .context
            .current()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        now.saturating_add(self.cfg.backup_retention.as_secs())
    }
}

impl<E: Clock, P: Storage, B: Reader> fmt::Display for Fallback<E, P, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fallback{{primary: {}, backup: {}}}", self.primary, self.backup)
    }
}

impl<E: Clock, P: Storage, B: Reader> Reader for Fallback<E, P, B> {
    async fn get_by_hash(&self, hash: Digest) -> Result<Bytes, Error> {
        if self.cfg.prevent_recursive_gets && self.is_in_flight(&hash) {
            debug!(hash = %hex::encode(hash), "already fetching from backup");
            return Err(Error::NotFound);
        }
        let err = match self.primary.get_by_hash(hash).await {
            Ok(data) => return Ok(data),
            Err(err) => err,
        };
        debug!(hash = %hex::encode(hash), ?err, "falling back to backup");

        // Hold the mark until the backup responds
        let _in_flight = if self.cfg.prevent_recursive_gets {
            match self.mark(hash) {
                Some(in_flight) => Some(in_flight),
                None => return Err(Error::NotFound),
            }
        } else {
            None
        };
        let data = self.backup.get_by_hash(hash).await?;
        if !tree::valid_hash(&hash, &data) {
            warn!(
                hash = %hex::encode(hash),
                backup = %self.backup,
                "backup returned mismatched data"
            );
            return Err(Error::HashMismatch);
        }

        if let Err(err) = self
            .primary
            .put(data.clone(), self.retention_expiry())
            .await
        {
            if !self.cfg.ignore_retention_write_errors {
                return Err(err);
            }
            warn!(hash = %hex::encode(hash), ?err, "failed to retain data from backup");
        }
        Ok(data)
    }

    async fn expiration_policy(&self) -> Result<ExpirationPolicy, Error> {
        self.primary.expiration_policy().await
    }
}

impl<E: Clock, P: Storage, B: Reader> Storage for Fallback<E, P, B> {
    async fn put(&self, message: Bytes, timeout: u64) -> Result<(), Error> {
        self.primary.put(message, timeout).await
    }

    async fn sync(&self) -> Result<(), Error> {
        self.primary.sync().await
    }
}
