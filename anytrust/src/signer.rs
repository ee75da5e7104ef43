//! A single committee member that persists a message before attesting to it.
//!
//! [SignAfterStore] signs the certificate before writing the message (signing is cheap and has no
//! side effects) but only returns the certificate once the message has been written and synced.
//! If either write fails, the signed certificate is dropped.

use crate::{
    bls::{PrivateKey, PublicKey},
    Certificate, Digest, Error, Keyset, Storage, Writer,
};
use bytes::Bytes;
use commonware_codec::Encode;
use std::{
    fmt::{self, Display},
    sync::Arc,
};
use tracing::{debug, warn};

/// Certificate version produced by committee members.
pub const VERSION: u8 = 1;

struct Inner<S: Storage> {
    private: PrivateKey,
    public: PublicKey,
    keyset_hash: Digest,
    keyset_bytes: Bytes,
    storage: S,
}

/// Signs messages after persisting them to a [Storage].
#[derive(Clone)]
pub struct SignAfterStore<S: Storage> {
    inner: Arc<Inner<S>>,
}

impl<S: Storage> SignAfterStore<S> {
    /// Creates a member from its signing key and backing storage.
    ///
    /// The member's own keyset contains only its public key with `assumed_honest = 1`.
    pub fn new(private: PrivateKey, storage: S) -> Result<Self, Error> {
        let public = private.public_key();
        let keyset = Keyset::new(1, vec![public])?;
        let keyset_hash = keyset.hash()?;
        let keyset_bytes = keyset.encode().freeze();
        Ok(Self {
            inner: Arc::new(Inner {
                private,
                public,
                keyset_hash,
                keyset_bytes,
                storage,
            }),
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.inner.public
    }

    /// Hash of the member's single-key keyset.
    pub fn keyset_hash(&self) -> Digest {
        self.inner.keyset_hash
    }

    /// Encoding of the member's single-key keyset.
    pub fn keyset_bytes(&self) -> &[u8] {
        &self.inner.keyset_bytes
    }

    pub fn storage(&self) -> &S {
        &self.inner.storage
    }
}

impl<S: Storage> Display for SignAfterStore<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SignAfterStore{{keyset_hash: {}, storage: {}}}",
            hex::encode(self.inner.keyset_hash),
            self.inner.storage
        )
    }
}

impl<S: Storage> Writer for SignAfterStore<S> {
    async fn store(&self, message: Bytes, timeout: u64) -> Result<Certificate, Error> {
        let inner = &self.inner;
        let data_hash = Certificate::data_hash_for(VERSION, &message);
        let signature = inner
            .private
            .sign(&Certificate::signable(&data_hash, timeout, VERSION));
        let mut certificate = Certificate {
            keyset_hash: [0; 32],
            data_hash,
            timeout,
            signers_mask: 1,
            signature,
            version: VERSION,
        };

        if let Err(err) = inner.storage.put(message, timeout).await {
            warn!(?err, "failed to store message");
            return Err(err);
        }
        if let Err(err) = inner.storage.sync().await {
            warn!(?err, "failed to sync storage");
            return Err(err);
        }

        certificate.keyset_hash = inner.keyset_hash;
        debug!(
            data_hash = %hex::encode(certificate.data_hash),
            timeout, "stored and signed"
        );
        Ok(certificate)
    }
}
