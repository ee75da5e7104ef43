//! Data availability certificates.
//!
//! # Format
//!
//! ```text
//! +-------+-------------+-----------+--------------+--------------+-------------------+----------------+
//! | flags | keyset_hash | data_hash | timeout (u64)| [version(u8)]| signers_mask (u64)| signature (96) |
//! +-------+-------------+-----------+--------------+--------------+-------------------+----------------+
//! ```
//!
//! All integers are big-endian. `flags` always carries [HEADER_FLAG]; [TREE_FLAG] is set (and the
//! version byte is present) if and only if `version != 0`.
//!
//! Only the [signable fields](Certificate::signable_fields) are signed:
//! `data_hash | timeout | [version if version != 0]`.

use crate::{bls::Signature, tree, Digest, Error, KeysetFetcher, Keyset};
use bytes::{Buf, BufMut};
use commonware_codec::{Decode, EncodeSize, Error as CodecError, Read, ReadExt, Write};
use tracing::debug;

/// Marks a certificate.
pub const HEADER_FLAG: u8 = 0x80;

/// Marks a certificate whose data hash is a [tree] hash (and that carries a version byte).
pub const TREE_FLAG: u8 = 0x08;

/// Minimum number of seconds a certificate must outlive the batch that references it.
pub const MIN_LIFETIME_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Highest certificate version understood by this crate.
pub const MAX_VERSION: u8 = 1;

const CERTIFICATE: &str = "anytrust::Certificate";
const INVALID_FLAGS: &str = "invalid flags";
const INVALID_SIGNATURE: &str = "invalid signature";

/// A signed attestation that a committee stored a message until `timeout`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    /// Hash of the [Keyset] whose members signed.
    pub keyset_hash: Digest,
    /// Hash of the attested message ([Certificate::data_hash_for]).
    pub data_hash: Digest,
    /// Unix seconds until which the message is stored.
    pub timeout: u64,
    /// Bit `i` is set if member `i` of the keyset signed.
    pub signers_mask: u64,
    /// Aggregate signature over [Certificate::signable_fields].
    pub signature: Signature,
    pub version: u8,
}

impl Certificate {
    /// Returns the data hash of `message` for the given certificate `version`.
    pub fn data_hash_for(version: u8, message: &[u8]) -> Digest {
        if version == 0 {
            tree::keccak(message)
        } else {
            tree::hash(message)
        }
    }

    /// Returns the bytes covered by the signature.
    pub fn signable_fields(&self) -> Vec<u8> {
        Self::signable(&self.data_hash, self.timeout, self.version)
    }

    /// Returns the bytes a member signs to attest to `data_hash` until `timeout`.
    pub fn signable(data_hash: &Digest, timeout: u64, version: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 8 + 1);
        buf.put_slice(data_hash);
        buf.put_u64(timeout);
        if version != 0 {
            buf.put_u8(version);
        }
        buf
    }

    /// Decodes a certificate from `buf`, which must contain nothing else.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        Self::decode_cfg(buf, &()).map_err(|err| match err {
            CodecError::Invalid(_, INVALID_SIGNATURE) => Error::InvalidSignatureEncoding,
            _ => Error::MalformedCertificate,
        })
    }

    /// Verifies the certificate's signature against `keyset`.
    ///
    /// The caller is responsible for checking that `keyset` hashes to [Certificate::keyset_hash].
    pub fn verify(&self, keyset: &Keyset) -> Result<(), Error> {
        if self.version > MAX_VERSION {
            return Err(Error::UnsupportedVersion(self.version));
        }
        keyset.verify(self.signers_mask, &self.signable_fields(), &self.signature)
    }

    /// Checks that the certificate outlives `max_timestamp` by at least [MIN_LIFETIME_SECONDS].
    pub fn check_lifetime(&self, max_timestamp: u64) -> Result<(), Error> {
        let required = max_timestamp.saturating_add(MIN_LIFETIME_SECONDS);
        if self.timeout < required {
            return Err(Error::LifetimeTooShort {
                timeout: self.timeout,
                required,
            });
        }
        Ok(())
    }

    /// Fetches and decodes the keyset that signed this certificate.
    ///
    /// If `assume_valid` is true, keys are decoded without checking proofs of possession.
    pub async fn recover_keyset<F: KeysetFetcher>(
        &self,
        fetcher: &F,
        assume_valid: bool,
    ) -> Result<Keyset, Error> {
        let bytes = fetcher.get_keyset_by_hash(self.keyset_hash).await?;
        if !tree::valid_hash(&self.keyset_hash, &bytes) {
            debug!(
                keyset_hash = %hex::encode(self.keyset_hash),
                "keyset does not match certificate"
            );
            return Err(Error::HashMismatch);
        }
        Keyset::decode(&bytes, assume_valid)
    }
}

impl Write for Certificate {
    fn write(&self, buf: &mut impl BufMut) {
        let mut flags = HEADER_FLAG;
        if self.version != 0 {
            flags |= TREE_FLAG;
        }
        flags.write(buf);
        self.keyset_hash.write(buf);
        self.data_hash.write(buf);
        self.timeout.write(buf);
        if self.version != 0 {
            self.version.write(buf);
        }
        self.signers_mask.write(buf);
        self.signature.write(buf);
    }
}

impl Read for Certificate {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let flags = u8::read(buf)?;
        if flags != HEADER_FLAG && flags != HEADER_FLAG | TREE_FLAG {
            return Err(CodecError::Invalid(CERTIFICATE, INVALID_FLAGS));
        }
        let keyset_hash = <[u8; 32]>::read(buf)?;
        let data_hash = <[u8; 32]>::read(buf)?;
        let timeout = u64::read(buf)?;
        let version = match flags & TREE_FLAG {
            0 => 0,
            _ => match u8::read(buf)? {
                0 => return Err(CodecError::Invalid(CERTIFICATE, "tree flag without version")),
                version => version,
            },
        };
        let signers_mask = u64::read(buf)?;
        let signature = Signature::read(buf).map_err(|err| match err {
            CodecError::EndOfBuffer => CodecError::EndOfBuffer,
            _ => CodecError::Invalid(CERTIFICATE, INVALID_SIGNATURE),
        })?;
        Ok(Self {
            keyset_hash,
            data_hash,
            timeout,
            signers_mask,
            signature,
            version,
        })
    }
}

impl EncodeSize for Certificate {
    fn encode_size(&self) -> usize {
        1 + 32 + 32 + 8 + (self.version != 0) as usize + 8 + self.signature.encode_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bls::{aggregate_signatures, PrivateKey, SIGNATURE_LENGTH},
        memory, Storage,
    };
    use commonware_codec::Encode;
    use commonware_runtime::{deterministic, Runner};
    use test_case::test_case;

    fn signed(privates: &[PrivateKey], keyset: &Keyset, version: u8) -> Certificate {
        let data_hash = Certificate::data_hash_for(version, b"certified");
        let timeout = 1_700_000_000;
        let fields = Certificate::signable(&data_hash, timeout, version);
        let signatures: Vec<_> = privates.iter().map(|k| k.sign(&fields)).collect();
        Certificate {
            keyset_hash: keyset.hash().unwrap(),
            data_hash,
            timeout,
            signers_mask: (1 << privates.len()) - 1,
            signature: aggregate_signatures(&signatures),
            version,
        }
    }

    fn committee() -> (Vec<PrivateKey>, Keyset) {
        let privates: Vec<_> = (0..3).map(PrivateKey::from_seed).collect();
        let keys = privates.iter().map(|k| k.public_key()).collect();
        (privates, Keyset::new(1, keys).unwrap())
    }

    #[test_case(0; "flat")]
    #[test_case(1; "tree")]
    fn test_codec(version: u8) {
        let (privates, keyset) = committee();
        let certificate = signed(&privates, &keyset, version);
        let encoded = certificate.encode();
        assert_eq!(encoded.len(), certificate.encode_size());
        assert_eq!(encoded.len(), 177 + (version != 0) as usize);
        assert_eq!(encoded[0] & HEADER_FLAG, HEADER_FLAG);
        assert_eq!(encoded[0] & TREE_FLAG != 0, version != 0);

        let decoded = Certificate::decode(&encoded).unwrap();
        assert_eq!(decoded, certificate);
        assert_eq!(decoded.encode(), encoded);
        decoded.verify(&keyset).unwrap();
    }

    #[test]
    fn test_signable_fields() {
        let (privates, keyset) = committee();
        let flat = signed(&privates, &keyset, 0);
        let fields = flat.signable_fields();
        assert_eq!(fields.len(), 40);
        assert_eq!(&fields[..32], &flat.data_hash);
        assert_eq!(&fields[32..], &flat.timeout.to_be_bytes());

        let tree = signed(&privates, &keyset, 1);
        let fields = tree.signable_fields();
        assert_eq!(fields.len(), 41);
        assert_eq!(fields[40], 1);
    }

    #[test]
    fn test_decode_malformed() {
        let (privates, keyset) = committee();
        let encoded = signed(&privates, &keyset, 1).encode();

        // Missing header
        let mut missing = encoded.clone();
        missing[0] = 0x08;
        assert_eq!(
            Certificate::decode(&missing),
            Err(Error::MalformedCertificate)
        );

        // Truncated
        for len in [0, 1, 64, 74, encoded.len() - 1] {
            assert_eq!(
                Certificate::decode(&encoded[..len]),
                Err(Error::MalformedCertificate)
            );
        }

        // Trailing
        let mut trailing = encoded.clone();
        trailing.put_u8(0);
        assert_eq!(
            Certificate::decode(&trailing),
            Err(Error::MalformedCertificate)
        );

        // Tree flag with a zero version
        let mut zero = encoded.clone();
        zero[73] = 0;
        assert_eq!(Certificate::decode(&zero), Err(Error::MalformedCertificate));

        // Signature not on the curve
        let mut signature = encoded;
        let len = signature.len();
        signature[len - SIGNATURE_LENGTH..].fill(0xff);
        assert_eq!(
            Certificate::decode(&signature),
            Err(Error::InvalidSignatureEncoding)
        );
    }

    #[test]
    fn test_verify_rejects_unknown_version() {
        let (privates, keyset) = committee();
        let certificate = signed(&privates, &keyset, 2);
        assert_eq!(
            certificate.verify(&keyset),
            Err(Error::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let (privates, keyset) = committee();
        let mut certificate = signed(&privates, &keyset, 1);
        certificate.timeout += 1;
        assert_eq!(certificate.verify(&keyset), Err(Error::BadSignature));
    }

    #[test]
    fn test_check_lifetime() {
        let (privates, keyset) = committee();
        let certificate = signed(&privates, &keyset, 1);
        let max = certificate.timeout - MIN_LIFETIME_SECONDS;
        certificate.check_lifetime(max).unwrap();
        assert_eq!(
            certificate.check_lifetime(max + 1),
            Err(Error::LifetimeTooShort {
                timeout: certificate.timeout,
                required: certificate.timeout + 1
            })
        );
        assert!(certificate.check_lifetime(u64::MAX).is_err());
    }

    #[test]
    fn test_decode_cfg_reports_codec_errors() {
        let (privates, keyset) = committee();
        let encoded = signed(&privates, &keyset, 1).encode();

        let mut trailing = encoded.clone();
        trailing.put_slice(&[0, 0, 0]);
        assert!(matches!(
            Certificate::decode_cfg(trailing, &()),
            Err(CodecError::ExtraData(3))
        ));
        assert!(matches!(
            Certificate::decode_cfg(&encoded[..100], &()),
            Err(CodecError::EndOfBuffer)
        ));

        let mut flags = encoded.clone();
        flags[0] = 0x88 | 0x01;
        assert!(matches!(
            Certificate::decode_cfg(flags, &()),
            Err(CodecError::Invalid(CERTIFICATE, INVALID_FLAGS))
        ));

        // Reading leaves whatever follows the certificate in the buffer
        let mut stream = encoded.clone();
        stream.put_slice(&encoded);
        let mut buf = stream.freeze();
        let first = Certificate::read(&mut buf).unwrap();
        assert_eq!(buf.len(), encoded.len());
        assert_eq!(Certificate::read(&mut buf).unwrap(), first);
    }

    #[test]
    fn test_recover_keyset() {
        let executor = deterministic::Runner::default();
        executor.start(|_| async move {
            let (privates, keyset) = committee();
            let certificate = signed(&privates, &keyset, 1);
            let storage = memory::Storage::new();

            // Missing keyset
            assert_eq!(
                certificate.recover_keyset(&storage, false).await,
                Err(Error::NotFound)
            );

            storage.put(keyset.encode().freeze(), u64::MAX).await.unwrap();
            let recovered = certificate.recover_keyset(&storage, false).await.unwrap();
            assert_eq!(recovered, keyset);
            certificate.verify(&recovered).unwrap();
        });
    }
}
