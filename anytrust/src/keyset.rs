//! The committee's public keys and honesty threshold.
//!
//! # Format
//!
//! ```text
//! +---------------------+---------------+-------------------------------------+
//! | assumed_honest (u64)| count (u64)   | count x [ len (u16) | public key ]  |
//! +---------------------+---------------+-------------------------------------+
//! ```
//!
//! All integers are big-endian. Each public key is encoded as either:
//!
//! ```text
//! trusted:    0x00 | point (48)
//! with proof: proof_len (1) | proof (96) | point (48)
//! ```
//!
//! Both [Keyset] and [PublicKey] decode with a `bool` config: when `false` (an untrusted
//! source), every key must carry a proof of possession, which is verified while decoding.
//!
//! A keyset is addressed purely by the [tree](crate::tree) hash of its encoding.

use crate::{
    bls::{self, PublicKey, Signature, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH},
    tree, Digest, Error,
};
use bytes::{Buf, BufMut};
use commonware_codec::{Decode, Encode, EncodeSize, Error as CodecError, Read, ReadExt, Write};
use commonware_cryptography::bls12381::primitives::group::G1;

/// Maximum number of keys in a [Keyset] (the width of a signers mask).
pub const MAX_KEYS: usize = 64;

/// Maximum size of an encoded [Keyset].
pub const MAX_ENCODED_SIZE: usize = tree::BIN_SIZE;

const KEYSET: &str = "anytrust::Keyset";
const PUBLIC_KEY: &str = "anytrust::PublicKey";

const TOO_MANY_KEYS: &str = "too many keys";
const UNTRUSTED_KEY: &str = "untrusted key without proof";
const INVALID_LENGTH: &str = "invalid key length";
const INVALID_POINT: &str = "invalid point";
const INVALID_PROOF_ENCODING: &str = "invalid proof encoding";
const INVALID_PROOF: &str = "invalid proof";

/// Maps a decoding failure to the matching [Error].
fn decode_error(err: CodecError) -> Error {
    match err {
        CodecError::Invalid(_, TOO_MANY_KEYS) => Error::TooManyKeys,
        CodecError::Invalid(_, UNTRUSTED_KEY) => Error::UntrustedUnvalidatedKey,
        CodecError::Invalid(_, INVALID_LENGTH | INVALID_POINT) => Error::InvalidPublicKey,
        CodecError::Invalid(_, INVALID_PROOF_ENCODING) => Error::InvalidSignatureEncoding,
        CodecError::Invalid(_, INVALID_PROOF) => Error::InvalidKeyProof,
        _ => Error::MalformedKeyset,
    }
}

impl Write for PublicKey {
    fn write(&self, buf: &mut impl BufMut) {
        match self.proof() {
            Some(proof) => {
                (SIGNATURE_LENGTH as u8).write(buf);
                proof.write(buf);
            }
            None => 0u8.write(buf),
        }
        self.point().write(buf);
    }
}

impl Read for PublicKey {
    /// Whether the key comes from a trusted source.
    type Cfg = bool;

    fn read_cfg(buf: &mut impl Buf, trusted: &bool) -> Result<Self, CodecError> {
        let proof_len = u8::read(buf)? as usize;
        if proof_len == 0 {
            if !trusted {
                return Err(CodecError::Invalid(PUBLIC_KEY, UNTRUSTED_KEY));
            }
            let point = read_point(buf)?;
            return Ok(PublicKey::trusted(point));
        }

        if proof_len != SIGNATURE_LENGTH {
            return Err(CodecError::Invalid(PUBLIC_KEY, INVALID_LENGTH));
        }
        let proof = Signature::read(buf).map_err(|err| match err {
            CodecError::EndOfBuffer => CodecError::EndOfBuffer,
            _ => CodecError::Invalid(PUBLIC_KEY, INVALID_PROOF_ENCODING),
        })?;
        let point = read_point(buf)?;
        if *trusted {
            return Ok(PublicKey::with_trusted_proof(point, proof));
        }
        PublicKey::with_proof(point, proof)
            .map_err(|_| CodecError::Invalid(PUBLIC_KEY, INVALID_PROOF))
    }
}

impl EncodeSize for PublicKey {
    fn encode_size(&self) -> usize {
        1 + self.proof().map_or(0, |_| SIGNATURE_LENGTH) + PUBLIC_KEY_LENGTH
    }
}

fn read_point(buf: &mut impl Buf) -> Result<G1, CodecError> {
    if buf.remaining() < PUBLIC_KEY_LENGTH {
        return Err(CodecError::Invalid(PUBLIC_KEY, INVALID_LENGTH));
    }
    G1::read(buf).map_err(|_| CodecError::Invalid(PUBLIC_KEY, INVALID_POINT))
}

/// Decodes a single public key (without a length prefix).
///
/// Keys from an untrusted source must carry a proof of possession, which is verified before
/// the key is returned.
pub fn decode_public_key(bytes: &[u8], trusted: bool) -> Result<PublicKey, Error> {
    PublicKey::decode_cfg(bytes, &trusted).map_err(|err| match err {
        CodecError::EndOfBuffer | CodecError::ExtraData(_) => Error::InvalidPublicKey,
        err => decode_error(err),
    })
}

/// A committee's public keys (in signers mask bit order) and the number of members assumed honest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keyset {
    assumed_honest: u64,
    keys: Vec<PublicKey>,
}

impl Keyset {
    /// Creates a new keyset. Fails if there are more than [MAX_KEYS] keys.
    pub fn new(assumed_honest: u64, keys: Vec<PublicKey>) -> Result<Self, Error> {
        if keys.len() > MAX_KEYS {
            return Err(Error::TooManyKeys);
        }
        Ok(Self {
            assumed_honest,
            keys,
        })
    }

    pub fn assumed_honest(&self) -> u64 {
        self.assumed_honest
    }

    pub fn keys(&self) -> &[PublicKey] {
        &self.keys
    }

    /// Decodes a keyset from `buf`, which must contain nothing else.
    ///
    /// When `trusted` is false, every key must carry a valid proof of possession.
    pub fn decode(buf: &[u8], trusted: bool) -> Result<Self, Error> {
        Self::decode_cfg(buf, &trusted).map_err(decode_error)
    }

    /// Returns the content hash of the encoded keyset.
    pub fn hash(&self) -> Result<Digest, Error> {
        let size = self.encode_size();
        if size > MAX_ENCODED_SIZE {
            return Err(Error::KeysetTooLarge(size));
        }
        Ok(tree::hash(&self.encode()))
    }

    /// Verifies that `signature` over `message` was produced by the members in `signers_mask`
    /// and that enough members signed.
    ///
    /// Bits beyond the number of keys are ignored.
    pub fn verify(
        &self,
        signers_mask: u64,
        message: &[u8],
        signature: &Signature,
    ) -> Result<(), Error> {
        let mut signers = Vec::with_capacity(self.keys.len());
        let mut non_signers = 0u64;
        for (i, key) in self.keys.iter().enumerate() {
            if signers_mask & (1 << i) != 0 {
                signers.push(key);
            } else {
                non_signers += 1;
            }
        }
        if signers.is_empty() || non_signers >= self.assumed_honest {
            return Err(Error::InsufficientSigners {
                non_signers,
                assumed_honest: self.assumed_honest,
            });
        }

        bls::aggregate_public_keys(signers)
            .verify(message, signature)
            .map_err(|_| Error::BadSignature)
    }
}

impl Write for Keyset {
    fn write(&self, buf: &mut impl BufMut) {
        self.assumed_honest.write(buf);
        (self.keys.len() as u64).write(buf);
        for key in &self.keys {
            (key.encode_size() as u16).write(buf);
            key.write(buf);
        }
    }
}

impl Read for Keyset {
    /// Whether the keys come from a trusted source.
    type Cfg = bool;

    fn read_cfg(buf: &mut impl Buf, trusted: &bool) -> Result<Self, CodecError> {
        let assumed_honest = u64::read(buf)?;
        let count = u64::read(buf)?;
        if count > MAX_KEYS as u64 {
            return Err(CodecError::Invalid(KEYSET, TOO_MANY_KEYS));
        }
        let mut keys = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = u16::read(buf)? as usize;
            if buf.remaining() < len {
                return Err(CodecError::EndOfBuffer);
            }
            let mut key = buf.copy_to_bytes(len);
            keys.push(PublicKey::read_cfg(&mut key, trusted)?);
            if key.has_remaining() {
                return Err(CodecError::Invalid(PUBLIC_KEY, INVALID_LENGTH));
            }
        }
        Ok(Self {
            assumed_honest,
            keys,
        })
    }
}

impl EncodeSize for Keyset {
    fn encode_size(&self) -> usize {
        8 + 8 + self.keys.iter().map(|key| 2 + key.encode_size()).sum::<usize>()
    }
}
