//! BLS12-381 keys and signatures for committee attestations.
//!
//! Thin wrappers over the [MinPk] variant of `commonware-cryptography`: public keys are
//! [G1] points (48 bytes) and signatures are [G2] points (96 bytes). Signatures over the same
//! message by different keys aggregate by point addition and verify against the sum of the
//! signers' public keys.
//!
//! # Proof of Possession
//!
//! A [PublicKey] received from an untrusted source must carry a proof of possession (a signature
//! over its own encoding under the proof-of-possession DST). Without this proof, a malicious
//! committee member could publish a key derived from honest members' keys and forge aggregate
//! signatures (a rogue-key attack).
//!
//! # Example
//!
//! ```rust
//! use anytrust::bls::{aggregate_public_keys, aggregate_signatures, PrivateKey};
//! use rand::rngs::OsRng;
//!
//! let alice = PrivateKey::from_rng(&mut OsRng);
//! let bob = PrivateKey::from_rng(&mut OsRng);
//! let message = b"hello";
//!
//! let signature = aggregate_signatures(&[alice.sign(message), bob.sign(message)]);
//! let public = aggregate_public_keys(&[alice.public_key(), bob.public_key()]);
//! public.verify(message, &signature).unwrap();
//! ```

use bytes::{Buf, BufMut};
use commonware_codec::{Encode, EncodeSize, Error as CodecError, Read, ReadExt, Write};
use commonware_cryptography::bls12381::primitives::{
    group::{self, Element, G1, G2},
    ops,
    variant::MinPk,
};
use rand::{rngs::StdRng, CryptoRng, Rng, SeedableRng};
use std::fmt;
use thiserror::Error;
use zeroize::Zeroize;

/// Length of an encoded [PrivateKey].
pub const PRIVATE_KEY_LENGTH: usize = 32;

/// Length of an encoded [PublicKey] point (without any proof prefix).
pub const PUBLIC_KEY_LENGTH: usize = 48;

/// Length of an encoded [Signature].
pub const SIGNATURE_LENGTH: usize = 96;

/// Errors that can occur when working with BLS12-381 primitives.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid signature")]
    InvalidSignature,
}

/// A BLS12-381 signing key.
#[derive(Clone)]
pub struct PrivateKey(group::Private);

impl PrivateKey {
    /// Create a fresh [PrivateKey] using the supplied RNG.
    pub fn from_rng<R: Rng + CryptoRng>(rng: &mut R) -> Self {
        let (private, _) = ops::keypair::<_, MinPk>(rng);
        Self(private)
    }

    /// Create a [PrivateKey] from a seed.
    ///
    /// # Warning
    ///
    /// This function is insecure and should only be used for examples
    /// and testing.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::from_rng(&mut rng)
    }

    /// Returns the public point corresponding to this key.
    pub fn public_point(&self) -> G1 {
        ops::compute_public::<MinPk>(&self.0)
    }

    /// Returns the [PublicKey] corresponding to this key, with a proof of possession attached.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            point: self.public_point(),
            proof: Some(Signature(ops::sign_proof_of_possession::<MinPk>(&self.0))),
        }
    }

    /// Sign `message` under the message DST.
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(ops::sign_message::<MinPk>(&self.0, None, message))
    }
}

impl Write for PrivateKey {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl Read for PrivateKey {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let private = group::Private::read(buf)?;
        if private == group::Private::zero() {
            return Err(CodecError::Invalid("anytrust::bls::PrivateKey", "zero"));
        }
        Ok(Self(private))
    }
}

impl EncodeSize for PrivateKey {
    fn encode_size(&self) -> usize {
        PRIVATE_KEY_LENGTH
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// A BLS12-381 signature (or an aggregate of signatures over the same message).
#[derive(Clone, Copy, Debug)]
pub struct Signature(G2);

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.0.encode() == other.0.encode()
    }
}

impl Eq for Signature {}

impl Write for Signature {
    fn write(&self, buf: &mut impl BufMut) {
        self.0.write(buf);
    }
}

impl Read for Signature {
    type Cfg = ();

    /// Decompresses a signature, rejecting the identity and points outside of G2.
    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        G2::read(buf).map(Self)
    }
}

impl EncodeSize for Signature {
    fn encode_size(&self) -> usize {
        SIGNATURE_LENGTH
    }
}

/// A committee member's public key.
///
/// A key without a proof is trusted: it must come from a trusted source (for example, derived
/// locally or loaded from local disk). A key with a proof has been (or must be) checked against its
/// proof of possession before being accepted from an untrusted source.
#[derive(Clone, Copy, Debug)]
pub struct PublicKey {
    point: G1,
    proof: Option<Signature>,
}

impl PublicKey {
    /// Wraps a point obtained from a trusted source (no proof of possession).
    pub fn trusted(point: G1) -> Self {
        Self { point, proof: None }
    }

    /// Attaches `proof` to `point`, verifying it first.
    pub fn with_proof(point: G1, proof: Signature) -> Result<Self, Error> {
        let key = Self::with_trusted_proof(point, proof);
        key.verify_proof()?;
        Ok(key)
    }

    /// Attaches `proof` to `point` without verifying it.
    ///
    /// Only use this for keys loaded from a trusted source.
    pub fn with_trusted_proof(point: G1, proof: Signature) -> Self {
        Self {
            point,
            proof: Some(proof),
        }
    }

    pub fn point(&self) -> &G1 {
        &self.point
    }

    pub fn proof(&self) -> Option<&Signature> {
        self.proof.as_ref()
    }

    /// Verifies the proof of possession. Keys without a proof fail.
    pub fn verify_proof(&self) -> Result<(), Error> {
        let Some(proof) = &self.proof else {
            return Err(Error::InvalidSignature);
        };
        ops::verify_proof_of_possession::<MinPk>(&self.point, &proof.0)
            .map_err(|_| Error::InvalidSignature)
    }

    /// Verifies `signature` over `message`.
    ///
    /// The identity key (for example, an aggregate over no keys) never verifies.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), Error> {
        if self.point.encode() == G1::zero().encode() {
            return Err(Error::InvalidSignature);
        }
        ops::verify_message::<MinPk>(&self.point, None, message, &signature.0)
            .map_err(|_| Error::InvalidSignature)
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.point.encode() == other.point.encode() && self.proof == other.proof
    }
}

impl Eq for PublicKey {}

/// Aggregates public keys into a single trusted key.
///
/// # Warning
///
/// This function assumes every key is unique and was either loaded from a trusted source or
/// had its proof of possession verified. If either assumption is violated, an attacker can
/// make an incorrect aggregate signature verify.
pub fn aggregate_public_keys<'a, I>(public_keys: I) -> PublicKey
where
    I: IntoIterator<Item = &'a PublicKey>,
{
    let points: Vec<G1> = public_keys.into_iter().map(|pk| pk.point).collect();
    PublicKey::trusted(ops::aggregate_public_keys::<MinPk, _>(&points))
}

/// Aggregates signatures over the same message.
pub fn aggregate_signatures<'a, I>(signatures: I) -> Signature
where
    I: IntoIterator<Item = &'a Signature>,
{
    let points: Vec<G2> = signatures.into_iter().map(|sig| sig.0).collect();
    Signature(ops::aggregate_signatures::<MinPk, _>(&points))
}
