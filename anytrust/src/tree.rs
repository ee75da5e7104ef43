//! Content hashing for data attested by the committee.
//!
//! Messages are split into bins of [BIN_SIZE] bytes. Each bin becomes a leaf
//! `keccak(LEAF_BYTE || keccak(bin))` and adjacent nodes are paired into
//! `keccak(NODE_BYTE || left || right || u32_be(size_left + size_right))` until a single root
//! remains. A trailing node without a sibling is carried up to the next layer unchanged.
//!
//! Every intermediate keccak preimage is small (at most [BIN_SIZE] bytes), so a verifier that
//! can only resolve bounded preimages can still walk the tree down to the original message.

use crate::Digest;
use sha3::{Digest as _, Keccak256 as IKeccak256};

/// Maximum number of message bytes covered by a single leaf.
pub const BIN_SIZE: usize = 64 * 1024;

/// Prefix of a leaf preimage.
pub const LEAF_BYTE: u8 = 0xfe;

/// Prefix of an internal node preimage.
pub const NODE_BYTE: u8 = 0xff;

/// Incremental keccak-256 hasher.
#[derive(Clone, Default)]
pub struct Keccak256 {
    hasher: IKeccak256,
}

impl Keccak256 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, message: &[u8]) {
        self.hasher.update(message);
    }

    /// Returns the digest of everything written and resets the hasher.
    pub fn finalize(&mut self) -> Digest {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&self.hasher.finalize_reset());
        digest
    }
}

/// Returns the keccak-256 digest of `message` (the flat, version 0 data hash).
pub fn keccak(message: &[u8]) -> Digest {
    let mut hasher = Keccak256::new();
    hasher.update(message);
    hasher.finalize()
}

#[derive(Clone, Copy)]
struct Node {
    hash: Digest,
    size: u32,
}

/// Returns the tree hash of `preimage`.
pub fn hash(preimage: &[u8]) -> Digest {
    record_hash(|_, _| {}, preimage)
}

/// Computes the tree hash of `preimage`, invoking `recorder(hash, preimage)` for every keccak
/// computed along the way.
pub fn record_hash<F>(mut recorder: F, preimage: &[u8]) -> Digest
where
    F: FnMut(Digest, &[u8]),
{
    let mut keccord = |data: &[u8]| {
        let digest = keccak(data);
        recorder(digest, data);
        digest
    };

    if preimage.is_empty() {
        let inner = keccord(&[]);
        return keccord(&flat_hash_to_tree_leaf(&inner));
    }

    // Hash each bin into a leaf
    let mut layer: Vec<Node> = preimage
        .chunks(BIN_SIZE)
        .map(|bin| {
            let inner = keccord(bin);
            Node {
                hash: keccord(&flat_hash_to_tree_leaf(&inner)),
                size: bin.len() as u32,
            }
        })
        .collect();

    // Pair nodes until a single root remains
    let mut buf = [0u8; 1 + 32 + 32 + 4];
    buf[0] = NODE_BYTE;
    while layer.len() > 1 {
        let mut paired = Vec::with_capacity(layer.len().div_ceil(2));
        for pair in layer.chunks(2) {
            let [left, right] = pair else {
                paired.push(pair[0]);
                continue;
            };
            let size = left.size + right.size;
            buf[1..33].copy_from_slice(&left.hash);
            buf[33..65].copy_from_slice(&right.hash);
            buf[65..].copy_from_slice(&size.to_be_bytes());
            paired.push(Node {
                hash: keccord(&buf),
                size,
            });
        }
        layer = paired;
    }
    layer[0].hash
}

/// Returns the leaf preimage `LEAF_BYTE || flat`.
pub fn flat_hash_to_tree_leaf(flat: &Digest) -> [u8; 33] {
    let mut leaf = [0u8; 33];
    leaf[0] = LEAF_BYTE;
    leaf[1..].copy_from_slice(flat);
    leaf
}

/// Returns the tree hash of a single-bin message given its flat hash.
pub fn flat_hash_to_tree_hash(flat: &Digest) -> Digest {
    keccak(&flat_hash_to_tree_leaf(flat))
}

/// Returns true if `hash` addresses `preimage`, either as a tree hash or as a legacy flat hash.
///
/// A flat hash is only accepted for non-empty preimages that cannot be confused with a tree node
/// or leaf.
pub fn valid_hash(hash: &Digest, preimage: &[u8]) -> bool {
    if *hash == self::hash(preimage) {
        return true;
    }
    match preimage.first() {
        Some(&kind) => kind != NODE_BYTE && kind != LEAF_BYTE && *hash == keccak(preimage),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_keccak() {
        assert_eq!(
            hex::encode(keccak(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
        assert_eq!(
            hex::encode(keccak(b"hello world")),
            "47173285a8d7341e5e972fc677286384f802f8ef42a5ec5f03bbfa254cb01fad"
        );

        // Reuse hasher
        let mut hasher = Keccak256::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), keccak(b"hello world"));
        hasher.update(b"hello world");
        assert_eq!(hasher.finalize(), keccak(b"hello world"));
    }

    #[test]
    fn test_single_bin() {
        let message = b"a message that fits in one bin";
        assert_eq!(hash(message), flat_hash_to_tree_hash(&keccak(message)));
        assert_eq!(hash(&[]), flat_hash_to_tree_hash(&keccak(&[])));
    }

    #[test]
    fn test_multiple_bins() {
        let message: Vec<u8> = (0..(2 * BIN_SIZE + 10)).map(|i| i as u8).collect();
        let leaf = |bin: &[u8]| flat_hash_to_tree_hash(&keccak(bin));
        let l0 = leaf(&message[..BIN_SIZE]);
        let l1 = leaf(&message[BIN_SIZE..2 * BIN_SIZE]);
        let l2 = leaf(&message[2 * BIN_SIZE..]);

        let mut node = vec![NODE_BYTE];
        node.extend_from_slice(&l0);
        node.extend_from_slice(&l1);
        node.extend_from_slice(&((2 * BIN_SIZE) as u32).to_be_bytes());
        let n01 = keccak(&node);

        // The third leaf has no sibling and is carried up unchanged
        let mut root = vec![NODE_BYTE];
        root.extend_from_slice(&n01);
        root.extend_from_slice(&l2);
        root.extend_from_slice(&((2 * BIN_SIZE + 10) as u32).to_be_bytes());
        assert_eq!(hash(&message), keccak(&root));
    }

    #[test]
    fn test_record_hash() {
        let message: Vec<u8> = vec![7; BIN_SIZE + 1];
        let mut preimages = HashMap::new();
        let root = record_hash(
            |hash, preimage| {
                preimages.insert(hash, preimage.to_vec());
            },
            &message,
        );
        assert_eq!(root, hash(&message));

        // Two bins, two leaves and the root
        assert_eq!(preimages.len(), 5);
        for (hash, preimage) in &preimages {
            assert_eq!(keccak(preimage), *hash);
        }
        assert_eq!(preimages[&root][0], NODE_BYTE);
    }

    #[test]
    fn test_valid_hash() {
        let message = b"legacy flat data";
        assert!(valid_hash(&hash(message), message));
        assert!(valid_hash(&keccak(message), message));
        assert!(!valid_hash(&keccak(b"other"), message));

        // Flat hashes of tree-shaped preimages are rejected
        let leaf = flat_hash_to_tree_leaf(&keccak(message));
        assert!(!valid_hash(&keccak(&leaf), &leaf));
        assert!(!valid_hash(&keccak(&[]), &[]));
        assert!(valid_hash(&hash(&[]), &[]));
    }
}
