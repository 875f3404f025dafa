//! Path encryption. §6: "Each bucket is independently encrypted with an
//! authenticated cipher under the proxy's secret key, with a fresh nonce
//! (included). A bucket plaintext is `timestamp: u64 || Z × block_slot`,
//! where each block_slot is `block_id: u64 || data: B bytes`."
//!
//! Every bucket is re-encrypted on every write-back, so on the wire a
//! real bucket and a dummy-padded one are indistinguishable.

use crate::{
    block::{Block, BlockId},
    bucket::Bucket,
    error::{Error, Result},
};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng as AeadOsRng},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

const NONCE_LEN: usize = 24;
const SLOT_ID_LEN: usize = 8;
const TIMESTAMP_LEN: usize = 8;
const TAG_LEN: usize = 16;

pub trait PathCipher: Send + Sync {
    fn encrypt_bucket(&self, bucket: &Bucket) -> Result<Vec<u8>>;
    fn decrypt_bucket(&self, wire: &[u8]) -> Result<Bucket>;

    /// Wire length of one encrypted bucket of the given capacity. Buckets
    /// are fixed-size on the wire, so a concatenated path can be split
    /// into per-bucket chunks without length prefixes.
    fn wire_bucket_len(&self, capacity: usize) -> usize;
}

/// XChaCha20-Poly1305 under a fixed proxy secret key. The 24-byte nonce
/// space makes random-nonce generation safe for the lifetime of a
/// deployment without a counter.
pub struct ChaChaPathCipher {
    cipher: XChaCha20Poly1305,
    block_size: usize,
}

impl ChaChaPathCipher {
    pub fn new(key_bytes: [u8; 32], block_size: usize) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new((&key_bytes).into()),
            block_size,
        }
    }

    /// Generates a fresh random key, for first-run deployments and tests.
    pub fn generate(block_size: usize) -> Self {
        let mut key_bytes = [0u8; 32];
        AeadOsRng.fill_bytes(&mut key_bytes);
        Self::new(key_bytes, block_size)
    }

    fn slot_len(&self) -> usize {
        SLOT_ID_LEN + self.block_size
    }

    fn encode_plaintext(&self, bucket: &Bucket) -> Vec<u8> {
        let mut out = Vec::with_capacity(TIMESTAMP_LEN + bucket.capacity() * self.slot_len());
        out.extend_from_slice(&bucket.last_touched.to_be_bytes());

        let mut occupied = bucket.iter();
        for _ in 0..bucket.capacity() {
            match occupied.next() {
                Some(block) => {
                    out.extend_from_slice(&block.id.0.to_be_bytes());
                    debug_assert_eq!(block.data.len(), self.block_size);
                    out.extend_from_slice(&block.data);
                }
                None => {
                    out.extend_from_slice(&BlockId::DUMMY.0.to_be_bytes());
                    out.extend(std::iter::repeat(0u8).take(self.block_size));
                }
            }
        }
        out
    }

    fn decode_plaintext(&self, plaintext: &[u8]) -> Result<Bucket> {
        if plaintext.len() < TIMESTAMP_LEN {
            return Err(Error::Crypto);
        }
        let slot_len = self.slot_len();
        let body = &plaintext[TIMESTAMP_LEN..];
        if body.len() % slot_len != 0 {
            return Err(Error::Crypto);
        }
        let capacity = body.len() / slot_len;

        let last_touched = u64::from_be_bytes(
            plaintext[0..TIMESTAMP_LEN]
                .try_into()
                .map_err(|_| Error::Crypto)?,
        );

        let mut bucket = Bucket::empty(capacity);
        bucket.last_touched = last_touched;

        for i in 0..capacity {
            let slot = &body[i * slot_len..(i + 1) * slot_len];
            let id = u64::from_be_bytes(slot[0..SLOT_ID_LEN].try_into().map_err(|_| Error::Crypto)?);
            let id = BlockId(id);
            if !id.is_dummy() {
                let data = slot[SLOT_ID_LEN..].to_vec().into_boxed_slice();
                bucket.place(Block::new(id, data));
            }
        }

        Ok(bucket)
    }
}

impl PathCipher for ChaChaPathCipher {
    fn encrypt_bucket(&self, bucket: &Bucket) -> Result<Vec<u8>> {
        let plaintext = self.encode_plaintext(bucket);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        AeadOsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|_| Error::Crypto)?;

        let mut wire = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        wire.extend_from_slice(&nonce_bytes);
        wire.extend_from_slice(&ciphertext);
        Ok(wire)
    }

    fn decrypt_bucket(&self, wire: &[u8]) -> Result<Bucket> {
        if wire.len() < NONCE_LEN {
            return Err(Error::Crypto);
        }
        let (nonce_bytes, ciphertext) = wire.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| Error::Crypto)?;

        self.decode_plaintext(&plaintext)
    }

    fn wire_bucket_len(&self, capacity: usize) -> usize {
        NONCE_LEN + TIMESTAMP_LEN + capacity * self.slot_len() + TAG_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_mixed_bucket() {
        let cipher = ChaChaPathCipher::generate(4);
        let mut bucket = Bucket::empty(4);
        bucket.last_touched = 7;
        bucket.place(Block::new(BlockId(42), vec![0xCA, 0xFE, 0xBA, 0xBE].into_boxed_slice()));

        let wire = cipher.encrypt_bucket(&bucket).unwrap();
        let decoded = cipher.decrypt_bucket(&wire).unwrap();

        assert_eq!(decoded.last_touched, 7);
        assert_eq!(decoded.find(BlockId(42)).unwrap().data.as_ref(), &[0xCA, 0xFE, 0xBA, 0xBE]);
        assert_eq!(decoded.len(), 1);
    }

    #[test]
    fn tampering_is_rejected() {
        let cipher = ChaChaPathCipher::generate(4);
        let bucket = Bucket::empty(4);
        let mut wire = cipher.encrypt_bucket(&bucket).unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;

        assert!(matches!(cipher.decrypt_bucket(&wire), Err(Error::Crypto)));
    }

    #[test]
    fn empty_bucket_round_trips() {
        let cipher = ChaChaPathCipher::generate(4);
        let bucket = Bucket::empty(4);
        let wire = cipher.encrypt_bucket(&bucket).unwrap();
        let decoded = cipher.decrypt_bucket(&wire).unwrap();
        assert!(decoded.is_empty());
    }
}
