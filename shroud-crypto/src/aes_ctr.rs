//! AES-256-CTR stream cipher: no padding, arbitrary-length plaintext.

use aes::Aes256;
use aes::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

type Aes256Ctr = Ctr128BE<Aes256>;

/// A keyed AES-CTR stream, ready to encrypt or decrypt. CTR is its own
/// inverse, so `apply` serves both directions.
pub struct AesCtr {
    key: [u8; 32],
    counter: [u8; 16],
}

impl AesCtr {
    pub fn new(key: [u8; 32], counter: [u8; 16]) -> Self {
        AesCtr { key, counter }
    }

    pub fn set_key(&mut self, key: [u8; 32]) {
        self.key = key;
    }

    pub fn set_counter(&mut self, counter: [u8; 16]) {
        self.counter = counter;
    }

    /// Encrypts/decrypts `data` in place. The cipher is re-seeded from
    /// `key`/`counter` on every call, so callers that stream across
    /// multiple `apply` calls with the same logical keystream must
    /// advance the counter themselves between calls.
    pub fn apply(&self, data: &mut [u8]) {
        let mut cipher = Aes256Ctr::new((&self.key).into(), (&self.counter).into());
        cipher.apply_keystream(data);
    }

    /// Out-of-place variant: copies `src` into a new buffer and encrypts.
    pub fn apply_to(&self, src: &[u8]) -> Vec<u8> {
        let mut out = src.to_vec();
        self.apply(&mut out);
        out
    }
}

/// One-shot helper: AES-CTR with a zero counter, the discipline the node
/// store uses for deterministic per-field ciphertexts.
pub fn ctr_zero(key: &[u8; 32], data: &mut [u8]) {
    AesCtr::new(*key, [0u8; 16]).apply(data);
}

/// A live AES-CTR keystream that keeps its internal block counter
/// between calls, for callers that stream ciphertext across multiple
/// `apply` invocations (e.g. a blob handle written to sequentially).
pub struct CtrStream(Aes256Ctr);

impl CtrStream {
    pub fn new(key: [u8; 32], counter: [u8; 16]) -> Self {
        CtrStream(Aes256Ctr::new((&key).into(), (&counter).into()))
    }

    pub fn apply(&mut self, data: &mut [u8]) {
        self.0.apply_keystream(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = [7u8; 32];
        let ctr = [0u8; 16];
        let cipher = AesCtr::new(key, ctr);
        let plain = b"the quick brown fox jumps over the lazy dog, repeatedly, to exceed one block";
        let mut buf = plain.to_vec();
        cipher.apply(&mut buf);
        assert_ne!(buf, plain);
        cipher.apply(&mut buf);
        assert_eq!(buf, plain);
    }

    #[test]
    fn zero_counter_is_deterministic() {
        let key = [3u8; 32];
        let mut a = b"same input".to_vec();
        let mut b = b"same input".to_vec();
        ctr_zero(&key, &mut a);
        ctr_zero(&key, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_input() {
        let cipher = AesCtr::new([0u8; 32], [0u8; 16]);
        let mut buf: Vec<u8> = Vec::new();
        cipher.apply(&mut buf);
        assert!(buf.is_empty());
    }
}
