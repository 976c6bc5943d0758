//! Incremental and one-shot MD5 / SHA-256 digests.

use md5::Md5;
use sha2::{Digest as _, Sha256};

/// Incremental MD5, 16-byte output.
pub struct Md5Digest(Md5);

impl Md5Digest {
    pub fn new() -> Self {
        Md5Digest(Md5::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> [u8; 16] {
        self.0.finalize().into()
    }
}

impl Default for Md5Digest {
    fn default() -> Self {
        Self::new()
    }
}

/// Incremental SHA-256, 32-byte output.
pub struct Sha256Digest(Sha256);

impl Sha256Digest {
    pub fn new() -> Self {
        Sha256Digest(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> [u8; 32] {
        self.0.finalize().into()
    }
}

impl Default for Sha256Digest {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot MD5 over `data`.
pub fn md5(data: &[u8]) -> [u8; 16] {
    crate::md5!(data)
}

/// One-shot SHA-256 over `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    crate::sha256!(data)
}

/// Lowercase hex encoding, as used for every digest the facade exposes to
/// callers outside the crate.
pub fn to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// One-shot MD5, hex-encoded.
pub fn md5_hex(data: &[u8]) -> String {
    to_hex(&md5(data))
}

/// One-shot SHA-256, hex-encoded.
pub fn sha256_hex(data: &[u8]) -> String {
    to_hex(&sha256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_known_answer() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn sha256_known_answer() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn incremental_matches_one_shot() {
        let mut d = Sha256Digest::new();
        d.update(b"ab");
        d.update(b"c");
        assert_eq!(d.finalize(), sha256(b"abc"));

        let mut m = Md5Digest::new();
        m.update(b"a");
        m.update(b"bc");
        assert_eq!(m.finalize(), md5(b"abc"));
    }
}
