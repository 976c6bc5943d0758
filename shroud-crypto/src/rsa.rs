//! RSA key generation, PKCS#1 v1.5 encrypt/decrypt, and RSA-SHA256
//! sign/verify. All big-integer components are exchanged as hex-encoded
//! ASCII, matching the facade's on-wire/on-disk key representation.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Zero};

use crate::{primes, random, sha256, Error};

/// DER `DigestInfo` prefix for SHA-256, prepended to the raw digest
/// before RSA signing (PKCS#1 v1.5 signature padding type 1).
const SHA256_DIGEST_INFO_PREFIX: [u8; 19] = [
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01,
    0x05, 0x00, 0x04, 0x20,
];

/// Public key: modulus `n`, public exponent `e`, and `size` in bits.
#[derive(Clone, Debug, PartialEq)]
pub struct PublicKey {
    pub e: BigUint,
    pub n: BigUint,
    pub size: usize,
}

/// Private key. Field names `a`/`b`/`c`/`d` mirror the facade's on-wire
/// representation: `a` is the plain private exponent `d`, `b`/`c` are
/// the CRT exponents `dp`/`dq`, and `d` is the CRT coefficient `qinv`.
/// `p`/`q` are the two prime factors.
#[derive(Clone, PartialEq)]
pub struct PrivateKey {
    pub a: BigUint,
    pub b: BigUint,
    pub c: BigUint,
    pub d: BigUint,
    pub p: BigUint,
    pub q: BigUint,
    pub size: usize,
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey").field("size", &self.size).finish_non_exhaustive()
    }
}

fn to_hex(v: &BigUint) -> String {
    let bytes = v.to_bytes_be();
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    if s.is_empty() {
        s.push('0');
    }
    s
}

fn from_hex(s: &str) -> Result<BigUint, Error> {
    BigUint::parse_bytes(s.as_bytes(), 16).ok_or(Error::InvalidKey)
}

impl PublicKey {
    pub fn to_hex_parts(&self) -> (String, String, usize) {
        (to_hex(&self.e), to_hex(&self.n), self.size)
    }

    pub fn from_hex_parts(e: &str, n: &str, size: usize) -> Result<Self, Error> {
        Ok(PublicKey { e: from_hex(e)?, n: from_hex(n)?, size })
    }
}

impl PrivateKey {
    #[allow(clippy::type_complexity)]
    pub fn to_hex_parts(&self) -> (String, String, String, String, String, String, usize) {
        (
            to_hex(&self.a),
            to_hex(&self.b),
            to_hex(&self.c),
            to_hex(&self.d),
            to_hex(&self.p),
            to_hex(&self.q),
            self.size,
        )
    }
}

fn modinv(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let (a, m) = (BigInt::from(a.clone()), BigInt::from(m.clone()));
    let (mut old_r, mut r) = (a, m.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    while !r.is_zero() {
        let q = &old_r / &r;
        let new_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, new_r);
        let new_s = &old_s - &q * &s;
        old_s = std::mem::replace(&mut s, new_s);
    }
    if old_r != BigInt::one() {
        return None;
    }
    let mut result = old_s % &m;
    if result.sign() == Sign::Minus {
        result += &m;
    }
    let (_, bytes) = result.to_bytes_be();
    Some(BigUint::from_bytes_be(&bytes))
}

/// Generates a fresh RSA key pair of the given bit size (1024 or 2048).
pub fn generate(bits: usize) -> Result<(PublicKey, PrivateKey), Error> {
    if bits != 1024 && bits != 2048 {
        return Err(Error::UnsupportedKeySize(bits));
    }
    let half = bits / 2;
    let e = BigUint::from(65537u32);

    let (p, q, n, d) = loop {
        let p = primes::generate_prime(half)?;
        let q = primes::generate_prime(half)?;
        if p == q {
            continue;
        }
        let n = &p * &q;
        if n.bits() as usize != bits {
            continue;
        }
        let one = BigUint::one();
        let phi = (&p - &one) * (&q - &one);
        match modinv(&e, &phi) {
            Some(d) => break (p, q, n, d),
            None => continue,
        }
    };

    let one = BigUint::one();
    let dp = &d % (&p - &one);
    let dq = &d % (&q - &one);
    let qinv = modinv(&q, &p).ok_or(Error::InvalidKey)?;

    let public = PublicKey { e, n, size: bits };
    let private = PrivateKey { a: d, b: dp, c: dq, d: qinv, p, q, size: bits };
    Ok((public, private))
}

/// CRT exponentiation shared by decrypt and sign: both apply the private
/// exponent to an input smaller than `n`.
fn crt_pow(key: &PrivateKey, c: &BigUint) -> BigUint {
    let m1 = c.modpow(&key.b, &key.p);
    let m2 = c.modpow(&key.c, &key.q);
    let m1 = BigInt::from(m1);
    let m2b = BigInt::from(m2.clone());
    let p = BigInt::from(key.p.clone());
    let mut h = (&BigInt::from(key.d.clone()) * (&m1 - &m2b)) % &p;
    if h.sign() == Sign::Minus {
        h += &p;
    }
    let (_, h_bytes) = h.to_bytes_be();
    let h = BigUint::from_bytes_be(&h_bytes);
    m2 + h * &key.q
}

fn key_size_bytes(bits: usize) -> usize {
    bits.div_ceil(8)
}

/// Encodes `data` as an EMSA-PKCS1-v1_5 block type 2 message (encryption
/// padding) of exactly `k` bytes.
fn pkcs1_pad_encrypt(data: &[u8], k: usize) -> Result<Vec<u8>, Error> {
    if data.len() > k - 11 {
        return Err(Error::MessageTooLong);
    }
    let pad_len = k - data.len() - 3;
    let mut padding = vec![0u8; pad_len];
    loop {
        random::fill(&mut padding, random::Strength::VeryStrong)?;
        if padding.iter().all(|b| *b != 0) {
            break;
        }
    }
    let mut out = Vec::with_capacity(k);
    out.push(0x00);
    out.push(0x02);
    out.extend_from_slice(&padding);
    out.push(0x00);
    out.extend_from_slice(data);
    Ok(out)
}

fn pkcs1_unpad_encrypt(block: &[u8]) -> Result<Vec<u8>, Error> {
    if block.len() < 11 || block[0] != 0x00 || block[1] != 0x02 {
        return Err(Error::InvalidPadding);
    }
    let rest = &block[2..];
    let sep = rest.iter().position(|&b| b == 0).ok_or(Error::InvalidPadding)?;
    if sep < 8 {
        return Err(Error::InvalidPadding);
    }
    Ok(rest[sep + 1..].to_vec())
}

fn pkcs1_pad_sign(digest_info: &[u8], k: usize) -> Result<Vec<u8>, Error> {
    if digest_info.len() + 11 > k {
        return Err(Error::MessageTooLong);
    }
    let pad_len = k - digest_info.len() - 3;
    let mut out = Vec::with_capacity(k);
    out.push(0x00);
    out.push(0x01);
    out.extend(std::iter::repeat(0xffu8).take(pad_len));
    out.push(0x00);
    out.extend_from_slice(digest_info);
    Ok(out)
}

/// RSA-encrypts `data` under PKCS#1 v1.5 encryption padding.
pub fn encrypt(key: &PublicKey, data: &[u8]) -> Result<Vec<u8>, Error> {
    let k = key_size_bytes(key.size);
    let padded = pkcs1_pad_encrypt(data, k)?;
    let m = BigUint::from_bytes_be(&padded);
    let c = m.modpow(&key.e, &key.n);
    let mut out = c.to_bytes_be();
    while out.len() < k {
        out.insert(0, 0);
    }
    Ok(out)
}

/// RSA-decrypts a PKCS#1 v1.5 encryption-padded ciphertext.
pub fn decrypt(key: &PrivateKey, data: &[u8]) -> Result<Vec<u8>, Error> {
    let k = key_size_bytes(key.size);
    if data.len() != k {
        return Err(Error::InvalidPadding);
    }
    let c = BigUint::from_bytes_be(data);
    let m = crt_pow(key, &c);
    let mut block = m.to_bytes_be();
    while block.len() < k {
        block.insert(0, 0);
    }
    pkcs1_unpad_encrypt(&block)
}

/// RSA-SHA256 sign: hashes `data`, wraps it in a DigestInfo, pads per
/// PKCS#1 v1.5 signature padding, and applies the private exponent.
pub fn sign(key: &PrivateKey, data: &[u8]) -> Result<Vec<u8>, Error> {
    let digest = sha256!(data);
    let mut digest_info = Vec::with_capacity(SHA256_DIGEST_INFO_PREFIX.len() + 32);
    digest_info.extend_from_slice(&SHA256_DIGEST_INFO_PREFIX);
    digest_info.extend_from_slice(&digest);

    let k = key_size_bytes(key.size);
    let padded = pkcs1_pad_sign(&digest_info, k)?;
    let m = BigUint::from_bytes_be(&padded);
    let s = crt_pow(key, &m);
    let mut out = s.to_bytes_be();
    while out.len() < k {
        out.insert(0, 0);
    }
    Ok(out)
}

/// Verifies an RSA-SHA256 signature over `data`.
pub fn verify(key: &PublicKey, data: &[u8], signature: &[u8]) -> Result<bool, Error> {
    let k = key_size_bytes(key.size);
    if signature.len() != k {
        return Ok(false);
    }
    let s = BigUint::from_bytes_be(signature);
    let m = s.modpow(&key.e, &key.n);
    let mut block = m.to_bytes_be();
    while block.len() < k {
        block.insert(0, 0);
    }

    let digest = sha256!(data);
    let mut expected_info = Vec::with_capacity(SHA256_DIGEST_INFO_PREFIX.len() + 32);
    expected_info.extend_from_slice(&SHA256_DIGEST_INFO_PREFIX);
    expected_info.extend_from_slice(&digest);
    let expected = match pkcs1_pad_sign(&expected_info, k) {
        Ok(e) => e,
        Err(_) => return Ok(false),
    };
    Ok(block == expected)
}

/// Hex-encodes a raw ciphertext/signature the way the facade exchanges
/// bytes with callers outside the crate.
pub fn to_hex_bytes(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for b in data {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

pub fn from_hex_bytes(s: &str) -> Result<Vec<u8>, Error> {
    if s.len() % 2 != 0 {
        return Err(Error::InvalidPadding);
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| Error::InvalidPadding))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let (pk, sk) = generate(1024).unwrap();
        let msg = b"the quick brown fox";
        let ct = encrypt(&pk, msg).unwrap();
        let pt = decrypt(&sk, &ct).unwrap();
        assert_eq!(pt, msg);
    }

    #[test]
    fn sign_verify_roundtrip() {
        let (pk, sk) = generate(1024).unwrap();
        let msg = b"message to authenticate";
        let sig = sign(&sk, msg).unwrap();
        assert!(verify(&pk, msg, &sig).unwrap());
        assert!(!verify(&pk, b"different message", &sig).unwrap());
    }

    #[test]
    fn tampered_ciphertext_fails_or_mismatches() {
        let (pk, sk) = generate(1024).unwrap();
        let msg = b"hello";
        let mut ct = encrypt(&pk, msg).unwrap();
        ct[ct.len() / 2] ^= 0xff;
        assert!(decrypt(&sk, &ct).is_err() || decrypt(&sk, &ct).unwrap() != msg);
    }

    #[test]
    fn hex_roundtrip() {
        let data = vec![0x00, 0xab, 0xff, 0x10];
        let hex = to_hex_bytes(&data);
        assert_eq!(from_hex_bytes(&hex).unwrap(), data);
    }
}
