//! Cryptographic facade used throughout the workspace.
//!
//! Provides:
//! - AES-256-CTR encryption/decryption
//! - MD5 / SHA-256 digest macros and incremental hashers
//! - RSA key generation, PKCS#1 v1.5 encrypt/decrypt, RSA-SHA256 sign/verify
//! - a CSPRNG and a 32-bit random id generator (`mk_id`)
//!
//! Callers outside this crate never see a raw big-integer type: keys and
//! signatures cross the boundary as hex-encoded bytes.

#![deny(unsafe_code)]

mod aes_ctr;
mod digest;
mod error;
mod primes;
pub mod random;
pub mod rsa;
mod sha;

pub use aes_ctr::{ctr_zero, AesCtr, CtrStream};
pub use digest::{md5, md5_hex, sha256, sha256_hex, to_hex, Md5Digest, Sha256Digest};
pub use error::Error;
pub use random::mk_id;
