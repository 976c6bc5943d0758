//! Cryptographically secure random bytes and ids.
//!
//! `getrandom` draws from the OS CSPRNG directly; there is no weaker
//! "fast" mode here; the "strong"/"very strong" hints the interface
//! carries distinguish call sites (key material vs. filler padding) but
//! not algorithms — both are the same OS-backed source.

use crate::Error;

/// Strength hint for callers documenting intent; both draw from the same
/// CSPRNG.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strength {
    Strong,
    VeryStrong,
}

pub fn fill(buf: &mut [u8], _strength: Strength) -> Result<(), Error> {
    getrandom::getrandom(buf).map_err(Error::Random)
}

pub fn bytes(len: usize, strength: Strength) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; len];
    fill(&mut buf, strength)?;
    Ok(buf)
}

/// A fresh 32-bit nonzero random id, used for resource/message ids.
pub fn mk_id() -> Result<u32, Error> {
    loop {
        let mut buf = [0u8; 4];
        fill(&mut buf, Strength::Strong)?;
        let v = u32::from_le_bytes(buf);
        if v != 0 {
            return Ok(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mk_id_is_nonzero() {
        for _ in 0..64 {
            assert_ne!(mk_id().unwrap(), 0);
        }
    }

    #[test]
    fn bytes_fills_requested_length() {
        let b = bytes(32, Strength::VeryStrong).unwrap();
        assert_eq!(b.len(), 32);
    }
}
