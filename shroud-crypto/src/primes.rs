//! Probabilistic prime generation for RSA key generation.

use num_bigint::BigUint;
use num_traits::{One, Zero};

use crate::random;

const MILLER_RABIN_ROUNDS: u32 = 40;

/// Generates a random probable prime of exactly `bits` bits (top bit set,
/// so the product of two such primes has the expected bit length; bottom
/// bit set, so it's odd).
pub fn generate_prime(bits: usize) -> Result<BigUint, crate::Error> {
    let bytes = bits.div_ceil(8);
    loop {
        let mut buf = random::bytes(bytes, random::Strength::VeryStrong)?;
        let excess = bytes * 8 - bits;
        buf[0] &= 0xff >> excess;
        buf[0] |= 0x80 >> excess;
        *buf.last_mut().unwrap() |= 1;
        let candidate = BigUint::from_bytes_be(&buf);
        if is_probably_prime(&candidate) {
            return Ok(candidate);
        }
    }
}

/// Miller-Rabin primality test with a fixed, generous round count.
pub fn is_probably_prime(n: &BigUint) -> bool {
    let zero = BigUint::zero();
    let one = BigUint::one();
    let two = &one + &one;

    if *n < two {
        return false;
    }
    if *n == two {
        return true;
    }
    if n % &two == zero {
        return false;
    }

    for small in SMALL_PRIMES {
        let p = BigUint::from(*small as u64);
        if *n == p {
            return true;
        }
        if n % &p == zero {
            return false;
        }
    }

    let n_minus_one = n - &one;
    let mut d = n_minus_one.clone();
    let mut r: u32 = 0;
    while (&d % &two) == zero {
        d /= &two;
        r += 1;
    }

    'witness: for _ in 0..MILLER_RABIN_ROUNDS {
        let a = random_in_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue;
        }
        for _ in 0..r.saturating_sub(1) {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

const SMALL_PRIMES: &[u32] = &[2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47];

fn random_in_range(low: &BigUint, high: &BigUint) -> BigUint {
    let bits = high.bits() as usize;
    let bytes = bits.div_ceil(8).max(1);
    loop {
        let buf = random::bytes(bytes, random::Strength::Strong).expect("csprng failure");
        let candidate = BigUint::from_bytes_be(&buf);
        if candidate >= *low && candidate < *high {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_known_primes() {
        assert!(is_probably_prime(&BigUint::from(97u32)));
        assert!(!is_probably_prime(&BigUint::from(91u32)));
        assert!(!is_probably_prime(&BigUint::from(1u32)));
    }

    #[test]
    fn generates_prime_of_requested_size() {
        let p = generate_prime(128).unwrap();
        assert!(is_probably_prime(&p));
        assert!(p.bits() == 128);
    }
}
