//! The Paillier cryptosystem.
//!
//! Paillier is additively homomorphic: multiplying two ciphertexts modulo `n^2` yields an
//! encryption of the sum of the plaintexts and raising a ciphertext to the power `k` yields an
//! encryption of the plaintext multiplied by `k`. This implementation uses the generator
//! `g = n + 1`.

use num::{
    bigint::{BigUint, RandBigInt},
    integer::Integer,
    traits::{One, Zero},
};
use num_prime::nt_funcs::is_prime;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use super::{CryptoError, KeySeed};

/// The smallest supported modulus size, in bits.
pub const MIN_MODULUS_BITS: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
/// A Paillier public key.
pub struct PublicKey {
    n: BigUint,
    n_squared: BigUint,
}

#[derive(Clone, PartialEq, Eq)]
/// A Paillier secret key.
pub struct SecretKey {
    lambda: BigUint,
    mu: BigUint,
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A Paillier key pair.
pub struct KeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

impl KeyPair {
    /// Generates a key pair with a modulus of `modulus_bits` bits.
    ///
    /// # Errors
    /// Fails if the modulus size is smaller than [`MIN_MODULUS_BITS`] or odd.
    pub fn generate<R: Rng + ?Sized>(rng: &mut R, modulus_bits: usize) -> Result<Self, CryptoError> {
        if modulus_bits < MIN_MODULUS_BITS || modulus_bits % 2 != 0 {
            return Err(CryptoError::InvalidModulusSize(modulus_bits));
        }
        let prime_bits = (modulus_bits / 2) as u64;
        let p = generate_prime(rng, prime_bits);
        let q = loop {
            let q = generate_prime(rng, prime_bits);
            if q != p {
                break q;
            }
        };

        let one = BigUint::one();
        let n = &p * &q;
        let lambda = (&p - &one).lcm(&(&q - &one));
        // with g = n + 1, L(g^lambda mod n^2) = lambda mod n
        let mu = (&lambda % &n)
            .modinv(&n)
            .ok_or(CryptoError::InvalidModulusSize(modulus_bits))?;

        Ok(Self {
            public: PublicKey::new(n),
            secret: SecretKey { lambda, mu },
        })
    }

    /// Derives a key pair deterministically from a seed.
    ///
    /// Every node configured with the same seed and modulus size derives the same key pair.
    pub fn derive(seed: &KeySeed, modulus_bits: usize) -> Result<Self, CryptoError> {
        let mut rng = ChaCha20Rng::from_seed(seed.0);
        Self::generate(&mut rng, modulus_bits)
    }

    /// Decrypts a ciphertext into a residue modulo `n`.
    pub fn decrypt(&self, ciphertext: &BigUint) -> BigUint {
        let PublicKey { n, n_squared } = &self.public;
        let SecretKey { lambda, mu } = &self.secret;
        let u = ciphertext.modpow(lambda, n_squared);
        let l = (u - BigUint::one()) / n;
        (l * mu) % n
    }
}

impl PublicKey {
    fn new(n: BigUint) -> Self {
        let n_squared = &n * &n;
        Self { n, n_squared }
    }

    /// Gets the plaintext modulus `n`.
    pub fn modulus(&self) -> &BigUint {
        &self.n
    }

    /// Gets the ciphertext modulus `n^2`.
    pub fn ciphertext_modulus(&self) -> &BigUint {
        &self.n_squared
    }

    /// Encrypts a residue modulo `n`.
    pub fn encrypt<R: Rng + ?Sized>(&self, message: &BigUint, rng: &mut R) -> BigUint {
        let one = BigUint::one();
        // (1 + n)^m = 1 + m * n mod n^2
        let gm = (&one + message * &self.n) % &self.n_squared;
        let r = rng.gen_biguint_range(&one, &self.n);
        let rn = r.modpow(&self.n, &self.n_squared);
        (gm * rn) % &self.n_squared
    }

    /// Homomorphically adds the plaintexts of two ciphertexts.
    pub fn add(&self, lhs: &BigUint, rhs: &BigUint) -> BigUint {
        (lhs * rhs) % &self.n_squared
    }

    /// Homomorphically multiplies the plaintext of a ciphertext by a residue modulo `n`.
    pub fn mul_plain(&self, ciphertext: &BigUint, factor: &BigUint) -> BigUint {
        ciphertext.modpow(factor, &self.n_squared)
    }

    /// Checks whether a value is a valid ciphertext element for this key.
    ///
    /// Valid elements are the units of the ring modulo `n^2`. Decrypting anything else breaks
    /// the `L` function.
    pub fn is_valid_ciphertext(&self, ciphertext: &BigUint) -> bool {
        !ciphertext.is_zero() && *ciphertext < self.n_squared && ciphertext.gcd(&self.n).is_one()
    }
}

fn generate_prime<R: Rng + ?Sized>(rng: &mut R, bits: u64) -> BigUint {
    // setting the two top bits guarantees that the product of two primes has exactly
    // `2 * bits` bits
    let top_bits = BigUint::from(3_u8) << (bits - 2) as usize;
    loop {
        let candidate = rng.gen_biguint(bits) | &top_bits | BigUint::one();
        if is_prime(&candidate, None).probably() {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys() -> KeyPair {
        KeyPair::derive(&KeySeed([1; 32]), 256).unwrap()
    }

    #[test]
    fn test_generate_rejects_small_modulus() {
        let mut rng = ChaCha20Rng::from_seed([0; 32]);
        assert!(matches!(
            KeyPair::generate(&mut rng, 64),
            Err(CryptoError::InvalidModulusSize(64))
        ));
        assert!(matches!(
            KeyPair::generate(&mut rng, 257),
            Err(CryptoError::InvalidModulusSize(257))
        ));
    }

    #[test]
    fn test_derive_is_deterministic() {
        let keys = keys();
        assert_eq!(keys, KeyPair::derive(&KeySeed([1; 32]), 256).unwrap());
        assert_ne!(keys, KeyPair::derive(&KeySeed([2; 32]), 256).unwrap());
        assert_eq!(keys.public.modulus().bits(), 256);
    }

    #[test]
    fn test_encrypt_decrypt() {
        let keys = keys();
        let mut rng = rand::thread_rng();
        let message = BigUint::from(123_456_789_u64);
        let c1 = keys.public.encrypt(&message, &mut rng);
        let c2 = keys.public.encrypt(&message, &mut rng);
        // encryption is randomized
        assert_ne!(c1, c2);
        assert_eq!(keys.decrypt(&c1), message);
        assert_eq!(keys.decrypt(&c2), message);
    }

    #[test]
    fn test_homomorphic_operations() {
        let keys = keys();
        let mut rng = rand::thread_rng();
        let a = keys.public.encrypt(&BigUint::from(20_u32), &mut rng);
        let b = keys.public.encrypt(&BigUint::from(22_u32), &mut rng);

        let sum = keys.public.add(&a, &b);
        assert_eq!(keys.decrypt(&sum), BigUint::from(42_u32));

        let product = keys.public.mul_plain(&sum, &BigUint::from(3_u32));
        assert_eq!(keys.decrypt(&product), BigUint::from(126_u32));
    }

    #[test]
    fn test_is_valid_ciphertext() {
        let keys = keys();
        let public = &keys.public;
        let n = public.modulus().clone();
        let c = public.encrypt(&BigUint::from(7_u32), &mut rand::thread_rng());
        assert!(public.is_valid_ciphertext(&c));
        assert!(public.is_valid_ciphertext(&BigUint::one()));

        assert!(!public.is_valid_ciphertext(&BigUint::zero()));
        assert!(!public.is_valid_ciphertext(public.ciphertext_modulus()));
        // multiples of n are not invertible modulo n^2
        assert!(!public.is_valid_ciphertext(&n));
        assert!(!public.is_valid_ciphertext(&(&n * BigUint::from(3_u32))));
    }
}
