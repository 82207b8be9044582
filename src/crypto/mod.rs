//! Homomorphic encryption of weight vectors.
//!
//! The protocol consumes encryption as an opaque capability, the [`CryptoFacade`]: participants
//! encode and encrypt their weights, the coordinator adds and scales the resulting
//! [`Ciphertext`]s without decrypting them, and participants decrypt and decode the aggregate.
//!
//! [`Paillier`] implements the capability with the Paillier cryptosystem and a fixed-point
//! encoding of the weights.

pub mod encoding;
pub mod paillier;

use std::convert::TryInto;

use derive_more::{AsRef, From, Into};
use num::bigint::BigUint;
use thiserror::Error;

use self::{
    encoding::{encode_scalar, FixedPoint},
    paillier::{KeyPair, PublicKey},
};

#[derive(Error, Debug)]
/// Errors related to the encoding, encryption and homomorphic combination of weights.
pub enum CryptoError {
    #[error("malformed ciphertext: {0}")]
    Malformed(#[from] bincode::Error),

    #[error("ciphertext element out of range for the current key")]
    OutOfRange,

    #[error("cannot combine ciphertexts of {lhs} and {rhs} weights")]
    LengthMismatch { lhs: usize, rhs: usize },

    #[error("cannot combine ciphertexts with different fixed-point exponents")]
    ExponentMismatch,

    #[error("the value {0} is not finite")]
    NonFinite(f64),

    #[error("the value does not fit into the plaintext space")]
    Overflow,

    #[error("invalid fixed-point precision: {0} bits")]
    InvalidPrecision(u32),

    #[error("invalid modulus size: {0} bits")]
    InvalidModulusSize(usize),

    #[error("invalid key seed: {0}")]
    InvalidSeed(String),

    #[error("decryption requires the secret key")]
    MissingSecretKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, From, Into, AsRef, Serialize, Deserialize)]
/// An encrypted weight vector, as an opaque transportable blob.
pub struct Ciphertext(Vec<u8>);

impl Ciphertext {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
/// A seed from which the key pair of a session is derived.
pub struct KeySeed(pub [u8; 32]);

impl KeySeed {
    /// Parses a seed from its hexadecimal representation.
    ///
    /// # Errors
    /// Fails if `hex` is not the hexadecimal encoding of exactly 32 bytes.
    pub fn from_hex(hex: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(hex).map_err(|e| CryptoError::InvalidSeed(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| CryptoError::InvalidSeed(format!("{} bytes", bytes.len())))?;
        Ok(Self(seed))
    }
}

impl std::fmt::Debug for KeySeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeySeed(..)")
    }
}

/// The homomorphic encryption capability consumed by the protocol.
///
/// Plaintexts never leave a node, so their representation is left to the implementation.
/// Ciphertexts are exchanged between nodes as opaque blobs.
#[cfg_attr(test, mockall::automock(type Plaintext = Vec<f64>;))]
pub trait CryptoFacade: Send + 'static {
    type Plaintext: Send;

    /// Encodes a weight vector into a plaintext.
    fn encode(&self, weights: &[f64]) -> Result<Self::Plaintext, CryptoError>;

    /// Decodes a plaintext into a weight vector.
    fn decode(&self, plaintext: &Self::Plaintext) -> Result<Vec<f64>, CryptoError>;

    /// Encrypts a plaintext.
    fn encrypt(&self, plaintext: &Self::Plaintext) -> Result<Ciphertext, CryptoError>;

    /// Decrypts a ciphertext.
    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<Self::Plaintext, CryptoError>;

    /// Homomorphically adds two ciphertexts.
    fn add(&self, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<Ciphertext, CryptoError>;

    /// Homomorphically multiplies a ciphertext by a real scalar.
    fn scale(&self, ciphertext: &Ciphertext, scalar: f64) -> Result<Ciphertext, CryptoError>;
}

/// Encodes and encrypts a weight vector.
pub fn seal<C: CryptoFacade + ?Sized>(crypto: &C, weights: &[f64]) -> Result<Ciphertext, CryptoError> {
    let plaintext = crypto.encode(weights)?;
    crypto.encrypt(&plaintext)
}

/// Decrypts and decodes a weight vector.
pub fn open<C: CryptoFacade + ?Sized>(
    crypto: &C,
    ciphertext: &Ciphertext,
) -> Result<Vec<f64>, CryptoError> {
    let plaintext = crypto.decrypt(ciphertext)?;
    crypto.decode(&plaintext)
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A weight vector encoded into residues modulo the Paillier modulus.
pub struct EncodedWeights {
    values: Vec<BigUint>,
    /// The number of `2^precision` factors carried by the values.
    exponent: u32,
}

#[derive(Serialize, Deserialize)]
/// The content of a Paillier [`Ciphertext`] blob.
struct PaillierBlob {
    exponent: u32,
    values: Vec<BigUint>,
}

/// The Paillier implementation of the [`CryptoFacade`].
///
/// Each weight is encrypted separately. A facade built with [`Paillier::public_only()`] can
/// encrypt, add and scale but not decrypt, which is all a pure coordinator needs.
pub struct Paillier {
    public: PublicKey,
    keys: Option<KeyPair>,
    encoding: FixedPoint,
}

impl Paillier {
    pub fn new(keys: KeyPair, encoding: FixedPoint) -> Self {
        Self {
            public: keys.public.clone(),
            keys: Some(keys),
            encoding,
        }
    }

    pub fn public_only(public: PublicKey, encoding: FixedPoint) -> Self {
        Self {
            public,
            keys: None,
            encoding,
        }
    }

    /// Derives the key pair from a seed and creates the facade.
    pub fn from_seed(
        seed: &KeySeed,
        modulus_bits: usize,
        precision: u32,
    ) -> Result<Self, CryptoError> {
        let encoding = FixedPoint::new(precision)?;
        let keys = KeyPair::derive(seed, modulus_bits)?;
        Ok(Self::new(keys, encoding))
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    fn unpack(&self, ciphertext: &Ciphertext) -> Result<PaillierBlob, CryptoError> {
        let blob: PaillierBlob = bincode::deserialize(ciphertext.as_bytes())?;
        if blob
            .values
            .iter()
            .all(|value| self.public.is_valid_ciphertext(value))
        {
            Ok(blob)
        } else {
            Err(CryptoError::OutOfRange)
        }
    }

    fn pack(blob: &PaillierBlob) -> Result<Ciphertext, CryptoError> {
        Ok(bincode::serialize(blob)?.into())
    }
}

impl CryptoFacade for Paillier {
    type Plaintext = EncodedWeights;

    fn encode(&self, weights: &[f64]) -> Result<EncodedWeights, CryptoError> {
        let values = weights
            .iter()
            .map(|weight| self.encoding.encode(*weight, self.public.modulus()))
            .collect::<Result<_, _>>()?;
        Ok(EncodedWeights {
            values,
            exponent: 1,
        })
    }

    fn decode(&self, plaintext: &EncodedWeights) -> Result<Vec<f64>, CryptoError> {
        Ok(plaintext
            .values
            .iter()
            .map(|value| {
                self.encoding
                    .decode(value, self.public.modulus(), plaintext.exponent)
            })
            .collect())
    }

    fn encrypt(&self, plaintext: &EncodedWeights) -> Result<Ciphertext, CryptoError> {
        let mut rng = rand::thread_rng();
        let values = plaintext
            .values
            .iter()
            .map(|value| self.public.encrypt(value, &mut rng))
            .collect();
        Self::pack(&PaillierBlob {
            exponent: plaintext.exponent,
            values,
        })
    }

    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<EncodedWeights, CryptoError> {
        let keys = self.keys.as_ref().ok_or(CryptoError::MissingSecretKey)?;
        let PaillierBlob { exponent, values } = self.unpack(ciphertext)?;
        Ok(EncodedWeights {
            values: values.iter().map(|value| keys.decrypt(value)).collect(),
            exponent,
        })
    }

    fn add(&self, lhs: &Ciphertext, rhs: &Ciphertext) -> Result<Ciphertext, CryptoError> {
        let lhs = self.unpack(lhs)?;
        let rhs = self.unpack(rhs)?;
        if lhs.values.len() != rhs.values.len() {
            return Err(CryptoError::LengthMismatch {
                lhs: lhs.values.len(),
                rhs: rhs.values.len(),
            });
        }
        if lhs.exponent != rhs.exponent {
            return Err(CryptoError::ExponentMismatch);
        }
        let values = lhs
            .values
            .iter()
            .zip(rhs.values.iter())
            .map(|(l, r)| self.public.add(l, r))
            .collect();
        Self::pack(&PaillierBlob {
            exponent: lhs.exponent,
            values,
        })
    }

    fn scale(&self, ciphertext: &Ciphertext, scalar: f64) -> Result<Ciphertext, CryptoError> {
        let blob = self.unpack(ciphertext)?;
        let factor = encode_scalar(&self.encoding, scalar, self.public.modulus())?;
        let values = blob
            .values
            .iter()
            .map(|value| self.public.mul_plain(value, &factor))
            .collect();
        Self::pack(&PaillierBlob {
            exponent: blob.exponent + 1,
            values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-6;

    fn paillier() -> Paillier {
        Paillier::from_seed(&KeySeed([3; 32]), 256, 24).unwrap()
    }

    fn assert_close(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < TOLERANCE, "{} != {}", a, e);
        }
    }

    #[test]
    fn test_key_seed_from_hex() {
        let hex = "00".repeat(31) + "ff";
        let seed = KeySeed::from_hex(&hex).unwrap();
        assert_eq!(seed.0[31], 0xff);

        assert!(KeySeed::from_hex("zz").is_err());
        assert!(KeySeed::from_hex(&"00".repeat(16)).is_err());
    }

    #[test]
    fn test_round_trip() {
        let crypto = paillier();
        let weights = vec![0.25, -1.5, 3.0, 0., -0.001];
        let ciphertext = seal(&crypto, &weights).unwrap();
        assert_close(&open(&crypto, &ciphertext).unwrap(), &weights);
    }

    #[test]
    fn test_average() {
        let crypto = paillier();
        let a = seal(&crypto, &[1., 2.]).unwrap();
        let b = seal(&crypto, &[3., 4.]).unwrap();
        let sum = crypto.add(&a, &b).unwrap();
        let average = crypto.scale(&sum, 0.5).unwrap();
        assert_close(&open(&crypto, &average).unwrap(), &[2., 3.]);
    }

    #[test]
    fn test_scale_by_reciprocal() {
        let crypto = paillier();
        let parts = [[1., -2.], [4., 5.], [-2., 0.5]];
        let mut sum = seal(&crypto, &parts[0]).unwrap();
        for part in &parts[1..] {
            sum = crypto.add(&sum, &seal(&crypto, part).unwrap()).unwrap();
        }
        let average = crypto.scale(&sum, 1. / 3.).unwrap();
        assert_close(&open(&crypto, &average).unwrap(), &[1., 3.5 / 3.]);
    }

    #[test]
    fn test_add_rejects_incompatible_ciphertexts() {
        let crypto = paillier();
        let a = seal(&crypto, &[1., 2.]).unwrap();
        let b = seal(&crypto, &[1.]).unwrap();
        assert!(matches!(
            crypto.add(&a, &b),
            Err(CryptoError::LengthMismatch { lhs: 2, rhs: 1 })
        ));

        let scaled = crypto.scale(&a, 2.).unwrap();
        assert!(matches!(
            crypto.add(&a, &scaled),
            Err(CryptoError::ExponentMismatch)
        ));

        let garbage = Ciphertext::from(vec![1, 2, 3]);
        assert!(matches!(
            crypto.add(&a, &garbage),
            Err(CryptoError::Malformed(_))
        ));
    }

    #[test]
    fn test_fold_is_independent_of_the_order() {
        let crypto = paillier();
        let parts = [
            vec![1., -2., 0.5],
            vec![4., 5., -0.25],
            vec![-2., 0.5, 1.],
            vec![0.125, -7., 3.],
        ];
        let sealed: Vec<_> = parts
            .iter()
            .map(|part| seal(&crypto, part).unwrap())
            .collect();
        let average = |order: &[usize]| {
            let sum = order[1..].iter().fold(sealed[order[0]].clone(), |sum, i| {
                crypto.add(&sum, &sealed[*i]).unwrap()
            });
            let scaled = crypto.scale(&sum, 1. / order.len() as f64).unwrap();
            open(&crypto, &scaled).unwrap()
        };

        let expected = [3.125 / 4., -3.5 / 4., 4.25 / 4.];
        let reference = average(&[0, 1, 2, 3][..]);
        assert_close(&reference, &expected);
        for order in &[[3, 2, 1, 0], [2, 0, 3, 1], [1, 3, 0, 2]] {
            assert_eq!(average(&order[..]), reference);
        }
    }

    #[test]
    fn test_rejects_elements_sharing_a_factor_with_the_modulus() {
        let crypto = paillier();
        let n = crypto.public_key().modulus().clone();
        let blob = Paillier::pack(&PaillierBlob {
            exponent: 2,
            values: vec![n],
        })
        .unwrap();
        assert!(matches!(crypto.decrypt(&blob), Err(CryptoError::OutOfRange)));

        let a = seal(&crypto, &[1.]).unwrap();
        assert!(matches!(crypto.add(&a, &blob), Err(CryptoError::OutOfRange)));
        assert!(matches!(crypto.scale(&blob, 0.5), Err(CryptoError::OutOfRange)));
    }

    #[test]
    fn test_public_only_cannot_decrypt() {
        let crypto = paillier();
        let coordinator = Paillier::public_only(crypto.public_key().clone(), FixedPoint::new(24).unwrap());
        let a = seal(&coordinator, &[1.]).unwrap();
        let doubled = coordinator.scale(&a, 2.).unwrap();
        assert!(matches!(
            coordinator.decrypt(&doubled),
            Err(CryptoError::MissingSecretKey)
        ));
        assert_close(&open(&crypto, &doubled).unwrap(), &[2.]);
    }
}
