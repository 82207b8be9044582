//! Fixed-point encoding of real weights into residues modulo the plaintext modulus.

use num::{
    bigint::{BigInt, BigUint, Sign},
    traits::{FromPrimitive, Signed, ToPrimitive, Zero},
};

use super::CryptoError;

/// The largest number of fractional bits an `f64` can carry.
pub const MAX_PRECISION: u32 = 52;

/// The number of bits an encoded value keeps free for summing up contributions.
///
/// Sums of up to `2^HEADROOM_BITS` encoded values, each scaled once by a scalar of magnitude at
/// most one, stay within the centered range of the modulus.
pub const HEADROOM_BITS: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A fixed-point encoding with a fixed number of fractional bits.
///
/// A real `x` is encoded as `round(x * 2^precision)` and mapped into `[0, n)`, negative values
/// wrapping around to the upper half of the range. Every homomorphic multiplication by an
/// encoded scalar adds another factor `2^precision`, hence decoding takes the number of
/// accumulated factors (the `exponent`) into account.
pub struct FixedPoint {
    precision: u32,
}

impl FixedPoint {
    /// Creates a fixed-point encoding.
    ///
    /// # Errors
    /// Fails if the precision is zero or exceeds [`MAX_PRECISION`].
    pub fn new(precision: u32) -> Result<Self, CryptoError> {
        if precision == 0 || precision > MAX_PRECISION {
            return Err(CryptoError::InvalidPrecision(precision));
        }
        Ok(Self { precision })
    }

    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Encodes a real into a residue modulo `modulus`.
    ///
    /// The encoding must leave room for one more factor `2^precision` and for
    /// [`HEADROOM_BITS`] bits of summation, ie. `|x| * 2^(2 * precision + HEADROOM_BITS)` must
    /// stay below `modulus / 2`.
    ///
    /// # Errors
    /// Fails if the value is not finite or if its encoding leaves too little headroom below
    /// `modulus / 2`.
    pub fn encode(&self, value: f64, modulus: &BigUint) -> Result<BigUint, CryptoError> {
        if !value.is_finite() {
            return Err(CryptoError::NonFinite(value));
        }
        let shifted = (value * 2_f64.powi(self.precision as i32)).round();
        let integer = BigInt::from_f64(shifted).ok_or(CryptoError::NonFinite(value))?;
        let headroom = (self.precision + HEADROOM_BITS + 1) as usize;
        if integer.magnitude() << headroom >= *modulus {
            return Err(CryptoError::Overflow);
        }
        Ok(match integer.sign() {
            Sign::Minus => modulus - integer.magnitude(),
            _ => integer.magnitude().clone(),
        })
    }

    /// Decodes a residue modulo `modulus` which carries `exponent` factors of `2^precision`.
    pub fn decode(&self, residue: &BigUint, modulus: &BigUint, exponent: u32) -> f64 {
        let half = modulus >> 1_usize;
        let integer = if *residue > half {
            -BigInt::from(modulus - residue)
        } else {
            BigInt::from(residue.clone())
        };
        let divisor = self.precision as i32 * exponent as i32;
        to_f64(&integer) / 2_f64.powi(divisor)
    }
}

fn to_f64(integer: &BigInt) -> f64 {
    integer.to_f64().unwrap_or_else(|| {
        if integer.is_negative() {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        }
    })
}

/// Encodes a non-zero scalar as an exponent for a ciphertext power, ie. a residue modulo the
/// plaintext modulus.
pub(crate) fn encode_scalar(
    encoding: &FixedPoint,
    scalar: f64,
    modulus: &BigUint,
) -> Result<BigUint, CryptoError> {
    let residue = encoding.encode(scalar, modulus)?;
    if residue.is_zero() {
        // the scalar would wipe out the ciphertext
        return Err(CryptoError::Overflow);
    }
    Ok(residue)
}
