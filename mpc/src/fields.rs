//! Arithmetic in `Z_p` for the fixed 256-bit prime `p = 2^256 - 189`.
//!
//! Elements are always kept normalised to `[0, p)`. Encoding on the wire is a
//! fixed 32-byte big-endian array, so field elements never pass through a
//! 64-bit lossy path the way a naive JSON number would.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

use num_bigint::BigUint;
use rand::RngCore;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// `189`, so that `p = 2^256 - PRIME_OFFSET`.
const PRIME_OFFSET: u64 = 189;

#[static_init::dynamic]
static PRIME: BigUint = (BigUint::from(1u8) << 256) - BigUint::from(PRIME_OFFSET);

/// An element of `Z_p`, always reduced to `[0, p)`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Field(BigUint);

impl Field {
    /// The additive identity.
    pub fn zero() -> Self {
        Field(BigUint::from(0u8))
    }

    /// The multiplicative identity.
    pub fn one() -> Self {
        Field(BigUint::from(1u8))
    }

    /// Embed a `u64` into the field.
    pub fn from_u64(value: u64) -> Self {
        Field(BigUint::from(value))
    }

    /// Embed an arbitrary-precision non-negative integer, reducing it mod `p`.
    pub fn from_biguint(value: BigUint) -> Self {
        Field(value % &*PRIME)
    }

    /// The field's modulus.
    pub fn modulus() -> BigUint {
        PRIME.clone()
    }

    /// Is this the additive identity?
    pub fn is_zero(&self) -> bool {
        self.0 == BigUint::from(0u8)
    }

    /// Sample a uniformly random field element from 32 cryptographically
    /// random bytes, reduced mod `p`.
    pub fn random(rng: &mut impl RngCore) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Field(BigUint::from_bytes_be(&bytes) % &*PRIME)
    }

    /// Encode as a fixed 32-byte big-endian array. Lossless: this is the wire
    /// representation used by the message bus.
    pub fn to_bytes_be(&self) -> [u8; 32] {
        let raw = self.0.to_bytes_be();
        let mut out = [0u8; 32];
        out[32 - raw.len()..].copy_from_slice(&raw);
        out
    }

    /// Decode from a 32-byte big-endian array, reducing mod `p` in case the
    /// input is not already canonical.
    pub fn from_bytes_be(bytes: &[u8; 32]) -> Self {
        Field(BigUint::from_bytes_be(bytes) % &*PRIME)
    }

    /// Render as a decimal string; used inside canonical settlement messages.
    pub fn to_decimal_string(&self) -> String {
        self.0.to_str_radix(10)
    }

    /// Modular exponentiation by square-and-multiply. `exponent` is itself a
    /// field element, treated as an ordinary non-negative integer in `[0, p)`.
    pub fn pow(&self, exponent: &Field) -> Field {
        let mut result = Field::one();
        let mut base = self.clone();
        let bits = exponent.0.bits();
        for i in 0..bits {
            if exponent.0.bit(i) {
                result = &result * &base;
            }
            base = &base * &base;
        }
        result
    }

    /// Multiplicative inverse via the extended Euclidean algorithm.
    /// Fails with `NotInvertible` for zero (the only non-coprime element,
    /// since `p` is prime).
    pub fn inverse(&self) -> Result<Field, CoreError> {
        if self.is_zero() {
            return Err(CoreError::NotInvertible);
        }

        // Extended Euclidean algorithm over signed big integers, tracked as
        // (sign, magnitude) pairs since `num_bigint::BigUint` has no sign.
        let modulus = PRIME.clone();
        let (mut old_r, mut r) = (to_signed(&modulus), to_signed(&self.0));
        let (mut old_s, mut s) = (SignedBigUint::zero(), SignedBigUint::one());

        while r.magnitude != BigUint::from(0u8) {
            let quotient = &old_r.magnitude / &r.magnitude;
            let q = to_signed(&quotient);

            let new_r = old_r.sub(&q.mul(&r));
            old_r = r;
            r = new_r;

            let new_s = old_s.sub(&q.mul(&s));
            old_s = s;
            s = new_s;
        }

        // old_r is now gcd(p, self) == 1 since p is prime and self != 0.
        let inv = old_s.rem_euclid(&modulus);
        Ok(Field(inv))
    }

    /// Division, implemented as multiplication by the modular inverse.
    /// Fails with `DivisionByZero` when `rhs` is zero.
    pub fn checked_div(&self, rhs: &Field) -> Result<Field, CoreError> {
        if rhs.is_zero() {
            return Err(CoreError::DivisionByZero);
        }
        Ok(self * &rhs.inverse()?)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for &Field {
    type Output = Field;
    fn add(self, rhs: Self) -> Field {
        Field((&self.0 + &rhs.0) % &*PRIME)
    }
}

impl Sub for &Field {
    type Output = Field;
    fn sub(self, rhs: Self) -> Field {
        // `((a - b) mod p + p) mod p`, computed without ever going negative.
        let p = &*PRIME;
        Field((p + &self.0 - &rhs.0) % p)
    }
}

impl Mul for &Field {
    type Output = Field;
    fn mul(self, rhs: Self) -> Field {
        Field((&self.0 * &rhs.0) % &*PRIME)
    }
}

impl Neg for &Field {
    type Output = Field;
    fn neg(self) -> Field {
        &Field::zero() - self
    }
}

impl Div for &Field {
    type Output = Field;
    /// Panics on division by zero; use [`Field::checked_div`] to handle that
    /// case explicitly.
    fn div(self, rhs: Self) -> Field {
        self.checked_div(rhs).expect("division by zero")
    }
}

macro_rules! forward_owned_binop {
    ($trait:ident, $method:ident) => {
        impl $trait for Field {
            type Output = Field;
            fn $method(self, rhs: Field) -> Field {
                $trait::$method(&self, &rhs)
            }
        }
    };
}
forward_owned_binop!(Add, add);
forward_owned_binop!(Sub, sub);
forward_owned_binop!(Mul, mul);

impl Neg for Field {
    type Output = Field;
    fn neg(self) -> Field {
        Neg::neg(&self)
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes_be())
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| D::Error::custom("expected 32 bytes"))?;
        let value = BigUint::from_bytes_be(&bytes);
        if value >= *PRIME {
            return Err(D::Error::custom("field element is not canonically reduced"));
        }
        Ok(Field(value))
    }
}

/// A sign-and-magnitude big integer, used only inside the extended Euclidean
/// algorithm in [`Field::inverse`].
struct SignedBigUint {
    negative: bool,
    magnitude: BigUint,
}

impl SignedBigUint {
    fn zero() -> Self {
        SignedBigUint {
            negative: false,
            magnitude: BigUint::from(0u8),
        }
    }

    fn one() -> Self {
        SignedBigUint {
            negative: false,
            magnitude: BigUint::from(1u8),
        }
    }

    fn sub(&self, rhs: &SignedBigUint) -> SignedBigUint {
        self.add(&SignedBigUint {
            negative: !rhs.negative,
            magnitude: rhs.magnitude.clone(),
        })
    }

    fn add(&self, rhs: &SignedBigUint) -> SignedBigUint {
        if self.negative == rhs.negative {
            SignedBigUint {
                negative: self.negative,
                magnitude: &self.magnitude + &rhs.magnitude,
            }
        } else if self.magnitude >= rhs.magnitude {
            SignedBigUint {
                negative: self.negative,
                magnitude: &self.magnitude - &rhs.magnitude,
            }
        } else {
            SignedBigUint {
                negative: rhs.negative,
                magnitude: &rhs.magnitude - &self.magnitude,
            }
        }
        .normalize()
    }

    fn mul(&self, rhs: &SignedBigUint) -> SignedBigUint {
        SignedBigUint {
            negative: self.negative != rhs.negative,
            magnitude: &self.magnitude * &rhs.magnitude,
        }
        .normalize()
    }

    fn normalize(self) -> SignedBigUint {
        if self.magnitude == BigUint::from(0u8) {
            SignedBigUint {
                negative: false,
                magnitude: self.magnitude,
            }
        } else {
            self
        }
    }

    /// Reduce into `[0, modulus)`.
    fn rem_euclid(&self, modulus: &BigUint) -> BigUint {
        let reduced = &self.magnitude % modulus;
        if self.negative && reduced != BigUint::from(0u8) {
            modulus - reduced
        } else {
            reduced
        }
    }
}

fn to_signed(value: &BigUint) -> SignedBigUint {
    SignedBigUint {
        negative: false,
        magnitude: value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    impl Field {
        fn modulus_minus_one() -> Field {
            Field(Field::modulus() - BigUint::from(1u8))
        }
    }

    #[test]
    fn add_sub_are_inverse() {
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..100 {
            let a = Field::random(&mut rng);
            let b = Field::random(&mut rng);
            assert_eq!(&(&a + &b) - &b, a);
        }
    }

    #[test]
    fn sub_never_leaks_negative_intermediate() {
        let a = Field::zero();
        let b = Field::one();
        // a - b would be -1 in the integers; the field result must stay in [0, p).
        let result = &a - &b;
        assert_eq!(result, Field::modulus_minus_one());
    }

    #[test]
    fn mul_inverse_round_trips() {
        let mut rng = SmallRng::seed_from_u64(2);
        for _ in 0..100 {
            let a = Field::random(&mut rng);
            if a.is_zero() {
                continue;
            }
            let inv = a.inverse().unwrap();
            assert_eq!(&a * &inv, Field::one());
        }
    }

    #[test]
    fn inverse_of_zero_fails() {
        assert_eq!(Field::zero().inverse(), Err(CoreError::NotInvertible));
    }

    #[test]
    fn div_by_zero_fails() {
        assert_eq!(
            Field::one().checked_div(&Field::zero()),
            Err(CoreError::DivisionByZero)
        );
    }

    #[test]
    fn pow_matches_repeated_multiplication() {
        let base = Field::from_u64(7);
        let mut expected = Field::one();
        for _ in 0..13 {
            expected = &expected * &base;
        }
        assert_eq!(base.pow(&Field::from_u64(13)), expected);
    }

    #[test]
    fn bytes_round_trip() {
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..50 {
            let a = Field::random(&mut rng);
            assert_eq!(Field::from_bytes_be(&a.to_bytes_be()), a);
        }
    }

    #[test]
    fn serde_round_trip_via_bincode() {
        let a = Field::from_u64(123456789);
        let encoded = bincode::serialize(&a).unwrap();
        let decoded: Field = bincode::deserialize(&encoded).unwrap();
        assert_eq!(a, decoded);
    }
}
