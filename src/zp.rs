//! Finite-field arithmetic over a large prime `P`
//!
//! A `Zp` is a residue in `[0, P)` paired with a handle to its modulus. All
//! arithmetic is closed under `P`: every operation below returns a fresh,
//! already-reduced value rather than mutating its operands (see the design
//! notes on "mutable arithmetic receivers" — we take the pure-value reading
//! here and reserve in-place helpers for the hot loops that need them).
//!
//! Two `Zp` values may only interact when their `P` matches. That mismatch
//! is a programmer error, not a recoverable condition, so the arithmetic
//! operator impls assert rather than return `Result`. Callers that need a
//! checked path (e.g. deserializing attacker-controlled wire bytes) should
//! compare moduli themselves before invoking the operators.

#![allow(clippy::should_implement_trait)]

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::sync::Arc;

use num_bigint::{BigInt, BigUint, RandBigInt, Sign};
use num_integer::Integer;
use num_traits::{One, Zero};
use rand::RngCore;

/// Errors raised by field-element construction and inversion.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ZpError {
    #[error("value is not a valid decimal integer: {0}")]
    BadDecimal(String),
    #[error("zero has no multiplicative inverse mod P")]
    NotInvertible,
    #[error("wire value does not fit in {expected} bytes (got {got})")]
    WireTooLong { expected: usize, got: usize },
}

/// A residue modulo a shared prime `P`.
///
/// `P` is carried as an `Arc<BigUint>` so cloning a `Zp` never deep-copies
/// the modulus; only the (small, ≤ a few hundred bits) residue is cloned.
#[derive(Clone, Debug)]
pub struct Zp {
    val: BigUint,
    p: Arc<BigUint>,
}

impl Zp {
    /// Build a `Zp` from an already-reduced `BigUint`. Debug-asserts that
    /// `val < p`; release builds normalize defensively with a modulo.
    pub fn new(p: Arc<BigUint>, val: BigUint) -> Self {
        debug_assert!(&val < &*p, "Zp::new: value not reduced mod P");
        let val = if &val < &*p { val } else { &val % &*p };
        Self { val, p }
    }

    /// The additive identity.
    pub fn zero(p: &Arc<BigUint>) -> Self {
        Self { val: BigUint::zero(), p: Arc::clone(p) }
    }

    /// The multiplicative identity.
    pub fn one(p: &Arc<BigUint>) -> Self {
        Self { val: BigUint::one(), p: Arc::clone(p) }
    }

    /// Parse a decimal-string element, reducing mod `P` if it is `>= P`.
    pub fn from_decimal_str(p: &Arc<BigUint>, s: &str) -> Result<Self, ZpError> {
        let val = s
            .trim()
            .parse::<BigUint>()
            .map_err(|_| ZpError::BadDecimal(s.to_string()))?;
        Ok(Self { val: &val % &**p, p: Arc::clone(p) })
    }

    /// Build directly from a small integer (reduced mod `P`).
    pub fn from_u64(p: &Arc<BigUint>, v: u64) -> Self {
        Self { val: BigUint::from(v) % &**p, p: Arc::clone(p) }
    }

    /// Uniform random sample in `[0, P)` via the supplied CSPRNG.
    pub fn random(p: &Arc<BigUint>, rng: &mut impl RngCore) -> Self {
        let val = rng.gen_biguint_below(p);
        Self { val, p: Arc::clone(p) }
    }

    /// The shared modulus.
    pub fn modulus(&self) -> &Arc<BigUint> {
        &self.p
    }

    /// The underlying residue in `[0, P)`.
    pub fn value(&self) -> &BigUint {
        &self.val
    }

    /// Decimal string form (what `ZSet` membership is keyed on).
    pub fn to_decimal_string(&self) -> String {
        self.val.to_str_radix(10)
    }

    /// Is this the additive identity?
    pub fn is_zero(&self) -> bool {
        self.val.is_zero()
    }

    #[inline]
    fn assert_same_field(&self, other: &Zp) {
        assert!(
            self.p == other.p,
            "Zp operands belong to different fields (P mismatch) — this is a bug at the call site"
        );
    }

    /// `self + other mod P`.
    pub fn add(&self, other: &Zp) -> Zp {
        self.assert_same_field(other);
        let sum = &self.val + &other.val;
        let val = if sum >= *self.p { sum - &*self.p } else { sum };
        Zp { val, p: Arc::clone(&self.p) }
    }

    /// `self - other mod P`.
    pub fn sub(&self, other: &Zp) -> Zp {
        self.assert_same_field(other);
        let val = if self.val >= other.val {
            &self.val - &other.val
        } else {
            &*self.p - (&other.val - &self.val)
        };
        Zp { val, p: Arc::clone(&self.p) }
    }

    /// `self * other mod P`.
    pub fn mul(&self, other: &Zp) -> Zp {
        self.assert_same_field(other);
        let val = (&self.val * &other.val) % &*self.p;
        Zp { val, p: Arc::clone(&self.p) }
    }

    /// `-self mod P`.
    pub fn neg(&self) -> Zp {
        let val = if self.val.is_zero() { BigUint::zero() } else { &*self.p - &self.val };
        Zp { val, p: Arc::clone(&self.p) }
    }

    /// Multiplicative inverse, `Err(NotInvertible)` for zero.
    pub fn checked_inv(&self) -> Result<Zp, ZpError> {
        if self.val.is_zero() {
            return Err(ZpError::NotInvertible);
        }
        let (g, x, _) = extended_gcd(
            BigInt::from_biguint(Sign::Plus, self.val.clone()),
            BigInt::from_biguint(Sign::Plus, (*self.p).clone()),
        );
        debug_assert!(g.is_one(), "P is not prime or value shares a factor with P");
        let p_i = BigInt::from_biguint(Sign::Plus, (*self.p).clone());
        let x = ((x % &p_i) + &p_i) % &p_i;
        let (sign, val) = x.into_parts();
        debug_assert!(sign != Sign::Minus);
        Ok(Zp { val, p: Arc::clone(&self.p) })
    }

    /// Multiplicative inverse; panics on zero (use [`Zp::checked_inv`] at
    /// boundaries where a zero svalue/mask is a real possibility).
    pub fn inv(&self) -> Zp {
        self.checked_inv().expect("Zp::inv called on zero")
    }

    /// `self / other mod P`.
    pub fn div(&self, other: &Zp) -> Zp {
        self.assert_same_field(other);
        self.mul(&other.inv())
    }

    /// `self ^ exp mod P` by repeated squaring, `exp` a non-negative integer.
    pub fn exp(&self, exp: &BigUint) -> Zp {
        let mut acc = Zp::one(&self.p);
        let mut base = self.clone();
        let mut e = exp.clone();
        while !e.is_zero() {
            if e.is_odd() {
                acc = acc.mul(&base);
            }
            base = base.mul(&base);
            e >>= 1u32;
        }
        acc
    }

    /// `self ^ exp mod P` for a small exponent.
    pub fn pow_u64(&self, exp: u64) -> Zp {
        self.exp(&BigUint::from(exp))
    }

    /// Number of bytes required to hold `P` on the wire: `ceil(bitlen(P)/8)`.
    pub fn wire_len(p: &BigUint) -> usize {
        ((p.bits() as usize) + 7) / 8
    }

    /// Little-endian, zero-padded-on-the-right wire encoding (see §6: this
    /// differs from the natural big-endian byte form of a bigint library).
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        let len = Zp::wire_len(&self.p);
        let mut be = self.val.to_bytes_be();
        // to_bytes_be omits leading zero bytes; pad on the left first.
        if be.len() < len {
            let mut padded = vec![0u8; len - be.len()];
            padded.append(&mut be);
            be = padded;
        }
        be.reverse(); // big-endian value -> little-endian wire bytes
        be
    }

    /// Parse the little-endian, zero-padded wire form produced by
    /// [`Zp::to_wire_bytes`].
    pub fn from_wire_bytes(p: &Arc<BigUint>, bytes: &[u8]) -> Result<Zp, ZpError> {
        let expected = Zp::wire_len(p);
        if bytes.len() != expected {
            return Err(ZpError::WireTooLong { expected, got: bytes.len() });
        }
        let mut be = bytes.to_vec();
        be.reverse();
        let val = BigUint::from_bytes_be(&be) % &**p;
        Ok(Zp { val, p: Arc::clone(p) })
    }
}

impl PartialEq for Zp {
    fn eq(&self, other: &Self) -> bool {
        self.p == other.p && self.val == other.val
    }
}
impl Eq for Zp {}

impl fmt::Display for Zp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.val.to_str_radix(10))
    }
}

macro_rules! impl_op_by_ref {
    ($trait:ident, $method:ident, $inner:ident) => {
        impl $trait for Zp {
            type Output = Zp;
            fn $method(self, rhs: Zp) -> Zp {
                Zp::$inner(&self, &rhs)
            }
        }
        impl<'a> $trait<&'a Zp> for &'a Zp {
            type Output = Zp;
            fn $method(self, rhs: &'a Zp) -> Zp {
                Zp::$inner(self, rhs)
            }
        }
    };
}
impl_op_by_ref!(Add, add, add);
impl_op_by_ref!(Sub, sub, sub);
impl_op_by_ref!(Mul, mul, mul);
impl_op_by_ref!(Div, div, div);

impl Neg for Zp {
    type Output = Zp;
    fn neg(self) -> Zp {
        Zp::neg(&self)
    }
}
impl<'a> Neg for &'a Zp {
    type Output = Zp;
    fn neg(self) -> Zp {
        Zp::neg(self)
    }
}

/// Extended Euclidean algorithm: returns `(g, x, y)` with `a*x + b*y == g == gcd(a, b)`.
fn extended_gcd(a: BigInt, b: BigInt) -> (BigInt, BigInt, BigInt) {
    let (mut old_r, mut r) = (a, b);
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    let (mut old_t, mut t) = (BigInt::zero(), BigInt::one());
    while !r.is_zero() {
        let q = &old_r / &r;
        let new_r = &old_r - &q * &r;
        old_r = std::mem::replace(&mut r, new_r);
        let new_s = &old_s - &q * &s;
        old_s = std::mem::replace(&mut s, new_s);
        let new_t = &old_t - &q * &t;
        old_t = std::mem::replace(&mut t, new_t);
    }
    (old_r, old_s, old_t)
}

/// The canonical SKS-style prime: the field used on the wire for all
/// fingerprint reconciliation. Just above 2^128.
pub fn p_sks() -> Arc<BigUint> {
    static CELL: std::sync::OnceLock<Arc<BigUint>> = std::sync::OnceLock::new();
    CELL.get_or_init(|| {
        Arc::new(
            "530512889551602322505127520352579437339"
                .parse::<BigUint>()
                .expect("P_SKS literal is a valid decimal integer"),
        )
    })
    .clone()
}

/// A 128-bit-regime prime (the Mersenne prime `2^127 - 1`), for deployments
/// that key on shorter fingerprints.
pub fn p_128() -> Arc<BigUint> {
    static CELL: std::sync::OnceLock<Arc<BigUint>> = std::sync::OnceLock::new();
    CELL.get_or_init(|| {
        Arc::new(
            "170141183460469231731687303715884105727"
                .parse::<BigUint>()
                .expect("P_128 literal is a valid decimal integer"),
        )
    })
    .clone()
}

/// A 160-bit-regime prime (`2^160 - 2^31 - 1`).
pub fn p_160() -> Arc<BigUint> {
    static CELL: std::sync::OnceLock<Arc<BigUint>> = std::sync::OnceLock::new();
    CELL.get_or_init(|| {
        Arc::new(
            "1461501637330902918203684832716283019653785059327"
                .parse::<BigUint>()
                .expect("P_160 literal is a valid decimal integer"),
        )
    })
    .clone()
}

/// A 256-bit-regime prime (the secp256k1 field prime, `2^256 - 2^32 - 977`).
pub fn p_256() -> Arc<BigUint> {
    static CELL: std::sync::OnceLock<Arc<BigUint>> = std::sync::OnceLock::new();
    CELL.get_or_init(|| {
        Arc::new(
            "115792089237316195423570985008687907853269984665640564039457584007908834671663"
                .parse::<BigUint>()
                .expect("P_256 literal is a valid decimal integer"),
        )
    })
    .clone()
}

/// A 512-bit-regime prime (the Mersenne prime `2^521 - 1`, the nearest known
/// Mersenne prime above 512 bits).
pub fn p_512() -> Arc<BigUint> {
    static CELL: std::sync::OnceLock<Arc<BigUint>> = std::sync::OnceLock::new();
    CELL.get_or_init(|| {
        Arc::new(
            "6864797660130609714981900799081393217269435300143305409394463459185543183397656052122559640661454554977296311391480858037121987999716643812574028291115057151"
                .parse::<BigUint>()
                .expect("P_512 literal is a valid decimal integer"),
        )
    })
    .clone()
}
