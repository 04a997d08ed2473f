//! Polynomials over `Zp`, coefficients stored ascending-degree.
//!
//! Per the design notes, we reject the "sentinel for absent coefficient"
//! encoding some reference implementations use: a degree-`d` polynomial here
//! is exactly `d+1` `Zp` values with the leading one non-zero (or the single
//! value `0` for the zero polynomial), normalized at construction.

use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::Zero as _;
use rand::RngCore;

use crate::zp::Zp;

/// Errors from polynomial division and gcd.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PolyError {
    #[error("division by the zero polynomial")]
    DivByZero,
}

/// A polynomial over `Zp`, ascending-degree coefficient order.
#[derive(Clone, Debug)]
pub struct Poly {
    /// `coeffs[i]` is the coefficient of `z^i`. Always non-empty; trailing
    /// zero coefficients above the true degree are trimmed by
    /// [`Poly::normalize`].
    coeffs: Vec<Zp>,
    p: Arc<BigUint>,
}

impl Poly {
    /// The zero polynomial over `p`.
    pub fn zero(p: &Arc<BigUint>) -> Self {
        Self { coeffs: vec![Zp::zero(p)], p: Arc::clone(p) }
    }

    /// `1` (the constant polynomial) over `p`.
    pub fn one(p: &Arc<BigUint>) -> Self {
        Self { coeffs: vec![Zp::one(p)], p: Arc::clone(p) }
    }

    /// Build from ascending-degree coefficients, trimming trailing zeros.
    pub fn from_coeffs(p: &Arc<BigUint>, mut coeffs: Vec<Zp>) -> Self {
        if coeffs.is_empty() {
            coeffs.push(Zp::zero(p));
        }
        let mut poly = Self { coeffs, p: Arc::clone(p) };
        poly.normalize();
        poly
    }

    fn normalize(&mut self) {
        while self.coeffs.len() > 1 && self.coeffs.last().unwrap().is_zero() {
            self.coeffs.pop();
        }
    }

    /// Shared modulus.
    pub fn modulus(&self) -> &Arc<BigUint> {
        &self.p
    }

    /// Coefficient view, ascending degree.
    pub fn coeffs(&self) -> &[Zp] {
        &self.coeffs
    }

    /// `deg(p)`: index of the highest non-zero coefficient, or `0` for the
    /// zero polynomial.
    pub fn degree(&self) -> usize {
        self.coeffs.len() - 1
    }

    /// True iff this is the zero polynomial.
    pub fn is_zero(&self) -> bool {
        self.coeffs.len() == 1 && self.coeffs[0].is_zero()
    }

    /// The leading (highest-degree) coefficient.
    pub fn leading_coeff(&self) -> &Zp {
        self.coeffs.last().unwrap()
    }

    /// `self + other`.
    pub fn add(&self, other: &Poly) -> Poly {
        let n = self.coeffs.len().max(other.coeffs.len());
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let a = self.coeffs.get(i).cloned().unwrap_or_else(|| Zp::zero(&self.p));
            let b = other.coeffs.get(i).cloned().unwrap_or_else(|| Zp::zero(&self.p));
            out.push(a.add(&b));
        }
        Poly::from_coeffs(&self.p, out)
    }

    /// `-self`.
    pub fn negate(&self) -> Poly {
        Poly::from_coeffs(&self.p, self.coeffs.iter().map(Zp::neg).collect())
    }

    /// `self - other`.
    pub fn sub(&self, other: &Poly) -> Poly {
        self.add(&other.negate())
    }

    /// `self * other` (naive convolution — degrees here are small, O(n^2) is fine).
    pub fn mul(&self, other: &Poly) -> Poly {
        if self.is_zero() || other.is_zero() {
            return Poly::zero(&self.p);
        }
        let mut out = vec![Zp::zero(&self.p); self.coeffs.len() + other.coeffs.len() - 1];
        for (i, a) in self.coeffs.iter().enumerate() {
            if a.is_zero() {
                continue;
            }
            for (j, b) in other.coeffs.iter().enumerate() {
                out[i + j] = out[i + j].add(&a.mul(b));
            }
        }
        Poly::from_coeffs(&self.p, out)
    }

    /// Evaluate `self(z)` by Horner's method.
    pub fn eval(&self, z: &Zp) -> Zp {
        let mut acc = Zp::zero(&self.p);
        for c in self.coeffs.iter().rev() {
            acc = acc.mul(z).add(c);
        }
        acc
    }

    /// `(quotient, remainder)` such that `self = quotient * y + remainder`
    /// and `deg(remainder) < deg(y)`.
    pub fn divmod(&self, y: &Poly) -> Result<(Poly, Poly), PolyError> {
        if y.is_zero() {
            return Err(PolyError::DivByZero);
        }
        if self.is_zero() {
            return Ok((Poly::zero(&self.p), Poly::zero(&self.p)));
        }
        if y.degree() > self.degree() {
            return Ok((Poly::zero(&self.p), self.clone()));
        }
        let mut rem = self.coeffs.clone();
        let mut quot = vec![Zp::zero(&self.p); self.degree() - y.degree() + 1];
        let y_lead_inv = y.leading_coeff().inv();
        let y_deg = y.degree();

        for shift in (0..=(self.degree() - y_deg)).rev() {
            let lead = rem[shift + y_deg].clone();
            if lead.is_zero() {
                continue;
            }
            let coef = lead.mul(&y_lead_inv);
            quot[shift] = coef.clone();
            for (j, yc) in y.coeffs.iter().enumerate() {
                rem[shift + j] = rem[shift + j].sub(&coef.mul(yc));
            }
        }
        Ok((Poly::from_coeffs(&self.p, quot), Poly::from_coeffs(&self.p, rem)))
    }

    /// Euclidean GCD, normalized to be monic (leading coefficient `1`) so
    /// downstream equality checks are well-defined.
    pub fn gcd(&self, other: &Poly) -> Result<Poly, PolyError> {
        let (mut a, mut b) = (self.clone(), other.clone());
        while !b.is_zero() {
            let (_, r) = a.divmod(&b)?;
            a = b;
            b = r;
        }
        if a.is_zero() {
            return Ok(a);
        }
        let inv = a.leading_coeff().inv();
        let monic = a.coeffs.iter().map(|c| c.mul(&inv)).collect();
        Ok(Poly::from_coeffs(&self.p, monic))
    }

    /// `self^n mod g` by repeated squaring. Only meaningful for `n` with at
    /// least 3 bits (callers must guarantee this, per the algebra design).
    pub fn powmod(&self, n: &BigUint, g: &Poly) -> Result<Poly, PolyError> {
        let mut acc = Poly::one(&self.p);
        let mut base = self.divmod(g)?.1;
        let mut e = n.clone();
        while !e.is_zero() {
            if e.bit(0) {
                acc = acc.mul(&base).divmod(g)?.1;
            }
            base = base.mul(&base).divmod(g)?.1;
            e >>= 1u32;
        }
        Ok(acc)
    }

    /// A random monic polynomial of the given degree.
    pub fn random(p: &Arc<BigUint>, degree: usize, rng: &mut impl RngCore) -> Poly {
        let mut coeffs: Vec<Zp> = (0..degree).map(|_| Zp::random(p, rng)).collect();
        coeffs.push(Zp::one(p)); // monic leading coefficient
        Poly::from_coeffs(p, coeffs)
    }
}

impl PartialEq for Poly {
    fn eq(&self, other: &Self) -> bool {
        self.p == other.p && self.coeffs == other.coeffs
    }
}
impl Eq for Poly {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zp::p_sks;

    fn p(vals: &[u64], modulus: &Arc<BigUint>) -> Poly {
        Poly::from_coeffs(modulus, vals.iter().map(|&v| Zp::from_u64(modulus, v)).collect())
    }

    #[test]
    fn gcd_of_poly_with_itself_is_itself_monic() {
        let m = p_sks();
        let f = p(&[3, 5, 1], &m); // z^2 + 5z + 3, already monic
        let g = f.gcd(&f).unwrap();
        assert_eq!(g, f);
    }

    #[test]
    fn divmod_reconstructs_dividend() {
        let m = p_sks();
        let x = p(&[7, 0, 2, 1], &m); // z^3 + 2z^2 + 7
        let y = p(&[1, 1], &m); // z + 1
        let (q, r) = x.divmod(&y).unwrap();
        let back = q.mul(&y).add(&r);
        assert_eq!(back, x);
        assert!(r.degree() < y.degree() || r.is_zero());
    }

    #[test]
    fn divmod_base_cases() {
        let m = p_sks();
        let zero = Poly::zero(&m);
        let y = p(&[1, 1], &m);
        let (q, r) = zero.divmod(&y).unwrap();
        assert!(q.is_zero());
        assert!(r.is_zero());

        let x = p(&[1, 1], &m);
        let big_y = p(&[1, 1, 1], &m); // deg(y) > deg(x)
        let (q2, r2) = x.divmod(&big_y).unwrap();
        assert!(q2.is_zero());
        assert_eq!(r2, x);
    }

    #[test]
    fn eval_matches_naive_horner() {
        let m = p_sks();
        let f = p(&[1, 2, 3], &m); // 1 + 2z + 3z^2
        let z = Zp::from_u64(&m, 5);
        let want = Zp::from_u64(&m, 1 + 2 * 5 + 3 * 25);
        assert_eq!(f.eval(&z), want);
    }
}
