//! Rational-function interpolation: recover `A(z)/B(z)` from `(point, value)`
//! samples of their quotient, given the known degree difference.
//!
//! This is the core trick that turns "exchange svalues at a prefix" into
//! "recover the elements that differ": the ratio of two subtrees' svalue
//! products, sampled at a handful of points, determines a rational function
//! whose numerator and denominator roots are exactly the one-sided set
//! differences — see [`crate::factor`] for the next step.

use std::sync::Arc;

use num_bigint::BigUint;

use crate::matrix::{Matrix, MatrixError};
use crate::poly::{Poly, PolyError};
use crate::zp::Zp;

/// Errors from interpolation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InterpolateError {
    #[error("interpolation failed: |deg_diff| ({deg_diff}) exceeds sample count ({n})")]
    DegDiffTooLarge { deg_diff: i64, n: usize },
    #[error("interpolation matrix reduction failed: {0}")]
    Matrix(#[from] MatrixError),
    #[error("interpolation polynomial arithmetic failed: {0}")]
    Poly(#[from] PolyError),
}

/// A pair of polynomials `(num, denom)` sharing one modulus, representing a
/// rational function `num(z) / denom(z)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RationalFn {
    pub num: Poly,
    pub denom: Poly,
}

/// Interpolate the rational function whose values at `points` are `values`,
/// given `deg_diff = deg(num) - deg(denom)`.
///
/// `values` and `points` must have equal, non-zero length; only the first
/// `mbar` of them are used to build the interpolation matrix (`mbar` is `n`
/// or `n-1` depending on parity, per the algorithm below).
pub fn interpolate(
    values: &[Zp],
    points: &[Zp],
    deg_diff: i64,
) -> Result<RationalFn, InterpolateError> {
    assert_eq!(values.len(), points.len(), "interpolate: values/points length mismatch");
    let n = values.len();
    if deg_diff.unsigned_abs() as usize > n {
        return Err(InterpolateError::DegDiffTooLarge { deg_diff, n });
    }
    let p = Arc::clone(points[0].modulus());

    let mbar: usize = if (n as i64 + deg_diff) % 2 == 0 { n } else { n - 1 };
    let ma: usize = ((mbar as i64 + deg_diff) / 2) as usize;
    let mb: usize = ((mbar as i64 - deg_diff) / 2) as usize;
    debug_assert_eq!(ma + mb, mbar);

    let mut m = Matrix::new(mbar + 1, mbar, &Zp::zero(&p));
    for j in 0..mbar {
        let k = &points[j];
        let f = &values[j];
        for c in 0..ma {
            m.set(c, j, k.pow_u64(c as u64));
        }
        for c in ma..mbar {
            let e = (c - ma) as u64;
            m.set(c, j, f.mul(&k.pow_u64(e)).neg());
        }
        let last = f.mul(&k.pow_u64(mb as u64)).neg().sub(&k.pow_u64(ma as u64));
        m.set(mbar, j, last);
    }
    m.reduce()?;

    let mut a_coeffs: Vec<Zp> = (0..ma).map(|r| m.get(mbar, r).clone()).collect();
    a_coeffs.push(Zp::one(&p));
    let mut b_coeffs: Vec<Zp> = (ma..mbar).map(|r| m.get(mbar, r).clone()).collect();
    b_coeffs.push(Zp::one(&p));

    let a = Poly::from_coeffs(&p, a_coeffs);
    let b = Poly::from_coeffs(&p, b_coeffs);

    let g = a.gcd(&b)?;
    let (num, _) = a.divmod(&g)?;
    let (denom, _) = b.divmod(&g)?;
    Ok(RationalFn { num, denom })
}
