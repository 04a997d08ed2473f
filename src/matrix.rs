//! Dense matrices over `Zp` and Gauss–Jordan reduction.
//!
//! Used for exactly one thing in this crate: the `(mbar+1) × mbar`
//! interpolation matrix built by [`crate::interpolate`]. `Matrix::new`
//! takes `(columns, rows)` in that order (grid-library convention); cell
//! access mirrors it as `cell(col, row)`.

use std::sync::Arc;

use num_bigint::BigUint;

use crate::zp::Zp;

/// Errors from matrix construction and reduction.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MatrixError {
    #[error("no non-zero pivot available in column {col} at or below row {row}")]
    SwapRowNotFound { col: usize, row: usize },
    #[error("matrix too narrow: {columns} columns cannot support {rows} pivot rows")]
    TooNarrow { columns: usize, rows: usize },
}

/// A dense `columns × rows` grid of `Zp` values, stored row-major.
#[derive(Clone, Debug)]
pub struct Matrix {
    columns: usize,
    rows: usize,
    data: Vec<Vec<Zp>>,
    p: Arc<BigUint>,
}

impl Matrix {
    /// Allocate a `columns × rows` grid, every cell initialized to a clone
    /// of `fill`.
    pub fn new(columns: usize, rows: usize, fill: &Zp) -> Self {
        let p = Arc::clone(fill.modulus());
        let data = (0..rows).map(|_| vec![fill.clone(); columns]).collect();
        Self { columns, rows, data, p }
    }

    /// Number of columns.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Read cell `(col, row)`.
    pub fn get(&self, col: usize, row: usize) -> &Zp {
        &self.data[row][col]
    }

    /// Write cell `(col, row)`.
    pub fn set(&mut self, col: usize, row: usize, val: Zp) {
        self.data[row][col] = val;
    }

    /// Swap two rows in full.
    pub fn swap_rows(&mut self, r1: usize, r2: usize) {
        self.data.swap(r1, r2);
    }

    /// Multiply every cell of row `r` by `scalar`.
    pub fn scale_row(&mut self, r: usize, scalar: &Zp) {
        for c in 0..self.columns {
            self.data[r][c] = self.data[r][c].mul(scalar);
        }
    }

    /// `row(dst) -= scalar * row(src)`.
    pub fn sub_scaled_row(&mut self, dst: usize, src: usize, scalar: &Zp) {
        for c in 0..self.columns {
            let delta = self.data[src][c].mul(scalar);
            self.data[dst][c] = self.data[dst][c].sub(&delta);
        }
    }

    /// Gauss–Jordan elimination to reduced row-echelon form, in place.
    ///
    /// For every row `r` (not just the rows below a given pivot — see the
    /// design notes' resolution of the source's divergent `Reduce` loops):
    /// ensure a non-zero pivot at `(r, r)` by swapping with a later row if
    /// needed, scale the row so the pivot is `1`, then eliminate column `r`
    /// from every *other* row.
    pub fn reduce(&mut self) -> Result<(), MatrixError> {
        if self.columns < self.rows {
            return Err(MatrixError::TooNarrow { columns: self.columns, rows: self.rows });
        }
        for r in 0..self.rows {
            if self.data[r][r].is_zero() {
                let mut found = None;
                for r2 in (r + 1)..self.rows {
                    if !self.data[r2][r].is_zero() {
                        found = Some(r2);
                        break;
                    }
                }
                match found {
                    Some(r2) => self.swap_rows(r, r2),
                    None => return Err(MatrixError::SwapRowNotFound { col: r, row: r }),
                }
            }
            let inv = self.data[r][r].inv();
            self.scale_row(r, &inv);
            for j in 0..self.rows {
                if j == r {
                    continue;
                }
                let factor = self.data[j][r].clone();
                if !factor.is_zero() {
                    self.sub_scaled_row(j, r, &factor);
                }
            }
        }
        Ok(())
    }

    /// Shared modulus.
    pub fn modulus(&self) -> &Arc<BigUint> {
        &self.p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zp::Zp;
    use num_bigint::BigUint;

    fn p13() -> Arc<BigUint> {
        Arc::new(BigUint::from(13u32))
    }

    #[test]
    fn s1_matrix_rref_swap() {
        let p = p13();
        let mut m = Matrix::new(3, 3, &Zp::zero(&p));
        let mut v = 0u64;
        for r in 0..3 {
            for c in 0..3 {
                m.set(c, r, Zp::from_u64(&p, v));
                v += 1;
            }
        }
        m.swap_rows(0, 1);
        assert_eq!(m.get(0, 0), &Zp::from_u64(&p, 3));
        assert_eq!(m.get(0, 1), &Zp::from_u64(&p, 0));
    }

    #[test]
    fn reduce_solves_identity_system() {
        let p = p13();
        // x + y = 3 ; x - y = 1  => x=2, y=1  (mod 13)
        let mut m = Matrix::new(3, 2, &Zp::zero(&p));
        m.set(0, 0, Zp::from_u64(&p, 1));
        m.set(1, 0, Zp::from_u64(&p, 1));
        m.set(2, 0, Zp::from_u64(&p, 3));
        m.set(0, 1, Zp::from_u64(&p, 1));
        m.set(1, 1, Zp::from_u64(&p, 12)); // -1 mod 13
        m.set(2, 1, Zp::from_u64(&p, 1));
        m.reduce().unwrap();
        assert_eq!(m.get(2, 0), &Zp::from_u64(&p, 2));
        assert_eq!(m.get(2, 1), &Zp::from_u64(&p, 1));
    }

    #[test]
    fn singular_matrix_fails_with_swap_row_not_found() {
        let p = p13();
        let mut m = Matrix::new(2, 2, &Zp::zero(&p));
        // both rows identical => column 0 has no pivot after the first row is zeroed out
        m.set(0, 0, Zp::from_u64(&p, 1));
        m.set(1, 0, Zp::from_u64(&p, 1));
        m.set(0, 1, Zp::from_u64(&p, 1));
        m.set(1, 1, Zp::from_u64(&p, 1));
        let err = m.reduce().unwrap_err();
        assert!(matches!(err, MatrixError::SwapRowNotFound { .. }));
    }

    #[test]
    fn too_narrow_is_rejected() {
        let p = p13();
        let mut m = Matrix::new(1, 2, &Zp::zero(&p));
        assert!(matches!(m.reduce(), Err(MatrixError::TooNarrow { .. })));
    }
}
