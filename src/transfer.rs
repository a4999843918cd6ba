//! Transfer maps
//!
//! The transport through an element is described by a truncated Taylor series of
//! its map around the reference orbit:
//!
//! ```text
//! x_out[i] = d[i] + Σ_j R[i,j] x[j] + Σ_jk T[i,j,k] x[j] x[k]
//! ```
//!
//! Coordinates are ensembles of shape `(6, N)` with rows `x, px, y, py, t, pt`.
//! This module provides the [`TransferMap`] type, its application to ensembles,
//! the contraction of successive maps and the symplectification of linear maps.

use crate::beam::Beam;
use crate::error::{LatticeError, Result};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, Array3, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Truncation order of transfer maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TransferMapOrder {
    /// Only `d` and `R` are computed; `T` stays zero.
    First,
    /// `d`, `R` and `T` are computed.
    Second,
}

impl Default for TransferMapOrder {
    fn default() -> Self {
        TransferMapOrder::Second
    }
}

/// Zeroth, first and second order coefficients of a transfer map.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferMap {
    /// Kick vector, shape `(6,)`.
    pub d: Array1<f64>,
    /// Transfer matrix, shape `(6, 6)`.
    pub r: Array2<f64>,
    /// Second order tensor, shape `(6, 6, 6)`.
    pub t: Array3<f64>,
}

impl TransferMap {
    /// Map that leaves every coordinate unchanged.
    pub fn identity() -> Self {
        Self {
            d: Array1::zeros(6),
            r: Array2::eye(6),
            t: Array3::zeros((6, 6, 6)),
        }
    }

    /// Map of a field-free drift space of length `l`.
    pub fn drift(l: f64, beam: &Beam, order: TransferMapOrder) -> Self {
        let mut map = Self::identity();
        let beta = beam.beta;
        let bg_sq = beam.beta_gamma_sq();

        map.r[[0, 1]] = l;
        map.r[[2, 3]] = l;
        map.r[[4, 5]] = l / bg_sq;

        if order == TransferMapOrder::Second {
            let t = &mut map.t;
            let c = -0.5 * l / beta;
            t[[0, 1, 5]] = c;
            t[[0, 5, 1]] = c;
            t[[2, 3, 5]] = c;
            t[[2, 5, 3]] = c;
            t[[4, 1, 1]] = c;
            t[[4, 3, 3]] = c;
            t[[4, 5, 5]] = -1.5 * l / beta / bg_sq;
        }
        map
    }

    /// `d + R·x`
    pub fn apply_linear(&self, x: &Array2<f64>) -> Array2<f64> {
        self.r.dot(x) + &self.d.view().insert_axis(Axis(1))
    }

    /// `d + R·x + T·x·x`
    pub fn apply_second_order(&self, x: &Array2<f64>) -> Array2<f64> {
        self.apply_linear(x) + quadratic(&self.t, x)
    }
}

/// Second order term `Σ_jk T[i,j,k] x[j,n] x[k,n]` for every column `n` of `x`.
pub fn quadratic(t: &Array3<f64>, x: &Array2<f64>) -> Array2<f64> {
    let mut out = Array2::zeros((t.dim().0, x.ncols()));
    for ((i, j, k), &c) in t.indexed_iter() {
        if c == 0.0 {
            continue;
        }
        Zip::from(out.row_mut(i))
            .and(x.row(j))
            .and(x.row(k))
            .for_each(|o, a, b| *o += c * a * b);
    }
    out
}

fn quadratic_vec(t: &Array3<f64>, d: &Array1<f64>) -> Array1<f64> {
    Array1::from_iter(t.outer_iter().map(|ti| d.dot(&ti.dot(d))))
}

/// Contract the map `x` followed by the map `y` into a single map.
///
/// The linear part of `y` is first moved to the orbit `x.d`
/// (see [`update_reference`]).
pub fn contract(
    x: &TransferMap,
    y: &TransferMap,
    order: TransferMapOrder,
    symplectify: bool,
) -> Result<TransferMap> {
    let mut d = &y.d + &y.r.dot(&x.d);
    let y_ref = update_reference(x, y, order, symplectify)?;
    let r = y_ref.r.dot(&x.r);
    let mut t = Array3::zeros((6, 6, 6));

    if order == TransferMapOrder::Second {
        d += &quadratic_vec(&y.t, &x.d);
        for (i, mut ti) in t.outer_iter_mut().enumerate() {
            for (l, tl) in x.t.outer_iter().enumerate() {
                let c = y.r[[i, l]];
                if c != 0.0 {
                    ti.scaled_add(c, &tl);
                }
            }
            let yi = y.t.index_axis(Axis(0), i);
            ti += &x.r.t().dot(&yi).dot(&x.r);
        }
    }
    Ok(TransferMap { d, r, t })
}

/// Re-expand `y` around the orbit `x.d`, adding the feed-down `2·T·d` to its
/// linear part (second order only), optionally symplectified.
pub fn update_reference(
    x: &TransferMap,
    y: &TransferMap,
    order: TransferMapOrder,
    symplectify: bool,
) -> Result<TransferMap> {
    let mut updated = y.clone();
    if order == TransferMapOrder::Second {
        for (i, ti) in y.t.outer_iter().enumerate() {
            let feed_down = ti.dot(&x.d);
            updated.r.row_mut(i).scaled_add(2.0, &feed_down);
        }
        if symplectify {
            updated.r = self::symplectify(&updated.r)?;
        }
    }
    Ok(updated)
}

/// Symplectic unit matrix `S = diag(S2, S2, S2)` with `S2 = [[0, 1], [-1, 0]]`.
pub fn symplectic_unit() -> Array2<f64> {
    let mut s = Array2::zeros((6, 6));
    for k in 0..3 {
        s[[2 * k, 2 * k + 1]] = 1.0;
        s[[2 * k + 1, 2 * k]] = -1.0;
    }
    s
}

/// Closest symplectic matrix to `r` (Healy's method).
///
/// # Errors
///
/// [`LatticeError::LinearAlgebra`] if `I + R` or `I + SW` is singular.
pub fn symplectify(r: &Array2<f64>) -> Result<Array2<f64>> {
    let n = r.nrows();
    let i = DMatrix::<f64>::identity(n, n);
    let s = to_nalgebra(&symplectic_unit());
    let r = to_nalgebra(r);

    let v = (&i - &r) * invert(&i + &r)?;
    let sw = (&s * v.transpose() * &s + &v) * 0.5;
    let result = (&i - &sw) * invert(&i + &sw)?;
    Ok(from_nalgebra(&result))
}

fn invert(m: DMatrix<f64>) -> Result<DMatrix<f64>> {
    m.try_inverse()
        .ok_or_else(|| LatticeError::LinearAlgebra("Singular matrix during symplectification".to_string()))
}

/// Copy an ndarray matrix into a nalgebra matrix.
fn to_nalgebra(arr: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(arr.nrows(), arr.ncols(), |i, j| arr[[i, j]])
}

/// Copy a nalgebra matrix into an ndarray matrix.
fn from_nalgebra(mat: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

/// `true` if `Rᵀ S R = S` within `tol`.
pub fn is_symplectic(r: &Array2<f64>, tol: f64) -> bool {
    let s = symplectic_unit();
    let lhs = r.t().dot(&s).dot(r);
    lhs.iter().zip(s.iter()).all(|(a, b)| (a - b).abs() <= tol)
}

/// Transverse positions (rows `x` and `y`) of an ensemble.
pub fn positions(x: &Array2<f64>) -> Array2<f64> {
    let mut xy = Array2::zeros((2, x.ncols()));
    xy.row_mut(0).assign(&x.row(0));
    xy.row_mut(1).assign(&x.row(2));
    xy
}

/// Keep the columns of `x` whose loss is exactly zero.
pub fn survivors(x: &Array2<f64>, loss: &Array1<f64>) -> Array2<f64> {
    let keep: Vec<usize> = loss
        .iter()
        .enumerate()
        .filter(|(_, l)| **l == 0.0)
        .map(|(i, _)| i)
        .collect();
    if keep.len() == x.ncols() {
        return x.clone();
    }
    x.select(Axis(1), &keep)
}
