use crate::basis::Basis;
use crate::traits::PolyScalar;
use serde::{Deserialize, Serialize};

/// Dense tensor-product polynomial in a fixed basis.
///
/// Coefficients are stored lexicographically by multi-degree with the last
/// axis fastest, so `coeffs[i * (d_last + 1) + j]` is the coefficient of
/// `phi_i(x_0) * phi_j(x_1)` in two dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasisPoly {
    pub basis: Basis,
    pub degrees: Vec<usize>,
    pub coeffs: Vec<f64>,
}

impl BasisPoly {
    pub fn new(basis: Basis, degrees: Vec<usize>, coeffs: Vec<f64>) -> Self {
        debug_assert_eq!(coeffs.len(), Self::coeff_len(&degrees));
        Self {
            basis,
            degrees,
            coeffs,
        }
    }

    pub fn coeff_len(degrees: &[usize]) -> usize {
        degrees.iter().map(|&d| d + 1).product()
    }

    pub fn dim(&self) -> usize {
        self.degrees.len()
    }

    pub fn total_degree(&self) -> usize {
        self.degrees.iter().sum()
    }

    pub fn max_abs_coeff(&self) -> f64 {
        self.coeffs.iter().fold(0.0, |acc, c| acc.max(c.abs()))
    }

    /// Evaluate at a point by successive contraction of the last axis.
    pub fn eval<T: PolyScalar>(&self, point: &[T]) -> T {
        debug_assert_eq!(point.len(), self.dim());
        let mut current: Vec<T> = self.coeffs.iter().map(|&c| T::from_f64(c)).collect();
        for axis in (0..self.dim()).rev() {
            let block = self.degrees[axis] + 1;
            let table = self.basis.eval_1d(block, point[axis]);
            let rows = current.len() / block;
            let mut next = Vec::with_capacity(rows);
            for r in 0..rows {
                let mut acc = T::zero();
                for (k, &value) in table.iter().enumerate() {
                    acc = acc + current[r * block + k] * value;
                }
                next.push(acc);
            }
            current = next;
        }
        current[0]
    }

    /// Partial derivative along `axis`, expressed in the same basis.
    /// Requires `degrees[axis] >= 1`.
    pub fn diff_axis(&self, axis: usize) -> BasisPoly {
        let n_old = self.degrees[axis] + 1;
        debug_assert!(n_old >= 2, "cannot differentiate a degree-0 axis");
        let n_new = n_old - 1;
        let before: usize = self.degrees[..axis].iter().map(|&d| d + 1).product();
        let after: usize = self.degrees[axis + 1..].iter().map(|&d| d + 1).product();

        let mut degrees = self.degrees.clone();
        degrees[axis] -= 1;
        let mut coeffs = vec![0.0; Self::coeff_len(&degrees)];
        let mut line = vec![0.0; n_old];
        for b in 0..before {
            for a in 0..after {
                for (k, slot) in line.iter_mut().enumerate() {
                    *slot = self.coeffs[(b * n_old + k) * after + a];
                }
                let derived = self.basis.differentiate_series(&line);
                for (k, value) in derived.iter().enumerate() {
                    coeffs[(b * n_new + k) * after + a] = *value;
                }
            }
        }
        BasisPoly {
            basis: self.basis,
            degrees,
            coeffs,
        }
    }

    /// Drop trailing per-axis degrees whose coefficient slices fall below
    /// `rel_tol` relative to the largest coefficient. Keeps the downstream
    /// Bezout path count tied to the effective degree of the data rather
    /// than the requested one.
    pub fn trim(&self, rel_tol: f64) -> BasisPoly {
        let scale = self.max_abs_coeff();
        if scale == 0.0 {
            return BasisPoly {
                basis: self.basis,
                degrees: vec![0; self.dim()],
                coeffs: vec![0.0],
            };
        }
        let threshold = rel_tol * scale;
        let mut new_degrees = self.degrees.clone();
        for axis in 0..self.dim() {
            while new_degrees[axis] > 0
                && self.axis_slice_below(axis, new_degrees[axis], threshold)
            {
                new_degrees[axis] -= 1;
            }
        }
        if new_degrees == self.degrees {
            return self.clone();
        }
        let mut coeffs = vec![0.0; Self::coeff_len(&new_degrees)];
        let old_strides = strides(&self.degrees);
        for (flat, slot) in coeffs.iter_mut().enumerate() {
            let multi = decode(flat, &new_degrees);
            let old_flat: usize = multi
                .iter()
                .zip(&old_strides)
                .map(|(&idx, &stride)| idx * stride)
                .sum();
            *slot = self.coeffs[old_flat];
        }
        BasisPoly {
            basis: self.basis,
            degrees: new_degrees,
            coeffs,
        }
    }

    /// Whether every coefficient with index `level` along `axis` is below
    /// `threshold` in magnitude.
    fn axis_slice_below(&self, axis: usize, level: usize, threshold: f64) -> bool {
        let axis_len = self.degrees[axis] + 1;
        let after: usize = self.degrees[axis + 1..].iter().map(|&d| d + 1).product();
        let before: usize = self.degrees[..axis].iter().map(|&d| d + 1).product();
        for b in 0..before {
            for a in 0..after {
                if self.coeffs[(b * axis_len + level) * after + a].abs() > threshold {
                    return false;
                }
            }
        }
        true
    }

    /// Same polynomial with every coefficient multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> BasisPoly {
        BasisPoly {
            basis: self.basis,
            degrees: self.degrees.clone(),
            coeffs: self.coeffs.iter().map(|c| c * factor).collect(),
        }
    }
}

/// Row-major strides for a lexicographic multi-degree layout, last axis
/// fastest.
pub fn strides(degrees: &[usize]) -> Vec<usize> {
    let dim = degrees.len();
    let mut out = vec![1; dim];
    for axis in (0..dim.saturating_sub(1)).rev() {
        out[axis] = out[axis + 1] * (degrees[axis + 1] + 1);
    }
    out
}

/// Decode a flat index into its multi-index for the given degree vector.
pub fn decode(mut flat: usize, degrees: &[usize]) -> Vec<usize> {
    let mut multi = vec![0; degrees.len()];
    for axis in (0..degrees.len()).rev() {
        let len = degrees[axis] + 1;
        multi[axis] = flat % len;
        flat /= len;
    }
    multi
}
