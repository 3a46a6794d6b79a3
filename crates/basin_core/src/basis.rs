use crate::traits::PolyScalar;
use nalgebra::{DMatrix, SymmetricEigen};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Polynomial basis family used for surrogate construction.
///
/// The set is closed: every consumer dispatches with a `match`, and adding a
/// family means extending the enum, not implementing a trait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Basis {
    Chebyshev,
    Legendre,
    Monomial,
}

impl Basis {
    /// `gn + 1` one-dimensional sampling nodes on `[-1, 1]`.
    ///
    /// Chebyshev nodes are the roots of `T_{gn+1}`; Legendre nodes are the
    /// Gauss-Legendre abscissae; the monomial basis samples uniformly.
    /// `gn = 0` always yields the single node `0.0`.
    pub fn nodes_1d(self, gn: usize) -> Vec<f64> {
        if gn == 0 {
            return vec![0.0];
        }
        match self {
            Basis::Chebyshev => {
                let count = gn + 1;
                (0..count)
                    .map(|i| ((2 * i + 1) as f64 * PI / (2 * count) as f64).cos())
                    .collect()
            }
            Basis::Legendre => gauss_legendre(gn).0,
            Basis::Monomial => {
                let count = gn + 1;
                (0..count)
                    .map(|i| -1.0 + 2.0 * i as f64 / gn as f64)
                    .collect()
            }
        }
    }

    /// Quadrature weights paired with [`Basis::nodes_1d`], used to certify
    /// the surrogate residual in the basis-implied L2 measure.
    pub fn quadrature_weights_1d(self, gn: usize) -> Vec<f64> {
        if gn == 0 {
            return vec![2.0];
        }
        match self {
            Basis::Chebyshev => vec![PI / (gn + 1) as f64; gn + 1],
            Basis::Legendre => gauss_legendre(gn).1,
            Basis::Monomial => vec![2.0 / (gn + 1) as f64; gn + 1],
        }
    }

    /// Values of the first `count` basis functions at `x`, by the
    /// three-term recurrence of the family.
    pub fn eval_1d<T: PolyScalar>(self, count: usize, x: T) -> Vec<T> {
        let mut values = Vec::with_capacity(count);
        if count == 0 {
            return values;
        }
        values.push(T::one());
        if count == 1 {
            return values;
        }
        values.push(x);
        match self {
            Basis::Chebyshev => {
                for k in 2..count {
                    let next = x * values[k - 1].scale(2.0) - values[k - 2];
                    values.push(next);
                }
            }
            Basis::Legendre => {
                for k in 2..count {
                    let km1 = (k - 1) as f64;
                    let next = (x * values[k - 1]).scale((2.0 * km1 + 1.0) / (km1 + 1.0))
                        - values[k - 2].scale(km1 / (km1 + 1.0));
                    values.push(next);
                }
            }
            Basis::Monomial => {
                for k in 2..count {
                    let next = x * values[k - 1];
                    values.push(next);
                }
            }
        }
        values
    }

    /// Coefficients of the derivative of a 1-D series expressed in the same
    /// basis. Input degree `n` yields output degree `n - 1`; callers must
    /// not pass a constant series.
    pub fn differentiate_series(self, coeffs: &[f64]) -> Vec<f64> {
        let n = coeffs.len();
        debug_assert!(n >= 2, "cannot differentiate a constant series");
        match self {
            Basis::Chebyshev => {
                // b_{k-1} = b_{k+1} + 2k c_k, then halve b_0.
                let mut b = vec![0.0; n + 1];
                for k in (1..n).rev() {
                    b[k - 1] = b[k + 1] + 2.0 * k as f64 * coeffs[k];
                }
                b[0] *= 0.5;
                b.truncate(n - 1);
                b
            }
            Basis::Legendre => {
                // b_j = (2j+1) (c_{j+1} + c_{j+3} + ...).
                let mut out = vec![0.0; n - 1];
                let mut tail = vec![0.0; n + 1];
                for j in (0..n - 1).rev() {
                    tail[j] = coeffs[j + 1] + tail[j + 2];
                    out[j] = (2 * j + 1) as f64 * tail[j];
                }
                out
            }
            Basis::Monomial => (1..n).map(|k| k as f64 * coeffs[k]).collect(),
        }
    }
}

/// Gauss-Legendre nodes and weights by the Golub-Welsch eigendecomposition
/// of the Jacobi matrix.
fn gauss_legendre(gn: usize) -> (Vec<f64>, Vec<f64>) {
    let n = gn + 1;
    let jacobi = DMatrix::from_fn(n, n, |i, j| {
        if j == i + 1 {
            let k = (i + 1) as f64;
            k / (4.0 * k * k - 1.0).sqrt()
        } else if i == j + 1 {
            let k = (j + 1) as f64;
            k / (4.0 * k * k - 1.0).sqrt()
        } else {
            0.0
        }
    });
    let eigen = SymmetricEigen::new(jacobi);
    let mut pairs: Vec<(f64, f64)> = (0..n)
        .map(|i| {
            let node = eigen.eigenvalues[i];
            let first = eigen.eigenvectors[(0, i)];
            (node, 2.0 * first * first)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    pairs.into_iter().unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn chebyshev_nodes_are_roots_of_next_polynomial() {
        let gn = 6;
        let nodes = Basis::Chebyshev.nodes_1d(gn);
        assert_eq!(nodes.len(), gn + 1);
        for &x in &nodes {
            let values = Basis::Chebyshev.eval_1d::<f64>(gn + 2, x);
            assert!(values[gn + 1].abs() < 1e-12);
        }
    }

    #[test]
    fn gauss_legendre_low_orders_match_closed_forms() {
        let (nodes, weights) = gauss_legendre(1);
        assert_relative_eq!(nodes[0], -(1.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(nodes[1], (1.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(weights[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(weights[1], 1.0, epsilon = 1e-12);

        let (nodes, weights) = gauss_legendre(2);
        assert_relative_eq!(nodes[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(nodes[2], (3.0f64 / 5.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(weights[1], 8.0 / 9.0, epsilon = 1e-12);
        assert_relative_eq!(weights[0], 5.0 / 9.0, epsilon = 1e-12);
    }

    #[test]
    fn quadrature_weights_integrate_constants() {
        for basis in [Basis::Chebyshev, Basis::Legendre, Basis::Monomial] {
            let weights = basis.quadrature_weights_1d(7);
            let total: f64 = weights.iter().sum();
            match basis {
                // Gauss-Chebyshev integrates against 1/sqrt(1-x^2).
                Basis::Chebyshev => assert_relative_eq!(total, PI, epsilon = 1e-12),
                _ => assert_relative_eq!(total, 2.0, epsilon = 1e-12),
            }
        }
    }

    #[test]
    fn degenerate_resolution_collapses_to_center() {
        for basis in [Basis::Chebyshev, Basis::Legendre, Basis::Monomial] {
            assert_eq!(basis.nodes_1d(0), vec![0.0]);
            assert_eq!(basis.quadrature_weights_1d(0).len(), 1);
        }
    }

    #[test]
    fn chebyshev_series_derivative_matches_known_expansion() {
        // d/dx T_3 = 12x^2 - 3 = 3 T_0 + 6 T_2.
        let derived = Basis::Chebyshev.differentiate_series(&[0.0, 0.0, 0.0, 1.0]);
        assert_eq!(derived.len(), 3);
        assert_relative_eq!(derived[0], 3.0, epsilon = 1e-12);
        assert_relative_eq!(derived[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(derived[2], 6.0, epsilon = 1e-12);
    }

    #[test]
    fn legendre_series_derivative_matches_known_expansion() {
        // d/dx P_3 = P_0 + 5 P_2.
        let derived = Basis::Legendre.differentiate_series(&[0.0, 0.0, 0.0, 1.0]);
        assert_eq!(derived.len(), 3);
        assert_relative_eq!(derived[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(derived[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(derived[2], 5.0, epsilon = 1e-12);
    }

    #[test]
    fn monomial_series_derivative_shifts_and_scales() {
        let derived = Basis::Monomial.differentiate_series(&[4.0, 3.0, 2.0, 1.0]);
        assert_eq!(derived, vec![3.0, 4.0, 3.0]);
    }

    #[test]
    fn series_derivative_agrees_with_finite_differences() {
        let coeffs = [0.4, -1.2, 0.7, 0.3, -0.05];
        let h = 1e-6;
        for basis in [Basis::Chebyshev, Basis::Legendre, Basis::Monomial] {
            let derived = basis.differentiate_series(&coeffs);
            for &x in &[-0.8, -0.1, 0.3, 0.9] {
                let eval = |pt: f64, c: &[f64]| -> f64 {
                    basis
                        .eval_1d::<f64>(c.len(), pt)
                        .iter()
                        .zip(c)
                        .map(|(v, c)| v * c)
                        .sum()
                };
                let fd = (eval(x + h, &coeffs) - eval(x - h, &coeffs)) / (2.0 * h);
                let exact = eval(x, &derived);
                assert_relative_eq!(fd, exact, epsilon = 1e-6, max_relative = 1e-6);
            }
        }
    }
}
