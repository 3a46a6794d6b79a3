use crate::basis::Basis;
use crate::domain::DomainSpec;
use crate::error::ConstructionError;
use crate::grid::{generate_grid, sample_objective, Grid};
use crate::poly::{decode, BasisPoly};
use nalgebra::linalg::SVD;
use nalgebra::{DMatrix, DVector};
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Arithmetic used for the coefficient solve. A closed variant, not a
/// runtime branch: exact mode removes elimination rounding for
/// reproducible downstream root-finding, float mode is the fast path for
/// high-dimensional or high-degree work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Precision {
    Float,
    Exact,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConstructionSettings {
    /// Condition-number ceiling for the assembly matrix.
    pub condition_limit: f64,
    /// Relative threshold below which trailing coefficient slices are
    /// dropped from the fitted polynomial.
    pub trim_tolerance: f64,
    /// Wall-clock budget per objective evaluation.
    pub eval_timeout: Option<Duration>,
    /// Byte budget the grid footprint is checked against before
    /// allocation.
    pub memory_budget_bytes: u64,
}

impl Default for ConstructionSettings {
    fn default() -> Self {
        Self {
            condition_limit: 1e12,
            trim_tolerance: 1e-12,
            eval_timeout: None,
            memory_budget_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

/// Polynomial surrogate of the objective over one query box, with the
/// diagnostics downstream stages branch on: the assembly condition number
/// and the certified residual norm `nrm`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Surrogate {
    pub poly: BasisPoly,
    pub precision: Precision,
    pub condition: f64,
    /// Quadrature-certified L2 norm of `f - surrogate` over the sampling
    /// grid. Reported, never enforced; the caller decides whether it is
    /// small enough to trust the root-finding stage.
    pub nrm: f64,
    pub spec: DomainSpec,
    #[serde(skip)]
    pub exact_coeffs: Option<Vec<BigRational>>,
}

impl Surrogate {
    pub fn eval_unit(&self, unit: &[f64]) -> f64 {
        self.poly.eval(unit)
    }

    pub fn eval_original(&self, original: &[f64]) -> f64 {
        self.poly.eval(&self.spec.to_unit(original))
    }

    pub fn effective_degrees(&self) -> &[usize] {
        &self.poly.degrees
    }
}

/// Build a surrogate for `f` over `spec`: sample the tensor grid, solve
/// the basis least-squares system, certify the residual.
pub fn construct<F>(
    f: &F,
    spec: &DomainSpec,
    degrees: &[usize],
    basis: Basis,
    precision: Precision,
    settings: &ConstructionSettings,
) -> Result<Surrogate, ConstructionError>
where
    F: Fn(&[f64]) -> f64,
{
    debug_assert_eq!(degrees.len(), spec.dim);
    let mut grid = generate_grid(spec, basis, settings.memory_budget_bytes)?;
    sample_objective(&mut grid, spec, f, settings.eval_timeout)?;

    let rows = grid.point_count();
    let cols = BasisPoly::coeff_len(degrees);
    if cols > rows {
        return Err(ConstructionError::SingularSystem { rows, cols });
    }

    let assembly = assemble_matrix(&grid, degrees, basis);
    let rhs = DVector::from_column_slice(&grid.values);

    let svd = SVD::new(assembly.clone(), true, true);
    let sigma_max = svd.singular_values.iter().cloned().fold(0.0, f64::max);
    let sigma_min = svd
        .singular_values
        .iter()
        .cloned()
        .fold(f64::INFINITY, f64::min);
    let rank_floor = sigma_max * f64::EPSILON * rows.max(cols) as f64;
    if !(sigma_min > rank_floor) {
        return Err(ConstructionError::SingularSystem { rows, cols });
    }
    let condition = sigma_max / sigma_min;
    if condition > settings.condition_limit {
        return Err(ConstructionError::IllConditioned {
            condition,
            limit: settings.condition_limit,
        });
    }

    let (coeffs, exact_coeffs) = match precision {
        Precision::Float => {
            let solution = svd
                .solve(&rhs, 0.0)
                .map_err(|_| ConstructionError::SingularSystem { rows, cols })?;
            (solution.iter().cloned().collect::<Vec<f64>>(), None)
        }
        Precision::Exact => {
            let normal = assembly.transpose() * &assembly;
            let projected = assembly.transpose() * &rhs;
            let (floats, rationals) = solve_exact(&normal, &projected)?;
            (floats, Some(rationals))
        }
    };

    let poly = BasisPoly::new(basis, degrees.to_vec(), coeffs).trim(settings.trim_tolerance);
    let nrm = certify_residual(&grid, &poly, basis, spec.grid_resolution);
    debug!(
        condition,
        nrm,
        effective_degrees = ?poly.degrees,
        "constructed surrogate"
    );

    Ok(Surrogate {
        poly,
        precision,
        condition,
        nrm,
        spec: spec.clone(),
        exact_coeffs,
    })
}

/// Basis-function values at every grid point, one row per point and one
/// column per multi-degree (same lexicographic order as the coefficient
/// tensor).
fn assemble_matrix(grid: &Grid, degrees: &[usize], basis: Basis) -> DMatrix<f64> {
    let rows = grid.point_count();
    let cols = BasisPoly::coeff_len(degrees);
    let mut data = Vec::with_capacity(rows * cols);
    for point in 0..rows {
        let unit = grid.unit_point(point);
        let tables: Vec<Vec<f64>> = (0..grid.dim)
            .map(|axis| basis.eval_1d(degrees[axis] + 1, unit[axis]))
            .collect();
        for col in 0..cols {
            let multi = decode(col, degrees);
            let mut product = 1.0;
            for (axis, &k) in multi.iter().enumerate() {
                product *= tables[axis][k];
            }
            data.push(product);
        }
    }
    DMatrix::from_row_slice(rows, cols, &data)
}

/// Discrete residual norm under the basis-implied tensor quadrature.
fn certify_residual(grid: &Grid, poly: &BasisPoly, basis: Basis, gn: usize) -> f64 {
    let axis_weights = basis.quadrature_weights_1d(gn);
    let mut total = 0.0;
    for point in 0..grid.point_count() {
        let unit = grid.unit_point(point);
        let residual = grid.values[point] - poly.eval(&unit);
        let mut weight = 1.0;
        let mut flat = point;
        for _ in 0..grid.dim {
            weight *= axis_weights[flat % axis_weights.len()];
            flat /= axis_weights.len();
        }
        total += weight * residual * residual;
    }
    total.sqrt()
}

/// Exact Gaussian elimination on the normal equations. Entries are `f64`
/// (hence dyadic rationals), so the conversion is lossless and the
/// elimination itself introduces no rounding.
fn solve_exact(
    normal: &DMatrix<f64>,
    projected: &DVector<f64>,
) -> Result<(Vec<f64>, Vec<BigRational>), ConstructionError> {
    let n = projected.len();
    let to_rational = |value: f64| {
        BigRational::from_float(value).ok_or_else(|| ConstructionError::ExactSolveFailed {
            reason: format!("non-finite entry {value} in normal equations"),
        })
    };
    let mut rows: Vec<Vec<BigRational>> = Vec::with_capacity(n);
    for i in 0..n {
        let mut row = Vec::with_capacity(n + 1);
        for j in 0..n {
            row.push(to_rational(normal[(i, j)])?);
        }
        row.push(to_rational(projected[i])?);
        rows.push(row);
    }

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&a, &b| rows[a][col].abs().cmp(&rows[b][col].abs()))
            .unwrap_or(col);
        if rows[pivot_row][col].is_zero() {
            return Err(ConstructionError::ExactSolveFailed {
                reason: "zero pivot in normal equations".to_string(),
            });
        }
        rows.swap(col, pivot_row);
        let pivot = rows[col].clone();
        for row in rows.iter_mut().skip(col + 1) {
            if row[col].is_zero() {
                continue;
            }
            let factor = &row[col] / &pivot[col];
            for j in col..=n {
                let delta = &factor * &pivot[j];
                row[j] = &row[j] - &delta;
            }
        }
    }

    let mut solution = vec![BigRational::zero(); n];
    for i in (0..n).rev() {
        let mut acc = rows[i][n].clone();
        for j in i + 1..n {
            let term = &rows[i][j] * &solution[j];
            acc = &acc - &term;
        }
        solution[i] = &acc / &rows[i][i];
    }

    let mut floats = Vec::with_capacity(n);
    for value in &solution {
        floats.push(
            value
                .to_f64()
                .ok_or_else(|| ConstructionError::ExactSolveFailed {
                    reason: "exact coefficient does not fit in f64".to_string(),
                })?,
        );
    }
    Ok((floats, solution))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HalfWidth;
    use approx::assert_relative_eq;

    fn unit_spec(dim: usize, gn: usize) -> DomainSpec {
        DomainSpec {
            dim,
            center: vec![0.0; dim],
            half_width: HalfWidth::Uniform(1.0),
            tolerance: 1e-8,
            grid_resolution: gn,
        }
    }

    #[test]
    fn polynomial_objectives_are_reproduced_at_grid_nodes() {
        let spec = unit_spec(2, 4);
        let f = |x: &[f64]| x[0] * x[0] * x[1] * x[1] + x[0];
        let surrogate = construct(
            &f,
            &spec,
            &[2, 2],
            Basis::Chebyshev,
            Precision::Float,
            &ConstructionSettings::default(),
        )
        .expect("construction");
        assert!(surrogate.nrm < 1e-12, "nrm = {}", surrogate.nrm);
        assert!(surrogate.condition >= 1.0);

        // Round-trip: grid samples are reproduced within the certificate.
        let nodes = Basis::Chebyshev.nodes_1d(4);
        for &x in &nodes {
            for &y in &nodes {
                let sampled = f(&[x, y]);
                let predicted = surrogate.eval_unit(&[x, y]);
                assert!((sampled - predicted).abs() <= surrogate.nrm + 1e-10);
            }
        }
    }

    #[test]
    fn underdetermined_systems_are_rejected() {
        let spec = unit_spec(2, 1);
        let f = |x: &[f64]| x[0];
        let err = construct(
            &f,
            &spec,
            &[2, 2],
            Basis::Chebyshev,
            Precision::Float,
            &ConstructionSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConstructionError::SingularSystem { .. }));
    }

    #[test]
    fn residual_norm_is_monotone_in_degree() {
        // Chebyshev quadrature weights are uniform, so least squares
        // minimizes the reported norm and nested degree sets can only
        // shrink it.
        let spec = unit_spec(2, 8);
        let f = |x: &[f64]| x[0].exp() * x[1].cos();
        let mut previous = f64::INFINITY;
        for degree in [2usize, 3, 4, 5] {
            let surrogate = construct(
                &f,
                &spec,
                &[degree, degree],
                Basis::Chebyshev,
                Precision::Float,
                &ConstructionSettings::default(),
            )
            .expect("construction");
            assert!(
                surrogate.nrm <= previous + 1e-9,
                "nrm increased at degree {degree}: {} > {}",
                surrogate.nrm,
                previous
            );
            previous = surrogate.nrm;
        }
    }

    #[test]
    fn exact_mode_matches_float_mode_on_smooth_data() {
        let spec = unit_spec(2, 3);
        let f = |x: &[f64]| 1.0 + 2.0 * x[0] - x[1] + 0.5 * x[0] * x[1];
        let float = construct(
            &f,
            &spec,
            &[2, 2],
            Basis::Chebyshev,
            Precision::Float,
            &ConstructionSettings::default(),
        )
        .expect("float construction");
        let exact = construct(
            &f,
            &spec,
            &[2, 2],
            Basis::Chebyshev,
            Precision::Exact,
            &ConstructionSettings::default(),
        )
        .expect("exact construction");
        assert!(exact.exact_coeffs.is_some());
        for &(x, y) in &[(0.2, -0.3), (0.9, 0.9), (-1.0, 0.5)] {
            assert_relative_eq!(
                float.eval_unit(&[x, y]),
                exact.eval_unit(&[x, y]),
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn requested_degree_collapses_to_effective_degree() {
        let spec = unit_spec(2, 8);
        let f = |x: &[f64]| x[0] * x[0] + x[1] * x[1];
        let surrogate = construct(
            &f,
            &spec,
            &[4, 4],
            Basis::Chebyshev,
            Precision::Float,
            &ConstructionSettings::default(),
        )
        .expect("construction");
        assert_eq!(surrogate.effective_degrees(), &[2, 2]);
    }

    #[test]
    fn legendre_basis_approximates_smooth_objectives() {
        let spec = unit_spec(2, 10);
        let f = |x: &[f64]| (x[0] + x[1]).exp();
        let surrogate = construct(
            &f,
            &spec,
            &[6, 6],
            Basis::Legendre,
            Precision::Float,
            &ConstructionSettings::default(),
        )
        .expect("construction");
        assert!(surrogate.nrm < 1e-4, "nrm = {}", surrogate.nrm);
        assert_relative_eq!(
            surrogate.eval_unit(&[0.3, -0.2]),
            f(&[0.3, -0.2]),
            epsilon = 1e-4,
            max_relative = 1e-4
        );
    }

    #[test]
    fn degenerate_resolution_yields_constant_surrogate() {
        let spec = unit_spec(2, 0);
        let f = |_: &[f64]| 3.5;
        let surrogate = construct(
            &f,
            &spec,
            &[0, 0],
            Basis::Chebyshev,
            Precision::Float,
            &ConstructionSettings::default(),
        )
        .expect("construction");
        assert_eq!(surrogate.effective_degrees(), &[0, 0]);
        assert_relative_eq!(surrogate.eval_unit(&[0.0, 0.0]), 3.5, epsilon = 1e-12);
        assert!(surrogate.nrm < 1e-12);
    }
}
