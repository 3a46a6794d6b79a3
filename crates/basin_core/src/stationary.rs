use crate::error::SolverError;
use crate::poly::BasisPoly;
use crate::surrogate::Surrogate;
use nalgebra::{Complex, DMatrix, DVector};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use tracing::{debug, info};

/// Step growth applied after an accepted continuation step.
const STEP_GROWTH: f64 = 1.5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrackerSettings {
    /// Seed for the start system's random phases; fixes the whole solve.
    pub seed: u64,
    pub initial_step: f64,
    pub min_step: f64,
    pub max_step: f64,
    pub corrector_steps: usize,
    pub corrector_tolerance: f64,
    /// Residual ceiling for the polished endpoint at `t = 1`.
    pub endpoint_tolerance: f64,
    /// Paths whose iterates exceed this modulus are counted as diverged
    /// (solutions at infinity), not failed.
    pub divergence_threshold: f64,
    /// Maximum imaginary part for an endpoint to count as real.
    pub real_tolerance: f64,
    /// Box expansion (unit coordinates) for the in-domain filter.
    pub domain_slack: f64,
    /// Relative smallest-singular-value floor for endpoint Jacobians.
    pub singular_threshold: f64,
    /// Relative threshold for trimming gradient coefficient tensors.
    pub trim_tolerance: f64,
    pub max_steps_per_path: usize,
    /// Resource cap on the Bezout path count.
    pub max_paths: u64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            seed: 7,
            initial_step: 0.05,
            min_step: 1e-7,
            max_step: 0.2,
            corrector_steps: 6,
            corrector_tolerance: 1e-10,
            endpoint_tolerance: 1e-8,
            divergence_threshold: 1e7,
            real_tolerance: 1e-8,
            domain_slack: 1e-6,
            singular_threshold: 1e-8,
            trim_tolerance: 1e-12,
            max_steps_per_path: 10_000,
            max_paths: 100_000,
        }
    }
}

/// Path-tracking bookkeeping, reported verbatim whether the solve
/// succeeds or fails. `tracked = converged + diverged + failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStats {
    pub tracked: usize,
    pub converged: usize,
    pub diverged: usize,
    pub failed: usize,
    pub singular: usize,
    pub filtered_complex: usize,
    pub filtered_outside: usize,
}

impl fmt::Display for PathStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tracked, {} converged, {} diverged, {} failed, {} singular, {} complex, {} outside box",
            self.tracked,
            self.converged,
            self.diverged,
            self.failed,
            self.singular,
            self.filtered_complex,
            self.filtered_outside
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateOrigin {
    /// Endpoint of a tracked continuation path.
    PathTracking,
    /// Synthesized center point of a constant surrogate.
    DegenerateCenter,
}

/// Real, in-domain stationary point of the surrogate, in surrogate (unit)
/// coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidatePoint {
    pub coords: Vec<f64>,
    pub value: f64,
    pub path_index: usize,
    pub origin: CandidateOrigin,
}

enum PathOutcome {
    Converged(DVector<Complex<f64>>),
    Diverged,
    Failed,
}

/// The homotopy `H(x, t) = (1 - t) gamma G(x) + t F(x)` between the
/// total-degree start system `G_i(x) = x_i^{D_i} - r_i` and the normalized
/// gradient system `F` of the surrogate, restricted to the axes the
/// surrogate actually depends on.
struct HomotopySystem {
    dim: usize,
    active: Vec<usize>,
    targets: Vec<BasisPoly>,
    jacobians: Vec<Vec<Option<BasisPoly>>>,
    degrees: Vec<usize>,
    start_phases: Vec<Complex<f64>>,
    gamma: Complex<f64>,
}

impl HomotopySystem {
    fn unknowns(&self) -> usize {
        self.active.len()
    }

    fn full_point(&self, z: &DVector<Complex<f64>>) -> Vec<Complex<f64>> {
        let mut point = vec![Complex::new(0.0, 0.0); self.dim];
        for (slot, &axis) in self.active.iter().enumerate() {
            point[axis] = z[slot];
        }
        point
    }

    fn eval_target(&self, z: &DVector<Complex<f64>>) -> DVector<Complex<f64>> {
        let point = self.full_point(z);
        DVector::from_iterator(
            self.unknowns(),
            self.targets.iter().map(|poly| poly.eval(&point)),
        )
    }

    fn target_jacobian(&self, z: &DVector<Complex<f64>>) -> DMatrix<Complex<f64>> {
        let point = self.full_point(z);
        DMatrix::from_fn(self.unknowns(), self.unknowns(), |i, j| {
            match &self.jacobians[i][j] {
                Some(poly) => poly.eval(&point),
                None => Complex::new(0.0, 0.0),
            }
        })
    }

    /// Real Jacobian of the target system at a real point, for the
    /// singular-endpoint filter.
    fn target_jacobian_real(&self, point: &[f64]) -> DMatrix<f64> {
        DMatrix::from_fn(self.unknowns(), self.unknowns(), |i, j| {
            match &self.jacobians[i][j] {
                Some(poly) => poly.eval(point),
                None => 0.0,
            }
        })
    }

    fn eval_start(&self, z: &DVector<Complex<f64>>) -> DVector<Complex<f64>> {
        DVector::from_iterator(
            self.unknowns(),
            (0..self.unknowns()).map(|i| z[i].powu(self.degrees[i] as u32) - self.start_phases[i]),
        )
    }

    fn start_jacobian_diag(&self, z: &DVector<Complex<f64>>) -> Vec<Complex<f64>> {
        (0..self.unknowns())
            .map(|i| {
                let d = self.degrees[i] as f64;
                z[i].powu(self.degrees[i] as u32 - 1) * Complex::new(d, 0.0)
            })
            .collect()
    }

    fn homotopy(&self, z: &DVector<Complex<f64>>, t: f64) -> DVector<Complex<f64>> {
        let start = self.eval_start(z);
        let target = self.eval_target(z);
        let blend = self.gamma * Complex::new(1.0 - t, 0.0);
        DVector::from_iterator(
            self.unknowns(),
            (0..self.unknowns()).map(|i| start[i] * blend + target[i] * Complex::new(t, 0.0)),
        )
    }

    fn homotopy_jacobian(&self, z: &DVector<Complex<f64>>, t: f64) -> DMatrix<Complex<f64>> {
        let mut jac = self.target_jacobian(z).map(|v| v * Complex::new(t, 0.0));
        let diag = self.start_jacobian_diag(z);
        let blend = self.gamma * Complex::new(1.0 - t, 0.0);
        for (i, value) in diag.into_iter().enumerate() {
            jac[(i, i)] += value * blend;
        }
        jac
    }

    /// `dH/dt = F(x) - gamma G(x)`.
    fn homotopy_dt(&self, z: &DVector<Complex<f64>>) -> DVector<Complex<f64>> {
        let start = self.eval_start(z);
        let target = self.eval_target(z);
        DVector::from_iterator(
            self.unknowns(),
            (0..self.unknowns()).map(|i| target[i] - start[i] * self.gamma),
        )
    }
}

/// Find all real, non-singular, in-domain stationary points of the
/// surrogate by total-degree homotopy continuation. Deterministic for a
/// fixed `settings.seed`.
pub fn solve_stationary(
    surrogate: &Surrogate,
    settings: &TrackerSettings,
) -> Result<(Vec<CandidatePoint>, PathStats), SolverError> {
    let dim = surrogate.poly.dim();
    let mut active: Vec<usize> = (0..dim)
        .filter(|&axis| surrogate.poly.degrees[axis] >= 1)
        .collect();

    let mut gradients = Vec::with_capacity(active.len());
    let mut constant_gradient = false;
    for &axis in &active {
        let gradient = surrogate.poly.diff_axis(axis).trim(settings.trim_tolerance);
        if gradient.total_degree() == 0 {
            if gradient.coeffs[0] == 0.0 {
                // The surrogate does not actually vary along this axis.
                continue;
            }
            constant_gradient = true;
            break;
        }
        gradients.push((axis, gradient));
    }
    if constant_gradient {
        // A nonzero constant partial derivative has no roots at all.
        return Err(SolverError::NoCandidates {
            stats: PathStats::default(),
        });
    }
    active = gradients.iter().map(|(axis, _)| *axis).collect();

    if active.is_empty() {
        let coords = vec![0.0; dim];
        let value = surrogate.poly.eval(&coords);
        debug!("constant surrogate, emitting the domain center");
        return Ok((
            vec![CandidatePoint {
                coords,
                value,
                path_index: 0,
                origin: CandidateOrigin::DegenerateCenter,
            }],
            PathStats::default(),
        ));
    }

    let degrees: Vec<usize> = gradients
        .iter()
        .map(|(_, poly)| poly.total_degree())
        .collect();
    let mut required: u128 = 1;
    for &d in &degrees {
        required = required.saturating_mul(d as u128);
    }
    if required > settings.max_paths as u128 {
        return Err(SolverError::PathBudgetExceeded {
            required,
            budget: settings.max_paths as u128,
        });
    }
    let total_paths = required as usize;

    let targets: Vec<BasisPoly> = gradients
        .iter()
        .map(|(_, poly)| poly.scaled(1.0 / poly.max_abs_coeff()))
        .collect();
    let jacobians: Vec<Vec<Option<BasisPoly>>> = targets
        .iter()
        .map(|poly| {
            active
                .iter()
                .map(|&axis| {
                    if poly.degrees[axis] >= 1 {
                        Some(poly.diff_axis(axis))
                    } else {
                        None
                    }
                })
                .collect()
        })
        .collect();

    let mut rng = StdRng::seed_from_u64(settings.seed);
    let gamma = unit_complex(&mut rng);
    let start_phases: Vec<Complex<f64>> = (0..active.len())
        .map(|_| unit_complex(&mut rng))
        .collect();
    let system = HomotopySystem {
        dim,
        active,
        targets,
        jacobians,
        degrees,
        start_phases,
        gamma,
    };

    let mut stats = PathStats {
        tracked: total_paths,
        ..PathStats::default()
    };
    let mut candidates = Vec::new();
    for path_index in 0..total_paths {
        let start = start_root(&system, path_index);
        match track_path(&system, start, settings) {
            PathOutcome::Failed => stats.failed += 1,
            PathOutcome::Diverged => stats.diverged += 1,
            PathOutcome::Converged(endpoint) => {
                stats.converged += 1;
                if endpoint.iter().any(|v| v.im.abs() > settings.real_tolerance) {
                    stats.filtered_complex += 1;
                    continue;
                }
                let mut coords = vec![0.0; dim];
                for (slot, &axis) in system.active.iter().enumerate() {
                    coords[axis] = endpoint[slot].re;
                }
                if coords.iter().any(|c| c.abs() > 1.0 + settings.domain_slack) {
                    stats.filtered_outside += 1;
                    continue;
                }
                let jacobian = system.target_jacobian_real(&coords);
                let singular_values = jacobian.svd(false, false).singular_values;
                let sigma_max = singular_values.iter().cloned().fold(0.0, f64::max);
                let sigma_min = singular_values
                    .iter()
                    .cloned()
                    .fold(f64::INFINITY, f64::min);
                if sigma_min <= settings.singular_threshold * sigma_max.max(1.0) {
                    stats.singular += 1;
                    continue;
                }
                let value = surrogate.poly.eval(&coords);
                candidates.push(CandidatePoint {
                    coords,
                    value,
                    path_index,
                    origin: CandidateOrigin::PathTracking,
                });
            }
        }
    }

    info!(
        tracked = stats.tracked,
        converged = stats.converged,
        candidates = candidates.len(),
        "path tracking complete"
    );
    if stats.failed == stats.tracked {
        return Err(SolverError::TrackingFailed { stats });
    }
    if candidates.is_empty() {
        return Err(SolverError::NoCandidates { stats });
    }
    Ok((candidates, stats))
}

fn unit_complex(rng: &mut StdRng) -> Complex<f64> {
    let angle = rng.gen::<f64>() * 2.0 * PI;
    Complex::from_polar(1.0, angle)
}

/// The `path_index`-th start solution: per unknown, one of the `D_i`-th
/// roots of the random phase `r_i`, enumerated in mixed radix.
fn start_root(system: &HomotopySystem, path_index: usize) -> DVector<Complex<f64>> {
    let mut rem = path_index;
    let mut root = Vec::with_capacity(system.unknowns());
    for i in 0..system.unknowns() {
        let d = system.degrees[i];
        let k = rem % d;
        rem /= d;
        let angle = (system.start_phases[i].arg() + 2.0 * PI * k as f64) / d as f64;
        root.push(Complex::from_polar(1.0, angle));
    }
    DVector::from_vec(root)
}

fn track_path(
    system: &HomotopySystem,
    start: DVector<Complex<f64>>,
    settings: &TrackerSettings,
) -> PathOutcome {
    let mut x = start;
    let mut t = 0.0;
    let mut dt = settings.initial_step;
    let mut steps = 0usize;

    while t < 1.0 {
        if steps >= settings.max_steps_per_path {
            return PathOutcome::Failed;
        }
        steps += 1;
        let t_next = (t + dt).min(1.0);

        // Euler predictor along the path tangent.
        let predicted = match system.homotopy_jacobian(&x, t).lu().solve(&system.homotopy_dt(&x)) {
            Some(delta) => &x - delta.map(|v| v * Complex::new(t_next - t, 0.0)),
            None => {
                dt *= 0.5;
                if dt < settings.min_step {
                    return PathOutcome::Failed;
                }
                continue;
            }
        };

        // Newton corrector at the new parameter value.
        let mut y = predicted;
        let mut corrected = false;
        for _ in 0..settings.corrector_steps {
            let residual = system.homotopy(&y, t_next);
            if residual.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
                break;
            }
            if residual.norm() <= settings.corrector_tolerance {
                corrected = true;
                break;
            }
            match system.homotopy_jacobian(&y, t_next).lu().solve(&residual) {
                Some(delta) => y -= delta,
                None => break,
            }
        }
        if !corrected
            && y.iter().all(|v| v.re.is_finite() && v.im.is_finite())
            && system.homotopy(&y, t_next).norm() <= settings.corrector_tolerance
        {
            corrected = true;
        }
        if !corrected {
            dt *= 0.5;
            if dt < settings.min_step {
                return PathOutcome::Failed;
            }
            continue;
        }

        if y.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
            return PathOutcome::Diverged;
        }
        let magnitude = y.iter().map(|v| v.norm()).fold(0.0, f64::max);
        if magnitude > settings.divergence_threshold {
            return PathOutcome::Diverged;
        }

        x = y;
        t = t_next;
        dt = (dt * STEP_GROWTH).min(settings.max_step);
    }

    // Endpoint polish against the target system alone.
    for _ in 0..settings.corrector_steps * 2 {
        let residual = system.eval_target(&x);
        if residual.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
            return PathOutcome::Failed;
        }
        if residual.norm() <= settings.endpoint_tolerance {
            return PathOutcome::Converged(x);
        }
        match system.target_jacobian(&x).lu().solve(&residual) {
            Some(delta) => x -= delta,
            None => return PathOutcome::Failed,
        }
    }
    if system.eval_target(&x).norm() <= settings.endpoint_tolerance {
        return PathOutcome::Converged(x);
    }
    PathOutcome::Failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::Basis;
    use crate::domain::{DomainSpec, HalfWidth};
    use crate::surrogate::{construct, ConstructionSettings, Precision};
    use approx::assert_relative_eq;

    fn unit_spec(gn: usize) -> DomainSpec {
        DomainSpec {
            dim: 2,
            center: vec![0.0, 0.0],
            half_width: HalfWidth::Uniform(1.0),
            tolerance: 1e-8,
            grid_resolution: gn,
        }
    }

    fn build_surrogate(
        f: impl Fn(&[f64]) -> f64,
        gn: usize,
        degrees: &[usize],
    ) -> crate::surrogate::Surrogate {
        construct(
            &f,
            &unit_spec(gn),
            degrees,
            Basis::Chebyshev,
            Precision::Float,
            &ConstructionSettings::default(),
        )
        .expect("construction")
    }

    #[test]
    fn sphere_surrogate_has_one_stationary_point_at_origin() {
        let surrogate = build_surrogate(|x| x[0] * x[0] + x[1] * x[1], 10, &[4, 4]);
        let (candidates, stats) =
            solve_stationary(&surrogate, &TrackerSettings::default()).expect("solve");
        assert_eq!(stats.tracked, 1);
        assert_eq!(stats.converged, 1);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].coords.iter().all(|c| c.abs() < 1e-7));
        assert_eq!(candidates[0].origin, CandidateOrigin::PathTracking);
    }

    #[test]
    fn double_well_yields_three_stationary_points() {
        let f = |x: &[f64]| {
            let w = x[0] * x[0] - 0.25;
            w * w + x[1] * x[1]
        };
        let surrogate = build_surrogate(f, 8, &[4, 2]);
        let (candidates, stats) =
            solve_stationary(&surrogate, &TrackerSettings::default()).expect("solve");
        assert_eq!(stats.tracked, 3);
        assert_eq!(stats.converged + stats.diverged + stats.failed, stats.tracked);
        assert_eq!(candidates.len(), 3);
        let mut xs: Vec<f64> = candidates.iter().map(|c| c.coords[0]).collect();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_relative_eq!(xs[0], -0.5, epsilon = 1e-6);
        assert_relative_eq!(xs[1], 0.0, epsilon = 1e-6);
        assert_relative_eq!(xs[2], 0.5, epsilon = 1e-6);
        for candidate in &candidates {
            assert!(candidate.coords[1].abs() < 1e-6);
        }
    }

    #[test]
    fn linear_surrogate_has_no_candidates() {
        let surrogate = build_surrogate(|x| 2.0 * x[0] + 3.0 * x[1], 4, &[1, 1]);
        let err = solve_stationary(&surrogate, &TrackerSettings::default()).unwrap_err();
        assert!(matches!(err, SolverError::NoCandidates { .. }));
    }

    #[test]
    fn constant_surrogate_emits_the_center() {
        let surrogate = build_surrogate(|_| 3.5, 4, &[0, 0]);
        let (candidates, stats) =
            solve_stationary(&surrogate, &TrackerSettings::default()).expect("solve");
        assert_eq!(stats, PathStats::default());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].origin, CandidateOrigin::DegenerateCenter);
        assert_eq!(candidates[0].coords, vec![0.0, 0.0]);
        assert_relative_eq!(candidates[0].value, 3.5, epsilon = 1e-9);
    }

    #[test]
    fn path_budget_is_enforced() {
        let surrogate = build_surrogate(|x| x[0] * x[0] * x[1] * x[1], 8, &[2, 2]);
        let settings = TrackerSettings {
            max_paths: 1,
            ..TrackerSettings::default()
        };
        let err = solve_stationary(&surrogate, &settings).unwrap_err();
        assert!(matches!(err, SolverError::PathBudgetExceeded { .. }));
    }

    #[test]
    fn solves_are_deterministic_for_a_fixed_seed() {
        let f = |x: &[f64]| {
            let w = x[0] * x[0] - 0.25;
            w * w + x[1] * x[1]
        };
        let surrogate = build_surrogate(f, 8, &[4, 2]);
        let settings = TrackerSettings::default();
        let (first, _) = solve_stationary(&surrogate, &settings).expect("solve");
        let (second, _) = solve_stationary(&surrogate, &settings).expect("solve");
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.coords, b.coords);
            assert_eq!(a.path_index, b.path_index);
        }
    }
}
