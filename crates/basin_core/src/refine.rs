use crate::domain::DomainSpec;
use crate::stationary::CandidatePoint;
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefineMethod {
    /// Derivative-free simplex search. The default: the objective may be a
    /// stiff ODE residual whose automatic derivatives are unreliable.
    NelderMead,
    /// Quasi-Newton with finite-difference gradients, for smooth cheap
    /// objectives.
    Bfgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefineObjective {
    /// Minimize the squared finite-difference gradient norm. Refines
    /// minima, maxima and saddles alike toward the stationary point.
    GradientNorm,
    /// Minimize the function value directly; only meaningful when hunting
    /// minima.
    FunctionValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Minimum,
    Maximum,
    Saddle,
    /// Near-singular Hessian; deliberately not forced into the other
    /// three.
    Indefinite,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RefineSettings {
    pub method: RefineMethod,
    pub objective: RefineObjective,
    /// Absolute function-value spread below which the search has
    /// converged.
    pub f_abs_tolerance: f64,
    /// Absolute parameter spread below which the search has converged.
    pub x_abs_tolerance: f64,
    /// Gradient norm target for the quasi-Newton method.
    pub gradient_tolerance: f64,
    pub max_steps: usize,
    /// Relative step for finite-difference gradients.
    pub fd_step: f64,
    /// Relative step for the classification Hessian.
    pub hessian_step: f64,
    /// Eigenvalues within this fraction of the largest magnitude count as
    /// numerically zero and classify the point as indefinite.
    pub singular_band: f64,
    /// Euclidean merge radius for deduplication.
    pub dedup_tolerance: f64,
    /// Radius within which candidate and refined point count as the same
    /// location.
    pub close_tolerance: f64,
    /// Radius within which a refined point captures a known reference
    /// point. Deliberately distinct from `close_tolerance`.
    pub captured_tolerance: f64,
    /// Box expansion (unit coordinates) for the in-domain flag.
    pub domain_slack: f64,
    /// Initial simplex edge as a fraction of the axis half-width.
    pub initial_scale: f64,
}

impl Default for RefineSettings {
    fn default() -> Self {
        Self {
            method: RefineMethod::NelderMead,
            objective: RefineObjective::GradientNorm,
            f_abs_tolerance: 1e-12,
            x_abs_tolerance: 1e-9,
            gradient_tolerance: 1e-8,
            max_steps: 400,
            fd_step: 1e-5,
            hessian_step: 1e-4,
            singular_band: 1e-6,
            dedup_tolerance: 1e-6,
            close_tolerance: 1e-4,
            captured_tolerance: 1e-4,
            domain_slack: 1e-6,
            initial_scale: 0.05,
        }
    }
}

/// Terminal artifact of the pipeline: one refined, classified critical
/// point in original coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalPointRecord {
    /// Candidate location, original coordinates.
    pub x: Vec<f64>,
    /// Function value at the refined point.
    pub z: f64,
    /// Refined location, original coordinates.
    pub y: Vec<f64>,
    pub steps: usize,
    pub converged: bool,
    pub classification: Classification,
    /// Refined point matches one of the supplied reference points.
    pub captured: bool,
    /// Candidate and refined point coincide.
    pub close: bool,
    /// Refined point lies within the domain box plus slack.
    pub in_domain: bool,
}

/// Refine every candidate against the true objective, classify by Hessian
/// eigenvalue signs, and merge duplicates. Per-candidate non-convergence
/// is a flag on the record, never an error: one stubborn candidate must
/// not discard the batch.
pub fn refine_and_classify<F>(
    candidates: &[CandidatePoint],
    f: &F,
    spec: &DomainSpec,
    settings: &RefineSettings,
    known_points: &[Vec<f64>],
) -> Vec<CriticalPointRecord>
where
    F: Fn(&[f64]) -> f64,
{
    let objective = |x: &[f64]| -> f64 {
        match settings.objective {
            RefineObjective::FunctionValue => f(x),
            RefineObjective::GradientNorm => fd_gradient(f, x, settings.fd_step)
                .iter()
                .map(|g| g * g)
                .sum(),
        }
    };

    let mut records = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let start = spec.to_original(&candidate.coords);
        let scales: Vec<f64> = (0..spec.dim)
            .map(|axis| settings.initial_scale * spec.axis_half_width(axis))
            .collect();
        let (refined, steps, converged) = match settings.method {
            RefineMethod::NelderMead => nelder_mead(&objective, &start, &scales, settings),
            RefineMethod::Bfgs => bfgs(&objective, &start, settings),
        };

        let hessian = fd_hessian(f, &refined, settings.hessian_step);
        let classification = classify_hessian(&hessian, settings.singular_band);
        let close = euclidean(&start, &refined) <= settings.close_tolerance;
        let captured = known_points
            .iter()
            .any(|known| euclidean(known, &refined) <= settings.captured_tolerance);
        let in_domain = spec.contains_with_slack(&refined, settings.domain_slack);
        records.push(CriticalPointRecord {
            x: start,
            z: f(&refined),
            y: refined,
            steps,
            converged,
            classification,
            captured,
            close,
            in_domain,
        });
    }

    let merged = deduplicate(&records, settings.dedup_tolerance);
    debug!(
        candidates = candidates.len(),
        unique = merged.len(),
        "refined and deduplicated candidates"
    );
    merged
}

/// Merge records whose refined points coincide within `tolerance`.
/// First-seen wins; the operation is idempotent because every survivor is
/// farther than `tolerance` from all earlier survivors.
pub fn deduplicate(records: &[CriticalPointRecord], tolerance: f64) -> Vec<CriticalPointRecord> {
    let mut unique: Vec<CriticalPointRecord> = Vec::new();
    for record in records {
        if unique
            .iter()
            .any(|kept| euclidean(&kept.y, &record.y) <= tolerance)
        {
            continue;
        }
        unique.push(record.clone());
    }
    unique
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(p, q)| (p - q) * (p - q))
        .sum::<f64>()
        .sqrt()
}

/// Central-difference gradient with per-axis steps scaled to the
/// coordinate magnitude.
pub fn fd_gradient<F>(f: &F, x: &[f64], step: f64) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut gradient = vec![0.0; x.len()];
    let mut probe = x.to_vec();
    for i in 0..x.len() {
        let h = step * (1.0 + x[i].abs());
        probe[i] = x[i] + h;
        let forward = f(&probe);
        probe[i] = x[i] - h;
        let backward = f(&probe);
        probe[i] = x[i];
        gradient[i] = (forward - backward) / (2.0 * h);
    }
    gradient
}

/// Central-difference Hessian; symmetric by construction.
pub fn fd_hessian<F>(f: &F, x: &[f64], step: f64) -> DMatrix<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let n = x.len();
    let center = f(x);
    let mut hessian = DMatrix::zeros(n, n);
    let mut probe = x.to_vec();
    for i in 0..n {
        let hi = step * (1.0 + x[i].abs());
        probe[i] = x[i] + hi;
        let forward = f(&probe);
        probe[i] = x[i] - hi;
        let backward = f(&probe);
        probe[i] = x[i];
        hessian[(i, i)] = (forward - 2.0 * center + backward) / (hi * hi);
        for j in i + 1..n {
            let hj = step * (1.0 + x[j].abs());
            probe[i] = x[i] + hi;
            probe[j] = x[j] + hj;
            let pp = f(&probe);
            probe[j] = x[j] - hj;
            let pm = f(&probe);
            probe[i] = x[i] - hi;
            let mm = f(&probe);
            probe[j] = x[j] + hj;
            let mp = f(&probe);
            probe[i] = x[i];
            probe[j] = x[j];
            let mixed = (pp - pm - mp + mm) / (4.0 * hi * hj);
            hessian[(i, j)] = mixed;
            hessian[(j, i)] = mixed;
        }
    }
    hessian
}

/// Eigenvalue-sign classification with an explicit near-singular band.
pub fn classify_hessian(hessian: &DMatrix<f64>, singular_band: f64) -> Classification {
    let eigen = SymmetricEigen::new(hessian.clone());
    let max_abs = eigen
        .eigenvalues
        .iter()
        .fold(0.0f64, |acc, v| acc.max(v.abs()));
    if max_abs == 0.0 {
        return Classification::Indefinite;
    }
    // Relative band with a unit floor: a uniformly tiny Hessian is
    // near-singular, not a legitimate extremum.
    let threshold = singular_band * max_abs.max(1.0);
    let mut positive = 0usize;
    let mut negative = 0usize;
    for &value in eigen.eigenvalues.iter() {
        if value.abs() <= threshold {
            return Classification::Indefinite;
        }
        if value > 0.0 {
            positive += 1;
        } else {
            negative += 1;
        }
    }
    if negative == 0 {
        Classification::Minimum
    } else if positive == 0 {
        Classification::Maximum
    } else {
        Classification::Saddle
    }
}

/// Nelder-Mead simplex search. Returns the best vertex, the iteration
/// count, and whether both spread tolerances were met within the step
/// budget.
fn nelder_mead<F>(
    objective: &F,
    start: &[f64],
    scales: &[f64],
    settings: &RefineSettings,
) -> (Vec<f64>, usize, bool)
where
    F: Fn(&[f64]) -> f64,
{
    let n = start.len();
    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(start.to_vec());
    for i in 0..n {
        let mut vertex = start.to_vec();
        vertex[i] += scales[i];
        simplex.push(vertex);
    }
    let mut values: Vec<f64> = simplex.iter().map(|v| objective(v)).collect();
    let mut steps = 0usize;

    loop {
        // Order best to worst.
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| {
            values[a]
                .partial_cmp(&values[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        let f_spread = (values[n] - values[0]).abs();
        let x_spread = simplex[1..]
            .iter()
            .flat_map(|vertex| {
                vertex
                    .iter()
                    .zip(&simplex[0])
                    .map(|(v, b)| (v - b).abs())
            })
            .fold(0.0f64, f64::max);
        if f_spread <= settings.f_abs_tolerance && x_spread <= settings.x_abs_tolerance {
            return (simplex[0].clone(), steps, true);
        }
        if steps >= settings.max_steps {
            return (simplex[0].clone(), steps, false);
        }
        steps += 1;

        let centroid: Vec<f64> = (0..n)
            .map(|i| simplex[..n].iter().map(|v| v[i]).sum::<f64>() / n as f64)
            .collect();
        let worst = simplex[n].clone();
        let reflected: Vec<f64> = centroid
            .iter()
            .zip(&worst)
            .map(|(c, w)| 2.0 * c - w)
            .collect();
        let f_reflected = objective(&reflected);

        if f_reflected < values[0] {
            let expanded: Vec<f64> = centroid
                .iter()
                .zip(&worst)
                .map(|(c, w)| 3.0 * c - 2.0 * w)
                .collect();
            let f_expanded = objective(&expanded);
            if f_expanded < f_reflected {
                simplex[n] = expanded;
                values[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                values[n] = f_reflected;
            }
        } else if f_reflected < values[n - 1] {
            simplex[n] = reflected;
            values[n] = f_reflected;
        } else {
            let contracted: Vec<f64> = if f_reflected < values[n] {
                centroid
                    .iter()
                    .zip(&reflected)
                    .map(|(c, r)| 0.5 * (c + r))
                    .collect()
            } else {
                centroid
                    .iter()
                    .zip(&worst)
                    .map(|(c, w)| 0.5 * (c + w))
                    .collect()
            };
            let f_contracted = objective(&contracted);
            if f_contracted < f_reflected.min(values[n]) {
                simplex[n] = contracted;
                values[n] = f_contracted;
            } else {
                // Shrink toward the best vertex.
                let best = simplex[0].clone();
                for i in 1..=n {
                    for (coord, anchor) in simplex[i].iter_mut().zip(&best) {
                        *coord = anchor + 0.5 * (*coord - anchor);
                    }
                    values[i] = objective(&simplex[i]);
                }
            }
        }
    }
}

/// BFGS with finite-difference gradients and Armijo backtracking.
fn bfgs<F>(objective: &F, start: &[f64], settings: &RefineSettings) -> (Vec<f64>, usize, bool)
where
    F: Fn(&[f64]) -> f64,
{
    let n = start.len();
    let mut x = DVector::from_column_slice(start);
    let mut fx = objective(start);
    let mut gradient = DVector::from_vec(fd_gradient(objective, start, settings.fd_step));
    let mut inverse = DMatrix::<f64>::identity(n, n);
    let identity = DMatrix::<f64>::identity(n, n);
    let mut steps = 0usize;

    while steps < settings.max_steps {
        if gradient.norm() <= settings.gradient_tolerance {
            return (x.iter().cloned().collect(), steps, true);
        }
        steps += 1;

        let mut direction = -(&inverse * &gradient);
        let mut slope = gradient.dot(&direction);
        if slope >= 0.0 {
            // Curvature information has gone bad; restart from steepest
            // descent.
            inverse = identity.clone();
            direction = -gradient.clone();
            slope = -gradient.norm_squared();
        }

        let mut step_len = 1.0;
        let mut accepted = None;
        for _ in 0..40 {
            let trial = &x + &direction * step_len;
            let trial_slice: Vec<f64> = trial.iter().cloned().collect();
            let f_trial = objective(&trial_slice);
            if f_trial <= fx + 1e-4 * step_len * slope {
                accepted = Some((trial, trial_slice, f_trial));
                break;
            }
            step_len *= 0.5;
        }
        let (x_new, x_new_slice, f_new) = match accepted {
            Some(found) => found,
            None => return (x.iter().cloned().collect(), steps, false),
        };

        let g_new = DVector::from_vec(fd_gradient(objective, &x_new_slice, settings.fd_step));
        let displacement = &x_new - &x;
        let grad_change = &g_new - &gradient;
        let stagnated = (fx - f_new).abs() <= settings.f_abs_tolerance
            && displacement.norm() <= settings.x_abs_tolerance;

        let curvature = displacement.dot(&grad_change);
        if curvature > 1e-12 {
            let rho = 1.0 / curvature;
            let left = &identity - (&displacement * grad_change.transpose()).scale(rho);
            let right = &identity - (&grad_change * displacement.transpose()).scale(rho);
            inverse =
                &left * inverse * &right + (&displacement * displacement.transpose()).scale(rho);
        }

        x = x_new;
        fx = f_new;
        gradient = g_new;
        if stagnated {
            return (x.iter().cloned().collect(), steps, true);
        }
    }
    (x.iter().cloned().collect(), steps, false)
}
