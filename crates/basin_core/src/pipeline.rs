use crate::basis::Basis;
use crate::domain::{DegreeSpec, DomainSpec};
use crate::error::QueryError;
use crate::refine::{refine_and_classify, CriticalPointRecord, RefineSettings};
use crate::stationary::{solve_stationary, PathStats, TrackerSettings};
use crate::surrogate::{construct, ConstructionSettings, Precision};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::time::{Duration, Instant};
use tracing::info;

/// Everything one query needs beyond the domain and degree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuerySettings {
    pub basis: Basis,
    pub precision: Precision,
    pub construction: ConstructionSettings,
    pub tracker: TrackerSettings,
    pub refine: RefineSettings,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            basis: Basis::Chebyshev,
            precision: Precision::Float,
            construction: ConstructionSettings::default(),
            tracker: TrackerSettings::default(),
            refine: RefineSettings::default(),
        }
    }
}

/// One unit of work for the batch layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryJob {
    pub spec: DomainSpec,
    pub degree: DegreeSpec,
}

/// Wall-clock and evaluation accounting for one query. Carried as an
/// explicit value through the pipeline and returned with the result;
/// there is no process-wide profiler.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageProfile {
    /// Sampling plus assembly and certification.
    pub construction: Duration,
    pub solving: Duration,
    pub refinement: Duration,
    /// Objective evaluations spent on the sampling grid.
    pub sampling_evaluations: usize,
    /// Objective evaluations spent on refinement and classification.
    pub refinement_evaluations: usize,
}

/// Terminal artifact of one query: the classified critical-point catalog
/// plus every diagnostic a caller needs to decide whether to accept,
/// refine, or retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryReport {
    pub records: Vec<CriticalPointRecord>,
    /// Certified surrogate residual norm; the caller's confidence signal.
    pub nrm: f64,
    pub condition: f64,
    pub effective_degrees: Vec<usize>,
    pub path_stats: PathStats,
    pub profile: StageProfile,
}

/// Run the full pipeline for one `(domain, degree)` pair.
///
/// Construction and solver failures abort the query with full diagnostic
/// context; per-candidate refinement failures surface as record flags.
pub fn run_query<F>(
    f: &F,
    spec: &DomainSpec,
    degree: &DegreeSpec,
    known_points: &[Vec<f64>],
    settings: &QuerySettings,
) -> Result<QueryReport, QueryError>
where
    F: Fn(&[f64]) -> f64,
{
    spec.validate()?;
    let degrees = degree.resolve(spec.dim)?;

    let evaluations = Cell::new(0usize);
    let counted = |x: &[f64]| -> f64 {
        evaluations.set(evaluations.get() + 1);
        f(x)
    };

    let started = Instant::now();
    let surrogate = construct(
        &counted,
        spec,
        &degrees,
        settings.basis,
        settings.precision,
        &settings.construction,
    )?;
    let construction_time = started.elapsed();
    let sampling_evaluations = evaluations.get();

    let started = Instant::now();
    let (candidates, path_stats) = solve_stationary(&surrogate, &settings.tracker)?;
    let solving_time = started.elapsed();

    let started = Instant::now();
    let records = refine_and_classify(&candidates, &counted, spec, &settings.refine, known_points);
    let refinement_time = started.elapsed();

    let profile = StageProfile {
        construction: construction_time,
        solving: solving_time,
        refinement: refinement_time,
        sampling_evaluations,
        refinement_evaluations: evaluations.get() - sampling_evaluations,
    };
    info!(
        nrm = surrogate.nrm,
        condition = surrogate.condition,
        candidates = candidates.len(),
        records = records.len(),
        "query complete"
    );
    Ok(QueryReport {
        records,
        nrm: surrogate.nrm,
        condition: surrogate.condition,
        effective_degrees: surrogate.poly.degrees.clone(),
        path_stats,
        profile,
    })
}

/// Map independent queries over a worker pool. Jobs share no mutable
/// state; ordering of the returned vector matches the job list.
pub fn run_batch<F>(
    f: &F,
    jobs: &[QueryJob],
    known_points: &[Vec<f64>],
    settings: &QuerySettings,
) -> Vec<Result<QueryReport, QueryError>>
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    jobs.par_iter()
        .map(|job| run_query(f, &job.spec, &job.degree, known_points, settings))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HalfWidth;
    use crate::refine::Classification;
    use approx::assert_relative_eq;

    fn box_spec(dim: usize, center: Vec<f64>, half_width: f64, gn: usize) -> DomainSpec {
        DomainSpec {
            dim,
            center,
            half_width: HalfWidth::Uniform(half_width),
            tolerance: 1e-8,
            grid_resolution: gn,
        }
    }

    #[test]
    fn sphere_end_to_end_finds_one_minimum_at_the_origin() {
        let f = |x: &[f64]| x[0] * x[0] + x[1] * x[1];
        let spec = box_spec(2, vec![0.0, 0.0], 1.0, 10);
        let report = run_query(
            &f,
            &spec,
            &DegreeSpec::Uniform(4),
            &[vec![0.0, 0.0]],
            &QuerySettings::default(),
        )
        .expect("query");

        assert!(report.nrm < 1e-10, "nrm = {}", report.nrm);
        assert_eq!(report.records.len(), 1);
        let record = &report.records[0];
        assert_eq!(record.classification, Classification::Minimum);
        assert!(record.converged);
        assert!(record.y.iter().all(|c| c.abs() < 1e-4));
        assert!(record.close);
        assert!(record.captured);
        assert!(record.in_domain);
        assert_eq!(report.profile.sampling_evaluations, 121);
        assert!(report.profile.refinement_evaluations > 0);
    }

    #[test]
    fn rosenbrock_end_to_end_recovers_the_global_minimum() {
        let f = |x: &[f64]| {
            let a = 1.0 - x[0];
            let b = x[1] - x[0] * x[0];
            a * a + 100.0 * b * b
        };
        let spec = box_spec(2, vec![0.0, 0.0], 2.0, 12);
        let report = run_query(
            &f,
            &spec,
            &DegreeSpec::Uniform(8),
            &[],
            &QuerySettings::default(),
        )
        .expect("query");

        // Rosenbrock is itself polynomial of degree (4, 2); the requested
        // degree collapses onto it and the path count follows.
        assert_eq!(report.effective_degrees, vec![4, 2]);
        assert_eq!(report.path_stats.tracked, 25);
        assert!(report.nrm < 1e-8, "nrm = {}", report.nrm);

        let minimum = report
            .records
            .iter()
            .find(|r| r.classification == Classification::Minimum)
            .expect("a refined minimum");
        assert_relative_eq!(minimum.y[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(minimum.y[1], 1.0, epsilon = 1e-3);
        assert!(minimum.z < 1e-6, "f(refined) = {}", minimum.z);
    }

    #[test]
    fn degenerate_resolution_yields_one_center_record() {
        let f = |_: &[f64]| 2.0;
        let spec = box_spec(2, vec![0.5, -0.5], 1.0, 0);
        let report = run_query(
            &f,
            &spec,
            &DegreeSpec::Uniform(0),
            &[],
            &QuerySettings::default(),
        )
        .expect("query");
        assert_eq!(report.records.len(), 1);
        let record = &report.records[0];
        assert_relative_eq!(record.x[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(record.x[1], -0.5, epsilon = 1e-12);
        // A flat surrogate must not masquerade as an extremum.
        assert_eq!(record.classification, Classification::Indefinite);
        assert_relative_eq!(record.z, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn invalid_specs_fail_in_the_validation_stage() {
        let f = |x: &[f64]| x[0];
        let spec = DomainSpec {
            dim: 2,
            center: vec![0.0],
            half_width: HalfWidth::Uniform(1.0),
            tolerance: 1e-8,
            grid_resolution: 4,
        };
        let err = run_query(
            &f,
            &spec,
            &DegreeSpec::Uniform(2),
            &[],
            &QuerySettings::default(),
        )
        .unwrap_err();
        assert_eq!(err.stage(), "validation");
    }

    #[test]
    fn oversized_grids_fail_in_the_construction_stage() {
        let f = |x: &[f64]| x.iter().map(|v| v * v).sum();
        let spec = box_spec(4, vec![0.0; 4], 1.0, 20736);
        let err = run_query(
            &f,
            &spec,
            &DegreeSpec::Uniform(2),
            &[],
            &QuerySettings::default(),
        )
        .unwrap_err();
        assert_eq!(err.stage(), "construction");
        assert!(err.to_string().contains("memory budget"));
    }

    #[test]
    fn batch_runs_are_independent_and_ordered() {
        let f = |x: &[f64]| x[0] * x[0] + x[1] * x[1];
        let jobs = vec![
            QueryJob {
                spec: box_spec(2, vec![0.0, 0.0], 1.0, 8),
                degree: DegreeSpec::Uniform(4),
            },
            QueryJob {
                spec: box_spec(2, vec![0.1, 0.1], 0.5, 8),
                degree: DegreeSpec::Uniform(2),
            },
        ];
        let reports = run_batch(&f, &jobs, &[], &QuerySettings::default());
        assert_eq!(reports.len(), 2);
        for report in &reports {
            let report = report.as_ref().expect("query");
            assert_eq!(report.records.len(), 1);
            assert_eq!(
                report.records[0].classification,
                Classification::Minimum
            );
        }
    }

    #[test]
    fn repeated_queries_are_bitwise_reproducible() {
        let f = |x: &[f64]| {
            let w = x[0] * x[0] - 0.25;
            w * w + x[1] * x[1]
        };
        let spec = box_spec(2, vec![0.0, 0.0], 1.0, 8);
        let settings = QuerySettings::default();
        let first = run_query(&f, &spec, &DegreeSpec::Uniform(4), &[], &settings).expect("query");
        let second = run_query(&f, &spec, &DegreeSpec::Uniform(4), &[], &settings).expect("query");
        assert_eq!(first.records, second.records);
        assert_eq!(first.path_stats, second.path_stats);
    }
}
