use crate::stationary::PathStats;
use thiserror::Error;

/// Failure of surrogate construction. Per the no-fallbacks policy these
/// abort the query for the `(domain, degree)` pair; none is downgraded to
/// a degraded-but-running mode.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error("objective returned non-finite value {value} at grid index {index}")]
    NonFiniteSample { index: usize, value: f64 },

    #[error(
        "objective evaluation at grid index {index} took {elapsed_ms} ms (budget {budget_ms} ms)"
    )]
    EvaluationTimeout {
        index: usize,
        elapsed_ms: u128,
        budget_ms: u128,
    },

    #[error("assembly matrix is numerically singular ({rows} samples, {cols} coefficients)")]
    SingularSystem { rows: usize, cols: usize },

    #[error("assembly matrix condition {condition:.3e} exceeds limit {limit:.3e}")]
    IllConditioned { condition: f64, limit: f64 },

    #[error(
        "estimated grid footprint {estimated_bytes} bytes exceeds memory budget {budget_bytes} bytes"
    )]
    MemoryBudgetExceeded {
        estimated_bytes: u128,
        budget_bytes: u128,
    },

    #[error("exact coefficient solve failed: {reason}")]
    ExactSolveFailed { reason: String },
}

/// Failure of the stationary-system solve. Diagnostics always carry the
/// full path-tracking statistics so the caller can decide whether to retry
/// with a different degree or tolerance.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("stationary system requires {required} continuation paths, budget is {budget}")]
    PathBudgetExceeded { required: u128, budget: u128 },

    #[error("every continuation path failed: {stats}")]
    TrackingFailed { stats: PathStats },

    #[error("no real in-domain candidates survived filtering: {stats}")]
    NoCandidates { stats: PathStats },
}

/// Terminal error of one query. Carries the failing stage name and the
/// stage's diagnostic payload; refinement non-convergence is deliberately
/// absent (it is a per-record flag, not an error).
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid query specification: {0}")]
    InvalidSpec(#[from] anyhow::Error),

    #[error("surrogate construction failed: {0}")]
    Construction(#[from] ConstructionError),

    #[error("stationary-system solve failed: {0}")]
    Solver(#[from] SolverError),
}

impl QueryError {
    pub fn stage(&self) -> &'static str {
        match self {
            QueryError::InvalidSpec(_) => "validation",
            QueryError::Construction(_) => "construction",
            QueryError::Solver(_) => "solver",
        }
    }
}
