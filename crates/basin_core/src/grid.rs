use crate::basis::Basis;
use crate::domain::DomainSpec;
use crate::error::ConstructionError;
use std::time::{Duration, Instant};
use tracing::debug;

/// Tensor-product sampling grid in surrogate (unit) coordinates.
///
/// Nodes are stored per axis; the full product is addressed
/// lexicographically with the last axis fastest, matching the coefficient
/// layout of [`crate::poly::BasisPoly`]. The value array is empty until
/// [`sample_objective`] fills it.
#[derive(Debug, Clone)]
pub struct Grid {
    pub dim: usize,
    pub axis_nodes: Vec<Vec<f64>>,
    pub values: Vec<f64>,
}

impl Grid {
    pub fn point_count(&self) -> usize {
        self.axis_nodes.iter().map(Vec::len).product()
    }

    /// Decode the `flat`-th tensor point into unit coordinates.
    pub fn unit_point(&self, mut flat: usize) -> Vec<f64> {
        let mut point = vec![0.0; self.dim];
        for axis in (0..self.dim).rev() {
            let nodes = &self.axis_nodes[axis];
            point[axis] = nodes[flat % nodes.len()];
            flat /= nodes.len();
        }
        point
    }
}

/// Generate the sampling grid for `spec`, rejecting configurations whose
/// estimated footprint exceeds `memory_budget_bytes` *before* any
/// allocation happens.
pub fn generate_grid(
    spec: &DomainSpec,
    basis: Basis,
    memory_budget_bytes: u64,
) -> Result<Grid, ConstructionError> {
    let estimated = spec.estimated_grid_bytes();
    let budget = memory_budget_bytes as u128;
    match estimated {
        Some(bytes) if bytes <= budget => {}
        Some(bytes) => {
            return Err(ConstructionError::MemoryBudgetExceeded {
                estimated_bytes: bytes,
                budget_bytes: budget,
            })
        }
        None => {
            return Err(ConstructionError::MemoryBudgetExceeded {
                estimated_bytes: u128::MAX,
                budget_bytes: budget,
            })
        }
    }

    let axis_nodes: Vec<Vec<f64>> = (0..spec.dim)
        .map(|_| basis.nodes_1d(spec.grid_resolution))
        .collect();
    let grid = Grid {
        dim: spec.dim,
        axis_nodes,
        values: Vec::new(),
    };
    debug!(
        points = grid.point_count(),
        per_axis = spec.grid_resolution + 1,
        "generated sampling grid"
    );
    Ok(grid)
}

/// Evaluate the objective at every grid node, in original coordinates.
///
/// Each call is clocked against `timeout`; a breach or a non-finite value
/// fails the whole construction rather than being silently patched.
pub fn sample_objective<F>(
    grid: &mut Grid,
    spec: &DomainSpec,
    f: &F,
    timeout: Option<Duration>,
) -> Result<(), ConstructionError>
where
    F: Fn(&[f64]) -> f64,
{
    let points = grid.point_count();
    let mut values = Vec::with_capacity(points);
    for index in 0..points {
        let unit = grid.unit_point(index);
        let original = spec.to_original(&unit);
        let started = Instant::now();
        let value = f(&original);
        if let Some(budget) = timeout {
            let elapsed = started.elapsed();
            if elapsed > budget {
                return Err(ConstructionError::EvaluationTimeout {
                    index,
                    elapsed_ms: elapsed.as_millis(),
                    budget_ms: budget.as_millis(),
                });
            }
        }
        if !value.is_finite() {
            return Err(ConstructionError::NonFiniteSample { index, value });
        }
        values.push(value);
    }
    grid.values = values;
    Ok(())
}
