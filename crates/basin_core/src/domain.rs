use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Per-axis half-width of the query box, scalar or per-axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HalfWidth {
    Uniform(f64),
    PerAxis(Vec<f64>),
}

/// Requested surrogate degree, scalar or per-axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DegreeSpec {
    Uniform(usize),
    PerAxis(Vec<usize>),
}

impl DegreeSpec {
    pub fn resolve(&self, dim: usize) -> Result<Vec<usize>> {
        match self {
            DegreeSpec::Uniform(d) => Ok(vec![*d; dim]),
            DegreeSpec::PerAxis(ds) => {
                if ds.len() != dim {
                    bail!(
                        "degree specification has {} axes, domain has {}.",
                        ds.len(),
                        dim
                    );
                }
                Ok(ds.clone())
            }
        }
    }
}

/// Immutable description of one query box: where to look, how finely to
/// sample, and how accurate the surrogate must be to be trusted.
///
/// `grid_resolution` is nodes *per axis*; the total node count is
/// `(grid_resolution + 1)^dim`. Misreading it as a total budget is exactly
/// the configuration [`DomainSpec::estimated_grid_bytes`] exists to catch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSpec {
    pub dim: usize,
    pub center: Vec<f64>,
    pub half_width: HalfWidth,
    pub tolerance: f64,
    pub grid_resolution: usize,
}

impl DomainSpec {
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            bail!("Domain has zero dimension.");
        }
        if self.center.len() != self.dim {
            bail!(
                "Center has {} coordinates, domain has {} axes.",
                self.center.len(),
                self.dim
            );
        }
        if !self.center.iter().all(|c| c.is_finite()) {
            bail!("Center coordinates must be finite.");
        }
        match &self.half_width {
            HalfWidth::Uniform(w) => {
                if !(w.is_finite() && *w > 0.0) {
                    bail!("Half-width must be finite and positive.");
                }
            }
            HalfWidth::PerAxis(ws) => {
                if ws.len() != self.dim {
                    bail!(
                        "Half-width has {} axes, domain has {}.",
                        ws.len(),
                        self.dim
                    );
                }
                if !ws.iter().all(|w| w.is_finite() && *w > 0.0) {
                    bail!("Every per-axis half-width must be finite and positive.");
                }
            }
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            bail!("Tolerance must be finite and positive.");
        }
        Ok(())
    }

    pub fn axis_half_width(&self, axis: usize) -> f64 {
        match &self.half_width {
            HalfWidth::Uniform(w) => *w,
            HalfWidth::PerAxis(ws) => ws[axis],
        }
    }

    /// Map a point from surrogate space `[-1, 1]^dim` to original
    /// coordinates.
    pub fn to_original(&self, unit: &[f64]) -> Vec<f64> {
        unit.iter()
            .enumerate()
            .map(|(axis, &u)| self.center[axis] + self.axis_half_width(axis) * u)
            .collect()
    }

    /// Inverse of [`DomainSpec::to_original`].
    pub fn to_unit(&self, original: &[f64]) -> Vec<f64> {
        original
            .iter()
            .enumerate()
            .map(|(axis, &x)| (x - self.center[axis]) / self.axis_half_width(axis))
            .collect()
    }

    /// Whether `original` lies inside the box expanded by `slack` in unit
    /// coordinates.
    pub fn contains_with_slack(&self, original: &[f64], slack: f64) -> bool {
        self.to_unit(original)
            .iter()
            .all(|u| u.is_finite() && u.abs() <= 1.0 + slack)
    }

    /// Total node count `(grid_resolution + 1)^dim`, or `None` on
    /// overflow.
    pub fn point_count(&self) -> Option<u128> {
        let per_axis = self.grid_resolution as u128 + 1;
        let mut total: u128 = 1;
        for _ in 0..self.dim {
            total = total.checked_mul(per_axis)?;
        }
        Some(total)
    }

    /// Estimated grid footprint in bytes: node coordinates plus the value
    /// array, computed in 128-bit arithmetic so the estimate itself cannot
    /// overflow before the budget comparison happens.
    pub fn estimated_grid_bytes(&self) -> Option<u128> {
        let points = self.point_count()?;
        points.checked_mul(8)?.checked_mul(self.dim as u128 + 1)
    }
}
