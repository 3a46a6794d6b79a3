//! The `basin_core` crate certifies the global critical-point structure of
//! a black-box scalar objective over a bounded box: it fits a polynomial
//! surrogate with a certified residual norm, enumerates the surrogate's
//! stationary points by homotopy continuation, then refines and classifies
//! each point against the true objective.
//!
//! Key components:
//! - **Grid + Surrogate**: tensor-grid sampling and basis least squares
//!   ([`grid`], [`surrogate`]), with condition-number and memory-budget
//!   guards.
//! - **Stationary solver**: total-degree homotopy continuation over the
//!   gradient system ([`stationary`]), deterministic per seed.
//! - **Refiner**: derivative-free local refinement, Hessian
//!   classification, and deduplication ([`refine`]).
//! - **Pipeline**: per-query orchestration and a rayon batch layer
//!   ([`pipeline`]).

pub mod basis;
pub mod domain;
pub mod error;
pub mod grid;
pub mod pipeline;
pub mod poly;
pub mod refine;
pub mod stationary;
pub mod surrogate;
pub mod traits;
