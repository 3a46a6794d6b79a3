use num_complex::Complex;
use std::fmt::Debug;
use std::ops::{Add, Mul, Neg, Sub};

/// A trait for types polynomial evaluation can run over.
/// Covers `f64` (sampling, certification, refinement) and `Complex<f64>`
/// (homotopy path tracking).
pub trait PolyScalar:
    Copy
    + Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
    + 'static
{
    fn zero() -> Self;
    fn one() -> Self;
    fn from_f64(value: f64) -> Self;
    /// Multiplication by a real constant, used by the basis recurrences.
    fn scale(self, factor: f64) -> Self;
    fn is_finite_scalar(self) -> bool;
}

impl PolyScalar for f64 {
    fn zero() -> Self {
        0.0
    }
    fn one() -> Self {
        1.0
    }
    fn from_f64(value: f64) -> Self {
        value
    }
    fn scale(self, factor: f64) -> Self {
        self * factor
    }
    fn is_finite_scalar(self) -> bool {
        self.is_finite()
    }
}

impl PolyScalar for Complex<f64> {
    fn zero() -> Self {
        Complex::new(0.0, 0.0)
    }
    fn one() -> Self {
        Complex::new(1.0, 0.0)
    }
    fn from_f64(value: f64) -> Self {
        Complex::new(value, 0.0)
    }
    fn scale(self, factor: f64) -> Self {
        Complex::new(self.re * factor, self.im * factor)
    }
    fn is_finite_scalar(self) -> bool {
        self.re.is_finite() && self.im.is_finite()
    }
}
