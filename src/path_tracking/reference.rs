//! Reference curve: a low-degree polynomial y = f(x) fit to vehicle-frame waypoints
//!
//! The fit solves the least-squares Vandermonde system through a QR
//! decomposition. Evaluation is defined everywhere, but the curve is only
//! meaningful over the span of the waypoints it was fit to.

use itertools::Itertools;
use nalgebra::{DMatrix, DVector};
use ordered_float::OrderedFloat;

use crate::common::{MpcError, MpcResult, Path2D};

/// Relative size of the smallest R diagonal entry accepted by the fit
const RANK_TOLERANCE: f64 = 1e-12;

/// Polynomial coefficients, lowest order first
#[derive(Debug, Clone, PartialEq)]
pub struct ReferencePolynomial {
    coeffs: DVector<f64>,
}

impl ReferencePolynomial {
    /// Build from coefficients, lowest order first
    pub fn new(coeffs: Vec<f64>) -> Self {
        Self { coeffs: DVector::from_vec(coeffs) }
    }

    /// Least-squares fit of a degree `degree` polynomial through `(xs, ys)`
    ///
    /// Too few points (or too few distinct x values) is an input error; a
    /// numerically singular system is a `FitError`.
    pub fn fit(xs: &[f64], ys: &[f64], degree: usize) -> MpcResult<Self> {
        if xs.len() != ys.len() {
            return Err(MpcError::InvalidInput(format!(
                "cannot fit {} x values against {} y values",
                xs.len(),
                ys.len()
            )));
        }
        if degree == 0 {
            return Err(MpcError::InvalidInput("polynomial degree must be at least 1".to_string()));
        }
        let distinct = xs.iter().map(|&x| OrderedFloat(x)).unique().count();
        if distinct < degree + 1 {
            return Err(MpcError::InvalidInput(format!(
                "degree {} fit needs {} distinct points, got {}",
                degree,
                degree + 1,
                distinct
            )));
        }
        if xs.iter().chain(ys.iter()).any(|v| !v.is_finite()) {
            return Err(MpcError::FitError("non-finite waypoint coordinate".to_string()));
        }

        let n = xs.len();
        let vandermonde = DMatrix::from_fn(n, degree + 1, |i, j| xs[i].powi(j as i32));
        let y = DVector::from_column_slice(ys);

        let (q, r) = vandermonde.qr().unpack();
        let max_diag = r.diagonal().amax();
        let min_diag = r.diagonal().iter().fold(f64::INFINITY, |m, d| m.min(d.abs()));
        if !(min_diag > RANK_TOLERANCE * max_diag) {
            return Err(MpcError::FitError(format!(
                "ill-conditioned fit system (|R| diagonal range {:.3e}..{:.3e})",
                min_diag, max_diag
            )));
        }

        let qty = q.transpose() * y;
        let coeffs = r
            .solve_upper_triangular(&qty)
            .ok_or_else(|| MpcError::FitError("triangular solve failed".to_string()))?;
        if coeffs.iter().any(|c| !c.is_finite()) {
            return Err(MpcError::FitError("fit produced non-finite coefficients".to_string()));
        }
        Ok(Self { coeffs })
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    pub fn coefficients(&self) -> &[f64] {
        self.coeffs.as_slice()
    }

    /// f(x), Horner's form
    pub fn eval(&self, x: f64) -> f64 {
        self.coeffs.as_slice().iter().rev().fold(0.0, |acc, &c| acc * x + c)
    }

    /// f'(x)
    pub fn derivative(&self, x: f64) -> f64 {
        self.coeffs
            .as_slice()
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .fold(0.0, |acc, (i, &c)| acc * x + i as f64 * c)
    }

    /// Tangent direction of the curve at x [rad]
    pub fn heading(&self, x: f64) -> f64 {
        self.derivative(x).atan()
    }

    pub fn is_finite(&self) -> bool {
        self.coeffs.iter().all(|c| c.is_finite())
    }

    /// Curve samples at x = 0, step, 2 step, ... up to `extent`, for display
    pub fn sample(&self, step: f64, extent: f64) -> Path2D {
        let count = (extent / step + 1e-9).floor() as usize + 1;
        let xs: Vec<f64> = (0..count).map(|i| i as f64 * step).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| self.eval(x)).collect();
        Path2D::from_xy(&xs, &ys)
    }
}
