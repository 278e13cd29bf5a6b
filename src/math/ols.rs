//! Weighted least squares solver.
//!
//! Several initial guesses reduce to small linear regressions of the form:
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2
//! ```
//!
//! either directly (linear, quadratic) or after fixing the nonlinear
//! parameters on a grid (exponential, logistic, asymptotic).
//!
//! Implementation choices:
//! - Rows are scaled by `sqrt(w_i)` and the ordinary problem is solved.
//! - SVD handles tall and rank-deficient design matrices without panicking
//!   (nalgebra's `QR::solve` is intended for square systems).

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Weighted fit of `y ~ Σ β_j · basis_j(x)` for a row-builder `basis`.
///
/// Returns `(β, weighted SSE)`.
pub fn weighted_fit<F>(x: &[f64], y: &[f64], w: &[f64], p: usize, basis: F) -> Option<(Vec<f64>, f64)>
where
    F: Fn(f64, &mut [f64]),
{
    let n = x.len();
    if n == 0 || p == 0 {
        return None;
    }
    let mut xw = DMatrix::<f64>::zeros(n, p);
    let mut yw = DVector::<f64>::zeros(n);
    let mut row = vec![0.0; p];
    for i in 0..n {
        basis(x[i], &mut row);
        let sw = w[i].sqrt();
        for j in 0..p {
            xw[(i, j)] = row[j] * sw;
        }
        yw[i] = y[i] * sw;
    }

    let beta = solve_least_squares(&xw, &yw)?;
    let fitted = &xw * &beta;
    let sse = (yw - fitted).norm_squared();
    if !sse.is_finite() {
        return None;
    }
    Some((beta.iter().copied().collect(), sse))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn weighted_fit_recovers_quadratic() {
        let x = [0.0, 0.5, 1.0, 1.5, 2.0];
        let y: Vec<f64> = x.iter().map(|v| 1.0 - 2.0 * v + 0.5 * v * v).collect();
        let w = [1.0, 2.0, 1.0, 3.0, 1.0];
        let (beta, sse) = weighted_fit(&x, &y, &w, 3, |t, row| {
            row[0] = 1.0;
            row[1] = t;
            row[2] = t * t;
        })
        .unwrap();
        assert!((beta[0] - 1.0).abs() < 1e-9);
        assert!((beta[1] + 2.0).abs() < 1e-9);
        assert!((beta[2] - 0.5).abs() < 1e-9);
        assert!(sse < 1e-18);
    }
}
