//! Local curvature of least-squares objectives.
//!
//! All uncertainty summaries use the Gauss–Newton approximation: the Hessian
//! of `Σ w_i r_i²` is replaced by `2 Jᵀ W J`, where `J` is the Jacobian of the
//! model predictions with respect to the parameters.

use nalgebra::DMatrix;

/// Central-difference Jacobian of `predict(params, x_i)` (rows = observations).
///
/// Returns `None` if any entry is non-finite.
pub fn jacobian<F>(predict: F, params: &[f64], xs: &[f64]) -> Option<DMatrix<f64>>
where
    F: Fn(&[f64], f64) -> f64,
{
    let n = xs.len();
    let k = params.len();
    let mut jac = DMatrix::<f64>::zeros(n, k);
    let mut shifted = params.to_vec();
    for j in 0..k {
        let h = 6e-6 * params[j].abs().max(1.0);
        shifted[j] = params[j] + h;
        let up: Vec<f64> = xs.iter().map(|&x| predict(shifted.as_slice(), x)).collect();
        shifted[j] = params[j] - h;
        let down: Vec<f64> = xs.iter().map(|&x| predict(shifted.as_slice(), x)).collect();
        shifted[j] = params[j];
        for i in 0..n {
            let d = (up[i] - down[i]) / (2.0 * h);
            if !d.is_finite() {
                return None;
            }
            jac[(i, j)] = d;
        }
    }
    Some(jac)
}

/// `Jᵀ W J` for diagonal weights `w`.
pub fn weighted_information(jac: &DMatrix<f64>, w: &[f64]) -> DMatrix<f64> {
    let mut scaled = jac.clone();
    for (i, &wi) in w.iter().enumerate() {
        let sw = wi.sqrt();
        for j in 0..scaled.ncols() {
            scaled[(i, j)] *= sw;
        }
    }
    scaled.transpose() * scaled
}

/// Standard errors `sqrt(diag(σ² (JᵀWJ)⁻¹))`.
pub fn standard_errors(info: &DMatrix<f64>, sigma2: f64) -> Option<Vec<f64>> {
    if !(sigma2.is_finite() && sigma2 >= 0.0) {
        return None;
    }
    let inv = info.clone().try_inverse()?;
    diag_sqrt(&(inv * sigma2))
}

/// Covariance of clade parameters under a Gaussian prior with variances
/// `prior_var`: `(JᵀWJ / σ² + diag(1 / τ²))⁻¹`.
pub fn shrunk_covariance(info: &DMatrix<f64>, sigma2: f64, prior_var: &[f64]) -> Option<DMatrix<f64>> {
    if !(sigma2.is_finite() && sigma2 > 0.0) {
        return None;
    }
    let mut precision = info / sigma2;
    for (j, &v) in prior_var.iter().enumerate() {
        if !(v.is_finite() && v > 0.0) {
            return None;
        }
        precision[(j, j)] += 1.0 / v;
    }
    let cov = precision.try_inverse()?;
    cov.iter().all(|v| v.is_finite()).then_some(cov)
}

/// Trace of the ridge hat matrix `cov · JᵀWJ / σ²` (effective parameters of
/// one shrunken clade fit, between 0 and k).
pub fn hat_trace(cov: &DMatrix<f64>, info: &DMatrix<f64>, sigma2: f64) -> f64 {
    (cov * info / sigma2).trace()
}

/// Square roots of the diagonal, if all entries are finite and non-negative.
pub fn diag_sqrt(m: &DMatrix<f64>) -> Option<Vec<f64>> {
    let out: Vec<f64> = (0..m.nrows()).map(|i| m[(i, i)]).collect();
    if out.iter().all(|v| v.is_finite() && *v >= 0.0) {
        Some(out.into_iter().map(f64::sqrt).collect())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(p: &[f64], x: f64) -> f64 {
        p[0] + p[1] * x
    }

    #[test]
    fn jacobian_of_line_is_design_matrix() {
        let xs = [0.0, 1.0, 2.0];
        let jac = jacobian(line, &[3.0, -1.0], &xs).unwrap();
        for (i, &x) in xs.iter().enumerate() {
            assert!((jac[(i, 0)] - 1.0).abs() < 1e-8);
            assert!((jac[(i, 1)] - x).abs() < 1e-8);
        }
    }

    #[test]
    fn standard_errors_match_ols_formula() {
        // Var(slope) = σ² / Σ(x - x̄)² for simple regression.
        let xs = [0.0, 1.0, 2.0, 3.0];
        let jac = jacobian(line, &[0.0, 1.0], &xs).unwrap();
        let info = weighted_information(&jac, &[1.0; 4]);
        let se = standard_errors(&info, 0.5).unwrap();
        let sxx = 5.0;
        assert!((se[1] - (0.5_f64 / sxx).sqrt()).abs() < 1e-8);
    }

    #[test]
    fn hat_trace_shrinks_with_tight_prior() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let jac = jacobian(line, &[0.0, 1.0], &xs).unwrap();
        let info = weighted_information(&jac, &[1.0; 4]);
        let loose = shrunk_covariance(&info, 1.0, &[1e8, 1e8]).unwrap();
        let tight = shrunk_covariance(&info, 1.0, &[1e-8, 1e-8]).unwrap();
        assert!((hat_trace(&loose, &info, 1.0) - 2.0).abs() < 1e-4);
        assert!(hat_trace(&tight, &info, 1.0) < 1e-4);
    }
}
