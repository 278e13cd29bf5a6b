//! Deterministic search grids for the nonlinear parameters of initial guesses.
//!
//! Rates and midpoints are scanned on fixed grids and the remaining linear
//! parameters are solved exactly at each node, so the starting point handed
//! to the minimizer is reproducible and free of local-minimum luck.

use crate::error::FitError;

/// Generate `steps` log-spaced points between `min` and `max` (inclusive).
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, FitError> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(FitError::InvalidInput(format!(
            "invalid grid range: min={min}, max={max} (must be finite, >0, and max>min)"
        )));
    }
    if steps < 2 {
        return Err(FitError::InvalidInput("grid steps must be >= 2".to_string()));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    Ok((0..steps).map(|i| (ln_min + step * i as f64).exp()).collect())
}

/// Evenly spaced points between `min` and `max` (inclusive).
pub fn lin_space(min: f64, max: f64, steps: usize) -> Vec<f64> {
    match steps {
        0 => Vec::new(),
        1 => vec![(min + max) / 2.0],
        _ => {
            let step = (max - min) / (steps as f64 - 1.0);
            (0..steps).map(|i| min + step * i as f64).collect()
        }
    }
}

/// Rate grid scaled to the span of the data: `±[0.01, 100] / span`.
///
/// `signed` adds the negated rates (decay as well as growth).
pub fn rate_grid(span: f64, steps: usize, signed: bool) -> Result<Vec<f64>, FitError> {
    let span = if span.is_finite() && span > 0.0 { span } else { 1.0 };
    let positive = log_space(0.01 / span, 100.0 / span, steps)?;
    if !signed {
        return Ok(positive);
    }
    let mut out: Vec<f64> = positive.iter().rev().map(|r| -r).collect();
    out.extend(positive);
    Ok(out)
}
