//! Least-squares fitting and small numeric helpers.
//!
//! Line and plane fits are ordinary least squares solved through the SVD of
//! the design matrix; interpolation and the bounded 1-D minimizer serve the
//! tilt decomposition.

use crate::error::{FitError, Result};
use nalgebra::{DMatrix, DVector};

const SVD_EPS: f64 = 1e-12;

/// Fit `y = c + a * x` by least squares.
///
/// Returns `(c, a)`.
pub fn fit_line(points: &[(f64, f64)]) -> Result<(f64, f64)> {
    if points.len() < 2 {
        return Err(FitError::TooFewPoints {
            model: "line".to_string(),
            got: points.len(),
            needed: 2,
        }
        .into());
    }

    let design = DMatrix::from_fn(points.len(), 2, |r, c| match c {
        0 => 1.0,
        _ => points[r].0,
    });
    let rhs = DVector::from_fn(points.len(), |r, _| points[r].1);

    // solve() falls back to a minimum-norm solution on rank-deficient
    // input, so degeneracy has to be caught from the rank itself
    let svd = design.svd(true, true);
    if svd.rank(SVD_EPS) < 2 {
        return Err(FitError::Singular {
            model: "line".to_string(),
        }
        .into());
    }
    let solution = svd.solve(&rhs, SVD_EPS).map_err(|_| FitError::Singular {
        model: "line".to_string(),
    })?;

    let (c, a) = (solution[0], solution[1]);
    if !c.is_finite() || !a.is_finite() {
        return Err(FitError::Singular {
            model: "line".to_string(),
        }
        .into());
    }
    Ok((c, a))
}

/// Fit `y = c + a * u + b * v` by least squares.
///
/// Returns `(c, a, b)`.
pub fn fit_plane(points: &[(f64, f64, f64)]) -> Result<(f64, f64, f64)> {
    if points.len() < 3 {
        return Err(FitError::TooFewPoints {
            model: "plane".to_string(),
            got: points.len(),
            needed: 3,
        }
        .into());
    }

    let design = DMatrix::from_fn(points.len(), 3, |r, c| match c {
        0 => 1.0,
        1 => points[r].0,
        _ => points[r].1,
    });
    let rhs = DVector::from_fn(points.len(), |r, _| points[r].2);

    let svd = design.svd(true, true);
    if svd.rank(SVD_EPS) < 3 {
        return Err(FitError::Singular {
            model: "plane".to_string(),
        }
        .into());
    }
    let solution = svd.solve(&rhs, SVD_EPS).map_err(|_| FitError::Singular {
        model: "plane".to_string(),
    })?;

    let (c, a, b) = (solution[0], solution[1], solution[2]);
    if !c.is_finite() || !a.is_finite() || !b.is_finite() {
        return Err(FitError::Singular {
            model: "plane".to_string(),
        }
        .into());
    }
    Ok((c, a, b))
}

/// Piecewise-linear interpolation of `(x, y)` samples at `x`, extrapolating
/// from the end segments outside the sampled range.
///
/// Samples need not be sorted; at least two distinct x values are required.
pub fn interp_linear(samples: &[(f64, f64)], x: f64) -> Result<f64> {
    if samples.len() < 2 {
        return Err(FitError::TooFewPoints {
            model: "interpolation".to_string(),
            got: samples.len(),
            needed: 2,
        }
        .into());
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let segment = if x <= sorted[0].0 {
        (sorted[0], sorted[1])
    } else if x >= sorted[sorted.len() - 1].0 {
        (sorted[sorted.len() - 2], sorted[sorted.len() - 1])
    } else {
        let idx = sorted.partition_point(|s| s.0 < x);
        (sorted[idx - 1], sorted[idx])
    };

    let ((x0, y0), (x1, y1)) = segment;
    if (x1 - x0).abs() < SVD_EPS {
        return Err(FitError::Singular {
            model: "interpolation".to_string(),
        }
        .into());
    }
    Ok(y0 + (y1 - y0) * (x - x0) / (x1 - x0))
}

/// Minimize a 1-D function over `[lo, hi]` by golden-section search.
///
/// The objective must be unimodal over the bracket; the result is the
/// abscissa of the minimum to within `tol`.
pub fn minimize_scalar<F: Fn(f64) -> f64>(f: F, lo: f64, hi: f64, tol: f64) -> f64 {
    const INV_PHI: f64 = 0.618_033_988_749_894_8;

    let (mut a, mut b) = (lo.min(hi), lo.max(hi));
    let mut c = b - (b - a) * INV_PHI;
    let mut d = a + (b - a) * INV_PHI;
    let mut fc = f(c);
    let mut fd = f(d);

    while (b - a) > tol {
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = b - (b - a) * INV_PHI;
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + (b - a) * INV_PHI;
            fd = f(d);
        }
    }
    (a + b) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_fit_recovers_slope_and_intercept() {
        let points: Vec<(f64, f64)> = (0..10)
            .map(|i| {
                let x = i as f64;
                (x, 2.5 - 0.75 * x)
            })
            .collect();
        let (c, a) = fit_line(&points).unwrap();
        assert!((c - 2.5).abs() < 1e-9);
        assert!((a + 0.75).abs() < 1e-9);
    }

    #[test]
    fn line_fit_rejects_single_point() {
        assert!(fit_line(&[(0.0, 1.0)]).is_err());
    }

    #[test]
    fn line_fit_rejects_repeated_abscissa() {
        let points = [(2.0, 1.0), (2.0, 3.0), (2.0, 5.0)];
        assert!(fit_line(&points).is_err());
    }

    #[test]
    fn plane_fit_recovers_coefficients_with_noise() {
        let mut points = Vec::new();
        for i in 0..6 {
            for j in 0..6 {
                let u = i as f64;
                let v = j as f64;
                // deterministic pseudo-noise, a few thousandths
                let noise = 0.005 * (((i * 7 + j * 3) % 5) as f64 / 5.0) - 0.002;
                points.push((u, v, 1.0 + 0.02 * u - 0.03 * v + noise));
            }
        }
        let (c, a, b) = fit_plane(&points).unwrap();
        assert!((c - 1.0).abs() < 0.01);
        assert!((a - 0.02).abs() < 0.005);
        assert!((b + 0.03).abs() < 0.005);
    }

    #[test]
    fn plane_fit_rejects_collinear_points() {
        let points: Vec<(f64, f64, f64)> =
            (0..5).map(|i| (i as f64, 2.0 * i as f64, 1.0)).collect();
        assert!(fit_plane(&points).is_err());
    }

    #[test]
    fn interpolation_inside_and_outside_range() {
        let samples = [(-15.0, 1.0), (-9.0, 2.0), (-3.0, 3.0)];
        assert!((interp_linear(&samples, -12.0).unwrap() - 1.5).abs() < 1e-12);
        // extrapolates from the end segments
        assert!((interp_linear(&samples, 0.0).unwrap() - 3.5).abs() < 1e-12);
        assert!((interp_linear(&samples, -21.0).unwrap() - 0.0).abs() < 1e-12);
    }

    #[test]
    fn golden_section_finds_parabola_minimum() {
        let min = minimize_scalar(|x| (x - 0.3).powi(2) + 1.0, -1.0, 1.0, 1e-10);
        assert!((min - 0.3).abs() < 1e-8);
    }
}
