//! Weighted nonlinear least-squares fitting.
//!
//! A small Levenberg-Marquardt implementation with a central-difference
//! Jacobian, sized for the handful of parameters the peak and correlation
//! models need. Points carry per-point uncertainties; a point with a zero or
//! non-finite uncertainty contributes with unit weight.

use ndarray::{Array1, Array2};

const MAX_ITERATIONS: usize = 200;
const LAMBDA_START: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e10;
const RELATIVE_CHI2_TOLERANCE: f64 = 1e-12;
const GRADIENT_TOLERANCE: f64 = 1e-6;

/// Outcome of one least-squares fit.
///
/// `converged == false` never withholds the statistics: chi-square and the
/// last parameter values are always populated so a degenerate fit can still
/// be reported to the user.
#[derive(Debug, Clone)]
pub struct FitReport {
    pub params: Vec<f64>,
    /// Standard errors from the covariance matrix; NaN when the normal
    /// matrix is singular at the optimum.
    pub errors: Vec<f64>,
    pub chi2: f64,
    pub ndf: usize,
    pub converged: bool,
}

/// Fits `model(params, x)` to `(x, y)` with uncertainties `sigma`.
///
/// ## Parameters
///    - model: the curve as a function of the parameter vector and x
///    - x, y: the data series
///    - sigma: per-point uncertainty on y; zero entries get unit weight
///    - seeds: initial parameter values
pub fn curve_fit<F>(model: F, x: &[f64], y: &[f64], sigma: &[f64], seeds: &[f64]) -> FitReport
where
    F: Fn(&[f64], f64) -> f64,
{
    let n = x.len();
    let p = seeds.len();
    let weights: Vec<f64> = sigma
        .iter()
        .map(|&s| if s.is_finite() && s > 0.0 { 1.0 / (s * s) } else { 1.0 })
        .collect();

    let mut params = seeds.to_vec();
    let mut chi2 = chi_square(&model, &params, x, y, &weights);
    let mut lambda = LAMBDA_START;
    let mut converged = false;

    for _ in 0..MAX_ITERATIONS {
        if !chi2.is_finite() {
            break;
        }
        let (normal, gradient) = normal_equations(&model, &params, x, y, &weights);

        // Damped steps until one improves chi2 or the damping runs away.
        let mut improved = false;
        while lambda <= LAMBDA_MAX {
            let mut damped = normal.clone();
            for k in 0..p {
                let d = normal[[k, k]];
                damped[[k, k]] = d + lambda * if d > 0.0 { d } else { 1e-12 };
            }
            if let Some(step) = solve(damped, gradient.clone()) {
                let trial: Vec<f64> = params
                    .iter()
                    .zip(step.iter())
                    .map(|(v, d)| v + d)
                    .collect();
                let trial_chi2 = chi_square(&model, &trial, x, y, &weights);
                if trial_chi2.is_finite() && trial_chi2 <= chi2 {
                    let gain = chi2 - trial_chi2;
                    params = trial;
                    chi2 = trial_chi2;
                    lambda = (lambda / 10.0).max(1e-12);
                    improved = true;
                    if gain <= RELATIVE_CHI2_TOLERANCE * chi2.max(1e-12) {
                        converged = true;
                    }
                    break;
                }
            }
            lambda *= 10.0;
        }
        if !improved {
            // A stall is only a solution if the gradient has actually
            // flattened out; a fit stuck at bad seeds has not converged.
            let flat = gradient
                .iter()
                .all(|g| g.abs() <= GRADIENT_TOLERANCE * (1.0 + chi2));
            converged = chi2.is_finite() && flat;
            break;
        }
        if converged {
            break;
        }
    }

    let (normal, _) = normal_equations(&model, &params, x, y, &weights);
    let errors = match invert(&normal) {
        Some(cov) => (0..p)
            .map(|k| {
                let v = cov[[k, k]];
                if v >= 0.0 {
                    v.sqrt()
                } else {
                    f64::NAN
                }
            })
            .collect(),
        None => vec![f64::NAN; p],
    };

    FitReport {
        params,
        errors,
        chi2,
        ndf: n.saturating_sub(p),
        converged,
    }
}

fn chi_square<F>(model: &F, params: &[f64], x: &[f64], y: &[f64], weights: &[f64]) -> f64
where
    F: Fn(&[f64], f64) -> f64,
{
    x.iter()
        .zip(y.iter())
        .zip(weights.iter())
        .map(|((&xi, &yi), &w)| {
            let r = yi - model(params, xi);
            w * r * r
        })
        .sum()
}

/// Builds J^T W J and J^T W r at the current parameter point with a
/// central-difference Jacobian.
fn normal_equations<F>(
    model: &F,
    params: &[f64],
    x: &[f64],
    y: &[f64],
    weights: &[f64],
) -> (Array2<f64>, Array1<f64>)
where
    F: Fn(&[f64], f64) -> f64,
{
    let n = x.len();
    let p = params.len();
    let mut jacobian = Array2::<f64>::zeros((n, p));
    let mut residuals = Array1::<f64>::zeros(n);

    for (i, (&xi, &yi)) in x.iter().zip(y.iter()).enumerate() {
        residuals[i] = yi - model(params, xi);
    }
    let mut shifted = params.to_vec();
    for k in 0..p {
        let h = (1e-6 * params[k].abs()).max(1e-8);
        shifted[k] = params[k] + h;
        for (i, &xi) in x.iter().enumerate() {
            let up = model(&shifted, xi);
            shifted[k] = params[k] - h;
            let down = model(&shifted, xi);
            shifted[k] = params[k] + h;
            jacobian[[i, k]] = (up - down) / (2.0 * h);
        }
        shifted[k] = params[k];
    }

    let mut normal = Array2::<f64>::zeros((p, p));
    let mut gradient = Array1::<f64>::zeros(p);
    for i in 0..n {
        let w = weights[i];
        for k in 0..p {
            gradient[k] += w * jacobian[[i, k]] * residuals[i];
            for l in k..p {
                normal[[k, l]] += w * jacobian[[i, k]] * jacobian[[i, l]];
            }
        }
    }
    for k in 0..p {
        for l in 0..k {
            normal[[k, l]] = normal[[l, k]];
        }
    }
    (normal, gradient)
}

/// Gaussian elimination with partial pivoting. Returns None on a singular
/// system. Matrices here are at most a handful of rows.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let mut pivot = col;
        for row in (col + 1)..n {
            if a[[row, col]].abs() > a[[pivot, col]].abs() {
                pivot = row;
            }
        }
        if a[[pivot, col]].abs() < 1e-300 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                let tmp = a[[col, k]];
                a[[col, k]] = a[[pivot, k]];
                a[[pivot, k]] = tmp;
            }
            b.swap(col, pivot);
        }
        for row in (col + 1)..n {
            let factor = a[[row, col]] / a[[col, col]];
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let mut acc = b[row];
        for k in (row + 1)..n {
            acc -= a[[row, k]] * x[k];
        }
        x[row] = acc / a[[row, row]];
    }
    Some(x)
}

fn invert(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut inverse = Array2::<f64>::zeros((n, n));
    for col in 0..n {
        let mut unit = Array1::<f64>::zeros(n);
        unit[col] = 1.0;
        let column = solve(a.clone(), unit)?;
        for row in 0..n {
            inverse[[row, col]] = column[row];
        }
    }
    Some(inverse)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_an_exact_line() {
        let x: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| 2.0 * v + 1.0).collect();
        let sigma = vec![1.0; x.len()];
        let report = curve_fit(
            |p, xi| p[0] * xi + p[1],
            &x,
            &y,
            &sigma,
            &[1.0, 0.0],
        );
        assert!(report.converged);
        assert!((report.params[0] - 2.0).abs() < 1e-8);
        assert!((report.params[1] - 1.0).abs() < 1e-8);
        assert!(report.chi2 < 1e-12);
        assert_eq!(report.ndf, 18);
    }

    #[test]
    fn recovers_an_exact_gaussian() {
        let x: Vec<f64> = (0..40).map(|i| i as f64 * 0.5).collect();
        let truth = [250.0, 10.0, 1.5];
        let gauss = |p: &[f64], xi: f64| {
            let d = xi - p[1];
            p[0] * (-d * d / (2.0 * p[2] * p[2])).exp()
        };
        let y: Vec<f64> = x.iter().map(|&v| gauss(&truth, v)).collect();
        let sigma: Vec<f64> = y.iter().map(|&v| v.max(1.0).sqrt()).collect();
        let report = curve_fit(gauss, &x, &y, &sigma, &[100.0, 9.0, 1.0]);
        assert!(report.converged);
        assert!((report.params[0] - truth[0]).abs() < 1e-3);
        assert!((report.params[1] - truth[1]).abs() < 1e-4);
        assert!((report.params[2].abs() - truth[2]).abs() < 1e-3);
    }

    #[test]
    fn stalled_fit_does_not_claim_convergence() {
        // The model blows up for any parameter away from the seed, so every
        // damped step is rejected and the fit stalls where it started.
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y = vec![100.0; 10];
        let sigma = vec![1.0; 10];
        let report = curve_fit(
            |p: &[f64], xi: f64| {
                if (p[0] - 1.0).abs() < 1e-9 {
                    p[0] + 0.0 * xi
                } else {
                    f64::NAN
                }
            },
            &x,
            &y,
            &sigma,
            &[1.0],
        );
        assert!(!report.converged);
    }

    #[test]
    fn singular_system_reports_nan_errors() {
        // Two perfectly degenerate parameters: the model only sees their sum.
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&v| v + 3.0).collect();
        let sigma = vec![1.0; x.len()];
        let report = curve_fit(|p, xi| xi + p[0] + p[1], &x, &y, &sigma, &[1.0, 1.0]);
        assert!(report.errors[0].is_nan());
        assert!(report.errors[1].is_nan());
    }
}
