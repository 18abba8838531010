use crate::fitting::curve_fit;
use crate::geometry::{cosines, N_INDICES};

/// Domain-tuned initial guesses for the correlation fit.
#[derive(Debug, Copy, Clone)]
pub struct CorrelationSeeds {
    pub a2: f64,
    pub a4: f64,
    pub scale: f64,
}

impl Default for CorrelationSeeds {
    fn default() -> Self {
        Self {
            a2: 1.0,
            a4: 1.0,
            scale: 1000.0,
        }
    }
}

/// The angle-ordered fit input: one (cos theta, counts, error) triple per
/// valid angular index. The reserved index 0 never enters, so the vectors
/// hold 51 entries. Cosine errors are treated as zero throughout: the finite
/// angular width of an index bin is a documented simplification here, not a
/// propagated uncertainty.
pub struct AngularCorrelationSample {
    pub cos_theta: Vec<f64>,
    pub counts: Vec<f64>,
    pub errors: Vec<f64>,
}

impl AngularCorrelationSample {
    /// Builds the sample from index-aligned weighted count and error tables,
    /// dropping the reserved index 0.
    pub fn from_weighted(counts: &[f64; N_INDICES], errors: &[f64; N_INDICES]) -> Self {
        let cos = cosines();
        Self {
            cos_theta: cos[1..].to_vec(),
            counts: counts[1..].to_vec(),
            errors: errors[1..].to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.cos_theta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cos_theta.is_empty()
    }
}

/// Fitted truncated even Legendre series.
#[derive(Debug, Copy, Clone)]
pub struct CorrelationFitResult {
    pub a2: f64,
    pub a4: f64,
    pub scale: f64,
    pub a2_err: f64,
    pub a4_err: f64,
    pub scale_err: f64,
    pub chi2: f64,
    pub ndf: usize,
    /// False for a degenerate fit (e.g. a singular covariance). The
    /// statistics above are still meaningful diagnostics and are always
    /// reported; a degenerate correlation fit is never fatal to a run.
    pub converged: bool,
}

/// The correlation model: scale * (1 + a2 * P2(x) + a4 * P4(x)).
pub fn legendre_series(params: &[f64], x: f64) -> f64 {
    let x2 = x * x;
    let p2 = (3.0 * x2 - 1.0) / 2.0;
    let p4 = (35.0 * x2 * x2 - 30.0 * x2 + 3.0) / 8.0;
    params[2] * (1.0 + params[0] * p2 + params[1] * p4)
}

/// Fits the weighted counts against cos theta with count errors as weights.
///
/// Poor convergence is reported through the result, never raised: the caller
/// forwards chi-square and the parameter errors to the log so a human can
/// judge the fit.
pub fn fit_correlation(
    sample: &AngularCorrelationSample,
    seeds: &CorrelationSeeds,
) -> CorrelationFitResult {
    let initial = [seeds.a2, seeds.a4, seeds.scale];
    let report = curve_fit(
        legendre_series,
        &sample.cos_theta,
        &sample.counts,
        &sample.errors,
        &initial,
    );
    let degenerate = report.errors.iter().any(|e| !e.is_finite());

    CorrelationFitResult {
        a2: report.params[0],
        a4: report.params[1],
        scale: report.params[2],
        a2_err: report.errors[0],
        a4_err: report.errors[1],
        scale_err: report.errors[2],
        chi2: report.chi2,
        ndf: report.ndf,
        converged: report.converged && !degenerate,
    }
}
