use crate::cube::EnergySpectrum;
use crate::fitting::curve_fit;

/// Extra keV added on both sides of the fit window beyond the tolerance, so
/// the background parameters see sidebands around the peak.
const FIT_MARGIN_KEV: f64 = 5.0;

/// Minimum number of windowed bins for a fit to be attempted at all.
const MIN_FIT_BINS: usize = 8;

/// Domain-tuned initial guesses for the peak shape.
///
/// These are seeds, not physics: height is of order the photo-peak amplitude
/// in counts per bin and sigma of order the detector resolution in keV. The
/// skew tail constant `beta` is held fixed during the fit.
#[derive(Debug, Copy, Clone)]
pub struct PeakSeeds {
    pub sigma: f64,
    pub height: f64,
    pub skew_beta: f64,
}

impl Default for PeakSeeds {
    fn default() -> Self {
        Self {
            sigma: 1.0,
            height: 1e4,
            skew_beta: 2.0,
        }
    }
}

/// Background-subtracted integral of one fitted photo-peak.
#[derive(Debug, Copy, Clone)]
pub struct PeakFitResult {
    pub integrated_counts: f64,
    /// Covariance-derived area uncertainty where available, Poisson
    /// square-root otherwise. The per-index weighting stage applies its own
    /// `sqrt(raw)/multiplicity` error, so this value is diagnostic only.
    pub uncertainty: f64,
    /// Fitted `[height, centroid, sigma, skew_frac, bg0, bg1]`; all zero for
    /// a failed fit. Feed them back through `peak_shape` to redraw the curve.
    pub params: [f64; 6],
    pub converged: bool,
}

impl PeakFitResult {
    fn failed() -> Self {
        Self {
            integrated_counts: 0.0,
            uncertainty: 0.0,
            params: [0.0; 6],
            converged: false,
        }
    }
}

/// The `[low, high]` keV window a fit at `peak_energy` covers.
pub fn fit_window(peak_energy: f64, tolerance: f64) -> (f64, f64) {
    (
        peak_energy - tolerance - FIT_MARGIN_KEV,
        peak_energy + tolerance + FIT_MARGIN_KEV,
    )
}

/// Fits a skewed Gaussian plus linear background around `peak_energy` and
/// integrates the background-subtracted shape over the window.
///
/// The window is `[peak - tolerance - 5, peak + tolerance + 5]` keV. An
/// empty or nearly empty window, or a fit that never converges, yields
/// `converged == false`; the caller must treat that as fatal to the current
/// peak pair, not as something to retry.
///
/// Model, with d = x - centroid:
///   H * [exp(-d^2 / 2s^2) + r * exp(d / beta) * erfc(d/(s sqrt2) + s/(beta sqrt2))]
///     + b0 + b1 * x
/// Free parameters are [H, centroid, s, r, b0, b1]; beta comes from the
/// seeds and stays fixed.
pub fn fit_peak(
    spectrum: &EnergySpectrum,
    peak_energy: f64,
    tolerance: f64,
    seeds: &PeakSeeds,
) -> PeakFitResult {
    let (low, high) = fit_window(peak_energy, tolerance);
    let (xs, ys) = spectrum.windowed(low, high);

    let total: f64 = ys.iter().sum();
    if xs.len() < MIN_FIT_BINS || total <= 0.0 {
        return PeakFitResult::failed();
    }

    // Poisson uncertainty per bin; empty bins get unit weight via sigma 1.
    let sigma: Vec<f64> = ys.iter().map(|&c| c.max(1.0).sqrt()).collect();

    let beta = seeds.skew_beta;
    let model = move |p: &[f64], x: f64| peak_shape(p, beta, x);
    let initial = [seeds.height, peak_energy, seeds.sigma, 0.0, 0.0, 0.0];
    let report = curve_fit(&model, &xs, &ys, &sigma, &initial);
    if !report.converged {
        return PeakFitResult::failed();
    }

    // Integrate (model - background) over the windowed bins. Counts are per
    // bin, so the plain sum is already in counts.
    let area: f64 = xs
        .iter()
        .map(|&x| model(&report.params, x) - background(&report.params, x))
        .sum::<f64>()
        .max(0.0);

    let height = report.params[0];
    let height_err = report.errors[0];
    let uncertainty = if height_err.is_finite() && height.abs() > 0.0 {
        (area * height_err / height).abs()
    } else {
        area.sqrt()
    };

    let mut params = [0.0; 6];
    params.copy_from_slice(&report.params);
    PeakFitResult {
        integrated_counts: area,
        uncertainty,
        params,
        converged: true,
    }
}

/// Evaluates the peak model at `x` for parameters
/// `[height, centroid, sigma, skew_frac, bg0, bg1]` and fixed tail `beta`.
pub fn peak_shape(p: &[f64], beta: f64, x: f64) -> f64 {
    let height = p[0];
    let centroid = p[1];
    let s = p[2].abs().max(1e-6);
    let skew = p[3];
    let d = x - centroid;

    let gauss = (-d * d / (2.0 * s * s)).exp();
    let tail = skew * (d / beta).min(650.0).exp()
        * erfc(d / (s * std::f64::consts::SQRT_2) + s / (beta * std::f64::consts::SQRT_2));
    height * (gauss + tail) + background(p, x)
}

fn background(p: &[f64], x: f64) -> f64 {
    p[4] + p[5] * x
}

/// Complementary error function, Abramowitz & Stegun 7.1.26.
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * z);
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    let tail = poly * (-z * z).exp();
    if x >= 0.0 {
        tail
    } else {
        2.0 - tail
    }
}
