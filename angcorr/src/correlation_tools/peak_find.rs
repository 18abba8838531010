use crate::cube::EnergySpectrum;

/// Half-width in bins of the neighborhood used for the prominence estimate.
const PROMINENCE_WINDOW: usize = 10;

/// Finds the positions (in keV) of the most significant peaks in a 1D
/// spectrum, feeding the auto-detect entry point of the pipeline.
///
/// A three-bin moving average suppresses single-bin noise, strict local
/// maxima of the smoothed spectrum become candidates, and each candidate is
/// ranked by its height above the lowest smoothed bin within +/-10 bins,
/// scaled by the Poisson fluctuation of that floor. Up to `max_peaks`
/// positions come back ordered by decreasing significance.
pub fn find_peaks(spectrum: &EnergySpectrum, max_peaks: usize) -> Vec<f64> {
    let n = spectrum.counts.len();
    if n < 2 * PROMINENCE_WINDOW + 1 || max_peaks == 0 {
        return Vec::new();
    }

    let smoothed: Vec<f64> = (0..n)
        .map(|i| {
            let lo = i.saturating_sub(1);
            let hi = (i + 1).min(n - 1);
            let span = (hi - lo + 1) as f64;
            spectrum.counts[lo..=hi].iter().sum::<f64>() / span
        })
        .collect();

    let mut candidates: Vec<(f64, f64)> = Vec::new(); // (significance, energy)
    for i in 1..n - 1 {
        if !(smoothed[i] > smoothed[i - 1] && smoothed[i] >= smoothed[i + 1]) {
            continue;
        }
        let lo = i.saturating_sub(PROMINENCE_WINDOW);
        let hi = (i + PROMINENCE_WINDOW).min(n - 1);
        let floor = smoothed[lo..=hi]
            .iter()
            .cloned()
            .fold(f64::INFINITY, f64::min);
        let prominence = smoothed[i] - floor;
        let significance = prominence / (floor + 1.0).sqrt();
        if significance > 3.0 {
            candidates.push((significance, spectrum.energies[i]));
        }
    }

    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    candidates
        .into_iter()
        .take(max_peaks)
        .map(|(_, energy)| energy)
        .collect()
}
