use crate::geometry::{multiplicity, N_INDICES};

/// Rescales raw per-index counts by the detector-pair multiplicity.
///
/// For every valid index i, `norm[i] = raw[i] / m(i)` and
/// `err[i] = sqrt(raw[i]) / m(i)` with the Poisson error taken on the raw
/// counts before scaling. Index 0 is the reserved slot and stays zero in
/// both outputs.
pub fn weight(raw: &[f64; N_INDICES]) -> ([f64; N_INDICES], [f64; N_INDICES]) {
    let mut counts = [0.0; N_INDICES];
    let mut errors = [0.0; N_INDICES];
    for i in 1..N_INDICES {
        let factor = multiplicity(i).factor();
        counts[i] = raw[i] / factor;
        errors[i] = raw[i].max(0.0).sqrt() / factor;
    }
    (counts, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighting_is_exact_division_by_the_class_factor() {
        let mut raw = [0.0; N_INDICES];
        for (i, v) in raw.iter_mut().enumerate() {
            *v = (i * i) as f64;
        }
        let (counts, errors) = weight(&raw);
        for i in 1..N_INDICES {
            let m = multiplicity(i).factor();
            assert_eq!(counts[i], raw[i] / m, "counts at {}", i);
            assert_eq!(errors[i], raw[i].sqrt() / m, "errors at {}", i);
        }
    }

    #[test]
    fn reserved_index_stays_zero() {
        let mut raw = [10.0; N_INDICES];
        raw[0] = 1e6;
        let (counts, errors) = weight(&raw);
        assert_eq!(counts[0], 0.0);
        assert_eq!(errors[0], 0.0);
    }

    #[test]
    fn known_factor_spot_checks() {
        let mut raw = [0.0; N_INDICES];
        raw[1] = 1280.0; // index 1 belongs to the 128-pair class
        raw[5] = 480.0; // index 5 belongs to the 48-pair class
        let (counts, _) = weight(&raw);
        assert_eq!(counts[1], 10.0);
        assert_eq!(counts[5], 10.0);
    }
}
