//! Static geometry tables for the 52 detector-pair angular indices.
//!
//! The array groups every ordered crystal pair into one of 52 opening-angle
//! classes. Index 0 is the self-coincidence slot and never carries physical
//! data. Both tables below are fixed by the array geometry and are never
//! recomputed at run time.

use num_traits::ToPrimitive;

/// Number of angular index bins, including the reserved index 0.
pub const N_INDICES: usize = 52;

/// Opening angle in degrees for each angular index. Index 0 has no physical
/// angle and is kept at 0.0 so the table stays index-aligned.
pub const ANGLES_DEG: [f64; N_INDICES] = [
    0.0, 18.79097, 25.60153, 26.69036, 31.94623, 33.65414, 44.36426, 46.79372,
    48.57554, 49.79788, 53.83362, 60.15106, 62.70487, 63.08604, 65.01569,
    66.46082, 67.45617, 69.86404, 70.86009, 73.08384, 76.38138, 78.66898,
    83.04252, 86.22840, 86.23761, 88.47356, 91.52644, 93.76239, 93.77160,
    96.95749, 101.33102, 103.61822, 106.91616, 109.13991, 110.13596,
    112.54383, 113.53918, 114.98431, 116.91396, 117.29513, 119.84894,
    126.16638, 130.20212, 131.42446, 133.20628, 135.63574, 146.34586,
    148.05377, 153.30964, 154.39847, 161.21315, 180.0,
];

/// Number of physically equivalent crystal pairs mapping onto one angular
/// index. The discriminant is the pair count itself.
#[derive(FromPrimitive, ToPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplicity {
    M48 = 48,
    M64 = 64,
    M96 = 96,
    M128 = 128,
}

impl Multiplicity {
    /// The weight factor as a float, ready for count normalization.
    pub fn factor(self) -> f64 {
        // Infallible for a C-like enum.
        self.to_f64().unwrap()
    }
}

/// Multiplicity class per angular index. Index 0 gets the most common class
/// as a placeholder; it is excluded from every weighted sum and fit.
pub const MULTIPLICITY: [Multiplicity; N_INDICES] = {
    use Multiplicity::*;
    [
        M64, M128, M64, M64, M64, M48, M128, M96, M128, M96, M48, M96, M48,
        M64, M96, M64, M64, M64, M96, M64, M96, M64, M64, M64, M48, M128,
        M128, M48, M64, M64, M64, M96, M64, M96, M64, M64, M64, M96, M64,
        M48, M96, M48, M96, M128, M96, M128, M48, M64, M64, M64, M128, M64,
    ]
};

/// Weight factor for one angular index.
pub fn multiplicity(index: usize) -> Multiplicity {
    MULTIPLICITY[index]
}

/// Cosine of the opening angle for every angular index.
pub fn cosines() -> [f64; N_INDICES] {
    let mut cos = [0.0; N_INDICES];
    for (c, deg) in cos.iter_mut().zip(ANGLES_DEG.iter()) {
        *c = (deg * std::f64::consts::PI / 180.0).cos();
    }
    cos
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn partition_is_exhaustive_over_valid_indices() {
        for i in 1..N_INDICES {
            let factor = multiplicity(i).factor();
            assert!(
                factor == 48.0 || factor == 64.0 || factor == 96.0 || factor == 128.0,
                "index {} has factor {}",
                i,
                factor
            );
        }
    }

    #[test]
    fn class_lists_match_array_geometry() {
        let m128 = [1, 6, 8, 25, 26, 43, 45, 50];
        let m48 = [5, 10, 12, 24, 27, 39, 41, 46];
        let m96 = [7, 9, 11, 14, 18, 20, 31, 33, 37, 40, 42, 44];
        for i in 1..N_INDICES {
            let expected = if m128.contains(&i) {
                Multiplicity::M128
            } else if m48.contains(&i) {
                Multiplicity::M48
            } else if m96.contains(&i) {
                Multiplicity::M96
            } else {
                Multiplicity::M64
            };
            assert_eq!(multiplicity(i), expected, "index {}", i);
        }
    }

    #[test]
    fn multiplicity_round_trips_through_its_discriminant() {
        for class in [
            Multiplicity::M48,
            Multiplicity::M64,
            Multiplicity::M96,
            Multiplicity::M128,
        ]
        .iter()
        {
            let factor = class.factor() as u32;
            assert_eq!(Multiplicity::from_u32(factor), Some(*class));
        }
    }

    #[test]
    fn angles_are_monotonic_and_span_the_sphere() {
        for i in 2..N_INDICES {
            assert!(ANGLES_DEG[i] > ANGLES_DEG[i - 1]);
        }
        assert_eq!(ANGLES_DEG[51], 180.0);
        let cos = cosines();
        assert!((cos[51] + 1.0).abs() < 1e-12);
    }
}
