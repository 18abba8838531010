use ndarray::Axis;

use crate::cube::{CoincidenceCube, EnergySpectrum};
use crate::errors::Error;
use crate::geometry::N_INDICES;

/// Isolates the coincident-energy spectrum for one angular index.
///
/// Restricts the cube to the single angular-index bin `[index, index + 1)`,
/// restricts the gate energy axis to `[gate - tolerance, gate + tolerance]`
/// and sums both restricted axes away, leaving a 1D distribution over the
/// coincident energy. The cube is only read, never mutated.
///
/// ## Parameters
///    - cube: the loaded 3D coincidence histogram
///    - index: angular index in `1..=51`; index 0 is the reserved
///      self-coincidence slot and is rejected
///    - gate_energy: gate peak centroid in keV
///    - gate_tolerance: half-width of the gate window in keV
pub fn slice(
    cube: &CoincidenceCube,
    index: usize,
    gate_energy: f64,
    gate_tolerance: f64,
) -> Result<EnergySpectrum, Error> {
    if index == 0 || index >= N_INDICES {
        return Err(Error::InvalidIndex(index));
    }
    let low = gate_energy - gate_tolerance;
    let high = gate_energy + gate_tolerance;
    let (gate_lo, gate_hi) = cube
        .axis
        .window(low, high, cube.n_energy_bins())
        .ok_or(Error::EmptyWindow { low, high })?;

    // Gate on axis 0, pick the single index bin on axis 2, then project the
    // gate axis out so only the coincident energy axis survives.
    let gated = cube
        .hist
        .slice(ndarray::s![gate_lo..=gate_hi, .., index]);
    let counts = gated.sum_axis(Axis(0));

    Ok(EnergySpectrum::new(counts.to_vec(), &cube.axis))
}
