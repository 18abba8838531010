//! Loading of the coincidence cube from its persistent container.
//!
//! The container is an npz archive holding the 3D coincidence histogram as a
//! named table plus a two-entry `energy_axis` table describing the (shared)
//! binning of both energy axes. The cube is immutable after load; all slicing
//! work in `correlation_tools` goes through read-only views of it.

use std::fs;
use std::path::Path;

use ndarray::{Array1, Array3, ArrayBase, DataOwned, Dimension};
use ndarray_npy::{NpzReader, ReadableElement};

use crate::errors::Error;
use crate::geometry::N_INDICES;

/// Crystal-resolved coincidence table.
pub const CRYSTAL_TABLE: &str = "gg_cry";
/// Addback coincidence table (adjacent-crystal depositions summed before
/// angular binning).
pub const ADDBACK_TABLE: &str = "gg_addback";
/// Energy axis metadata table: `[min_keV, keV_per_bin]`.
pub const AXIS_TABLE: &str = "energy_axis";
/// Summed singles spectrum, input to peak auto-detection.
pub const SINGLES_TABLE: &str = "edep_sum";

/// Which coincidence table an analysis run reads.
#[derive(Debug, Copy, Clone)]
pub enum Dataset {
    Crystal,
    Addback,
}

impl Dataset {
    pub fn table_name(self) -> &'static str {
        match self {
            Dataset::Crystal => CRYSTAL_TABLE,
            Dataset::Addback => ADDBACK_TABLE,
        }
    }
}

/// Linear energy binning shared by both energy axes of the cube.
#[derive(Debug, Copy, Clone)]
pub struct EnergyAxis {
    pub min: f64,
    pub bin_width: f64,
}

impl EnergyAxis {
    /// Center of bin `i` in keV.
    pub fn center(&self, bin: usize) -> f64 {
        self.min + (bin as f64 + 0.5) * self.bin_width
    }

    /// Inclusive bin range covering `[low, high]`, clamped to the axis.
    /// Returns None when the window misses the axis entirely.
    pub fn window(&self, low: f64, high: f64, n_bins: usize) -> Option<(usize, usize)> {
        if n_bins == 0 || high < low {
            return None;
        }
        let lo = ((low - self.min) / self.bin_width).floor() as i64;
        let hi = ((high - self.min) / self.bin_width).floor() as i64;
        if hi < 0 || lo >= n_bins as i64 {
            return None;
        }
        let lo = lo.max(0) as usize;
        let hi = (hi.min(n_bins as i64 - 1)) as usize;
        Some((lo, hi))
    }
}

/// The 3D coincidence histogram over (energy1, energy2, angular index).
///
/// Shape is `(n_e, n_e, 52)`. Loaded once per run and shared read-only with
/// the slicer; nothing downstream mutates it.
pub struct CoincidenceCube {
    pub hist: Array3<f64>,
    pub axis: EnergyAxis,
}

impl CoincidenceCube {
    /// Loads the selected coincidence table from an npz archive.
    ///
    /// A missing file or missing table is fatal to the whole run, matching
    /// the DataUnavailable class of failures.
    pub fn from_file(path: &Path, dataset: Dataset) -> Result<Self, Error> {
        if !path.exists() {
            return Err(Error::FileNotAvailable(path.display().to_string()));
        }
        let mut npz = NpzReader::new(fs::File::open(path)?)?;
        let hist: Array3<f64> = read_table(&mut npz, dataset.table_name())?;
        let axis = read_axis(&mut npz)?;

        let shape = hist.shape();
        if shape[2] != N_INDICES || shape[0] != shape[1] {
            return Err(Error::BadCubeShape(shape.to_vec()));
        }
        Ok(Self { hist, axis })
    }

    pub fn n_energy_bins(&self) -> usize {
        self.hist.shape()[0]
    }
}

/// A 1D count distribution over energy.
///
/// Ephemeral: produced per (angular index, gate peak) by the slicer or read
/// from the singles table, consumed by the peak fitter, then dropped.
pub struct EnergySpectrum {
    pub energies: Vec<f64>,
    pub counts: Vec<f64>,
}

impl EnergySpectrum {
    /// Builds a spectrum from per-bin counts on a given axis.
    pub fn new(counts: Vec<f64>, axis: &EnergyAxis) -> Self {
        let energies = (0..counts.len()).map(|i| axis.center(i)).collect();
        Self { energies, counts }
    }

    /// The (energy, counts) points falling inside `[low, high]`.
    pub fn windowed(&self, low: f64, high: f64) -> (Vec<f64>, Vec<f64>) {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for (&e, &c) in self.energies.iter().zip(self.counts.iter()) {
            if e >= low && e <= high {
                xs.push(e);
                ys.push(c);
            }
        }
        (xs, ys)
    }

    pub fn total_counts(&self) -> f64 {
        self.counts.iter().sum()
    }
}

/// Reads the summed singles spectrum used for peak auto-detection.
pub fn load_singles(path: &Path) -> Result<EnergySpectrum, Error> {
    if !path.exists() {
        return Err(Error::FileNotAvailable(path.display().to_string()));
    }
    let mut npz = NpzReader::new(fs::File::open(path)?)?;
    let counts: Array1<f64> = read_table(&mut npz, SINGLES_TABLE)?;
    let axis = read_axis(&mut npz)?;
    Ok(EnergySpectrum::new(counts.to_vec(), &axis))
}

fn read_axis(npz: &mut NpzReader<fs::File>) -> Result<EnergyAxis, Error> {
    let raw: Array1<f64> = read_table(npz, AXIS_TABLE)?;
    if raw.len() != 2 {
        return Err(Error::BadEnergyAxis(raw.len()));
    }
    Ok(EnergyAxis {
        min: raw[0],
        bin_width: raw[1],
    })
}

/// Looks a table up by name, tolerating the `.npy` suffix numpy's savez
/// appends to archive members.
fn read_table<S, D>(npz: &mut NpzReader<fs::File>, name: &str) -> Result<ArrayBase<S, D>, Error>
where
    S: DataOwned,
    S::Elem: ReadableElement,
    D: Dimension,
{
    if let Ok(arr) = npz.by_name(name) {
        return Ok(arr);
    }
    npz.by_name(&format!("{}.npy", name))
        .map_err(|_| Error::DatasetMissing(name.to_string()))
}
