use std::io;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("File {0} does not exist.")]
    FileNotAvailable(String),
    #[error("IO error.")]
    IOError(#[from] io::Error),
    #[error("Dataset {0} is missing from the input archive.")]
    DatasetMissing(String),
    #[error("Could not read the npz archive.")]
    NpzRead(#[from] ndarray_npy::ReadNpzError),
    #[error("Could not write the npz archive.")]
    NpzWrite(#[from] ndarray_npy::WriteNpzError),
    #[error("Angular index {0} is outside the valid range 1..=51.")]
    InvalidIndex(usize),
    #[error("Coincidence cube has shape {0:?}, expected (n, n, 52).")]
    BadCubeShape(Vec<usize>),
    #[error("The energy_axis table must hold [min_keV, keV_per_bin], got {0} values.")]
    BadEnergyAxis(usize),
    #[error("Energy window [{low}, {high}] keV lies outside the spectrum.")]
    EmptyWindow { low: f64, high: f64 },
}
