use std::fs;
use std::io::Write;
use std::path::PathBuf;

use ndarray::{Array1, Array2};
use ndarray_npy::NpzWriter;

use crate::correlation_tools::legendre::{
    fit_correlation, legendre_series, AngularCorrelationSample, CorrelationFitResult,
    CorrelationSeeds,
};
use crate::correlation_tools::peak_fit::{
    fit_peak, fit_window, peak_shape, PeakFitResult, PeakSeeds,
};
use crate::correlation_tools::slicer;
use crate::correlation_tools::weights;
use crate::cube::{CoincidenceCube, EnergySpectrum};
use crate::errors::Error;
use crate::geometry::N_INDICES;

/// Run-wide settings, passed in explicitly instead of living in process
/// globals. Defaults carry the standard tolerances of 6 keV on both the gate
/// and the coincident window.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub output_dir: PathBuf,
    pub gate_tolerance: f64,
    pub energy_tolerance: f64,
    /// Also persist the per-index sliced spectra for each gate peak and the
    /// fitted peak curves for each pair.
    pub save_extra: bool,
    /// Read the addback coincidence table instead of the crystal one.
    pub addback: bool,
    /// Cap for the peak auto-detection entry point.
    pub max_peaks: usize,
    pub peak_seeds: PeakSeeds,
    pub correlation_seeds: CorrelationSeeds,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            gate_tolerance: 6.0,
            energy_tolerance: 6.0,
            save_extra: false,
            addback: false,
            max_peaks: 10,
            peak_seeds: PeakSeeds::default(),
            correlation_seeds: CorrelationSeeds::default(),
        }
    }
}

/// One unit of work: a gate peak and a coincident peak, both in keV.
#[derive(Debug, Copy, Clone)]
pub struct PeakPairJob {
    pub gate: f64,
    pub coincident: f64,
}

/// Terminal state of one job. A failed peak fit short-circuits the
/// weighting and correlation stages for that job only; the run continues
/// with the next pair.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The per-index peak fit at this angular index did not converge.
    PeakFitFailed { index: usize },
    Correlated(CorrelationFitResult),
}

#[derive(Debug, Clone)]
pub struct PairReport {
    pub job: PeakPairJob,
    pub outcome: JobOutcome,
}

/// Drives the full extraction over every unordered pair of the peak list.
///
/// For each gate peak the 51 angular slices are computed once and reused for
/// every coincident peak paired with it. Jobs run strictly sequentially; the
/// per-pair diagnostic line goes to the console and to `fit.txt` in the
/// output directory, opened in append mode for the duration of the run.
pub fn run(
    cube: &CoincidenceCube,
    peaks: &[f64],
    config: &AnalysisConfig,
) -> Result<Vec<PairReport>, Error> {
    fs::create_dir_all(&config.output_dir)?;
    let mut log = fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(config.output_dir.join("fit.txt"))?;

    let mut reports = Vec::new();
    for (i, &gate) in peaks.iter().enumerate() {
        if i + 1 == peaks.len() {
            break;
        }
        let slices = slice_gate(cube, gate, config)?;
        if config.save_extra {
            save_slices(&slices, gate, config)?;
        }
        for &coincident in &peaks[i + 1..] {
            let job = PeakPairJob { gate, coincident };
            let report = run_job(&slices, job, config, &mut log)?;
            reports.push(report);
        }
    }
    Ok(reports)
}

/// The 51 per-index spectra for one gate peak, in angular-index order
/// starting at index 1.
fn slice_gate(
    cube: &CoincidenceCube,
    gate: f64,
    config: &AnalysisConfig,
) -> Result<Vec<EnergySpectrum>, Error> {
    (1..N_INDICES)
        .map(|index| slicer::slice(cube, index, gate, config.gate_tolerance))
        .collect()
}

/// One pass of the SLICED -> FIT -> WEIGHTED -> CORRELATED chain.
fn run_job(
    slices: &[EnergySpectrum],
    job: PeakPairJob,
    config: &AnalysisConfig,
    log: &mut fs::File,
) -> Result<PairReport, Error> {
    let mut raw = [0.0; N_INDICES];
    let mut fits = Vec::with_capacity(slices.len());
    for (offset, spectrum) in slices.iter().enumerate() {
        let index = offset + 1;
        let fit = fit_peak(
            spectrum,
            job.coincident,
            config.energy_tolerance,
            &config.peak_seeds,
        );
        if !fit.converged {
            let line = format!(
                "Gate Peak: {}, Coincident Peak: {}, No data error.",
                job.gate, job.coincident
            );
            println!("{}", line);
            writeln!(log, "{}", line)?;
            return Ok(PairReport {
                job,
                outcome: JobOutcome::PeakFitFailed { index },
            });
        }
        raw[index] = fit.integrated_counts;
        fits.push(fit);
    }
    if config.save_extra {
        save_peak_fits(slices, &fits, job, config)?;
    }

    let (norm_counts, norm_errors) = weights::weight(&raw);
    let sample = AngularCorrelationSample::from_weighted(&norm_counts, &norm_errors);
    let fit = fit_correlation(&sample, &config.correlation_seeds);

    let line = format!(
        "Gate Peak: {}, Coincident Peak: {}, chi2: {:.4}/{}, a2: {:.4}\u{b1}{:.4}, a4: {:.4}\u{b1}{:.4}, scale: {:.4}\u{b1}{:.4}",
        job.gate,
        job.coincident,
        fit.chi2,
        fit.ndf,
        fit.a2,
        fit.a2_err,
        fit.a4,
        fit.a4_err,
        fit.scale,
        fit.scale_err
    );
    println!("{}", line);
    writeln!(log, "{}", line)?;

    save_correlation(&sample, &fit, job, config)?;
    Ok(PairReport {
        job,
        outcome: JobOutcome::Correlated(fit),
    })
}

/// Persists the correlation curve for one pair: the sample points, the
/// fitted curve sampled over cos theta in [-1, 1] and the fit parameters.
fn save_correlation(
    sample: &AngularCorrelationSample,
    fit: &CorrelationFitResult,
    job: PeakPairJob,
    config: &AnalysisConfig,
) -> Result<(), Error> {
    let path = config
        .output_dir
        .join(format!("ggac_{}-{}.npz", job.gate, job.coincident));
    let mut npz = NpzWriter::new(fs::File::create(path)?);

    npz.add_array("cos_theta", &Array1::from(sample.cos_theta.clone()))?;
    npz.add_array("counts", &Array1::from(sample.counts.clone()))?;
    npz.add_array("errors", &Array1::from(sample.errors.clone()))?;

    let params = [fit.a2, fit.a4, fit.scale];
    let curve_x: Vec<f64> = (0..=200).map(|i| -1.0 + (i as f64) / 100.0).collect();
    let curve_y: Vec<f64> = curve_x.iter().map(|&x| legendre_series(&params, x)).collect();
    npz.add_array("fit_cos", &Array1::from(curve_x))?;
    npz.add_array("fit_curve", &Array1::from(curve_y))?;
    npz.add_array("fit_params", &Array1::from(params.to_vec()))?;
    npz.add_array(
        "fit_param_errors",
        &Array1::from(vec![fit.a2_err, fit.a4_err, fit.scale_err]),
    )?;
    npz.add_array("fit_stats", &Array1::from(vec![fit.chi2, fit.ndf as f64]))?;
    npz.finish()?;
    Ok(())
}

/// Persists the fitted coincident-peak model for one pair (save-extra only):
/// the fit-window bin centers, one fitted curve per angular index sampled at
/// those centers, the fitted parameters and the integrated areas.
fn save_peak_fits(
    slices: &[EnergySpectrum],
    fits: &[PeakFitResult],
    job: PeakPairJob,
    config: &AnalysisConfig,
) -> Result<(), Error> {
    let path = config
        .output_dir
        .join(format!("fits_{}-{}.npz", job.gate, job.coincident));
    let mut npz = NpzWriter::new(fs::File::create(path)?);

    // All slices share the cube's energy axis, so one window serves them all.
    let (low, high) = fit_window(job.coincident, config.energy_tolerance);
    let (energies, _) = slices[0].windowed(low, high);

    let beta = config.peak_seeds.skew_beta;
    let mut curves = Array2::<f64>::zeros((fits.len(), energies.len()));
    let mut params = Array2::<f64>::zeros((fits.len(), 6));
    for (row, fit) in fits.iter().enumerate() {
        for (col, &x) in energies.iter().enumerate() {
            curves[[row, col]] = peak_shape(&fit.params, beta, x);
        }
        for (col, &p) in fit.params.iter().enumerate() {
            params[[row, col]] = p;
        }
    }

    npz.add_array("energy", &Array1::from(energies))?;
    npz.add_array("fit_curves", &curves)?;
    npz.add_array("fit_params", &params)?;
    npz.add_array(
        "areas",
        &Array1::from_iter(fits.iter().map(|f| f.integrated_counts)),
    )?;
    npz.add_array(
        "area_errors",
        &Array1::from_iter(fits.iter().map(|f| f.uncertainty)),
    )?;
    npz.finish()?;
    Ok(())
}

/// Persists the raw per-index spectra for one gate peak (save-extra only).
fn save_slices(
    slices: &[EnergySpectrum],
    gate: f64,
    config: &AnalysisConfig,
) -> Result<(), Error> {
    let path = config.output_dir.join(format!("slices_{}.npz", gate));
    let mut npz = NpzWriter::new(fs::File::create(path)?);
    for (offset, spectrum) in slices.iter().enumerate() {
        npz.add_array(
            format!("index{}", offset + 1),
            &Array1::from(spectrum.counts.clone()),
        )?;
    }
    npz.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::EnergyAxis;
    use ndarray::Array3;
    use std::fs::File;
    use std::path::Path;

    fn test_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("angcorr_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    /// 250 energy bins covering 1150-1400 keV.
    fn test_axis() -> EnergyAxis {
        EnergyAxis {
            min: 1150.0,
            bin_width: 1.0,
        }
    }

    /// A cube with flat background everywhere and 1280 true coincidences at
    /// (1172, 1332) under angular index 1 (the 128-pair class).
    fn co60_cube() -> CoincidenceCube {
        let axis = test_axis();
        let n_e = 250;
        let mut hist = Array3::<f64>::from_elem((n_e, n_e, N_INDICES), 0.05);

        let gate_bin = 22; // 1172.5 keV center
        let sigma = 1.0;
        let offsets: Vec<i64> = (-6..=6).collect();
        let shape: Vec<f64> = offsets
            .iter()
            .map(|&k| {
                let d = axis.center((182 + k) as usize) - 1332.0;
                (-d * d / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        let shape_sum: f64 = shape.iter().sum();
        for (&k, &s) in offsets.iter().zip(shape.iter()) {
            hist[[gate_bin, (182 + k) as usize, 1]] += 1280.0 * s / shape_sum;
        }
        CoincidenceCube { hist, axis }
    }

    fn read_back(path: &Path, name: &str) -> Array1<f64> {
        let mut npz = ndarray_npy::NpzReader::new(File::open(path).unwrap()).unwrap();
        npz.by_name(name)
            .or_else(|_| npz.by_name(&format!("{}.npy", name)))
            .unwrap()
    }

    fn read_back_2d(path: &Path, name: &str) -> Array2<f64> {
        let mut npz = ndarray_npy::NpzReader::new(File::open(path).unwrap()).unwrap();
        npz.by_name(name)
            .or_else(|_| npz.by_name(&format!("{}.npy", name)))
            .unwrap()
    }

    #[test]
    fn end_to_end_single_populated_index() {
        let cube = co60_cube();
        let config = AnalysisConfig {
            output_dir: test_dir("e2e"),
            save_extra: true,
            ..AnalysisConfig::default()
        };

        let reports = run(&cube, &[1172.0, 1332.0], &config).unwrap();
        assert_eq!(reports.len(), 1);
        match &reports[0].outcome {
            JobOutcome::Correlated(fit) => {
                // A single populated angular bin cannot constrain a2/a4; the
                // fit must still complete and report its statistics.
                assert_eq!(fit.ndf, 48);
                assert!(fit.chi2.is_finite());
            }
            other => panic!("expected a correlation fit, got {:?}", other),
        }

        let artifact = config.output_dir.join("ggac_1172-1332.npz");
        assert!(artifact.exists());
        let counts = read_back(&artifact, "counts");
        assert_eq!(counts.len(), 51);
        // Sample position 0 is angular index 1: 1280 counts / 128 pairs.
        assert!(
            (counts[0] - 10.0).abs() < 0.5,
            "normalized counts at index 1: {}",
            counts[0]
        );
        for i in 1..51 {
            assert!(counts[i].abs() < 1.0, "index {} has {}", i + 1, counts[i]);
        }

        let log = fs::read_to_string(config.output_dir.join("fit.txt")).unwrap();
        assert!(log.contains("Gate Peak: 1172, Coincident Peak: 1332"));

        assert!(config.output_dir.join("slices_1172.npz").exists());

        // save_extra also writes the fitted coincident-peak curves per pair.
        let fits = config.output_dir.join("fits_1172-1332.npz");
        assert!(fits.exists());
        let areas = read_back(&fits, "areas");
        assert_eq!(areas.len(), 51);
        // Raw (pre-weighting) counts under index 1.
        assert!(
            (areas[0] - 1280.0).abs() / 1280.0 < 0.05,
            "fitted area at index 1: {}",
            areas[0]
        );
        let energies = read_back(&fits, "energy");
        let curves = read_back_2d(&fits, "fit_curves");
        assert_eq!(curves.nrows(), 51);
        assert_eq!(curves.ncols(), energies.len());
        // The fitted curve of the populated index peaks near 1332 keV.
        let row = curves.row(0);
        let peak_col = (0..energies.len())
            .max_by(|&a, &b| row[a].partial_cmp(&row[b]).unwrap())
            .unwrap();
        assert!((energies[peak_col] - 1332.0).abs() < 2.0);

        let _ = fs::remove_dir_all(&config.output_dir);
    }

    #[test]
    fn empty_cube_logs_the_pair_and_continues() {
        let axis = test_axis();
        let cube = CoincidenceCube {
            hist: Array3::<f64>::zeros((250, 250, N_INDICES)),
            axis,
        };
        let config = AnalysisConfig {
            output_dir: test_dir("empty"),
            ..AnalysisConfig::default()
        };

        let reports = run(&cube, &[1172.0, 1332.0, 1173.0], &config).unwrap();
        // Three peaks make three pairs; each fails its first peak fit but
        // none of them aborts the run.
        assert_eq!(reports.len(), 3);
        for report in &reports {
            assert!(matches!(
                report.outcome,
                JobOutcome::PeakFitFailed { index: 1 }
            ));
        }

        let log = fs::read_to_string(config.output_dir.join("fit.txt")).unwrap();
        assert_eq!(log.matches("No data error.").count(), 3);
        assert!(log.contains("Gate Peak: 1172, Coincident Peak: 1332, No data error."));
        let _ = fs::remove_dir_all(&config.output_dir);
    }
}
