use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{App, Arg};

use angcorr::correlation_tools::peak_find::find_peaks;
use angcorr::correlation_tools::pipeline::{run, AnalysisConfig, JobOutcome};
use angcorr::cube::{load_singles, CoincidenceCube, Dataset};

fn main() -> anyhow::Result<()> {
    let matches = App::new("ggac")
        .version("0.1.0")
        .about("Extracts gamma-gamma angular correlation coefficients from a coincidence cube.")
        .arg(
            Arg::with_name("input")
                .short("i")
                .long("input")
                .takes_value(true)
                .required(true)
                .help("Input npz archive holding the coincidence cube"),
        )
        .arg(
            Arg::with_name("output-dir")
                .short("o")
                .long("output-dir")
                .takes_value(true)
                .default_value(".")
                .help("Directory for fit.txt and the per-pair artifacts"),
        )
        .arg(
            Arg::with_name("peaks")
                .long("peaks")
                .takes_value(true)
                .help("Comma separated peak energies in keV, e.g. 1172,1332"),
        )
        .arg(
            Arg::with_name("auto-peaks")
                .long("auto-peaks")
                .takes_value(true)
                .conflicts_with("peaks")
                .help("Detect up to N peaks from the summed singles spectrum"),
        )
        .arg(
            Arg::with_name("addback")
                .long("addback")
                .help("Use the addback coincidence table"),
        )
        .arg(
            Arg::with_name("save-extra")
                .long("save-extra")
                .help("Also save the per-index sliced spectra"),
        )
        .arg(
            Arg::with_name("gate-tolerance")
                .long("gate-tolerance")
                .takes_value(true)
                .default_value("6")
                .help("Gate window half-width in keV"),
        )
        .arg(
            Arg::with_name("energy-tolerance")
                .long("energy-tolerance")
                .takes_value(true)
                .default_value("6")
                .help("Coincident peak window half-width in keV"),
        )
        .get_matches();

    let input = PathBuf::from(matches.value_of("input").unwrap());
    let mut config = AnalysisConfig::default();
    config.output_dir = PathBuf::from(matches.value_of("output-dir").unwrap());
    config.addback = matches.is_present("addback");
    config.save_extra = matches.is_present("save-extra");
    config.gate_tolerance = matches
        .value_of("gate-tolerance")
        .unwrap()
        .parse()
        .context("gate-tolerance must be a number of keV")?;
    config.energy_tolerance = matches
        .value_of("energy-tolerance")
        .unwrap()
        .parse()
        .context("energy-tolerance must be a number of keV")?;
    if let Some(n) = matches.value_of("auto-peaks") {
        config.max_peaks = n.parse().context("auto-peaks must be an integer")?;
    }

    let dataset = if config.addback {
        Dataset::Addback
    } else {
        Dataset::Crystal
    };
    let cube = CoincidenceCube::from_file(&input, dataset)?;
    println!("File Loaded");

    let peaks: Vec<f64> = match matches.value_of("peaks") {
        Some(list) => list
            .split(',')
            .map(|e| e.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .context("peaks must be comma separated energies in keV")?,
        None => {
            let singles = load_singles(&input)?;
            let found = find_peaks(&singles, config.max_peaks);
            println!(
                "Detected peaks: {}",
                found
                    .iter()
                    .map(|e| format!("{:.1}", e))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            found
        }
    };
    if peaks.len() < 2 {
        bail!("need at least two peak energies to form a pair");
    }

    let start = Instant::now();
    let reports = run(&cube, &peaks, &config)?;
    eprintln!("elapsed {:?}", start.elapsed());

    let failed = reports
        .iter()
        .filter(|r| matches!(r.outcome, JobOutcome::PeakFitFailed { .. }))
        .count();
    println!(
        "{} pairs analyzed, {} skipped on failed peak fits",
        reports.len() - failed,
        failed
    );
    Ok(())
}
