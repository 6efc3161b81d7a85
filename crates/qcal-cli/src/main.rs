use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use miette::{Context, IntoDiagnostic};
use tracing_subscriber::filter::LevelFilter;

use qcal_core::{DEFAULT_NUM_BINS, QuantizationFactory, QuantizationScheme};
use qcal_observe::{
    CalibrationDataset, DumpInterval, HistogramObserver, MinMaxObserver, Observer, QParamsTable,
    read_dump,
};

/// qcal: quantization calibration for low-precision inference
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accumulate statistics from a directory of .bin sample files
    Collect {
        /// Directory of little-endian f32 `.bin` files, one per execution
        dir: PathBuf,

        /// Tensor identity recorded in the dump
        #[arg(short, long)]
        tensor: String,

        /// Statistics dump to write
        #[arg(short, long)]
        output: PathBuf,

        /// Record only min/max instead of a histogram
        #[arg(long)]
        minmax: bool,

        /// Number of histogram bins
        #[arg(long, default_value_t = DEFAULT_NUM_BINS)]
        bins: usize,
    },

    /// Compute quantization parameters from a statistics dump
    Params {
        /// Statistics dump produced by `collect` or an observer
        stats: PathBuf,

        /// Quantization scheme (e.g. min_max, l2, l2_approx, kl, p99, l1)
        #[arg(short, long, default_value = "min_max", value_parser = parse_scheme)]
        scheme: QuantizationScheme,

        /// Target bit-width
        #[arg(short, long, default_value_t = 8)]
        precision: u8,

        /// Keep 0.0 exactly representable
        #[arg(long)]
        preserve_sparsity: bool,

        /// Fraction of mass kept by the percentile scheme
        #[arg(long)]
        percentile: Option<f32>,

        /// Calibrate as weight tensors rather than activations
        #[arg(long)]
        weight: bool,

        /// Parameter table to write (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_scheme(s: &str) -> Result<QuantizationScheme, String> {
    s.parse::<QuantizationScheme>().map_err(|e| {
        let known: Vec<&str> = QuantizationScheme::ALL.iter().map(|s| s.name()).collect();
        format!("{e} (known: {})", known.join(", "))
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> miette::Result<()> {
    match command {
        Command::Collect {
            dir,
            tensor,
            output,
            minmax,
            bins,
        } => collect(dir, &tensor, output, minmax, bins),
        Command::Params {
            stats,
            scheme,
            precision,
            preserve_sparsity,
            percentile,
            weight,
            output,
        } => {
            let factory = QuantizationFactory::default();
            let mut config = factory.calibration_config(weight);
            config.precision = precision;
            config.preserve_sparsity = preserve_sparsity;
            config.percentile_threshold = percentile;

            let records = read_dump(&stats)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to load statistics from {}", stats.display()))?;
            let table = QParamsTable::from_records(&records, &factory, scheme, &config)
                .into_diagnostic()
                .wrap_err("parameter selection failed")?;

            match output {
                Some(path) => table
                    .write(&path)
                    .into_diagnostic()
                    .wrap_err_with(|| format!("failed to write {}", path.display()))?,
                None => print!("{}", table.format().into_diagnostic()?),
            }
            Ok(())
        }
    }
}

fn collect(
    dir: PathBuf,
    tensor: &str,
    output: PathBuf,
    minmax: bool,
    bins: usize,
) -> miette::Result<()> {
    if bins == 0 {
        return Err(miette::miette!("--bins must be at least 1"));
    }
    let dataset = CalibrationDataset::load_from_dir(&dir)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to load samples from {}", dir.display()))?;

    let mut observer: Box<dyn Observer> = if minmax {
        Box::new(MinMaxObserver::new(Some(output.clone()), DumpInterval::Never))
    } else {
        Box::new(HistogramObserver::new(
            Some(output.clone()),
            DumpInterval::Never,
            bins,
        ))
    };

    for sample in &dataset.samples {
        observer.observe(tensor, sample);
        observer.end_execution().into_diagnostic()?;
    }
    observer
        .finish()
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to write {}", output.display()))?;

    log::info!(
        "{} observer recorded {} executions of '{tensor}' to {}",
        observer.name(),
        observer.executions(),
        output.display()
    );
    Ok(())
}
