//! Command-line interface for the track metrics pipeline.

pub mod paths;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::core::loaders::{load_metrics_csv, Delimiter};
use crate::core::units::{LengthUnit, TimeUnit, UnitSystem};
use crate::processors::metrics::TrackBoundary;
use crate::processors::pipeline::{self, Job, ProcessRequest, RunMode, RunSummary};
use crate::visualization::{self, PlotFormat};
use crate::PipelineConfig;

use paths::{default_output_path, default_plot_stem, OutputSuffix};

#[derive(Parser)]
#[command(name = "track-metrics")]
#[command(about = "Calibrate cell tracks and derive motion metrics", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by `process` and `calibrate`.
#[derive(clap::Args)]
struct UnitArgs {
    /// Units of length in the input tracks file
    #[arg(long, visible_alias = "length_unit", default_value = "px", value_parser = parse_length_unit)]
    length_unit: LengthUnit,

    /// Units of time in the input tracks file
    #[arg(long, visible_alias = "time_unit", default_value = "min", value_parser = parse_time_unit)]
    time_unit: TimeUnit,

    /// Image height in input length units (defaults to the configured pixel height)
    #[arg(long, visible_alias = "image_height")]
    image_height: Option<f64>,

    /// Field separator of the input file
    #[arg(long, value_enum)]
    delimiter: Option<Delimiter>,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert units and compute displacement, velocity and direction
    Process {
        /// Input cell tracks files (CSV or tab-separated)
        #[arg(required = true, value_parser = existing_file)]
        inputs: Vec<PathBuf>,
        /// Output CSV path (only with a single input)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        units: UnitArgs,
        /// Restart displacement at each new track id
        #[arg(long)]
        reset_per_track: bool,
        /// Render summary plots next to each output
        #[arg(long)]
        plot: bool,
        /// Plot file format
        #[arg(long, value_enum)]
        format: Option<PlotFormat>,
    },

    /// Convert units only
    Calibrate {
        /// Input cell tracks file
        #[arg(value_parser = existing_file)]
        input: PathBuf,
        /// Output CSV path
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        units: UnitArgs,
    },

    /// Plot a processed tracks CSV
    Plot {
        /// Processed cell tracks file
        #[arg(value_parser = existing_file)]
        input: PathBuf,
        /// Output path stem (defaults to the input without its extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Plot file format
        #[arg(long, value_enum)]
        format: Option<PlotFormat>,
    },
}

fn existing_file(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("{} does not exist!", s))
    }
}

fn parse_length_unit(s: &str) -> Result<LengthUnit, String> {
    s.parse().map_err(|e: crate::core::units::UnitError| e.to_string())
}

fn parse_time_unit(s: &str) -> Result<TimeUnit, String> {
    s.parse().map_err(|e: crate::core::units::UnitError| e.to_string())
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    // Dispatch to subcommands
    match cli.command {
        Commands::Process {
            inputs,
            output,
            units,
            reset_per_track,
            plot,
            format,
        } => {
            let boundary = if reset_per_track {
                TrackBoundary::Reset
            } else {
                config.processing.track_boundary
            };
            let plot = plot.then(|| format.unwrap_or(config.plot.format));
            cmd_process(&inputs, output, &units, boundary, plot, &config);
        }
        Commands::Calibrate { input, output, units } => {
            cmd_calibrate(&input, output, &units, &config);
        }
        Commands::Plot { input, output, format } => {
            cmd_plot(&input, output, format.unwrap_or(config.plot.format), &config);
        }
    }
}

/// Load the pipeline config, or the defaults when no path is given.
///
/// A config file that cannot be read, parsed or turned into a unit registry
/// is an error.
fn load_config(path: Option<&Path>) -> anyhow::Result<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };

    let config = PipelineConfig::from_yaml(path)
        .map_err(|e| anyhow!("Failed to load config from {}: {}", path.display(), e))?;
    config
        .units
        .registry()
        .with_context(|| format!("Invalid unit calibration in {}", path.display()))?;
    info!("Loaded config from: {}", path.display());
    Ok(config)
}

fn build_request(mode: RunMode, units: &UnitArgs, config: &PipelineConfig) -> ProcessRequest {
    let mut request = ProcessRequest::new(mode, UnitSystem::new(units.length_unit, units.time_unit));
    request.image_height = units.image_height;
    request.delimiter = units.delimiter.unwrap_or(config.processing.delimiter);
    request.boundary = config.processing.track_boundary;
    request
}

fn cmd_process(
    inputs: &[PathBuf],
    output: Option<PathBuf>,
    units: &UnitArgs,
    boundary: TrackBoundary,
    plot: Option<PlotFormat>,
    config: &PipelineConfig,
) {
    let start = Instant::now();

    if output.is_some() && inputs.len() > 1 {
        error!("--output can only be used with a single input file");
        std::process::exit(1);
    }

    let jobs: Vec<Job> = inputs
        .iter()
        .map(|input| Job {
            input: input.clone(),
            output: output
                .clone()
                .unwrap_or_else(|| default_output_path(input, OutputSuffix::Processed)),
        })
        .collect();

    let mut request = build_request(RunMode::Process, units, config);
    request.boundary = boundary;
    request.plot = plot;

    println!("Processing {} track file(s)...", jobs.len());
    println!(
        "Input units: {}, {} -> output units: {}, {}",
        units.length_unit,
        units.time_unit,
        UnitSystem::CANONICAL.length,
        UnitSystem::CANONICAL.time
    );

    let spinner = create_spinner("Computing track metrics...");

    match pipeline::process_batch(&jobs, &request, config) {
        Ok(summaries) => {
            spinner.finish_and_clear();
            for summary in &summaries {
                print_run_summary("Processing Complete", summary, start);
            }
        }
        Err(e) => {
            spinner.finish_and_clear();
            error!("Processing failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_calibrate(input: &Path, output: Option<PathBuf>, units: &UnitArgs, config: &PipelineConfig) {
    let start = Instant::now();

    let output_path = output.unwrap_or_else(|| default_output_path(input, OutputSuffix::Calibrated));
    let request = build_request(RunMode::Calibrate, units, config);

    println!("Calibrating track lengths...");
    println!("Input: {}", input.display());
    println!("Output: {}", output_path.display());

    let spinner = create_spinner("Converting units...");

    match pipeline::process_file(input, &output_path, &request, config) {
        Ok(summary) => {
            spinner.finish_and_clear();
            print_run_summary("Calibration Complete", &summary, start);
        }
        Err(e) => {
            spinner.finish_and_clear();
            error!("Calibration failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_plot(input: &Path, output: Option<PathBuf>, format: PlotFormat, config: &PipelineConfig) {
    let start = Instant::now();

    let stem = output.unwrap_or_else(|| default_plot_stem(input));
    let units = UnitSystem::CANONICAL;

    println!("Plotting track metrics...");
    println!("Input: {}", input.display());
    println!("Output stem: {}", stem.display());

    let spinner = create_spinner("Loading processed tracks...");

    let series = match load_metrics_csv(input, units) {
        Ok(s) => s,
        Err(e) => {
            spinner.finish_and_clear();
            error!("Failed to load processed tracks: {}", e);
            std::process::exit(1);
        }
    };

    let registry = match config.units.registry() {
        Ok(r) => r,
        Err(e) => {
            spinner.finish_and_clear();
            error!("Invalid unit calibration: {}", e);
            std::process::exit(1);
        }
    };

    spinner.set_message("Generating plots...");

    let result = pipeline::plot_settings(format, units.length, &registry, config)
        .and_then(|settings| Ok(visualization::render_track_plots(&stem, &series, &settings)?));

    match result {
        Ok(paths) => {
            spinner.finish_and_clear();
            let files: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();

            print_summary(
                "Plotting Complete",
                &[
                    ("Input file", input.display().to_string()),
                    ("Rows", series.len().to_string()),
                    ("Output files", files.join(", ")),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            spinner.finish_and_clear();
            error!("Plotting failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn print_run_summary(title: &str, summary: &RunSummary, start: Instant) {
    let mut items = vec![
        ("Input file", summary.input.display().to_string()),
        ("Output file", summary.output.display().to_string()),
        ("Rows", summary.rows.to_string()),
        ("Tracks", summary.tracks.to_string()),
        ("Missing durations", summary.missing_durations.to_string()),
    ];
    if !summary.plots.is_empty() {
        items.push(("Plots", summary.plots.len().to_string()));
    }
    items.push(("Duration", format!("{:.2?}", start.elapsed())));
    print_summary(title, &items);
}
