//! File-level orchestration: load, enrich, write and plot.
//!
//! Every input is fully loaded and enriched before any output is written, so
//! a failure leaves no partial output behind. Batches are prepared in
//! parallel with Rayon and written only when every input succeeded.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::config::PipelineConfig;
use crate::core::loaders::{load_tracks, Delimiter, LoaderError};
use crate::core::units::{LengthUnit, UnitRegistry, UnitSystem};
use crate::core::writers::{write_enriched_csv, WriteError};
use crate::processors::metrics::{
    EnrichedTable, MetricsEngine, MetricsOptions, TrackBoundary,
};
use crate::visualization::{
    plot_paths, render_track_plots, PlotFormat, PlotSettings, VisualizationError,
};

/// How far a run goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Unit conversion only.
    Calibrate,
    /// Unit conversion plus displacement, velocity and direction.
    Process,
}

/// Parameters of a pipeline run, after CLI and config are merged.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub mode: RunMode,
    pub units: UnitSystem,
    /// Image height in input length units. Defaults to the configured pixel
    /// height converted to the input unit.
    pub image_height: Option<f64>,
    pub delimiter: Delimiter,
    pub boundary: TrackBoundary,
    /// Render plots next to each output when set.
    pub plot: Option<PlotFormat>,
}

impl ProcessRequest {
    pub fn new(mode: RunMode, units: UnitSystem) -> Self {
        Self {
            mode,
            units,
            image_height: None,
            delimiter: Delimiter::Auto,
            boundary: TrackBoundary::Contiguous,
            plot: None,
        }
    }
}

/// One input file and where its output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Outcome of one processed file.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub input: PathBuf,
    pub output: PathBuf,
    pub rows: usize,
    pub tracks: usize,
    pub missing_durations: usize,
    pub plots: Vec<PathBuf>,
}

struct Prepared {
    job: Job,
    table: EnrichedTable,
    tracks: usize,
}

/// Process a single file.
pub fn process_file(
    input: &Path,
    output: &Path,
    request: &ProcessRequest,
    config: &PipelineConfig,
) -> Result<RunSummary> {
    let job = Job {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
    };
    let mut summaries = process_batch(&[job], request, config)?;
    summaries
        .pop()
        .context("batch of one produced no summary")
}

/// Process several files. Nothing is written unless all of them load and
/// enrich successfully, and outputs already written are removed if a later
/// write fails.
pub fn process_batch(
    jobs: &[Job],
    request: &ProcessRequest,
    config: &PipelineConfig,
) -> Result<Vec<RunSummary>> {
    if jobs.is_empty() {
        bail!("no input files given");
    }

    let registry = config
        .units
        .registry()
        .context("invalid unit calibration in configuration")?;
    let options = metrics_options(&registry, request, config)?;
    let engine = MetricsEngine::new(&registry, options);
    engine
        .validate(request.units)
        .context("invalid processing configuration")?;

    for job in jobs {
        if !job.input.is_file() {
            return Err(LoaderError::InputNotFound(job.input.clone()).into());
        }
    }

    let prepared: Vec<Prepared> = jobs
        .par_iter()
        .map(|job| prepare(job, &engine, request))
        .collect::<Result<_>>()?;

    let mut written = Vec::new();
    let mut summaries = Vec::with_capacity(prepared.len());
    for p in prepared {
        match commit(p, request, &registry, config, &mut written) {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                remove_outputs(&written);
                return Err(e);
            }
        }
    }
    Ok(summaries)
}

/// Delete files written by a batch that failed part way.
fn remove_outputs(paths: &[PathBuf]) {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

fn metrics_options(
    registry: &UnitRegistry,
    request: &ProcessRequest,
    config: &PipelineConfig,
) -> Result<MetricsOptions> {
    let image_height = match request.image_height {
        Some(h) => h,
        None => registry
            .convert_length(config.image.height_px, LengthUnit::Pixel, request.units.length)
            .context("cannot express the configured image height in the input unit")?,
    };
    debug!(
        "Image height: {} {}",
        image_height, request.units.length
    );
    Ok(MetricsOptions::new(image_height).with_boundary(request.boundary))
}

fn prepare(job: &Job, engine: &MetricsEngine<'_>, request: &ProcessRequest) -> Result<Prepared> {
    let table = load_tracks(&job.input, request.delimiter)
        .with_context(|| format!("Failed to load tracks from {}", job.input.display()))?;
    let tracks = table.track_count();

    let enriched = match request.mode {
        RunMode::Calibrate => engine.calibrate(&table, request.units),
        RunMode::Process => engine.process(&table, request.units),
    }
    .with_context(|| format!("Failed to process {}", job.input.display()))?;

    let missing = enriched.missing_durations();
    if missing == enriched.len() {
        warn!(
            "{}: no row has both distance and speed, all durations are missing",
            job.input.display()
        );
    }

    let plotting = request.plot.is_some() && request.mode == RunMode::Process;
    if plotting && enriched.rows.iter().all(|r| r.distance_out.is_none()) {
        return Err(VisualizationError::EmptySeries)
            .with_context(|| format!("Cannot plot {}", job.input.display()));
    }

    Ok(Prepared {
        job: job.clone(),
        table: enriched,
        tracks,
    })
}

fn commit(
    prepared: Prepared,
    request: &ProcessRequest,
    registry: &UnitRegistry,
    config: &PipelineConfig,
    written: &mut Vec<PathBuf>,
) -> Result<RunSummary> {
    let Prepared { job, table, tracks } = prepared;

    let csv_result = write_enriched_csv(&job.output, &table);
    // A file that could not be created was never touched.
    if !matches!(
        csv_result,
        Err(WriteError::CreateDirectory { .. } | WriteError::CreateFile { .. })
    ) {
        written.push(job.output.clone());
    }
    csv_result.with_context(|| format!("Failed to write {}", job.output.display()))?;
    info!(
        "Wrote {} rows from {} to {}",
        table.len(),
        job.input.display(),
        job.output.display()
    );

    let plots = match (request.plot, request.mode) {
        (Some(format), RunMode::Process) => {
            let settings = plot_settings(format, table.output.length, registry, config)?;
            let stem = job.output.with_extension("");
            let expected = plot_paths(&stem, format);
            let plotted = render_track_plots(&stem, &table.series(), &settings);
            written.extend(expected.into_iter().filter(|p| p.is_file()));
            plotted.with_context(|| format!("Failed to plot {}", job.output.display()))?
        }
        (Some(_), RunMode::Calibrate) => {
            warn!("Plots need displacement columns; skipping for calibration output");
            Vec::new()
        }
        (None, _) => Vec::new(),
    };

    Ok(RunSummary {
        input: job.input,
        output: job.output,
        rows: table.len(),
        tracks,
        missing_durations: table.missing_durations(),
        plots,
    })
}

/// Plot settings with the axis limit set to the longer image side.
pub fn plot_settings(
    format: PlotFormat,
    length_unit: LengthUnit,
    registry: &UnitRegistry,
    config: &PipelineConfig,
) -> Result<PlotSettings> {
    let max_length = registry
        .convert_length(config.image.max_side_px(), LengthUnit::Pixel, length_unit)
        .context("cannot express the image size in the plot unit")?;
    let plot = &config.plot;
    Ok(PlotSettings {
        format,
        width: plot.width,
        height: plot.height,
        polar_size: plot.polar_size,
        bins: plot.bins,
        alpha: plot.alpha,
        max_length,
    })
}
