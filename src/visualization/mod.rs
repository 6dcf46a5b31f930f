//! Summary plots of processed track metrics.
//!
//! Three files are rendered per run with the plotters library:
//! - `<stem> displacements.<ext>`: overlaid x/y displacement histograms
//! - `<stem> distancespolar.<ext>`: distance vs. direction polar scatter
//! - `<stem> distances.<ext>`: net distance histogram

use std::f64::consts::TAU;
use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use log::debug;
use plotters::coord::Shift;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::loaders::MetricsSeries;

/// Errors that can occur during visualization.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("No values to plot")]
    EmptySeries,
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Output file type of rendered plots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PlotFormat {
    #[default]
    Png,
    Svg,
}

impl PlotFormat {
    pub fn extension(self) -> &'static str {
        match self {
            PlotFormat::Png => "png",
            PlotFormat::Svg => "svg",
        }
    }
}

impl fmt::Display for PlotFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Rendering parameters shared by all three plots.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlotSettings {
    pub format: PlotFormat,
    pub width: u32,
    pub height: u32,
    pub polar_size: u32,
    pub bins: usize,
    pub alpha: f64,
    /// Axis limit in output length units, normally the longer image side.
    pub max_length: f64,
}

/// Color of x displacements and distances.
const X_COLOR: RGBColor = RGBColor(55, 126, 184);

/// Color of y displacements.
const Y_COLOR: RGBColor = RGBColor(228, 26, 28);

/// Polar grid color.
const GRID_COLOR: RGBColor = RGBColor(200, 200, 200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plot {
    Displacements,
    DistancesPolar,
    Distances,
}

impl Plot {
    const ALL: [Plot; 3] = [Plot::Displacements, Plot::DistancesPolar, Plot::Distances];

    fn suffix(self) -> &'static str {
        match self {
            Plot::Displacements => "displacements",
            Plot::DistancesPolar => "distancespolar",
            Plot::Distances => "distances",
        }
    }
}

/// One histogram bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bin {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

/// Equal-width bins spanning the data range.
///
/// If every value is the same, a single unit-wide bin centred on it is
/// returned. Empty input yields no bins.
pub fn histogram_bins(values: &[f64], bins: usize) -> Vec<Bin> {
    if values.is_empty() || bins == 0 {
        return Vec::new();
    }

    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if (max - min).abs() < f64::EPSILON {
        return vec![Bin {
            start: min - 0.5,
            end: min + 0.5,
            count: values.len(),
        }];
    }

    let width = (max - min) / bins as f64;
    let mut counts = vec![0usize; bins];
    for &v in values {
        // The maximum value falls into the last bin.
        let idx = (((v - min) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| Bin {
            start: min + width * i as f64,
            end: min + width * (i + 1) as f64,
            count,
        })
        .collect()
}

/// Output path of one plot: `<stem> <suffix>.<ext>`.
fn plot_path(stem: &Path, plot: Plot, format: PlotFormat) -> PathBuf {
    PathBuf::from(format!(
        "{} {}.{}",
        stem.to_string_lossy(),
        plot.suffix(),
        format.extension()
    ))
}

/// Paths [`render_track_plots`] writes for a stem.
pub fn plot_paths(stem: &Path, format: PlotFormat) -> Vec<PathBuf> {
    Plot::ALL
        .iter()
        .map(|&plot| plot_path(stem, plot, format))
        .collect()
}

/// Render all three plots next to `stem` and return the written paths.
pub fn render_track_plots(
    stem: &Path,
    series: &MetricsSeries,
    settings: &PlotSettings,
) -> Result<Vec<PathBuf>> {
    if series.distance.iter().all(Option::is_none) {
        return Err(VisualizationError::EmptySeries);
    }

    let mut written = Vec::with_capacity(Plot::ALL.len());
    for plot in Plot::ALL {
        let path = plot_path(stem, plot, settings.format);
        debug!("Rendering {}", path.display());
        render(&path, plot, series, settings)?;
        written.push(path);
    }
    Ok(written)
}

fn render(path: &Path, plot: Plot, series: &MetricsSeries, settings: &PlotSettings) -> Result<()> {
    let size = match plot {
        Plot::DistancesPolar => (settings.polar_size, settings.polar_size),
        _ => (settings.width, settings.height),
    };

    match settings.format {
        PlotFormat::Png => {
            let root = BitMapBackend::new(path, size).into_drawing_area();
            draw(root, plot, series, settings)
        }
        PlotFormat::Svg => {
            let root = SVGBackend::new(path, size).into_drawing_area();
            draw(root, plot, series, settings)
        }
    }
}

fn draw<DB: DrawingBackend>(
    root: DrawingArea<DB, Shift>,
    plot: Plot,
    series: &MetricsSeries,
    settings: &PlotSettings,
) -> Result<()> {
    root.fill(&WHITE).map_err(plotting_error)?;

    match plot {
        Plot::Displacements => {
            let dx: Vec<f64> = series.x_displacement.iter().flatten().copied().collect();
            let dy: Vec<f64> = series.y_displacement.iter().flatten().copied().collect();
            let layers = [(dx, X_COLOR), (dy, Y_COLOR)];
            draw_histogram(&root, &layers, settings)?;
        }
        Plot::DistancesPolar => draw_polar(&root, series, settings)?,
        Plot::Distances => {
            let distances: Vec<f64> = series.distance.iter().flatten().copied().collect();
            draw_histogram(&root, &[(distances, X_COLOR)], settings)?;
        }
    }

    root.present().map_err(plotting_error)?;
    Ok(())
}

fn draw_histogram<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    layers: &[(Vec<f64>, RGBColor)],
    settings: &PlotSettings,
) -> Result<()> {
    let limit = settings.max_length;
    let binned: Vec<(Vec<Bin>, RGBColor)> = layers
        .iter()
        .map(|(values, color)| (histogram_bins(values, settings.bins), *color))
        .collect();

    let peak = binned
        .iter()
        .flat_map(|(bins, _)| bins.iter().map(|b| b.count))
        .max()
        .unwrap_or(0)
        .max(1) as f64;

    let mut chart = ChartBuilder::on(root)
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(40)
        .build_cartesian_2d(-limit..limit, 0.0..peak * 1.05)
        .map_err(plotting_error)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .draw()
        .map_err(plotting_error)?;

    // Bars outside the axis limit are clipped to it.
    let alpha = if layers.len() > 1 { settings.alpha } else { 1.0 };
    for (bins, color) in &binned {
        chart
            .draw_series(
                bins.iter()
                    .filter(|b| b.count > 0 && b.end > -limit && b.start < limit)
                    .map(|b| {
                        Rectangle::new(
                            [(b.start.max(-limit), 0.0), (b.end.min(limit), b.count as f64)],
                            color.mix(alpha).filled(),
                        )
                    }),
            )
            .map_err(plotting_error)?;
    }

    Ok(())
}

fn draw_polar<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    series: &MetricsSeries,
    settings: &PlotSettings,
) -> Result<()> {
    let limit = settings.max_length;

    let mut chart = ChartBuilder::on(root)
        .margin(10)
        .build_cartesian_2d(-limit..limit, -limit..limit)
        .map_err(plotting_error)?;

    // Concentric rings at quarter radii and spokes every 45 degrees.
    for ring in 1..=4 {
        let r = limit * ring as f64 / 4.0;
        let circle: Vec<(f64, f64)> = (0..=120)
            .map(|i| {
                let theta = TAU * i as f64 / 120.0;
                (r * theta.cos(), r * theta.sin())
            })
            .collect();
        chart
            .draw_series(std::iter::once(PathElement::new(circle, GRID_COLOR.stroke_width(1))))
            .map_err(plotting_error)?;
    }
    chart
        .draw_series((0..8).map(|i| {
            let theta = TAU * i as f64 / 8.0;
            PathElement::new(
                vec![(0.0, 0.0), (limit * theta.cos(), limit * theta.sin())],
                GRID_COLOR.stroke_width(1),
            )
        }))
        .map_err(plotting_error)?;

    let points: Vec<(f64, f64)> = series
        .direction_deg
        .iter()
        .zip(&series.distance)
        .filter_map(|(&direction, &distance)| Some((direction?.to_radians(), distance?)))
        .filter(|&(_, r)| r.abs() <= limit)
        .map(|(theta, r)| (r * theta.cos(), r * theta.sin()))
        .collect();
    debug!("Polar scatter with {} points", points.len());

    chart
        .draw_series(
            points
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 3, X_COLOR.filled())),
        )
        .map_err(plotting_error)?;

    Ok(())
}

fn plotting_error<E: std::error::Error + Send + Sync>(e: DrawingAreaErrorKind<E>) -> VisualizationError {
    VisualizationError::PlottingError(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_bins() {
        let bins = histogram_bins(&[0.0, 1.0, 2.0, 3.0, 4.0], 4);
        assert_eq!(bins.len(), 4);
        assert_eq!(bins[0].start, 0.0);
        assert_eq!(bins[3].end, 4.0);
        let counts: Vec<usize> = bins.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 1, 1, 2]);
    }

    #[test]
    fn test_histogram_bins_constant() {
        let bins = histogram_bins(&[2.0, 2.0, 2.0], 10);
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[0].count, 3);
        assert!((bins[0].start - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_histogram_bins_empty() {
        assert!(histogram_bins(&[], 10).is_empty());
        assert!(histogram_bins(&[1.0], 0).is_empty());
    }

    #[test]
    fn test_plot_paths() {
        let paths = plot_paths(Path::new("out/tracks in mm per min"), PlotFormat::Svg);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("out/tracks in mm per min displacements.svg"),
                PathBuf::from("out/tracks in mm per min distancespolar.svg"),
                PathBuf::from("out/tracks in mm per min distances.svg"),
            ]
        );
    }

    #[test]
    fn test_render_empty_series() {
        let series = MetricsSeries {
            x_displacement: vec![None],
            y_displacement: vec![None],
            direction_deg: vec![None],
            distance: vec![None],
        };
        let settings = PlotSettings {
            format: PlotFormat::Png,
            width: 100,
            height: 100,
            polar_size: 100,
            bins: 10,
            alpha: 0.5,
            max_length: 1.0,
        };

        let result = render_track_plots(Path::new("unused"), &series, &settings);
        assert!(matches!(result, Err(VisualizationError::EmptySeries)));
    }
}
