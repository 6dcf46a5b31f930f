//! Configuration types for the track metrics pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::loaders::Delimiter;
use crate::core::units::{
    UnitError, UnitRegistry, DEFAULT_PIXELS_PER_MM, DEFAULT_SECONDS_PER_MINUTE,
};
use crate::processors::metrics::TrackBoundary;
use crate::visualization::PlotFormat;

/// Calibration of the conversion registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitsConfig {
    /// Pixels per millimeter at the tracking magnification
    #[serde(default = "default_pixels_per_mm")]
    pub pixels_per_mm: f64,

    #[serde(default = "default_seconds_per_minute")]
    pub seconds_per_minute: f64,
}

fn default_pixels_per_mm() -> f64 {
    DEFAULT_PIXELS_PER_MM
}

fn default_seconds_per_minute() -> f64 {
    DEFAULT_SECONDS_PER_MINUTE
}

impl Default for UnitsConfig {
    fn default() -> Self {
        Self {
            pixels_per_mm: default_pixels_per_mm(),
            seconds_per_minute: default_seconds_per_minute(),
        }
    }
}

impl UnitsConfig {
    /// Build the conversion registry for this calibration.
    pub fn registry(&self) -> Result<UnitRegistry, UnitError> {
        UnitRegistry::new(self.pixels_per_mm, self.seconds_per_minute)
    }
}

/// Frame geometry of the source recordings, in pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_height_px")]
    pub height_px: f64,

    #[serde(default = "default_width_px")]
    pub width_px: f64,
}

fn default_height_px() -> f64 {
    720.0
}

fn default_width_px() -> f64 {
    1280.0
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            height_px: default_height_px(),
            width_px: default_width_px(),
        }
    }
}

impl ImageConfig {
    /// Longer image side in pixels.
    pub fn max_side_px(&self) -> f64 {
        self.height_px.max(self.width_px)
    }
}

/// Options for reading and processing track tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Whether displacement restarts at each new track id
    #[serde(default)]
    pub track_boundary: TrackBoundary,

    /// Field separator of raw track exports
    #[serde(default)]
    pub delimiter: Delimiter,
}

/// Configuration for rendered plots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotConfig {
    #[serde(default)]
    pub format: PlotFormat,

    /// Width of histogram plots in pixels
    #[serde(default = "default_plot_width")]
    pub width: u32,

    /// Height of histogram plots in pixels
    #[serde(default = "default_plot_height")]
    pub height: u32,

    /// Side length of the square polar plot in pixels
    #[serde(default = "default_polar_size")]
    pub polar_size: u32,

    /// Number of histogram bins
    #[serde(default = "default_bins")]
    pub bins: usize,

    /// Bar opacity of the overlaid displacement histogram
    #[serde(default = "default_alpha")]
    pub alpha: f64,
}

fn default_plot_width() -> u32 {
    800
}

fn default_plot_height() -> u32 {
    600
}

fn default_polar_size() -> u32 {
    800
}

fn default_bins() -> usize {
    10
}

fn default_alpha() -> f64 {
    0.5
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            format: PlotFormat::default(),
            width: default_plot_width(),
            height: default_plot_height(),
            polar_size: default_polar_size(),
            bins: default_bins(),
            alpha: default_alpha(),
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub units: UnitsConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub plot: PlotConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
