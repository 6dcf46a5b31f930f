//! Unit calibration and motion metrics for microscopy cell tracks.
//!
//! This crate provides tools for:
//! - Loading per-frame cell-track exports (comma- or tab-separated)
//! - Converting pixel/frame units to millimeters and minutes
//! - Deriving displacement, velocity and direction of motion per step
//! - Writing enriched CSV tables and rendering summary plots
//!
//! # Example
//!
//! ```no_run
//! use track_metrics::{core::loaders::{load_tracks, Delimiter}, processors::metrics::process_tracks};
//!
//! let table = load_tracks("tracks in px per min.txt", Delimiter::Auto).unwrap();
//! let enriched = process_tracks(&table, "px", "min", 720.0).unwrap();
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;
pub mod visualization;

pub use config::{ImageConfig, PipelineConfig, PlotConfig, ProcessingConfig, UnitsConfig};
pub use crate::core::loaders::{TrackObservation, TrackTable};
pub use crate::core::units::{LengthUnit, TimeUnit, UnitRegistry, UnitSystem};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
