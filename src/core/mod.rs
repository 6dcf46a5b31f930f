//! Core data types, unit conversion and I/O operations.

pub mod loaders;
pub mod units;
pub mod writers;

pub use loaders::{load_tracks, Delimiter, LoaderError, MetricsSeries, TrackObservation, TrackTable};
pub use units::{UnitError, UnitRegistry, UnitSystem};
pub use writers::{write_enriched_csv, WriteError};
