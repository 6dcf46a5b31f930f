//! Track metrics: unit conversion and per-step kinematics.
//!
//! The engine turns a [`TrackTable`] in input units into an [`EnrichedTable`]
//! carrying converted positions, distances, durations and speeds, plus the
//! displacement, velocity and direction of each step. Rows are never dropped
//! or reordered.
//!
//! Per-row conversion is independent and runs in parallel with Rayon. The
//! displacement step looks one row back and runs sequentially afterwards.

use clap::ValueEnum;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::loaders::{MetricsSeries, TrackObservation, TrackTable};
use crate::core::units::{LengthUnit, UnitError, UnitRegistry, UnitSystem};

/// Errors raised before any row is processed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricsError {
    #[error(transparent)]
    Unit(#[from] UnitError),

    #[error("image height must be positive and finite, got {0}")]
    InvalidImageHeight(f64),
}

/// Result type for metrics operations.
pub type Result<T> = std::result::Result<T, MetricsError>;

/// How the displacement diff treats a change of track id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TrackBoundary {
    /// Diff across the whole table, including the step from one track's last
    /// row to the next track's first row.
    #[default]
    Contiguous,
    /// Displacement is missing on the first row of each track.
    Reset,
}

/// Parameters of a metrics run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsOptions {
    /// Units the converted columns are expressed in.
    pub output: UnitSystem,
    /// Image height in input length units, used for the y-axis flip.
    pub image_height: f64,
    pub boundary: TrackBoundary,
}

impl MetricsOptions {
    pub fn new(image_height: f64) -> Self {
        Self {
            output: UnitSystem::CANONICAL,
            image_height,
            boundary: TrackBoundary::default(),
        }
    }

    pub fn with_output(mut self, output: UnitSystem) -> Self {
        self.output = output;
        self
    }

    pub fn with_boundary(mut self, boundary: TrackBoundary) -> Self {
        self.boundary = boundary;
        self
    }
}

/// Displacement, velocity and direction of one step, in output units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Kinematics {
    pub dx: Option<f64>,
    pub dy: Option<f64>,
    pub vx: Option<f64>,
    pub vy: Option<f64>,
    pub direction_rad: Option<f64>,
    pub direction_deg: Option<f64>,
}

/// An observation with its converted and derived values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnrichedRow {
    pub observation: TrackObservation,
    /// `distance / speed` in input units.
    pub duration_in: Option<f64>,
    pub x_out: f64,
    /// Flipped to a bottom-left origin unless the output unit is pixels.
    pub y_out: f64,
    pub distance_out: Option<f64>,
    pub duration_out: Option<f64>,
    pub speed_out: Option<f64>,
    /// `None` for calibration-only runs.
    pub kinematics: Option<Kinematics>,
}

/// Result of a metrics run.
#[derive(Debug, Clone)]
pub struct EnrichedTable {
    pub rows: Vec<EnrichedRow>,
    pub input: UnitSystem,
    pub output: UnitSystem,
    /// Set by [`MetricsEngine::process`], clear after calibration only.
    pub kinematics: bool,
}

impl EnrichedTable {
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// True if displacement, velocity and direction were computed.
    pub fn has_kinematics(&self) -> bool {
        self.kinematics
    }

    /// Rows whose duration could not be derived.
    pub fn missing_durations(&self) -> usize {
        self.rows.iter().filter(|r| r.duration_out.is_none()).count()
    }

    /// Columns used by the plot renderer.
    pub fn series(&self) -> MetricsSeries {
        let kin = |r: &EnrichedRow| r.kinematics.unwrap_or_default();
        MetricsSeries {
            x_displacement: self.rows.iter().map(|r| kin(r).dx).collect(),
            y_displacement: self.rows.iter().map(|r| kin(r).dy).collect(),
            direction_deg: self.rows.iter().map(|r| kin(r).direction_deg).collect(),
            distance: self.rows.iter().map(|r| r.distance_out).collect(),
        }
    }
}

/// Conversion factors resolved once per run.
#[derive(Debug, Clone, Copy)]
struct Factors {
    length: f64,
    time: f64,
    speed: f64,
    flip_y: bool,
    image_height: f64,
}

/// Converts track tables and derives step kinematics.
#[derive(Debug, Clone)]
pub struct MetricsEngine<'a> {
    registry: &'a UnitRegistry,
    options: MetricsOptions,
}

impl<'a> MetricsEngine<'a> {
    pub fn new(registry: &'a UnitRegistry, options: MetricsOptions) -> Self {
        Self { registry, options }
    }

    pub fn options(&self) -> &MetricsOptions {
        &self.options
    }

    /// Convert columns and derive kinematics.
    ///
    /// # Errors
    ///
    /// Fails before touching any row if a unit pair is not registered or the
    /// image height is invalid.
    pub fn process(&self, table: &TrackTable, input: UnitSystem) -> Result<EnrichedTable> {
        let mut enriched = self.calibrate(table, input)?;
        self.derive_kinematics(table, &mut enriched.rows);
        enriched.kinematics = true;
        Ok(enriched)
    }

    /// Convert columns only, without kinematics.
    pub fn calibrate(&self, table: &TrackTable, input: UnitSystem) -> Result<EnrichedTable> {
        let factors = self.resolve(input)?;
        debug!(
            "Converting {} rows from {}/{} to {}/{} (flip y: {})",
            table.len(),
            input.length,
            input.time,
            self.options.output.length,
            self.options.output.time,
            factors.flip_y
        );

        let rows = table
            .rows
            .par_iter()
            .map(|obs| convert_row(obs, &factors))
            .collect();

        Ok(EnrichedTable {
            rows,
            input,
            output: self.options.output,
            kinematics: false,
        })
    }

    /// Check that a table in `input` units can be processed.
    pub fn validate(&self, input: UnitSystem) -> Result<()> {
        self.resolve(input).map(|_| ())
    }

    fn resolve(&self, input: UnitSystem) -> Result<Factors> {
        let image_height = self.options.image_height;
        if !(image_height.is_finite() && image_height > 0.0) {
            return Err(MetricsError::InvalidImageHeight(image_height));
        }
        let output = self.options.output;
        Ok(Factors {
            length: self.registry.length_factor(input.length, output.length)?,
            time: self.registry.time_factor(input.time, output.time)?,
            speed: self.registry.speed_factor(input, output)?,
            flip_y: output.length != LengthUnit::Pixel,
            image_height,
        })
    }

    fn derive_kinematics(&self, table: &TrackTable, rows: &mut [EnrichedRow]) {
        let mut previous: Option<(i64, f64, f64)> = None;

        for (obs, row) in table.rows.iter().zip(rows.iter_mut()) {
            let (dx, dy) = match previous {
                Some((track, _, _))
                    if self.options.boundary == TrackBoundary::Reset && track != obs.track =>
                {
                    (None, None)
                }
                Some((_, px, py)) => (Some(row.x_out - px), Some(row.y_out - py)),
                None => (None, None),
            };
            previous = Some((obs.track, row.x_out, row.y_out));

            // A step without a duration was not measured.
            let (dx, dy) = match row.duration_out {
                Some(_) => (dx, dy),
                None => (None, None),
            };

            let direction_rad = match (dx, dy) {
                (Some(dx), Some(dy)) => Some(dy.atan2(dx)),
                _ => None,
            };

            row.kinematics = Some(Kinematics {
                dx,
                dy,
                vx: finite_ratio(dx, row.duration_out),
                vy: finite_ratio(dy, row.duration_out),
                direction_rad,
                direction_deg: direction_rad.map(f64::to_degrees),
            });
        }
    }
}

fn convert_row(obs: &TrackObservation, factors: &Factors) -> EnrichedRow {
    let y = if factors.flip_y {
        factors.image_height - obs.y
    } else {
        obs.y
    };
    let duration_in = finite_ratio(obs.distance, obs.speed);

    EnrichedRow {
        observation: *obs,
        duration_in,
        x_out: obs.x * factors.length,
        y_out: y * factors.length,
        distance_out: obs.distance.map(|d| d * factors.length),
        duration_out: duration_in.map(|t| t * factors.time),
        speed_out: obs.speed.map(|s| s * factors.speed),
        kinematics: None,
    }
}

/// `num / den`, missing if either side is missing or the quotient is not
/// finite. Both `0 / 0` and `x / 0` are missing.
fn finite_ratio(num: Option<f64>, den: Option<f64>) -> Option<f64> {
    let q = num? / den?;
    q.is_finite().then_some(q)
}

/// Process a table into the canonical output units (millimeters, minutes).
///
/// `length_unit` and `time_unit` are registry keys describing the input
/// columns; `image_height` is in input length units.
///
/// # Errors
///
/// [`MetricsError::Unit`] for an unknown unit key, before any row is read.
pub fn process_tracks(
    table: &TrackTable,
    length_unit: &str,
    time_unit: &str,
    image_height: f64,
) -> Result<EnrichedTable> {
    let input = UnitSystem::parse(length_unit, time_unit)?;
    let registry = UnitRegistry::default();
    MetricsEngine::new(&registry, MetricsOptions::new(image_height)).process(table, input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::units::TimeUnit;

    fn obs(track: i64, slice: i64, x: f64, y: f64, distance: f64, speed: f64) -> TrackObservation {
        let measured = |v: f64| if v == -1.0 { None } else { Some(v) };
        TrackObservation {
            track,
            slice,
            x,
            y,
            distance: measured(distance),
            speed: measured(speed),
            value: Some(0.0),
        }
    }

    fn scenario_table() -> TrackTable {
        TrackTable::new(vec![
            obs(1, 1, 100.0, 50.0, -1.0, -1.0),
            obs(1, 2, 110.0, 50.0, 14.1, 0.5),
        ])
    }

    fn px_min() -> UnitSystem {
        UnitSystem::new(LengthUnit::Pixel, TimeUnit::Minute)
    }

    #[test]
    fn test_two_row_scenario() {
        let result = process_tracks(&scenario_table(), "px", "min", 720.0).unwrap();
        assert_eq!(result.len(), 2);

        let row = result.rows[1];
        assert!((row.duration_in.unwrap() - 28.2).abs() < 1e-9);
        assert!((row.duration_out.unwrap() - 28.2).abs() < 1e-9);
        assert!((row.x_out - 110.0 / 4440.0).abs() < 1e-12);
        assert!((row.y_out - 670.0 / 4440.0).abs() < 1e-12);
        assert!((row.x_out - 0.02477).abs() < 1e-5);
        assert!((row.y_out - 0.15090).abs() < 1e-5);

        let kin = row.kinematics.unwrap();
        assert!((kin.dx.unwrap() - 10.0 / 4440.0).abs() < 1e-12);
        assert!(kin.dy.unwrap().abs() < 1e-15);
        assert_eq!(kin.direction_deg, Some(0.0));
        assert_eq!(kin.direction_rad, Some(0.0));
        assert!((kin.vx.unwrap() - (10.0 / 4440.0) / 28.2).abs() < 1e-12);
    }

    #[test]
    fn test_first_row_has_no_displacement() {
        let table = TrackTable::new(vec![
            obs(1, 1, 100.0, 50.0, 3.0, 1.0),
            obs(1, 2, 110.0, 60.0, 3.0, 1.0),
        ]);
        let result = process_tracks(&table, "px", "min", 720.0).unwrap();

        let first = result.rows[0];
        assert!(first.duration_out.is_some());
        let kin = first.kinematics.unwrap();
        assert_eq!(kin.dx, None);
        assert_eq!(kin.dy, None);
        assert_eq!(kin.direction_rad, None);
        assert_eq!(kin.direction_deg, None);
    }

    #[test]
    fn test_sentinel_rows_are_missing() {
        let table = TrackTable::new(vec![
            obs(1, 1, 0.0, 0.0, 2.0, 1.0),
            obs(1, 2, 10.0, 10.0, -1.0, 1.0),
            obs(1, 3, 20.0, 20.0, 2.0, -1.0),
        ]);
        let result = process_tracks(&table, "px", "min", 720.0).unwrap();

        for row in &result.rows[1..] {
            assert_eq!(row.duration_in, None);
            assert_eq!(row.duration_out, None);
            assert_eq!(row.kinematics.unwrap(), Kinematics::default());
        }
        assert_eq!(result.rows[1].distance_out, None);
        assert!(result.rows[1].speed_out.is_some());
        assert_eq!(result.rows[2].speed_out, None);
        assert_eq!(result.missing_durations(), 2);
    }

    #[test]
    fn test_zero_speed_duration_is_missing() {
        let table = TrackTable::new(vec![
            obs(1, 1, 0.0, 0.0, 0.0, 0.0),
            obs(1, 2, 1.0, 1.0, 5.0, 0.0),
        ]);
        let result = process_tracks(&table, "px", "min", 720.0).unwrap();

        assert_eq!(result.rows[0].duration_in, None);
        assert_eq!(result.rows[1].duration_in, None);
        assert_eq!(result.rows[1].kinematics.unwrap().dx, None);
    }

    #[test]
    fn test_zero_duration_velocity_is_missing() {
        let table = TrackTable::new(vec![
            obs(1, 1, 0.0, 0.0, 1.0, 1.0),
            obs(1, 2, 4.0, 0.0, 0.0, 2.0),
        ]);
        let result = process_tracks(&table, "px", "min", 720.0).unwrap();

        let row = result.rows[1];
        assert_eq!(row.duration_out, Some(0.0));
        let kin = row.kinematics.unwrap();
        assert!(kin.dx.is_some());
        assert_eq!(kin.vx, None);
        assert_eq!(kin.vy, None);
    }

    #[test]
    fn test_y_flip_to_mm() {
        let registry = UnitRegistry::default();
        let table = TrackTable::new(vec![obs(1, 1, 0.0, 0.0, -1.0, -1.0)]);
        let engine = MetricsEngine::new(&registry, MetricsOptions::new(720.0));

        let result = engine.calibrate(&table, px_min()).unwrap();
        assert!((result.rows[0].y_out - 720.0 * (1.0 / 4440.0)).abs() < 1e-12);
        assert_eq!(result.rows[0].x_out, 0.0);
    }

    #[test]
    fn test_no_flip_for_pixel_output() {
        let registry = UnitRegistry::default();
        let table = TrackTable::new(vec![obs(1, 1, 30.0, 40.0, 5.0, 1.0)]);
        let options = MetricsOptions::new(720.0).with_output(px_min());
        let engine = MetricsEngine::new(&registry, options);

        let result = engine.calibrate(&table, px_min()).unwrap();
        let row = result.rows[0];
        assert_eq!(row.x_out, 30.0);
        assert_eq!(row.y_out, 40.0);
        assert_eq!(row.distance_out, Some(5.0));
        assert_eq!(row.speed_out, Some(1.0));
        assert!(row.kinematics.is_none());
    }

    #[test]
    fn test_seconds_input_converted_to_minutes() {
        let table = TrackTable::new(vec![
            obs(1, 1, 0.0, 0.0, -1.0, -1.0),
            obs(1, 2, 4440.0, 0.0, 4440.0, 4440.0 / 60.0),
        ]);
        let result = process_tracks(&table, "px", "s", 720.0).unwrap();

        let row = result.rows[1];
        // 60 s step, 1 mm travelled.
        assert!((row.duration_in.unwrap() - 60.0).abs() < 1e-9);
        assert!((row.duration_out.unwrap() - 1.0).abs() < 1e-9);
        assert!((row.speed_out.unwrap() - 1.0).abs() < 1e-9);
        assert!((row.kinematics.unwrap().vx.unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_direction_quadrants() {
        let table = TrackTable::new(vec![
            obs(1, 1, 100.0, 100.0, 1.0, 1.0),
            // Up in image coordinates is +y after the flip.
            obs(1, 2, 100.0, 90.0, 1.0, 1.0),
            obs(1, 3, 90.0, 90.0, 1.0, 1.0),
        ]);
        let result = process_tracks(&table, "px", "min", 720.0).unwrap();

        let up = result.rows[1].kinematics.unwrap();
        assert!((up.direction_deg.unwrap() - 90.0).abs() < 1e-9);
        let left = result.rows[2].kinematics.unwrap();
        assert!((left.direction_deg.unwrap() - 180.0).abs() < 1e-9);
        assert!((left.direction_rad.unwrap() - std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn test_contiguous_diff_spans_tracks() {
        let table = TrackTable::new(vec![
            obs(1, 1, 0.0, 0.0, 1.0, 1.0),
            obs(2, 1, 4440.0, 0.0, 1.0, 1.0),
        ]);
        let result = process_tracks(&table, "px", "min", 720.0).unwrap();

        let kin = result.rows[1].kinematics.unwrap();
        assert!((kin.dx.unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_reset_diff_at_track_boundary() {
        let registry = UnitRegistry::default();
        let table = TrackTable::new(vec![
            obs(1, 1, 0.0, 0.0, 1.0, 1.0),
            obs(1, 2, 10.0, 0.0, 1.0, 1.0),
            obs(2, 1, 4440.0, 0.0, 1.0, 1.0),
            obs(2, 2, 4450.0, 0.0, 1.0, 1.0),
        ]);
        let options = MetricsOptions::new(720.0).with_boundary(TrackBoundary::Reset);
        let result = MetricsEngine::new(&registry, options)
            .process(&table, px_min())
            .unwrap();

        let kin: Vec<Kinematics> = result.rows.iter().map(|r| r.kinematics.unwrap()).collect();
        assert_eq!(kin[0].dx, None);
        assert!(kin[1].dx.is_some());
        assert_eq!(kin[2].dx, None);
        assert_eq!(kin[2].direction_deg, None);
        assert!((kin[3].dx.unwrap() - 10.0 / 4440.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_unit_fails() {
        let err = process_tracks(&scenario_table(), "furlong", "min", 720.0).unwrap_err();
        assert!(matches!(
            err,
            MetricsError::Unit(UnitError::UnknownUnit { kind: "length", .. })
        ));
    }

    #[test]
    fn test_unregistered_pair_fails() {
        let registry = UnitRegistry::identity();
        let engine = MetricsEngine::new(&registry, MetricsOptions::new(720.0));

        let err = engine.process(&scenario_table(), px_min()).unwrap_err();
        assert!(matches!(
            err,
            MetricsError::Unit(UnitError::UnregisteredConversion { .. })
        ));
    }

    #[test]
    fn test_invalid_image_height() {
        let err = process_tracks(&scenario_table(), "px", "min", 0.0).unwrap_err();
        assert_eq!(err, MetricsError::InvalidImageHeight(0.0));
    }

    #[test]
    fn test_rows_preserved_in_order() {
        let table = TrackTable::new(
            (0..500)
                .map(|i| obs(i / 50, i % 50, i as f64, 0.0, 1.0, 1.0))
                .collect(),
        );
        let result = process_tracks(&table, "px", "min", 720.0).unwrap();

        assert_eq!(result.len(), 500);
        for (i, row) in result.rows.iter().enumerate() {
            assert_eq!(row.observation, table.rows[i]);
        }
    }

    #[test]
    fn test_empty_table_keeps_run_mode() {
        let registry = UnitRegistry::default();
        let engine = MetricsEngine::new(&registry, MetricsOptions::new(720.0));
        let empty = TrackTable::default();

        let processed = engine.process(&empty, px_min()).unwrap();
        assert!(processed.is_empty());
        assert!(processed.has_kinematics());

        let calibrated = engine.calibrate(&empty, px_min()).unwrap();
        assert!(!calibrated.has_kinematics());
    }

    #[test]
    fn test_series() {
        let result = process_tracks(&scenario_table(), "px", "min", 720.0).unwrap();
        let series = result.series();

        assert_eq!(series.len(), 2);
        assert_eq!(series.x_displacement[0], None);
        assert!(series.x_displacement[1].is_some());
        assert_eq!(series.distance[0], None);
        assert!((series.distance[1].unwrap() - 14.1 / 4440.0).abs() < 1e-12);
        assert!(result.has_kinematics());
    }
}
