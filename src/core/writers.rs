//! CSV writer for enriched track tables.
//!
//! Columns are written in the order they are computed: the seven input
//! columns, the converted columns, then the kinematics. When a derived column
//! has the same name as an earlier one (for example `duration_min` when the
//! input is already in minutes), the later value replaces the earlier one at
//! the earlier position, so every header appears once.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

use thiserror::Error;

use super::loaders::input_header;
use super::units::{
    displacement_component_name, length_name, speed_name, time_name, velocity_component_name,
};
use crate::processors::metrics::{EnrichedRow, EnrichedTable};

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write data to file.
    #[error("failed to write to file '{path}': {source}")]
    WriteFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// CSV writing error.
    #[error("CSV write error for '{path}': {source}")]
    CsvError {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// A column of the enriched table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Track,
    Slice,
    X,
    Y,
    Distance,
    Speed,
    Value,
    DurationIn,
    XOut,
    YOut,
    DistanceOut,
    DurationOut,
    SpeedOut,
    XDisplacement,
    XVelocity,
    YDisplacement,
    YVelocity,
    DirectionRad,
    DirectionDeg,
}

impl Field {
    const INPUT: [Field; 7] = [
        Field::Track,
        Field::Slice,
        Field::X,
        Field::Y,
        Field::Distance,
        Field::Speed,
        Field::Value,
    ];

    /// Cell text for a row. Missing values are empty.
    pub fn format(self, row: &EnrichedRow) -> String {
        let obs = &row.observation;
        let kin = row.kinematics.unwrap_or_default();
        let value = match self {
            Field::Track => return obs.track.to_string(),
            Field::Slice => return obs.slice.to_string(),
            Field::X => Some(obs.x),
            Field::Y => Some(obs.y),
            Field::Distance => obs.distance,
            Field::Speed => obs.speed,
            Field::Value => obs.value,
            Field::DurationIn => row.duration_in,
            Field::XOut => Some(row.x_out),
            Field::YOut => Some(row.y_out),
            Field::DistanceOut => row.distance_out,
            Field::DurationOut => row.duration_out,
            Field::SpeedOut => row.speed_out,
            Field::XDisplacement => kin.dx,
            Field::XVelocity => kin.vx,
            Field::YDisplacement => kin.dy,
            Field::YVelocity => kin.vy,
            Field::DirectionRad => kin.direction_rad,
            Field::DirectionDeg => kin.direction_deg,
        };
        value.map(|v| v.to_string()).unwrap_or_default()
    }
}

/// Header names and fields of an enriched table, in write order.
pub fn enriched_columns(table: &EnrichedTable) -> Vec<(String, Field)> {
    let (input, output) = (table.input, table.output);
    let (l, t) = (output.length, output.time);

    let mut named: Vec<(String, Field)> = input_header(input)
        .into_iter()
        .zip(Field::INPUT)
        .collect();
    named.extend([
        (time_name("duration", input.time), Field::DurationIn),
        (length_name("x", l), Field::XOut),
        (length_name("y", l), Field::YOut),
        (length_name("distance", l), Field::DistanceOut),
        (time_name("duration", t), Field::DurationOut),
        (speed_name("speed", l, t), Field::SpeedOut),
    ]);
    if table.has_kinematics() {
        named.extend([
            (displacement_component_name("x", l), Field::XDisplacement),
            (velocity_component_name("x", l, t), Field::XVelocity),
            (displacement_component_name("y", l), Field::YDisplacement),
            (velocity_component_name("y", l, t), Field::YVelocity),
            ("direction_rad".to_string(), Field::DirectionRad),
            ("direction_deg".to_string(), Field::DirectionDeg),
        ]);
    }

    let mut columns: Vec<(String, Field)> = Vec::with_capacity(named.len());
    for (name, field) in named {
        match columns.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = field,
            None => columns.push((name, field)),
        }
    }
    columns
}

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Write an enriched table to a comma-separated file with a header row.
///
/// # Errors
///
/// Returns an error if:
/// - Parent directories cannot be created
/// - File cannot be created or written to
///
/// # Example
///
/// ```no_run
/// use track_metrics::core::loaders::{load_tracks, Delimiter};
/// use track_metrics::core::writers::write_enriched_csv;
/// use track_metrics::processors::metrics::process_tracks;
/// use std::path::Path;
///
/// let table = load_tracks("tracks in px per min.txt", Delimiter::Auto).unwrap();
/// let enriched = process_tracks(&table, "px", "min", 720.0).unwrap();
/// write_enriched_csv(Path::new("tracks in mm per min.csv"), &enriched).unwrap();
/// ```
pub fn write_enriched_csv(path: &Path, table: &EnrichedTable) -> Result<()> {
    ensure_parent_dirs(path)?;

    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut csv_writer = csv::Writer::from_writer(BufWriter::new(file));

    let path_str = path.display().to_string();
    let columns = enriched_columns(table);

    csv_writer
        .write_record(columns.iter().map(|(name, _)| name.as_str()))
        .map_err(|e| WriteError::CsvError {
            path: path_str.clone(),
            source: e,
        })?;

    for row in &table.rows {
        csv_writer
            .write_record(columns.iter().map(|(_, field)| field.format(row)))
            .map_err(|e| WriteError::CsvError {
                path: path_str.clone(),
                source: e,
            })?;
    }

    csv_writer.flush().map_err(|e| WriteError::WriteFile {
        path: path_str,
        source: e,
    })?;

    Ok(())
}
