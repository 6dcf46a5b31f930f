//! Data loaders for cell-track tables.
//!
//! This module provides parsers for:
//! - Raw track exports (7 positional columns, comma- or tab-separated)
//! - Processed metrics CSV files written by [`crate::core::writers`]

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::ValueEnum;
use csv::{ReaderBuilder, StringRecord, Trim};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::units::{
    displacement_component_name, length_name, speed_name, UnitSystem,
};

/// Value the tracking software writes for "not measured".
pub const MISSING_SENTINEL: f64 = -1.0;

/// Number of positional columns in a raw track export.
pub const INPUT_COLUMNS: usize = 7;

/// Errors that can occur during file loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("{} does not exist!", .0.display())]
    InputNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Empty file: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("Malformed data on line {line}: {message}")]
    DataFormat { line: u64, message: String },
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Field separator of a raw track export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Delimiter {
    /// Tab if the header line contains a tab, comma otherwise.
    #[default]
    Auto,
    Comma,
    Tab,
}

/// One per-frame measurement of a tracked cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackObservation {
    pub track: i64,
    pub slice: i64,
    pub x: f64,
    pub y: f64,
    /// `None` where the export wrote the `-1` sentinel.
    pub distance: Option<f64>,
    /// `None` where the export wrote the `-1` sentinel.
    pub speed: Option<f64>,
    pub value: Option<f64>,
}

/// Track observations in file order.
///
/// Rows are assumed to be sorted by track, then slice. This is not checked.
#[derive(Debug, Clone, Default)]
pub struct TrackTable {
    pub rows: Vec<TrackObservation>,
    pub source_path: Option<PathBuf>,
}

impl TrackTable {
    pub fn new(rows: Vec<TrackObservation>) -> Self {
        Self {
            rows,
            source_path: None,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of distinct track identifiers.
    pub fn track_count(&self) -> usize {
        let mut tracks: Vec<i64> = self.rows.iter().map(|r| r.track).collect();
        tracks.sort_unstable();
        tracks.dedup();
        tracks.len()
    }
}

/// Column series consumed by the plot renderer.
#[derive(Debug, Clone, Default)]
pub struct MetricsSeries {
    pub x_displacement: Vec<Option<f64>>,
    pub y_displacement: Vec<Option<f64>>,
    pub direction_deg: Vec<Option<f64>>,
    pub distance: Vec<Option<f64>>,
}

impl MetricsSeries {
    #[inline]
    pub fn len(&self) -> usize {
        self.distance.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.distance.is_empty()
    }
}

/// Canonical header of a raw track export in the given units.
pub fn input_header(units: UnitSystem) -> [String; INPUT_COLUMNS] {
    [
        "track".to_string(),
        "slice".to_string(),
        length_name("x", units.length),
        length_name("y", units.length),
        length_name("distance", units.length),
        speed_name("speed", units.length, units.time),
        "value".to_string(),
    ]
}

/// Load a raw track export.
///
/// The first line is a header and is skipped; the seven columns are read by
/// position: `track, slice, x, y, distance, speed, value`. A `-1` in the
/// distance or speed column becomes `None`.
///
/// # Errors
///
/// - [`LoaderError::InputNotFound`] if `path` is not an existing file. This is
///   checked before the file is opened.
/// - [`LoaderError::DataFormat`] on the first row with the wrong column count
///   or a non-numeric field. No rows are returned in that case.
/// - [`LoaderError::EmptyFile`] if the file has no data rows.
pub fn load_tracks<P: AsRef<Path>>(path: P, delimiter: Delimiter) -> Result<TrackTable> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(LoaderError::InputNotFound(path.to_path_buf()));
    }

    let separator = match delimiter {
        Delimiter::Auto => sniff_delimiter(path)?,
        Delimiter::Comma => b',',
        Delimiter::Tab => b'\t',
    };
    debug!(
        "Reading {} with delimiter {:?}",
        path.display(),
        separator as char
    );

    let file = File::open(path)?;
    let rows = read_tracks(BufReader::new(file), separator)?;

    if rows.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    Ok(TrackTable {
        rows,
        source_path: Some(path.to_path_buf()),
    })
}

/// Parse raw track rows from any reader. The first record is the header.
pub fn read_tracks<R: io::Read>(reader: R, separator: u8) -> Result<Vec<TrackObservation>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(separator)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut rows = Vec::with_capacity(1024);
    for result in reader.records() {
        let record = result?;
        let line = record.position().map_or(0, |p| p.line());
        rows.push(parse_observation(&record, line)?);
    }
    Ok(rows)
}

fn parse_observation(record: &StringRecord, line: u64) -> Result<TrackObservation> {
    if record.len() != INPUT_COLUMNS {
        return Err(LoaderError::DataFormat {
            line,
            message: format!(
                "expected {} columns, found {}",
                INPUT_COLUMNS,
                record.len()
            ),
        });
    }

    Ok(TrackObservation {
        track: parse_required(record, 0, "track", line)?,
        slice: parse_required(record, 1, "slice", line)?,
        x: parse_finite(record, 2, "x", line)?,
        y: parse_finite(record, 3, "y", line)?,
        distance: parse_measurement(record, 4, "distance", line)?,
        speed: parse_measurement(record, 5, "speed", line)?,
        value: parse_optional(record, 6, "value", line)?,
    })
}

fn parse_required<T: FromStr>(record: &StringRecord, idx: usize, name: &str, line: u64) -> Result<T> {
    let raw = record.get(idx).unwrap_or("");
    raw.parse().map_err(|_| LoaderError::DataFormat {
        line,
        message: format!("invalid {} value: '{}'", name, raw),
    })
}

/// Like [`parse_required`], rejecting `NaN` and infinities.
fn parse_finite(record: &StringRecord, idx: usize, name: &str, line: u64) -> Result<f64> {
    let v: f64 = parse_required(record, idx, name, line)?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(LoaderError::DataFormat {
            line,
            message: format!("non-finite {} value: '{}'", name, v),
        })
    }
}

fn parse_optional(record: &StringRecord, idx: usize, name: &str, line: u64) -> Result<Option<f64>> {
    match record.get(idx) {
        None | Some("") => Ok(None),
        Some(_) => parse_required(record, idx, name, line).map(Some),
    }
}

/// Like [`parse_optional`], with the `-1` sentinel mapped to `None`.
/// Non-finite measurements are malformed.
fn parse_measurement(record: &StringRecord, idx: usize, name: &str, line: u64) -> Result<Option<f64>> {
    match record.get(idx) {
        None | Some("") => Ok(None),
        Some(_) => {
            let v = parse_finite(record, idx, name, line)?;
            Ok((v != MISSING_SENTINEL).then_some(v))
        }
    }
}

/// Guess the separator from the header line.
fn sniff_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path)?;
    let mut header = String::new();
    BufReader::new(file).read_line(&mut header)?;
    if header.trim().is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }
    Ok(if header.contains('\t') { b'\t' } else { b',' })
}

/// Load the plotted columns from a processed metrics CSV.
///
/// Columns are located by header name in the given output units:
/// `x_displacement_<L>`, `y_displacement_<L>`, `direction_deg` and
/// `distance_<L>`. Empty cells are missing values.
pub fn load_metrics_csv<P: AsRef<Path>>(path: P, units: UnitSystem) -> Result<MetricsSeries> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(LoaderError::InputNotFound(path.to_path_buf()));
    }

    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(BufReader::new(file));

    let headers = reader.headers()?.clone();
    let col_map: HashMap<&str, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name, i))
        .collect();

    let wanted = [
        displacement_component_name("x", units.length),
        displacement_component_name("y", units.length),
        "direction_deg".to_string(),
        length_name("distance", units.length),
    ];
    let missing: Vec<&str> = wanted
        .iter()
        .filter(|name| !col_map.contains_key(name.as_str()))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(LoaderError::MissingColumns(missing.join(", ")));
    }
    let idx: Vec<usize> = wanted.iter().map(|name| col_map[name.as_str()]).collect();

    let mut series = MetricsSeries::default();
    for result in reader.records() {
        let record = result?;
        let line = record.position().map_or(0, |p| p.line());
        let cell = |i: usize, name: &str| -> Result<Option<f64>> {
            Ok(parse_optional(&record, idx[i], name, line)?.filter(|v| v.is_finite()))
        };
        let dx = cell(0, "x displacement")?;
        let dy = cell(1, "y displacement")?;
        let direction = cell(2, "direction")?;
        let distance = cell(3, "distance")?;

        series.x_displacement.push(dx);
        series.y_displacement.push(dy);
        series.direction_deg.push(direction);
        series.distance.push(distance);
    }

    if series.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::units::{LengthUnit, TimeUnit};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_tab_separated() -> Result<()> {
        let file = write_file(&[
            "Track\tSlice\tX\tY\tDistance\tSpeed\tValue",
            "1\t1\t100\t50\t-1\t-1\t0",
            "1\t2\t110\t50\t14.1\t0.5\t0",
        ]);

        let table = load_tracks(file.path(), Delimiter::Auto)?;
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0].distance, None);
        assert_eq!(table.rows[0].speed, None);
        assert_eq!(table.rows[1].x, 110.0);
        assert_eq!(table.rows[1].distance, Some(14.1));
        assert_eq!(table.rows[1].speed, Some(0.5));
        assert_eq!(table.rows[1].value, Some(0.0));
        assert_eq!(table.track_count(), 1);

        Ok(())
    }

    #[test]
    fn test_load_comma_separated() -> Result<()> {
        let file = write_file(&[
            "track,slice,x_px,y_px,distance_px,speed_px/min,value",
            "1,1,100,50,-1.0,-1.0,3",
            "2,1,10,20,5,2.5,",
        ]);

        let table = load_tracks(file.path(), Delimiter::Comma)?;
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows[0].distance, None);
        assert_eq!(table.rows[1].track, 2);
        assert_eq!(table.rows[1].value, None);
        assert_eq!(table.track_count(), 2);
        assert_eq!(table.source_path.as_deref(), Some(file.path()));

        Ok(())
    }

    #[test]
    fn test_sentinel_only_in_measurements() -> Result<()> {
        let file = write_file(&["h,h,h,h,h,h,h", "1,1,-1,-1,-1,2,-1"]);

        let table = load_tracks(file.path(), Delimiter::Comma)?;
        let row = table.rows[0];
        assert_eq!(row.x, -1.0);
        assert_eq!(row.y, -1.0);
        assert_eq!(row.distance, None);
        assert_eq!(row.speed, Some(2.0));
        assert_eq!(row.value, Some(-1.0));

        Ok(())
    }

    #[test]
    fn test_missing_input() {
        let err = load_tracks("/nonexistent/tracks.csv", Delimiter::Auto).unwrap_err();
        assert!(matches!(err, LoaderError::InputNotFound(_)));
        assert_eq!(err.to_string(), "/nonexistent/tracks.csv does not exist!");
    }

    #[test]
    fn test_non_numeric_field() {
        let file = write_file(&[
            "track,slice,x,y,distance,speed,value",
            "1,1,100,50,-1,-1,0",
            "1,2,abc,50,14.1,0.5,0",
        ]);

        match load_tracks(file.path(), Delimiter::Comma) {
            Err(LoaderError::DataFormat { line, message }) => {
                assert_eq!(line, 3);
                assert!(message.contains("abc"));
            }
            other => panic!("Expected DataFormat error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_position_rejected() {
        for bad in ["NaN", "inf", "-infinity"] {
            let row = format!("1,1,100,{},-1,-1,0", bad);
            let file = write_file(&["track,slice,x,y,distance,speed,value", row.as_str()]);

            match load_tracks(file.path(), Delimiter::Comma) {
                Err(LoaderError::DataFormat { line, message }) => {
                    assert_eq!(line, 2);
                    assert!(message.contains("y"), "{}", message);
                }
                other => panic!("Expected DataFormat error for {}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_non_finite_measurement_rejected() {
        let file = write_file(&["h,h,h,h,h,h,h", "1,1,0,0,inf,1,0"]);

        let err = load_tracks(file.path(), Delimiter::Comma).unwrap_err();
        assert!(matches!(err, LoaderError::DataFormat { line: 2, .. }));
    }

    #[test]
    fn test_wrong_column_count() {
        let file = write_file(&["a,b,c,d,e,f,g", "1,1,100,50,-1"]);

        let err = load_tracks(file.path(), Delimiter::Comma).unwrap_err();
        assert!(matches!(err, LoaderError::DataFormat { line: 2, .. }));
    }

    #[test]
    fn test_header_only_is_empty() {
        let file = write_file(&["track,slice,x,y,distance,speed,value"]);

        let err = load_tracks(file.path(), Delimiter::Auto).unwrap_err();
        assert!(matches!(err, LoaderError::EmptyFile(_)));
    }

    #[test]
    fn test_input_header() {
        let header = input_header(UnitSystem::new(LengthUnit::Pixel, TimeUnit::Minute));
        assert_eq!(header[2], "x_px");
        assert_eq!(header[5], "speed_px/min");
        assert_eq!(header[6], "value");
    }

    #[test]
    fn test_load_metrics_csv() -> Result<()> {
        let file = write_file(&[
            "track,distance_mm,x_displacement_mm,y_displacement_mm,direction_rad,direction_deg",
            "1,,,,,",
            "1,0.003,0.002,0.0,0.0,0.0",
        ]);

        let series = load_metrics_csv(file.path(), UnitSystem::CANONICAL)?;
        assert_eq!(series.len(), 2);
        assert_eq!(series.x_displacement[0], None);
        assert_eq!(series.x_displacement[1], Some(0.002));
        assert_eq!(series.direction_deg[1], Some(0.0));
        assert_eq!(series.distance[1], Some(0.003));

        Ok(())
    }

    #[test]
    fn test_load_metrics_csv_missing_columns() {
        let file = write_file(&["track,distance_mm", "1,0.5"]);

        match load_metrics_csv(file.path(), UnitSystem::CANONICAL) {
            Err(LoaderError::MissingColumns(cols)) => {
                assert!(cols.contains("x_displacement_mm"));
                assert!(cols.contains("direction_deg"));
                assert!(!cols.contains("distance_mm"));
            }
            other => panic!("Expected MissingColumns error, got {:?}", other),
        }
    }
}
