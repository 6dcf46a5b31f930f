//! Unit conversion registry and column naming conventions.
//!
//! Conversions are scalar multiplies looked up in an immutable table keyed by
//! `(from, to)` unit pairs. A pair that was never registered cannot be
//! converted. The naming helpers build the header strings used at the CSV
//! boundary (`x_mm`, `speed_mm/min`, ...).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default calibration of the tracking microscope.
pub const DEFAULT_PIXELS_PER_MM: f64 = 4440.0;

/// Seconds in one minute.
pub const DEFAULT_SECONDS_PER_MINUTE: f64 = 60.0;

/// Errors raised for unknown units or unregistered conversions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    #[error("unknown {kind} unit: '{key}'")]
    UnknownUnit { kind: &'static str, key: String },

    #[error("no conversion registered from '{from}' to '{to}'")]
    UnregisteredConversion { from: String, to: String },

    #[error("conversion factor from '{from}' to '{to}' must be positive and finite, got {factor}")]
    InvalidFactor { from: String, to: String, factor: f64 },
}

/// Result type for unit operations.
pub type Result<T> = std::result::Result<T, UnitError>;

/// Length units understood by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LengthUnit {
    #[serde(rename = "px")]
    Pixel,
    #[serde(rename = "mm")]
    Millimeter,
}

impl LengthUnit {
    pub const ALL: [LengthUnit; 2] = [LengthUnit::Pixel, LengthUnit::Millimeter];

    /// Registry key, also used in column names.
    pub fn key(self) -> &'static str {
        match self {
            LengthUnit::Pixel => "px",
            LengthUnit::Millimeter => "mm",
        }
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for LengthUnit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self> {
        LengthUnit::ALL
            .into_iter()
            .find(|unit| unit.key() == s)
            .ok_or_else(|| UnitError::UnknownUnit {
                kind: "length",
                key: s.to_string(),
            })
    }
}

/// Time units understood by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    #[serde(rename = "min")]
    Minute,
    #[serde(rename = "s")]
    Second,
}

impl TimeUnit {
    pub const ALL: [TimeUnit; 2] = [TimeUnit::Minute, TimeUnit::Second];

    /// Registry key, also used in column names.
    pub fn key(self) -> &'static str {
        match self {
            TimeUnit::Minute => "min",
            TimeUnit::Second => "s",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for TimeUnit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self> {
        TimeUnit::ALL
            .into_iter()
            .find(|unit| unit.key() == s)
            .ok_or_else(|| UnitError::UnknownUnit {
                kind: "time",
                key: s.to_string(),
            })
    }
}

/// A length unit paired with a time unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitSystem {
    pub length: LengthUnit,
    pub time: TimeUnit,
}

impl UnitSystem {
    /// Output units of the pipeline: millimeters and minutes.
    pub const CANONICAL: UnitSystem = UnitSystem {
        length: LengthUnit::Millimeter,
        time: TimeUnit::Minute,
    };

    pub fn new(length: LengthUnit, time: TimeUnit) -> Self {
        Self { length, time }
    }

    /// Parse a unit system from registry keys.
    pub fn parse(length: &str, time: &str) -> Result<Self> {
        Ok(Self {
            length: length.parse()?,
            time: time.parse()?,
        })
    }
}

impl Default for UnitSystem {
    fn default() -> Self {
        Self::new(LengthUnit::Pixel, TimeUnit::Minute)
    }
}

/// Immutable table of conversion factors.
///
/// Every unit converts to itself with factor 1. Registering `a -> b` with
/// factor `f` also registers `b -> a` with `1 / f`, so round trips are exact
/// up to floating point.
#[derive(Debug, Clone)]
pub struct UnitRegistry {
    lengths: HashMap<(LengthUnit, LengthUnit), f64>,
    times: HashMap<(TimeUnit, TimeUnit), f64>,
}

impl UnitRegistry {
    /// Registry holding only identity conversions.
    pub fn identity() -> Self {
        let lengths = LengthUnit::ALL.into_iter().map(|u| ((u, u), 1.0)).collect();
        let times = TimeUnit::ALL.into_iter().map(|u| ((u, u), 1.0)).collect();
        Self { lengths, times }
    }

    /// Build the standard registry from a microscope calibration.
    ///
    /// # Errors
    ///
    /// Returns [`UnitError::InvalidFactor`] if either calibration value is
    /// not a positive finite number.
    pub fn new(pixels_per_mm: f64, seconds_per_minute: f64) -> Result<Self> {
        check_factor(LengthUnit::Pixel.key(), LengthUnit::Millimeter.key(), 1.0 / pixels_per_mm)?;
        check_factor(TimeUnit::Minute.key(), TimeUnit::Second.key(), seconds_per_minute)?;
        Ok(Self::calibrated(pixels_per_mm, seconds_per_minute))
    }

    /// Standard registry from a calibration already known to be valid.
    fn calibrated(pixels_per_mm: f64, seconds_per_minute: f64) -> Self {
        let mut registry = Self::identity();
        registry.insert_length(LengthUnit::Pixel, LengthUnit::Millimeter, 1.0 / pixels_per_mm);
        registry.insert_time(TimeUnit::Minute, TimeUnit::Second, seconds_per_minute);
        registry
    }

    fn insert_length(&mut self, from: LengthUnit, to: LengthUnit, factor: f64) {
        self.lengths.insert((from, to), factor);
        self.lengths.insert((to, from), 1.0 / factor);
    }

    fn insert_time(&mut self, from: TimeUnit, to: TimeUnit, factor: f64) {
        self.times.insert((from, to), factor);
        self.times.insert((to, from), 1.0 / factor);
    }

    /// Register a length conversion and its reciprocal.
    pub fn with_length(mut self, from: LengthUnit, to: LengthUnit, factor: f64) -> Result<Self> {
        check_factor(from.key(), to.key(), factor)?;
        self.insert_length(from, to, factor);
        Ok(self)
    }

    /// Register a time conversion and its reciprocal.
    pub fn with_time(mut self, from: TimeUnit, to: TimeUnit, factor: f64) -> Result<Self> {
        check_factor(from.key(), to.key(), factor)?;
        self.insert_time(from, to, factor);
        Ok(self)
    }

    /// Multiplier taking a length in `from` to a length in `to`.
    pub fn length_factor(&self, from: LengthUnit, to: LengthUnit) -> Result<f64> {
        self.lengths
            .get(&(from, to))
            .copied()
            .ok_or_else(|| unregistered(from.key(), to.key()))
    }

    /// Multiplier taking a time in `from` to a time in `to`.
    pub fn time_factor(&self, from: TimeUnit, to: TimeUnit) -> Result<f64> {
        self.times
            .get(&(from, to))
            .copied()
            .ok_or_else(|| unregistered(from.key(), to.key()))
    }

    /// Multiplier taking a speed in `from` units to `to` units.
    pub fn speed_factor(&self, from: UnitSystem, to: UnitSystem) -> Result<f64> {
        Ok(self.length_factor(from.length, to.length)? / self.time_factor(from.time, to.time)?)
    }

    pub fn convert_length(&self, value: f64, from: LengthUnit, to: LengthUnit) -> Result<f64> {
        Ok(value * self.length_factor(from, to)?)
    }

    pub fn convert_time(&self, value: f64, from: TimeUnit, to: TimeUnit) -> Result<f64> {
        Ok(value * self.time_factor(from, to)?)
    }

    pub fn convert_speed(
        &self,
        value: f64,
        from_length: LengthUnit,
        from_time: TimeUnit,
        to_length: LengthUnit,
        to_time: TimeUnit,
    ) -> Result<f64> {
        let factor = self.speed_factor(
            UnitSystem::new(from_length, from_time),
            UnitSystem::new(to_length, to_time),
        )?;
        Ok(value * factor)
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::calibrated(DEFAULT_PIXELS_PER_MM, DEFAULT_SECONDS_PER_MINUTE)
    }
}

fn check_factor(from: &str, to: &str, factor: f64) -> Result<()> {
    if factor.is_finite() && factor > 0.0 {
        Ok(())
    } else {
        Err(UnitError::InvalidFactor {
            from: from.to_string(),
            to: to.to_string(),
            factor,
        })
    }
}

fn unregistered(from: &str, to: &str) -> UnitError {
    UnitError::UnregisteredConversion {
        from: from.to_string(),
        to: to.to_string(),
    }
}

// Column naming

pub fn length_name(name: &str, unit: LengthUnit) -> String {
    format!("{}_{}", name, unit)
}

pub fn time_name(name: &str, unit: TimeUnit) -> String {
    format!("{}_{}", name, unit)
}

pub fn speed_name(name: &str, length: LengthUnit, time: TimeUnit) -> String {
    format!("{}_{}/{}", name, length, time)
}

pub fn displacement_component_name(name: &str, unit: LengthUnit) -> String {
    format!("{}_displacement_{}", name, unit)
}

pub fn velocity_component_name(name: &str, length: LengthUnit, time: TimeUnit) -> String {
    format!("{}_velocity_{}/{}", name, length, time)
}
