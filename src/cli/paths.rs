//! Default output paths.

use std::path::{Path, PathBuf};

/// Stem endings that name the input units, with the token replaced by `mm`.
const UNIT_SUFFIXES: [(&str, &str); 3] = [
    ("in unit per min", "unit"),
    ("in px per min", "px"),
    ("in pixels per min", "pixels"),
];

/// Suffix appended when the input name does not carry its units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSuffix {
    Processed,
    Calibrated,
}

impl OutputSuffix {
    fn as_str(self) -> &'static str {
        match self {
            OutputSuffix::Processed => " processed",
            OutputSuffix::Calibrated => " calibrated",
        }
    }
}

/// Derive the output CSV path from the input path.
///
/// `tracks in px per min.txt` becomes `tracks in mm per min.csv`; a name
/// without a unit suffix gets ` processed.csv` or ` calibrated.csv`.
pub fn default_output_path(input: &Path, suffix: OutputSuffix) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let renamed = UNIT_SUFFIXES.iter().find_map(|(ending, token)| {
        stem.strip_suffix(ending)
            .map(|head| format!("{}{}.csv", head, ending.replace(token, "mm")))
    });
    let name = renamed.unwrap_or_else(|| format!("{}{}.csv", stem, suffix.as_str()));
    input.with_file_name(name)
}

/// Stem for plot files: the input path without its extension.
pub fn default_plot_stem(input: &Path) -> PathBuf {
    input.with_extension("")
}
