pub mod filename;
pub mod layout;

use crate::recording::{Recording, assign_time_offsets};
use crate::SUPPORTED_EXTENSIONS;
use csv::ReaderBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[error("CSV error in {path}: {source}")]
    Csv { path: PathBuf, source: csv::Error },
    #[error("{path} row {row}: expected {expected} columns, found {found}")]
    Ragged {
        path: PathBuf,
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("{path} row {row}: {value:?} is not a number")]
    Value {
        path: PathBuf,
        row: usize,
        value: String,
    },
    #[error("{0} contains no samples")]
    Empty(PathBuf),
    #[error("No recordings found in {0}")]
    NoRecordings(PathBuf),
}

/// Recording files directly inside `folder`, sorted by name.
pub fn list_recordings(folder: &Path) -> Result<Vec<PathBuf>, ScanError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(folder).min_depth(1).max_depth(1).follow_links(true) {
        let entry = entry.map_err(|source| ScanError::Walk {
            path: folder.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Read one CSV sample matrix: one row per sample, one column per channel.
///
/// A first row that does not parse as numbers is taken as a header and skipped.
/// Empty cells are read as NaN.
pub fn read_samples(path: &Path) -> Result<Array2<f64>, ScanError> {
    let csv_err = |source| ScanError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let mut values: Vec<f64> = Vec::new();
    let mut width = 0;
    let mut rows = 0;
    for (n, record) in reader.records().enumerate() {
        let record = record.map_err(csv_err)?;
        let parsed: Result<Vec<f64>, &str> = record
            .iter()
            .map(|field| {
                if field.is_empty() {
                    Ok(f64::NAN)
                } else {
                    field.parse::<f64>().map_err(|_| field)
                }
            })
            .collect();
        let row = match parsed {
            Ok(row) => row,
            Err(_) if n == 0 => {
                log::debug!("{}: skipping header row", path.display());
                continue;
            }
            Err(value) => {
                return Err(ScanError::Value {
                    path: path.to_path_buf(),
                    row: n + 1,
                    value: value.to_string(),
                });
            }
        };

        if rows == 0 {
            width = row.len();
        } else if row.len() != width {
            return Err(ScanError::Ragged {
                path: path.to_path_buf(),
                row: n + 1,
                expected: width,
                found: row.len(),
            });
        }
        values.extend(row);
        rows += 1;
    }

    if rows == 0 || width == 0 {
        return Err(ScanError::Empty(path.to_path_buf()));
    }
    Array2::from_shape_vec((rows, width), values)
        .map_err(|e| ScanError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Load every recording in `folder` in file-name order.
///
/// File indices are 1-based in that order. Timestamps come from the file names and
/// offsets are relative to the first file.
pub fn scan_folder(
    folder: &Path,
    sampling_rate: f64,
    progress: bool,
) -> Result<Vec<Recording>, ScanError> {
    let paths = list_recordings(folder)?;
    if paths.is_empty() {
        return Err(ScanError::NoRecordings(folder.to_path_buf()));
    }
    log::info!("Loading {} recordings from {}", paths.len(), folder.display());

    let pb = if progress {
        ProgressBar::new(paths.len() as u64)
    } else {
        ProgressBar::hidden()
    };
    let template = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}";
    if let Ok(style) = ProgressStyle::with_template(template) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message("Loading...");

    let mut recordings = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        let samples = read_samples(path)?;
        let mut recording = Recording::new(i + 1, samples, sampling_rate);
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            recording.name = name.to_string();
        }
        recording.recorded_at = filename::parse_timestamp(path);
        if recording.recorded_at.is_none() {
            log::debug!("{}: no timestamp in file name", recording.name);
        }
        log::debug!(
            "{}: {} samples x {} channels ({:.1} s)",
            recording.name,
            recording.n_samples(),
            recording.n_channels(),
            recording.duration_sec()
        );
        recordings.push(recording);
        pb.inc(1);
    }
    pb.finish_with_message("Loaded");

    assign_time_offsets(&mut recordings);
    Ok(recordings)
}
