//! Cross-file reduction of the active selections into summary matrices.
//!
//! Matrices are indexed `[file_index - 1, channel_index - 1]`. A cell without a
//! measurement is NaN, never zero.

use crate::analyzer::arbiter::ActiveSelection;
use crate::analyzer::beats;
use crate::analyzer::{AnalyzeError, FileBeats, resolve_channels};
use crate::recording::ChannelId;
use crate::stats;
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Smallest magnitude a normalization denominator may have.
pub const NORMALIZATION_EPSILON: f64 = 1e-12;

/// Number of files before the intervention used as the derived baseline.
pub const BASELINE_FILES: usize = 3;

/// Relative tolerance for the interval cross-check against the arbiter's statistics.
const INTERVAL_TOLERANCE: f64 = 1e-9;

/// Files the normalized matrices are relative to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Baseline {
    /// From the intervention start when known, else the first file.
    #[default]
    Derived,
    /// 0-based file positions
    Explicit(Vec<usize>),
}

#[derive(Debug, Clone, Default)]
pub struct SummaryOptions {
    pub baseline: Baseline,
    /// Intervention start, in seconds since the first file.
    pub intervention_start_sec: Option<f64>,
    /// Channels for the amplitude/width/interval tables. `None` = all.
    pub channels: Option<Vec<ChannelId>>,
}

/// Variable-length per-channel series of one file, keyed by channel id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileSeries {
    pub intervals_ms: BTreeMap<ChannelId, Vec<f64>>,
    pub peak_locations: BTreeMap<ChannelId, Vec<usize>>,
    pub peak_values: BTreeMap<ChannelId, Vec<f64>>,
    pub peak_widths: BTreeMap<ChannelId, Vec<f64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    /// All channels of the layout (columns of the per-channel tables).
    pub channels: Vec<ChannelId>,
    /// Columns of the amplitude and width tables.
    pub amplitude_channels: Vec<ChannelId>,
    /// 0-based files the normalization used; empty means all files.
    pub baseline: Vec<usize>,

    pub peak_count: Array2<f64>,
    pub bpm_avg: Array2<f64>,
    pub bpm_variability_pct: Array2<f64>,
    pub interval_avg_ms: Array2<f64>,
    pub interval_std_ms: Array2<f64>,
    pub bpm_norm: Array2<f64>,

    pub amplitude_avg: Array2<f64>,
    pub amplitude_variability_pct: Array2<f64>,
    pub width_avg: Array2<f64>,
    pub width_variability_pct: Array2<f64>,
    pub amplitude_norm: Array2<f64>,

    pub series: Vec<FileSeries>,
    /// Cells where the recomputed mean interval disagreed with the arbiter's.
    pub interval_mismatches: usize,
}

/// Pick baseline files from time offsets: the last two or three files that started
/// at or before the intervention, else the first file.
pub fn derive_baseline(
    time_offsets: &[Option<f64>],
    intervention_start_sec: Option<f64>,
) -> Vec<usize> {
    let Some(start) = intervention_start_sec else {
        return vec![0];
    };
    let before: Vec<usize> = time_offsets
        .iter()
        .enumerate()
        .filter(|(_, t)| matches!(t, Some(t) if *t <= start))
        .map(|(i, _)| i)
        .collect();
    if before.len() < 2 {
        return vec![0];
    }
    before[before.len().saturating_sub(BASELINE_FILES)..].to_vec()
}

/// One file's row of every table, computed independently of other files.
struct FileRow {
    peak_count: Vec<f64>,
    bpm_avg: Vec<f64>,
    bpm_variability_pct: Vec<f64>,
    interval_avg_ms: Vec<f64>,
    interval_std_ms: Vec<f64>,
    amplitude_avg: Vec<f64>,
    amplitude_variability_pct: Vec<f64>,
    width_avg: Vec<f64>,
    width_variability_pct: Vec<f64>,
    series: FileSeries,
    interval_mismatches: usize,
}

impl FileRow {
    fn compute(file: &FileBeats, n_channels: usize, subset: &[usize]) -> Self {
        let nan = |n: usize| vec![f64::NAN; n];
        let mut row = FileRow {
            peak_count: nan(n_channels),
            bpm_avg: nan(n_channels),
            bpm_variability_pct: nan(n_channels),
            interval_avg_ms: nan(n_channels),
            interval_std_ms: nan(n_channels),
            amplitude_avg: nan(subset.len()),
            amplitude_variability_pct: nan(subset.len()),
            width_avg: nan(subset.len()),
            width_variability_pct: nan(subset.len()),
            series: FileSeries::default(),
            interval_mismatches: 0,
        };

        for c in 0..n_channels {
            if let Some(active) = file.active(c) {
                row.peak_count[c] = active.peaks.count() as f64;
                row.bpm_avg[c] = active.stats.bpm;
                let mean = active.stats.mean_interval_ms;
                if mean > 0.0 {
                    row.bpm_variability_pct[c] = active.stats.std_interval_ms / mean * 100.0;
                }
            }
        }

        for (col, &c) in subset.iter().enumerate() {
            let id = ChannelId::from_index(c);
            let Some(active) = file.active(c) else {
                continue;
            };

            let amps = &active.peaks.amplitudes;
            row.amplitude_avg[col] = stats::nanmean(amps);
            row.amplitude_variability_pct[col] = stats::variability_pct(amps);
            let widths = &active.peaks.widths;
            row.width_avg[col] = stats::nanmean(widths);
            row.width_variability_pct[col] = stats::variability_pct(widths);

            // Recomputed from locations and the file's own rate, independent of the arbiter
            let intervals = beats::intervals_ms(&active.peaks.locations, file.sampling_rate);
            let (avg, std) = stats::mean_std(&intervals);
            row.interval_avg_ms[c] = avg;
            row.interval_std_ms[c] = std;
            if !intervals_agree(avg, active) {
                log::warn!(
                    "{} {}: recomputed mean interval {:.6} ms differs from {:.6} ms",
                    file.name,
                    id,
                    avg,
                    active.stats.mean_interval_ms
                );
                row.interval_mismatches += 1;
            }

            row.series.intervals_ms.insert(id, intervals);
            row.series.peak_locations.insert(id, active.peaks.locations.clone());
            row.series.peak_values.insert(id, amps.clone());
            row.series.peak_widths.insert(id, widths.clone());
        }
        row
    }
}

fn intervals_agree(recomputed: f64, active: &ActiveSelection) -> bool {
    let reported = active.stats.mean_interval_ms;
    if recomputed.is_nan() || reported.is_nan() {
        return recomputed.is_nan() == reported.is_nan();
    }
    (recomputed - reported).abs() <= INTERVAL_TOLERANCE * reported.abs().max(1.0)
}

/// Replace a near-zero denominator by ±epsilon, keeping its sign. NaN stays NaN.
fn floor_magnitude(denominator: f64) -> f64 {
    if denominator.abs() < NORMALIZATION_EPSILON {
        NORMALIZATION_EPSILON.copysign(denominator)
    } else {
        denominator
    }
}

/// Divide every column by its NaN-mean over the baseline rows (all rows when empty).
fn normalize(values: &Array2<f64>, baseline: &[usize]) -> Array2<f64> {
    let mut out = values.clone();
    for (c, mut column) in out.columns_mut().into_iter().enumerate() {
        let reference: Vec<f64> = if baseline.is_empty() {
            values.column(c).to_vec()
        } else {
            baseline.iter().map(|&r| values[[r, c]]).collect()
        };
        let denominator = floor_magnitude(stats::nanmean(&reference));
        column.mapv_inplace(|v| v / denominator);
    }
    out
}

/// Stack one column-set per file into a `files x width` matrix.
fn table<F>(rows: &[FileRow], width: usize, pick: F) -> Array2<f64>
where
    F: Fn(&FileRow) -> &[f64],
{
    let mut m = Array2::from_elem((rows.len(), width), f64::NAN);
    for (r, row) in rows.iter().enumerate() {
        for (c, &v) in pick(row).iter().enumerate() {
            m[[r, c]] = v;
        }
    }
    m
}

/// Reduce arbitrated files into the summary tables.
pub fn summarize(files: &[FileBeats], options: &SummaryOptions) -> Result<Summary, AnalyzeError> {
    let n_files = files.len();
    let n_channels = files.iter().map(|f| f.channels.len()).max().unwrap_or(0);
    let subset = resolve_channels(options.channels.as_deref(), n_channels)?;

    let requested = match &options.baseline {
        Baseline::Explicit(rows) => rows.clone(),
        Baseline::Derived => {
            let offsets: Vec<Option<f64>> = files.iter().map(|f| f.time_offset_sec).collect();
            derive_baseline(&offsets, options.intervention_start_sec)
        }
    };
    let baseline: Vec<usize> = requested.iter().copied().filter(|&r| r < n_files).collect();
    if baseline.len() < requested.len() {
        log::warn!(
            "Baseline files {:?} out of range for {} files; using {:?}",
            requested,
            n_files,
            baseline
        );
    }
    if baseline.is_empty() {
        log::info!("No baseline files, normalizing against the mean of all files");
    }

    let rows: Vec<FileRow> = files
        .par_iter()
        .map(|f| FileRow::compute(f, n_channels, &subset))
        .collect();

    let peak_count = table(&rows, n_channels, |r| r.peak_count.as_slice());
    let bpm_avg = table(&rows, n_channels, |r| r.bpm_avg.as_slice());
    let bpm_variability_pct = table(&rows, n_channels, |r| r.bpm_variability_pct.as_slice());
    let interval_avg_ms = table(&rows, n_channels, |r| r.interval_avg_ms.as_slice());
    let interval_std_ms = table(&rows, n_channels, |r| r.interval_std_ms.as_slice());
    let amplitude_avg = table(&rows, subset.len(), |r| r.amplitude_avg.as_slice());
    let amplitude_variability_pct =
        table(&rows, subset.len(), |r| r.amplitude_variability_pct.as_slice());
    let width_avg = table(&rows, subset.len(), |r| r.width_avg.as_slice());
    let width_variability_pct = table(&rows, subset.len(), |r| r.width_variability_pct.as_slice());

    let bpm_norm = normalize(&bpm_avg, &baseline);
    let amplitude_norm = normalize(&amplitude_avg, &baseline);

    let interval_mismatches = rows.iter().map(|r| r.interval_mismatches).sum();

    Ok(Summary {
        channels: (0..n_channels).map(ChannelId::from_index).collect(),
        amplitude_channels: subset.iter().copied().map(ChannelId::from_index).collect(),
        baseline,
        peak_count,
        bpm_avg,
        bpm_variability_pct,
        interval_avg_ms,
        interval_std_ms,
        bpm_norm,
        amplitude_avg,
        amplitude_variability_pct,
        width_avg,
        width_variability_pct,
        amplitude_norm,
        series: rows.into_iter().map(|r| r.series).collect(),
        interval_mismatches,
    })
}
