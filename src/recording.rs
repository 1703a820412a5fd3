use chrono::NaiveDateTime;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 1-based channel id as seen by callers. Internally channels are 0-based columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u32);

impl ChannelId {
    /// Build from a 0-based column index.
    pub fn from_index(index: usize) -> Self {
        Self(index as u32 + 1)
    }

    /// 0-based column index, `None` for the invalid id 0.
    pub fn index(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch{}", self.0)
    }
}

/// One recording file, fully loaded: rows are samples, columns are channels.
#[derive(Debug, Clone)]
pub struct Recording {
    /// 1-based position of the file in the run.
    pub file_index: usize,
    pub name: String,
    /// Samples in physical units (volts for MEA).
    pub samples: Array2<f64>,
    /// Sampling rate in Hz.
    pub sampling_rate: f64,
    /// Wall-clock start of the recording, when known.
    pub recorded_at: Option<NaiveDateTime>,
    /// Seconds since the first file of the run started, when known.
    pub time_offset_sec: Option<f64>,
}

impl Recording {
    pub fn new(file_index: usize, samples: Array2<f64>, sampling_rate: f64) -> Self {
        Self {
            file_index,
            name: format!("file{file_index}"),
            samples,
            sampling_rate,
            recorded_at: None,
            time_offset_sec: None,
        }
    }

    pub fn n_samples(&self) -> usize {
        self.samples.nrows()
    }

    pub fn n_channels(&self) -> usize {
        self.samples.ncols()
    }

    /// Samples of one 0-based channel, `None` when out of range.
    pub fn channel(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        (index < self.n_channels()).then(|| self.samples.column(index))
    }

    pub fn duration_sec(&self) -> f64 {
        self.n_samples() as f64 / self.sampling_rate
    }
}

/// Fill in `time_offset_sec` for every recording relative to the first one.
///
/// The first file is at 0 when it has a timestamp. A recording without a timestamp,
/// or any recording when the first file has none, is left at `None`.
pub fn assign_time_offsets(recordings: &mut [Recording]) {
    let origin = recordings.first().and_then(|r| r.recorded_at);
    for rec in recordings.iter_mut() {
        rec.time_offset_sec = match (origin, rec.recorded_at) {
            (Some(t0), Some(t)) => Some((t - t0).num_milliseconds() as f64 / 1000.0),
            _ => None,
        };
    }
}
