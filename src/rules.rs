use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Default acquisition rate of the MEA amplifiers, in Hz.
pub const DEFAULT_FRAME_RATE: f64 = 25e3;

#[derive(Error, Debug, PartialEq)]
pub enum RuleError {
    #[error("frame rate must be a positive number, got {0}")]
    FrameRate(f64),
    #[error("max BPM must be a positive number, got {0}")]
    MaxBpm(f64),
    #[error("min peak value must be finite, got {0}")]
    MinPeakValue(f64),
    #[error("minimum peak distance is {0} samples; raise the frame rate or lower max BPM")]
    MinDistance(f64),
}

/// Kind of signal in a recording. Selects the preset detection thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    /// Extracellular field potentials from a microelectrode array
    #[default]
    Mea,
    /// Calcium imaging traces
    Ca,
    /// Intracellular action potentials
    Ap,
    Other,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Mea => "MEA",
            Self::Ca => "CA",
            Self::Ap => "AP",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Peak-finding rule. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Sampling rate the distance constraint is derived from, in Hz.
    pub frame_rate: f64,
    pub signal: SignalType,
    /// Whether the downward deflection is the physiological event for this signal.
    pub low_peaks_counted: bool,
    /// Minimum peak width at half prominence, in samples. 0 disables the width check.
    pub min_peak_width: usize,
    /// Fastest beat rate considered physiological.
    pub max_bpm: f64,
    /// Minimum peak amplitude, in the recording's physical units.
    pub min_peak_value: f64,
}

impl Rule {
    /// Preset detection rule for a signal type.
    pub fn for_signal(signal: SignalType, frame_rate: f64) -> Self {
        let (low_peaks_counted, max_bpm, min_peak_value) = match signal {
            SignalType::Mea => (true, 120.0, 2.5e-5),
            SignalType::Ca => (false, 180.0, 5.0),
            SignalType::Ap => (false, 180.0, 400.0),
            SignalType::Other => (true, 120.0, 2.5e-5),
        };
        Self {
            frame_rate,
            signal,
            low_peaks_counted,
            min_peak_width: 50,
            max_bpm,
            min_peak_value,
        }
    }

    /// Minimum spacing between two beats, in seconds.
    pub fn min_distance_sec(&self) -> f64 {
        60.0 / self.max_bpm
    }

    /// Minimum spacing between two reported peaks, in samples (truncated).
    pub fn min_distance_frames(&self) -> usize {
        (self.min_distance_sec() * self.frame_rate) as usize
    }

    pub fn validate(&self) -> Result<(), RuleError> {
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(RuleError::FrameRate(self.frame_rate));
        }
        if !(self.max_bpm.is_finite() && self.max_bpm > 0.0) {
            return Err(RuleError::MaxBpm(self.max_bpm));
        }
        if !self.min_peak_value.is_finite() {
            return Err(RuleError::MinPeakValue(self.min_peak_value));
        }
        let distance = self.min_distance_sec() * self.frame_rate;
        if distance < 1.0 {
            return Err(RuleError::MinDistance(distance));
        }
        Ok(())
    }
}

impl Default for Rule {
    fn default() -> Self {
        Self::for_signal(SignalType::Mea, DEFAULT_FRAME_RATE)
    }
}
