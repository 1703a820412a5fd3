use crate::stats;
use serde::Serialize;

/// Beat statistics for one (file, channel, polarity).
///
/// Everything except `intervals_ms` is NaN when fewer than two peaks were found.
#[derive(Debug, Clone, Serialize)]
pub struct BeatStats {
    /// Consecutive peak-to-peak intervals in milliseconds.
    pub intervals_ms: Vec<f64>,
    pub mean_interval_ms: f64,
    pub std_interval_ms: f64,
    /// `60000 / mean_interval_ms`
    pub bpm: f64,
}

impl Default for BeatStats {
    fn default() -> Self {
        Self {
            intervals_ms: Vec::new(),
            mean_interval_ms: f64::NAN,
            std_interval_ms: f64::NAN,
            bpm: f64::NAN,
        }
    }
}

impl BeatStats {
    /// Compute from 1-based peak locations sampled at `sampling_rate` Hz.
    pub fn from_locations(locations: &[usize], sampling_rate: f64) -> Self {
        let intervals_ms = intervals_ms(locations, sampling_rate);
        if intervals_ms.is_empty() {
            return Self::default();
        }
        let (mean_interval_ms, std_interval_ms) = stats::mean_std(&intervals_ms);
        Self {
            bpm: 60_000.0 / mean_interval_ms,
            intervals_ms,
            mean_interval_ms,
            std_interval_ms,
        }
    }

    /// Interval coefficient of variation in percent, `None` when undefined.
    pub fn interval_cv_pct(&self) -> Option<f64> {
        stats::ratio(self.std_interval_ms, self.mean_interval_ms).map(|r| r * 100.0)
    }
}

/// Differences between consecutive peak locations, converted to milliseconds.
pub fn intervals_ms(locations: &[usize], sampling_rate: f64) -> Vec<f64> {
    locations
        .windows(2)
        .map(|w| (w[1] as f64 - w[0] as f64) / sampling_rate * 1000.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_even_train_bpm() {
        // Period 800 samples at 1 kHz = 75 BPM
        let locs: Vec<usize> = (0..10).map(|i| 50 + i * 800).collect();
        let s = BeatStats::from_locations(&locs, 1000.0);
        assert_eq!(s.intervals_ms.len(), 9);
        assert!((s.mean_interval_ms - 800.0).abs() < 1e-9);
        assert_eq!(s.std_interval_ms, 0.0);
        assert!((s.bpm - 75.0).abs() < 1e-9);
        assert_eq!(s.interval_cv_pct(), Some(0.0));
    }

    #[test]
    fn test_even_train_any_rate() {
        let fs = 25_000.0;
        let period = 17_500usize;
        let locs: Vec<usize> = (0..6).map(|i| 1 + i * period).collect();
        let s = BeatStats::from_locations(&locs, fs);
        assert!((s.bpm - 60.0 * fs / period as f64).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_counts_are_nan() {
        for locs in [vec![], vec![42]] {
            let s = BeatStats::from_locations(&locs, 1000.0);
            assert!(s.intervals_ms.is_empty());
            assert!(s.bpm.is_nan());
            assert!(s.mean_interval_ms.is_nan());
            assert!(s.std_interval_ms.is_nan());
            assert_eq!(s.interval_cv_pct(), None);
        }
    }

    #[test]
    fn test_irregular_intervals() {
        let s = BeatStats::from_locations(&[100, 700, 1500], 1000.0);
        assert_eq!(s.intervals_ms, vec![600.0, 800.0]);
        assert!((s.mean_interval_ms - 700.0).abs() < 1e-9);
        assert!((s.std_interval_ms - 100.0).abs() < 1e-9);
        assert!((s.interval_cv_pct().unwrap() - 100.0 / 7.0).abs() < 1e-9);
    }
}
