use crate::rules::Rule;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which deflection of the signal is treated as the beat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    /// Downward deflections: the signal is inverted and clipped at zero before the search.
    Low,
    /// Upward deflections: the signal is searched as recorded.
    High,
}

impl Polarity {
    /// Signal the local-maxima search runs on for this polarity.
    pub fn prepare(self, samples: ArrayView1<'_, f64>) -> Vec<f64> {
        match self {
            Self::Low => samples.iter().map(|&v| (-v).max(0.0)).collect(),
            Self::High => samples.to_vec(),
        }
    }

    /// Converts a searched value back to the recorded sign.
    fn restore_sign(self, value: f64) -> f64 {
        match self {
            Self::Low => -value,
            Self::High => value,
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::High => "high",
        })
    }
}

/// Peaks found on one (file, channel, polarity).
///
/// The three vectors always have the same length. Locations are 1-based sample
/// numbers in strictly increasing order. Low-polarity amplitudes keep the
/// recorded (negative) sign.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PeakSet {
    pub locations: Vec<usize>,
    pub amplitudes: Vec<f64>,
    /// Width at half prominence in samples, NaN when width was not measured.
    pub widths: Vec<f64>,
}

impl PeakSet {
    pub fn count(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

/// A peak from the local-maxima search, before polarity bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// 0-based sample index
    pub index: usize,
    pub height: f64,
    pub width: f64,
}

/// Amplitude / distance / width constrained local-maxima search.
#[derive(Debug, Clone)]
pub struct PeakDetector {
    min_height: f64,
    min_distance: usize,
    min_width: usize,
}

impl PeakDetector {
    pub fn new(min_height: f64, min_distance: usize, min_width: usize) -> Self {
        Self {
            min_height,
            min_distance: min_distance.max(1),
            min_width,
        }
    }

    pub fn from_rule(rule: &Rule) -> Self {
        Self::new(rule.min_peak_value, rule.min_distance_frames(), rule.min_peak_width)
    }

    /// Detect the peaks of one channel for one polarity.
    pub fn detect(&self, samples: ArrayView1<'_, f64>, polarity: Polarity) -> PeakSet {
        let prepared = polarity.prepare(samples);
        let peaks = self.find_peaks(&prepared);
        PeakSet {
            locations: peaks.iter().map(|p| p.index + 1).collect(),
            amplitudes: peaks.iter().map(|p| polarity.restore_sign(p.height)).collect(),
            widths: peaks.iter().map(|p| p.width).collect(),
        }
    }

    /// Local maxima of `x` that pass the height, distance and width constraints.
    ///
    /// Constraints apply in that order: the distance filter keeps the tallest
    /// peak of each neighbourhood before widths are measured.
    pub fn find_peaks(&self, x: &[f64]) -> Vec<Peak> {
        let candidates: Vec<usize> = local_maxima(x)
            .into_iter()
            .filter(|&i| x[i] >= self.min_height)
            .collect();

        let heights: Vec<f64> = candidates.iter().map(|&i| x[i]).collect();
        let keep = select_by_distance(&candidates, &heights, self.min_distance);

        candidates
            .iter()
            .zip(keep)
            .filter(|(_, keep)| *keep)
            .filter_map(|(&index, _)| {
                let width = if self.min_width > 0 {
                    let w = half_prominence_width(x, index);
                    if w < self.min_width as f64 {
                        return None;
                    }
                    w
                } else {
                    f64::NAN
                };
                Some(Peak {
                    index,
                    height: x[index],
                    width,
                })
            })
            .collect()
    }
}

/// Indices of samples higher than their left neighbour and their first differing
/// right neighbour. A flat top reports its middle sample (rounded down).
fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Tallest-first suppression: each kept peak removes every neighbour closer than
/// `distance`. Equal heights are visited left to right.
fn select_by_distance(peaks: &[usize], heights: &[f64], distance: usize) -> Vec<bool> {
    let mut keep = vec![true; peaks.len()];
    if distance <= 1 {
        return keep;
    }

    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| heights[b].total_cmp(&heights[a]).then(a.cmp(&b)));

    for &i in &order {
        if !keep[i] {
            continue;
        }
        let mut j = i;
        while j > 0 && peaks[i] - peaks[j - 1] < distance {
            keep[j - 1] = false;
            j -= 1;
        }
        let mut j = i + 1;
        while j < peaks.len() && peaks[j] - peaks[i] < distance {
            keep[j] = false;
            j += 1;
        }
    }
    keep
}

/// Prominence of a peak plus the bases the width search is bounded by.
fn prominence(x: &[f64], peak: usize) -> (f64, usize, usize) {
    let top = x[peak];

    let mut left_min = top;
    let mut left_base = peak;
    let mut i = peak;
    loop {
        if x[i] > top {
            break;
        }
        if x[i] < left_min {
            left_min = x[i];
            left_base = i;
        }
        if i == 0 {
            break;
        }
        i -= 1;
    }

    let mut right_min = top;
    let mut right_base = peak;
    for (j, &v) in x.iter().enumerate().skip(peak) {
        if v > top {
            break;
        }
        if v < right_min {
            right_min = v;
            right_base = j;
        }
    }

    (top - left_min.max(right_min), left_base, right_base)
}

/// Width of a peak at half its prominence, with linear interpolation at the crossings.
fn half_prominence_width(x: &[f64], peak: usize) -> f64 {
    let (prom, left_base, right_base) = prominence(x, peak);
    let height = x[peak] - prom * 0.5;

    let mut i = peak;
    while left_base < i && height < x[i] {
        i -= 1;
    }
    let mut left = i as f64;
    if x[i] < height {
        left += (height - x[i]) / (x[i + 1] - x[i]);
    }

    let mut i = peak;
    while i < right_base && height < x[i] {
        i += 1;
    }
    let mut right = i as f64;
    if x[i] < height {
        right -= (height - x[i]) / (x[i - 1] - x[i]);
    }

    right - left
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rules::SignalType;
    use ndarray::Array1;

    /// Add a symmetric triangular pulse with its apex at `center` (0-based).
    pub(crate) fn add_pulse(x: &mut [f64], center: usize, half_base: usize, amp: f64) {
        for k in 0..half_base {
            let v = amp * (1.0 - k as f64 / half_base as f64);
            if center + k < x.len() {
                x[center + k] += v;
            }
            if k > 0 && center >= k {
                x[center - k] += v;
            }
        }
    }

    fn detector(min_distance: usize) -> PeakDetector {
        PeakDetector::new(1.0, min_distance, 50)
    }

    #[test]
    fn test_local_maxima_plateau_reports_middle() {
        let x = [0.0, 1.0, 3.0, 3.0, 3.0, 3.0, 1.0, 0.0];
        assert_eq!(local_maxima(&x), vec![3]);
        // Endpoints and rising edges into the border never qualify
        assert!(local_maxima(&[5.0, 1.0, 2.0]).is_empty());
        assert!(local_maxima(&[0.0, 1.0]).is_empty());
    }

    #[test]
    fn test_single_high_pulse() {
        let mut x = vec![0.0; 1000];
        add_pulse(&mut x, 400, 60, 5.0);
        let peaks = detector(100).find_peaks(&x);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 400);
        assert_eq!(peaks[0].height, 5.0);
        assert!((peaks[0].width - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_low_polarity_needs_inversion() {
        let mut x = vec![0.0; 1000];
        add_pulse(&mut x, 250, 60, -5.0);
        let samples = Array1::from(x);

        let high = detector(100).detect(samples.view(), Polarity::High);
        assert!(high.is_empty());

        let low = detector(100).detect(samples.view(), Polarity::Low);
        assert_eq!(low.locations, vec![251]);
        assert_eq!(low.amplitudes, vec![-5.0]);
        assert_eq!(low.widths.len(), 1);
    }

    #[test]
    fn test_below_min_height_dropped() {
        let mut x = vec![0.0; 1000];
        add_pulse(&mut x, 500, 60, 0.9);
        assert!(detector(100).find_peaks(&x).is_empty());
    }

    #[test]
    fn test_narrow_peak_dropped() {
        let mut x = vec![0.0; 1000];
        add_pulse(&mut x, 300, 20, 5.0);
        add_pulse(&mut x, 700, 80, 5.0);
        let peaks = detector(100).find_peaks(&x);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 700);
    }

    #[test]
    fn test_taller_wins_within_distance() {
        let mut x = vec![0.0; 2000];
        add_pulse(&mut x, 500, 60, 3.0);
        add_pulse(&mut x, 700, 60, 6.0);
        let peaks = detector(400).find_peaks(&x);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 700);

        // Same pair, taller one first
        let mut y = vec![0.0; 2000];
        add_pulse(&mut y, 500, 60, 6.0);
        add_pulse(&mut y, 700, 60, 3.0);
        let peaks = detector(400).find_peaks(&y);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 500);
    }

    #[test]
    fn test_equal_heights_leftmost_wins() {
        let mut x = vec![0.0; 2000];
        add_pulse(&mut x, 500, 60, 4.0);
        add_pulse(&mut x, 700, 60, 4.0);
        let peaks = detector(400).find_peaks(&x);
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 500);
    }

    #[test]
    fn test_distance_spacing_invariant() {
        let mut x = vec![0.0; 10_000];
        for (i, center) in (200..9800).step_by(150).enumerate() {
            add_pulse(&mut x, center, 60, 2.0 + (i % 5) as f64);
        }
        let peaks = detector(500).find_peaks(&x);
        assert!(!peaks.is_empty());
        for pair in peaks.windows(2) {
            assert!(pair[1].index > pair[0].index);
            assert!(pair[1].index - pair[0].index >= 500);
        }
    }

    #[test]
    fn test_width_disabled_reports_nan() {
        let mut x = vec![0.0; 500];
        add_pulse(&mut x, 250, 10, 5.0);
        let peaks = PeakDetector::new(1.0, 1, 0).find_peaks(&x);
        assert_eq!(peaks.len(), 1);
        assert!(peaks[0].width.is_nan());
    }

    #[test]
    fn test_from_rule() {
        let rule = Rule {
            max_bpm: 120.0,
            ..Rule::for_signal(SignalType::Mea, 1000.0)
        };
        let d = PeakDetector::from_rule(&rule);
        assert_eq!(d.min_distance, 500);
        assert_eq!(d.min_width, 50);
        assert_eq!(d.min_height, 2.5e-5);
    }
}
