//! Choosing between the low and high peak interpretations of a channel.
//!
//! The decision is an ordered rule list: a ratio gate, an empty-amplitude
//! fallback, then a sequence of checks where every later match overwrites the
//! outcome of earlier ones. The last matching check is kept as the reason.

use super::beats::BeatStats;
use super::peaks::{PeakSet, Polarity};
use super::{ChannelBeats, PolarityBeats};
use crate::stats;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Default gate: high peaks are only considered when there are more than
/// `0.8 * low_count` of them.
pub const DEFAULT_HIGH_TO_LOW_RATIO: f64 = 0.8;

/// Low-rate CV must exceed the high-rate CV by this factor to favour high peaks.
const RATE_CV_DOMINANCE: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ArbitrationMode {
    /// Pick per channel with the heuristic
    #[default]
    Auto,
    /// Always use low peaks
    Low,
    /// Always use high peaks
    High,
}

/// Why a polarity won.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Forced,
    /// High count was not sufficiently above the low count
    RatioGate,
    /// One side had no amplitudes; decided on counts alone
    EmptyAmplitudes,
    HigherAndSteadierAmplitude,
    HigherAndSteadierRate,
    AmplitudeGainOverAmplitudeCv,
    AmplitudeGainOverRateCv,
    LowRateIrregular,
    TooFewLowPeaks,
    SingleLowPeak,
    NoRuleMatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub polarity: Polarity,
    pub reason: DecisionReason,
}

/// The authoritative polarity of a (file, channel), with its peaks and stats copied out.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveSelection {
    pub polarity: Polarity,
    pub reason: DecisionReason,
    pub peaks: PeakSet,
    pub stats: BeatStats,
}

/// Inputs the ordered checks look at.
#[derive(Debug, Clone)]
struct Evidence {
    low_count: usize,
    high_count: usize,
    low_amp_mean: f64,
    high_amp_mean: f64,
    low_amp_cv: Option<f64>,
    high_amp_cv: Option<f64>,
    low_rate_cv: Option<f64>,
    high_rate_cv: Option<f64>,
}

impl Evidence {
    fn high_is_taller(&self) -> bool {
        self.high_amp_mean > self.low_amp_mean
    }

    fn amplitude_gain(&self) -> Option<f64> {
        stats::ratio(self.high_amp_mean, self.low_amp_mean)
    }
}

fn cv_pct(values: &[f64]) -> Option<f64> {
    let (mean, std) = stats::mean_std(values);
    stats::ratio(std, mean).map(|r| r * 100.0)
}

fn ratio_of(num: Option<f64>, den: Option<f64>) -> Option<f64> {
    stats::ratio(num?, den?)
}

/// `a < b`, false when either side is undefined.
fn lt(a: Option<f64>, b: Option<f64>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a < b)
}

fn too_few_low_peaks(ev: &Evidence) -> bool {
    ev.low_count < 3 && ev.high_count > 2
}

fn single_low_peak(ev: &Evidence) -> bool {
    ev.low_count < 2 && ev.high_count > 1
}

fn higher_and_steadier_amplitude(ev: &Evidence) -> bool {
    ev.high_is_taller() && lt(ev.high_amp_cv, ev.low_amp_cv)
}

fn higher_and_steadier_rate(ev: &Evidence) -> bool {
    ev.high_is_taller() && lt(ev.high_rate_cv, ev.low_rate_cv)
}

fn amplitude_gain_over_amplitude_cv(ev: &Evidence) -> bool {
    ev.high_is_taller() && lt(ratio_of(ev.high_amp_cv, ev.low_amp_cv), ev.amplitude_gain())
}

fn amplitude_gain_over_rate_cv(ev: &Evidence) -> bool {
    ev.high_is_taller() && lt(ratio_of(ev.high_rate_cv, ev.low_rate_cv), ev.amplitude_gain())
}

fn low_rate_irregular(ev: &Evidence) -> bool {
    lt(Some(RATE_CV_DOMINANCE), ratio_of(ev.low_rate_cv, ev.high_rate_cv))
}

type Check = fn(&Evidence) -> bool;

/// Evaluated in order; each match sets the outcome to high, the last match names the reason.
const HIGH_CHECKS: [(DecisionReason, Check); 7] = [
    (DecisionReason::HigherAndSteadierAmplitude, higher_and_steadier_amplitude),
    (DecisionReason::HigherAndSteadierRate, higher_and_steadier_rate),
    (DecisionReason::AmplitudeGainOverAmplitudeCv, amplitude_gain_over_amplitude_cv),
    (DecisionReason::AmplitudeGainOverRateCv, amplitude_gain_over_rate_cv),
    (DecisionReason::LowRateIrregular, low_rate_irregular),
    (DecisionReason::TooFewLowPeaks, too_few_low_peaks),
    (DecisionReason::SingleLowPeak, single_low_peak),
];

/// Run every check in order; low unless one matches.
fn decide(ev: &Evidence) -> Decision {
    HIGH_CHECKS.iter().fold(
        Decision {
            polarity: Polarity::Low,
            reason: DecisionReason::NoRuleMatched,
        },
        |decision, &(reason, check)| {
            if check(ev) {
                Decision {
                    polarity: Polarity::High,
                    reason,
                }
            } else {
                decision
            }
        },
    )
}

/// Polarity arbitration with an explicit high-to-low count ratio.
#[derive(Debug, Clone)]
pub struct Arbiter {
    high_to_low_ratio: f64,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_TO_LOW_RATIO)
    }
}

impl Arbiter {
    pub fn new(high_to_low_ratio: f64) -> Self {
        Self { high_to_low_ratio }
    }

    /// Decide which polarity of a channel is the beat.
    pub fn select(&self, low: &PolarityBeats, high: &PolarityBeats) -> Decision {
        let low_count = low.peaks.count();
        let high_count = high.peaks.count();

        if high_count as f64 <= self.high_to_low_ratio * low_count as f64 {
            return Decision {
                polarity: Polarity::Low,
                reason: DecisionReason::RatioGate,
            };
        }

        if low.peaks.amplitudes.is_empty() || high.peaks.amplitudes.is_empty() {
            let ev = Evidence {
                low_count,
                high_count,
                low_amp_mean: f64::NAN,
                high_amp_mean: f64::NAN,
                low_amp_cv: None,
                high_amp_cv: None,
                low_rate_cv: None,
                high_rate_cv: None,
            };
            let polarity = if too_few_low_peaks(&ev) || single_low_peak(&ev) {
                Polarity::High
            } else {
                Polarity::Low
            };
            return Decision {
                polarity,
                reason: DecisionReason::EmptyAmplitudes,
            };
        }

        // Low amplitudes are stored with their recorded (negative) sign
        let low_amps: Vec<f64> = low.peaks.amplitudes.iter().map(|a| a.abs()).collect();
        let high_amps = &high.peaks.amplitudes;

        let ev = Evidence {
            low_count,
            high_count,
            low_amp_mean: stats::nanmean(&low_amps),
            high_amp_mean: stats::nanmean(high_amps),
            low_amp_cv: cv_pct(&low_amps),
            high_amp_cv: cv_pct(high_amps),
            low_rate_cv: low.stats.interval_cv_pct(),
            high_rate_cv: high.stats.interval_cv_pct(),
        };

        decide(&ev)
    }

    /// Decide a channel under `mode` and record the winner as its active selection.
    ///
    /// Both candidates stay on the record; only `active` is replaced.
    pub fn arbitrate(&self, channel: &mut ChannelBeats, mode: ArbitrationMode) -> Decision {
        let decision = match mode {
            ArbitrationMode::Auto => self.select(&channel.low, &channel.high),
            ArbitrationMode::Low => Decision {
                polarity: Polarity::Low,
                reason: DecisionReason::Forced,
            },
            ArbitrationMode::High => Decision {
                polarity: Polarity::High,
                reason: DecisionReason::Forced,
            },
        };

        let winner = channel.candidate(decision.polarity);
        let active = ActiveSelection {
            polarity: decision.polarity,
            reason: decision.reason,
            peaks: winner.peaks.clone(),
            stats: winner.stats.clone(),
        };
        channel.active = Some(active);

        log::debug!(
            "{}: {} low / {} high peaks -> {} ({:?})",
            channel.channel,
            channel.low.peaks.count(),
            channel.high.peaks.count(),
            decision.polarity,
            decision.reason
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::ChannelId;

    const FS: f64 = 1000.0;

    fn candidate(locations: &[usize], amplitudes: &[f64]) -> PolarityBeats {
        assert_eq!(locations.len(), amplitudes.len());
        PolarityBeats {
            peaks: PeakSet {
                locations: locations.to_vec(),
                amplitudes: amplitudes.to_vec(),
                widths: vec![f64::NAN; locations.len()],
            },
            stats: BeatStats::from_locations(locations, FS),
        }
    }

    fn train(n: usize, period: usize) -> Vec<usize> {
        (0..n).map(|i| 100 + i * period).collect()
    }

    #[test]
    fn test_ratio_gate_blocks_high() {
        // 8 high vs 10 low: 8 <= 0.8 * 10, high loses whatever its statistics
        let alternating: Vec<f64> = (0..10)
            .map(|i| if i % 2 == 0 { -1.0 } else { -5.0 })
            .collect();
        let low = candidate(&train(10, 1000), &alternating);
        let high = candidate(&train(8, 1000), &[9.0; 8]);
        let d = Arbiter::default().select(&low, &high);
        assert_eq!(d.polarity, Polarity::Low);
        assert_eq!(d.reason, DecisionReason::RatioGate);
    }

    #[test]
    fn test_ratio_gate_with_nothing_found() {
        let none = candidate(&[], &[]);
        let d = Arbiter::default().select(&none, &none);
        assert_eq!(d.polarity, Polarity::Low);
        assert_eq!(d.reason, DecisionReason::RatioGate);
    }

    #[test]
    fn test_empty_low_amplitudes_decided_on_counts() {
        let none = candidate(&[], &[]);
        let three = candidate(&train(3, 600), &[3.0; 3]);
        let d = Arbiter::default().select(&none, &three);
        assert_eq!(d.polarity, Polarity::High);
        assert_eq!(d.reason, DecisionReason::EmptyAmplitudes);

        let one = candidate(&[500], &[3.0]);
        let d = Arbiter::default().select(&none, &one);
        assert_eq!(d.polarity, Polarity::Low);
        assert_eq!(d.reason, DecisionReason::EmptyAmplitudes);
    }

    #[test]
    fn test_single_low_peak_override() {
        // Low is much taller, so none of the amplitude checks fire
        let low = candidate(&[500], &[-50.0]);
        let high = candidate(&[300, 1300], &[2.0, 2.0]);
        let d = Arbiter::default().select(&low, &high);
        assert_eq!(d.polarity, Polarity::High);
        assert_eq!(d.reason, DecisionReason::SingleLowPeak);
    }

    #[test]
    fn test_taller_steadier_high_wins() {
        let low = candidate(&train(5, 1000), &[-1.0, -2.0, -1.0, -2.0, -1.0]);
        let high = candidate(&train(5, 1000), &[4.0, 4.1, 4.0, 4.1, 4.0]);
        let d = Arbiter::default().select(&low, &high);
        assert_eq!(d.polarity, Polarity::High);
        // Both trains are perfectly regular, so the rate checks cannot fire;
        // the amplitude-gain check is the last one that matched.
        assert_eq!(d.reason, DecisionReason::AmplitudeGainOverAmplitudeCv);
    }

    #[test]
    fn test_regular_low_kept() {
        // Similar counts, low taller and regular, high shorter and irregular
        let low = candidate(&train(6, 1000), &[-5.0; 6]);
        let high = candidate(
            &[100, 900, 2100, 2900, 4200, 5000],
            &[1.0, 2.0, 1.0, 2.0, 1.0, 2.0],
        );
        let d = Arbiter::default().select(&low, &high);
        assert_eq!(d.polarity, Polarity::Low);
        assert_eq!(d.reason, DecisionReason::NoRuleMatched);
    }

    #[test]
    fn test_irregular_low_rate_favours_high() {
        // High is shorter, but low intervals scatter far more
        let low = candidate(&[100, 400, 1600, 1900, 3500, 3700], &[-5.0; 6]);
        let high = candidate(&[100, 1100, 2050, 3100, 4100, 5050], &[1.0; 6]);
        let d = Arbiter::default().select(&low, &high);
        assert_eq!(d.polarity, Polarity::High);
        assert_eq!(d.reason, DecisionReason::LowRateIrregular);
    }

    #[test]
    fn test_zero_rate_cv_is_condition_false() {
        // Perfectly regular high train: low/high CV divides by zero and must not fire
        let low = candidate(&[100, 400, 1600, 1900, 3500, 3700], &[-5.0; 6]);
        let high = candidate(&train(6, 1000), &[1.0; 6]);
        let d = Arbiter::default().select(&low, &high);
        assert_eq!(d.polarity, Polarity::Low);
        assert_eq!(d.reason, DecisionReason::NoRuleMatched);
    }

    fn evidence(low_count: usize, high_count: usize) -> Evidence {
        Evidence {
            low_count,
            high_count,
            low_amp_mean: 1.0,
            high_amp_mean: 1.0,
            low_amp_cv: None,
            high_amp_cv: None,
            low_rate_cv: None,
            high_rate_cv: None,
        }
    }

    #[test]
    fn test_steadier_rate_is_overwritten_by_rate_cv_gain() {
        // Taller high with a slightly steadier rate: the rate check matches, and the
        // gain check after it always matches too, so it names the outcome.
        let ev = Evidence {
            high_amp_mean: 2.0,
            low_rate_cv: Some(5.0),
            high_rate_cv: Some(4.5),
            ..evidence(6, 6)
        };
        assert!(higher_and_steadier_rate(&ev));
        assert!(!amplitude_gain_over_amplitude_cv(&ev));
        assert!(!low_rate_irregular(&ev));
        let d = decide(&ev);
        assert_eq!(d.polarity, Polarity::High);
        assert_eq!(d.reason, DecisionReason::AmplitudeGainOverRateCv);
    }

    #[test]
    fn test_rate_cv_gain_needs_gain_above_cv_ratio() {
        // 0.9 rate CV ratio against a 0.8 gain: high is shorter, nothing fires
        let ev = Evidence {
            low_amp_mean: 2.5,
            high_amp_mean: 2.0,
            low_rate_cv: Some(5.0),
            high_rate_cv: Some(4.5),
            ..evidence(6, 6)
        };
        assert!(!higher_and_steadier_rate(&ev));
        assert!(!amplitude_gain_over_rate_cv(&ev));
        assert_eq!(decide(&ev).reason, DecisionReason::NoRuleMatched);
        assert_eq!(decide(&ev).polarity, Polarity::Low);
    }

    #[test]
    fn test_too_few_low_peaks_after_failed_checks() {
        // Low is taller and equally regular, so every earlier check is false
        let ev = Evidence {
            low_amp_mean: 5.0,
            low_amp_cv: Some(10.0),
            high_amp_cv: Some(10.0),
            low_rate_cv: Some(4.0),
            high_rate_cv: Some(4.0),
            ..evidence(2, 3)
        };
        for &(reason, check) in &HIGH_CHECKS[..5] {
            assert!(!check(&ev), "{reason:?} should not match");
        }
        let d = decide(&ev);
        assert_eq!(d.polarity, Polarity::High);
        assert_eq!(d.reason, DecisionReason::TooFewLowPeaks);
    }

    #[test]
    fn test_too_few_low_peaks_overwrites_amplitude_check() {
        let ev = Evidence {
            high_amp_mean: 3.0,
            low_amp_cv: Some(20.0),
            high_amp_cv: Some(5.0),
            ..evidence(2, 4)
        };
        assert!(higher_and_steadier_amplitude(&ev));
        assert!(!single_low_peak(&ev));
        let d = decide(&ev);
        assert_eq!(d.polarity, Polarity::High);
        assert_eq!(d.reason, DecisionReason::TooFewLowPeaks);
    }

    #[test]
    fn test_too_few_low_peaks_from_trains() {
        // 2 tall low peaks against 3 short regular high peaks
        let low = candidate(&[100, 1100], &[-50.0, -50.0]);
        let high = candidate(&train(3, 1000), &[2.0; 3]);
        let d = Arbiter::default().select(&low, &high);
        assert_eq!(d.polarity, Polarity::High);
        assert_eq!(d.reason, DecisionReason::TooFewLowPeaks);
    }

    #[test]
    fn test_arbitrate_keeps_both_candidates() {
        let mut ch = ChannelBeats {
            channel: ChannelId(3),
            low: candidate(&[500], &[-50.0]),
            high: candidate(&[300, 1300], &[2.0, 2.0]),
            active: None,
        };
        let d = Arbiter::default().arbitrate(&mut ch, ArbitrationMode::Auto);
        assert_eq!(d.polarity, Polarity::High);

        let active = ch.active.as_ref().unwrap();
        assert_eq!(active.polarity, Polarity::High);
        assert_eq!(active.peaks.locations, vec![300, 1300]);
        assert!((active.stats.bpm - 60.0).abs() < 1e-9);
        // Loser untouched
        assert_eq!(ch.low.peaks.locations, vec![500]);

        let d = Arbiter::default().arbitrate(&mut ch, ArbitrationMode::Low);
        assert_eq!(d.reason, DecisionReason::Forced);
        assert_eq!(ch.active.as_ref().unwrap().peaks.locations, vec![500]);
        assert!(ch.active.as_ref().unwrap().stats.bpm.is_nan());
    }
}
