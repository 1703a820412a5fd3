pub mod arbiter;
pub mod beats;
pub mod peaks;

use crate::recording::{ChannelId, Recording};
use crate::rules::{Rule, RuleError};
use crate::scanner::layout::{ChannelLayout, LayoutError};
use arbiter::{ActiveSelection, Arbiter, ArbitrationMode, DEFAULT_HIGH_TO_LOW_RATIO};
use beats::BeatStats;
use indicatif::{ProgressBar, ProgressStyle};
use peaks::{PeakDetector, PeakSet, Polarity};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Invalid rule: {0}")]
    Rule(#[from] RuleError),
    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),
    #[error("Channel ids are 1-based, got {0}")]
    InvalidChannel(ChannelId),
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Peaks and beat statistics of one polarity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PolarityBeats {
    pub peaks: PeakSet,
    pub stats: BeatStats,
}

impl PolarityBeats {
    fn detect(
        recording: &Recording,
        index: usize,
        polarity: Polarity,
        detector: &PeakDetector,
    ) -> Option<Self> {
        let samples = recording.channel(index)?;
        let peaks = detector.detect(samples, polarity);
        let stats = BeatStats::from_locations(&peaks.locations, recording.sampling_rate);
        Some(Self { peaks, stats })
    }
}

/// Both candidate interpretations of a (file, channel) and the chosen one.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelBeats {
    pub channel: ChannelId,
    pub low: PolarityBeats,
    pub high: PolarityBeats,
    /// Set by the arbiter; `None` until arbitration ran.
    pub active: Option<ActiveSelection>,
}

impl ChannelBeats {
    pub fn candidate(&self, polarity: Polarity) -> &PolarityBeats {
        match polarity {
            Polarity::Low => &self.low,
            Polarity::High => &self.high,
        }
    }
}

/// Everything found in one recording file.
#[derive(Debug, Clone, Serialize)]
pub struct FileBeats {
    /// 1-based
    pub file_index: usize,
    pub name: String,
    pub sampling_rate: f64,
    pub time_offset_sec: Option<f64>,
    /// Indexed by 0-based channel; `None` for channels that were not processed.
    pub channels: Vec<Option<ChannelBeats>>,
}

impl FileBeats {
    fn empty(recording: &Recording, n_channels: usize) -> Self {
        Self {
            file_index: recording.file_index,
            name: recording.name.clone(),
            sampling_rate: recording.sampling_rate,
            time_offset_sec: recording.time_offset_sec,
            channels: vec![None; n_channels],
        }
    }

    pub fn channel(&self, id: ChannelId) -> Option<&ChannelBeats> {
        self.channels.get(id.index()?)?.as_ref()
    }

    pub fn active(&self, index: usize) -> Option<&ActiveSelection> {
        self.channels.get(index)?.as_ref()?.active.as_ref()
    }

    /// Peak count per channel for one polarity; 0 for unprocessed channels.
    pub fn counts(&self, polarity: Polarity) -> Vec<usize> {
        self.channels
            .iter()
            .map(|ch| ch.as_ref().map_or(0, |c| c.candidate(polarity).peaks.count()))
            .collect()
    }
}

/// Which files and channels to process. `None` means all of them.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// 1-based file numbers
    pub files: Option<Vec<usize>>,
    pub channels: Option<Vec<ChannelId>>,
}

impl Selection {
    /// Select the data columns of the given electrodes. Every layout electrode when
    /// none are given; no channel restriction when the layout is empty.
    pub fn from_layout(
        files: Option<Vec<usize>>,
        layout: &ChannelLayout,
        electrodes: &[u32],
    ) -> Result<Self, AnalyzeError> {
        let channels = if layout.is_empty() && electrodes.is_empty() {
            None
        } else {
            Some(layout.columns_for(electrodes)?)
        };
        Ok(Self { files, channels })
    }
}

/// Settings for one analysis run, passed explicitly to every call.
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub rule: Rule,
    pub mode: ArbitrationMode,
    pub high_to_low_ratio: f64,
    /// Worker threads, at least 1.
    pub jobs: usize,
    pub progress: bool,
}

impl AnalyzeOptions {
    pub fn new(rule: Rule) -> Self {
        Self {
            rule,
            mode: ArbitrationMode::Auto,
            high_to_low_ratio: DEFAULT_HIGH_TO_LOW_RATIO,
            jobs: 1,
            progress: false,
        }
    }
}

/// Detect both polarities on the given 0-based channels of one recording.
///
/// Channels the recording does not have are skipped with a warning.
pub fn detect_file(
    recording: &Recording,
    channels: &[usize],
    n_channels: usize,
    detector: &PeakDetector,
) -> FileBeats {
    let mut file = FileBeats::empty(recording, n_channels);
    for &index in channels {
        let low = PolarityBeats::detect(recording, index, Polarity::Low, detector);
        let high = PolarityBeats::detect(recording, index, Polarity::High, detector);
        match (low, high) {
            (Some(low), Some(high)) => {
                file.channels[index] = Some(ChannelBeats {
                    channel: ChannelId::from_index(index),
                    low,
                    high,
                    active: None,
                });
            }
            _ => log::warn!(
                "{}: has {} channels, skipping {}",
                recording.name,
                recording.n_channels(),
                ChannelId::from_index(index)
            ),
        }
    }
    file
}

/// Arbitrate every processed channel of a file in place.
pub fn arbitrate_file(file: &mut FileBeats, arbiter: &Arbiter, mode: ArbitrationMode) {
    for channel in file.channels.iter_mut().flatten() {
        arbiter.arbitrate(channel, mode);
    }
}

/// Resolve requested channel ids against the data width.
///
/// Id 0 is an error. Ids beyond the data width are skipped with a warning.
pub(crate) fn resolve_channels(
    requested: Option<&[ChannelId]>,
    n_channels: usize,
) -> Result<Vec<usize>, AnalyzeError> {
    let Some(ids) = requested else {
        return Ok((0..n_channels).collect());
    };
    let mut channels = Vec::with_capacity(ids.len());
    for &id in ids {
        match id.index() {
            None => return Err(AnalyzeError::InvalidChannel(id)),
            Some(i) if i < n_channels => channels.push(i),
            Some(_) => log::warn!(
                "{} out of range ({} channels in the data), skipping",
                id,
                n_channels
            ),
        }
    }
    Ok(channels)
}

/// Run peak detection and arbitration over a batch of recordings.
///
/// Returns one record per recording, in input order. Files outside the selection
/// are returned without channels. The channel layout is the column count of the
/// first recording.
pub fn analyze_recordings(
    recordings: &[Recording],
    selection: &Selection,
    options: &AnalyzeOptions,
) -> Result<Vec<FileBeats>, AnalyzeError> {
    options.rule.validate()?;

    let n_channels = recordings.first().map_or(0, Recording::n_channels);
    let channels = resolve_channels(selection.channels.as_deref(), n_channels)?;

    let mut files: Vec<FileBeats> = recordings
        .iter()
        .map(|r| FileBeats::empty(r, n_channels))
        .collect();

    let positions: Vec<usize> = match &selection.files {
        None => (0..recordings.len()).collect(),
        Some(numbers) => numbers
            .iter()
            .filter_map(|&n| {
                if (1..=recordings.len()).contains(&n) {
                    Some(n - 1)
                } else {
                    log::warn!("File {} out of range (1..={}), skipping", n, recordings.len());
                    None
                }
            })
            .collect(),
    };

    if positions.is_empty() || channels.is_empty() {
        log::info!("No recordings to analyze");
        return Ok(files);
    }

    log::info!(
        "Analyzing {} files x {} channels ({} signal, min distance {} samples) with {} workers",
        positions.len(),
        channels.len(),
        options.rule.signal,
        options.rule.min_distance_frames(),
        options.jobs
    );

    let detector = PeakDetector::from_rule(&options.rule);
    let arbiter = Arbiter::new(options.high_to_low_ratio);

    let pb = if options.progress {
        ProgressBar::new(positions.len() as u64)
    } else {
        ProgressBar::hidden()
    };
    let template = "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}";
    if let Ok(style) = ProgressStyle::with_template(template) {
        pb.set_style(style.progress_chars("#>-"));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs.max(1))
        .build()?;

    // Files are independent; collect keeps input order
    let results: Vec<(usize, FileBeats)> = pool.install(|| {
        use rayon::prelude::*;
        positions
            .par_iter()
            .map(|&pos| {
                let mut file = detect_file(&recordings[pos], &channels, n_channels, &detector);
                arbitrate_file(&mut file, &arbiter, options.mode);
                pb.inc(1);
                (pos, file)
            })
            .collect()
    });

    for (pos, file) in results {
        files[pos] = file;
    }

    pb.finish_with_message("done");
    Ok(files)
}
