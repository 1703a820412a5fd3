use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::analyzer::arbiter::{ArbitrationMode, DEFAULT_HIGH_TO_LOW_RATIO};
use crate::rules::{DEFAULT_FRAME_RATE, Rule, SignalType};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Application configuration loaded from TOML config file.
/// Every field is optional; the file itself is optional too.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Preset the detection rule starts from.
    pub signal: SignalType,
    /// Per-field overrides of the preset rule.
    pub rule: RuleOverrides,
    /// Electrode layout file used when `--layout` is not given.
    pub layout: Option<PathBuf>,
    pub arbitration: ArbitrationMode,
    /// High/low count gate of the arbiter.
    pub high_to_low_ratio: Option<f64>,
    /// Baseline files, 1-based. Empty = derive from the intervention start.
    pub baseline: Vec<usize>,
    /// Intervention start in seconds since the first file.
    pub intervention_start_sec: Option<f64>,
}

/// Optional replacements for the preset rule's fields.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RuleOverrides {
    pub frame_rate: Option<f64>,
    pub max_bpm: Option<f64>,
    pub min_peak_value: Option<f64>,
    pub min_peak_width: Option<usize>,
}

impl RuleOverrides {
    /// Fields set in `self` win over `fallback`.
    pub fn or(&self, fallback: &RuleOverrides) -> RuleOverrides {
        RuleOverrides {
            frame_rate: self.frame_rate.or(fallback.frame_rate),
            max_bpm: self.max_bpm.or(fallback.max_bpm),
            min_peak_value: self.min_peak_value.or(fallback.min_peak_value),
            min_peak_width: self.min_peak_width.or(fallback.min_peak_width),
        }
    }

    /// Preset for `signal`, with every set field replaced.
    pub fn apply(&self, signal: SignalType) -> Rule {
        let mut rule = Rule::for_signal(signal, self.frame_rate.unwrap_or(DEFAULT_FRAME_RATE));
        if let Some(v) = self.max_bpm {
            rule.max_bpm = v;
        }
        if let Some(v) = self.min_peak_value {
            rule.min_peak_value = v;
        }
        if let Some(v) = self.min_peak_width {
            rule.min_peak_width = v;
        }
        rule
    }
}

impl AppConfig {
    /// Load config from `~/.config/mea-beats/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be read or parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match Self::load_from(&path) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("{e}. Using defaults.");
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path. Unlike [`AppConfig::load`], any failure is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str::<AppConfig>(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    pub fn resolve_high_to_low_ratio(&self) -> f64 {
        self.high_to_low_ratio.unwrap_or(DEFAULT_HIGH_TO_LOW_RATIO)
    }

    /// Configured baseline files as 0-based positions. File number 0 is dropped.
    pub fn baseline_positions(&self) -> Vec<usize> {
        to_positions(&self.baseline)
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Convert 1-based file numbers to 0-based positions, dropping (and warning on) 0.
pub fn to_positions(numbers: &[usize]) -> Vec<usize> {
    numbers
        .iter()
        .filter_map(|&n| {
            let pos = n.checked_sub(1);
            if pos.is_none() {
                log::warn!("File numbers are 1-based; ignoring 0");
            }
            pos
        })
        .collect()
}
