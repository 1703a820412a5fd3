use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mea_beats::analyzer::arbiter::{ArbitrationMode, DecisionReason};
use mea_beats::analyzer::peaks::Polarity;
use mea_beats::analyzer::{self, AnalyzeOptions, FileBeats, Selection};
use mea_beats::config::{AppConfig, RuleOverrides, to_positions};
use mea_beats::recording::ChannelId;
use mea_beats::rules::{Rule, SignalType};
use mea_beats::scanner::{self, layout::ChannelLayout};
use mea_beats::summary::{self, Baseline, Summary, SummaryOptions};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "mea-beats",
    version,
    about = "Beat detection for MEA and other cardiac recordings"
)]
struct Cli {
    /// Config file (defaults to the XDG config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Detection rule flags shared by the commands that build a rule.
#[derive(clap::Args)]
struct RuleArgs {
    /// Signal type preset
    #[arg(long, value_enum)]
    signal: Option<SignalType>,

    /// Acquisition rate in Hz
    #[arg(long)]
    frame_rate: Option<f64>,

    /// Fastest physiological beat rate
    #[arg(long)]
    max_bpm: Option<f64>,

    /// Minimum peak amplitude
    #[arg(long, allow_negative_numbers = true)]
    min_peak_value: Option<f64>,

    /// Minimum peak width in samples (0 disables the width check)
    #[arg(long)]
    min_peak_width: Option<usize>,
}

impl RuleArgs {
    /// CLI flag > config file > signal preset.
    fn resolve(&self, config: &AppConfig) -> Rule {
        let cli = RuleOverrides {
            frame_rate: self.frame_rate,
            max_bpm: self.max_bpm,
            min_peak_value: self.min_peak_value,
            min_peak_width: self.min_peak_width,
        };
        cli.or(&config.rule)
            .apply(self.signal.unwrap_or(config.signal))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Detect beats in every recording of a folder and summarize them
    Analyze {
        /// Folder with one CSV sample matrix per recording
        folder: PathBuf,

        #[command(flatten)]
        rule: RuleArgs,

        /// Electrode numbers to analyze (data columns when no layout is given)
        #[arg(short, long, num_args = 1..)]
        electrodes: Vec<u32>,

        /// Electrode layout file (electrode_number index)
        #[arg(long)]
        layout: Option<PathBuf>,

        /// Which peaks count as beats
        #[arg(long, value_enum)]
        mode: Option<ArbitrationMode>,

        /// Only analyze these files (1-based, in file-name order)
        #[arg(long, num_args = 1..)]
        files: Vec<usize>,

        /// Baseline files for normalization (1-based)
        #[arg(long, num_args = 1..)]
        baseline: Vec<usize>,

        /// Intervention start in seconds after the first recording
        #[arg(long)]
        intervention_start: Option<f64>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,

        /// Write the full results as JSON instead of printing a table
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show the effective detection rule
    Rules {
        #[command(flatten)]
        rule: RuleArgs,
    },
}

/// One arbitration outcome, for the JSON report.
#[derive(Serialize)]
struct ChannelDecision {
    file: usize,
    channel: ChannelId,
    polarity: Polarity,
    reason: DecisionReason,
    low_peaks: usize,
    high_peaks: usize,
}

#[derive(Serialize)]
struct Report<'a> {
    folder: &'a Path,
    files: Vec<&'a str>,
    rule: &'a Rule,
    mode: ArbitrationMode,
    decisions: Vec<ChannelDecision>,
    summary: &'a Summary,
}

fn decisions(files: &[FileBeats]) -> Vec<ChannelDecision> {
    files
        .iter()
        .flat_map(|f| f.channels.iter().flatten().map(move |ch| (f.file_index, ch)))
        .filter_map(|(file, ch)| {
            let active = ch.active.as_ref()?;
            Some(ChannelDecision {
                file,
                channel: ch.channel,
                polarity: active.polarity,
                reason: active.reason,
                low_peaks: ch.low.peaks.count(),
                high_peaks: ch.high.peaks.count(),
            })
        })
        .collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Explicit config must load; the default location is optional
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path).context("Failed to load config")?,
        None => AppConfig::load(),
    };

    match cli.command {
        Commands::Analyze {
            folder,
            rule,
            electrodes,
            layout,
            mode,
            files,
            baseline,
            intervention_start,
            jobs,
            out,
        } => {
            let rule = rule.resolve(&config);
            rule.validate().context("Invalid detection rule")?;

            // Electrode selection: layout file from CLI > config
            let layout_path = layout.or_else(|| config.layout.clone());
            let file_selection = (!files.is_empty()).then_some(files);
            let selection = match &layout_path {
                Some(path) => {
                    let layout = ChannelLayout::load(path)
                        .context("Failed to load electrode layout")?;
                    Selection::from_layout(file_selection, &layout, &electrodes)
                        .context("Invalid electrode selection")?
                }
                None => Selection {
                    files: file_selection,
                    channels: (!electrodes.is_empty())
                        .then(|| electrodes.iter().copied().map(ChannelId).collect()),
                },
            };

            let recordings = scanner::scan_folder(&folder, rule.frame_rate, true)
                .with_context(|| format!("Failed to load recordings from {}", folder.display()))?;

            let options = AnalyzeOptions {
                rule: rule.clone(),
                mode: mode.unwrap_or(config.arbitration),
                high_to_low_ratio: config.resolve_high_to_low_ratio(),
                jobs: if jobs > 0 { jobs } else { config.resolve_workers() },
                progress: true,
            };
            let beats = analyzer::analyze_recordings(&recordings, &selection, &options)
                .context("Analysis failed")?;

            // Baseline: CLI > config > derived from intervention start
            let baseline = if !baseline.is_empty() {
                Baseline::Explicit(to_positions(&baseline))
            } else if !config.baseline.is_empty() {
                Baseline::Explicit(config.baseline_positions())
            } else {
                Baseline::Derived
            };
            let summary_options = SummaryOptions {
                baseline,
                intervention_start_sec: intervention_start.or(config.intervention_start_sec),
                channels: selection.channels.clone(),
            };
            let summary = summary::summarize(&beats, &summary_options).context("Summary failed")?;
            if summary.interval_mismatches > 0 {
                log::warn!(
                    "{} channels had inconsistent interval statistics",
                    summary.interval_mismatches
                );
            }

            match out {
                Some(path) => {
                    let report = Report {
                        folder: &folder,
                        files: recordings.iter().map(|r| r.name.as_str()).collect(),
                        rule: &rule,
                        mode: options.mode,
                        decisions: decisions(&beats),
                        summary: &summary,
                    };
                    let json = serde_json::to_string_pretty(&report)
                        .context("Failed to serialize results")?;
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!(
                        "Analysis complete: {} files, {} channels. Results written to {}",
                        beats.len(),
                        summary.amplitude_channels.len(),
                        path.display()
                    );
                }
                None => print_bpm_table(&beats, &summary),
            }
        }

        Commands::Rules { rule } => {
            let rule = rule.resolve(&config);
            print_rule(&rule);
            rule.validate().context("Invalid detection rule")?;
        }
    }

    Ok(())
}

/// Print the effective rule, one field per line.
fn print_rule(rule: &Rule) {
    println!("{:<18} {}", "Signal", rule.signal);
    println!("{:<18} {} Hz", "Frame rate", rule.frame_rate);
    println!(
        "{:<18} {}",
        "Counted peaks",
        if rule.low_peaks_counted { "low" } else { "high" }
    );
    println!("{:<18} {}", "Max BPM", rule.max_bpm);
    println!("{:<18} {}", "Min peak value", rule.min_peak_value);
    println!("{:<18} {} samples", "Min peak width", rule.min_peak_width);
    println!(
        "{:<18} {:.3} s ({} samples)",
        "Min distance",
        rule.min_distance_sec(),
        rule.min_distance_frames()
    );
}

fn fmt_cell(v: f64) -> String {
    if v.is_nan() { "-".to_string() } else { format!("{v:.1}") }
}

/// Print BPM per file and channel, plus the normalized BPM.
fn print_bpm_table(files: &[FileBeats], summary: &Summary) {
    let columns: Vec<usize> = summary
        .amplitude_channels
        .iter()
        .filter_map(|c| c.index())
        .collect();

    print!("{:>4} {:<30} {:>8}", "File", "Name", "Offset");
    for &c in &columns {
        print!(" {:>7}", ChannelId::from_index(c).to_string());
    }
    println!();
    println!("{}", "-".repeat(44 + 8 * columns.len()));

    for (row, f) in files.iter().enumerate() {
        // Truncate long names
        let name: String = if f.name.chars().count() > 30 {
            format!("{}...", f.name.chars().take(27).collect::<String>())
        } else {
            f.name.clone()
        };
        let offset = f.time_offset_sec.map_or("-".to_string(), |t| format!("{t:.0}s"));
        print!("{:>4} {:<30} {:>8}", f.file_index, name, offset);
        for &c in &columns {
            print!(" {:>7}", fmt_cell(summary.bpm_avg[[row, c]]));
        }
        println!();
    }

    println!();
    let baseline: Vec<String> = summary.baseline.iter().map(|b| (b + 1).to_string()).collect();
    if baseline.is_empty() {
        println!("Normalized BPM (baseline: all files)");
    } else {
        println!("Normalized BPM (baseline files: {})", baseline.join(", "));
    }
    for (row, f) in files.iter().enumerate() {
        print!("{:>4}", f.file_index);
        for &c in &columns {
            let v = summary.bpm_norm[[row, c]];
            if v.is_nan() {
                print!(" {:>7}", "-");
            } else {
                print!(" {:>7.2}", v);
            }
        }
        println!();
    }
}
