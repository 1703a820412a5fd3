pub mod analyzer;
pub mod config;
pub mod recording;
pub mod rules;
pub mod scanner;
pub mod stats;
pub mod summary;

/// Recording file extensions the folder scanner picks up
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv"];

/// Application name for XDG paths
pub const APP_NAME: &str = "mea-beats";
