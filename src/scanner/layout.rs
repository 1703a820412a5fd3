//! Electrode layout files: which raw data column each MEA electrode lives in.
//!
//! The file is whitespace separated with a header row, e.g.
//!
//! ```text
//! electrode_number index
//! 12 1
//! 13 2
//! ```
//!
//! `index` is the 1-based column in the raw data.

use crate::recording::ChannelId;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("Failed to read layout {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Layout line {line}: {message}")]
    Malformed { line: usize, message: String },
    #[error("Electrode number {0} not found in layout")]
    UnknownElectrode(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LayoutEntry {
    pub electrode: u32,
    pub column: ChannelId,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelLayout {
    /// Sorted, without duplicate rows.
    entries: Vec<LayoutEntry>,
}

impl ChannelLayout {
    pub fn load(path: &Path) -> Result<Self, LayoutError> {
        let text = std::fs::read_to_string(path).map_err(|source| LayoutError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let layout = Self::parse(&text)?;
        log::debug!("Read {} electrodes from {}", layout.len(), path.display());
        Ok(layout)
    }

    pub fn parse(text: &str) -> Result<Self, LayoutError> {
        let mut lines = text
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty());

        // Header row
        if lines.next().is_none() {
            return Ok(Self::default());
        }

        let mut entries = Vec::new();
        for (n, line) in lines {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let &[electrode, index] = fields.as_slice() else {
                return Err(LayoutError::Malformed {
                    line: n + 1,
                    message: format!("expected 2 fields, found {}", fields.len()),
                });
            };
            let parse = |s: &str| {
                s.parse::<u32>().map_err(|e| LayoutError::Malformed {
                    line: n + 1,
                    message: format!("{s:?}: {e}"),
                })
            };
            let electrode = parse(electrode)?;
            let column = parse(index)?;
            if column == 0 {
                return Err(LayoutError::Malformed {
                    line: n + 1,
                    message: "column index is 1-based".to_string(),
                });
            }
            entries.push(LayoutEntry {
                electrode,
                column: ChannelId(column),
            });
        }
        entries.sort();
        entries.dedup();
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    /// Data column of one electrode. The lowest column wins when an electrode is listed twice.
    pub fn column_of(&self, electrode: u32) -> Result<ChannelId, LayoutError> {
        self.entries
            .iter()
            .find(|e| e.electrode == electrode)
            .map(|e| e.column)
            .ok_or(LayoutError::UnknownElectrode(electrode))
    }

    /// Data columns for the given electrodes, in request order. Empty = every electrode.
    pub fn columns_for(&self, electrodes: &[u32]) -> Result<Vec<ChannelId>, LayoutError> {
        if electrodes.is_empty() {
            return Ok(self.entries.iter().map(|e| e.column).collect());
        }
        electrodes.iter().map(|&e| self.column_of(e)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: &str = "electrode_number index
12 3
21 1
21 1
28 2

31 4
";

    #[test]
    fn test_parse_dedups_and_sorts() {
        let layout = ChannelLayout::parse(LAYOUT).unwrap();
        assert_eq!(layout.len(), 4);
        let electrodes: Vec<u32> = layout.entries().iter().map(|e| e.electrode).collect();
        assert_eq!(electrodes, vec![12, 21, 28, 31]);
    }

    #[test]
    fn test_columns_in_request_order() {
        let layout = ChannelLayout::parse(LAYOUT).unwrap();
        let cols = layout.columns_for(&[31, 12]).unwrap();
        assert_eq!(cols, vec![ChannelId(4), ChannelId(3)]);
    }

    #[test]
    fn test_all_columns_when_none_requested() {
        let layout = ChannelLayout::parse(LAYOUT).unwrap();
        let cols = layout.columns_for(&[]).unwrap();
        assert_eq!(cols, vec![ChannelId(3), ChannelId(1), ChannelId(2), ChannelId(4)]);
    }

    #[test]
    fn test_unknown_electrode() {
        let layout = ChannelLayout::parse(LAYOUT).unwrap();
        let err = layout.columns_for(&[12, 99]).unwrap_err();
        assert!(matches!(err, LayoutError::UnknownElectrode(99)));
    }

    #[test]
    fn test_malformed_rows() {
        let err = ChannelLayout::parse("electrode_number index\n12\n").unwrap_err();
        assert!(matches!(err, LayoutError::Malformed { line: 2, .. }));

        let err = ChannelLayout::parse("electrode_number index\n12 x\n").unwrap_err();
        assert!(matches!(err, LayoutError::Malformed { line: 2, .. }));

        let err = ChannelLayout::parse("electrode_number index\n12 0\n").unwrap_err();
        assert!(matches!(err, LayoutError::Malformed { .. }));
    }

    #[test]
    fn test_header_only() {
        assert!(ChannelLayout::parse("electrode_number index\n").unwrap().is_empty());
        assert!(ChannelLayout::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MEA_64_electrode_layout.txt");
        std::fs::write(&path, LAYOUT).unwrap();
        let layout = ChannelLayout::load(&path).unwrap();
        assert_eq!(layout.column_of(28).unwrap(), ChannelId(2));

        let err = ChannelLayout::load(&dir.path().join("missing.txt")).unwrap_err();
        assert!(matches!(err, LayoutError::Read { .. }));
    }
}
