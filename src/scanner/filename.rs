use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

// Date and time at the end of the file stem, `T`-separated
// e.g., MEA21002b_2020-09-15T09-33-28.csv
static DATETIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        (?P<date>\d{4}-\d{2}-\d{2})
        T
        (?P<time>\d{2}-\d{2}-\d{2})
        $",
    )
    .unwrap()
});

// Date only, when the time part is missing or not a valid time
// e.g., MEA21002b_2020-09-15T.csv, baseline_2020-09-15Tnight.csv
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<date>\d{4}-\d{2}-\d{2})T[^T]*$").unwrap()
});

/// Parse the recording start from a file name ending in `yyyy-MM-ddTHH-mm-ss`.
///
/// The last `T` separator is used. When the time does not parse the date alone
/// is used (midnight). Returns `None` when no date is found.
pub fn parse_timestamp(path: &Path) -> Option<NaiveDateTime> {
    let stem = path.file_stem()?.to_str()?;

    if let Some(caps) = DATETIME_RE.captures(stem) {
        let date = NaiveDate::parse_from_str(&caps["date"], "%Y-%m-%d").ok();
        let time = NaiveTime::parse_from_str(&caps["time"], "%H-%M-%S").ok();
        match (date, time) {
            (Some(d), Some(t)) => return Some(d.and_time(t)),
            (Some(d), None) => return d.and_hms_opt(0, 0, 0),
            _ => {}
        }
    }

    let caps = DATE_RE.captures(stem)?;
    NaiveDate::parse_from_str(&caps["date"], "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
}
