//! Synthetic unique timestamps for device files.
//!
//! Devices report start/end times with one-second resolution, so pictures
//! captured in a burst share the same timestamps. The file path carries
//! bracketed tags (`.../08/00/00[M][0@0][3].jpg`) whose trailing numeric
//! tag is the capture index within that second. Combining that index with
//! a per-device seed yields a sub-second offset that is unique per device
//! and per capture, which keeps `start_time` usable as a stable key.

use std::sync::OnceLock;

use chrono::{Duration, DurationRound};
use regex::Regex;

use crate::types::Timestamp;

/// Number of distinct device seeds; seeds are taken modulo this value.
pub const SEED_SLOTS: i64 = 1000;

/// Largest capture index that still fits inside one second.
const MAX_INDEX: i64 = 999;

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"\[([^\]]*)\]").expect("static regex is valid"))
}

/// Bracketed tags of a file path, in order of appearance.
pub fn path_tags(file_path: &str) -> Vec<&str> {
    tag_regex()
        .captures_iter(file_path)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect()
}

/// Capture index of a file: the last purely numeric bracket tag, or 0.
pub fn capture_index(file_path: &str) -> i64 {
    path_tags(file_path)
        .into_iter()
        .rev()
        .find_map(|tag| tag.parse::<i64>().ok())
        .map(|index| index.clamp(0, MAX_INDEX))
        .unwrap_or(0)
}

/// Sub-second offset for a file: `index` milliseconds plus `seed` microseconds.
pub fn unique_offset(file_path: &str, seed: i64) -> Duration {
    let index = capture_index(file_path);
    Duration::microseconds(index * 1000 + seed.rem_euclid(SEED_SLOTS))
}

/// Disambiguated `(start, end)` pair for a device file.
///
/// Both timestamps are truncated to the whole second before the offset is
/// applied, so re-scanning the same file always yields the same pair.
pub fn unique_times(
    file_path: &str,
    seed: i64,
    start: Timestamp,
    end: Timestamp,
) -> (Timestamp, Timestamp) {
    let offset = unique_offset(file_path, seed);
    (truncate_seconds(start) + offset, truncate_seconds(end) + offset)
}

fn truncate_seconds(at: Timestamp) -> Timestamp {
    at.duration_trunc(Duration::seconds(1)).unwrap_or(at)
}
