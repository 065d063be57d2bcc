//! Scan window splitting and cursor arithmetic.
//!
//! Device listing queries return incoherent results over long spans, so
//! every requested range is cut into windows no longer than a fixed
//! maximum. The cursor helpers here encode how the quick and full cursors
//! move after each completed window; the scanner persists the results.

use chrono::{Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Longest span the device enumerates reliably in one query.
pub const DEFAULT_MAX_WINDOW_DAYS: i64 = 30;

/// Trailing period during which the device may still be finalizing files.
pub const DEFAULT_VOLATILE_HOURS: i64 = 8;

/// Oldest point a full scan walks back to.
pub fn scan_epoch() -> Timestamp {
    Utc.with_ymd_and_hms(2009, 12, 31, 0, 0, 0)
        .single()
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC)
}

// ---------------------------------------------------------------------------
// Windows
// ---------------------------------------------------------------------------

/// Order in which windows (and the entries inside them) are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ascending,
    Descending,
}

/// A half-open `[start, end)` slice of a requested range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl ScanWindow {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, at: Timestamp) -> bool {
        self.start <= at && at < self.end
    }
}

/// Split `[start, end)` into the minimal ordered sequence of contiguous
/// windows, each no longer than `max_window`.
///
/// Ascending windows are anchored at `start` (only the last one may be
/// short); descending windows are anchored at `end`. An empty or inverted
/// range yields no windows.
pub fn split_windows(
    start: Timestamp,
    end: Timestamp,
    max_window: Duration,
    direction: Direction,
) -> Result<Vec<ScanWindow>, CoreError> {
    if max_window <= Duration::zero() {
        return Err(CoreError::Validation(
            "max scan window must be positive".into(),
        ));
    }

    let mut windows = Vec::new();
    match direction {
        Direction::Ascending => {
            let mut cursor = start;
            while cursor < end {
                let next = step_forward(cursor, max_window).min(end);
                windows.push(ScanWindow {
                    start: cursor,
                    end: next,
                });
                cursor = next;
            }
        }
        Direction::Descending => {
            let mut cursor = end;
            while cursor > start {
                let next = step_backward(cursor, max_window).max(start);
                windows.push(ScanWindow {
                    start: next,
                    end: cursor,
                });
                cursor = next;
            }
        }
    }
    Ok(windows)
}

fn step_forward(at: Timestamp, by: Duration) -> Timestamp {
    at.checked_add_signed(by)
        .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
}

fn step_backward(at: Timestamp, by: Duration) -> Timestamp {
    at.checked_sub_signed(by)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC)
}

/// Share of `total` already covered, as a percentage in `[0, 100]`.
///
/// An empty range counts as fully covered.
pub fn progress_percent(covered: Duration, total: Duration) -> f64 {
    if total <= Duration::zero() {
        return 100.0;
    }
    let ratio = covered.num_milliseconds() as f64 / total.num_milliseconds() as f64;
    (ratio * 100.0).clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Persisted position of a device's quick and full scans.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub quick_cursor: Timestamp,
    pub full_cursor: Timestamp,
    pub full_epoch: Timestamp,
    pub full_complete: bool,
    pub percent: f64,
}

impl CursorPosition {
    /// Initial values, also used by an explicit reset.
    pub fn reset(now: Timestamp, volatile_window: Duration) -> Self {
        let epoch = scan_epoch();
        Self {
            quick_cursor: now - volatile_window,
            full_cursor: now,
            full_epoch: epoch,
            full_complete: now <= epoch,
            percent: 0.0,
        }
    }

    /// Range a quick scan covers: from the quick cursor up to now.
    pub fn quick_range(&self, now: Timestamp) -> (Timestamp, Timestamp) {
        (self.quick_cursor, now.max(self.quick_cursor))
    }

    /// Range a full scan still has to walk: from the epoch up to the full cursor.
    pub fn full_range(&self) -> (Timestamp, Timestamp) {
        (self.full_epoch, self.full_cursor.max(self.full_epoch))
    }

    /// Advance the quick cursor after a completed window.
    ///
    /// The cursor never enters the volatile window and never moves back.
    pub fn advance_quick(
        &mut self,
        window_end: Timestamp,
        now: Timestamp,
        volatile_window: Duration,
    ) {
        let candidate = window_end.min(now - volatile_window);
        self.quick_cursor = self.quick_cursor.max(candidate);
    }

    /// Advance the full cursor after a completed (descending) window.
    pub fn advance_full(&mut self, window_start: Timestamp) {
        let next = window_start.max(self.full_epoch);
        self.full_cursor = self.full_cursor.min(next);
        self.full_complete = self.full_cursor == self.full_epoch;
    }
}
