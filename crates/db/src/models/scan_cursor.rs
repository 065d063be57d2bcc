//! Scan cursor model.

use camview_core::scan::CursorPosition;
use camview_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// Persisted scan position of one device.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ScanCursor {
    pub device_id: DbId,
    pub quick_cursor: Timestamp,
    pub full_cursor: Timestamp,
    pub full_epoch: Timestamp,
    pub full_complete: bool,
    pub percent: f64,
    pub updated_at: Timestamp,
}

impl ScanCursor {
    pub fn position(&self) -> CursorPosition {
        CursorPosition {
            quick_cursor: self.quick_cursor,
            full_cursor: self.full_cursor,
            full_epoch: self.full_epoch,
            full_complete: self.full_complete,
            percent: self.percent,
        }
    }
}
