//! Repository for the `scan_cursors` table.
//!
//! The scanner is the only writer of a device's row and callers serialize
//! scans per device, so plain updates are sufficient here.

use sqlx::PgPool;
use camview_core::scan::CursorPosition;
use camview_core::types::DbId;

use crate::models::scan_cursor::ScanCursor;

/// Column list for `scan_cursors` queries.
const COLUMNS: &str = "\
    device_id, quick_cursor, full_cursor, full_epoch, \
    full_complete, percent, updated_at";

/// Provides query operations for per-device scan cursors.
pub struct ScanCursorRepo;

impl ScanCursorRepo {
    /// Find the cursor of a device.
    pub async fn find(pool: &PgPool, device_id: DbId) -> Result<Option<ScanCursor>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM scan_cursors WHERE device_id = $1");
        sqlx::query_as::<_, ScanCursor>(&query)
            .bind(device_id)
            .fetch_optional(pool)
            .await
    }

    /// Create the cursor row if it does not exist yet, then return it.
    pub async fn ensure(
        pool: &PgPool,
        device_id: DbId,
        initial: &CursorPosition,
    ) -> Result<ScanCursor, sqlx::Error> {
        sqlx::query(
            "INSERT INTO scan_cursors \
                (device_id, quick_cursor, full_cursor, full_epoch, full_complete, percent) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (device_id) DO NOTHING",
        )
        .bind(device_id)
        .bind(initial.quick_cursor)
        .bind(initial.full_cursor)
        .bind(initial.full_epoch)
        .bind(initial.full_complete)
        .bind(initial.percent)
        .execute(pool)
        .await?;

        Self::find(pool, device_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Overwrite every cursor field. Used after each completed window and by reset.
    ///
    /// Returns `true` if the row existed.
    pub async fn save(
        pool: &PgPool,
        device_id: DbId,
        position: &CursorPosition,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE scan_cursors SET \
                quick_cursor = $2, full_cursor = $3, full_epoch = $4, \
                full_complete = $5, percent = $6, updated_at = NOW() \
             WHERE device_id = $1",
        )
        .bind(device_id)
        .bind(position.quick_cursor)
        .bind(position.full_cursor)
        .bind(position.full_epoch)
        .bind(position.full_complete)
        .bind(position.percent)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
